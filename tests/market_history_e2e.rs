//! Market history collection and arena-wide portfolio views, end to end
//! against an in-memory ledger.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arena::application::market_history::{MarketHistoryCollector, MarketHistoryConfig};
use arena::domain::entities::position::PositionSide;
use arena::domain::entities::quote::PriceMap;
use arena::domain::errors::CollectorError;
use arena::domain::repositories::ledger::Ledger;
use arena::domain::services::portfolio::{aggregated_portfolio, leaderboard};
use arena::domain::services::quote_cache::{QuoteCache, QuoteCacheConfig};
use common::*;

fn collector(
    ledger: Arc<dyn Ledger>,
    quotes: Arc<QuoteCache>,
    symbols: &[&str],
    interval: Duration,
) -> MarketHistoryCollector {
    MarketHistoryCollector::new(
        ledger,
        quotes,
        instruments(symbols),
        &MarketHistoryConfig {
            enabled: true,
            interval,
            resolution_seconds: 1,
        },
    )
}

#[tokio::test]
async fn test_collect_once_records_quoted_instruments() {
    let ledger = setup_ledger().await;
    let quotes = quote_cache(MockQuotes::with_prices(&[("BTC", 50_000.0), ("ETH", 3_000.0)]));
    let collector = collector(ledger.clone(), quotes, &["BTC", "ETH", "SOL"], Duration::from_secs(60));

    // SOL has no quote and is skipped.
    assert_eq!(collector.collect_once().await.unwrap(), 2);
    assert_eq!(collector.snapshots_recorded(), 1);

    let btc = ledger.market_history("BTC", 1, 10).await.unwrap();
    assert_eq!(btc.len(), 1);
    assert_eq!(btc[0].close, 50_000.0);
    assert_eq!(btc[0].open, btc[0].close);
    assert_eq!(btc[0].source, "mock");
    assert!(ledger.market_history("SOL", 1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_collect_once_reports_outage() {
    let ledger = setup_ledger().await;
    let source = MockQuotes::with_prices(&[("BTC", 50_000.0)]);
    source.set_failing(true);
    let collector = collector(ledger.clone(), quote_cache(source), &["BTC"], Duration::from_secs(60));

    assert!(matches!(
        collector.collect_once().await,
        Err(CollectorError::MarketData(_))
    ));
    assert_eq!(collector.snapshots_recorded(), 0);
}

#[tokio::test]
async fn test_collector_snapshots_periodically_and_stops_promptly() {
    let ledger = setup_ledger().await;
    let source = MockQuotes::with_prices(&[("BTC", 50_000.0)]);
    // Zero TTL so every run reaches the source.
    let quotes = Arc::new(QuoteCache::new(
        source.clone(),
        source.clone(),
        QuoteCacheConfig {
            ttl: Duration::ZERO,
            ..QuoteCacheConfig::default()
        },
    ));
    let collector = collector(ledger.clone(), quotes, &["BTC"], Duration::from_secs(1));

    assert!(collector.stop(Duration::from_millis(10)).await);
    collector.start().await;
    assert!(collector.is_running());

    tokio::time::sleep(Duration::from_millis(2_300)).await;
    let recorded = collector.snapshots_recorded();
    assert!((2..=4).contains(&recorded), "recorded {}", recorded);
    assert!(source.calls.load(Ordering::SeqCst) >= 2);

    // Mid-sleep; the stop signal cuts the wait short.
    assert!(collector.stop(Duration::from_millis(500)).await);
    assert!(!collector.is_running());
    assert!(!ledger.market_history("BTC", 1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_leaderboard_and_aggregate_over_ledger() {
    let ledger = setup_ledger().await;
    let winner = create_agent(&ledger, "winner", 10_000.0).await;
    let loser = create_agent(&ledger, "loser", 10_000.0).await;
    let idle = create_agent(&ledger, "idle", 2_000.0).await;
    ledger
        .upsert_position(winner, "ETH", PositionSide::Long, 2.0, 2_000.0, 2)
        .await
        .unwrap();
    ledger
        .upsert_position(loser, "ETH", PositionSide::Long, 1.0, 2_600.0, 1)
        .await
        .unwrap();
    let prices = PriceMap::from([("ETH".to_string(), 2_300.0)]);

    let board = leaderboard(ledger.as_ref(), &prices).await.unwrap();
    let order: Vec<i64> = board.iter().map(|entry| entry.agent_id).collect();
    assert_eq!(order, vec![winner, idle, loser]);
    // winner: 2 * (2300 - 2000) on 10k
    assert!((board[0].return_pct - 6.0).abs() < 1e-9);
    assert!((board[2].return_pct + 3.0).abs() < 1e-9);

    let aggregate = aggregated_portfolio(ledger.as_ref(), &prices).await.unwrap();
    assert_eq!(aggregate.agent_count, 3);
    assert!((aggregate.initial_capital - 22_000.0).abs() < 1e-9);
    assert!((aggregate.unrealized_pnl - 300.0).abs() < 1e-9);
    assert_eq!(aggregate.positions.len(), 1);
    let eth = &aggregate.positions[0];
    assert!((eth.quantity - 3.0).abs() < 1e-9);
    // (2 * 2000 + 1 * 2600) / 3
    assert!((eth.avg_price - 2_200.0).abs() < 1e-9);
    assert!((eth.pnl - 300.0).abs() < 1e-9);
}
