use std::sync::Arc;

use arena::application::agent_registry::{AgentRegistry, LlmEngineFactory};
use arena::application::handlers::status_handler::{status_router, StatusState};
use arena::application::market_history::MarketHistoryCollector;
use arena::application::scheduler::Scheduler;
use arena::config::AppConfig;
use arena::domain::repositories::ledger::Ledger;
use arena::domain::repositories::quote_source::{HistorySource, QuoteSource};
use arena::domain::services::quote_cache::QuoteCache;
use arena::infrastructure::binance_client::BinanceClient;
use arena::infrastructure::coingecko_client::CoinGeckoClient;
use arena::infrastructure::quotable_instruments;
use arena::persistence::init_database;
use arena::persistence::repository::SqliteLedger;
use arena::rate_limit::{create_rate_limiter, RateLimiterConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!(
        "Arena starting: {} instruments, auto trading {}",
        config.instruments.len(),
        if config.auto_trading { "on" } else { "off" }
    );

    let pool = init_database(&config.database).await?;
    let sqlite = Arc::new(SqliteLedger::new(pool));
    sqlite.seed_settings(&config.default_settings).await?;
    let ledger: Arc<dyn Ledger> = sqlite;

    let binance = BinanceClient::new(config.binance.clone())?
        .with_rate_limiter(create_rate_limiter(config.quote_rate_limit.clone()));
    let coingecko = Arc::new(
        CoinGeckoClient::new(config.coingecko.clone())?
            .with_rate_limiter(create_rate_limiter(config.quote_rate_limit.clone())),
    );
    let instruments = quotable_instruments(&config.instruments, &binance, &coingecko);
    if instruments.is_empty() {
        return Err(format!(
            "none of the configured instruments {:?} can be quoted",
            config.instruments
        )
        .into());
    }

    let secondary: Arc<dyn QuoteSource> = coingecko.clone();
    let history: Arc<dyn HistorySource> = coingecko;
    let quotes = Arc::new(QuoteCache::new(
        Arc::new(binance),
        secondary,
        config.quote_cache.clone(),
    ));

    let factory = Arc::new(LlmEngineFactory {
        ledger: ledger.clone(),
        quotes: quotes.clone(),
        history: Some(history),
        instruments: instruments.clone(),
        decision_timeout: config.decision_timeout,
    });
    let registry = Arc::new(AgentRegistry::new(ledger.clone(), factory));
    let registered = registry.initialize().await?;
    info!("{} agents registered", registered);

    let scheduler = Arc::new(Scheduler::new(
        registry,
        ledger.clone(),
        config.scheduler.clone(),
    ));
    if config.auto_trading {
        scheduler.start().await;
    } else {
        info!("AUTO_TRADING disabled, scheduler not started");
    }

    let collector = MarketHistoryCollector::new(
        ledger.clone(),
        quotes.clone(),
        instruments.clone(),
        &config.market_history,
    );
    if config.market_history.enabled {
        collector.start().await;
    } else {
        info!("MARKET_HISTORY_ENABLED off, market history not collected");
    }

    let app = status_router(
        StatusState {
            scheduler: scheduler.clone(),
            ledger,
            quotes,
            instruments,
        },
        Some(create_rate_limiter(RateLimiterConfig::default())),
    );

    info!("Status endpoint listening on {}", config.status_addr);
    let listener = tokio::net::TcpListener::bind(config.status_addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");
    if !scheduler.stop(config.shutdown_timeout).await {
        warn!(
            "Scheduler still busy after {:?}, exiting anyway",
            config.shutdown_timeout
        );
    }

    if !collector.stop(config.shutdown_timeout).await {
        warn!("Market history collector still busy, exiting anyway");
    }

    info!("Shutdown complete");
    Ok(())
}
