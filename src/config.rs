use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::application::market_history::MarketHistoryConfig;
use crate::application::scheduler::SchedulerConfig;
use crate::backoff::BackoffConfig;
use crate::domain::entities::settings::Settings;
use crate::domain::services::quote_cache::QuoteCacheConfig;
use crate::infrastructure::binance_client::BinanceConfig;
use crate::infrastructure::coingecko_client::CoinGeckoConfig;
use crate::persistence::DatabaseConfig;
use crate::rate_limit::RateLimiterConfig;

pub const DEFAULT_INSTRUMENTS: [&str; 6] = ["BTC", "ETH", "SOL", "BNB", "XRP", "DOGE"];

/// Process configuration, loaded once at startup.
///
/// Runtime trading settings (interval, fee, concurrency, per-agent timeout)
/// live in the ledger. Only their seed values come from here.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub instruments: Vec<String>,
    pub quote_cache: QuoteCacheConfig,
    pub binance: BinanceConfig,
    pub coingecko: CoinGeckoConfig,
    pub quote_rate_limit: RateLimiterConfig,
    pub scheduler: SchedulerConfig,
    pub market_history: MarketHistoryConfig,
    /// Seed for the ledger's settings row
    pub default_settings: Settings,
    pub shutdown_timeout: Duration,
    pub decision_timeout: Duration,
    pub auto_trading: bool,
    pub status_addr: SocketAddr,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            instruments: DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            quote_cache: QuoteCacheConfig::default(),
            binance: BinanceConfig::default(),
            coingecko: CoinGeckoConfig::default(),
            quote_rate_limit: RateLimiterConfig::default(),
            scheduler: SchedulerConfig::default(),
            market_history: MarketHistoryConfig::default(),
            default_settings: Settings::default(),
            shutdown_timeout: Duration::from_secs(30),
            decision_timeout: Duration::from_secs(60),
            auto_trading: true,
            status_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables (after `.env`)
    pub fn from_env() -> AppConfig {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Bad values are logged and
    /// the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppConfig {
        let mut config = AppConfig {
            database: DatabaseConfig::from_lookup(&lookup),
            ..AppConfig::default()
        };

        if let Some(raw) = lookup("TRADING_INSTRUMENTS") {
            let instruments = parse_instruments(&raw);
            if instruments.is_empty() {
                tracing::warn!(
                    "TRADING_INSTRUMENTS '{}' names no instrument, using default: {:?}",
                    raw,
                    config.instruments
                );
            } else {
                config.instruments = instruments;
            }
        }

        if let Some(ttl) = read_ranged(&lookup, "QUOTE_CACHE_TTL_SECONDS", 1..=3600) {
            config.quote_cache.ttl = Duration::from_secs(ttl);
        }
        if let Some(max) = read_ranged(&lookup, "QUOTE_CACHE_MAX_ENTRIES", 1..=10_000) {
            config.quote_cache.max_entries = max;
        }

        if let Some(url) = lookup("PRIMARY_QUOTE_URL") {
            config.binance.api_base = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("SECONDARY_QUOTE_URL") {
            config.coingecko.api_base = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = read_ranged(&lookup, "PRIMARY_QUOTE_TIMEOUT_SECONDS", 1..=120) {
            config.binance.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_ranged(&lookup, "SECONDARY_QUOTE_TIMEOUT_SECONDS", 1..=120) {
            config.coingecko.timeout = Duration::from_secs(secs);
        }
        if let Some(rpm) = read_ranged(&lookup, "QUOTE_REQUESTS_PER_MINUTE", 1..=6000) {
            config.quote_rate_limit.requests_per_minute = rpm;
        }

        if let Some(workers) = read_ranged(&lookup, "SCHEDULER_MAX_WORKERS", 1..=256) {
            config.default_settings.max_concurrency = workers;
        }
        if let Some(secs) = read_ranged(&lookup, "AGENT_CYCLE_TIMEOUT_SECONDS", 1..=86_400) {
            config.default_settings.per_agent_timeout_seconds = secs;
        }
        if let Some(secs) = read_ranged(&lookup, "SCHEDULER_IDLE_SLEEP_SECONDS", 1..=3600) {
            config.scheduler.idle_sleep = Duration::from_secs(secs);
        }

        let mut backoff = config.scheduler.backoff.clone();
        if let Some(secs) = read_ranged(&lookup, "RETRY_INITIAL_DELAY_SECONDS", 1..=3600) {
            backoff.initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = read_ranged(&lookup, "RETRY_MAX_DELAY_SECONDS", 1..=86_400) {
            backoff.max_delay = Duration::from_secs(secs);
        }
        if backoff.max_delay < backoff.initial_delay {
            tracing::warn!(
                "RETRY_MAX_DELAY_SECONDS below RETRY_INITIAL_DELAY_SECONDS, using defaults: {:?}",
                BackoffConfig::default()
            );
            backoff = BackoffConfig::default();
        }
        config.scheduler.backoff = backoff;

        if let Some(enabled) = lookup("MARKET_HISTORY_ENABLED") {
            config.market_history.enabled = parse_flag(&enabled);
        }
        if let Some(secs) = read_ranged(&lookup, "MARKET_HISTORY_INTERVAL_SECONDS", 1..=86_400) {
            config.market_history.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = read_ranged(&lookup, "MARKET_HISTORY_RESOLUTION_SECONDS", 1..=86_400) {
            config.market_history.resolution_seconds = secs;
        }

        if let Some(secs) = read_ranged(&lookup, "SHUTDOWN_TIMEOUT_SECONDS", 1..=600) {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_ranged(&lookup, "DECISION_TIMEOUT_SECONDS", 1..=600) {
            config.decision_timeout = Duration::from_secs(secs);
        }

        if let Some(enabled) = lookup("AUTO_TRADING") {
            config.auto_trading = parse_flag(&enabled);
        }

        if let Some(addr) = lookup("STATUS_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(value) => config.status_addr = value,
                Err(e) => tracing::warn!(
                    "Failed to parse STATUS_ADDR '{}': {}, using default: {}",
                    addr,
                    e,
                    config.status_addr
                ),
            }
        }

        config
    }
}

/// Comma-separated symbols, trimmed and uppercased, duplicates dropped.
pub fn parse_instruments(raw: &str) -> Vec<String> {
    let mut instruments: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !instruments.contains(&symbol) {
            instruments.push(symbol);
        }
    }
    instruments
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn read_ranged<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    range: std::ops::RangeInclusive<T>,
) -> Option<T>
where
    T: FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => Some(value),
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (must be between {} and {}), using default",
                key,
                value,
                range.start(),
                range.end()
            );
            None
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", key, raw, e);
            None
        }
    }
}
