//! Persistence Layer
//!
//! SQLite ledger for agents, positions, trades, decision audits and account
//! snapshots, accessed asynchronously through sqlx.
//!
//! # Database Schema
//!
//! ## Positions Table
//! - agent_id, instrument, side: unique key
//! - quantity, avg_price: strictly positive
//! - leverage: 1 to 20
//!
//! ## Trades Table
//! - append-only fills; `pnl` and `fee` sum to realized PnL and total fees
//!
//! ## Account Snapshots Table
//! - one row per completed cycle
//!
//! ## Settings Table
//! - single row re-read by the scheduler every tick
//!
//! ## Market Prices Table
//! - instrument, resolution, ts: primary key; re-recording a bucket replaces it

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::domain::errors::LedgerError;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Initialize the database connection pool and run migrations
///
/// In-memory databases live as long as their connection, so they are
/// limited to a single connection that is never recycled.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, LedgerError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LedgerError::Connection(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Trace
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .log_statements(level);

    let pool_options = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

async fn migrate(pool: &DbPool, table: &str, statement: &str) -> Result<(), LedgerError> {
    sqlx::query(statement)
        .execute(pool)
        .await
        .map_err(|e| LedgerError::Migration(format!("Failed to create {}: {}", table, e)))?;
    Ok(())
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), LedgerError> {
    info!("Running database migrations...");

    migrate(
        pool,
        "providers table",
        r#"
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            api_url TEXT NOT NULL,
            api_key TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "agents table",
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            provider_id INTEGER NOT NULL REFERENCES providers(id),
            model_name TEXT NOT NULL,
            initial_capital REAL NOT NULL CHECK(initial_capital > 0),
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "positions table",
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            instrument TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('long', 'short')),
            quantity REAL NOT NULL CHECK(quantity > 0),
            avg_price REAL NOT NULL CHECK(avg_price > 0),
            leverage INTEGER NOT NULL CHECK(leverage BETWEEN 1 AND 20),
            updated_at DATETIME NOT NULL,
            UNIQUE(agent_id, instrument, side)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "trades table",
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            instrument TEXT NOT NULL,
            signal TEXT NOT NULL,
            quantity REAL NOT NULL,
            price REAL NOT NULL,
            leverage INTEGER NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('long', 'short')),
            pnl REAL NOT NULL DEFAULT 0.0,
            fee REAL NOT NULL DEFAULT 0.0 CHECK(fee >= 0),
            executed_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "conversations table",
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            user_prompt TEXT NOT NULL,
            ai_response TEXT NOT NULL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "account_snapshots table",
        r#"
        CREATE TABLE IF NOT EXISTS account_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
            total_value REAL NOT NULL,
            cash REAL NOT NULL,
            positions_value REAL NOT NULL,
            recorded_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "settings table",
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            cycle_interval_minutes INTEGER NOT NULL,
            fee_rate REAL NOT NULL CHECK(fee_rate >= 0),
            max_concurrency INTEGER NOT NULL,
            per_agent_timeout_seconds INTEGER NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "market_prices table",
        r#"
        CREATE TABLE IF NOT EXISTS market_prices (
            instrument TEXT NOT NULL,
            resolution INTEGER NOT NULL CHECK(resolution > 0),
            ts DATETIME NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL DEFAULT 0.0,
            source TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            PRIMARY KEY (instrument, resolution, ts)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "index",
        "CREATE INDEX IF NOT EXISTS idx_trades_agent ON trades(agent_id, executed_at)",
    )
    .await?;

    migrate(
        pool,
        "index",
        "CREATE INDEX IF NOT EXISTS idx_snapshots_agent ON account_snapshots(agent_id, recorded_at)",
    )
    .await?;

    migrate(
        pool,
        "index",
        "CREATE INDEX IF NOT EXISTS idx_conversations_agent ON conversations(agent_id, created_at)",
    )
    .await?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/arena.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/arena.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Load from `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` and
    /// `DATABASE_LOG_QUERIES` through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let url = lookup("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = lookup("DATABASE_LOG_QUERIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}
