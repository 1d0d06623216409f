//! Shared fixtures for the integration tests: an in-memory ledger and
//! scripted quote and decision sources.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arena::domain::entities::agent::AgentId;
use arena::domain::entities::quote::{Quote, QuoteMap};
use arena::domain::errors::{DecisionError, QuoteError};
use arena::domain::repositories::decision_maker::{
    DecisionExchange, DecisionMaker, DecisionRequest,
};
use arena::domain::repositories::ledger::Ledger;
use arena::domain::repositories::quote_source::QuoteSource;
use arena::domain::services::execution_engine::ExecutionEngine;
use arena::domain::services::quote_cache::{QuoteCache, QuoteCacheConfig};
use arena::persistence::models::{CreateAgent, CreateProvider};
use arena::persistence::repository::SqliteLedger;
use arena::persistence::{init_database, DatabaseConfig};
use async_trait::async_trait;
use chrono::Utc;

pub async fn setup_ledger() -> Arc<SqliteLedger> {
    let pool = init_database(&DatabaseConfig::in_memory())
        .await
        .expect("in-memory database");
    Arc::new(SqliteLedger::new(pool))
}

pub async fn create_agent(ledger: &SqliteLedger, name: &str, capital: f64) -> AgentId {
    let provider_id = ledger
        .create_provider(CreateProvider {
            name: format!("{}-provider", name),
            api_url: "http://localhost:8080".to_string(),
            api_key: "test-key".to_string(),
        })
        .await
        .expect("provider");
    ledger
        .create_agent(CreateAgent {
            name: name.to_string(),
            provider_id,
            model_name: "test-model".to_string(),
            initial_capital: capital,
        })
        .await
        .expect("agent")
}

/// Quote source serving whatever prices the test sets.
#[derive(Default)]
pub struct MockQuotes {
    prices: Mutex<HashMap<String, f64>>,
    failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockQuotes {
    pub fn with_prices(prices: &[(&str, f64)]) -> Arc<Self> {
        let source = Self::default();
        for (instrument, price) in prices {
            source.set_price(instrument, *price);
        }
        Arc::new(source)
    }

    pub fn set_price(&self, instrument: &str, price: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert(instrument.to_string(), price);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuoteSource for MockQuotes {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_quotes(&self, instruments: &[String]) -> Result<QuoteMap, QuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(QuoteError::Source("mock outage".to_string()));
        }
        let prices = self.prices.lock().unwrap();
        Ok(instruments
            .iter()
            .filter_map(|instrument| {
                prices.get(instrument).map(|price| {
                    (
                        instrument.clone(),
                        Quote {
                            instrument: instrument.clone(),
                            price: *price,
                            change_24h: 0.0,
                            volume: 1_000.0,
                            source: "mock".to_string(),
                            captured_at: Utc::now(),
                        },
                    )
                })
            })
            .collect())
    }
}

/// Decision function replaying queued responses, then `{}`.
#[derive(Default)]
pub struct ScriptedDecisions {
    responses: Mutex<VecDeque<String>>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedDecisions {
    pub fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        })
    }

    /// Every call sleeps for `delay` before answering.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn push(&self, response: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(response.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecisions {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionExchange, DecisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "{}".to_string());
        Ok(DecisionExchange {
            prompt: "test prompt".to_string(),
            response,
        })
    }
}

/// Decision function whose transport always fails.
#[derive(Default)]
pub struct FailingDecisions {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DecisionMaker for FailingDecisions {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionExchange, DecisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(DecisionError::Request("connection refused".to_string()))
    }
}

pub fn quote_cache(source: Arc<MockQuotes>) -> Arc<QuoteCache> {
    Arc::new(QuoteCache::new(
        source.clone(),
        source,
        QuoteCacheConfig::default(),
    ))
}

pub fn instruments(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(|s| s.to_string()).collect()
}

pub fn engine(
    agent_id: AgentId,
    symbols: &[&str],
    ledger: Arc<SqliteLedger>,
    quotes: Arc<QuoteCache>,
    decisions: Arc<dyn DecisionMaker>,
) -> ExecutionEngine {
    let ledger: Arc<dyn Ledger> = ledger;
    ExecutionEngine::new(agent_id, instruments(symbols), ledger, quotes, decisions)
}
