//! AgentRegistry - one execution engine per known agent
//!
//! The scheduler reads a snapshot of the registry every tick, so agents added
//! or removed between ticks are picked up without a restart.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::domain::entities::agent::{Agent, AgentId};
use crate::domain::errors::{EngineError, LedgerError};
use crate::domain::repositories::ledger::Ledger;
use crate::domain::repositories::quote_source::HistorySource;
use crate::domain::services::execution_engine::ExecutionEngine;
use crate::domain::services::quote_cache::QuoteCache;
use crate::infrastructure::llm_client::LlmClient;

/// Builds the engine that will run an agent's cycles.
pub trait EngineFactory: Send + Sync {
    fn build(&self, agent: &Agent) -> Result<ExecutionEngine, EngineError>;
}

/// Engines backed by each agent's own chat-completion provider.
pub struct LlmEngineFactory {
    pub ledger: Arc<dyn Ledger>,
    pub quotes: Arc<QuoteCache>,
    pub history: Option<Arc<dyn HistorySource>>,
    pub instruments: Vec<String>,
    pub decision_timeout: Duration,
}

impl EngineFactory for LlmEngineFactory {
    fn build(&self, agent: &Agent) -> Result<ExecutionEngine, EngineError> {
        let client = LlmClient::for_agent(agent, self.decision_timeout)?;
        let engine = ExecutionEngine::new(
            agent.id,
            self.instruments.clone(),
            self.ledger.clone(),
            self.quotes.clone(),
            Arc::new(client),
        );
        Ok(match &self.history {
            Some(history) => engine.with_history(history.clone()),
            None => engine,
        })
    }
}

pub struct AgentRegistry {
    ledger: Arc<dyn Ledger>,
    factory: Arc<dyn EngineFactory>,
    engines: RwLock<BTreeMap<AgentId, Arc<ExecutionEngine>>>,
}

impl AgentRegistry {
    pub fn new(ledger: Arc<dyn Ledger>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            ledger,
            factory,
            engines: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builds an engine for every agent in the ledger. Agents whose engine
    /// cannot be built are logged and left out.
    pub async fn initialize(&self) -> Result<usize, LedgerError> {
        let agents = self.ledger.list_agents().await?;
        let mut engines = self.engines.write().await;
        engines.clear();

        for agent in &agents {
            match self.factory.build(agent) {
                Ok(engine) => {
                    engines.insert(agent.id, Arc::new(engine));
                }
                Err(e) => error!(agent_id = agent.id, error = %e, "Failed to build engine"),
            }
        }

        info!("Agent registry initialized with {} engines", engines.len());
        Ok(engines.len())
    }

    /// Loads one agent from the ledger and (re)builds its engine.
    pub async fn register(&self, agent_id: AgentId) -> Result<(), EngineError> {
        let agent = self.ledger.get_agent(agent_id).await?;
        let engine = self.factory.build(&agent)?;
        self.insert(engine).await;
        info!(agent_id, "Agent registered");
        Ok(())
    }

    pub async fn insert(&self, engine: ExecutionEngine) {
        self.engines
            .write()
            .await
            .insert(engine.agent_id(), Arc::new(engine));
    }

    pub async fn remove(&self, agent_id: AgentId) -> bool {
        let removed = self.engines.write().await.remove(&agent_id).is_some();
        if removed {
            info!(agent_id, "Agent removed");
        }
        removed
    }

    pub async fn get(&self, agent_id: AgentId) -> Option<Arc<ExecutionEngine>> {
        self.engines.read().await.get(&agent_id).cloned()
    }

    /// Current (agent, engine) pairs, ordered by agent id.
    pub async fn snapshot(&self) -> Vec<(AgentId, Arc<ExecutionEngine>)> {
        self.engines
            .read()
            .await
            .iter()
            .map(|(id, engine)| (*id, engine.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.engines.read().await.is_empty()
    }
}
