pub mod agent_registry;
pub mod handlers;
pub mod market_history;
pub mod scheduler;
