pub mod decision;
pub mod execution_engine;
pub mod indicators;
pub mod portfolio;
pub mod quote_cache;
