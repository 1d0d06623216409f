//! Arena - autonomous trading agents competing on a shared simulated ledger
//!
//! Each agent asks its own decision function for trading signals every cycle;
//! the execution engine turns them into paper orders against a SQLite ledger.

pub mod application;
pub mod backoff;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
