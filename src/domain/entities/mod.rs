pub mod agent;
pub mod portfolio;
pub mod position;
pub mod quote;
pub mod settings;
pub mod trade;
