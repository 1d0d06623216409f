pub mod decision_maker;
pub mod ledger;
pub mod quote_source;
