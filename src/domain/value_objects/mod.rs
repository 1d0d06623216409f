pub mod leverage;
pub mod price;
pub mod quantity;
