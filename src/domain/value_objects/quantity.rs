use serde_json::Value;

use crate::domain::errors::ValidationError;

/// Strictly positive, finite order or position size.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        if value > 0.0 {
            Ok(Quantity(value))
        } else {
            Err(ValidationError::InvalidQuantity(
                "must be positive".to_string(),
            ))
        }
    }

    /// Read a quantity from a decision field.
    ///
    /// Numbers and numeric strings are accepted; a missing field reads as zero
    /// and is rejected as non-positive.
    pub fn from_json(value: Option<&Value>) -> Result<Self, ValidationError> {
        let raw = match value {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
                ValidationError::InvalidQuantity(format!("cannot read {}", n))
            })?,
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|e| {
                ValidationError::InvalidQuantity(format!("cannot parse '{}': {}", s, e))
            })?,
            Some(other) => {
                return Err(ValidationError::InvalidQuantity(format!(
                    "expected a number, got {}",
                    other
                )))
            }
        };
        Self::new(raw)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}
