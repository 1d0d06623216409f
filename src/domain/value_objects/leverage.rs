use serde_json::Value;

use crate::domain::errors::ValidationError;

pub const MIN_LEVERAGE: i64 = 1;
pub const MAX_LEVERAGE: i64 = 20;

/// Leverage multiplier, always within `MIN_LEVERAGE..=MAX_LEVERAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Leverage(i64);

impl Leverage {
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if (MIN_LEVERAGE..=MAX_LEVERAGE).contains(&value) {
            Ok(Leverage(value))
        } else {
            Err(ValidationError::InvalidLeverage(value))
        }
    }

    /// Read leverage from a decision field. Missing means 1x; fractional
    /// numbers are truncated toward zero.
    pub fn from_json(value: Option<&Value>) -> Result<Self, ValidationError> {
        let raw = match value {
            None | Some(Value::Null) => MIN_LEVERAGE,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => i,
                None => {
                    let f = n.as_f64().ok_or(ValidationError::MustBeFinite)?;
                    if !f.is_finite() {
                        return Err(ValidationError::MustBeFinite);
                    }
                    f.trunc() as i64
                }
            },
            Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|e| {
                ValidationError::UnparsableLeverage(format!(
                    "cannot parse '{}': {}",
                    s, e
                ))
            })?,
            Some(other) => {
                return Err(ValidationError::UnparsableLeverage(format!(
                    "expected an integer, got {}",
                    other
                )))
            }
        };
        Self::new(raw)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }
}

impl std::fmt::Display for Leverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.0)
    }
}
