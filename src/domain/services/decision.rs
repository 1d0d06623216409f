//! Decision response parsing
//!
//! Turns the decision function's raw text into ordered per-instrument
//! decisions. Structural problems are fatal to the cycle; field-level problems
//! are left for the engine to report per instrument.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::errors::DecisionError;

/// One instrument's requested action, with quantity and leverage kept raw so
/// the engine can reject them per instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub signal: String,
    pub quantity: Option<Value>,
    pub leverage: Option<Value>,
    pub profit_target: Option<f64>,
    pub stop_loss: Option<f64>,
    pub confidence: Option<f64>,
    pub justification: Option<String>,
}

impl Decision {
    fn from_object(object: &Map<String, Value>) -> Self {
        let signal = object
            .get("signal")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_lowercase();

        Decision {
            signal,
            quantity: object.get("quantity").cloned(),
            leverage: object.get("leverage").cloned(),
            profit_target: object.get("profit_target").and_then(Value::as_f64),
            stop_loss: object.get("stop_loss").and_then(Value::as_f64),
            confidence: object.get("confidence").and_then(Value::as_f64),
            justification: object
                .get("justification")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Removes a Markdown code fence around the payload, if any.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let body = if let Some((_, rest)) = trimmed.split_once("```json") {
        rest
    } else if let Some((_, rest)) = trimmed.split_once("```") {
        rest
    } else {
        return trimmed;
    };
    body.split("```").next().unwrap_or(body).trim()
}

/// Parses a decision response into (instrument, decision) pairs in the order
/// the response listed them.
pub fn parse_decisions(response: &str) -> Result<Vec<(String, Decision)>, DecisionError> {
    let payload = strip_code_fence(response);
    let value: Value = serde_json::from_str(payload).map_err(|e| {
        let preview: String = payload.chars().take(200).collect();
        DecisionError::Malformed(format!("invalid JSON ({}): {}", e, preview))
    })?;

    let Value::Object(entries) = value else {
        return Err(DecisionError::Malformed(format!(
            "expected an object, got {}",
            json_type(&value)
        )));
    };

    entries
        .iter()
        .map(|(instrument, entry)| match entry {
            Value::Object(object) => Ok((instrument.clone(), Decision::from_object(object))),
            other => Err(DecisionError::Malformed(format!(
                "decision for {} is {}, expected an object",
                instrument,
                json_type(other)
            ))),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_object() {
        let decisions = parse_decisions(
            r#"{"BTC": {"signal": "buy_to_enter", "quantity": 0.1, "leverage": 2}}"#,
        )
        .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].0, "BTC");
        assert_eq!(decisions[0].1.signal, "buy_to_enter");
        assert_eq!(decisions[0].1.quantity, Some(Value::from(0.1)));
    }

    #[test]
    fn test_parse_keeps_response_order() {
        let decisions = parse_decisions(
            r#"{"SOL": {"signal": "hold"}, "BTC": {"signal": "hold"}, "ETH": {"signal": "hold"}}"#,
        )
        .unwrap();
        let order: Vec<&str> = decisions.iter().map(|(i, _)| i.as_str()).collect();
        assert_eq!(order, vec!["SOL", "BTC", "ETH"]);
    }

    #[test]
    fn test_parse_strips_json_fence() {
        let response = "Here you go:\n```json\n{\"ETH\": {\"signal\": \"HOLD\"}}\n```\nGood luck";
        let decisions = parse_decisions(response).unwrap();
        assert_eq!(decisions[0].1.signal, "hold");
    }

    #[test]
    fn test_parse_strips_bare_fence() {
        let response = "```\n{\"ETH\": {\"signal\": \"close_position\"}}\n```";
        let decisions = parse_decisions(response).unwrap();
        assert_eq!(decisions[0].1.signal, "close_position");
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = parse_decisions("I think you should buy BTC").unwrap_err();
        assert!(matches!(err, DecisionError::Malformed(_)));
    }

    #[test]
    fn test_top_level_array_is_malformed() {
        let err = parse_decisions(r#"[{"signal": "hold"}]"#).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_non_object_value_is_malformed() {
        let err = parse_decisions(r#"{"BTC": {"signal": "hold"}, "ETH": "hold"}"#).unwrap_err();
        assert!(err.to_string().contains("ETH"));
    }

    #[test]
    fn test_optional_fields() {
        let decisions = parse_decisions(
            r#"{"BTC": {"signal": "sell_to_enter", "quantity": "0.5", "leverage": 3,
                "profit_target": 45000.0, "stop_loss": 52000, "confidence": 0.8,
                "justification": "overbought"}}"#,
        )
        .unwrap();
        let decision = &decisions[0].1;
        assert_eq!(decision.quantity, Some(Value::from("0.5")));
        assert_eq!(decision.profit_target, Some(45000.0));
        assert_eq!(decision.stop_loss, Some(52000.0));
        assert_eq!(decision.confidence, Some(0.8));
        assert_eq!(decision.justification.as_deref(), Some("overbought"));
    }

    #[test]
    fn test_missing_signal_is_empty() {
        let decisions = parse_decisions(r#"{"BTC": {"quantity": 1}}"#).unwrap();
        assert_eq!(decisions[0].1.signal, "");
    }
}
