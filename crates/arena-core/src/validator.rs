//! Normalizes raw agent output into a [`Decision`].
//!
//! Accepts either structured JSON or free text. Text that is not valid JSON
//! gets exactly one extraction attempt: a fenced ```json block if present,
//! otherwise the span from the first `{` to the last `}`.
//!
//! Validation never retries and never substitutes a fallback itself; the
//! caller turns a [`ValidationError`] into [`Decision::fallback`].

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use thiserror::Error;

use arena_common::Action;

use crate::portfolio::AccountState;
use crate::types::{Decision, RawOutput};

/// Reasoning text kept per decision.
pub const MAX_REASONING_CHARS: usize = 2000;

/// Schema or semantic violation in agent output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unparsable output: {0}")]
    Unparsable(String),

    #[error("Expected a JSON object")]
    NotAnObject,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Field {0} is not numeric")]
    NotNumeric(&'static str),

    #[error("Field {field}={value} outside [0, 1]")]
    OutOfRange { field: &'static str, value: Decimal },

    #[error("Invalid protective levels: {0}")]
    InvalidLevels(String),
}

/// Stateless decision validator.
#[derive(Debug, Clone, Default)]
pub struct DecisionValidator;

impl DecisionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `raw` for a participant whose account is `account`.
    pub fn validate(
        &self,
        raw: &RawOutput,
        account: &AccountState,
    ) -> Result<Decision, ValidationError> {
        let parsed;
        let value = match raw {
            RawOutput::Json(v) => v,
            RawOutput::Text(text) => {
                parsed = parse_text(text)?;
                &parsed
            }
        };
        let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;
        normalize(obj, account)
    }
}

fn parse_text(text: &str) -> Result<Value, ValidationError> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }
    let block = extract_block(text)
        .ok_or_else(|| ValidationError::Unparsable("no JSON object found".to_string()))?;
    serde_json::from_str(block).map_err(|e| ValidationError::Unparsable(e.to_string()))
}

/// Locate an embedded JSON object in free text.
pub fn extract_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn normalize(obj: &Map<String, Value>, account: &AccountState) -> Result<Decision, ValidationError> {
    let action = match obj.get("action") {
        Some(Value::String(s)) => {
            Action::from_str(s).map_err(|_| ValidationError::InvalidAction(s.clone()))?
        }
        Some(other) => return Err(ValidationError::InvalidAction(other.to_string())),
        None => return Err(ValidationError::MissingField("action")),
    };

    let confidence =
        decimal_field(obj, "confidence")?.ok_or(ValidationError::MissingField("confidence"))?;
    check_unit_range("confidence", confidence)?;

    let position_size = match (action, decimal_field(obj, "position_size")?) {
        (Action::Hold, _) => Decimal::ZERO,
        (Action::Buy, None) => return Err(ValidationError::MissingField("position_size")),
        (Action::Sell, None) => Decimal::ZERO,
        (_, Some(size)) => {
            check_unit_range("position_size", size)?;
            size
        }
    };

    let stop_loss = decimal_field(obj, "stop_loss")?;
    let take_profit = decimal_field(obj, "take_profit")?;
    for (name, level) in [("stop_loss", stop_loss), ("take_profit", take_profit)] {
        if let Some(level) = level
            && level <= Decimal::ZERO
        {
            return Err(ValidationError::InvalidLevels(format!("{name} must be positive")));
        }
    }
    if action == Action::Buy {
        if let (Some(sl), Some(tp)) = (stop_loss, take_profit)
            && sl >= tp
        {
            return Err(ValidationError::InvalidLevels(format!(
                "stop_loss {sl} must be below take_profit {tp}"
            )));
        }
        if let Some(sl) = stop_loss
            && account.mark_price > Decimal::ZERO
            && sl >= account.mark_price
        {
            return Err(ValidationError::InvalidLevels(format!(
                "stop_loss {sl} must be below current price {}",
                account.mark_price
            )));
        }
    }

    let reasoning = match obj.get("reasoning") {
        Some(Value::String(s)) => s.chars().take(MAX_REASONING_CHARS).collect(),
        _ => String::new(),
    };

    Ok(Decision {
        action,
        confidence,
        position_size,
        stop_loss,
        take_profit,
        reasoning,
        fallback_reason: None,
    })
}

/// Read an optional numeric field. Accepts JSON numbers and numeric strings.
fn decimal_field(
    obj: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<Decimal>, ValidationError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => parse_decimal(&n.to_string())
            .map(Some)
            .ok_or(ValidationError::NotNumeric(name)),
        Some(Value::String(s)) => parse_decimal(s.trim())
            .map(Some)
            .ok_or(ValidationError::NotNumeric(name)),
        Some(_) => Err(ValidationError::NotNumeric(name)),
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

fn check_unit_range(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(())
}
