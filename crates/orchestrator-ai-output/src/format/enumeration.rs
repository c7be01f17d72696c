use serde_json::Value;

use super::FormatHandler;
use crate::errors::DecodeError;
use crate::partial_json::{parse_complete_json, parse_partial_json};
use crate::schema::RESULT_FIELD;

/// Decodes `{ "result": "<value>" }` against a fixed set of strings.
///
/// A partial value that prefixes exactly one allowed value commits to that
/// value early.
pub struct EnumFormat {
    values: Vec<String>,
    last: Option<String>,
}

impl EnumFormat {
    pub fn new(values: Vec<String>) -> Self {
        Self { values, last: None }
    }

    fn candidate<'a>(&'a self, partial: &'a str) -> &'a str {
        let mut matches = self.values.iter().filter(|v| v.starts_with(partial));
        match (matches.next(), matches.next()) {
            (Some(only), None) => only,
            _ => partial,
        }
    }
}

impl FormatHandler for EnumFormat {
    fn process_partial(&mut self, text: &str) -> Option<Value> {
        let parsed = parse_partial_json(text);
        if !parsed.is_usable() {
            return None;
        }
        let value = parsed.value?;
        let partial = value.get(RESULT_FIELD)?.as_str()?;
        if partial.is_empty() {
            return None;
        }
        let emitted = self.candidate(partial).to_string();
        if self.last.as_deref() == Some(emitted.as_str()) {
            return None;
        }
        self.last = Some(emitted.clone());
        Some(Value::String(emitted))
    }

    fn finalize(&self, text: &str) -> Result<Value, DecodeError> {
        let parsed = parse_complete_json(text).ok_or_else(|| {
            DecodeError::no_object("could not parse the response as JSON", text)
        })?;
        let Some(result) = parsed.get(RESULT_FIELD) else {
            return Err(DecodeError::no_object("response has no result field", text));
        };
        match result.as_str() {
            Some(value) if self.values.iter().any(|v| v == value) => Ok(result.clone()),
            _ => Err(DecodeError::InvalidEnumValue {
                value: result.clone(),
                allowed: self.values.clone(),
            }),
        }
    }

    fn reset(&mut self) {
        self.last = None;
    }
}
