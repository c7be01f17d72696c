use serde_json::Value;

use super::FormatHandler;
use crate::errors::DecodeError;
use crate::partial_json::{parse_complete_json, parse_partial_json};
use crate::schema::OutputSchema;

/// Decodes a single JSON value, surfacing each structurally new snapshot.
pub struct ObjectFormat {
    schema: OutputSchema,
    last: Option<Value>,
}

impl ObjectFormat {
    pub fn new(schema: OutputSchema) -> Self {
        Self { schema, last: None }
    }
}

impl FormatHandler for ObjectFormat {
    fn process_partial(&mut self, text: &str) -> Option<Value> {
        let parsed = parse_partial_json(text);
        if !parsed.is_usable() {
            return None;
        }
        let value = parsed.value?;
        if self.last.as_ref() == Some(&value) {
            return None;
        }
        self.last = Some(value.clone());
        Some(value)
    }

    fn finalize(&self, text: &str) -> Result<Value, DecodeError> {
        let value = parse_complete_json(text).ok_or_else(|| {
            DecodeError::no_object("could not parse the response as JSON", text)
        })?;
        self.schema.validate(&value)?;
        Ok(value)
    }

    fn reset(&mut self) {
        self.last = None;
    }
}
