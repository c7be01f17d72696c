use serde_json::Value;

use super::FormatHandler;
use crate::errors::DecodeError;
use crate::partial_json::{ParseState, parse_partial_json};
use crate::schema::{ELEMENTS_FIELD, OutputSchema};

/// Decodes `{ "elements": [...] }` into the bare array.
///
/// While parsing is only repaired, a trailing element that is still an empty
/// object is held back: it has started but carries nothing yet.
pub struct ArrayFormat {
    schema: OutputSchema,
    last: Option<Vec<Value>>,
}

impl ArrayFormat {
    pub fn new(schema: OutputSchema) -> Self {
        Self { schema, last: None }
    }

    fn elements(text: &str) -> Option<(Vec<Value>, ParseState)> {
        let parsed = parse_partial_json(text);
        if !parsed.is_usable() {
            return None;
        }
        match parsed.value? {
            Value::Object(mut wrapper) => match wrapper.remove(ELEMENTS_FIELD) {
                Some(Value::Array(elements)) => Some((elements, parsed.state)),
                _ => None,
            },
            _ => None,
        }
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.is_empty())
}

impl FormatHandler for ArrayFormat {
    fn process_partial(&mut self, text: &str) -> Option<Value> {
        let (mut elements, state) = Self::elements(text)?;
        if state != ParseState::SuccessfulParse && elements.last().is_some_and(is_empty_object) {
            elements.pop();
        }
        if self.last.as_ref() == Some(&elements) {
            return None;
        }
        self.last = Some(elements.clone());
        Some(Value::Array(elements))
    }

    fn finalize(&self, text: &str) -> Result<Value, DecodeError> {
        let Some(elements) = &self.last else {
            return Err(DecodeError::no_object(
                "no array elements were generated",
                text,
            ));
        };
        let value = Value::Array(elements.clone());
        self.schema.validate(&value)?;
        Ok(value)
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn format() -> ArrayFormat {
        ArrayFormat::new(OutputSchema::new(json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        })))
    }

    #[test]
    fn empty_trailing_object_is_held_back_until_filled() {
        let mut format = format();
        assert_eq!(format.process_partial("{\"elements\":["), Some(json!([])));
        assert_eq!(format.process_partial("{\"elements\":[{"), None);
        assert_eq!(format.process_partial("{\"elements\":[{\"na"), None);
        assert_eq!(
            format.process_partial("{\"elements\":[{\"name\":\"A"),
            Some(json!([{"name": "A"}]))
        );
        assert_eq!(
            format.process_partial("{\"elements\":[{\"name\":\"A\"},{"),
            None
        );
        assert_eq!(
            format.process_partial("{\"elements\":[{\"name\":\"A\"},{\"name\":\"B\"}]}"),
            Some(json!([{"name": "A"}, {"name": "B"}]))
        );
    }

    #[test]
    fn complete_parse_keeps_empty_object() {
        let mut format = ArrayFormat::new(OutputSchema::new(json!({"type": "array", "items": {}})));
        assert_eq!(
            format.process_partial("{\"elements\":[{}]}"),
            Some(json!([{}]))
        );
    }

    #[test]
    fn text_without_wrapper_is_ignored() {
        let mut format = format();
        assert_eq!(format.process_partial("[{\"name\":\"A\"}]"), None);
        assert_eq!(format.process_partial("{\"items\":[]}"), None);
        assert!(matches!(
            format.finalize("[{\"name\":\"A\"}]"),
            Err(DecodeError::NoObjectGenerated { .. })
        ));
    }

    #[test]
    fn final_elements_are_validated() {
        let mut format = format();
        format.process_partial("{\"elements\":[{\"name\":1}]}");
        assert!(matches!(
            format.finalize("{\"elements\":[{\"name\":1}]}"),
            Err(DecodeError::SchemaMismatch { .. })
        ));
    }
}
