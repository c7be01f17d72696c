//! Incremental structured decoding of the generated text.
//!
//! A `FormatHandler` sees the whole accumulated text on every fragment and
//! decides whether a new partial value should be surfaced. At the end of the
//! stream it validates strictly. `StructuredDecoder` is the pipeline stage that
//! feeds text-delta chunks to the handler and injects `object`,
//! `object-result` and decode `error` chunks.

mod array;
mod enumeration;
mod object;

pub use array::ArrayFormat;
pub use enumeration::EnumFormat;
pub use object::ObjectFormat;

use serde_json::Value;
use tracing::{debug, warn};

use crate::chunk::{Chunk, ChunkPayload};
use crate::errors::{DecodeError, RunFailure};
use crate::schema::{OutputSchema, OutputShape};

/// Shape-specific decoding strategy.
pub trait FormatHandler: Send + Sync {
    /// Returns the value to emit for `text`, or `None` when nothing materially
    /// changed since the last emission.
    fn process_partial(&mut self, text: &str) -> Option<Value>;

    /// Strictly decodes and validates the final value.
    fn finalize(&self, text: &str) -> Result<Value, DecodeError>;

    /// Forgets everything emitted so far.
    fn reset(&mut self);
}

/// Picks the handler matching the schema's shape.
pub fn handler_for(schema: &OutputSchema) -> Box<dyn FormatHandler> {
    match schema.shape() {
        OutputShape::Object => Box::new(ObjectFormat::new(schema.clone())),
        OutputShape::Array => Box::new(ArrayFormat::new(schema.clone())),
        OutputShape::Enum(values) => Box::new(EnumFormat::new(values)),
    }
}

/// Removes a surrounding Markdown code fence, including a still-open one.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim_start();
    let Some(fenced) = trimmed.strip_prefix("```") else {
        return text;
    };
    let Some(newline) = fenced.find('\n') else {
        // Still inside the info string (```json).
        return "";
    };
    let body = &fenced[newline + 1..];
    match body.trim_end().strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => body,
    }
}

/// Pipeline stage decoding structured output from text deltas.
pub(crate) struct StructuredDecoder {
    handler: Box<dyn FormatHandler>,
    text: String,
}

impl StructuredDecoder {
    pub(crate) fn new(schema: &OutputSchema) -> Self {
        Self {
            handler: handler_for(schema),
            text: String::new(),
        }
    }

    /// Returns `chunk` followed or preceded by any chunks the decoder derives.
    pub(crate) fn decode(&mut self, chunk: Chunk) -> Vec<Chunk> {
        match &chunk.payload {
            ChunkPayload::StepStart { .. } => {
                self.text.clear();
                self.handler.reset();
                vec![chunk]
            }
            ChunkPayload::TextDelta { text, .. } => {
                self.text.push_str(text);
                match self.handler.process_partial(strip_code_fence(&self.text)) {
                    Some(object) => {
                        let derived = chunk.sibling(ChunkPayload::Object { object });
                        vec![chunk, derived]
                    }
                    None => vec![chunk],
                }
            }
            ChunkPayload::Finish(_) => {
                let derived = match self.handler.finalize(strip_code_fence(&self.text)) {
                    Ok(object) => {
                        debug!(run_id = %chunk.run_id, "structured output validated");
                        ChunkPayload::ObjectResult { object }
                    }
                    Err(err) => {
                        warn!(run_id = %chunk.run_id, error = %err, "structured output rejected");
                        ChunkPayload::Error {
                            error: RunFailure::Decode(err),
                        }
                    }
                };
                vec![chunk.sibling(derived), chunk]
            }
            _ => vec![chunk],
        }
    }
}
