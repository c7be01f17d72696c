//! Consumer views: stateless filters over a fresh tee branch.

use futures::StreamExt as _;
use futures::future;
use futures::stream::{self, BoxStream};
use serde_json::Value;

use super::ModelOutput;
use crate::chunk::{Chunk, ChunkPayload};
use crate::schema::OutputShape;

/// Tracks which array elements have settled, so each is surfaced once.
///
/// An element settles when a later element has started or when the final
/// validated array arrives.
#[derive(Default)]
struct SettledElements {
    surfaced: usize,
}

impl SettledElements {
    fn advance<'a>(&mut self, elements: &'a [Value], complete: bool) -> &'a [Value] {
        let settled = if complete {
            elements.len()
        } else {
            elements.len().saturating_sub(1)
        };
        if settled <= self.surfaced {
            return &[];
        }
        let start = self.surfaced;
        self.surfaced = settled;
        &elements[start..settled]
    }
}

fn array_snapshot(chunk: &Chunk) -> Option<(&[Value], bool)> {
    match &chunk.payload {
        ChunkPayload::Object {
            object: Value::Array(elements),
        } => Some((elements, false)),
        ChunkPayload::ObjectResult {
            object: Value::Array(elements),
        } => Some((elements, true)),
        _ => None,
    }
}

/// Structured decoding restarts with every step, so view state does too.
fn starts_step(chunk: &Chunk) -> bool {
    matches!(chunk.payload, ChunkPayload::StepStart { .. })
}

/// Renders array output as JSON text: `[`, settled elements, then `]`.
#[derive(Default)]
struct ArrayText {
    opened: bool,
    elements: SettledElements,
}

impl ArrayText {
    fn render(&mut self, chunk: &Chunk) -> Option<String> {
        if starts_step(chunk) {
            *self = Self::default();
            return None;
        }
        let (elements, complete) = array_snapshot(chunk)?;
        let mut out = String::new();
        if !self.opened {
            self.opened = true;
            out.push('[');
        }
        let first = self.elements.surfaced;
        for (offset, element) in self.elements.advance(elements, complete).iter().enumerate() {
            if first + offset > 0 {
                out.push(',');
            }
            out.push_str(&element.to_string());
        }
        if complete {
            out.push(']');
        }
        (!out.is_empty()).then_some(out)
    }
}

impl ModelOutput {
    /// Canonical event stream. `raw` frames are dropped unless requested.
    pub fn full_stream(&self) -> BoxStream<'static, Chunk> {
        let include_raw = self.core.options.include_raw_chunks;
        self.tee
            .branch()
            .filter(move |chunk| {
                future::ready(include_raw || !matches!(chunk.payload, ChunkPayload::Raw { .. }))
            })
            .boxed()
    }

    /// Every chunk, including `raw` provider frames.
    pub fn raw_stream(&self) -> BoxStream<'static, Chunk> {
        self.tee.branch()
    }

    /// Text deltas, or incremental JSON text when array output was requested.
    pub fn text_stream(&self) -> BoxStream<'static, String> {
        let branch = self.full_stream();
        if self.shape() == Some(OutputShape::Array) {
            return branch
                .scan(ArrayText::default(), |text, chunk| {
                    future::ready(Some(text.render(&chunk)))
                })
                .filter_map(future::ready)
                .boxed();
        }
        branch
            .filter_map(|chunk| {
                future::ready(match chunk.payload {
                    ChunkPayload::TextDelta { text, .. } => Some(text),
                    _ => None,
                })
            })
            .boxed()
    }

    /// Partial structured values as they are decoded.
    pub fn object_stream(&self) -> BoxStream<'static, Value> {
        self.full_stream()
            .filter_map(|chunk| {
                future::ready(match chunk.payload {
                    ChunkPayload::Object { object } => Some(object),
                    _ => None,
                })
            })
            .boxed()
    }

    /// Array elements, each surfaced once after it has settled.
    pub fn element_stream(&self) -> BoxStream<'static, Value> {
        self.full_stream()
            .scan(SettledElements::default(), |settled, chunk| {
                if starts_step(&chunk) {
                    *settled = SettledElements::default();
                }
                let fresh = array_snapshot(&chunk)
                    .map(|(elements, complete)| settled.advance(elements, complete).to_vec())
                    .unwrap_or_default();
                future::ready(Some(stream::iter(fresh)))
            })
            .flatten()
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settled_elements_exclude_the_growing_tail() {
        let mut settled = SettledElements::default();
        assert!(settled.advance(&[json!({"a": "x"})], false).is_empty());
        assert_eq!(
            settled.advance(&[json!({"a": "xy"}), json!({})], false),
            &[json!({"a": "xy"})]
        );
        assert_eq!(
            settled.advance(&[json!({"a": "xy"}), json!({"b": 1})], true),
            &[json!({"b": 1})]
        );
        assert!(settled.advance(&[json!({"a": "xy"}), json!({"b": 1})], true).is_empty());
    }

    #[test]
    fn array_text_concatenates_to_the_final_json() {
        let mut text = ArrayText::default();
        let snapshots = [
            Chunk::new("r", ChunkPayload::Object { object: json!([]) }),
            Chunk::new("r", ChunkPayload::Object { object: json!([{"n": 1}]) }),
            Chunk::new("r", ChunkPayload::Object { object: json!([{"n": 1}, {"n": 2}]) }),
            Chunk::new("r", ChunkPayload::ObjectResult { object: json!([{"n": 1}, {"n": 2}]) }),
        ];
        let rendered: Vec<String> = snapshots.iter().filter_map(|c| text.render(c)).collect();
        assert_eq!(rendered, ["[", "{\"n\":1}", ",{\"n\":2}]"]);
        assert_eq!(rendered.concat(), json!([{"n": 1}, {"n": 2}]).to_string());
    }

    #[test]
    fn array_text_restarts_with_each_step() {
        let mut text = ArrayText::default();
        let chunks = [
            Chunk::new("r", ChunkPayload::Object { object: json!([{"a": 1}, {"a": 2}]) }),
            Chunk::step_start("r"),
            Chunk::new("r", ChunkPayload::Object { object: json!([{"b": 1}]) }),
            Chunk::new("r", ChunkPayload::ObjectResult { object: json!([{"b": 1}]) }),
        ];
        let rendered: Vec<String> = chunks.iter().filter_map(|c| text.render(c)).collect();
        assert_eq!(rendered, ["[{\"a\":1}", "[", "{\"b\":1}]"]);
    }
}
