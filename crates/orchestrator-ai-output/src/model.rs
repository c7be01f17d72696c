use std::fmt;

use crate::schema::OutputSchema;

/// Stable identifier for the provider that produced a run (for example `openai`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Model that produced the streamed output.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelRef {
    /// Provider that owns the model.
    pub provider: ProviderId,
    /// Provider-specific model name (for example `gpt-5-nano`).
    pub model: String,
}

impl ModelRef {
    /// Creates a model reference.
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Per-run options for a `ModelOutput`.
#[derive(Clone, Debug)]
pub struct OutputOptions {
    /// Run identifier stamped on synthesized chunks and used in diagnostics.
    pub run_id: String,
    /// Model that produced the stream, when known.
    pub model: Option<ModelRef>,
    /// Conversation thread the run belongs to.
    pub thread_id: Option<String>,
    /// Resource (user, tenant, ...) the run belongs to.
    pub resource_id: Option<String>,
    /// Keep `raw` provider frames in `full_stream`.
    pub include_raw_chunks: bool,
    /// Requested structured output, if any.
    pub structured_output: Option<OutputSchema>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            model: None,
            thread_id: None,
            resource_id: None,
            include_raw_chunks: false,
            structured_output: None,
        }
    }
}
