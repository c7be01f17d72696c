use std::fmt;

use crate::model::ModelRef;

/// Run identity attached to failures raised from side-effect hooks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureContext {
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_id={}", self.run_id)?;
        if let Some(model) = &self.model {
            write!(f, ", provider={}, model={}", model.provider, model.model)?;
        }
        if let Some(thread_id) = &self.thread_id {
            write!(f, ", thread_id={thread_id}")?;
        }
        if let Some(resource_id) = &self.resource_id {
            write!(f, ", resource_id={resource_id}")?;
        }
        Ok(())
    }
}

/// Structured output could not be produced from the generated text.
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DecodeError {
    /// Nothing parseable was generated.
    #[error("no object generated: {reason}")]
    NoObjectGenerated { reason: String, text: String },
    /// A value was parsed but does not satisfy the requested schema.
    #[error("object does not match schema: {}", .errors.join("; "))]
    SchemaMismatch { errors: Vec<String> },
    /// Enum output outside of the declared values.
    #[error("enum value {value} is not one of [{}]", .allowed.join(", "))]
    InvalidEnumValue {
        value: serde_json::Value,
        allowed: Vec<String>,
    },
}

impl DecodeError {
    pub(crate) fn no_object(reason: impl Into<String>, text: impl Into<String>) -> Self {
        Self::NoObjectGenerated {
            reason: reason.into(),
            text: text.into(),
        }
    }
}

/// Terminal failure carried by `error` chunks and by rejected deferred results.
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "kind",
    content = "detail",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RunFailure {
    /// The upstream producer reported a failure.
    #[error("provider failure: {message}")]
    Provider { message: String },
    /// Structured output failed final decoding or validation.
    #[error(transparent)]
    Decode(DecodeError),
    /// A side-effect hook failed.
    #[error("{hook} failed ({context}): {message}")]
    Hook {
        hook: String,
        context: FailureContext,
        message: String,
    },
    /// An output processor failed (not a tripwire).
    #[error("output processor {processor} failed: {message}")]
    Processor { processor: String, message: String },
    /// The stream ended before the named result could be resolved.
    #[error("stream terminated unexpectedly before {result} was resolved")]
    Terminated { result: String },
    /// The run was cancelled through its abort handle.
    #[error("run cancelled")]
    Cancelled,
    /// The chunk sequence violated an ordering invariant.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl RunFailure {
    /// Creates a provider failure.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub(crate) fn terminated(result: &str) -> Self {
        Self::Terminated {
            result: result.to_string(),
        }
    }

    /// Decode failures only invalidate the structured result, never the run.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<DecodeError> for RunFailure {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Errors returned by output processors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    /// Block the content and end the stream without failing the run.
    #[error("aborted by output processor: {reason}")]
    Abort { reason: String },
    /// The processor itself failed.
    #[error("{message}")]
    Failed { message: String },
}

impl ProcessorError {
    /// Creates a tripwire abort.
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort {
            reason: reason.into(),
        }
    }

    /// Creates a processor failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Error type returned by callbacks.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for the public output API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    /// Invalid output configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid builder input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The awaited result was rejected.
    #[error(transparent)]
    RunFailed(RunFailure),
    /// The structured result could not be converted into the requested type.
    #[error("deserialize error: {0}")]
    Deserialize(String),
}

impl From<RunFailure> for OutputError {
    fn from(value: RunFailure) -> Self {
        OutputError::RunFailed(value)
    }
}

impl From<DecodeError> for OutputError {
    fn from(value: DecodeError) -> Self {
        OutputError::RunFailed(RunFailure::Decode(value))
    }
}
