//! Chunk vocabulary shared by every stage of the output pipeline.
//!
//! A stage that does not handle a chunk kind forwards it unchanged. Stages may
//! enrich a payload (for example filling in a tool name) but never change the
//! kind of a chunk.

use serde_json::Value;

use crate::content::{
    FilePart, FinishReason, ResponseMetadata, SourcePart, ToolCallPart, ToolResultPart,
};
use crate::errors::RunFailure;
use crate::usage::UsageCounters;

/// Logical actor that produced a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChunkOrigin {
    /// A model turn.
    #[default]
    Agent,
    User,
    System,
    /// Outer workflow orchestration.
    Workflow,
    /// Multi-agent network orchestration.
    Network,
}

/// One typed event of the processed output stream.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub run_id: String,
    pub from: ChunkOrigin,
    #[serde(flatten)]
    pub payload: ChunkPayload,
}

/// Payload of `step-finish` and `finish` chunks.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFinishPayload {
    #[serde(default)]
    pub finish_reason: FinishReason,
    /// Usage reported for this step (or, on `finish`, for the still-open step).
    #[serde(default)]
    pub usage: UsageCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMetadata>,
    /// The model will continue the same message in the next step.
    #[serde(default)]
    pub is_continued: bool,
}

/// Closed set of chunk kinds.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
#[non_exhaustive]
pub enum ChunkPayload {
    Start,
    StepStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default)]
        request: Value,
        #[serde(default)]
        warnings: Vec<Value>,
    },
    ResponseMetadata(ResponseMetadata),
    TextStart {
        id: String,
    },
    TextDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        text: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    ReasoningDelta {
        id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    ReasoningEnd {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider_metadata: Option<Value>,
    },
    Source(SourcePart),
    File(FilePart),
    /// First sign of a tool call whose arguments are being streamed.
    ToolCallInputStreamingStart {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        dynamic: bool,
    },
    ToolCallDelta {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        args_text_delta: String,
    },
    ToolCallInputStreamingEnd {
        tool_call_id: String,
    },
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: Value,
        #[serde(default)]
        dynamic: bool,
    },
    StepFinish(StepFinishPayload),
    Finish(StepFinishPayload),
    Error {
        error: RunFailure,
    },
    /// Partial structured value decoded so far.
    Object {
        object: Value,
    },
    /// Final structured value after validation.
    ObjectResult {
        object: Value,
    },
    /// An output processor blocked the content.
    Tripwire {
        reason: String,
    },
    Abort,
    /// Untranslated provider frame.
    Raw {
        raw: Value,
    },
}

impl ChunkPayload {
    /// Wire tag of the payload (`text-delta`, `finish`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StepStart { .. } => "step-start",
            Self::ResponseMetadata(_) => "response-metadata",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::Source(_) => "source",
            Self::File(_) => "file",
            Self::ToolCallInputStreamingStart { .. } => "tool-call-input-streaming-start",
            Self::ToolCallDelta { .. } => "tool-call-delta",
            Self::ToolCallInputStreamingEnd { .. } => "tool-call-input-streaming-end",
            Self::ToolCall(_) => "tool-call",
            Self::ToolResult(_) => "tool-result",
            Self::ToolError { .. } => "tool-error",
            Self::StepFinish(_) => "step-finish",
            Self::Finish(_) => "finish",
            Self::Error { .. } => "error",
            Self::Object { .. } => "object",
            Self::ObjectResult { .. } => "object-result",
            Self::Tripwire { .. } => "tripwire",
            Self::Abort => "abort",
            Self::Raw { .. } => "raw",
        }
    }
}

impl Chunk {
    /// Creates a chunk produced by a model turn.
    pub fn new(run_id: impl Into<String>, payload: ChunkPayload) -> Self {
        Self {
            run_id: run_id.into(),
            from: ChunkOrigin::Agent,
            payload,
        }
    }

    /// Replaces the origin.
    pub fn from_origin(mut self, from: ChunkOrigin) -> Self {
        self.from = from;
        self
    }

    /// Wire tag of the payload.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Creates a chunk that shares this chunk's run id and origin.
    pub(crate) fn sibling(&self, payload: ChunkPayload) -> Self {
        Self {
            run_id: self.run_id.clone(),
            from: self.from,
            payload,
        }
    }

    pub fn text_delta(run_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            run_id,
            ChunkPayload::TextDelta {
                id: None,
                text: text.into(),
            },
        )
    }

    pub fn step_start(run_id: impl Into<String>) -> Self {
        Self::new(
            run_id,
            ChunkPayload::StepStart {
                message_id: None,
                request: Value::Null,
                warnings: Vec::new(),
            },
        )
    }

    pub fn step_finish(
        run_id: impl Into<String>,
        finish_reason: FinishReason,
        usage: UsageCounters,
    ) -> Self {
        Self::new(
            run_id,
            ChunkPayload::StepFinish(StepFinishPayload {
                finish_reason,
                usage,
                ..Default::default()
            }),
        )
    }

    pub fn finish(
        run_id: impl Into<String>,
        finish_reason: FinishReason,
        usage: UsageCounters,
    ) -> Self {
        Self::new(
            run_id,
            ChunkPayload::Finish(StepFinishPayload {
                finish_reason,
                usage,
                ..Default::default()
            }),
        )
    }

    pub fn error(run_id: impl Into<String>, error: RunFailure) -> Self {
        Self::new(run_id, ChunkPayload::Error { error })
    }

    /// Ends the run successfully or with a failure.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            ChunkPayload::Finish(_)
                | ChunkPayload::Tripwire { .. }
                | ChunkPayload::Abort
        ) || matches!(&self.payload, ChunkPayload::Error { error } if !error.is_decode())
    }
}
