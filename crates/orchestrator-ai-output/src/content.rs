use serde_json::Value;

/// Why a step or run stopped generating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    /// Neutral reason, also used when an output processor trips the run.
    Other,
    #[default]
    Unknown,
}

/// A complete tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Parsed arguments. `Null` when the producer left them to be assembled from deltas.
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_executed: Option<bool>,
    /// Tool was not part of the statically declared tool set.
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
}

/// Outcome of a tool invocation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    pub result: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_executed: Option<bool>,
    #[serde(default)]
    pub dynamic: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Url,
    Document,
}

/// Citation surfaced by the model or a provider-side tool.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePart {
    pub id: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
}

/// Generated file. `data` is kept in the producer's encoding (usually base64).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    pub media_type: String,
    pub data: String,
}

/// One reasoning block. Models may interleave several per step.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningPart {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
}

/// Provider response metadata for a step or run.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<std::collections::BTreeMap<String, String>>,
}

impl ResponseMetadata {
    /// Overwrites fields that `other` carries, keeping the rest.
    pub(crate) fn merge(&mut self, other: &ResponseMetadata) {
        if other.id.is_some() {
            self.id.clone_from(&other.id);
        }
        if other.model_id.is_some() {
            self.model_id.clone_from(&other.model_id);
        }
        if other.timestamp.is_some() {
            self.timestamp = other.timestamp;
        }
        if other.headers.is_some() {
            self.headers.clone_from(&other.headers);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Assistant,
    Tool,
}

/// Content of a response message.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum MessageContent {
    Text { text: String },
    Reasoning(ReasoningPart),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    File(FilePart),
}

/// A message of the run's response history, assembled from its steps.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OutputMessage {
    pub role: MessageRole,
    pub content: Vec<MessageContent>,
}

impl OutputMessage {
    /// Concatenates all text parts in order and ignores the rest.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let MessageContent::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// Concatenated text of every assistant message.
pub(crate) fn assistant_text(messages: &[OutputMessage]) -> String {
    messages
        .iter()
        .filter(|message| message.role == MessageRole::Assistant)
        .map(OutputMessage::text)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_text_parts_only() {
        let message = OutputMessage {
            role: MessageRole::Assistant,
            content: vec![
                MessageContent::Text {
                    text: "hello".into(),
                },
                MessageContent::Reasoning(ReasoningPart {
                    id: "r1".into(),
                    text: "thinking".into(),
                    provider_metadata: None,
                }),
                MessageContent::Text {
                    text: " world".into(),
                },
            ],
        };
        assert_eq!(message.text(), "hello world");
    }

    #[test]
    fn assistant_text_skips_tool_messages() {
        let messages = vec![
            OutputMessage {
                role: MessageRole::Assistant,
                content: vec![MessageContent::Text { text: "a".into() }],
            },
            OutputMessage {
                role: MessageRole::Tool,
                content: vec![MessageContent::Text { text: "x".into() }],
            },
            OutputMessage {
                role: MessageRole::Assistant,
                content: vec![MessageContent::Text { text: "b".into() }],
            },
        ];
        assert_eq!(assistant_text(&messages), "ab");
    }

    #[test]
    fn response_metadata_merge_keeps_missing_fields() {
        let mut base = ResponseMetadata {
            id: Some("resp-1".into()),
            model_id: Some("m".into()),
            ..Default::default()
        };
        base.merge(&ResponseMetadata {
            id: Some("resp-2".into()),
            ..Default::default()
        });
        assert_eq!(base.id.as_deref(), Some("resp-2"));
        assert_eq!(base.model_id.as_deref(), Some("m"));
    }

    #[test]
    fn finish_reason_serializes_kebab_case() {
        let value = serde_json::to_value(FinishReason::ToolCalls).expect("serialize");
        assert_eq!(value, "tool-calls");
    }
}
