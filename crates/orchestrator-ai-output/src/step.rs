use std::mem;

use serde_json::Value;

use crate::chunk::StepFinishPayload;
use crate::content::{
    FilePart, FinishReason, MessageContent, MessageRole, OutputMessage, ReasoningPart,
    ResponseMetadata, SourcePart, ToolCallPart, ToolResultPart,
};
use crate::usage::UsageCounters;

/// Position of a step within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    /// The first model turn.
    Initial,
    /// A turn that follows tool results.
    ToolResult,
}

/// Immutable record of one completed model turn.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_type: StepType,
    pub text: String,
    pub reasoning: Vec<ReasoningPart>,
    pub sources: Vec<SourcePart>,
    pub files: Vec<FilePart>,
    pub tool_calls: Vec<ToolCallPart>,
    pub tool_results: Vec<ToolResultPart>,
    pub finish_reason: FinishReason,
    pub usage: UsageCounters,
    pub warnings: Vec<Value>,
    #[serde(default)]
    pub request: Value,
    pub response: ResponseMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_metadata: Option<Value>,
    pub is_continued: bool,
}

impl StepResult {
    /// Reasoning text of every block, concatenated in order.
    pub fn reasoning_text(&self) -> Option<String> {
        reasoning_text(&self.reasoning)
    }

    /// Messages this step contributes to the response history.
    pub fn response_messages(&self) -> Vec<OutputMessage> {
        let mut content: Vec<MessageContent> = self
            .reasoning
            .iter()
            .cloned()
            .map(MessageContent::Reasoning)
            .collect();
        if !self.text.is_empty() {
            content.push(MessageContent::Text {
                text: self.text.clone(),
            });
        }
        content.extend(self.files.iter().cloned().map(MessageContent::File));
        content.extend(self.tool_calls.iter().cloned().map(MessageContent::ToolCall));

        let mut messages = Vec::new();
        if !content.is_empty() {
            messages.push(OutputMessage {
                role: MessageRole::Assistant,
                content,
            });
        }
        if !self.tool_results.is_empty() {
            messages.push(OutputMessage {
                role: MessageRole::Tool,
                content: self
                    .tool_results
                    .iter()
                    .cloned()
                    .map(MessageContent::ToolResult)
                    .collect(),
            });
        }
        messages
    }
}

pub(crate) fn reasoning_text(blocks: &[ReasoningPart]) -> Option<String> {
    if blocks.is_empty() {
        return None;
    }
    Some(blocks.iter().map(|block| block.text.as_str()).collect())
}

/// Reasoning blocks keyed by id, kept in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct ReasoningBlocks {
    blocks: Vec<ReasoningPart>,
}

impl ReasoningBlocks {
    fn block(&mut self, id: &str) -> &mut ReasoningPart {
        let index = match self.blocks.iter().position(|block| block.id == id) {
            Some(index) => index,
            None => {
                self.blocks.push(ReasoningPart {
                    id: id.to_string(),
                    ..Default::default()
                });
                self.blocks.len() - 1
            }
        };
        &mut self.blocks[index]
    }

    /// Opens a block, or updates its metadata if it is already known.
    pub(crate) fn start(&mut self, id: &str, metadata: Option<&Value>) {
        let block = self.block(id);
        if metadata.is_some() {
            block.provider_metadata = metadata.cloned();
        }
    }

    pub(crate) fn delta(&mut self, id: &str, text: &str, metadata: Option<&Value>) {
        let block = self.block(id);
        block.text.push_str(text);
        if metadata.is_some() {
            block.provider_metadata = metadata.cloned();
        }
    }

    pub(crate) fn parts(&self) -> &[ReasoningPart] {
        &self.blocks
    }

    fn take(&mut self) -> Vec<ReasoningPart> {
        mem::take(&mut self.blocks)
    }
}

/// Buffers scoped to the step currently being generated.
#[derive(Debug, Default)]
pub(crate) struct StepBuffer {
    pub(crate) open: bool,
    pub(crate) text: String,
    pub(crate) reasoning: ReasoningBlocks,
    pub(crate) sources: Vec<SourcePart>,
    pub(crate) files: Vec<FilePart>,
    pub(crate) tool_calls: Vec<ToolCallPart>,
    pub(crate) tool_results: Vec<ToolResultPart>,
    pub(crate) warnings: Vec<Value>,
    pub(crate) request: Value,
    pub(crate) response: ResponseMetadata,
}

impl StepBuffer {
    /// Snapshots the buffers into a step record and resets them.
    pub(crate) fn close(&mut self, step_type: StepType, finish: &StepFinishPayload) -> StepResult {
        let mut response = mem::take(&mut self.response);
        if let Some(reported) = &finish.response {
            response.merge(reported);
        }
        let step = StepResult {
            step_type,
            text: mem::take(&mut self.text),
            reasoning: self.reasoning.take(),
            sources: mem::take(&mut self.sources),
            files: mem::take(&mut self.files),
            tool_calls: mem::take(&mut self.tool_calls),
            tool_results: mem::take(&mut self.tool_results),
            finish_reason: finish.finish_reason,
            usage: finish.usage.clone(),
            warnings: mem::take(&mut self.warnings),
            request: mem::take(&mut self.request),
            response,
            provider_metadata: finish.provider_metadata.clone(),
            is_continued: finish.is_continued,
        };
        self.open = false;
        step
    }
}
