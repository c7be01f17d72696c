use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::content::{
    FilePart, FinishReason, OutputMessage, ReasoningPart, ResponseMetadata, SourcePart,
    ToolCallPart, ToolResultPart,
};
use crate::errors::HookError;
use crate::model::OutputOptions;
use crate::step::StepResult;
use crate::usage::{TOTAL_TOKENS, UsageCounters};

/// Consolidated run outcome handed to `OutputCallbacks::on_finish`.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishResult {
    pub text: String,
    pub reasoning: Vec<ReasoningPart>,
    pub reasoning_text: Option<String>,
    pub finish_reason: FinishReason,
    /// Run-level usage with the derived total.
    pub usage: UsageCounters,
    pub steps: Vec<StepResult>,
    pub tool_calls: Vec<ToolCallPart>,
    pub tool_results: Vec<ToolResultPart>,
    pub static_tool_calls: Vec<ToolCallPart>,
    pub dynamic_tool_calls: Vec<ToolCallPart>,
    pub static_tool_results: Vec<ToolResultPart>,
    pub dynamic_tool_results: Vec<ToolResultPart>,
    pub sources: Vec<SourcePart>,
    pub files: Vec<FilePart>,
    pub warnings: Vec<Value>,
    pub request: Value,
    pub response: ResponseMetadata,
    pub response_messages: Vec<OutputMessage>,
    pub provider_metadata: Option<Value>,
    pub object: Option<Value>,
}

/// Splits tool calls into statically declared and dynamic ones.
pub(crate) fn split_tool_calls(calls: &[ToolCallPart]) -> (Vec<ToolCallPart>, Vec<ToolCallPart>) {
    calls.iter().cloned().partition(|call| !call.dynamic)
}

pub(crate) fn split_tool_results(
    results: &[ToolResultPart],
) -> (Vec<ToolResultPart>, Vec<ToolResultPart>) {
    results.iter().cloned().partition(|result| !result.dynamic)
}

/// Side-effect hooks awaited by the aggregator.
///
/// An error returned from a hook becomes the run's failure, with the run
/// identity attached.
#[async_trait::async_trait]
pub trait OutputCallbacks: Send + Sync {
    async fn on_step_finish(&self, _step: &StepResult) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_finish(&self, _result: &FinishResult) -> Result<(), HookError> {
        Ok(())
    }
}

/// Receives flat telemetry attributes once a run finishes.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, run_id: &str, attributes: &BTreeMap<String, Value>);
}

pub(crate) fn telemetry_attributes(
    options: &OutputOptions,
    result: &FinishResult,
) -> BTreeMap<String, Value> {
    let mut attributes = BTreeMap::new();
    attributes.insert("ai.run.id".to_string(), json!(options.run_id));
    attributes.insert("ai.response.text".to_string(), json!(result.text));
    attributes.insert(
        "ai.response.finishReason".to_string(),
        json!(result.finish_reason),
    );
    if !result.tool_calls.is_empty() {
        attributes.insert(
            "ai.response.toolCalls".to_string(),
            json!(result.tool_calls),
        );
    }
    for (category, tokens) in result.usage.iter() {
        if category != TOTAL_TOKENS {
            attributes.insert(format!("ai.usage.{category}"), json!(tokens));
        }
    }
    attributes.insert(
        "ai.usage.totalTokens".to_string(),
        json!(result.usage.derived_total()),
    );
    if let Some(id) = &result.response.id {
        attributes.insert("ai.response.id".to_string(), json!(id));
    }
    let model_id = result
        .response
        .model_id
        .clone()
        .or_else(|| options.model.as_ref().map(|model| model.model.clone()));
    if let Some(model_id) = model_id {
        attributes.insert("ai.response.model".to_string(), json!(model_id));
    }
    if let Some(model) = &options.model {
        attributes.insert("ai.model.provider".to_string(), json!(model.provider));
    }
    if let Some(object) = &result.object {
        attributes.insert("ai.response.object".to_string(), object.clone());
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRef;

    fn call(id: &str, dynamic: bool) -> ToolCallPart {
        ToolCallPart {
            tool_call_id: id.into(),
            tool_name: "lookup".into(),
            args: json!({}),
            provider_executed: None,
            dynamic,
            provider_metadata: None,
        }
    }

    fn finish_result() -> FinishResult {
        FinishResult {
            text: "done".into(),
            reasoning: Vec::new(),
            reasoning_text: None,
            finish_reason: FinishReason::Stop,
            usage: UsageCounters::from_tokens(5, 7).with_derived_total(),
            steps: Vec::new(),
            tool_calls: vec![call("c1", false)],
            tool_results: Vec::new(),
            static_tool_calls: Vec::new(),
            dynamic_tool_calls: Vec::new(),
            static_tool_results: Vec::new(),
            dynamic_tool_results: Vec::new(),
            sources: Vec::new(),
            files: Vec::new(),
            warnings: Vec::new(),
            request: Value::Null,
            response: ResponseMetadata {
                id: Some("resp-1".into()),
                ..Default::default()
            },
            response_messages: Vec::new(),
            provider_metadata: None,
            object: None,
        }
    }

    #[test]
    fn splits_by_dynamic_flag() {
        let (fixed, dynamic) = split_tool_calls(&[call("a", false), call("b", true), call("c", false)]);
        assert_eq!(fixed.len(), 2);
        assert_eq!(dynamic[0].tool_call_id, "b");
    }

    #[test]
    fn telemetry_flattens_usage_and_identity() {
        let options = OutputOptions {
            run_id: "run-9".into(),
            model: Some(ModelRef::new("openai", "gpt-5-nano")),
            ..Default::default()
        };
        let attributes = telemetry_attributes(&options, &finish_result());
        assert_eq!(attributes["ai.run.id"], json!("run-9"));
        assert_eq!(attributes["ai.response.finishReason"], json!("stop"));
        assert_eq!(attributes["ai.usage.input_tokens"], json!(5));
        assert_eq!(attributes["ai.usage.totalTokens"], json!(12));
        assert_eq!(attributes["ai.response.id"], json!("resp-1"));
        assert_eq!(attributes["ai.response.model"], json!("gpt-5-nano"));
        assert!(attributes.contains_key("ai.response.toolCalls"));
        assert!(!attributes.contains_key("ai.usage.total_tokens"));
    }
}
