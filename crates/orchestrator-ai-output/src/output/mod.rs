//! `ModelOutput`: one processed stream, many readers, and the run's results.

mod pipeline;
mod state;
mod views;

pub use state::OutputStatus;

use std::sync::Arc;

use futures::{Stream, StreamExt as _};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::chunk::Chunk;
use crate::content::{
    FilePart, FinishReason, OutputMessage, ReasoningPart, ResponseMetadata, SourcePart,
    ToolCallPart, ToolResultPart,
};
use crate::deferred::DeferredResult;
use crate::errors::{OutputError, RunFailure};
use crate::hooks::{OutputCallbacks, TelemetrySink, split_tool_calls, split_tool_results};
use crate::model::{ModelRef, OutputOptions};
use crate::processor::{OutputProcessor, ProcessorChain};
use crate::schema::{OutputSchema, OutputShape};
use crate::step::StepResult;
use crate::tee::ChunkTee;
use crate::usage::UsageCounters;
use state::OutputCore;

/// Handle used to cancel a run.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The pipeline stops pulling the source, emits an `abort` chunk and
    /// rejects every pending result with `RunFailure::Cancelled`.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Every result of a run, collected by `ModelOutput::get_full_output`.
#[derive(Clone, Debug, PartialEq)]
pub struct FullOutput {
    pub text: String,
    pub reasoning: Vec<ReasoningPart>,
    pub reasoning_text: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: UsageCounters,
    pub steps: Vec<StepResult>,
    pub tool_calls: Vec<ToolCallPart>,
    pub tool_results: Vec<ToolResultPart>,
    pub sources: Vec<SourcePart>,
    pub files: Vec<FilePart>,
    pub warnings: Vec<Value>,
    pub request: Value,
    pub response: ResponseMetadata,
    pub response_messages: Vec<OutputMessage>,
    pub provider_metadata: Option<Value>,
    pub object: Option<Value>,
    pub status: OutputStatus,
    pub tripwire_reason: Option<String>,
}

/// Builder for a `ModelOutput`.
pub struct ModelOutputBuilder {
    source: crate::tee::ChunkStream,
    options: OutputOptions,
    callbacks: Option<Arc<dyn OutputCallbacks>>,
    processors: Vec<Arc<dyn OutputProcessor>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl ModelOutputBuilder {
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.options.run_id = run_id.into();
        self
    }

    pub fn model(mut self, model: ModelRef) -> Self {
        self.options.model = Some(model);
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.options.thread_id = Some(thread_id.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.options.resource_id = Some(resource_id.into());
        self
    }

    /// Decodes the generated text into structured output of this schema.
    pub fn structured_output(mut self, schema: OutputSchema) -> Self {
        self.options.structured_output = Some(schema);
        self
    }

    /// Keeps `raw` provider frames in `full_stream`.
    pub fn include_raw_chunks(mut self, include: bool) -> Self {
        self.options.include_raw_chunks = include;
        self
    }

    pub fn callbacks(mut self, callbacks: Arc<dyn OutputCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Appends an output processor. Processors run in registration order.
    pub fn output_processor(mut self, processor: Arc<dyn OutputProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn build(self) -> Result<ModelOutput, OutputError> {
        if self.options.run_id.trim().is_empty() {
            return Err(OutputError::Validation("run_id must not be empty".to_string()));
        }
        if let Some(schema) = &self.options.structured_output {
            match schema.shape() {
                OutputShape::Enum(values) if values.is_empty() => {
                    return Err(OutputError::Config(
                        "enum output requires at least one value".to_string(),
                    ));
                }
                OutputShape::Array if !schema.has_items() => {
                    return Err(OutputError::Config(
                        "array output requires an items schema".to_string(),
                    ));
                }
                _ => {}
            }
        }

        debug!(
            run_id = %self.options.run_id,
            structured = self.options.structured_output.is_some(),
            processors = self.processors.len(),
            "model output created"
        );
        let (abort_tx, abort_rx) = watch::channel(false);
        let core = Arc::new(OutputCore::new(
            self.options,
            self.callbacks,
            ProcessorChain::new(self.processors),
            self.telemetry,
        ));
        let processed = pipeline::processed_stream(core.clone(), self.source, abort_rx);
        Ok(ModelOutput {
            core,
            tee: Arc::new(ChunkTee::new(processed)),
            abort: AbortHandle { tx: abort_tx },
        })
    }
}

/// Aggregated, multiply-consumable output of one model run.
///
/// Stream accessors each return a fresh reader over the same processed
/// chunks. Result accessors drive the stream to completion if nobody else
/// does, then return the settled value.
pub struct ModelOutput {
    core: Arc<OutputCore>,
    tee: Arc<ChunkTee>,
    abort: AbortHandle,
}

impl ModelOutput {
    pub fn builder<S>(source: S) -> ModelOutputBuilder
    where
        S: Stream<Item = Chunk> + Send + 'static,
    {
        ModelOutputBuilder {
            source: source.boxed(),
            options: OutputOptions::default(),
            callbacks: None,
            processors: Vec::new(),
            telemetry: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.core.options.run_id
    }

    pub fn options(&self) -> &OutputOptions {
        &self.core.options
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn status(&self) -> OutputStatus {
        self.core.state().status
    }

    /// Terminal failure of the run, if any.
    pub fn error(&self) -> Option<RunFailure> {
        self.core.state().error.clone()
    }

    pub fn tripwire_reason(&self) -> Option<String> {
        self.core.state().tripwire_reason.clone()
    }

    fn shape(&self) -> Option<OutputShape> {
        self.core
            .options
            .structured_output
            .as_ref()
            .map(OutputSchema::shape)
    }

    /// Drains the processed stream unless it has already been drained.
    pub async fn consume_stream(&self) {
        if self.tee.is_finished() {
            return;
        }
        let mut branch = self.tee.branch();
        while branch.next().await.is_some() {}
    }

    async fn settled<T: Clone + Send + Sync>(
        &self,
        result: &DeferredResult<T>,
    ) -> Result<T, OutputError> {
        tokio::select! {
            biased;
            settled = result.wait() => Ok(settled?),
            () = self.consume_stream() => Ok(result.wait().await?),
        }
    }

    pub async fn finish_reason(&self) -> Result<FinishReason, OutputError> {
        self.settled(&self.core.promises.finish_reason).await
    }

    pub async fn text(&self) -> Result<String, OutputError> {
        self.settled(&self.core.promises.text).await
    }

    pub async fn reasoning(&self) -> Result<Vec<ReasoningPart>, OutputError> {
        self.settled(&self.core.promises.reasoning).await
    }

    pub async fn reasoning_text(&self) -> Result<Option<String>, OutputError> {
        self.settled(&self.core.promises.reasoning_text).await
    }

    /// Run-level usage: every step's counters summed, with the derived total.
    pub async fn usage(&self) -> Result<UsageCounters, OutputError> {
        self.settled(&self.core.promises.usage).await
    }

    pub async fn provider_metadata(&self) -> Result<Option<Value>, OutputError> {
        self.settled(&self.core.promises.provider_metadata).await
    }

    pub async fn request(&self) -> Result<Value, OutputError> {
        self.settled(&self.core.promises.request).await
    }

    pub async fn response(&self) -> Result<ResponseMetadata, OutputError> {
        self.settled(&self.core.promises.response).await
    }

    pub async fn warnings(&self) -> Result<Vec<Value>, OutputError> {
        self.settled(&self.core.promises.warnings).await
    }

    pub async fn tool_calls(&self) -> Result<Vec<ToolCallPart>, OutputError> {
        self.settled(&self.core.promises.tool_calls).await
    }

    pub async fn tool_results(&self) -> Result<Vec<ToolResultPart>, OutputError> {
        self.settled(&self.core.promises.tool_results).await
    }

    pub async fn static_tool_calls(&self) -> Result<Vec<ToolCallPart>, OutputError> {
        Ok(split_tool_calls(&self.tool_calls().await?).0)
    }

    pub async fn dynamic_tool_calls(&self) -> Result<Vec<ToolCallPart>, OutputError> {
        Ok(split_tool_calls(&self.tool_calls().await?).1)
    }

    pub async fn static_tool_results(&self) -> Result<Vec<ToolResultPart>, OutputError> {
        Ok(split_tool_results(&self.tool_results().await?).0)
    }

    pub async fn dynamic_tool_results(&self) -> Result<Vec<ToolResultPart>, OutputError> {
        Ok(split_tool_results(&self.tool_results().await?).1)
    }

    pub async fn sources(&self) -> Result<Vec<SourcePart>, OutputError> {
        self.settled(&self.core.promises.sources).await
    }

    pub async fn files(&self) -> Result<Vec<FilePart>, OutputError> {
        self.settled(&self.core.promises.files).await
    }

    pub async fn steps(&self) -> Result<Vec<StepResult>, OutputError> {
        self.settled(&self.core.promises.steps).await
    }

    pub async fn response_messages(&self) -> Result<Vec<OutputMessage>, OutputError> {
        self.settled(&self.core.promises.response_messages).await
    }

    /// Validated structured value. `None` when no structured output was requested.
    pub async fn object(&self) -> Result<Option<Value>, OutputError> {
        self.settled(&self.core.promises.object).await
    }

    /// Validated structured value deserialised into `T`.
    pub async fn object_as<T: DeserializeOwned>(&self) -> Result<T, OutputError> {
        let Some(object) = self.object().await? else {
            return Err(OutputError::Config(
                "no structured output was requested for this run".to_string(),
            ));
        };
        serde_json::from_value(object).map_err(|err| OutputError::Deserialize(err.to_string()))
    }

    /// Drives the stream until every result has settled, then collects them.
    pub async fn get_full_output(&self) -> Result<FullOutput, OutputError> {
        let promises = &self.core.promises;
        Ok(FullOutput {
            text: self.settled(&promises.text).await?,
            reasoning: self.settled(&promises.reasoning).await?,
            reasoning_text: self.settled(&promises.reasoning_text).await?,
            finish_reason: self.settled(&promises.finish_reason).await?,
            usage: self.settled(&promises.usage).await?,
            steps: self.settled(&promises.steps).await?,
            tool_calls: self.settled(&promises.tool_calls).await?,
            tool_results: self.settled(&promises.tool_results).await?,
            sources: self.settled(&promises.sources).await?,
            files: self.settled(&promises.files).await?,
            warnings: self.settled(&promises.warnings).await?,
            request: self.settled(&promises.request).await?,
            response: self.settled(&promises.response).await?,
            response_messages: self.settled(&promises.response_messages).await?,
            provider_metadata: self.settled(&promises.provider_metadata).await?,
            object: self.settled(&promises.object).await?,
            status: self.status(),
            tripwire_reason: self.tripwire_reason(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkPayload, StepFinishPayload};
    use crate::errors::{DecodeError, HookError, ProcessorError};
    use crate::hooks::FinishResult;
    use crate::processor::ProcessorAction;
    use crate::step::StepType;
    use futures::stream;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const RUN: &str = "run-1";

    fn output(chunks: Vec<Chunk>) -> ModelOutput {
        ModelOutput::builder(stream::iter(chunks))
            .run_id(RUN)
            .build()
            .expect("build")
    }

    fn text(t: &str) -> Chunk {
        Chunk::text_delta(RUN, t)
    }

    fn finish() -> Chunk {
        Chunk::finish(RUN, FinishReason::Stop, UsageCounters::from_tokens(3, 2))
    }

    fn tool_delta(id: &str, name: Option<&str>, delta: &str) -> Chunk {
        Chunk::new(
            RUN,
            ChunkPayload::ToolCallDelta {
                tool_call_id: id.into(),
                tool_name: name.map(Into::into),
                args_text_delta: delta.into(),
            },
        )
    }

    #[tokio::test]
    async fn hello_world_text_stream_and_text() {
        let output = output(vec![text("Hello "), text("world"), finish()]);
        let streamed: Vec<String> = output.text_stream().collect().await;
        assert_eq!(streamed, ["Hello ", "world"]);
        assert_eq!(output.text().await.expect("text"), "Hello world");
        assert_eq!(output.finish_reason().await.expect("reason"), FinishReason::Stop);
        assert_eq!(output.status(), OutputStatus::Success);
    }

    #[tokio::test]
    async fn results_resolve_without_reading_a_stream() {
        let output = output(vec![text("lazy"), finish()]);
        assert_eq!(output.text().await.expect("text"), "lazy");
        let steps = output.steps().await.expect("steps");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_type, StepType::Initial);
        assert_eq!(output.object().await.expect("object"), None);
    }

    #[tokio::test]
    async fn views_requested_at_different_times_agree() {
        let output = output(vec![text("a"), text("b"), text("c"), finish()]);
        let mut early = output.full_stream();
        let first = early.next().await.expect("first chunk");
        let late: Vec<Chunk> = output.full_stream().collect().await;
        let mut all = vec![first];
        all.extend(early.collect::<Vec<_>>().await);
        assert_eq!(all, late);
        assert_eq!(
            late.iter().map(Chunk::kind).collect::<Vec<_>>(),
            ["text-delta", "text-delta", "text-delta", "finish"]
        );
    }

    #[tokio::test]
    async fn termination_after_step_finish_rejects_pending_results() {
        let output = ModelOutput::builder(stream::iter(vec![
            Chunk::step_start(RUN),
            text("partial"),
            Chunk::step_finish(RUN, FinishReason::ToolCalls, UsageCounters::from_tokens(1, 1)),
        ]))
        .run_id(RUN)
        .structured_output(OutputSchema::any_object())
        .build()
        .expect("build");

        for (name, err) in [
            ("finish_reason", output.finish_reason().await.map(|_| ()).expect_err("rejected")),
            ("text", output.text().await.map(|_| ()).expect_err("rejected")),
            ("object", output.object().await.map(|_| ()).expect_err("rejected")),
        ] {
            assert_eq!(
                err,
                OutputError::RunFailed(RunFailure::Terminated {
                    result: name.to_string()
                })
            );
        }
        assert_eq!(output.status(), OutputStatus::Failed);
    }

    #[tokio::test]
    async fn usage_sums_steps_and_derives_total() {
        let output = output(vec![
            Chunk::step_start(RUN),
            text("calling"),
            Chunk::step_finish(
                RUN,
                FinishReason::ToolCalls,
                UsageCounters::from_tokens(10, 5).with("cached_input_tokens", 8),
            ),
            Chunk::step_start(RUN),
            text("done"),
            Chunk::step_finish(
                RUN,
                FinishReason::Stop,
                UsageCounters::from_tokens(20, 7).with("total_tokens", 999),
            ),
            Chunk::finish(RUN, FinishReason::Stop, UsageCounters::new()),
        ]);
        let usage = output.usage().await.expect("usage");
        assert_eq!(usage.input_tokens(), 30);
        assert_eq!(usage.output_tokens(), 12);
        assert_eq!(usage.cached_input_tokens(), 8);
        assert_eq!(usage.get("total_tokens"), Some(42));

        let steps = output.steps().await.expect("steps");
        assert_eq!(
            steps.iter().map(|s| s.step_type).collect::<Vec<_>>(),
            [StepType::Initial, StepType::ToolResult]
        );
        assert_eq!(steps[1].text, "done");
        assert_eq!(output.text().await.expect("text"), "callingdone");
    }

    #[tokio::test]
    async fn first_tool_delta_synthesizes_streaming_start() {
        let output = output(vec![
            tool_delta("c1", Some("search"), "{\"q\":"),
            tool_delta("c1", None, "\"rust\"}"),
            Chunk::new(
                RUN,
                ChunkPayload::ToolCall(ToolCallPart {
                    tool_call_id: "c1".into(),
                    tool_name: String::new(),
                    args: Value::Null,
                    provider_executed: None,
                    dynamic: false,
                    provider_metadata: None,
                }),
            ),
            finish(),
        ]);
        let chunks: Vec<Chunk> = output.full_stream().collect().await;
        assert_eq!(
            chunks.iter().map(Chunk::kind).collect::<Vec<_>>(),
            [
                "tool-call-input-streaming-start",
                "tool-call-delta",
                "tool-call-delta",
                "tool-call",
                "finish"
            ]
        );
        assert!(matches!(
            &chunks[2].payload,
            ChunkPayload::ToolCallDelta { tool_name: Some(name), .. } if name == "search"
        ));

        let calls = output.tool_calls().await.expect("calls");
        assert_eq!(calls[0].tool_name, "search");
        assert_eq!(calls[0].args, json!({"q": "rust"}));
        assert_eq!(output.static_tool_calls().await.expect("static").len(), 1);
        assert!(output.dynamic_tool_calls().await.expect("dynamic").is_empty());
    }

    #[tokio::test]
    async fn explicit_streaming_start_is_not_duplicated() {
        let output = output(vec![
            Chunk::new(
                RUN,
                ChunkPayload::ToolCallInputStreamingStart {
                    tool_call_id: "c1".into(),
                    tool_name: "search".into(),
                    dynamic: false,
                },
            ),
            tool_delta("c1", None, "{}"),
            finish(),
        ]);
        let kinds: Vec<&str> = output
            .full_stream()
            .map(|chunk| chunk.kind())
            .collect()
            .await;
        assert_eq!(
            kinds,
            ["tool-call-input-streaming-start", "tool-call-delta", "finish"]
        );
    }

    #[tokio::test]
    async fn array_output_streams_objects_elements_and_text() {
        let schema = OutputSchema::new(json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }));
        let output = ModelOutput::builder(stream::iter(vec![
            text("{\"elements\":[{\"na"),
            text("me\":\"A\"},{\"name\":\"B\"}]}"),
            finish(),
        ]))
        .run_id(RUN)
        .structured_output(schema)
        .build()
        .expect("build");

        let objects: Vec<Value> = output.object_stream().collect().await;
        assert_eq!(objects, [json!([]), json!([{"name": "A"}, {"name": "B"}])]);

        let elements: Vec<Value> = output.element_stream().collect().await;
        assert_eq!(elements, [json!({"name": "A"}), json!({"name": "B"})]);

        let text: String = output.text_stream().collect::<Vec<_>>().await.concat();
        assert_eq!(text, r#"[{"name":"A"},{"name":"B"}]"#);

        assert_eq!(
            output.object().await.expect("object"),
            Some(json!([{"name": "A"}, {"name": "B"}]))
        );
    }

    #[tokio::test]
    async fn element_stream_follows_the_step_that_produced_the_object() {
        let schema = OutputSchema::new(json!({
            "type": "array",
            "items": {"type": "object"}
        }));
        let output = ModelOutput::builder(stream::iter(vec![
            Chunk::step_start(RUN),
            text(r#"{"elements":[{"a":1},{"a":2},{"a":3}"#),
            Chunk::step_finish(RUN, FinishReason::ToolCalls, UsageCounters::new()),
            Chunk::step_start(RUN),
            text(r#"{"elements":[{"b":1},{"b":2}]}"#),
            Chunk::step_finish(RUN, FinishReason::Stop, UsageCounters::new()),
            finish(),
        ]))
        .run_id(RUN)
        .structured_output(schema)
        .build()
        .expect("build");

        let elements: Vec<Value> = output.element_stream().collect().await;
        assert_eq!(
            elements,
            [json!({"a": 1}), json!({"a": 2}), json!({"b": 1}), json!({"b": 2})]
        );
        let text: String = output.text_stream().collect::<Vec<_>>().await.concat();
        assert!(text.ends_with(r#"[{"b":1},{"b":2}]"#), "{text}");
        assert_eq!(
            output.object().await.expect("object"),
            Some(json!([{"b": 1}, {"b": 2}]))
        );
    }

    #[tokio::test]
    async fn enum_output_commits_early_and_deserialises() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        #[serde(rename_all = "lowercase")]
        enum Color {
            Red,
            Green,
            Blue,
        }

        let output = ModelOutput::builder(stream::iter(vec![
            text("{\"result\":\"gr"),
            text("een\"}"),
            finish(),
        ]))
        .run_id(RUN)
        .structured_output(OutputSchema::enumeration(["red", "green", "blue"]))
        .build()
        .expect("build");

        let objects: Vec<Value> = output.object_stream().collect().await;
        assert_eq!(objects, [json!("green")]);
        assert_eq!(output.object_as::<Color>().await.expect("color"), Color::Green);
    }

    #[tokio::test]
    async fn decode_failure_rejects_only_the_object() {
        let output = ModelOutput::builder(stream::iter(vec![text("not json"), finish()]))
            .run_id(RUN)
            .structured_output(OutputSchema::any_object())
            .build()
            .expect("build");
        let kinds: Vec<&str> = output.full_stream().map(|c| c.kind()).collect().await;
        assert_eq!(kinds, ["text-delta", "error", "finish"]);
        assert!(matches!(
            output.object().await,
            Err(OutputError::RunFailed(RunFailure::Decode(
                DecodeError::NoObjectGenerated { .. }
            )))
        ));
        assert_eq!(output.text().await.expect("text"), "not json");
        assert_eq!(output.status(), OutputStatus::Success);
    }

    #[tokio::test]
    async fn provider_error_rejects_pending_results() {
        let output = output(vec![
            text("half"),
            Chunk::error(RUN, RunFailure::provider("rate limited")),
            text("ignored"),
        ]);
        let kinds: Vec<&str> = output.full_stream().map(|c| c.kind()).collect().await;
        assert_eq!(kinds, ["text-delta", "error", "text-delta"]);
        assert_eq!(
            output.text().await,
            Err(OutputError::RunFailed(RunFailure::provider("rate limited")))
        );
        assert_eq!(output.error(), Some(RunFailure::provider("rate limited")));
    }

    struct Guard;

    #[async_trait::async_trait]
    impl OutputProcessor for Guard {
        fn name(&self) -> &str {
            "guard"
        }

        async fn process_output_stream(&self, chunk: Chunk) -> Result<ProcessorAction, ProcessorError> {
            match &chunk.payload {
                ChunkPayload::TextDelta { text, .. } if text.contains("forbidden") => {
                    Err(ProcessorError::abort("forbidden content"))
                }
                _ => Ok(ProcessorAction::Pass(chunk)),
            }
        }
    }

    #[tokio::test]
    async fn tripwire_ends_stream_without_failing() {
        let output = ModelOutput::builder(stream::iter(vec![
            text("fine "),
            text("forbidden"),
            text("never seen"),
            finish(),
        ]))
        .run_id(RUN)
        .output_processor(Arc::new(Guard))
        .build()
        .expect("build");

        let kinds: Vec<&str> = output.full_stream().map(|c| c.kind()).collect().await;
        assert_eq!(kinds, ["text-delta", "tripwire"]);
        assert_eq!(output.finish_reason().await.expect("reason"), FinishReason::Other);
        assert_eq!(output.text().await.expect("text"), "fine ");
        assert_eq!(output.status(), OutputStatus::Tripwire);
        assert_eq!(output.tripwire_reason().as_deref(), Some("forbidden content"));
        assert_eq!(output.error(), None);
    }

    struct Uppercase;

    #[async_trait::async_trait]
    impl OutputProcessor for Uppercase {
        fn name(&self) -> &str {
            "uppercase"
        }

        async fn process_output_result(
            &self,
            result: &mut crate::processor::OutputResult,
        ) -> Result<(), ProcessorError> {
            for message in &mut result.messages {
                for part in &mut message.content {
                    if let crate::content::MessageContent::Text { text } = part {
                        *text = text.to_uppercase();
                    }
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn result_processor_rewrites_final_text() {
        let output = ModelOutput::builder(stream::iter(vec![text("quiet"), finish()]))
            .run_id(RUN)
            .output_processor(Arc::new(Uppercase))
            .build()
            .expect("build");
        let streamed: Vec<String> = output.text_stream().collect().await;
        assert_eq!(streamed, ["quiet"]);
        assert_eq!(output.text().await.expect("text"), "QUIET");
    }

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<StepResult>>,
        finished: Mutex<Option<FinishResult>>,
        fail_on_finish: bool,
    }

    #[async_trait::async_trait]
    impl OutputCallbacks for Recorder {
        async fn on_step_finish(&self, step: &StepResult) -> Result<(), HookError> {
            self.steps.lock().expect("lock").push(step.clone());
            Ok(())
        }

        async fn on_finish(&self, result: &FinishResult) -> Result<(), HookError> {
            *self.finished.lock().expect("lock") = Some(result.clone());
            if self.fail_on_finish {
                return Err("audit log unavailable".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn hooks_receive_steps_and_consolidated_result() {
        let recorder = Arc::new(Recorder::default());
        let output = ModelOutput::builder(stream::iter(vec![
            Chunk::step_start(RUN),
            text("hi"),
            Chunk::step_finish(RUN, FinishReason::Stop, UsageCounters::from_tokens(1, 1)),
            Chunk::finish(RUN, FinishReason::Stop, UsageCounters::new()),
        ]))
        .run_id(RUN)
        .callbacks(recorder.clone())
        .build()
        .expect("build");

        output.consume_stream().await;
        assert_eq!(recorder.steps.lock().expect("lock").len(), 1);
        let finished = recorder.finished.lock().expect("lock").clone().expect("finished");
        assert_eq!(finished.text, "hi");
        assert_eq!(finished.usage.get("total_tokens"), Some(2));
        assert_eq!(finished.response_messages.len(), 1);
    }

    #[tokio::test]
    async fn hook_failure_carries_run_context() {
        let recorder = Arc::new(Recorder {
            fail_on_finish: true,
            ..Default::default()
        });
        let output = ModelOutput::builder(stream::iter(vec![text("x"), finish()]))
            .run_id(RUN)
            .model(ModelRef::new("openai", "gpt-5-nano"))
            .thread_id("thread-4")
            .callbacks(recorder)
            .build()
            .expect("build");

        let chunks: Vec<Chunk> = output.full_stream().collect().await;
        let Some(ChunkPayload::Error {
            error: RunFailure::Hook {
                hook,
                context,
                message,
            },
        }) = chunks.last().map(|c| &c.payload)
        else {
            panic!("expected hook failure, got {chunks:?}");
        };
        assert_eq!(hook, "on_finish");
        assert_eq!(message, "audit log unavailable");
        assert_eq!(context.run_id, RUN);
        assert_eq!(context.thread_id.as_deref(), Some("thread-4"));
        assert_eq!(
            context.model.as_ref().map(|m| m.to_string()).as_deref(),
            Some("openai/gpt-5-nano")
        );
        assert_eq!(output.status(), OutputStatus::Failed);
    }

    #[tokio::test]
    async fn results_settle_while_source_stays_open() {
        let source = stream::iter(vec![text("hi"), finish()]).chain(stream::pending());
        let output = ModelOutput::builder(source)
            .run_id(RUN)
            .build()
            .expect("build");

        let text = tokio::time::timeout(Duration::from_millis(200), output.text())
            .await
            .expect("text settles after finish");
        assert_eq!(text.expect("text"), "hi");

        let full = tokio::time::timeout(Duration::from_millis(200), output.get_full_output())
            .await
            .expect("full output settles after finish")
            .expect("full output");
        assert_eq!(full.finish_reason, FinishReason::Stop);
        assert_eq!(full.status, OutputStatus::Success);
    }

    #[tokio::test]
    async fn abort_stops_pending_source() {
        let source = stream::iter(vec![text("first")]).chain(stream::pending());
        let output = ModelOutput::builder(source)
            .run_id(RUN)
            .build()
            .expect("build");
        let abort = output.abort_handle();
        let mut chunks = output.full_stream();
        assert_eq!(chunks.next().await.map(|c| c.kind()), Some("text-delta"));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            abort.abort();
        });
        assert_eq!(chunks.next().await.map(|c| c.kind()), Some("abort"));
        assert!(chunks.next().await.is_none());
        assert_eq!(
            output.text().await,
            Err(OutputError::RunFailed(RunFailure::Cancelled))
        );
        assert_eq!(output.status(), OutputStatus::Cancelled);
    }

    struct Collect(Mutex<BTreeMap<String, Value>>);

    impl TelemetrySink for Collect {
        fn record(&self, _run_id: &str, attributes: &BTreeMap<String, Value>) {
            self.0.lock().expect("lock").extend(attributes.clone());
        }
    }

    #[tokio::test]
    async fn telemetry_and_full_output() {
        let sink = Arc::new(Collect(Mutex::new(BTreeMap::new())));
        let output = ModelOutput::builder(stream::iter(vec![
            Chunk::new(
                RUN,
                ChunkPayload::ReasoningDelta {
                    id: "r1".into(),
                    text: "thinking".into(),
                    provider_metadata: None,
                },
            ),
            text("answer"),
            Chunk::new(
                RUN,
                ChunkPayload::Finish(StepFinishPayload {
                    finish_reason: FinishReason::Stop,
                    usage: UsageCounters::from_tokens(4, 4),
                    response: Some(ResponseMetadata {
                        id: Some("resp-7".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            ),
        ]))
        .run_id(RUN)
        .telemetry(sink.clone())
        .build()
        .expect("build");

        let full = output.get_full_output().await.expect("full output");
        assert_eq!(full.text, "answer");
        assert_eq!(full.reasoning_text.as_deref(), Some("thinking"));
        assert_eq!(full.response.id.as_deref(), Some("resp-7"));
        assert_eq!(full.status, OutputStatus::Success);

        let attributes = sink.0.lock().expect("lock").clone();
        assert_eq!(attributes["ai.response.text"], json!("answer"));
        assert_eq!(attributes["ai.usage.totalTokens"], json!(8));
        assert_eq!(attributes["ai.response.id"], json!("resp-7"));
    }

    #[tokio::test]
    async fn raw_frames_only_in_raw_stream_by_default() {
        let output = output(vec![
            Chunk::new(RUN, ChunkPayload::Raw { raw: json!({"id": 1}) }),
            finish(),
        ]);
        assert_eq!(output.full_stream().count().await, 1);
        assert_eq!(output.raw_stream().count().await, 2);
    }

    #[test]
    fn build_validates_configuration() {
        let empty_run = ModelOutput::builder(stream::empty()).run_id(" ").build();
        assert!(matches!(empty_run, Err(OutputError::Validation(_))));

        let no_items = ModelOutput::builder(stream::empty())
            .structured_output(OutputSchema::new(json!({"type": "array"})))
            .build();
        assert!(matches!(no_items, Err(OutputError::Config(_))));

        let no_values = ModelOutput::builder(stream::empty())
            .structured_output(OutputSchema::enumeration(Vec::<String>::new()))
            .build();
        assert!(matches!(no_values, Err(OutputError::Config(_))));
    }
}
