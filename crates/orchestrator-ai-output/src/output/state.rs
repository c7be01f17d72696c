//! Aggregator state machine and the deferred results it settles.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, ChunkPayload, StepFinishPayload};
use crate::content::{
    FilePart, FinishReason, OutputMessage, ReasoningPart, ResponseMetadata, SourcePart,
    ToolCallPart, ToolResultPart, assistant_text,
};
use crate::deferred::{DeferredResult, Settle};
use crate::errors::{FailureContext, HookError, RunFailure};
use crate::hooks::{
    FinishResult, OutputCallbacks, TelemetrySink, split_tool_calls, split_tool_results,
    telemetry_attributes,
};
use crate::model::OutputOptions;
use crate::partial_json::{parse_complete_json, parse_partial_json};
use crate::processor::{OutputResult, Processed, ProcessorChain};
use crate::step::{ReasoningBlocks, StepBuffer, StepResult, StepType};
use crate::usage::UsageCounters;

/// Lifecycle of a run as seen by the aggregator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputStatus {
    Running,
    Success,
    Failed,
    /// An output processor blocked the content.
    Tripwire,
    Cancelled,
}

/// One deferred result per derived fact of the run.
pub(crate) struct Promises {
    pub(crate) finish_reason: DeferredResult<FinishReason>,
    pub(crate) text: DeferredResult<String>,
    pub(crate) reasoning: DeferredResult<Vec<ReasoningPart>>,
    pub(crate) reasoning_text: DeferredResult<Option<String>>,
    pub(crate) usage: DeferredResult<UsageCounters>,
    pub(crate) provider_metadata: DeferredResult<Option<Value>>,
    pub(crate) request: DeferredResult<Value>,
    pub(crate) response: DeferredResult<ResponseMetadata>,
    pub(crate) warnings: DeferredResult<Vec<Value>>,
    pub(crate) tool_calls: DeferredResult<Vec<ToolCallPart>>,
    pub(crate) tool_results: DeferredResult<Vec<ToolResultPart>>,
    pub(crate) sources: DeferredResult<Vec<SourcePart>>,
    pub(crate) files: DeferredResult<Vec<FilePart>>,
    pub(crate) steps: DeferredResult<Vec<StepResult>>,
    pub(crate) response_messages: DeferredResult<Vec<OutputMessage>>,
    pub(crate) object: DeferredResult<Option<Value>>,
}

impl Promises {
    fn new() -> Self {
        Self {
            finish_reason: DeferredResult::new("finish_reason"),
            text: DeferredResult::new("text"),
            reasoning: DeferredResult::new("reasoning"),
            reasoning_text: DeferredResult::new("reasoning_text"),
            usage: DeferredResult::new("usage"),
            provider_metadata: DeferredResult::new("provider_metadata"),
            request: DeferredResult::new("request"),
            response: DeferredResult::new("response"),
            warnings: DeferredResult::new("warnings"),
            tool_calls: DeferredResult::new("tool_calls"),
            tool_results: DeferredResult::new("tool_results"),
            sources: DeferredResult::new("sources"),
            files: DeferredResult::new("files"),
            steps: DeferredResult::new("steps"),
            response_messages: DeferredResult::new("response_messages"),
            object: DeferredResult::new("object"),
        }
    }

    fn all(&self) -> [&dyn Settle; 16] {
        [
            &self.finish_reason,
            &self.text,
            &self.reasoning,
            &self.reasoning_text,
            &self.usage,
            &self.provider_metadata,
            &self.request,
            &self.response,
            &self.warnings,
            &self.tool_calls,
            &self.tool_results,
            &self.sources,
            &self.files,
            &self.steps,
            &self.response_messages,
            &self.object,
        ]
    }

    /// Rejects every pending result with `err`.
    fn reject_pending(&self, err: &RunFailure) {
        for result in self.all() {
            result.fail(err.clone());
        }
    }

    /// Rejects every pending result with a termination error naming it.
    fn terminate_pending(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for result in self.all() {
            if result.pending() && result.fail(RunFailure::terminated(result.result_name())) {
                names.push(result.result_name());
            }
        }
        names
    }

    fn settle(&self, result: &FinishResult) {
        self.finish_reason.resolve(result.finish_reason);
        self.text.resolve(result.text.clone());
        self.reasoning.resolve(result.reasoning.clone());
        self.reasoning_text.resolve(result.reasoning_text.clone());
        self.usage.resolve(result.usage.clone());
        self.provider_metadata.resolve(result.provider_metadata.clone());
        self.request.resolve(result.request.clone());
        self.response.resolve(result.response.clone());
        self.warnings.resolve(result.warnings.clone());
        self.tool_calls.resolve(result.tool_calls.clone());
        self.tool_results.resolve(result.tool_results.clone());
        self.sources.resolve(result.sources.clone());
        self.files.resolve(result.files.clone());
        self.steps.resolve(result.steps.clone());
        self.response_messages.resolve(result.response_messages.clone());
        self.object.resolve(result.object.clone());
    }
}

/// Argument fragments of one streamed tool call.
#[derive(Debug, Default)]
struct ToolArgs {
    tool_name: Option<String>,
    fragments: Vec<String>,
}

impl ToolArgs {
    fn assemble(&self) -> Value {
        let text: String = self.fragments.concat();
        if text.trim().is_empty() {
            return Value::Object(Default::default());
        }
        parse_complete_json(&text)
            .or_else(|| parse_partial_json(&text).value)
            .unwrap_or(Value::String(text))
    }
}

/// Buffers owned by the aggregator for the lifetime of a run.
pub(crate) struct RunState {
    pub(crate) status: OutputStatus,
    pub(crate) error: Option<RunFailure>,
    pub(crate) tripwire_reason: Option<String>,
    terminated: bool,
    text: String,
    reasoning: ReasoningBlocks,
    tool_calls: Vec<ToolCallPart>,
    tool_results: Vec<ToolResultPart>,
    sources: Vec<SourcePart>,
    files: Vec<FilePart>,
    tool_args: HashMap<String, ToolArgs>,
    streaming_started: HashSet<String>,
    step: StepBuffer,
    steps: Vec<StepResult>,
    usage: UsageCounters,
    warnings: Vec<Value>,
    request: Value,
    response: ResponseMetadata,
    provider_metadata: Option<Value>,
    object: Option<Value>,
}

impl RunState {
    fn new() -> Self {
        Self {
            status: OutputStatus::Running,
            error: None,
            tripwire_reason: None,
            terminated: false,
            text: String::new(),
            reasoning: ReasoningBlocks::default(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            sources: Vec::new(),
            files: Vec::new(),
            tool_args: HashMap::new(),
            streaming_started: HashSet::new(),
            step: StepBuffer::default(),
            steps: Vec::new(),
            usage: UsageCounters::new(),
            warnings: Vec::new(),
            request: Value::Null,
            response: ResponseMetadata::default(),
            provider_metadata: None,
            object: None,
        }
    }

    /// Marks the run terminal and drops the per-call tool accumulators.
    fn terminate(&mut self) {
        self.terminated = true;
        self.tool_args.clear();
        self.streaming_started.clear();
    }

    fn close_step(&mut self, finish: &StepFinishPayload) -> StepResult {
        let step_type = if self.steps.is_empty() {
            StepType::Initial
        } else {
            StepType::ToolResult
        };
        let step = self.step.close(step_type, finish);
        self.usage += &finish.usage;
        if finish.provider_metadata.is_some() {
            self.provider_metadata.clone_from(&finish.provider_metadata);
        }
        if let Some(response) = &finish.response {
            self.response.merge(response);
        }
        self.steps.push(step.clone());
        step
    }

    fn finish_result(&self, finish_reason: FinishReason, text: String, object: Option<Value>) -> FinishResult {
        let (static_tool_calls, dynamic_tool_calls) = split_tool_calls(&self.tool_calls);
        let (static_tool_results, dynamic_tool_results) = split_tool_results(&self.tool_results);
        FinishResult {
            text,
            reasoning: self.reasoning.parts().to_vec(),
            reasoning_text: crate::step::reasoning_text(self.reasoning.parts()),
            finish_reason,
            usage: self.usage.with_derived_total(),
            steps: self.steps.clone(),
            tool_calls: self.tool_calls.clone(),
            tool_results: self.tool_results.clone(),
            static_tool_calls,
            dynamic_tool_calls,
            static_tool_results,
            dynamic_tool_results,
            sources: self.sources.clone(),
            files: self.files.clone(),
            warnings: self.warnings.clone(),
            request: self.request.clone(),
            response: self.response.clone(),
            response_messages: self.response_messages(),
            provider_metadata: self.provider_metadata.clone(),
            object,
        }
    }

    fn response_messages(&self) -> Vec<OutputMessage> {
        self.steps
            .iter()
            .flat_map(StepResult::response_messages)
            .collect()
    }
}

/// Chunks produced for one input chunk, and whether the pipeline must stop.
pub(crate) struct Outcome {
    pub(crate) chunks: Vec<Chunk>,
    pub(crate) halt: bool,
}

impl Outcome {
    fn pass(chunk: Chunk) -> Self {
        Self {
            chunks: vec![chunk],
            halt: false,
        }
    }
}

/// Run-scoped aggregator shared by the pipeline and the public handle.
pub(crate) struct OutputCore {
    pub(crate) options: OutputOptions,
    pub(crate) promises: Promises,
    state: Mutex<RunState>,
    callbacks: Option<Arc<dyn OutputCallbacks>>,
    pub(crate) processors: ProcessorChain,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl OutputCore {
    pub(crate) fn new(
        options: OutputOptions,
        callbacks: Option<Arc<dyn OutputCallbacks>>,
        processors: ProcessorChain,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self {
            options,
            promises: Promises::new(),
            state: Mutex::new(RunState::new()),
            callbacks,
            processors,
            telemetry,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state().terminated
    }

    fn failure_context(&self) -> FailureContext {
        FailureContext {
            run_id: self.options.run_id.clone(),
            model: self.options.model.clone(),
            thread_id: self.options.thread_id.clone(),
            resource_id: self.options.resource_id.clone(),
        }
    }

    /// Applies one chunk to the run state.
    pub(crate) async fn aggregate(&self, mut chunk: Chunk) -> Outcome {
        let mut extra_before = None;
        {
            let mut state = self.state();
            if state.terminated {
                return Outcome::pass(chunk);
            }
            match &mut chunk.payload {
                ChunkPayload::StepStart {
                    request, warnings, ..
                } => {
                    state.step.open = true;
                    state.step.request = request.clone();
                    state.step.warnings.extend(warnings.iter().cloned());
                    state.request = request.clone();
                    state.warnings.extend(warnings.iter().cloned());
                }
                ChunkPayload::ResponseMetadata(metadata) => {
                    state.step.response.merge(metadata);
                    state.response.merge(metadata);
                }
                ChunkPayload::TextStart { .. } | ChunkPayload::TextEnd { .. } => {
                    state.step.open = true;
                }
                ChunkPayload::TextDelta { text, .. } => {
                    state.text.push_str(text);
                    state.step.text.push_str(text);
                    state.step.open = true;
                }
                ChunkPayload::ReasoningStart {
                    id,
                    provider_metadata,
                }
                | ChunkPayload::ReasoningEnd {
                    id,
                    provider_metadata,
                } => {
                    state.reasoning.start(id, provider_metadata.as_ref());
                    state.step.reasoning.start(id, provider_metadata.as_ref());
                    state.step.open = true;
                }
                ChunkPayload::ReasoningDelta {
                    id,
                    text,
                    provider_metadata,
                } => {
                    state.reasoning.delta(id, text, provider_metadata.as_ref());
                    state.step.reasoning.delta(id, text, provider_metadata.as_ref());
                    state.step.open = true;
                }
                ChunkPayload::Source(source) => {
                    state.sources.push(source.clone());
                    state.step.sources.push(source.clone());
                    state.step.open = true;
                }
                ChunkPayload::File(file) => {
                    state.files.push(file.clone());
                    state.step.files.push(file.clone());
                    state.step.open = true;
                }
                ChunkPayload::ToolCallInputStreamingStart {
                    tool_call_id,
                    tool_name,
                    ..
                } => {
                    state.streaming_started.insert(tool_call_id.clone());
                    let args = state.tool_args.entry(tool_call_id.clone()).or_default();
                    if args.tool_name.is_none() {
                        args.tool_name = Some(tool_name.clone());
                    }
                    state.step.open = true;
                }
                ChunkPayload::ToolCallDelta {
                    tool_call_id,
                    tool_name,
                    args_text_delta,
                } => {
                    let first_seen = state.streaming_started.insert(tool_call_id.clone());
                    let args = state.tool_args.entry(tool_call_id.clone()).or_default();
                    if args.tool_name.is_none() {
                        args.tool_name.clone_from(tool_name);
                    }
                    args.fragments.push(args_text_delta.clone());
                    if tool_name.is_none() {
                        tool_name.clone_from(&args.tool_name);
                    }
                    if first_seen {
                        extra_before = Some(ChunkPayload::ToolCallInputStreamingStart {
                            tool_call_id: tool_call_id.clone(),
                            tool_name: tool_name.clone().unwrap_or_default(),
                            dynamic: false,
                        });
                    }
                    state.step.open = true;
                }
                ChunkPayload::ToolCall(call) => {
                    if let Some(args) = state.tool_args.get(&call.tool_call_id) {
                        if call.args.is_null() {
                            call.args = args.assemble();
                        }
                        if call.tool_name.is_empty()
                            && let Some(name) = &args.tool_name
                        {
                            call.tool_name.clone_from(name);
                        }
                    }
                    state.tool_calls.push(call.clone());
                    state.step.tool_calls.push(call.clone());
                    state.step.open = true;
                }
                ChunkPayload::ToolResult(result) => {
                    state.tool_results.push(result.clone());
                    state.step.tool_results.push(result.clone());
                    state.step.open = true;
                }
                ChunkPayload::ToolError {
                    tool_call_id,
                    tool_name,
                    error,
                    dynamic,
                } => {
                    let result = ToolResultPart {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        args: None,
                        result: error.clone(),
                        is_error: true,
                        provider_executed: None,
                        dynamic: *dynamic,
                    };
                    state.tool_results.push(result.clone());
                    state.step.tool_results.push(result);
                    state.step.open = true;
                }
                ChunkPayload::ObjectResult { object } => {
                    state.object = Some(object.clone());
                }
                ChunkPayload::Error { error } if error.is_decode() => {
                    warn!(run_id = %self.options.run_id, error = %error, "structured output failed to decode");
                    self.promises.object.reject(error.clone());
                }
                // Terminal and step boundaries are handled below, outside the lock.
                _ => {}
            }
        }

        let payload = chunk.payload.clone();
        match payload {
            ChunkPayload::StepFinish(finish) => self.step_finish(chunk, &finish).await,
            ChunkPayload::Finish(finish) => self.finish(chunk, &finish).await,
            ChunkPayload::Error { error } if !error.is_decode() => {
                self.fail(&error);
                Outcome::pass(chunk)
            }
            ChunkPayload::Tripwire { reason } => {
                self.trip(&reason);
                Outcome {
                    chunks: vec![chunk],
                    halt: true,
                }
            }
            ChunkPayload::Abort => {
                self.cancel();
                Outcome {
                    chunks: vec![chunk],
                    halt: true,
                }
            }
            _ => match extra_before {
                Some(start) => Outcome {
                    chunks: vec![chunk.sibling(start), chunk],
                    halt: false,
                },
                None => Outcome::pass(chunk),
            },
        }
    }

    async fn step_finish(&self, chunk: Chunk, finish: &StepFinishPayload) -> Outcome {
        let step = self.state().close_step(finish);
        debug!(
            run_id = %self.options.run_id,
            step = self.state().steps.len(),
            finish_reason = ?step.finish_reason,
            "step finished"
        );
        if let Err(err) = self.call_step_hook(&step).await {
            return self.hook_failed("on_step_finish", err, chunk);
        }
        Outcome::pass(chunk)
    }

    async fn call_step_hook(&self, step: &StepResult) -> Result<(), HookError> {
        match &self.callbacks {
            Some(callbacks) => callbacks.on_step_finish(step).await,
            None => Ok(()),
        }
    }

    async fn finish(&self, chunk: Chunk, finish: &StepFinishPayload) -> Outcome {
        let open_step = {
            let mut state = self.state();
            if state.step.open {
                Some(state.close_step(finish))
            } else {
                if state.steps.is_empty() {
                    state.usage += &finish.usage;
                }
                if let Some(response) = &finish.response {
                    state.response.merge(response);
                }
                None
            }
        };
        if let Some(step) = open_step
            && let Err(err) = self.call_step_hook(&step).await
        {
            return self.hook_failed("on_step_finish", err, chunk);
        }

        let (messages, object) = {
            let state = self.state();
            (state.response_messages(), state.object.clone())
        };
        let processed = if self.processors.is_empty() {
            None
        } else {
            match self
                .processors
                .process_result(OutputResult { messages, object })
                .await
            {
                Processed::Pass(result) => Some(result),
                Processed::Tripwire(reason) => {
                    self.trip(&reason);
                    let tripwire = chunk.sibling(ChunkPayload::Tripwire { reason });
                    return Outcome {
                        chunks: vec![tripwire],
                        halt: true,
                    };
                }
                Processed::Failed(failure) => {
                    self.fail(&failure);
                    let error = chunk.sibling(ChunkPayload::Error { error: failure });
                    return Outcome {
                        chunks: vec![error],
                        halt: true,
                    };
                }
                Processed::Drop => None,
            }
        };

        let result = {
            let mut state = self.state();
            let structured = self.options.structured_output.is_some();
            let (text, object) = match processed {
                Some(result) => (
                    assistant_text(&result.messages),
                    result.object.filter(|_| structured),
                ),
                None => (state.text.clone(), state.object.clone().filter(|_| structured)),
            };
            let result = state.finish_result(finish.finish_reason, text, object);
            state.status = OutputStatus::Success;
            state.terminate();
            result
        };
        self.promises.settle(&result);

        if let Some(callbacks) = &self.callbacks
            && let Err(err) = callbacks.on_finish(&result).await
        {
            return self.hook_failed("on_finish", err, chunk);
        }

        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                &self.options.run_id,
                &telemetry_attributes(&self.options, &result),
            );
        }
        info!(
            run_id = %self.options.run_id,
            finish_reason = ?result.finish_reason,
            steps = result.steps.len(),
            total_tokens = result.usage.derived_total(),
            "run finished"
        );
        Outcome::pass(chunk)
    }

    fn hook_failed(&self, hook: &str, err: HookError, chunk: Chunk) -> Outcome {
        let failure = RunFailure::Hook {
            hook: hook.to_string(),
            context: self.failure_context(),
            message: err.to_string(),
        };
        warn!(run_id = %self.options.run_id, hook, error = %err, "output hook failed");
        self.fail(&failure);
        let error = chunk.sibling(ChunkPayload::Error { error: failure });
        Outcome {
            chunks: vec![chunk, error],
            halt: true,
        }
    }

    /// Records a terminal failure and rejects every pending result with it.
    pub(crate) fn fail(&self, failure: &RunFailure) {
        {
            let mut state = self.state();
            state.terminate();
            state.status = OutputStatus::Failed;
            if state.error.is_none() {
                state.error = Some(failure.clone());
            }
        }
        warn!(run_id = %self.options.run_id, error = %failure, "run failed");
        self.promises.reject_pending(failure);
    }

    fn trip(&self, reason: &str) {
        let result = {
            let mut state = self.state();
            state.terminate();
            state.status = OutputStatus::Tripwire;
            state.tripwire_reason = Some(reason.to_string());
            let text = state.text.clone();
            state.finish_result(FinishReason::Other, text, None)
        };
        warn!(run_id = %self.options.run_id, reason, "output processor tripped the run");
        self.promises.settle(&result);
    }

    fn cancel(&self) {
        {
            let mut state = self.state();
            state.terminate();
            state.status = OutputStatus::Cancelled;
            state.error = Some(RunFailure::Cancelled);
        }
        warn!(run_id = %self.options.run_id, "run cancelled");
        self.promises.reject_pending(&RunFailure::Cancelled);
    }

    /// Called when the source ends. Rejects whatever is still pending.
    pub(crate) fn flush(&self) {
        let pending = self.promises.terminate_pending();
        if pending.is_empty() {
            return;
        }
        warn!(
            run_id = %self.options.run_id,
            pending = ?pending,
            "stream ended before a terminal chunk"
        );
        let mut state = self.state();
        if !state.terminated {
            state.terminate();
            state.status = OutputStatus::Failed;
            state.error = Some(RunFailure::Protocol {
                message: "stream ended without a finish or error chunk".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> OutputCore {
        OutputCore::new(
            OutputOptions {
                run_id: "run-1".to_string(),
                ..OutputOptions::default()
            },
            None,
            ProcessorChain::new(Vec::new()),
            None,
        )
    }

    fn tool_delta(id: &str) -> Chunk {
        Chunk::new(
            "run-1",
            ChunkPayload::ToolCallDelta {
                tool_call_id: id.into(),
                tool_name: Some("lookup".into()),
                args_text_delta: "{\"q\":".into(),
            },
        )
    }

    fn open_accumulators(core: &OutputCore) -> (usize, usize) {
        let state = core.state();
        (state.tool_args.len(), state.streaming_started.len())
    }

    #[tokio::test]
    async fn finish_releases_tool_accumulators() {
        let core = core();
        core.aggregate(tool_delta("call-1")).await;
        assert_eq!(open_accumulators(&core), (1, 1));

        core.aggregate(Chunk::finish("run-1", FinishReason::Stop, UsageCounters::new()))
            .await;
        assert!(core.is_terminated());
        assert_eq!(open_accumulators(&core), (0, 0));
    }

    #[tokio::test]
    async fn failure_releases_tool_accumulators() {
        let core = core();
        core.aggregate(tool_delta("call-1")).await;
        core.fail(&RunFailure::Provider {
            message: "overloaded".to_string(),
        });
        assert_eq!(core.state().status, OutputStatus::Failed);
        assert_eq!(open_accumulators(&core), (0, 0));
    }
}
