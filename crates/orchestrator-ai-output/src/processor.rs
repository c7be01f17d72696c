use std::sync::Arc;

use serde_json::Value;

use crate::chunk::Chunk;
use crate::content::OutputMessage;
use crate::errors::{ProcessorError, RunFailure};

/// What an output processor decided for a chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessorAction {
    /// Forward the (possibly rewritten) chunk.
    Pass(Chunk),
    /// Swallow the chunk.
    Drop,
}

/// Final outcome handed to result-level processors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputResult {
    /// Response history assembled from the run's steps.
    pub messages: Vec<OutputMessage>,
    /// Validated structured value, if one was requested and produced.
    pub object: Option<Value>,
}

/// Middleware that can inspect, rewrite or block output.
///
/// Returning `ProcessorError::Abort` trips the run: the stream ends with a
/// `tripwire` chunk and results resolve with what was buffered so far.
#[async_trait::async_trait]
pub trait OutputProcessor: Send + Sync {
    /// Name used in logs and failures.
    fn name(&self) -> &str;

    async fn process_output_stream(&self, chunk: Chunk) -> Result<ProcessorAction, ProcessorError> {
        Ok(ProcessorAction::Pass(chunk))
    }

    async fn process_output_result(&self, _result: &mut OutputResult) -> Result<(), ProcessorError> {
        Ok(())
    }
}

/// Outcome of running a chunk or result through the processor chain.
#[derive(Debug)]
pub(crate) enum Processed<T> {
    Pass(T),
    Drop,
    Tripwire(String),
    Failed(RunFailure),
}

fn classify<T>(processor: &dyn OutputProcessor, err: ProcessorError) -> Processed<T> {
    match err {
        ProcessorError::Abort { reason } => Processed::Tripwire(reason),
        ProcessorError::Failed { message } => Processed::Failed(RunFailure::Processor {
            processor: processor.name().to_string(),
            message,
        }),
    }
}

/// Processors applied in registration order.
#[derive(Clone, Default)]
pub(crate) struct ProcessorChain {
    processors: Vec<Arc<dyn OutputProcessor>>,
}

impl ProcessorChain {
    pub(crate) fn new(processors: Vec<Arc<dyn OutputProcessor>>) -> Self {
        Self { processors }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub(crate) async fn process_chunk(&self, mut chunk: Chunk) -> Processed<Chunk> {
        for processor in &self.processors {
            match processor.process_output_stream(chunk).await {
                Ok(ProcessorAction::Pass(next)) => chunk = next,
                Ok(ProcessorAction::Drop) => return Processed::Drop,
                Err(err) => return classify(processor.as_ref(), err),
            }
        }
        Processed::Pass(chunk)
    }

    pub(crate) async fn process_result(&self, mut result: OutputResult) -> Processed<OutputResult> {
        for processor in &self.processors {
            if let Err(err) = processor.process_output_result(&mut result).await {
                return classify(processor.as_ref(), err);
            }
        }
        Processed::Pass(result)
    }
}
