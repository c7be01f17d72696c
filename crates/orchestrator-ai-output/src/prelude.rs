//! Common imports for building and consuming a `ModelOutput`.
pub use crate::{
    AbortHandle, Chunk, ChunkPayload, FinishReason, ModelOutput, ModelOutputBuilder, ModelRef,
    OutputCallbacks, OutputError, OutputProcessor, OutputSchema, OutputStatus, ProcessorAction,
    ProcessorError, RunFailure, StepResult, UsageCounters,
};
