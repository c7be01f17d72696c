//! Aggregation and structured decoding of streamed model output.
//!
//! A model call produces one single-pass stream of [`Chunk`]s. [`ModelOutput`]
//! runs it through output processors, structured decoding and aggregation
//! once, then lets any number of readers consume the processed chunks while
//! the run's results (text, usage, steps, tool calls, structured object, ...)
//! settle in the background.
//!
//! ```no_run
//! use futures::{StreamExt as _, stream};
//! use orchestrator_ai_output::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), OutputError> {
//! let chunks = vec![
//!     Chunk::text_delta("run-1", "Hello "),
//!     Chunk::text_delta("run-1", "world"),
//!     Chunk::finish("run-1", FinishReason::Stop, UsageCounters::from_tokens(5, 2)),
//! ];
//! let output = ModelOutput::builder(stream::iter(chunks))
//!     .run_id("run-1")
//!     .build()?;
//!
//! let mut text = output.text_stream();
//! while let Some(delta) = text.next().await {
//!     print!("{delta}");
//! }
//! let usage = output.usage().await?;
//! println!("\n{} tokens", usage.derived_total());
//! # Ok(())
//! # }
//! ```

/// Chunk vocabulary shared by every pipeline stage.
pub mod chunk;
/// Tool calls, sources, files, reasoning and response messages.
pub mod content;
/// Single-assignment results awaited by consumers.
pub mod deferred;
/// Public error types.
pub mod errors;
/// Object, array and enum decoding of generated JSON.
pub mod format;
/// Side-effect hooks and telemetry.
pub mod hooks;
/// Model identifiers and per-run options.
pub mod model;
pub mod observability;
/// The aggregated output handle and its stream views.
pub mod output;
/// Forgiving parser for incomplete JSON.
pub mod partial_json;
/// Common imports for typical usage.
pub mod prelude;
/// Output processor middleware.
pub mod processor;
/// Requested structured output and schema validation.
pub mod schema;
/// Step records.
pub mod step;
mod tee;
/// Token usage counters.
pub mod usage;

pub use chunk::{Chunk, ChunkOrigin, ChunkPayload, StepFinishPayload};
pub use content::{
    FilePart, FinishReason, OutputMessage, ReasoningPart, ResponseMetadata, SourcePart,
    ToolCallPart, ToolResultPart,
};
pub use deferred::{DeferredResult, DeferredStatus};
pub use errors::{DecodeError, FailureContext, OutputError, ProcessorError, RunFailure};
pub use hooks::{FinishResult, OutputCallbacks, TelemetrySink};
pub use model::{ModelRef, OutputOptions, ProviderId};
pub use output::{AbortHandle, FullOutput, ModelOutput, ModelOutputBuilder, OutputStatus};
pub use processor::{OutputProcessor, OutputResult, ProcessorAction};
pub use schema::{OutputSchema, OutputShape};
pub use step::{StepResult, StepType};
pub use usage::UsageCounters;
