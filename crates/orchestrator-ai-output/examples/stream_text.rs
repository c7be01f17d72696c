use futures::{StreamExt as _, stream};
use orchestrator_ai_output::observability::init_observability;
use orchestrator_ai_output::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), OutputError> {
    init_observability();

    let run_id = "demo-stream";
    let chunks = vec![
        Chunk::step_start(run_id),
        Chunk::text_delta(run_id, "Streaming "),
        Chunk::text_delta(run_id, "a greeting."),
        Chunk::step_finish(run_id, FinishReason::Stop, UsageCounters::from_tokens(12, 4)),
        Chunk::finish(run_id, FinishReason::Stop, UsageCounters::new()),
    ];
    let output = ModelOutput::builder(stream::iter(chunks))
        .run_id(run_id)
        .model(ModelRef::new("openai", "gpt-5-nano"))
        .build()?;

    let mut text = output.text_stream();
    while let Some(delta) = text.next().await {
        print!("{delta}");
    }
    println!();

    let full = output.get_full_output().await?;
    println!(
        "finish={:?} steps={} tokens={}",
        full.finish_reason,
        full.steps.len(),
        full.usage.derived_total()
    );
    Ok(())
}
