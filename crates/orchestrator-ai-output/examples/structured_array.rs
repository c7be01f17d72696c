use futures::{StreamExt as _, stream};
use orchestrator_ai_output::observability::init_observability;
use orchestrator_ai_output::prelude::*;

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
#[allow(dead_code)]
struct City {
    name: String,
    population: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), OutputError> {
    init_observability();

    let run_id = "demo-array";
    let fragments = [
        r#"{"elements":[{"name":"Lis"#,
        r#"bon","population":545000},{"na"#,
        r#"me":"Porto","population":232000}]}"#,
    ];
    let mut chunks: Vec<Chunk> = fragments
        .iter()
        .map(|fragment| Chunk::text_delta(run_id, *fragment))
        .collect();
    chunks.push(Chunk::finish(
        run_id,
        FinishReason::Stop,
        UsageCounters::from_tokens(40, 25),
    ));

    let output = ModelOutput::builder(stream::iter(chunks))
        .run_id(run_id)
        .structured_output(OutputSchema::array_of::<City>())
        .build()?;

    let mut elements = output.element_stream();
    while let Some(city) = elements.next().await {
        println!("element: {city}");
    }

    let cities: Vec<City> = output.object_as().await?;
    println!("{cities:?}");
    Ok(())
}
