//! `vextir process` — replay one event from a JSON file.

use std::sync::Arc;

use vx_domain::event::EventMessage;
use vx_runtime::VextirRuntime;

use crate::commands::ProcessArgs;

pub async fn run(runtime: &Arc<VextirRuntime>, args: ProcessArgs) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", args.file))?;
    let event = EventMessage::from_json(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", args.file))?;

    eprintln!("processing {} ({})", event.event_type, event.id);

    // Run the event straight through the processor so the outcome is
    // visible synchronously.
    let outputs = runtime.processor().process_event(event).await?;
    if outputs.is_empty() {
        println!("processed, no output events");
    } else {
        println!("processed, {} output event(s):", outputs.len());
        for output in &outputs {
            println!("  {} ({})", output.event_type, output.id);
        }
    }
    Ok(0)
}
