//! `vextir monitor` — stream all events until Ctrl-C.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vx_bus::{handler_fn, EventBus, SubscribeOptions};
use vx_runtime::VextirRuntime;

use crate::commands::MonitorArgs;

pub async fn run(
    runtime: &Arc<VextirRuntime>,
    args: MonitorArgs,
    verbose: bool,
) -> anyhow::Result<i32> {
    eprintln!("monitoring events (Ctrl+C to stop)");
    eprintln!();

    let seen = Arc::new(AtomicU64::new(0));
    let filter = args.filter.clone();
    let counter = seen.clone();
    let handler = handler_fn(move |event| {
        let filter = filter.clone();
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::Relaxed);
            if let Some(filter) = &filter {
                if !event.event_type.contains(filter.as_str()) {
                    return Ok(());
                }
            }
            let timestamp = event.timestamp.format("%H:%M:%S");
            println!("[{timestamp}] {}", event.event_type);
            if verbose {
                println!("  id: {}", event.id);
                println!("  source: {}", event.source);
                if !event.data.is_empty() {
                    let mut data = serde_json::to_string(&event.data).unwrap_or_default();
                    if data.len() > 200 {
                        data.truncate(200);
                        data.push_str("...");
                    }
                    println!("  data: {data}");
                }
                println!();
            }
            Ok(())
        }
    });

    // A system subscription: watching must not make events look consumed.
    let subscription_id = runtime
        .event_bus()
        .subscribe("*", handler, SubscribeOptions::system())
        .await?;

    tokio::signal::ctrl_c().await?;

    runtime.event_bus().unsubscribe(&subscription_id).await?;
    eprintln!();
    eprintln!("monitoring stopped, {} event(s) seen", seen.load(Ordering::Relaxed));
    // Ctrl-C is the normal way to end a monitor session.
    Ok(0)
}
