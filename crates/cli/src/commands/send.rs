//! `vextir send` — publish a single event.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use vx_domain::event::EventMessage;
use vx_runtime::VextirRuntime;

use crate::commands::SendArgs;

pub async fn run(runtime: &Arc<VextirRuntime>, args: SendArgs) -> anyhow::Result<i32> {
    // `-d` accepts a JSON object or a plain string.
    let data = match &args.data {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => json!({"message": raw}),
        },
        None => json!({}),
    };

    let event = EventMessage::new(args.event_type.as_str(), data)
        .with_source("vextir_cli")
        .with_user_id("cli_user");

    if args.wait {
        eprintln!("sending {} and waiting for response...", args.event_type);
        match runtime
            .send_and_wait(event, Duration::from_secs(args.timeout))
            .await?
        {
            Some(response) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::Value::Object(
                        response.data.clone()
                    ))?
                );
                Ok(0)
            }
            None => {
                eprintln!("no response within {}s", args.timeout);
                Ok(1)
            }
        }
    } else {
        runtime.publish_event(event).await?;
        eprintln!("event sent");
        // Let the delivery pipeline pick the event up before the runtime
        // shuts down behind us.
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(0)
    }
}
