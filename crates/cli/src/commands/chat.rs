//! `vextir chat` — interactive REPL command.
//!
//! Each line becomes an `llm.chat` event.  The conversation manager
//! stamps the turn number *before* publish (the processor only assigns
//! turns to unstamped events), so replies always land on the right turn
//! even with multiple workers behind the bus.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use vx_domain::event::EventMessage;
use vx_runtime::VextirRuntime;

use crate::commands::ChatArgs;
use crate::EXIT_INTERRUPTED;

pub async fn run(runtime: &Arc<VextirRuntime>, args: ChatArgs) -> anyhow::Result<i32> {
    let mut session_id = args.session.unwrap_or_else(|| {
        format!(
            "cli_{}_{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        )
    });
    let mut model = args.model;
    let timeout = Duration::from_secs(args.timeout);

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".vextir")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("Vextir chat");
    eprintln!("Session: {session_id}  |  Type /help for commands, Ctrl+D to exit");
    eprintln!();

    let mut interrupted = false;
    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed.starts_with('/') {
                    if handle_slash_command(runtime, trimmed, &mut session_id, &mut model) {
                        break;
                    }
                    continue;
                }

                if let Err(e) =
                    send_message(runtime, &session_id, &model, args.temperature, trimmed, timeout)
                        .await
                {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                interrupted = true;
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    rl.save_history(&history_path).ok();
    eprintln!("Goodbye!");
    Ok(if interrupted { EXIT_INTERRUPTED } else { 0 })
}

/// Process a slash command.  Returns `true` if the REPL should exit.
fn handle_slash_command(
    runtime: &Arc<VextirRuntime>,
    input: &str,
    session_id: &mut String,
    model: &mut Option<String>,
) -> bool {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim());

    match cmd {
        "/exit" | "/quit" => return true,

        "/session" => {
            if let Some(name) = arg.filter(|s| !s.is_empty()) {
                *session_id = name.to_string();
                eprintln!("Session switched to: {session_id}");
            } else {
                eprintln!("Current session: {session_id}");
                eprintln!("Usage: /session <name>");
            }
        }

        "/model" => {
            if let Some(name) = arg.filter(|s| !s.is_empty()) {
                *model = Some(name.to_string());
                eprintln!("Model set to: {name}");
            } else {
                eprintln!("Current model: {}", model.as_deref().unwrap_or("(default)"));
                eprintln!("Usage: /model <name>");
            }
        }

        "/sessions" => {
            let rows = runtime.conversations().sessions_summary();
            if rows.is_empty() {
                eprintln!("No active sessions.");
            }
            for row in rows {
                eprintln!(
                    "  {}  user={}  turns={}  created={}",
                    row.session_id,
                    row.user_id,
                    row.turn_count,
                    row.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        "/help" => {
            eprintln!("Commands:");
            eprintln!("  /session <name>  Switch to a named session");
            eprintln!("  /model <name>    Set the model (e.g. gpt-4o-mini)");
            eprintln!("  /sessions        List active conversation sessions");
            eprintln!("  /exit, /quit     Exit the chat");
            eprintln!("  /help            Show this help");
        }

        other => {
            eprintln!("Unknown command: {other}  (type /help for a list)");
        }
    }

    false
}

/// Stamp the turn, publish the chat event, await its reply by request id.
async fn send_message(
    runtime: &Arc<VextirRuntime>,
    session_id: &str,
    model: &Option<String>,
    temperature: f32,
    user_message: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let mut data = json!({
        "messages": [{"role": "user", "content": user_message}],
        "temperature": temperature,
    });
    if let Some(model) = model {
        data["model"] = json!(model);
    }
    let mut event = EventMessage::new("llm.chat", data)
        .with_source("vextir_cli")
        .with_user_id("cli_user")
        .with_session_id(session_id)
        .with_request_id(uuid::Uuid::new_v4().to_string());

    // The CLI stamps the turn; the processor passes stamped events
    // through untouched.
    let (turn_number, history) = runtime.conversations().process_user_event(&event)?;
    event.set_turn_number(turn_number);
    event
        .data
        .insert("messages".into(), serde_json::to_value(&history)?);

    eprintln!("\x1B[2m⏳ processing...\x1B[0m");
    match runtime.send_and_wait(event, timeout).await? {
        Some(response) => {
            let text = response
                .data
                .get("response")
                .and_then(|r| r.as_str())
                .unwrap_or_default();
            if text.is_empty() {
                eprintln!("(empty response)");
            } else {
                println!("assistant: {text}");
                println!();
            }
        }
        None => {
            eprintln!("response timeout - please try again");
        }
    }
    Ok(())
}
