pub mod chat;
pub mod monitor;
pub mod process;
pub mod send;
pub mod status;

use clap::{Args, Parser, Subcommand};

/// Vextir — event-driven AI runtime.
#[derive(Debug, Parser)]
#[command(name = "vextir", version, about)]
pub struct Cli {
    /// Path to a TOML config file (default: $VEXTIR_CONFIG or ./vextir.toml).
    #[arg(long, global = true)]
    pub config: Option<String>,
    /// Verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat session over the event bus.
    Chat(ChatArgs),
    /// Publish a single event.
    Send(SendArgs),
    /// Replay an event from a JSON file through the processor.
    Process(ProcessArgs),
    /// Stream all events to stdout.
    Monitor(MonitorArgs),
    /// Show driver status and health summary.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Model to use (default: the chat driver's default).
    #[arg(long)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,
    /// Session id (default: a fresh timestamped session).
    #[arg(long)]
    pub session: Option<String>,
    /// Seconds to wait for each reply.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Event type (dotted), e.g. `system.health`.
    #[arg(short = 't', long = "type")]
    pub event_type: String,
    /// Event data: a JSON object, or a plain string wrapped as
    /// `{"message": ...}`.
    #[arg(short = 'd', long)]
    pub data: Option<String>,
    /// Wait for the matching `<type>.response` event.
    #[arg(long)]
    pub wait: bool,
    /// Response timeout in seconds.
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Path to a JSON file holding one event envelope.
    #[arg(short = 'f', long)]
    pub file: String,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Only show events whose type contains this substring.
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {}
