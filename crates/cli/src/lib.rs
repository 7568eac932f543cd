//! `vextir` — the command line for the Vextir runtime.
//!
//! One binary, five commands: interactive `chat`, one-shot `send`,
//! file-driven `process`, live `monitor`, and `status`.  Every command
//! boots an isolated runtime from the resolved configuration and talks
//! to the system exclusively through the event bus.

pub mod commands;

use std::path::Path;

use vx_domain::config::RuntimeConfig;
use vx_domain::error::Result;
use vx_drivers::InstallOptions;
use vx_runtime::VextirRuntime;

/// Exit code returned by commands interrupted with Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Resolve the runtime configuration.
///
/// Order: explicit `--config` path, else `VEXTIR_CONFIG`, else a
/// `vextir.toml` in the working directory, else defaults — with the
/// `LIGHTNING_*` env overrides applied in every case.
pub fn load_config(path: Option<&str>) -> Result<RuntimeConfig> {
    let explicit = path
        .map(str::to_owned)
        .or_else(|| std::env::var("VEXTIR_CONFIG").ok().filter(|p| !p.is_empty()));
    match explicit {
        Some(path) => RuntimeConfig::load(Path::new(&path)),
        None => {
            let default_path = Path::new("vextir.toml");
            if default_path.exists() {
                RuntimeConfig::load(default_path)
            } else {
                Ok(RuntimeConfig::from_env())
            }
        }
    }
}

/// Build the runtime and install whichever reference drivers the
/// environment supports.
pub async fn build_runtime(config: RuntimeConfig) -> Result<VextirRuntime> {
    let runtime = VextirRuntime::initialize(config).await?;
    vx_drivers::install_default_drivers(
        runtime.drivers(),
        runtime.models().clone(),
        runtime.storage().clone(),
        runtime.event_bus().clone(),
        InstallOptions::default(),
    )
    .await?;
    Ok(runtime)
}
