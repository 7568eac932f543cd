//! `vextir status` — driver status and health summary.

use std::sync::Arc;

use vx_bus::EventBus;
use vx_runtime::VextirRuntime;
use vx_storage::StorageProvider;

use crate::commands::StatusArgs;

const GREEN: &str = "\x1B[32m";
const YELLOW: &str = "\x1B[33m";
const RED: &str = "\x1B[31m";
const BOLD: &str = "\x1B[1m";
const RESET: &str = "\x1B[0m";

pub async fn run(runtime: &Arc<VextirRuntime>, _args: StatusArgs) -> anyhow::Result<i32> {
    println!("{BOLD}Drivers{RESET}");
    let drivers = runtime.drivers().list(None);
    if drivers.is_empty() {
        println!("  (none registered)");
    }
    let mut running = 0usize;
    for driver in &drivers {
        let color = match driver.status {
            vx_registry::DriverStatus::Running => {
                running += 1;
                GREEN
            }
            vx_registry::DriverStatus::Failed => RED,
            _ => YELLOW,
        };
        println!("  • {}: {color}{}{RESET}", driver.name, driver.status);
        for capability in &driver.capabilities {
            println!("      - {capability}");
        }
        if let Some(error) = &driver.last_error {
            println!("      {RED}last error: {error}{RESET}");
        }
    }

    println!();
    println!("{BOLD}Event processing{RESET}");
    let report = runtime.monitor().health_status().await?;
    let status_color = match report.status {
        vx_domain::health::HealthStatus::Healthy => GREEN,
        vx_domain::health::HealthStatus::Degraded => YELLOW,
        vx_domain::health::HealthStatus::Unhealthy => RED,
    };
    println!(
        "  • health: {status_color}{}{RESET} (score {})",
        report.status, report.health_score
    );
    println!("  • events processed: {}", report.metrics.total_events);
    println!("  • orphaned: {}", report.orphaned_event_count);
    println!("  • dead letters: {}", report.dead_letter_count);

    let bus_health = runtime.event_bus().health_check().await?;
    println!();
    println!("{BOLD}Providers{RESET}");
    println!("  • event bus: {}", bus_health.status);
    let storage_health = runtime.storage().health_check().await?;
    println!("  • storage: {}", storage_health.status);
    for provider in runtime.provider_statuses() {
        println!(
            "  • breaker[{}]: {} (failures: {})",
            provider.name, provider.breaker.state, provider.breaker.failure_count
        );
    }

    println!();
    println!("{BOLD}Summary{RESET}");
    println!("  • total drivers: {}", drivers.len());
    println!("  • running: {running}");
    if std::env::var("OPENAI_API_KEY").map(|k| !k.is_empty()).unwrap_or(false) {
        println!("  • OpenAI API: {GREEN}configured{RESET}");
    } else {
        println!("  • OpenAI API: {RED}missing key{RESET}");
    }

    Ok(0)
}
