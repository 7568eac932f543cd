//! Event processing monitor.
//!
//! Periodic reports over the processor's counters and the bus's orphan
//! and dead-letter stores: a weighted health score, per-type orphan
//! summaries with remediation advice, and top event/error breakdowns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use vx_bus::EventBus;
use vx_domain::error::Result;
use vx_domain::health::HealthStatus;

use crate::processor::{ProcessorMetrics, UniversalProcessor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Report types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub health_score: i64,
    pub metrics: ProcessorMetrics,
    pub orphaned_event_count: usize,
    pub dead_letter_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanTypeSummary {
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sample_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanSummary {
    pub total_count: usize,
    pub by_event_type: HashMap<String, OrphanTypeSummary>,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub metrics: ProcessorMetrics,
    pub success_count: u64,
    pub success_rate: f64,
    pub top_event_types: Vec<TypeCount>,
    pub top_error_types: Vec<TypeCount>,
    pub top_orphaned_types: Vec<TypeCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub drained_count: usize,
    pub orphaned_before: usize,
    pub orphaned_after: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventMonitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventMonitor {
    bus: Arc<dyn EventBus>,
    processor: Arc<UniversalProcessor>,
}

impl EventMonitor {
    pub fn new(bus: Arc<dyn EventBus>, processor: Arc<UniversalProcessor>) -> Self {
        Self { bus, processor }
    }

    /// Overall processing health: a 0–100 score with deductions for
    /// error rate (>10%), orphan rate (>20%), and dead-letter depth.
    pub async fn health_status(&self) -> Result<HealthReport> {
        let metrics = self.processor.metrics();
        let orphaned = self.bus.get_orphaned_events(Some(100)).await?.len();
        let dead_letters = self.bus.get_dead_letter_events(Some(100)).await?.len();

        let mut score: i64 = 100;
        if metrics.error_rate > 0.1 {
            score -= ((metrics.error_rate * 100.0) as i64).min(30);
        }
        if metrics.orphan_rate > 0.2 {
            score -= ((metrics.orphan_rate * 100.0) as i64).min(40);
        }
        if dead_letters > 50 {
            score -= 20;
        } else if dead_letters > 10 {
            score -= 10;
        }

        let status = if score >= 80 {
            HealthStatus::Healthy
        } else if score >= 50 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        Ok(HealthReport {
            status,
            health_score: score,
            metrics,
            orphaned_event_count: orphaned,
            dead_letter_count: dead_letters,
            timestamp: Utc::now(),
        })
    }

    /// Orphan records grouped by event type with remediation advice.
    pub async fn orphan_summary(&self) -> Result<OrphanSummary> {
        let orphaned = self.bus.get_orphaned_events(None).await?;
        let mut by_event_type: HashMap<String, OrphanTypeSummary> = HashMap::new();

        for record in &orphaned {
            let entry = by_event_type
                .entry(record.event.event_type.clone())
                .or_insert_with(|| OrphanTypeSummary {
                    count: 0,
                    first_seen: record.event.timestamp,
                    last_seen: record.event.timestamp,
                    sample_ids: Vec::new(),
                });
            entry.count += 1;
            entry.first_seen = entry.first_seen.min(record.event.timestamp);
            entry.last_seen = entry.last_seen.max(record.event.timestamp);
            if entry.sample_ids.len() < 5 {
                entry.sample_ids.push(record.event.id.clone());
            }
        }

        let recommendation = orphan_recommendation(&by_event_type);
        Ok(OrphanSummary {
            total_count: orphaned.len(),
            by_event_type,
            recommendation,
        })
    }

    /// Detailed metrics with success rate and top-5 breakdowns.
    pub fn processing_metrics(&self) -> ProcessingReport {
        let metrics = self.processor.metrics();
        let success_count = metrics
            .total_events
            .saturating_sub(metrics.total_errors)
            .saturating_sub(metrics.total_orphaned);
        let success_rate = success_count as f64 / metrics.total_events.max(1) as f64;
        ProcessingReport {
            success_count,
            success_rate,
            top_event_types: top_counts(&metrics.event_types, 5),
            top_error_types: top_counts(&metrics.error_types, 5),
            top_orphaned_types: top_counts(&metrics.orphaned_types, 5),
            metrics,
        }
    }

    /// Drain orphaned events older than `older_than_hours`, optionally
    /// narrowed to specific types.
    pub async fn cleanup_orphaned_events(
        &self,
        event_types: Option<&[String]>,
        older_than_hours: i64,
    ) -> Result<CleanupReport> {
        let before = Utc::now() - chrono::Duration::hours(older_than_hours);
        let orphaned_before = self.bus.get_orphaned_events(None).await?.len();
        let drained_count = self
            .bus
            .drain_orphaned_events(event_types, Some(before))
            .await?;
        let orphaned_after = self.bus.get_orphaned_events(None).await?.len();
        Ok(CleanupReport {
            drained_count,
            orphaned_before,
            orphaned_after,
        })
    }

    /// Periodic logging loop; runs until the token is cancelled.
    pub async fn run_continuous(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.health_status().await {
                        Ok(report) => match report.status {
                            HealthStatus::Unhealthy => tracing::error!(
                                score = report.health_score,
                                "event processing unhealthy"
                            ),
                            HealthStatus::Degraded => tracing::warn!(
                                score = report.health_score,
                                "event processing degraded"
                            ),
                            HealthStatus::Healthy => tracing::debug!(
                                score = report.health_score,
                                total_events = report.metrics.total_events,
                                "event processing healthy"
                            ),
                        },
                        Err(e) => tracing::warn!(error = %e, "health report failed"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }
}

fn orphan_recommendation(by_type: &HashMap<String, OrphanTypeSummary>) -> String {
    if by_type.is_empty() {
        return "No orphaned events detected. System is healthy.".into();
    }
    let mut recommendations: Vec<String> = Vec::new();
    let mut types: Vec<(&String, &OrphanTypeSummary)> = by_type.iter().collect();
    types.sort_by(|a, b| b.1.count.cmp(&a.1.count));
    for (event_type, info) in types {
        if info.count > 100 {
            recommendations.push(format!(
                "High volume of orphaned '{event_type}' events ({}). \
                 Consider registering a driver or subscriber for this event type.",
                info.count
            ));
        } else if info.count > 10 {
            recommendations.push(format!(
                "Moderate orphaned '{event_type}' events ({}). \
                 Review if this event type is still needed.",
                info.count
            ));
        }
    }
    if recommendations.is_empty() {
        "Low volume of orphaned events. Consider periodic cleanup.".into()
    } else {
        recommendations.join(" ")
    }
}

fn top_counts(counts: &HashMap<String, u64>, limit: usize) -> Vec<TypeCount> {
    let mut rows: Vec<TypeCount> = counts
        .iter()
        .map(|(name, count)| TypeCount {
            name: name.clone(),
            count: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(&b.name)));
    rows.truncate(limit);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vx_bus::LocalEventBus;
    use vx_conversations::ConversationManager;
    use vx_domain::config::ConversationConfig;
    use vx_domain::event::EventMessage;
    use vx_registry::DriverRegistry;

    async fn setup() -> (Arc<LocalEventBus>, Arc<UniversalProcessor>, EventMonitor) {
        let bus = Arc::new(LocalEventBus::with_defaults());
        bus.start().await.unwrap();
        let processor = Arc::new(UniversalProcessor::new(
            bus.clone(),
            Arc::new(DriverRegistry::new()),
            Arc::new(ConversationManager::new(ConversationConfig::default())),
        ));
        let monitor = EventMonitor::new(bus.clone(), processor.clone());
        (bus, processor, monitor)
    }

    #[tokio::test]
    async fn health_report_reflects_orphans() {
        let (bus, processor, monitor) = setup().await;

        for i in 0..3 {
            processor
                .process_event(EventMessage::new(
                    "test.orphan.monitor",
                    json!({"index": i}),
                ))
                .await
                .unwrap();
        }

        let report = monitor.health_status().await.unwrap();
        assert!(report.orphaned_event_count >= 3);
        // 100% orphan rate deducts the capped 40 points.
        assert_eq!(report.health_score, 60);
        assert_eq!(report.status, HealthStatus::Degraded);

        let summary = monitor.orphan_summary().await.unwrap();
        assert_eq!(summary.total_count, 3);
        assert!(summary.by_event_type.contains_key("test.orphan.monitor"));
        assert!(!summary.recommendation.is_empty());

        let cleanup = monitor
            .cleanup_orphaned_events(Some(&["test.orphan.monitor".into()]), -1)
            .await
            .unwrap();
        assert_eq!(cleanup.drained_count, 3);
        assert_eq!(cleanup.orphaned_after, 0);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn clean_system_reports_healthy() {
        let (bus, _processor, monitor) = setup().await;
        let report = monitor.health_status().await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.health_score, 100);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn processing_report_computes_success_rate() {
        let (bus, processor, monitor) = setup().await;

        // One orphan, no successes.
        processor
            .process_event(EventMessage::new("lonely.event", json!({})))
            .await
            .unwrap();

        let report = monitor.processing_metrics();
        assert_eq!(report.success_count, 0);
        assert_eq!(report.top_event_types[0].name, "lonely.event");
        assert_eq!(report.top_orphaned_types.len(), 1);
        bus.stop().await.unwrap();
    }

    #[test]
    fn recommendation_thresholds() {
        let mut by_type = HashMap::new();
        assert!(orphan_recommendation(&by_type).contains("healthy"));

        by_type.insert(
            "noisy.type".to_string(),
            OrphanTypeSummary {
                count: 150,
                first_seen: Utc::now(),
                last_seen: Utc::now(),
                sample_ids: vec![],
            },
        );
        let advice = orphan_recommendation(&by_type);
        assert!(advice.contains("registering a driver"));
        assert!(advice.contains("noisy.type"));
    }
}
