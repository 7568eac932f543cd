//! Job scheduler driver.
//!
//! Consumes `plan.schedule` events to create and cancel jobs.  A job
//! fires either on a 5-field cron expression (evaluated in UTC), on a
//! repeating ISO-8601 interval, or once at an absolute time.  Job state
//! is persisted in the `schedules` container (`pk = user_id`) so a
//! restart resumes pending jobs.  A background tick queries due jobs,
//! publishes their events, and advances or deletes them.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vx_bus::EventBus;
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_registry::{Driver, DriverKind, DriverManifest};
use vx_storage::{Document, QueryPredicate, StorageProvider};

pub const SCHEDULES_CONTAINER: &str = "schedules";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron evaluator (5-field: min hour dom month dow, UTC)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        if let Ok(n) = step.parse::<u32>() {
            return n > 0 && value % n == 0;
        }
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start_s.parse::<u32>(), end_s.parse::<u32>()) {
                if value >= start && value <= end {
                    return true;
                }
            }
        } else if let Ok(n) = part.parse::<u32>() {
            if value == n {
                return true;
            }
        }
    }
    false
}

/// Validate a 5-field cron expression.
pub fn validate_cron(cron: &str) -> Result<()> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::InvalidInput(format!(
            "cron: expected 5 fields (minute hour dom month dow), got {}",
            fields.len()
        )));
    }
    let names = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];
    for (i, field) in fields.iter().enumerate() {
        validate_cron_field(field, names[i], ranges[i].0, ranges[i].1)?;
    }
    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<()> {
    if field == "*" {
        return Ok(());
    }
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().map_err(|_| {
            Error::InvalidInput(format!("cron {name}: invalid step '*/{step}'"))
        })?;
        if n == 0 || n > max {
            return Err(Error::InvalidInput(format!(
                "cron {name}: step {n} out of range 1..={max}"
            )));
        }
        return Ok(());
    }
    for part in field.split(',') {
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: u32 = start_s.parse().map_err(|_| {
                Error::InvalidInput(format!("cron {name}: invalid range start '{start_s}'"))
            })?;
            let end: u32 = end_s.parse().map_err(|_| {
                Error::InvalidInput(format!("cron {name}: invalid range end '{end_s}'"))
            })?;
            if start < min || end > max || start > end {
                return Err(Error::InvalidInput(format!(
                    "cron {name}: range {start}-{end} out of bounds {min}..={max}"
                )));
            }
        } else {
            let n: u32 = part.parse().map_err(|_| {
                Error::InvalidInput(format!("cron {name}: invalid value '{part}'"))
            })?;
            if n < min || n > max {
                return Err(Error::InvalidInput(format!(
                    "cron {name}: value {n} out of range {min}..={max}"
                )));
            }
        }
    }
    Ok(())
}

fn cron_matches(cron: &str, dt: &DateTime<Utc>) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], dt.minute())
        && cron_field_matches(fields[1], dt.hour())
        && cron_field_matches(fields[2], dt.day())
        && cron_field_matches(fields[3], dt.month())
        && cron_field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Next occurrence strictly after `after`, scanning minute by minute for
/// up to one year.
pub fn cron_next(cron: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut candidate = (*after + Duration::seconds(60 - after.second() as i64))
        .with_second(0)?
        .with_nanosecond(0)?;
    let max_checks = 366 * 24 * 60;
    for _ in 0..max_checks {
        if cron_matches(cron, &candidate) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ISO-8601 durations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse an ISO-8601 duration (`PnW` or `PnDTnHnMnS` subset, integer
/// designators only).
pub fn parse_iso_duration(raw: &str) -> Result<Duration> {
    let bad = || Error::InvalidInput(format!("invalid ISO-8601 duration: {raw}"));
    let rest = raw.strip_prefix('P').ok_or_else(bad)?;
    if rest.is_empty() {
        return Err(bad());
    }

    if let Some(weeks) = rest.strip_suffix('W') {
        let n: i64 = weeks.parse().map_err(|_| bad())?;
        return Ok(Duration::weeks(n));
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total = Duration::zero();
    let mut number = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else if c == 'D' {
            let n: i64 = number.parse().map_err(|_| bad())?;
            total = total + Duration::days(n);
            number.clear();
        } else {
            return Err(bad());
        }
    }
    if !number.is_empty() {
        return Err(bad());
    }
    for c in time_part.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else {
            let n: i64 = number.parse().map_err(|_| bad())?;
            total = total
                + match c {
                    'H' => Duration::hours(n),
                    'M' => Duration::minutes(n),
                    'S' => Duration::seconds(n),
                    _ => return Err(bad()),
                };
            number.clear();
        }
    }
    if !number.is_empty() {
        return Err(bad());
    }
    if total <= Duration::zero() {
        return Err(bad());
    }
    Ok(total)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SchedulerDriver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SchedulerDriver {
    manifest: DriverManifest,
    storage: Arc<dyn StorageProvider>,
    bus: Arc<dyn EventBus>,
    tick_interval: StdDuration,
    ticker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl SchedulerDriver {
    pub fn new(storage: Arc<dyn StorageProvider>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            manifest: DriverManifest::new("scheduler", "Job Scheduler", DriverKind::Scheduler)
                .with_capability("plan.schedule")
                .with_capability("time.cron")
                .with_description("Cron and interval jobs persisted in storage"),
            storage,
            bus,
            tick_interval: StdDuration::from_secs(30),
            ticker: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tick_interval(mut self, interval: StdDuration) -> Self {
        self.tick_interval = interval;
        self
    }

    fn create_job(&self, event: &EventMessage) -> Result<(Document, DateTime<Utc>)> {
        let schedule = event
            .data
            .get("schedule")
            .ok_or_else(|| Error::InvalidInput("plan.schedule event has no schedule".into()))?;
        let name = schedule
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::InvalidInput("schedule has no name".into()))?;

        let cron = schedule.get("cron").and_then(|c| c.as_str());
        let interval = schedule.get("interval").and_then(|i| i.as_str());
        let run_at = schedule.get("run_at").and_then(|r| r.as_str());
        let now = Utc::now();

        let (next_run, interval_seconds) = match (cron, interval, run_at) {
            (Some(cron), None, None) => {
                validate_cron(cron)?;
                let next = cron_next(cron, &now).ok_or_else(|| {
                    Error::InvalidInput(format!("cron '{cron}' never fires"))
                })?;
                (next, None)
            }
            (None, Some(interval), None) => {
                let step = parse_iso_duration(interval)?;
                (now + step, Some(step.num_seconds()))
            }
            (None, None, Some(run_at)) => {
                let at = DateTime::parse_from_rfc3339(run_at)
                    .map_err(|e| Error::InvalidInput(format!("invalid run_at: {e}")))?
                    .with_timezone(&Utc);
                (at, None)
            }
            _ => {
                return Err(Error::InvalidInput(
                    "schedule needs exactly one of cron, interval, or run_at".into(),
                ))
            }
        };

        // The job fires either the embedded event or `event.<name>`.
        let fired_event = schedule
            .get("event")
            .cloned()
            .unwrap_or_else(|| json!({"type": format!("event.{name}"), "data": {}}));

        let user_id = effective_user(event);
        let job_id = uuid::Uuid::new_v4().to_string();
        let mut doc = Document::new(job_id, user_id)
            .with_attribute("name", json!(name))
            .with_attribute("event_json", json!(fired_event.to_string()))
            .with_attribute("run_at", json!(next_run.to_rfc3339()));
        if let Some(cron) = cron {
            doc = doc.with_attribute("cron", json!(cron));
        }
        if let Some(seconds) = interval_seconds {
            doc = doc.with_attribute("interval_seconds", json!(seconds));
        }
        Ok((doc, next_run))
    }

    /// Query due jobs, publish their events, and advance or delete them.
    pub async fn tick(&self) -> Result<usize> {
        run_due_jobs(&self.storage, &self.bus).await
    }
}

/// One tick of the schedule loop.
async fn run_due_jobs(
    storage: &Arc<dyn StorageProvider>,
    bus: &Arc<dyn EventBus>,
) -> Result<usize> {
    let now = Utc::now();
    let due = storage
        .query(
            SCHEDULES_CONTAINER,
            QueryPredicate::all().less_or_equal("run_at", json!(now.to_rfc3339())),
            None,
            None,
            None,
        )
        .await?;

    let mut fired = 0usize;
    for job in due {
        if let Err(e) = fire_job(storage, bus, &job, now).await {
            tracing::warn!(job_id = %job.id, error = %e, "scheduled job failed to fire");
        } else {
            fired += 1;
        }
    }
    Ok(fired)
}

async fn fire_job(
    storage: &Arc<dyn StorageProvider>,
    bus: &Arc<dyn EventBus>,
    job: &Document,
    now: DateTime<Utc>,
) -> Result<()> {
    let raw = job
        .attribute_str("event_json")
        .ok_or_else(|| Error::Internal(format!("job {} has no event", job.id)))?;
    let template: Value = serde_json::from_str(raw)?;

    let event_type = template
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("event.unnamed")
        .to_owned();
    let data = template.get("data").cloned().unwrap_or(json!({}));
    let run_at = job.attribute_str("run_at").unwrap_or_default().to_owned();

    let mut event = EventMessage::new(event_type, data)
        .with_source("scheduler")
        .with_user_id(job.partition_key.clone())
        // One firing window, one delivery: identical payloads from
        // successive windows must not collapse in the dedup cache.
        .with_idempotency_key(format!("{}:{run_at}", job.id));
    if let Some(metadata) = template.get("metadata").and_then(|m| m.as_object()) {
        for (key, value) in metadata {
            event.metadata.insert(key.clone(), value.clone());
        }
    }
    bus.publish(event, None).await?;

    tracing::info!(
        job_id = %job.id,
        name = job.attribute_str("name").unwrap_or("?"),
        "scheduled job fired"
    );

    // Advance recurring jobs; delete one-shots.
    let next = if let Some(cron) = job.attribute_str("cron") {
        cron_next(cron, &now)
    } else if let Some(seconds) = job.attribute("interval_seconds").and_then(Value::as_i64) {
        Some(now + Duration::seconds(seconds))
    } else {
        None
    };

    match next {
        Some(next_run) => {
            let mut updated = job.clone();
            updated
                .attributes
                .insert("run_at".into(), json!(next_run.to_rfc3339()));
            storage.update(SCHEDULES_CONTAINER, updated).await?;
        }
        None => {
            storage
                .delete(SCHEDULES_CONTAINER, &job.id, Some(&job.partition_key))
                .await?;
        }
    }
    Ok(())
}

fn effective_user(event: &EventMessage) -> String {
    let user = event.effective_user_id();
    if user.is_empty() {
        "system".into()
    } else {
        user.to_owned()
    }
}

#[async_trait::async_trait]
impl Driver for SchedulerDriver {
    fn manifest(&self) -> &DriverManifest {
        &self.manifest
    }

    async fn initialize(&self) -> Result<()> {
        self.storage
            .create_container_if_not_exists(SCHEDULES_CONTAINER)
            .await?;

        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }
        let storage = self.storage.clone();
        let bus = self.bus.clone();
        let interval = self.tick_interval;
        let cancel = self.cancel.clone();
        *ticker = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = run_due_jobs(&storage, &bus).await {
                            tracing::warn!(error = %e, "scheduler tick failed");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        }));
        Ok(())
    }

    async fn handle(&self, event: &EventMessage) -> Result<Vec<EventMessage>> {
        if event.event_type != "plan.schedule" {
            return Ok(Vec::new());
        }

        let action = event
            .data
            .get("action")
            .and_then(|a| a.as_str())
            .unwrap_or("create");

        match action {
            "create" => {
                let (doc, next_run) = self.create_job(event)?;
                let job_id = doc.id.clone();
                self.storage.create(SCHEDULES_CONTAINER, doc).await?;

                let mut response = EventMessage::new(
                    "plan.schedule.response",
                    json!({
                        "job_id": job_id,
                        "status": "scheduled",
                        "next_run": next_run.to_rfc3339(),
                    }),
                )
                .with_source(self.manifest.id.clone());
                response.user_id = event.user_id.clone();
                if let Some(request_id) = event.metadata.get("request_id") {
                    response
                        .metadata
                        .insert("request_id".into(), request_id.clone());
                }
                Ok(vec![response])
            }
            "cancel" => {
                let job_id = event
                    .data
                    .get("job_id")
                    .and_then(|j| j.as_str())
                    .ok_or_else(|| Error::InvalidInput("cancel needs a job_id".into()))?;
                self.storage
                    .delete(SCHEDULES_CONTAINER, job_id, Some(&effective_user(event)))
                    .await?;
                Ok(vec![EventMessage::new(
                    "plan.schedule.response",
                    json!({"job_id": job_id, "status": "cancelled"}),
                )
                .with_source(self.manifest.id.clone())])
            }
            other => Err(Error::InvalidInput(format!(
                "unknown schedule action: {other}"
            ))),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let ticker = self.ticker.lock().take();
        if let Some(task) = ticker {
            let _ = task.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vx_bus::{handler_fn, LocalEventBus, SubscribeOptions};
    use vx_storage::MemoryStorageProvider;

    #[test]
    fn cron_field_syntax() {
        assert!(cron_field_matches("*", 7));
        assert!(cron_field_matches("*/5", 10));
        assert!(!cron_field_matches("*/5", 7));
        assert!(cron_field_matches("1,3,5", 3));
        assert!(!cron_field_matches("1,3,5", 4));
        assert!(cron_field_matches("10-20", 15));
        assert!(!cron_field_matches("10-20", 25));
        assert!(cron_field_matches("1-3,7", 7));
    }

    #[test]
    fn cron_validation() {
        assert!(validate_cron("*/5 * * * *").is_ok());
        assert!(validate_cron("0 9 * * 1-5").is_ok());
        assert!(validate_cron("bad").is_err());
        assert!(validate_cron("60 * * * *").is_err());
        assert!(validate_cron("* 24 * * *").is_err());
        assert!(validate_cron("* * * * 7").is_err());
        assert!(validate_cron("5-1 * * * *").is_err());
    }

    #[test]
    fn cron_next_occurrence() {
        // 2026-01-15 is a Thursday.
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 10, 7, 30).unwrap();

        let next = cron_next("*/15 * * * *", &after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 10, 15, 0).unwrap());

        let next = cron_next("0 9 * * *", &after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 9, 0, 0).unwrap());

        // Friday at noon.
        let next = cron_next("0 12 * * 5", &after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 16, 12, 0, 0).unwrap());
    }

    #[test]
    fn iso_duration_parsing() {
        assert_eq!(parse_iso_duration("PT30S").unwrap(), Duration::seconds(30));
        assert_eq!(parse_iso_duration("PT5M").unwrap(), Duration::minutes(5));
        assert_eq!(
            parse_iso_duration("PT1H30M").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(
            parse_iso_duration("P1DT12H").unwrap(),
            Duration::hours(36)
        );
        assert_eq!(parse_iso_duration("P2W").unwrap(), Duration::weeks(2));
        assert!(parse_iso_duration("PT").is_err());
        assert!(parse_iso_duration("30S").is_err());
        assert!(parse_iso_duration("P-1D").is_err());
        assert!(parse_iso_duration("PT0S").is_err());
    }

    async fn setup() -> (Arc<MemoryStorageProvider>, Arc<LocalEventBus>, SchedulerDriver) {
        let storage = Arc::new(MemoryStorageProvider::new());
        let bus = Arc::new(LocalEventBus::with_defaults());
        bus.start().await.unwrap();
        let driver = SchedulerDriver::new(storage.clone(), bus.clone());
        driver.storage.create_container_if_not_exists(SCHEDULES_CONTAINER).await.unwrap();
        (storage, bus, driver)
    }

    fn schedule_event(schedule: Value) -> EventMessage {
        EventMessage::new("plan.schedule", json!({"schedule": schedule}))
            .with_user_id("u1")
    }

    #[tokio::test]
    async fn create_persists_a_cron_job() {
        let (storage, bus, driver) = setup().await;

        let outputs = driver
            .handle(&schedule_event(json!({
                "name": "nightly",
                "cron": "0 3 * * *",
                "event": {"type": "report.generate", "data": {"kind": "nightly"}}
            })))
            .await
            .unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].data.get("status"), Some(&json!("scheduled")));

        let jobs = storage
            .query(SCHEDULES_CONTAINER, QueryPredicate::all(), Some("u1"), None, None)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].attribute_str("cron"), Some("0 3 * * *"));
        assert!(jobs[0].attribute_str("run_at").is_some());
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_schedules_are_rejected() {
        let (_storage, bus, driver) = setup().await;

        // No variant chosen.
        let err = driver
            .handle(&schedule_event(json!({"name": "empty"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Two variants chosen.
        let err = driver
            .handle(&schedule_event(json!({
                "name": "both", "cron": "* * * * *", "interval": "PT5M"
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Bad cron.
        let err = driver
            .handle(&schedule_event(json!({"name": "bad", "cron": "99 * * * *"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn tick_fires_due_one_shot_and_deletes_it() {
        let (storage, bus, driver) = setup().await;

        let seen = Arc::new(Mutex::new(Vec::<EventMessage>::new()));
        let sink = seen.clone();
        bus.subscribe(
            "report.generate",
            handler_fn(move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(event);
                    Ok(())
                }
            }),
            SubscribeOptions::default(),
        )
        .await
        .unwrap();

        // A one-shot job already due.
        let doc = Document::new("job1", "u1")
            .with_attribute("name", json!("report"))
            .with_attribute(
                "event_json",
                json!(r#"{"type":"report.generate","data":{"kind":"adhoc"}}"#),
            )
            .with_attribute(
                "run_at",
                json!((Utc::now() - Duration::minutes(1)).to_rfc3339()),
            );
        storage.create(SCHEDULES_CONTAINER, doc).await.unwrap();

        let fired = driver.tick().await.unwrap();
        assert_eq!(fired, 1);
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        let received = seen.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].data.get("kind"), Some(&json!("adhoc")));
        assert_eq!(received[0].user_id, "u1");
        drop(received);

        // One-shot jobs are deleted after firing.
        assert!(storage
            .get(SCHEDULES_CONTAINER, "job1", Some("u1"))
            .await
            .unwrap()
            .is_none());

        // Nothing left to fire.
        assert_eq!(driver.tick().await.unwrap(), 0);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn tick_advances_recurring_jobs() {
        let (storage, bus, driver) = setup().await;

        let doc = Document::new("job2", "u1")
            .with_attribute("name", json!("heartbeat"))
            .with_attribute(
                "event_json",
                json!(r#"{"type":"event.heartbeat","data":{}}"#),
            )
            .with_attribute(
                "run_at",
                json!((Utc::now() - Duration::minutes(1)).to_rfc3339()),
            )
            .with_attribute("interval_seconds", json!(3600));
        storage.create(SCHEDULES_CONTAINER, doc).await.unwrap();

        driver.tick().await.unwrap();

        // The job survived with a future run_at.
        let job = storage
            .get(SCHEDULES_CONTAINER, "job2", Some("u1"))
            .await
            .unwrap()
            .unwrap();
        let next: DateTime<Utc> = job
            .attribute_str("run_at")
            .unwrap()
            .parse()
            .unwrap();
        assert!(next > Utc::now());
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_removes_the_job() {
        let (storage, bus, driver) = setup().await;

        let outputs = driver
            .handle(&schedule_event(json!({"name": "tmp", "interval": "PT1H"})))
            .await
            .unwrap();
        let job_id = outputs[0]
            .data
            .get("job_id")
            .and_then(|j| j.as_str())
            .unwrap()
            .to_owned();

        let cancel = EventMessage::new(
            "plan.schedule",
            json!({"action": "cancel", "job_id": job_id}),
        )
        .with_user_id("u1");
        let outputs = driver.handle(&cancel).await.unwrap();
        assert_eq!(outputs[0].data.get("status"), Some(&json!("cancelled")));

        assert!(storage
            .get(SCHEDULES_CONTAINER, &job_id, Some("u1"))
            .await
            .unwrap()
            .is_none());
        bus.stop().await.unwrap();
    }
}
