//! Conversation manager.
//!
//! Owns every session and its lock.  `process_user_event` assigns the
//! next turn number under the session lock and returns the canonical
//! ordered history; `process_assistant_event` attaches replies to their
//! turn.  A background sweep expires old sessions and trims oversized
//! ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vx_domain::config::ConversationConfig;
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;

use crate::session::{ChatMessage, Session, SessionSummary};

pub struct ConversationManager {
    config: ConversationConfig,
    sessions: Arc<Mutex<HashMap<String, Arc<Mutex<Session>>>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ConversationManager {
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    fn get_or_create_session(&self, session_id: &str, user_id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| {
                tracing::info!(session_id = %session_id, user_id = %user_id, "conversation session created");
                Arc::new(Mutex::new(Session::new(session_id, user_id)))
            })
            .clone()
    }

    /// Resolve the session id for an event: explicit metadata, falling
    /// back to a per-user default session.
    fn session_id_for(event: &EventMessage) -> String {
        event
            .session_id()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("default_{}", effective_user(event)))
    }

    /// Process a user chat event: assign the next turn number and return
    /// it with the canonical conversation history.  The caller must stamp
    /// the turn number into the outgoing event's metadata.
    pub fn process_user_event(&self, event: &EventMessage) -> Result<(u32, Vec<ChatMessage>)> {
        let session_id = Self::session_id_for(event);
        let user_id = effective_user(event);
        let session = self.get_or_create_session(&session_id, &user_id);

        // The edge may send the full message history; the latest
        // user-role entry is the new message.
        let messages = event
            .data
            .get("messages")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::InvalidInput("no messages in event data".into()))?;
        let user_content = messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
            .and_then(|m| m.get("content").and_then(|c| c.as_str()))
            .ok_or_else(|| Error::InvalidInput("no user message found in messages".into()))?;

        let (turn_number, history) = session
            .lock()
            .add_user_message(user_content.to_owned(), event.id.clone());

        tracing::debug!(
            session_id = %session_id,
            turn_number,
            history_len = history.len(),
            "user message ordered"
        );
        Ok((turn_number, history))
    }

    /// Attach an assistant response event to its turn.  Returns `false`
    /// (without mutating) for duplicates and unknown turns.
    pub fn process_assistant_event(&self, event: &EventMessage, turn_number: u32) -> Result<bool> {
        let Some(session_id) = event.session_id() else {
            tracing::warn!(event_id = %event.id, "assistant event without session_id dropped");
            return Ok(false);
        };
        let session = {
            let sessions = self.sessions.lock();
            sessions.get(session_id).cloned()
        };
        let Some(session) = session else {
            tracing::warn!(session_id = %session_id, "assistant event for unknown session dropped");
            return Ok(false);
        };

        let response = event
            .data
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        let result = session
            .lock()
            .add_assistant_response(turn_number, response, event.id.clone());
        Ok(result)
    }

    /// Conversation history for a session, optionally truncated.
    pub fn history(&self, session_id: &str, up_to_turn: Option<u32>) -> Option<Vec<ChatMessage>> {
        let session = self.sessions.lock().get(session_id).cloned()?;
        let history = session.lock().history(up_to_turn);
        Some(history)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn sessions_summary(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock();
        let mut rows: Vec<SessionSummary> = sessions
            .values()
            .map(|s| {
                let session = s.lock();
                SessionSummary {
                    session_id: session.session_id.clone(),
                    user_id: session.user_id.clone(),
                    created_at: session.created_at,
                    turn_count: session.current_turn,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        rows
    }

    /// Remove sessions past the age bound; trim oversized sessions to
    /// their newest turns.  Returns the number of sessions removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        sweep_map(&self.sessions, &self.config, now)
    }

    /// Start the hourly sweep task.  Idempotent.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let sessions = self.sessions.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_map(&sessions, &config, Utc::now());
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        }));
        tracing::info!("conversation manager started");
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let sweeper = self.sweeper.lock().take();
        if let Some(task) = sweeper {
            let _ = task.await;
        }
        tracing::info!("conversation manager stopped");
    }
}

fn effective_user(event: &EventMessage) -> String {
    let user = event.effective_user_id();
    if user.is_empty() {
        "unknown".into()
    } else {
        user.to_owned()
    }
}

fn sweep_map(
    sessions: &Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    config: &ConversationConfig,
    now: DateTime<Utc>,
) -> usize {
    let max_age = chrono::Duration::hours(config.max_session_age_hours as i64);
    let mut sessions = sessions.lock();
    let before = sessions.len();
    sessions.retain(|session_id, session| {
        let mut session = session.lock();
        if session.age(now) > max_age {
            tracing::info!(session_id = %session_id, "expired conversation session removed");
            false
        } else {
            session.trim(config.max_turns_per_session);
            true
        }
    });
    before - sessions.len()
}
