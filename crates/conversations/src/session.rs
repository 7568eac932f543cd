//! A single conversation session and its turns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One chat message as carried in `data.messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A (user_message, assistant_message?) pair, numbered monotonically
/// per session.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub turn_number: u32,
    pub user_message: ChatMessage,
    pub assistant_message: Option<ChatMessage>,
    pub user_event_id: String,
    pub assistant_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Seconds between the user message and the assistant reply.
    pub processing_time: Option<f64>,
}

/// Session state.  Callers hold the per-session lock (owned by the
/// manager) while mutating.
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<ConversationTurn>,
    pub current_turn: u32,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            turns: Vec::new(),
            current_turn: 0,
        }
    }

    /// Append a user message as the next turn.  Returns the turn number
    /// and the full conversation history up to and including this turn.
    pub fn add_user_message(
        &mut self,
        content: String,
        event_id: String,
    ) -> (u32, Vec<ChatMessage>) {
        self.current_turn += 1;
        self.turns.push(ConversationTurn {
            turn_number: self.current_turn,
            user_message: ChatMessage::user(content),
            assistant_message: None,
            user_event_id: event_id,
            assistant_event_id: None,
            created_at: Utc::now(),
            processing_time: None,
        });
        (self.current_turn, self.history(None))
    }

    /// Attach the assistant reply to a turn.  Returns `false` when the
    /// turn does not exist or already has a reply.
    pub fn add_assistant_response(
        &mut self,
        turn_number: u32,
        content: String,
        event_id: String,
    ) -> bool {
        let Some(turn) = self
            .turns
            .iter_mut()
            .find(|t| t.turn_number == turn_number)
        else {
            tracing::warn!(
                session_id = %self.session_id,
                turn_number,
                "assistant reply for unknown turn dropped"
            );
            return false;
        };
        if turn.assistant_message.is_some() {
            tracing::warn!(
                session_id = %self.session_id,
                turn_number,
                "duplicate assistant reply ignored"
            );
            return false;
        }
        turn.assistant_message = Some(ChatMessage::assistant(content));
        turn.assistant_event_id = Some(event_id);
        turn.processing_time = Some(
            (Utc::now() - turn.created_at).num_milliseconds() as f64 / 1000.0,
        );
        true
    }

    /// Conversation history up to `up_to_turn` (or everything).
    pub fn history(&self, up_to_turn: Option<u32>) -> Vec<ChatMessage> {
        let max_turn = up_to_turn.unwrap_or(self.current_turn);
        let mut messages = Vec::new();
        for turn in &self.turns {
            if turn.turn_number > max_turn {
                break;
            }
            messages.push(turn.user_message.clone());
            if let Some(assistant) = &turn.assistant_message {
                messages.push(assistant.clone());
            }
        }
        messages
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Keep only the newest `max_turns` turns.
    pub fn trim(&mut self, max_turns: usize) {
        if self.turns.len() > max_turns {
            let drop = self.turns.len() - max_turns;
            self.turns.drain(..drop);
        }
    }
}

/// Read-only session row for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub turn_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_numbers_are_monotonic() {
        let mut session = Session::new("s1", "u1");
        let (t1, history) = session.add_user_message("A".into(), "e1".into());
        assert_eq!(t1, 1);
        assert_eq!(history.len(), 1);

        let (t2, history) = session.add_user_message("B".into(), "e2".into());
        assert_eq!(t2, 2);
        // History: user A, user B (no assistant yet).
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn assistant_reply_rules() {
        let mut session = Session::new("s1", "u1");
        session.add_user_message("A".into(), "e1".into());
        session.add_user_message("B".into(), "e2".into());

        // Out-of-order accept: replying to turn 2 before turn 1 is fine.
        assert!(session.add_assistant_response(2, "reply B".into(), "e3".into()));
        // Duplicate reply for the same turn is rejected without mutation.
        assert!(!session.add_assistant_response(2, "reply B again".into(), "e4".into()));
        assert_eq!(
            session.turns[1].assistant_message.as_ref().map(|m| m.content.as_str()),
            Some("reply B")
        );
        // Unknown turn is rejected.
        assert!(!session.add_assistant_response(9, "ghost".into(), "e5".into()));

        assert!(session.add_assistant_response(1, "reply A".into(), "e6".into()));
        let history = session.history(None);
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["A", "reply A", "B", "reply B"]);
    }

    #[test]
    fn history_truncates_by_turn() {
        let mut session = Session::new("s1", "u1");
        session.add_user_message("A".into(), "e1".into());
        session.add_assistant_response(1, "reply A".into(), "e2".into());
        session.add_user_message("B".into(), "e3".into());

        let up_to_first = session.history(Some(1));
        assert_eq!(up_to_first.len(), 2);
    }

    #[test]
    fn trim_keeps_the_tail() {
        let mut session = Session::new("s1", "u1");
        for i in 0..10 {
            session.add_user_message(format!("m{i}"), format!("e{i}"));
        }
        session.trim(3);
        assert_eq!(session.turns.len(), 3);
        assert_eq!(session.turns[0].turn_number, 8);
        // The counter keeps increasing past a trim.
        let (t, _) = session.add_user_message("next".into(), "en".into());
        assert_eq!(t, 11);
    }
}
