// Typed change events published by the Session API after every
// successful mutation. Keyed on session id; at-least-once, best-effort
// beyond warm durability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{Message, Session};

/// Events fanned out to subscribers on the session stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: Session },
    #[serde(rename = "message.appended")]
    MessageAppended { session_id: Uuid, message: Message },
    #[serde(rename = "eval.written")]
    EvalWritten { session_id: Uuid, count: usize },
    #[serde(rename = "session.deleted")]
    SessionDeleted {
        session_id: Uuid,
        deleted_at: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Stream key: every event belongs to exactly one session.
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::SessionCreated { session } => session.id,
            SessionEvent::MessageAppended { session_id, .. } => *session_id,
            SessionEvent::EvalWritten { session_id, .. } => *session_id,
            SessionEvent::SessionDeleted { session_id, .. } => *session_id,
        }
    }

    /// Stable event name (`session.created`, `message.appended`, ...)
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionCreated { .. } => "session.created",
            SessionEvent::MessageAppended { .. } => "message.appended",
            SessionEvent::EvalWritten { .. } => "eval.written",
            SessionEvent::SessionDeleted { .. } => "session.deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn session() -> Session {
        Session {
            id: Uuid::now_v7(),
            agent_name: "support-bot".into(),
            workspace: "acme".into(),
            created_at: Utc::now(),
            message_count: 0,
            tags: vec![],
            state: SessionState::Active,
            user_id: None,
        }
    }

    #[test]
    fn test_event_type_tags() {
        let s = session();
        let event = SessionEvent::SessionCreated { session: s.clone() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.created");
        assert_eq!(event.event_type(), "session.created");
        assert_eq!(event.session_id(), s.id);
    }

    #[test]
    fn test_deleted_event_round_trip() {
        let id = Uuid::now_v7();
        let event = SessionEvent::SessionDeleted {
            session_id: id,
            deleted_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id(), id);
        assert_eq!(back.event_type(), "session.deleted");
    }
}
