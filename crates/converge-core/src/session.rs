// Session, message, and eval-result domain types.
//
// These are the records the tiered store persists and the Session API
// serves. A session owns its messages and eval results; deleting the
// session cascades to both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::protocol::{ToolCall, ToolResult};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Conversation in progress
    Active,
    /// No recent activity; still resumable
    Idle,
    /// Ended; no further messages accepted
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Active => write!(f, "active"),
            SessionState::Idle => write!(f, "idle"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

impl From<&str> for SessionState {
    fn from(s: &str) -> Self {
        match s {
            "idle" => SessionState::Idle,
            "closed" => SessionState::Closed,
            _ => SessionState::Active,
        }
    }
}

/// One conversation with a deployed agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier (client-supplied or server-issued v7)
    pub id: Uuid,
    /// Name of the agent serving this conversation
    pub agent_name: String,
    /// Workspace the agent belongs to
    pub workspace: String,
    pub created_at: DateTime<Utc>,
    /// Number of messages appended so far
    pub message_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub state: SessionState,
    /// End-user subject, when the facade knows one. Links the session to
    /// privacy preferences and erasure requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Role of a message within a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::ToolCall => write!(f, "tool_call"),
            MessageRole::ToolResult => write!(f, "tool_result"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool_call" => Ok(MessageRole::ToolCall),
            "tool_result" => Ok(MessageRole::ToolResult),
            "system" => Ok(MessageRole::System),
            other => Err(crate::CoreError::validation(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

/// One turn element in a session transcript.
///
/// Messages are ordered per session by `(created_at, id)`; ids are v7 so
/// the pair is strictly increasing for serialized appends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of one evaluation over a session or a single message.
///
/// An empty `message_id` denotes a conversation-level result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Referenced message, or `None` for conversation-level results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    pub eval_id: String,
    pub eval_type: String,
    pub passed: bool,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::ToolCall,
            MessageRole::ToolResult,
            MessageRole::System,
        ] {
            let parsed: MessageRole = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("moderator".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_message_serialization_omits_empty_tool_fields() {
        let msg = Message {
            id: Uuid::now_v7(),
            session_id: Uuid::now_v7(),
            role: MessageRole::User,
            content: "hello".into(),
            tool_call: None,
            tool_result: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_call").is_none());
        assert!(json.get("tool_result").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_session_state_parse() {
        assert_eq!(SessionState::from("idle"), SessionState::Idle);
        assert_eq!(SessionState::from("closed"), SessionState::Closed);
        // Unknown states default to active
        assert_eq!(SessionState::from("whatever"), SessionState::Active);
    }
}
