// Facade WebSocket wire protocol.
//
// JSON frames exchanged between a client (dashboard, fleet worker) and an
// agent's facade. The facade issues the session id on `connected`; a turn
// ends with `done` or `error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Tool invocation emitted by the runtime mid-turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ToolResult {
    pub id: String,
    pub result: serde_json::Value,
}

/// Error payload carried on `error` frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Client → facade frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send the latest user message for this session
    #[serde(rename_all = "camelCase")]
    Message {
        session_id: Option<Uuid>,
        content: String,
    },
}

/// Facade → client frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session established; carries the server-issued session id
    #[serde(rename_all = "camelCase")]
    Connected {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// Partial assistant output
    #[serde(rename_all = "camelCase")]
    Chunk {
        session_id: Uuid,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        session_id: Uuid,
        tool_call: ToolCall,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        session_id: Uuid,
        tool_result: ToolResult,
        timestamp: DateTime<Utc>,
    },
    /// Final assistant output for this turn
    #[serde(rename_all = "camelCase")]
    Done {
        session_id: Uuid,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// Turn-level failure; the connection stays open
    #[serde(rename_all = "camelCase")]
    Error {
        session_id: Option<Uuid>,
        error: ErrorInfo,
        timestamp: DateTime<Utc>,
    },
}

impl ServerFrame {
    /// Whether this frame terminates the current turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerFrame::Done { .. } | ServerFrame::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_wire_shape() {
        let session_id = Uuid::now_v7();
        let frame = ClientFrame::Message {
            session_id: Some(session_id),
            content: "Hello".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["sessionId"], session_id.to_string());
        assert_eq!(json["content"], "Hello");
    }

    #[test]
    fn test_server_frame_round_trip() {
        let raw = r#"{"type":"chunk","sessionId":"018f4e2a-1111-7000-8000-000000000001","content":"Hi ","timestamp":"2024-05-01T12:00:00Z"}"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        match &frame {
            ServerFrame::Chunk { content, .. } => assert_eq!(content, "Hi "),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(!frame.is_terminal());
    }

    #[test]
    fn test_terminal_frames() {
        let done = ServerFrame::Done {
            session_id: Uuid::now_v7(),
            content: "there!".into(),
            timestamp: Utc::now(),
        };
        let error = ServerFrame::Error {
            session_id: None,
            error: ErrorInfo {
                code: "runtime_unavailable".into(),
                message: "runtime not ready".into(),
            },
            timestamp: Utc::now(),
        };
        assert!(done.is_terminal());
        assert!(error.is_terminal());
    }

    #[test]
    fn test_tool_call_frame_tag() {
        let frame = ServerFrame::ToolCall {
            session_id: Uuid::now_v7(),
            tool_call: ToolCall {
                id: "call-1".into(),
                name: "lookup".into(),
                arguments: serde_json::json!({"q": "invoice"}),
            },
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["toolCall"]["name"], "lookup");
    }
}
