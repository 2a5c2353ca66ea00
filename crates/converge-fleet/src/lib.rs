// Fleet conversation client.
//
// Drives multi-turn WebSocket conversations against a deployed agent's
// facade. The agent holds session state, so each turn sends only the
// latest user message. An `error` frame ends the turn with the error
// recorded but leaves the connection open; only transport failure closes
// it. Cancellation is honored between frames.

use std::time::{Duration, Instant};

use converge_core::{ClientFrame, CoreError, ErrorInfo, Result, ServerFrame, ToolCall, ToolResult};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

/// Client lifecycle, advanced frame by frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    WaitingForConnected,
    Sending,
    Collecting,
    Done,
    Error,
}

/// Everything observed during one conversation turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: Uuid,
    /// Assistant text: streamed chunks followed by the `done` content
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Set when the turn ended on an `error` frame
    pub error: Option<ErrorInfo>,
    pub duration: Duration,
}

impl TurnOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// An open conversation with one agent facade.
pub struct FleetConversation {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_id: Uuid,
    state: ClientState,
    cancel: watch::Receiver<bool>,
}

/// Connector for agent facades.
pub struct FleetClient {
    url: String,
    connect_timeout: Duration,
}

impl FleetClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Dial the facade and wait for the `connected` frame carrying the
    /// server-issued session id.
    pub async fn connect(&self, cancel: watch::Receiver<bool>) -> Result<FleetConversation> {
        tracing::debug!(url = %self.url, state = ?ClientState::Connecting, "dialing facade");
        let (mut stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
                .await
                .map_err(|_| CoreError::transient(format!("connect timeout to {}", self.url)))?
                .map_err(|e| CoreError::transient(format!("websocket connect: {e}")))?;

        tracing::debug!(state = ?ClientState::WaitingForConnected, "awaiting session");
        let mut cancel_rx = cancel.clone();
        let session_id = loop {
            let frame = next_frame(&mut stream, &mut cancel_rx).await?;
            match frame {
                ServerFrame::Connected { session_id, .. } => break session_id,
                ServerFrame::Error { error, .. } => {
                    return Err(CoreError::transient(format!(
                        "facade refused connection: {} ({})",
                        error.message, error.code
                    )));
                }
                other => {
                    tracing::debug!(frame = ?other, "frame ignored before connected");
                }
            }
        };
        tracing::debug!(sessionId = %session_id, "conversation established");

        Ok(FleetConversation {
            stream,
            session_id,
            state: ClientState::Sending,
            cancel,
        })
    }
}

impl FleetConversation {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Send one user message and collect frames until `done` or `error`.
    pub async fn send_turn(&mut self, content: &str) -> Result<TurnOutcome> {
        let start = Instant::now();
        self.state = ClientState::Sending;

        let frame = ClientFrame::Message {
            session_id: Some(self.session_id),
            content: content.to_string(),
        };
        let raw = serde_json::to_string(&frame)
            .map_err(|e| CoreError::fatal(format!("serialize client frame: {e}")))?;
        self.stream
            .send(WsMessage::Text(raw))
            .await
            .map_err(|e| CoreError::transient(format!("websocket send: {e}")))?;

        self.state = ClientState::Collecting;
        let mut outcome = TurnOutcome {
            session_id: self.session_id,
            content: String::new(),
            tool_calls: vec![],
            tool_results: vec![],
            error: None,
            duration: Duration::ZERO,
        };
        let mut cancel_rx = self.cancel.clone();
        loop {
            let frame = next_frame(&mut self.stream, &mut cancel_rx).await?;
            match frame {
                ServerFrame::Chunk { content, .. } => outcome.content.push_str(&content),
                ServerFrame::ToolCall { tool_call, .. } => outcome.tool_calls.push(tool_call),
                ServerFrame::ToolResult { tool_result, .. } => {
                    outcome.tool_results.push(tool_result)
                }
                ServerFrame::Done { content, .. } => {
                    outcome.content.push_str(&content);
                    self.state = ClientState::Done;
                    break;
                }
                ServerFrame::Error { error, .. } => {
                    // Turn-level failure; the connection stays usable
                    outcome.error = Some(error);
                    self.state = ClientState::Error;
                    break;
                }
                ServerFrame::Connected { .. } => {
                    tracing::debug!("duplicate connected frame ignored");
                }
            }
        }
        outcome.duration = start.elapsed();
        Ok(outcome)
    }

    /// Close the transport.
    pub async fn close(mut self) {
        let _ = self.stream.send(WsMessage::Close(None)).await;
    }
}

/// Read the next protocol frame, honoring cancellation between frames.
async fn next_frame(
    stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ServerFrame> {
    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = cancel.changed() => {
                return Err(CoreError::transient("conversation cancelled"));
            }
        };
        let message = message
            .ok_or_else(|| CoreError::transient("connection closed by facade"))?
            .map_err(|e| CoreError::transient(format!("websocket read: {e}")))?;
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Binary(raw) => String::from_utf8_lossy(&raw).into_owned(),
            WsMessage::Close(_) => {
                return Err(CoreError::transient("connection closed by facade"));
            }
            // Pings are answered by the library; everything else is noise
            _ => continue,
        };
        let frame: ServerFrame = serde_json::from_str(&text)
            .map_err(|e| CoreError::validation(format!("unparseable frame: {e}")))?;
        return Ok(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumWs, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;

    async fn serve_script(socket: WebSocket) {
        scripted_facade(socket).await;
    }

    /// Minimal facade: issues a session, then answers every user message
    /// with two chunks and a done; the literal "explode" triggers an error
    /// frame without closing the connection.
    async fn scripted_facade(mut socket: WebSocket) {
        let session_id = Uuid::now_v7();
        let send = |frame: ServerFrame| serde_json::to_string(&frame).unwrap();

        socket
            .send(AxumWs::Text(send(ServerFrame::Connected {
                session_id,
                timestamp: Utc::now(),
            })))
            .await
            .unwrap();

        while let Some(Ok(message)) = socket.recv().await {
            let AxumWs::Text(text) = message else { continue };
            let frame: ClientFrame = serde_json::from_str(&text).unwrap();
            let ClientFrame::Message { content, .. } = frame;
            if content == "explode" {
                socket
                    .send(AxumWs::Text(send(ServerFrame::Error {
                        session_id: Some(session_id),
                        error: ErrorInfo {
                            code: "runtime_error".into(),
                            message: "provider unavailable".into(),
                        },
                        timestamp: Utc::now(),
                    })))
                    .await
                    .unwrap();
                continue;
            }
            socket
                .send(AxumWs::Text(send(ServerFrame::Chunk {
                    session_id,
                    content: "Hi ".into(),
                    timestamp: Utc::now(),
                })))
                .await
                .unwrap();
            socket
                .send(AxumWs::Text(send(ServerFrame::Done {
                    session_id,
                    content: "there!".into(),
                    timestamp: Utc::now(),
                })))
                .await
                .unwrap();
        }
    }

    async fn start_facade() -> String {
        let app = Router::new().route(
            "/ws",
            get(|upgrade: WebSocketUpgrade| async move { upgrade.on_upgrade(serve_script) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}/ws")
    }

    #[tokio::test]
    async fn test_single_turn() {
        let url = start_facade().await;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let client = FleetClient::new(&url);
        let mut conversation = client.connect(cancel_rx).await.unwrap();

        let outcome = conversation.send_turn("Hello").await.unwrap();
        assert_eq!(outcome.content, "Hi there!");
        assert!(outcome.is_ok());
        assert!(outcome.duration > Duration::ZERO);
        assert_eq!(conversation.state(), ClientState::Done);
        conversation.close().await;
    }

    #[tokio::test]
    async fn test_error_frame_keeps_connection_usable() {
        let url = start_facade().await;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut conversation = FleetClient::new(&url).connect(cancel_rx).await.unwrap();

        let failed = conversation.send_turn("explode").await.unwrap();
        assert!(!failed.is_ok());
        assert_eq!(failed.error.as_ref().unwrap().code, "runtime_error");
        assert_eq!(conversation.state(), ClientState::Error);

        // Next turn on the same connection succeeds
        let outcome = conversation.send_turn("Hello again").await.unwrap();
        assert_eq!(outcome.content, "Hi there!");
        conversation.close().await;
    }

    #[tokio::test]
    async fn test_multi_turn_same_session() {
        let url = start_facade().await;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut conversation = FleetClient::new(&url).connect(cancel_rx).await.unwrap();
        let session = conversation.session_id();

        for _ in 0..3 {
            let outcome = conversation.send_turn("Hello").await.unwrap();
            assert_eq!(outcome.session_id, session);
            assert_eq!(outcome.content, "Hi there!");
        }
        conversation.close().await;
    }

    #[tokio::test]
    async fn test_cancellation_between_frames() {
        // A facade that never answers after connected
        async fn silent(mut socket: WebSocket) {
            let frame = ServerFrame::Connected {
                session_id: Uuid::now_v7(),
                timestamp: Utc::now(),
            };
            socket
                .send(AxumWs::Text(serde_json::to_string(&frame).unwrap()))
                .await
                .unwrap();
            // Hold the socket open without responding
            while socket.recv().await.is_some() {}
        }
        let app = Router::new().route(
            "/ws",
            get(|upgrade: WebSocketUpgrade| async move { upgrade.on_upgrade(silent) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut conversation = FleetClient::new(format!("ws://{addr}/ws"))
            .connect(cancel_rx)
            .await
            .unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel_tx.send(true);
        });
        let err = conversation.send_turn("Hello").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
