// Change-event publication.
//
// The Session API publishes a typed event after every successful mutating
// operation. Delivery is at-least-once and best-effort beyond warm
// durability: losing an event never compromises the data itself, so sinks
// log-and-continue rather than fail the request.

use async_trait::async_trait;
use converge_core::{CoreError, Result, SessionEvent};
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

/// Something that fans session events out to subscribers.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, event: &SessionEvent) -> Result<()>;
}

/// In-process sink over a tokio broadcast channel; also the conduit for
/// SSE/WebSocket subscribers in single-process deployments.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(16));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        // A send error only means nobody is listening right now
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Redis stream sink: one stream per session (`events:<sessionId>`), so a
/// single session's events can never interleave out of append order even
/// under consumer-group failover.
#[derive(Clone)]
pub struct RedisEventSink {
    conn: ConnectionManager,
}

impl RedisEventSink {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::fatal(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoreError::transient(format!("redis connect: {e}")))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(event)
            .map_err(|e| CoreError::fatal(format!("serialize event: {e}")))?;
        let key = format!("events:{}", event.session_id());
        redis::cmd("XADD")
            .arg(&key)
            .arg("*")
            .arg("type")
            .arg(event.event_type())
            .arg("data")
            .arg(data)
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| CoreError::transient(format!("redis: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_broadcast_delivery() {
        let sink = BroadcastEventSink::new(16);
        let mut rx = sink.subscribe();
        let session_id = Uuid::now_v7();
        sink.publish(&SessionEvent::SessionDeleted {
            session_id,
            deleted_at: Utc::now(),
        })
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), session_id);
        assert_eq!(event.event_type(), "session.deleted");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let sink = BroadcastEventSink::new(16);
        sink.publish(&SessionEvent::SessionDeleted {
            session_id: Uuid::now_v7(),
            deleted_at: Utc::now(),
        })
        .await
        .unwrap();
    }
}
