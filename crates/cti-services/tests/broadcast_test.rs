//! Broadcast hub delivery and pruning

use async_trait::async_trait;
use chrono::Utc;
use cti_core::AppError;
use cti_services::{BroadcastHub, ClientMessage, ClientSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct TestSink {
    sent: Mutex<Vec<String>>,
    broken: AtomicBool,
}

impl TestSink {
    fn broken() -> Arc<Self> {
        let sink = Self::default();
        sink.broken.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ClientSink for TestSink {
    async fn send_text(&self, text: &str) -> Result<(), AppError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(AppError::Connection("socket closed".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}

fn pong() -> ClientMessage {
    ClientMessage::Pong {
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_broadcast_identical_payload_to_all() {
    let hub = BroadcastHub::new();
    let a = Arc::new(TestSink::default());
    let b = Arc::new(TestSink::default());
    hub.connect(a.clone(), None);
    hub.connect(b.clone(), Some("agent-7"));

    let delivered = hub.broadcast(&ClientMessage::error("switch offline")).await;

    assert_eq!(delivered, 2);
    assert_eq!(a.sent(), b.sent());
    assert_eq!(
        a.sent()[0],
        r#"{"type":"error","data":{"message":"switch offline"}}"#
    );
}

#[tokio::test]
async fn test_failing_connection_is_pruned() {
    let hub = BroadcastHub::new();
    let healthy = Arc::new(TestSink::default());
    let broken = TestSink::broken();
    hub.connect(healthy.clone(), Some("agent-1"));
    hub.connect(broken.clone(), Some("agent-2"));
    assert_eq!(hub.connection_count(), 2);

    assert_eq!(hub.broadcast(&pong()).await, 1);
    assert_eq!(hub.connection_count(), 1);
    assert!(!hub.has_identity("agent-2"));
    assert!(hub.has_identity("agent-1"));

    // the survivors keep receiving
    assert_eq!(hub.broadcast(&pong()).await, 1);
    assert_eq!(healthy.sent().len(), 2);
}

#[tokio::test]
async fn test_send_to_identity() {
    let hub = BroadcastHub::new();
    let mine = Arc::new(TestSink::default());
    let other = Arc::new(TestSink::default());
    hub.connect(mine.clone(), Some("agent-1"));
    hub.connect(other.clone(), Some("agent-2"));

    assert!(hub.send_to("agent-1", &pong()).await);
    assert!(!hub.send_to("nobody", &pong()).await);

    assert_eq!(mine.sent().len(), 1);
    assert!(other.sent().is_empty());
}

#[tokio::test]
async fn test_send_to_failure_prunes_silently() {
    let hub = BroadcastHub::new();
    hub.connect(TestSink::broken(), Some("agent-1"));

    assert!(!hub.send_to("agent-1", &pong()).await);
    assert_eq!(hub.connection_count(), 0);
    assert!(!hub.has_identity("agent-1"));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let hub = BroadcastHub::new();
    let sink = Arc::new(TestSink::default());
    let id = hub.connect(sink, Some("agent-1"));

    hub.disconnect(id, Some("agent-1"));
    hub.disconnect(id, Some("agent-1"));
    hub.disconnect(id, None);

    assert_eq!(hub.connection_count(), 0);
    assert!(!hub.has_identity("agent-1"));
    assert_eq!(hub.broadcast(&pong()).await, 0);
}

#[tokio::test]
async fn test_reconnected_identity_survives_old_disconnect() {
    let hub = BroadcastHub::new();
    let old = hub.connect(Arc::new(TestSink::default()), Some("agent-1"));
    let fresh = Arc::new(TestSink::default());
    let new_id = hub.connect(fresh.clone(), Some("agent-1"));
    assert_ne!(old, new_id);

    hub.disconnect(old, Some("agent-1"));

    assert!(hub.has_identity("agent-1"));
    assert!(hub.send_to("agent-1", &pong()).await);
    assert_eq!(fresh.sent().len(), 1);
}
