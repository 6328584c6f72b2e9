//! Live span notifications over WebSocket.

use crate::core::{SpanId, TraceId};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Events queued per subscriber before it is considered too slow and dropped.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Message pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveEvent {
    /// `connected` or `new_span`
    #[serde(rename = "type")]
    pub kind: String,
    /// Greeting text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Newly stored span
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<SpanId>,
    /// Trace of the new span
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
}

impl LiveEvent {
    /// First message on every connection
    pub fn connected() -> Self {
        Self {
            kind: "connected".to_string(),
            message: Some("Connected to codelens".to_string()),
            span_id: None,
            trace_id: None,
        }
    }

    /// A span was stored
    pub fn new_span(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            kind: "new_span".to_string(),
            message: None,
            span_id: Some(span_id),
            trace_id: Some(trace_id),
        }
    }
}

/// Set of live subscribers with its own lock, separate from the store.
#[derive(Default)]
pub struct LiveHub {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<LiveEvent>>>,
    next_id: AtomicU64,
}

impl LiveHub {
    /// Creates an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber and returns its id and event stream.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<LiveEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().insert(id, tx);
        (id, rx)
    }

    /// Removes a subscriber
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }

    /// Sends `event` to every subscriber. A subscriber whose channel is
    /// closed or full is dropped. Returns how many subscribers received it.
    pub fn notify(&self, event: &LiveEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Dropping live subscriber {}: not keeping up", id);
                false
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Dropping live subscriber {}", id);
                false
            },
        });
        subscribers.len()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Pumps hub events into `socket` until either side goes away.
pub async fn serve_socket(socket: WebSocket, hub: Arc<LiveHub>) {
    let (id, mut events) = hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    if send_event(&mut sink, &LiveEvent::connected()).await {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if !send_event(&mut sink, &event).await {
                            break;
                        }
                    },
                    None => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {},
                },
            }
        }
    }

    hub.unsubscribe(id);
    tracing::debug!("Live subscriber {} disconnected", id);
}

async fn send_event<S>(sink: &mut S, event: &LiveEvent) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to encode live event: {}", e);
            return true;
        },
    };
    sink.send(Message::Text(text)).await.is_ok()
}

/// `*` allows every origin, otherwise the `Origin` header must be listed.
pub fn origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    allowed
        .iter()
        .any(|o| o == "*" || Some(o.as_str()) == origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_reaches_subscribers() {
        let hub = LiveHub::new();
        let (_, mut a) = hub.subscribe();
        let (_, mut b) = hub.subscribe();

        let event = LiveEvent::new_span(TraceId::from_bytes(&[1; 16]), SpanId::from_bytes(&[2; 8]));
        assert_eq!(hub.notify(&event), 2);
        assert_eq!(a.try_recv().unwrap(), event);
        assert_eq!(b.try_recv().unwrap(), event);
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let hub = LiveHub::new();
        let (_, alive) = hub.subscribe();
        let (_, gone) = hub.subscribe();
        drop(gone);

        let event = LiveEvent::new_span(TraceId::from_bytes(&[1; 16]), SpanId::from_bytes(&[2; 8]));
        assert_eq!(hub.notify(&event), 1);
        assert_eq!(hub.subscriber_count(), 1);
        drop(alive);
    }

    #[test]
    fn test_slow_subscriber_is_dropped() {
        let hub = LiveHub::new();
        let (_, mut slow) = hub.subscribe();

        let event = LiveEvent::new_span(TraceId::from_bytes(&[1; 16]), SpanId::from_bytes(&[2; 8]));
        for _ in 0..SUBSCRIBER_BUFFER {
            assert_eq!(hub.notify(&event), 1);
        }
        assert_eq!(hub.notify(&event), 0);
        assert_eq!(hub.subscriber_count(), 0);

        // queued events drain, then the stream ends
        let mut drained = 0;
        while slow.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, SUBSCRIBER_BUFFER);
        assert!(slow.blocking_recv().is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let event = LiveEvent::new_span(TraceId::from_bytes(&[0xab; 16]), SpanId::from_bytes(&[0xcd; 8]));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_span");
        assert_eq!(json["span_id"], "cdcdcdcdcdcdcdcd");
        assert!(json.get("message").is_none());

        let json = serde_json::to_value(LiveEvent::connected()).unwrap();
        assert_eq!(json["type"], "connected");
        assert!(json.get("trace_id").is_none());
    }

    #[test]
    fn test_origin_check() {
        let any = vec!["*".to_string()];
        assert!(origin_allowed(&any, None));
        assert!(origin_allowed(&any, Some("http://evil.test")));

        let listed = vec!["http://localhost:3000".to_string()];
        assert!(origin_allowed(&listed, Some("http://localhost:3000")));
        assert!(!origin_allowed(&listed, Some("http://evil.test")));
        assert!(!origin_allowed(&listed, None));
    }
}
