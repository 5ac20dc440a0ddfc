use std::sync::Arc;

use tokio::sync::broadcast;

use bistro_types::events::ChatEvent;

/// Fans the change feed out to every connected client and every unread
/// reconciler. One event per row-level change, delivered globally;
/// consumers filter for themselves.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    feed_tx: broadcast::Sender<ChatEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (feed_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { feed_tx }),
        }
    }

    /// Subscribe to the change feed. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.feed_tx.subscribe()
    }

    /// Publish an event to all subscribers. A feed with no subscribers
    /// drops the event.
    pub fn publish(&self, event: ChatEvent) {
        let _ = self.inner.feed_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.publish(ChatEvent::ReadMarkerUpdated {
            room_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            last_read_at: Utc::now(),
        });

        assert!(matches!(a.recv().await, Ok(ChatEvent::ReadMarkerUpdated { .. })));
        assert!(matches!(b.recv().await, Ok(ChatEvent::ReadMarkerUpdated { .. })));
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let dispatcher = Dispatcher::new();
        dispatcher.publish(ChatEvent::ReadMarkerUpdated {
            room_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            last_read_at: Utc::now(),
        });
    }
}
