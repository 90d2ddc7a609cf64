use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ToolId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-tool broadcast of committed events.
pub struct NotifyHub {
    channels: DashMap<ToolId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a tool. Creates the channel if needed.
    pub fn subscribe(&self, tool_id: ToolId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(tool_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. A removed tool's channel is dropped
    /// after its last event goes out.
    pub fn send(&self, tool_id: ToolId, event: &Event) {
        if let Some(sender) = self.channels.get(&tool_id) {
            let _ = sender.send(event.clone());
        }
        if matches!(event, Event::ToolRemoved { .. }) {
            self.channels.remove(&tool_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let tid = Ulid::new();
        let mut rx = hub.subscribe(tid);

        let event = Event::ToolRegistered {
            id: tid,
            owner_id: Ulid::new(),
            title: None,
        };
        hub.send(tid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_tools_are_not_delivered() {
        let hub = NotifyHub::new();
        let mine = Ulid::new();
        let other = Ulid::new();
        let mut rx = hub.subscribe(mine);

        hub.send(other, &Event::ToolRemoved { id: other });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tool_removal_closes_channel() {
        let hub = NotifyHub::new();
        let tid = Ulid::new();
        let mut rx = hub.subscribe(tid);

        hub.send(tid, &Event::ToolRemoved { id: tid });
        assert_eq!(rx.recv().await.unwrap(), Event::ToolRemoved { id: tid });
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let tid = Ulid::new();
        hub.send(tid, &Event::ToolRemoved { id: tid });
    }
}
