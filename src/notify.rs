use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for state-change notifications, one channel per tutor.
/// The UI layer subscribes to the tutors it is showing and refreshes views
/// when their bookings or availability change.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to notifications for a tutor. Creates the channel if needed.
    pub fn subscribe(&self, tutor_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(tutor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, tutor_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&tutor_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel once no view cares about the tutor anymore.
    pub fn remove(&self, tutor_id: &Ulid) {
        self.channels.remove(tutor_id);
    }
}
