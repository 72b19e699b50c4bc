use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::BookingStatus;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    BookingCreated,
    StatusChanged(BookingStatus),
}

/// Payload handed to the chat/notification layer after a committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingNotice {
    pub kind: NoticeKind,
    pub booking_id: Ulid,
    /// `None` when the engine itself drove the change (request expiry).
    pub actor_id: Option<Ulid>,
    pub target_id: Ulid,
}

/// Per-user broadcast hub. Delivery is best effort: a notice with no listener,
/// or one a lagging listener misses, is dropped without affecting the booking.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingNotice>>,
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

    /// Subscribe to notices addressed to `user_id`. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<BookingNotice> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send to the notice's target. No-op if nobody is listening.
    pub fn send(&self, notice: BookingNotice) {
        if let Some(sender) = self.channels.get(&notice.target_id)
            && sender.send(notice).is_err()
        {
            tracing::debug!("notice for {} dropped: no receivers", notice.target_id);
        }
    }

    pub fn remove(&self, user_id: &Ulid) {
        self.channels.remove(user_id);
    }
}
