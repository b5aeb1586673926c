use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::StudentEvent;

const CHANNEL_CAPACITY: usize = 16;

/// Per-student broadcast groups. Delivery is best-effort: nobody stores
/// or replays events, a client that is offline at publish time re-fetches
/// state on reconnect.
///
/// Passed explicitly through `AppState` rather than sitting behind a
/// global accessor.
#[derive(Clone, Default)]
pub struct Notifier {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<StudentEvent>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a student's group, creating it on first subscribe.
    pub async fn subscribe(&self, student_id: Uuid) -> broadcast::Receiver<StudentEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(student_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send an event to whoever is currently listening. A send into an
    /// empty group is not an error.
    pub async fn publish(&self, student_id: Uuid, event: StudentEvent) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&student_id) {
            if sender.send(event).is_err() {
                debug!("no subscribers for student {student_id}, event dropped");
            }
        } else {
            debug!("no channel for student {student_id}, event dropped");
        }
    }

    /// Drop a student's channel once its last receiver has gone away.
    /// Called by the socket task on disconnect.
    pub async fn prune(&self, student_id: Uuid) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(&student_id) {
            if sender.receiver_count() == 0 {
                channels.remove(&student_id);
            }
        }
    }

    #[cfg(test)]
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
