//! In-process registry of live approver connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use reserva_core::{Notification, Notifier, UserId};

struct Registration {
    connection_id: u64,
    sender: mpsc::UnboundedSender<Notification>,
}

/// One live receiver per user. A second `connect` for the same user replaces the first, whose
/// receiver then yields `None`.
#[derive(Clone, Default)]
pub struct NotificationHub {
    connections: Arc<DashMap<UserId, Registration>>,
    next_connection_id: Arc<AtomicU64>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user: UserId) -> (u64, mpsc::UnboundedReceiver<Notification>) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.insert(user, Registration { connection_id, sender });
        (connection_id, receiver)
    }

    /// Removes the registration only if it still belongs to `connection_id`.
    pub fn disconnect(&self, user: &UserId, connection_id: u64) -> bool {
        self.connections
            .remove_if(user, |_, registration| registration.connection_id == connection_id)
            .is_some()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }
}

impl Notifier for NotificationHub {
    fn send_to_user(&self, user: &UserId, notification: &Notification) -> bool {
        let delivered = match self.connections.get(user) {
            Some(registration) => registration.sender.send(notification.clone()).is_ok(),
            None => false,
        };

        if !delivered {
            let stale = self
                .connections
                .remove_if(user, |_, registration| registration.sender.is_closed())
                .is_some();
            if stale {
                debug!(
                    event_name = "notification.stale_connection_removed",
                    recipient = %user,
                    "dropped registration whose receiver is gone"
                );
            }
        }
        delivered
    }
}
