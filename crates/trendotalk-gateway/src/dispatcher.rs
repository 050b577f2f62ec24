use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use trendotalk_types::events::GatewayEvent;

/// Manages all connected clients and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for global events (presence, post reactions)
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: user_id -> username
    online_users: RwLock<HashMap<Uuid, String>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender).
    /// DM events are targeted, never broadcast.
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Best-effort: an empty
    /// receiver set is not an error.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some((stored_conn_id, _)) = channels.get(&user_id) {
            if *stored_conn_id == conn_id {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to a specific user. A user with no open socket
    /// simply misses the event; the data is in the store either way.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Deliver the same event to both members of a chat. The sender's other
    /// open sessions see their own messages this way.
    pub async fn send_to_pair(&self, a: Uuid, b: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        for user_id in [a, b] {
            if let Some((_, tx)) = channels.get(&user_id) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Register a user as online.
    pub async fn user_online(&self, user_id: Uuid, username: String) {
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, username.clone());

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: true,
        });
    }

    /// Register a user as offline. Only cleans up if conn_id matches.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        // Only clean up if this connection still owns the user channel
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels
                .get(&user_id)
                .map_or(false, |(cid, _)| *cid == conn_id)
        };

        if !is_current {
            // A newer connection has taken over — don't touch anything
            return;
        }

        let username = self
            .inner
            .online_users
            .write()
            .await
            .remove(&user_id)
            .unwrap_or_default();

        self.unregister_user_channel(user_id, conn_id).await;

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: false,
        });
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect()
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

    #[tokio::test]
    async fn targeted_events_reach_only_their_user() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (_conn_a, mut rx_a) = dispatcher.register_user_channel(alice).await;
        let (_conn_b, mut rx_b) = dispatcher.register_user_channel(bob).await;

        dispatcher
            .send_to_user(
                alice,
                GatewayEvent::Ready {
                    user_id: alice,
                    username: "alice".into(),
                },
            )
            .await;

        assert!(matches!(rx_a.recv().await, Some(GatewayEvent::Ready { .. })));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn pair_events_reach_both_members_and_nobody_else() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();

        let (_conn_a, mut rx_a) = dispatcher.register_user_channel(alice).await;
        let (_conn_b, mut rx_b) = dispatcher.register_user_channel(bob).await;
        let (_conn_c, mut rx_c) = dispatcher.register_user_channel(carol).await;

        dispatcher
            .send_to_pair(
                alice,
                bob,
                GatewayEvent::Ready {
                    user_id: alice,
                    username: "alice".into(),
                },
            )
            .await;

        assert!(matches!(rx_a.recv().await, Some(GatewayEvent::Ready { .. })));
        assert!(matches!(rx_b.recv().await, Some(GatewayEvent::Ready { .. })));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_disconnect_does_not_evict_newer_connection() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();

        let (old_conn, _rx_old) = dispatcher.register_user_channel(alice).await;
        let (_new_conn, mut rx_new) = dispatcher.register_user_channel(alice).await;

        // the old socket closing must not tear down the replacement channel
        dispatcher.user_offline(alice, old_conn).await;

        dispatcher
            .send_to_user(
                alice,
                GatewayEvent::Ready {
                    user_id: alice,
                    username: "alice".into(),
                },
            )
            .await;
        assert!(rx_new.recv().await.is_some());
    }
}
