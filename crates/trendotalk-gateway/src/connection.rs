use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use trendotalk_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Resolves the other member of a chat. Typing activity is private to a
/// chat, so relays go through this instead of the global broadcast.
pub trait ChatPeers: Send + Sync {
    fn peer_of(&self, chat_id: Uuid, user_id: Uuid) -> BoxFuture<'_, Option<Uuid>>;
}

/// Handle a single WebSocket connection: Identify handshake with a JWT,
/// then relay broadcast and targeted events until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    jwt_secret: String,
    peers: Arc<dyn ChatPeers>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let Ok(ready_json) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    // Register per-user channel and send existing online users, then go online
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    // Send existing online users to this client so they see who's already here
    let existing_users = dispatcher.online_users().await;
    for (uid, uname) in &existing_users {
        let event = GatewayEvent::PresenceUpdate {
            user_id: *uid,
            username: uname.clone(),
            online: true,
        };
        let Ok(json) = serde_json::to_string(&event) else {
            continue;
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    // Now mark ourselves online (broadcasts to everyone else)
    dispatcher.user_online(user_id, username.clone()).await;

    // Subscribe to broadcasts and relay to this client
    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_clone = dispatcher.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Spawn task to forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => {
                            handle_command(&dispatcher_clone, &*peers, user_id, &username_recv, cmd)
                                .await;
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) bad command: {} -- raw: {}",
                                username_recv,
                                user_id,
                                e,
                                &text[..text.len().min(200)]
                            );
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use trendotalk_types::api::Claims;

    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    peers: &dyn ChatPeers,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::StartTyping { chat_id } => {
            // Only the other chat member sees typing; a non-member gets
            // nothing relayed at all.
            let Some(peer) = peers.peer_of(chat_id, user_id).await else {
                return;
            };
            dispatcher
                .send_to_user(
                    peer,
                    GatewayEvent::TypingStart {
                        chat_id,
                        user_id,
                        username: username.to_string(),
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two fixed chat members; everyone else is an outsider.
    struct PairPeers {
        chat_id: Uuid,
        alice: Uuid,
        bob: Uuid,
    }

    impl ChatPeers for PairPeers {
        fn peer_of(&self, chat_id: Uuid, user_id: Uuid) -> BoxFuture<'_, Option<Uuid>> {
            Box::pin(async move {
                if chat_id != self.chat_id {
                    return None;
                }
                if user_id == self.alice {
                    Some(self.bob)
                } else if user_id == self.bob {
                    Some(self.alice)
                } else {
                    None
                }
            })
        }
    }

    #[tokio::test]
    async fn typing_reaches_only_the_chat_peer() {
        let dispatcher = Dispatcher::new();
        let chat_id = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let peers = PairPeers { chat_id, alice, bob };

        let (_ca, mut rx_alice) = dispatcher.register_user_channel(alice).await;
        let (_cb, mut rx_bob) = dispatcher.register_user_channel(bob).await;
        let (_cc, mut rx_carol) = dispatcher.register_user_channel(carol).await;

        handle_command(
            &dispatcher,
            &peers,
            alice,
            "alice",
            GatewayCommand::StartTyping { chat_id },
        )
        .await;

        match rx_bob.recv().await {
            Some(GatewayEvent::TypingStart { user_id, .. }) => assert_eq!(user_id, alice),
            other => panic!("expected a typing event, got {:?}", other),
        }
        assert!(rx_alice.try_recv().is_err());
        assert!(rx_carol.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_from_a_non_member_is_dropped() {
        let dispatcher = Dispatcher::new();
        let chat_id = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let peers = PairPeers { chat_id, alice, bob };

        let (_ca, mut rx_alice) = dispatcher.register_user_channel(alice).await;
        let (_cb, mut rx_bob) = dispatcher.register_user_channel(bob).await;

        handle_command(
            &dispatcher,
            &peers,
            carol,
            "carol",
            GatewayCommand::StartTyping { chat_id },
        )
        .await;

        assert!(rx_alice.try_recv().is_err());
        assert!(rx_bob.try_recv().is_err());
    }
}
