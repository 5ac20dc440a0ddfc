use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use bistro_db::ChatStore;
use bistro_types::events::{ChatEvent, ClientCommand, ServerEvent};
use bistro_unread::UnreadCounter;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection.
///
/// The client opens with `Identify`, gets `Ready` back, and from then on
/// receives its live unread total plus room-scoped events for whatever it
/// subscribes to. Each connection owns its own `UnreadCounter`; dropping
/// the connection tears the counter down with it.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    store: Arc<dyn ChatStore>,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for the Identify command
    let user_id = match wait_for_identify(&mut receiver).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to gateway", user_id);

    // Step 2: Send Ready event
    let ready = ServerEvent::Ready { user_id };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Live unread total for this connection's user. Dropped (and thereby
    // torn down) when this function returns.
    let counter = UnreadCounter::spawn(store, Some(user_id), dispatcher.subscribe());
    let mut counts = counter.counts();

    let mut feed_rx = dispatcher.subscribe();

    // Per-connection room subscriptions (shared between send and recv tasks).
    let subscribed_rooms: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed_rooms.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward feed events + unread updates -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        // Tell the client its starting total right away
        let initial = ServerEvent::UnreadChanged {
            count: *counts.borrow_and_update(),
        };
        if sender
            .send(Message::Text(serde_json::to_string(&initial).unwrap().into()))
            .await
            .is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                result = feed_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Feed receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let forward = match &event {
                        ChatEvent::MessageCreated { room_id, .. } => {
                            let subs = send_subscriptions.read()
                                .expect("subscription lock poisoned");
                            subs.contains(room_id)
                        }
                        // Marker updates are only the owning user's business
                        ChatEvent::ReadMarkerUpdated { user_id: owner, .. } => *owner == user_id,
                    };
                    if !forward {
                        continue;
                    }

                    let payload = serde_json::to_string(&ServerEvent::from(event)).unwrap();
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                result = counts.changed() => {
                    // Counter torn down
                    if result.is_err() {
                        break;
                    }
                    let update = ServerEvent::UnreadChanged {
                        count: *counts.borrow_and_update(),
                    };
                    if sender
                        .send(Message::Text(serde_json::to_string(&update).unwrap().into()))
                        .await
                        .is_err()
                    {
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
    let recv_subscriptions = subscribed_rooms.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(user_id, cmd, &recv_subscriptions),
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
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

    info!("{} disconnected from gateway", user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<Uuid> {
    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Identify { user_id }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    return Some(user_id);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

fn handle_command(
    user_id: Uuid,
    cmd: ClientCommand,
    subscriptions: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
) {
    match cmd {
        ClientCommand::Identify { .. } => {} // Already handled

        ClientCommand::Subscribe { room_ids } => {
            info!("{} subscribing to {} rooms", user_id, room_ids.len());
            let mut subs = subscriptions.write().expect("subscription lock poisoned");
            *subs = room_ids.into_iter().collect();
        }
    }
}
