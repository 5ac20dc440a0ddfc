use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use bistro_db::ChatStore;
use bistro_types::events::ChatEvent;
use bistro_types::models::UserId;

use crate::reconcile::total_unread;

/// Live unread total for one user.
///
/// A single actor task owns the count; change-feed events are applied to it
/// serially, which removes any reentrancy ambiguity between the message and
/// read-marker callbacks. Full reconciliations run as spawned tasks tagged
/// with a generation number, so a slow result can never overwrite a newer
/// one: last reconciliation wins by start order.
pub struct UnreadCounter {
    counts: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl UnreadCounter {
    /// Start counting for `user` over the given change feed.
    ///
    /// With no user (signed out) the count is 0 and nothing is subscribed.
    /// Otherwise a full reconciliation establishes the baseline while
    /// events stream in.
    pub fn spawn(
        store: Arc<dyn ChatStore>,
        user: Option<UserId>,
        events: broadcast::Receiver<ChatEvent>,
    ) -> Self {
        let (tx, counts) = watch::channel(0);

        let Some(user) = user else {
            return Self { counts, task: None };
        };

        let task = tokio::spawn(run_actor(store, user, events, tx));

        Self {
            counts,
            task: Some(task),
        }
    }

    /// Live view of the total. Holds 0 until the first reconciliation
    /// resolves.
    pub fn counts(&self) -> watch::Receiver<u64> {
        self.counts.clone()
    }

    pub fn count(&self) -> u64 {
        *self.counts.borrow()
    }

    /// Tear down the actor and release the feed subscription. Only the
    /// actor writes the count, so no update can land afterward; spawned
    /// reconciliations finish into a closed channel.
    pub fn shutdown(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for UnreadCounter {
    fn drop(&mut self) {
        self.abort();
    }
}

struct Reconciled {
    generation: u64,
    total: u64,
}

async fn run_actor(
    store: Arc<dyn ChatStore>,
    user: UserId,
    mut events: broadcast::Receiver<ChatEvent>,
    counts: watch::Sender<u64>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let mut generation: u64 = 0;
    let mut total: u64 = 0;

    start_reconciliation(&store, user, generation, &done_tx);

    loop {
        tokio::select! {
            result = events.recv() => match result {
                Ok(ChatEvent::MessageCreated { room_id, sender_id, created_at, .. }) => {
                    // Self-authored messages never count as unread
                    if sender_id == user {
                        continue;
                    }

                    match store.participant(room_id, user).await {
                        Ok(Some(p)) if p.last_read_at.map_or(true, |t| created_at > t) => {
                            total += 1;
                            let _ = counts.send(total);
                        }
                        // No participant row, or the message predates the
                        // marker: not ours to count
                        Ok(_) => {}
                        Err(e) => {
                            // Fail closed: never increment on an unverified event
                            warn!("participant lookup failed for room {}: {}", room_id, e);
                        }
                    }
                }
                Ok(ChatEvent::ReadMarkerUpdated { user_id, .. }) => {
                    if user_id != user {
                        continue;
                    }
                    // The marker moved past an unknown number of unread
                    // messages; the running total is no longer trustworthy
                    generation += 1;
                    start_reconciliation(&store, user, generation, &done_tx);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("change feed lagged by {} events, resynchronizing", n);
                    generation += 1;
                    start_reconciliation(&store, user, generation, &done_tx);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            Some(Reconciled { generation: done, total: fresh }) = done_rx.recv() => {
                if done == generation {
                    total = fresh;
                    let _ = counts.send(total);
                } else {
                    // Superseded while in flight; the newer run owns the total
                    debug!("discarding reconciliation {} (current {})", done, generation);
                }
            }
        }
    }
}

fn start_reconciliation(
    store: &Arc<dyn ChatStore>,
    user: UserId,
    generation: u64,
    done: &mpsc::UnboundedSender<Reconciled>,
) {
    let store = store.clone();
    let done = done.clone();
    tokio::spawn(async move {
        let total = total_unread(store.as_ref(), user).await;
        // The actor may be gone by now; a failed send is harmless
        let _ = done.send(Reconciled { generation, total });
    });
}
