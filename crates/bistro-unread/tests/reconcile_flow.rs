use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use bistro_db::{ChatStore, MemoryStore, StoreError};
use bistro_types::events::ChatEvent;
use bistro_types::models::{Message, Participant, Room, RoomId, UserId};
use bistro_unread::{UnreadCounter, total_unread};

/// Insert a message and publish its change-feed event, the way the API
/// layer does.
async fn post(
    store: &MemoryStore,
    feed: &broadcast::Sender<ChatEvent>,
    room_id: RoomId,
    sender_id: UserId,
    body: &str,
) {
    let m = store.insert_message(room_id, sender_id, body).await.unwrap();
    let _ = feed.send(ChatEvent::MessageCreated {
        id: m.id,
        room_id: m.room_id,
        sender_id: m.sender_id,
        body: m.body,
        created_at: m.created_at,
    });
}

/// Advance a marker and publish its change-feed event.
async fn read_room(
    store: &MemoryStore,
    feed: &broadcast::Sender<ChatEvent>,
    room_id: RoomId,
    user_id: UserId,
) {
    let p = store
        .mark_read(room_id, user_id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    let _ = feed.send(ChatEvent::ReadMarkerUpdated {
        room_id,
        user_id,
        last_read_at: p.last_read_at.unwrap(),
    });
}

async fn wait_for_count(rx: &mut watch::Receiver<u64>, expect: u64) {
    timeout(Duration::from_secs(2), rx.wait_for(|v| *v == expect))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for count {expect}"))
        .expect("counter stopped");
}

/// Rooms A (3 unread for alice) and B (nothing unread), plus a room alice
/// is not in.
async fn three_unread_fixture(
    store: &MemoryStore,
    alice: UserId,
    bob: UserId,
) -> (Room, Room, Room) {
    let a = store.create_room("a", &[alice, bob]).await.unwrap();
    let seen = store.insert_message(a.id, bob, "seen").await.unwrap();
    store.mark_read(a.id, alice, seen.created_at).await.unwrap();
    for i in 0..3 {
        store.insert_message(a.id, bob, &format!("m{i}")).await.unwrap();
    }

    let b = store.create_room("b", &[alice, bob]).await.unwrap();
    store.insert_message(b.id, alice, "mine").await.unwrap();

    let foreign = store.create_room("foreign", &[bob]).await.unwrap();

    (a, b, foreign)
}

#[tokio::test]
async fn initialize_matches_invariant_sum() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());

    let mut rx = counter.counts();
    wait_for_count(&mut rx, 3).await;
    assert_eq!(counter.count(), total_unread(store.as_ref(), alice).await);
}

#[tokio::test]
async fn signed_out_emits_zero_and_stops() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, ..) = three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), None, feed.subscribe());

    post(&store, &feed, a.id, bob, "more").await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn own_messages_never_count() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, ..) = three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());
    let mut rx = counter.counts();
    wait_for_count(&mut rx, 3).await;

    post(&store, &feed, a.id, alice, "from me").await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.count(), 3);
}

#[tokio::test]
async fn foreign_room_messages_never_count() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (_, _, foreign) = three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());
    let mut rx = counter.counts();
    wait_for_count(&mut rx, 3).await;

    post(&store, &feed, foreign.id, bob, "not for alice").await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.count(), 3);
}

#[tokio::test]
async fn unset_marker_counts_from_epoch() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    // Alice has never opened the room
    let room = store.create_room("fresh", &[alice, bob]).await.unwrap();
    store.insert_message(room.id, bob, "one").await.unwrap();

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());
    let mut rx = counter.counts();
    wait_for_count(&mut rx, 1).await;

    post(&store, &feed, room.id, bob, "two").await;
    wait_for_count(&mut rx, 2).await;
    drop(counter);
}

#[tokio::test]
async fn live_message_increments_then_marker_resets() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, ..) = three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());
    let mut rx = counter.counts();
    wait_for_count(&mut rx, 3).await;

    // A fourth unread message arrives in room A
    post(&store, &feed, a.id, bob, "fourth").await;
    wait_for_count(&mut rx, 4).await;

    // Alice opens room A: marker advances past all four, full recompute
    read_room(&store, &feed, a.id, alice).await;
    wait_for_count(&mut rx, 0).await;

    assert_eq!(counter.count(), total_unread(store.as_ref(), alice).await);
}

#[tokio::test]
async fn other_users_marker_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, ..) = three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());
    let mut rx = counter.counts();
    wait_for_count(&mut rx, 3).await;

    // Make the store state diverge from the running total: a recompute
    // would now yield 0, so reacting to bob's marker would be visible.
    store.mark_read(a.id, alice, Utc::now()).await.unwrap();

    read_room(&store, &feed, a.id, bob).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.count(), 3);

    // Alice's own marker event is what triggers the recompute
    let _ = feed.send(ChatEvent::ReadMarkerUpdated {
        room_id: a.id,
        user_id: alice,
        last_read_at: Utc::now(),
    });
    wait_for_count(&mut rx, 0).await;
}

#[tokio::test]
async fn teardown_stops_all_updates() {
    let store = Arc::new(MemoryStore::new());
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, ..) = three_unread_fixture(&store, alice, bob).await;

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());
    let mut rx = counter.counts();
    wait_for_count(&mut rx, 3).await;

    counter.shutdown();

    post(&store, &feed, a.id, bob, "after teardown").await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(*rx.borrow(), 3);
}

// -- Failure semantics --

struct FailingStore;

fn injected() -> StoreError {
    StoreError::CorruptRow("injected failure".into())
}

#[async_trait]
impl ChatStore for FailingStore {
    async fn create_room(&self, _: &str, _: &[UserId]) -> Result<Room, StoreError> {
        Err(injected())
    }
    async fn room(&self, _: RoomId) -> Result<Option<Room>, StoreError> {
        Err(injected())
    }
    async fn insert_message(&self, _: RoomId, _: UserId, _: &str) -> Result<Message, StoreError> {
        Err(injected())
    }
    async fn messages_in_room(
        &self,
        _: RoomId,
        _: u32,
        _: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        Err(injected())
    }
    async fn mark_read(
        &self,
        _: RoomId,
        _: UserId,
        _: DateTime<Utc>,
    ) -> Result<Option<Participant>, StoreError> {
        Err(injected())
    }
    async fn participant(&self, _: RoomId, _: UserId) -> Result<Option<Participant>, StoreError> {
        Err(injected())
    }
    async fn participants_for_user(&self, _: UserId) -> Result<Vec<Participant>, StoreError> {
        Err(injected())
    }
    async fn count_messages_since(
        &self,
        _: RoomId,
        _: UserId,
        _: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        Err(injected())
    }
}

/// Delegates to a `MemoryStore` but fails every unread count for one room.
struct PoisonedRoomStore {
    inner: MemoryStore,
    poisoned: RoomId,
}

#[async_trait]
impl ChatStore for PoisonedRoomStore {
    async fn create_room(&self, name: &str, ids: &[UserId]) -> Result<Room, StoreError> {
        self.inner.create_room(name, ids).await
    }
    async fn room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError> {
        self.inner.room(room_id).await
    }
    async fn insert_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, StoreError> {
        self.inner.insert_message(room_id, sender_id, body).await
    }
    async fn messages_in_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.messages_in_room(room_id, limit, before).await
    }
    async fn mark_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Participant>, StoreError> {
        self.inner.mark_read(room_id, user_id, at).await
    }
    async fn participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, StoreError> {
        self.inner.participant(room_id, user_id).await
    }
    async fn participants_for_user(&self, user_id: UserId) -> Result<Vec<Participant>, StoreError> {
        self.inner.participants_for_user(user_id).await
    }
    async fn count_messages_since(
        &self,
        room_id: RoomId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        if room_id == self.poisoned {
            return Err(injected());
        }
        self.inner.count_messages_since(room_id, user_id, since).await
    }
}

#[tokio::test]
async fn total_failure_degrades_to_zero() {
    assert_eq!(total_unread(&FailingStore, Uuid::new_v4()).await, 0);
}

#[tokio::test]
async fn failed_room_contributes_zero_without_aborting() {
    let inner = MemoryStore::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let bad = inner.create_room("bad", &[alice, bob]).await.unwrap();
    for _ in 0..5 {
        inner.insert_message(bad.id, bob, "lost").await.unwrap();
    }
    let good = inner.create_room("good", &[alice, bob]).await.unwrap();
    inner.insert_message(good.id, bob, "counted").await.unwrap();
    inner.insert_message(good.id, bob, "counted too").await.unwrap();

    let store = PoisonedRoomStore {
        inner,
        poisoned: bad.id,
    };
    assert_eq!(total_unread(&store, alice).await, 2);
}

/// First reconciliation returns stale data slowly; a marker event starts a
/// newer one in the meantime. The stale result must be discarded.
struct StaleFirstStore {
    inner: MemoryStore,
    first_call: AtomicBool,
}

#[async_trait]
impl ChatStore for StaleFirstStore {
    async fn create_room(&self, name: &str, ids: &[UserId]) -> Result<Room, StoreError> {
        self.inner.create_room(name, ids).await
    }
    async fn room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError> {
        self.inner.room(room_id).await
    }
    async fn insert_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, StoreError> {
        self.inner.insert_message(room_id, sender_id, body).await
    }
    async fn messages_in_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.messages_in_room(room_id, limit, before).await
    }
    async fn mark_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Participant>, StoreError> {
        self.inner.mark_read(room_id, user_id, at).await
    }
    async fn participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, StoreError> {
        self.inner.participant(room_id, user_id).await
    }
    async fn participants_for_user(&self, user_id: UserId) -> Result<Vec<Participant>, StoreError> {
        let participants = self.inner.participants_for_user(user_id).await?;
        if self.first_call.swap(false, Ordering::SeqCst) {
            // Simulate a slow fetch that observed pre-marker state
            sleep(Duration::from_millis(200)).await;
            return Ok(participants
                .into_iter()
                .map(|p| Participant {
                    last_read_at: None,
                    ..p
                })
                .collect());
        }
        Ok(participants)
    }
    async fn count_messages_since(
        &self,
        room_id: RoomId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        self.inner.count_messages_since(room_id, user_id, since).await
    }
}

#[tokio::test]
async fn stale_reconciliation_never_overwrites_newer_one() {
    let inner = MemoryStore::new();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    let room = inner.create_room("r", &[alice, bob]).await.unwrap();
    for _ in 0..3 {
        inner.insert_message(room.id, bob, "old").await.unwrap();
    }
    // Everything is already read; only the stale snapshot says otherwise
    inner.mark_read(room.id, alice, Utc::now()).await.unwrap();

    let store = Arc::new(StaleFirstStore {
        inner,
        first_call: AtomicBool::new(true),
    });

    let (feed, _keep) = broadcast::channel(64);
    let counter = UnreadCounter::spawn(store.clone(), Some(alice), feed.subscribe());

    // Wait until the initial reconciliation is inside its slow stale fetch,
    // then supersede it with a marker update
    while store.first_call.load(Ordering::SeqCst) {
        sleep(Duration::from_millis(10)).await;
    }
    let _ = feed.send(ChatEvent::ReadMarkerUpdated {
        room_id: room.id,
        user_id: alice,
        last_read_at: Utc::now(),
    });

    // Wait out the stale snapshot's delay; its total of 3 must be dropped
    sleep(Duration::from_millis(400)).await;
    assert_eq!(counter.count(), 0);
}
