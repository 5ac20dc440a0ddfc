use tracing::warn;

use bistro_db::ChatStore;
use bistro_types::models::UserId;

/// Full reconciliation: the authoritative unread total for `user`, derived
/// from nothing but current store state.
///
/// For every room the user participates in, count the messages from other
/// senders strictly newer than the room's read marker; an unset marker
/// counts from the beginning of time. Read failures degrade rather than
/// propagate: a failed participant fetch yields 0, and a failed per-room
/// count contributes 0 without aborting the remaining rooms.
pub async fn total_unread(store: &dyn ChatStore, user: UserId) -> u64 {
    let participants = match store.participants_for_user(user).await {
        Ok(participants) => participants,
        Err(e) => {
            warn!("participant fetch failed for {}, unread total degrades to 0: {}", user, e);
            return 0;
        }
    };

    let mut total = 0;
    for participant in participants {
        match store
            .count_messages_since(participant.room_id, user, participant.last_read_at)
            .await
        {
            Ok(count) => total += count,
            Err(e) => {
                warn!(
                    "unread count failed for room {}, it contributes 0: {}",
                    participant.room_id, e
                );
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use bistro_db::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn sums_over_rooms_against_markers() {
        let store = MemoryStore::new();
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        // Room A: one read message, then three unread from bob
        let a = store.create_room("a", &[alice, bob]).await.unwrap();
        let seen = store.insert_message(a.id, bob, "seen").await.unwrap();
        store.mark_read(a.id, alice, seen.created_at).await.unwrap();
        for i in 0..3 {
            store.insert_message(a.id, bob, &format!("m{i}")).await.unwrap();
        }

        // Room B: only alice's own message, nothing unread
        let b = store.create_room("b", &[alice, carol]).await.unwrap();
        store.insert_message(b.id, alice, "mine").await.unwrap();

        // Room C: alice is not a participant
        let c = store.create_room("c", &[bob, carol]).await.unwrap();
        store.insert_message(c.id, bob, "elsewhere").await.unwrap();

        assert_eq!(total_unread(&store, alice).await, 3);
    }

    #[tokio::test]
    async fn unset_marker_counts_everything_from_others() {
        let store = MemoryStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let room = store.create_room("r", &[alice, bob]).await.unwrap();
        store.insert_message(room.id, bob, "one").await.unwrap();
        store.insert_message(room.id, bob, "two").await.unwrap();
        store.insert_message(room.id, alice, "mine").await.unwrap();

        assert_eq!(total_unread(&store, alice).await, 2);
    }

    #[tokio::test]
    async fn no_rooms_means_zero() {
        let store = MemoryStore::new();
        assert_eq!(total_unread(&store, Uuid::new_v4()).await, 0);
    }
}
