use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use bistro_types::models::{Message, Participant, PlaceId, Rating, Room, RoomId, UserId};

use crate::store::{ChatStore, RatingStore, StoreError};

/// In-memory reference implementation of the store contracts. Used by tests
/// and usable for development without a database file.
#[derive(Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<RoomId, Room>>,
    participants: Mutex<HashMap<(RoomId, UserId), Participant>>,
    messages: Mutex<Vec<Message>>,
    ratings: Mutex<HashMap<(PlaceId, UserId), Rating>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_room(
        &self,
        name: &str,
        participant_ids: &[UserId],
    ) -> Result<Room, StoreError> {
        let room = Room {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.rooms.lock().await.insert(room.id, room.clone());

        let mut participants = self.participants.lock().await;
        for &user_id in participant_ids {
            participants.insert(
                (room.id, user_id),
                Participant {
                    room_id: room.id,
                    user_id,
                    last_read_at: None,
                },
            );
        }

        Ok(room)
    }

    async fn room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.lock().await.get(&room_id).cloned())
    }

    async fn insert_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, StoreError> {
        let message = Message {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            body: body.to_string(),
            created_at: Utc::now(),
        };
        self.messages.lock().await.push(message.clone());
        Ok(message)
    }

    async fn messages_in_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().await;
        let mut page: Vec<Message> = messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| before.map_or(true, |t| m.created_at < t))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Participant>, StoreError> {
        let mut participants = self.participants.lock().await;
        let Some(participant) = participants.get_mut(&(room_id, user_id)) else {
            return Ok(None);
        };

        // Max-wins: a marker never moves backward
        if participant.last_read_at.map_or(true, |t| t < at) {
            participant.last_read_at = Some(at);
        }

        Ok(Some(participant.clone()))
    }

    async fn participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .participants
            .lock()
            .await
            .get(&(room_id, user_id))
            .cloned())
    }

    async fn participants_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Participant>, StoreError> {
        Ok(self
            .participants
            .lock()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count_messages_since(
        &self,
        room_id: RoomId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        let messages = self.messages.lock().await;
        let count = messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| m.sender_id != user_id)
            .filter(|m| since.map_or(true, |t| m.created_at > t))
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl RatingStore for MemoryStore {
    async fn upsert_rating(&self, rating: &Rating) -> Result<(), StoreError> {
        self.ratings
            .lock()
            .await
            .insert((rating.place_id.clone(), rating.user_id), rating.clone());
        Ok(())
    }

    async fn ratings_for_place(&self, place_id: &PlaceId) -> Result<Vec<Rating>, StoreError> {
        Ok(self
            .ratings
            .lock()
            .await
            .values()
            .filter(|r| &r.place_id == place_id)
            .cloned()
            .collect())
    }
}
