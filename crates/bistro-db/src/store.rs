use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use bistro_types::models::{Message, Participant, PlaceId, Rating, Room, RoomId, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Backend contract for rooms, messages and read markers.
///
/// The unread reconciler only uses the three read methods at the bottom;
/// the write methods exist for the HTTP layer, which pairs each one with a
/// change-feed publish.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create a room plus one participant row per user, markers unset.
    async fn create_room(
        &self,
        name: &str,
        participant_ids: &[UserId],
    ) -> Result<Room, StoreError>;

    async fn room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError>;

    async fn insert_message(
        &self,
        room_id: RoomId,
        sender_id: UserId,
        body: &str,
    ) -> Result<Message, StoreError>;

    /// Newest first; `before` is a cursor on `created_at` for older pages.
    async fn messages_in_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError>;

    /// Advance the read marker. Never moves it backward; returns the
    /// participant row after the update, or `None` for a non-participant.
    async fn mark_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Participant>, StoreError>;

    async fn participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, StoreError>;

    async fn participants_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Participant>, StoreError>;

    /// Messages in the room not authored by `user_id` with
    /// `created_at > since`. `since = None` counts from the beginning of
    /// time, never as "everything read".
    async fn count_messages_since(
        &self,
        room_id: RoomId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError>;
}

/// Backend contract for place ratings.
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// One rating per (place, user); a second write replaces the first.
    async fn upsert_rating(&self, rating: &Rating) -> Result<(), StoreError>;

    async fn ratings_for_place(&self, place_id: &PlaceId) -> Result<Vec<Rating>, StoreError>;
}

/// Uuids and timestamps are stored as text; rows that fail to parse back
/// surface as `CorruptRow` rather than panicking.
pub(crate) fn parse_uuid(value: &str, field: &str) -> Result<Uuid, StoreError> {
    value
        .parse()
        .map_err(|e| StoreError::CorruptRow(format!("{field} '{value}': {e}")))
}

pub(crate) fn parse_ts(value: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow(format!("{field} '{value}': {e}")))
}

/// Fixed-width RFC 3339 UTC so that SQL string comparison orders
/// chronologically.
pub(crate) fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_text_orders_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::microseconds(1);
        assert!(fmt_ts(early) < fmt_ts(late));

        let round_trip = parse_ts(&fmt_ts(late), "t").unwrap();
        assert_eq!(round_trip, late);
    }
}
