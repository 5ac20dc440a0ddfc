use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use bistro_types::models::{Message, Participant, PlaceId, Rating, Room, RoomId, UserId};

use crate::migrations;
use crate::store::{ChatStore, RatingStore, StoreError, fmt_ts, parse_ts, parse_uuid};

/// SQLite-backed store. The connection sits behind a mutex and every query
/// runs on the blocking pool via `spawn_blocking`, so the async trait
/// methods never stall the runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }

    async fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_room(
        &self,
        name: &str,
        participant_ids: &[UserId],
    ) -> Result<Room, StoreError> {
        // Timestamps are truncated to the stored microsecond precision so
        // returned values round-trip exactly.
        let room = Room {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
        };
        let result = room.clone();
        let ids = participant_ids.to_vec();

        self.with_conn_mut(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO rooms (id, name, created_at) VALUES (?1, ?2, ?3)",
                (room.id.to_string(), &room.name, fmt_ts(room.created_at)),
            )?;
            for user_id in &ids {
                tx.execute(
                    "INSERT OR IGNORE INTO room_participants (room_id, user_id, last_read_at)
                     VALUES (?1, ?2, NULL)",
                    (room.id.to_string(), user_id.to_string()),
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        Ok(result)
    }

    async fn room(&self, room_id: RoomId) -> Result<Option<Room>, StoreError> {
        let id = room_id.to_string();
        self.with_conn(move |conn| query_room(conn, &id)).await
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
            created_at: Utc::now().trunc_subsecs(6),
        };
        let result = message.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    message.id.to_string(),
                    message.room_id.to_string(),
                    message.sender_id.to_string(),
                    &message.body,
                    fmt_ts(message.created_at),
                ),
            )?;
            Ok(())
        })
        .await?;

        Ok(result)
    }

    async fn messages_in_room(
        &self,
        room_id: RoomId,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, StoreError> {
        let room = room_id.to_string();
        self.with_conn(move |conn| query_messages(conn, &room, limit, before)).await
    }

    async fn mark_read(
        &self,
        room_id: RoomId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<Option<Participant>, StoreError> {
        let room = room_id.to_string();
        let user = user_id.to_string();
        let at = at.trunc_subsecs(6);

        self.with_conn(move |conn| {
            let Some(current) = query_participant(conn, &room, &user)? else {
                return Ok(None);
            };

            // Max-wins: a marker never moves backward
            if current.last_read_at.map_or(true, |t| t < at) {
                conn.execute(
                    "UPDATE room_participants SET last_read_at = ?3
                     WHERE room_id = ?1 AND user_id = ?2",
                    (&room, &user, fmt_ts(at)),
                )?;
                return Ok(Some(Participant {
                    last_read_at: Some(at),
                    ..current
                }));
            }

            Ok(Some(current))
        })
        .await
    }

    async fn participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Participant>, StoreError> {
        let room = room_id.to_string();
        let user = user_id.to_string();
        self.with_conn(move |conn| query_participant(conn, &room, &user)).await
    }

    async fn participants_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Participant>, StoreError> {
        let user = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT room_id, user_id, last_read_at FROM room_participants
                 WHERE user_id = ?1",
            )?;

            let rows = stmt
                .query_map([&user], |row| {
                    Ok(ParticipantRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        last_read_at: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(ParticipantRow::into_participant).collect()
        })
        .await
    }

    async fn count_messages_since(
        &self,
        room_id: RoomId,
        user_id: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        let room = room_id.to_string();
        let user = user_id.to_string();

        self.with_conn(move |conn| {
            let count: i64 = match since {
                Some(t) => conn.query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE room_id = ?1 AND sender_id != ?2 AND created_at > ?3",
                    (&room, &user, fmt_ts(t)),
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COUNT(*) FROM messages
                     WHERE room_id = ?1 AND sender_id != ?2",
                    (&room, &user),
                    |row| row.get(0),
                )?,
            };
            Ok(count as u64)
        })
        .await
    }
}

#[async_trait]
impl RatingStore for SqliteStore {
    async fn upsert_rating(&self, rating: &Rating) -> Result<(), StoreError> {
        let mut rating = rating.clone();
        rating.created_at = rating.created_at.trunc_subsecs(6);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO ratings
                 (place_id, user_id, food, service, value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    &rating.place_id,
                    rating.user_id.to_string(),
                    rating.food,
                    rating.service,
                    rating.value,
                    fmt_ts(rating.created_at),
                ),
            )?;
            Ok(())
        })
        .await
    }

    async fn ratings_for_place(&self, place_id: &PlaceId) -> Result<Vec<Rating>, StoreError> {
        let place = place_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT place_id, user_id, food, service, value, created_at
                 FROM ratings WHERE place_id = ?1",
            )?;

            let rows = stmt
                .query_map([&place], |row| {
                    Ok(RatingRow {
                        place_id: row.get(0)?,
                        user_id: row.get(1)?,
                        food: row.get(2)?,
                        service: row.get(3)?,
                        value: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter().map(RatingRow::into_rating).collect()
        })
        .await
    }
}

// Row types map SQLite text columns before parsing back into model types.

struct ParticipantRow {
    room_id: String,
    user_id: String,
    last_read_at: Option<String>,
}

impl ParticipantRow {
    fn into_participant(self) -> Result<Participant, StoreError> {
        Ok(Participant {
            room_id: parse_uuid(&self.room_id, "room_id")?,
            user_id: parse_uuid(&self.user_id, "user_id")?,
            last_read_at: self
                .last_read_at
                .map(|t| parse_ts(&t, "last_read_at"))
                .transpose()?,
        })
    }
}

struct MessageRow {
    id: String,
    room_id: String,
    sender_id: String,
    body: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, StoreError> {
        Ok(Message {
            id: parse_uuid(&self.id, "id")?,
            room_id: parse_uuid(&self.room_id, "room_id")?,
            sender_id: parse_uuid(&self.sender_id, "sender_id")?,
            body: self.body,
            created_at: parse_ts(&self.created_at, "created_at")?,
        })
    }
}

struct RatingRow {
    place_id: String,
    user_id: String,
    food: u8,
    service: u8,
    value: u8,
    created_at: String,
}

impl RatingRow {
    fn into_rating(self) -> Result<Rating, StoreError> {
        Ok(Rating {
            place_id: self.place_id,
            user_id: parse_uuid(&self.user_id, "user_id")?,
            food: self.food,
            service: self.service,
            value: self.value,
            created_at: parse_ts(&self.created_at, "created_at")?,
        })
    }
}

fn query_room(conn: &Connection, id: &str) -> Result<Option<Room>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM rooms WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .optional()?;

    row.map(|(id, name, created_at)| {
        Ok(Room {
            id: parse_uuid(&id, "id")?,
            name,
            created_at: parse_ts(&created_at, "created_at")?,
        })
    })
    .transpose()
}

fn query_participant(
    conn: &Connection,
    room: &str,
    user: &str,
) -> Result<Option<Participant>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT room_id, user_id, last_read_at FROM room_participants
         WHERE room_id = ?1 AND user_id = ?2",
    )?;

    let row = stmt
        .query_row([room, user], |row| {
            Ok(ParticipantRow {
                room_id: row.get(0)?,
                user_id: row.get(1)?,
                last_read_at: row.get(2)?,
            })
        })
        .optional()?;

    row.map(ParticipantRow::into_participant).transpose()
}

fn query_messages(
    conn: &Connection,
    room: &str,
    limit: u32,
    before: Option<DateTime<Utc>>,
) -> Result<Vec<Message>, StoreError> {
    // Cursor-based pagination: `before` is the created_at of the oldest
    // message from the previous page.
    let mut stmt = match before {
        Some(_) => conn.prepare(
            "SELECT id, room_id, sender_id, body, created_at FROM messages
             WHERE room_id = ?1 AND created_at < ?2
             ORDER BY created_at DESC LIMIT ?3",
        )?,
        None => conn.prepare(
            "SELECT id, room_id, sender_id, body, created_at FROM messages
             WHERE room_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?,
    };

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<MessageRow> {
        Ok(MessageRow {
            id: row.get(0)?,
            room_id: row.get(1)?,
            sender_id: row.get(2)?,
            body: row.get(3)?,
            created_at: row.get(4)?,
        })
    };

    let rows = match before {
        Some(t) => stmt
            .query_map(rusqlite::params![room, fmt_ts(t), limit], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![room, limit], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    rows.into_iter().map(MessageRow::into_message).collect()
}
