use rusqlite::Connection;
use tracing::info;

use crate::store::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- User ids come from the external identity provider; there is no
        -- local users table to reference.
        CREATE TABLE IF NOT EXISTS room_participants (
            room_id       TEXT NOT NULL REFERENCES rooms(id),
            user_id       TEXT NOT NULL,
            last_read_at  TEXT,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON room_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            sender_id   TEXT NOT NULL,
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS ratings (
            place_id    TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            food        INTEGER NOT NULL,
            service     INTEGER NOT NULL,
            value       INTEGER NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (place_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
