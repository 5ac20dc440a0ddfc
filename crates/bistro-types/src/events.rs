use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{RoomId, UserId};

/// Row-level change feed published by the backend. Every insert into
/// `messages` and every update of a read marker produces exactly one event,
/// delivered globally; consumers filter for themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// A new message was posted
    MessageCreated {
        id: Uuid,
        room_id: RoomId,
        sender_id: UserId,
        body: String,
        created_at: DateTime<Utc>,
    },

    /// A participant's read marker moved
    ReadMarkerUpdated {
        room_id: RoomId,
        user_id: UserId,
        last_read_at: DateTime<Utc>,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Bind this connection to a user
    Identify { user_id: UserId },

    /// Subscribe to room-scoped events for specific rooms.
    /// The server only forwards message events for subscribed rooms.
    Subscribe { room_ids: Vec<RoomId> },
}

/// Events sent FROM server TO client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Connection identified successfully
    Ready { user_id: UserId },

    /// The user's total unread count changed
    UnreadChanged { count: u64 },

    /// Relayed from the change feed for subscribed rooms
    MessageCreated {
        id: Uuid,
        room_id: RoomId,
        sender_id: UserId,
        body: String,
        created_at: DateTime<Utc>,
    },

    /// Relayed from the change feed for the connection's own user
    ReadMarkerUpdated {
        room_id: RoomId,
        user_id: UserId,
        last_read_at: DateTime<Utc>,
    },
}

impl From<ChatEvent> for ServerEvent {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::MessageCreated {
                id,
                room_id,
                sender_id,
                body,
                created_at,
            } => ServerEvent::MessageCreated {
                id,
                room_id,
                sender_id,
                body,
                created_at,
            },
            ChatEvent::ReadMarkerUpdated {
                room_id,
                user_id,
                last_read_at,
            } => ServerEvent::ReadMarkerUpdated {
                room_id,
                user_id,
                last_read_at,
            },
        }
    }
}
