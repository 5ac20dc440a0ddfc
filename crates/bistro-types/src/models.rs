use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type RoomId = Uuid;
pub type UserId = Uuid;

/// Place identifiers come from the external places provider and are opaque.
pub type PlaceId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One row per (room, user) pair. `last_read_at = None` means the user has
/// never opened the room: everything in it counts as unread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Messages are immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A user's rating of a place, split into component scores (1..=5 each).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub place_id: PlaceId,
    pub user_id: UserId,
    pub food: u8,
    pub service: u8,
    pub value: u8,
    pub created_at: DateTime<Utc>,
}

/// Component weights for the overall score of a single rating.
const FOOD_WEIGHT: f64 = 0.5;
const SERVICE_WEIGHT: f64 = 0.3;
const VALUE_WEIGHT: f64 = 0.2;

impl Rating {
    /// Weighted overall score of this rating.
    pub fn overall(&self) -> f64 {
        FOOD_WEIGHT * self.food as f64
            + SERVICE_WEIGHT * self.service as f64
            + VALUE_WEIGHT * self.value as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingStats {
    pub average: f64,
    pub count: usize,
}

impl RatingStats {
    /// Mean of the weighted overall scores. `None` for an unrated place.
    pub fn from_ratings(ratings: &[Rating]) -> Option<Self> {
        if ratings.is_empty() {
            return None;
        }
        let sum: f64 = ratings.iter().map(Rating::overall).sum();
        Some(Self {
            average: sum / ratings.len() as f64,
            count: ratings.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(food: u8, service: u8, value: u8) -> Rating {
        Rating {
            place_id: "place-1".into(),
            user_id: Uuid::new_v4(),
            food,
            service,
            value,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn overall_weights_components() {
        let r = rating(5, 5, 5);
        assert!((r.overall() - 5.0).abs() < 1e-9);

        let r = rating(5, 1, 1);
        // 0.5*5 + 0.3*1 + 0.2*1 = 3.0
        assert!((r.overall() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn stats_average_over_ratings() {
        let stats = RatingStats::from_ratings(&[rating(5, 5, 5), rating(1, 1, 1)]).unwrap();
        assert_eq!(stats.count, 2);
        assert!((stats.average - 3.0).abs() < 1e-9);
    }

    #[test]
    fn stats_empty_is_none() {
        assert!(RatingStats::from_ratings(&[]).is_none());
    }
}
