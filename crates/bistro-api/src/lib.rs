pub mod cache;
pub mod messages;
pub mod ratings;
pub mod rooms;
pub mod unread;

use std::sync::Arc;
use std::time::Duration;

use bistro_db::{ChatStore, RatingStore};
use bistro_gateway::dispatcher::Dispatcher;
use bistro_types::models::{PlaceId, RatingStats};

use crate::cache::TtlCache;

/// Rating stats are cheap to serve slightly stale.
pub const STATS_CACHE_TTL: Duration = Duration::from_secs(60);

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub chat: Arc<dyn ChatStore>,
    pub ratings: Arc<dyn RatingStore>,
    pub dispatcher: Dispatcher,
    pub stats_cache: TtlCache<PlaceId, RatingStats>,
}
