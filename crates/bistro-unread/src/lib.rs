//! Live unread-message totals.
//!
//! One [`UnreadCounter`] per signed-in user keeps a running total of
//! messages across all rooms the user participates in that are newer than
//! that room's read marker and not authored by the user. The total is
//! recomputed from the store on startup and whenever incremental math stops
//! being trustworthy; in between, message events adjust it in place.

pub mod counter;
pub mod reconcile;

pub use counter::UnreadCounter;
pub use reconcile::total_unread;
