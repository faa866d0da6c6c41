//! Dispatch core services.
//!
//! Layering, leaves first: the presence index builds on the pure geo
//! kernel; the broadcast fabric on presence + sessions; the matcher on the
//! store, presence, sessions, and timers; the lifecycle controller on the
//! store, matcher, and sessions. No back edges.

pub mod broadcast;
pub mod driver_state;
pub mod lifecycle;
pub mod matcher;
pub mod offer_timers;
pub mod presence;
pub mod registry;

use domain::error::DispatchError;

/// Map a database failure onto the stable INTERNAL error code.
pub(crate) fn db_error(err: sqlx::Error) -> DispatchError {
    DispatchError::Internal(format!("database error: {err}"))
}
