//! crates/revision_core/src/expiry.rs
//!
//! Time-based expiry for in-progress sessions, evaluated lazily on every
//! read and submit attempt rather than by a background sweep. The computed
//! result is authoritative for the current call; the persisted `expired`
//! status may lag until the next access.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{PracticeSession, SessionStatus};

/// Fixed buffer added to a session's declared limit before it is considered
/// expired. Absorbs clock skew and network latency between the client's
/// timer and the server receiving the submit. Not user-configurable.
pub const GRACE_MINUTES: i64 = 2;

/// The instant after which an in-progress session counts as expired.
pub fn deadline(started_at: DateTime<Utc>, time_limit_minutes: u32) -> DateTime<Utc> {
    started_at + Duration::minutes(time_limit_minutes as i64 + GRACE_MINUTES)
}

/// True iff `now` is strictly past the deadline. At the boundary instant
/// the session is still live.
pub fn is_expired(started_at: DateTime<Utc>, time_limit_minutes: u32, now: DateTime<Utc>) -> bool {
    now > deadline(started_at, time_limit_minutes)
}

/// The status a session effectively has at `now`. Only `in_progress`
/// sessions can differ from their stored status.
pub fn effective_status(session: &PracticeSession, now: DateTime<Utc>) -> SessionStatus {
    match (session.status, session.started_at) {
        (SessionStatus::InProgress, Some(started_at))
            if is_expired(started_at, session.time_limit_minutes, now) =>
        {
            SessionStatus::Expired
        }
        (status, _) => status,
    }
}
