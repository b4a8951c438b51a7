//! Server half of read-state reconciliation.
//!
//! The unread count is never stored. It is always derived from the highest
//! sequence of the conversation and the participant's monotonic read pointer,
//! so the badge cannot drift away from the message log.

use serde::Serialize;

use crate::error::{AppError, AppResult};

pub fn unread_count(highest_seq: i64, read_through_seq: i64) -> i64 {
    (highest_seq - read_through_seq).max(0)
}

/// Outcome of applying a mark-read request to a stored pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadAdvance {
    /// Pointer value after the request (the stored value if it was not moved).
    pub read_through_seq: i64,
    /// Whether the stored pointer moved.
    pub advanced: bool,
    pub unread_count: i64,
}

/// Applies `requested` to a pointer currently at `current` in a conversation
/// whose highest sequence is `highest_seq`.
///
/// Marking beyond the log is rejected. A request at or below the stored value
/// is a no-op, so duplicate and late requests from other tabs are harmless.
pub fn advance_read_pointer(current: i64, highest_seq: i64, requested: i64) -> AppResult<ReadAdvance> {
    if requested < 0 {
        return Err(AppError::InvalidArgument(format!(
            "throughSeq must not be negative (got {})",
            requested
        )));
    }
    if requested > highest_seq {
        return Err(AppError::InvalidArgument(format!(
            "throughSeq {} is beyond the latest message {}",
            requested, highest_seq
        )));
    }

    let read_through_seq = current.max(requested);
    Ok(ReadAdvance {
        read_through_seq,
        advanced: read_through_seq > current,
        unread_count: unread_count(highest_seq, read_through_seq),
    })
}
