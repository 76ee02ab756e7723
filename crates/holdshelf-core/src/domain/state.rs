//! Reservation state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reservation status.
///
/// State transitions:
/// - Queued -> Ready (promotion or manual mark-ready)
/// - Queued -> Cancelled
/// - Ready -> Cancelled
///
/// Cancelled is terminal. Self-transitions are not transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Waiting for the book's ready slot.
    Queued,

    /// Book is held for pickup by this member.
    Ready,

    /// Inactive, never changes again.
    Cancelled,
}

impl ReservationStatus {
    /// Statuses that count as live for uniqueness checks and sweeps.
    pub const LIVE: [ReservationStatus; 2] = [ReservationStatus::Queued, ReservationStatus::Ready];

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Cancelled)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Queued, Ready) | (Queued, Cancelled) | (Ready, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Queued => "queued",
            ReservationStatus::Ready => "ready",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
