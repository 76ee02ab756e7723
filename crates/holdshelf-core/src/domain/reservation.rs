//! Reservation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ReservationError;
use super::ids::{BookId, MemberId, ReservationId};
use super::state::ReservationStatus;

/// One member's claim on one book.
///
/// Status only changes through [`Reservation::transition`], which rejects
/// every edge the state machine does not have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub member: MemberId,
    pub book: BookId,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        member: MemberId,
        book: BookId,
        status: ReservationStatus,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            member,
            book,
            status,
            created_at,
            expires_at,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// `now > expires_at`. A reservation expiring exactly at `now` is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Move to `next`, or fail without touching the record.
    pub fn transition(&mut self, next: ReservationStatus) -> Result<(), ReservationError> {
        if !self.status.can_transition_to(next) {
            return Err(ReservationError::InvalidState {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Queue position: oldest first, then by id, which is monotonic in
    /// creation order. Backs `ReservationOrder::CreatedAt`.
    pub fn queue_key(&self) -> (DateTime<Utc>, ReservationId) {
        (self.created_at, self.id)
    }
}
