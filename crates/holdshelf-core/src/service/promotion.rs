//! Queue promotion: filling a book's ready slot from its queue.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::ReservationService;
use super::transitions::{cancel_in, ready_in};
use crate::config::ReservationPolicy;
use crate::domain::{BookId, Reservation, ReservationError, ReservationId, ReservationStatus};
use crate::ports::{Clock, EntityStore, ReservationFilter, ReservationOrder, StoreTx};

/// What happened to one book when its expired reservations were settled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookSettlement {
    pub cancelled: Vec<Reservation>,
    pub promoted: Option<Reservation>,
}

impl<S, C> ReservationService<S, C>
where
    S: EntityStore,
    C: Clock + Clone + 'static,
{
    /// Does the book currently have a Ready reservation?
    pub fn has_active_reservation(&self, book: BookId) -> Result<bool, ReservationError> {
        self.store.transaction(|tx| {
            tx.book(book)?;
            has_active_in(tx, book)
        })
    }

    /// Oldest Queued reservation for the book, if any.
    pub fn next_queued(&self, book: BookId) -> Result<Option<Reservation>, ReservationError> {
        self.store.transaction(|tx| {
            tx.book(book)?;
            next_queued_in(tx, book)
        })
    }

    /// Promote the head of the book's queue if the ready slot is free.
    /// Queued reservations that have already expired are passed over.
    ///
    /// The promoted reservation gets a fresh pickup window starting now.
    /// Call this after anything that may have freed the slot.
    pub fn promote_if_eligible(
        &self,
        book: BookId,
    ) -> Result<Option<Reservation>, ReservationError> {
        let now = self.now();
        self.store
            .transaction(|tx| promote_in(tx, book, now, &self.policy))
    }
}

pub(crate) fn has_active_in(tx: &dyn StoreTx, book: BookId) -> Result<bool, ReservationError> {
    let ready = tx.find_reservations(
        &ReservationFilter::new()
            .book(book)
            .status(ReservationStatus::Ready),
        ReservationOrder::CreatedAt,
    )?;
    Ok(!ready.is_empty())
}

pub(crate) fn next_queued_in(
    tx: &dyn StoreTx,
    book: BookId,
) -> Result<Option<Reservation>, ReservationError> {
    let queued = tx.find_reservations(
        &ReservationFilter::new()
            .book(book)
            .status(ReservationStatus::Queued),
        ReservationOrder::CreatedAt,
    )?;
    Ok(queued.into_iter().next())
}

pub(crate) fn promote_in(
    tx: &mut dyn StoreTx,
    book: BookId,
    now: DateTime<Utc>,
    policy: &ReservationPolicy,
) -> Result<Option<Reservation>, ReservationError> {
    tx.book(book)?;
    if has_active_in(tx, book)? {
        debug!(book = %book, "ready slot occupied, nothing to promote");
        return Ok(None);
    }
    let Some(next) = next_eligible_in(tx, book, now)? else {
        debug!(book = %book, "no unexpired queued reservation, nothing to promote");
        return Ok(None);
    };
    ready_in(tx, next, Some(now + policy.pickup_window())).map(Some)
}

/// Oldest Queued reservation that has not lapsed at `now`. Lapsed ones stay
/// Queued for the sweep to cancel; promoting them would renew their window.
pub(crate) fn next_eligible_in(
    tx: &dyn StoreTx,
    book: BookId,
    now: DateTime<Utc>,
) -> Result<Option<Reservation>, ReservationError> {
    let queued = tx.find_reservations(
        &ReservationFilter::new()
            .book(book)
            .status(ReservationStatus::Queued),
        ReservationOrder::CreatedAt,
    )?;
    Ok(queued.into_iter().find(|r| !r.is_expired_at(now)))
}

/// Cancel whichever of `candidates` are still live and expired at `now`, then
/// promote. Candidates that were renewed or cancelled since they were picked
/// are skipped, so the unit is safe to repeat.
pub(crate) fn settle_expired_in(
    tx: &mut dyn StoreTx,
    book: BookId,
    candidates: &[ReservationId],
    now: DateTime<Utc>,
    policy: &ReservationPolicy,
) -> Result<BookSettlement, ReservationError> {
    let mut settlement = BookSettlement::default();
    for &id in candidates {
        let current = tx.reservation(id)?;
        if current.book != book || !current.is_live() || !current.is_expired_at(now) {
            debug!(reservation = %id, status = %current.status, "no longer expired, skipped");
            continue;
        }
        settlement.cancelled.push(cancel_in(tx, id)?);
    }
    settlement.promoted = promote_in(tx, book, now, policy)?;
    Ok(settlement)
}
