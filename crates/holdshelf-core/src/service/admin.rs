//! Desk actions staff take by hand.
//!
//! These compose the state machine and promotion operations; they add no
//! rules of their own.

use std::collections::BTreeMap;

use tracing::info;

use super::ReservationService;
use super::promotion::{has_active_in, promote_in, settle_expired_in};
use super::transitions::{cancel_in, ready_in};
use crate::domain::{BookId, Reservation, ReservationError, ReservationId, ReservationStatus};
use crate::ports::{Clock, EntityStore, ReservationFilter, ReservationOrder};

/// Result of returning a book to the desk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReturnOutcome {
    /// The Ready reservation that was closed, if there was one.
    pub released: Option<Reservation>,
    /// Whoever was promoted into the freed slot.
    pub promoted: Option<Reservation>,
}

impl<S, C> ReservationService<S, C>
where
    S: EntityStore,
    C: Clock + Clone + 'static,
{
    /// The current holder brought the book back: close their reservation and
    /// hand the slot to the next in line, as one unit.
    pub fn return_book(&self, book: BookId) -> Result<ReturnOutcome, ReservationError> {
        let now = self.now();
        let outcome = self.store.transaction(|tx| {
            tx.book(book)?;
            let holder = tx
                .find_reservations(
                    &ReservationFilter::new()
                        .book(book)
                        .status(ReservationStatus::Ready),
                    ReservationOrder::CreatedAt,
                )?
                .into_iter()
                .next();
            let released = match holder {
                Some(r) => Some(cancel_in(tx, r.id)?),
                None => None,
            };
            let promoted = promote_in(tx, book, now, &self.policy)?;
            Ok::<_, ReservationError>(ReturnOutcome { released, promoted })
        })?;

        info!(
            book = %book,
            released = outcome.released.is_some(),
            promoted = outcome.promoted.is_some(),
            "book returned"
        );
        Ok(outcome)
    }

    /// Promote the selected reservations whose book has a free slot, even if
    /// they are not first in line. Selections that are not Queued, or whose
    /// hold has lapsed, are skipped.
    ///
    /// Each selection is its own unit; an error stops the batch but keeps the
    /// promotions already made.
    pub fn promote_selected(
        &self,
        ids: &[ReservationId],
    ) -> Result<Vec<Reservation>, ReservationError> {
        let now = self.now();
        let window = self.policy.pickup_window();
        let mut promoted = Vec::new();
        for &id in ids {
            let result = self.store.transaction(|tx| {
                let r = tx.reservation(id)?;
                if r.status != ReservationStatus::Queued
                    || r.is_expired_at(now)
                    || has_active_in(tx, r.book)?
                {
                    return Ok(None);
                }
                ready_in(tx, r, Some(now + window)).map(Some)
            })?;
            promoted.extend(result);
        }
        info!(selected = ids.len(), promoted = promoted.len(), "promoted selection");
        Ok(promoted)
    }

    /// Cancel the selected reservations that are live and expired, then fill
    /// each affected book's slot. Returns the number cancelled.
    pub fn cancel_expired_selected(
        &self,
        ids: &[ReservationId],
    ) -> Result<usize, ReservationError> {
        let now = self.now();
        let mut by_book: BTreeMap<BookId, Vec<ReservationId>> = BTreeMap::new();
        self.store.transaction(|tx| {
            for &id in ids {
                let r = tx.reservation(id)?;
                if r.is_live() && r.is_expired_at(now) {
                    by_book.entry(r.book).or_default().push(id);
                }
            }
            Ok::<_, ReservationError>(())
        })?;

        let mut cancelled = 0;
        for (book, candidates) in &by_book {
            let settlement = self
                .store
                .transaction(|tx| settle_expired_in(tx, *book, candidates, now, &self.policy))?;
            cancelled += settlement.cancelled.len();
        }
        info!(selected = ids.len(), cancelled, "cancelled expired selection");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use rstest::rstest;

    use super::*;
    use crate::service::NewReservation;
    use crate::service::testing::{Desk, desk, t0};

    #[rstest]
    fn return_book_hands_slot_to_next_in_line(desk: Desk) {
        let holder = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();
        let next = desk
            .service
            .create(NewReservation::queued(desk.bob.id, desk.book.id))
            .unwrap();

        let outcome = desk.service.return_book(desk.book.id).unwrap();

        assert_eq!(outcome.released.unwrap().id, holder.id);
        assert_eq!(outcome.promoted.unwrap().id, next.id);
        assert_eq!(
            desk.service.reservation(holder.id).unwrap().status,
            ReservationStatus::Cancelled
        );
    }

    #[rstest]
    fn return_without_holder_or_queue_changes_nothing(desk: Desk) {
        let outcome = desk.service.return_book(desk.book.id).unwrap();

        assert_eq!(outcome, ReturnOutcome::default());
    }

    #[rstest]
    fn promote_selected_skips_occupied_books_and_non_queued(desk: Desk) {
        let other = desk
            .service
            .add_book("Kindred", "Butler", "9780807083697", true)
            .unwrap();
        let holder = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();
        let blocked = desk
            .service
            .create(NewReservation::queued(desk.bob.id, desk.book.id))
            .unwrap();
        let free = desk
            .service
            .create(NewReservation::queued(desk.carol.id, other.id))
            .unwrap();

        let promoted = desk
            .service
            .promote_selected(&[holder.id, blocked.id, free.id])
            .unwrap();

        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].id, free.id);
        assert_eq!(promoted[0].expires_at, t0() + TimeDelta::days(7));
    }

    #[rstest]
    fn promote_selected_leaves_lapsed_holds_for_the_sweep(desk: Desk) {
        let lapsed = desk
            .service
            .create(
                NewReservation::queued(desk.alice.id, desk.book.id)
                    .expires_at(t0() + TimeDelta::hours(1)),
            )
            .unwrap();
        desk.clock.advance(TimeDelta::hours(2));

        let promoted = desk.service.promote_selected(&[lapsed.id]).unwrap();

        assert!(promoted.is_empty());
        let stored = desk.service.reservation(lapsed.id).unwrap();
        assert_eq!(stored.status, ReservationStatus::Queued);
        assert!(desk.service.is_expired(&stored));
    }

    #[rstest]
    fn return_book_skips_a_lapsed_queue_head(desk: Desk) {
        desk.service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();
        let lapsed = desk
            .service
            .create(
                NewReservation::queued(desk.bob.id, desk.book.id)
                    .expires_at(t0() + TimeDelta::hours(1)),
            )
            .unwrap();
        let behind = desk
            .service
            .create(NewReservation::queued(desk.carol.id, desk.book.id))
            .unwrap();
        desk.clock.advance(TimeDelta::hours(2));

        let outcome = desk.service.return_book(desk.book.id).unwrap();

        assert_eq!(outcome.promoted.map(|r| r.id), Some(behind.id));
        assert_eq!(
            desk.service.reservation(lapsed.id).unwrap().status,
            ReservationStatus::Queued
        );
    }

    #[rstest]
    fn cancel_expired_selected_only_touches_expired_and_refills(desk: Desk) {
        let stale = desk
            .service
            .create(
                NewReservation::ready(desk.alice.id, desk.book.id)
                    .expires_at(t0() + TimeDelta::hours(1)),
            )
            .unwrap();
        let fresh = desk
            .service
            .create(NewReservation::queued(desk.bob.id, desk.book.id))
            .unwrap();
        desk.clock.advance(TimeDelta::hours(2));

        let cancelled = desk
            .service
            .cancel_expired_selected(&[stale.id, fresh.id])
            .unwrap();

        assert_eq!(cancelled, 1);
        let fresh = desk.service.reservation(fresh.id).unwrap();
        assert_eq!(fresh.status, ReservationStatus::Ready);
    }
}
