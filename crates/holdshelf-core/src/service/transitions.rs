//! Reservation state machine operations.
//!
//! Validation order for anything that ends in Ready: transition legality,
//! then the book's ready slot (one Ready per book), then the live
//! (book, member, status) tuple. The store repeats the last two checks when
//! the record is saved.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{NewReservation, ReservationService};
use crate::config::ReservationPolicy;
use crate::domain::errors::DuplicateKey;
use crate::domain::{
    BookId, MemberId, Reservation, ReservationError, ReservationId, ReservationStatus,
};
use crate::ports::{Clock, EntityStore, ReservationFilter, ReservationOrder, StoreTx};

impl<S, C> ReservationService<S, C>
where
    S: EntityStore,
    C: Clock + Clone + 'static,
{
    /// Create a reservation in Queued or Ready status.
    pub fn create(&self, request: NewReservation) -> Result<Reservation, ReservationError> {
        let now = self.now();
        let id = self.ids.generate_reservation_id();
        self.store
            .transaction(|tx| create_in(tx, id, &request, now, &self.policy))
    }

    /// Cancel a live reservation. Cancelling a cancelled reservation is a
    /// no-op that returns the record unchanged.
    ///
    /// Cancelling does not promote anyone; follow up with
    /// [`ReservationService::promote_if_eligible`] for the book.
    pub fn cancel(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store.transaction(|tx| cancel_in(tx, id))
    }

    /// Queued -> Ready, keeping the current expiry.
    pub fn mark_ready(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store.transaction(|tx| {
            let reservation = tx.reservation(id)?;
            ready_in(tx, reservation, None)
        })
    }

    pub fn is_expired(&self, reservation: &Reservation) -> bool {
        reservation.is_expired_at(self.now())
    }
}

pub(crate) fn create_in(
    tx: &mut dyn StoreTx,
    id: ReservationId,
    request: &NewReservation,
    now: DateTime<Utc>,
    policy: &ReservationPolicy,
) -> Result<Reservation, ReservationError> {
    if request.status.is_terminal() {
        return Err(ReservationError::InvalidInitialStatus(request.status));
    }
    tx.member(request.member)?;
    tx.book(request.book)?;

    if request.status == ReservationStatus::Ready {
        ensure_ready_slot_free(tx, request.book, None)?;
    }
    ensure_unique_live(tx, request.book, request.member, request.status, None)?;

    let reservation = Reservation::new(
        id,
        request.member,
        request.book,
        request.status,
        now,
        request.expiry_from(now, policy),
    );
    tx.save_reservation(&reservation)?;

    info!(
        reservation = %reservation.id,
        book = %reservation.book,
        member = %reservation.member,
        status = %reservation.status,
        expires_at = %reservation.expires_at,
        "reservation created"
    );
    Ok(reservation)
}

pub(crate) fn cancel_in(
    tx: &mut dyn StoreTx,
    id: ReservationId,
) -> Result<Reservation, ReservationError> {
    let mut reservation = tx.reservation(id)?;
    if reservation.status.is_terminal() {
        debug!(reservation = %id, "already cancelled");
        return Ok(reservation);
    }

    let from = reservation.status;
    reservation.transition(ReservationStatus::Cancelled)?;
    tx.save_reservation(&reservation)?;

    info!(
        reservation = %reservation.id,
        book = %reservation.book,
        from = %from,
        "reservation cancelled"
    );
    Ok(reservation)
}

/// Move `reservation` to Ready, optionally replacing its expiry.
pub(crate) fn ready_in(
    tx: &mut dyn StoreTx,
    mut reservation: Reservation,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Reservation, ReservationError> {
    if !reservation.status.can_transition_to(ReservationStatus::Ready) {
        return Err(ReservationError::InvalidState {
            id: reservation.id,
            from: reservation.status,
            to: ReservationStatus::Ready,
        });
    }
    ensure_ready_slot_free(tx, reservation.book, Some(reservation.id))?;
    ensure_unique_live(
        tx,
        reservation.book,
        reservation.member,
        ReservationStatus::Ready,
        Some(reservation.id),
    )?;

    reservation.transition(ReservationStatus::Ready)?;
    if let Some(at) = expires_at {
        reservation.expires_at = at;
    }
    tx.save_reservation(&reservation)?;

    info!(
        reservation = %reservation.id,
        book = %reservation.book,
        member = %reservation.member,
        expires_at = %reservation.expires_at,
        "reservation ready for pickup"
    );
    Ok(reservation)
}

fn ensure_ready_slot_free(
    tx: &dyn StoreTx,
    book: BookId,
    except: Option<ReservationId>,
) -> Result<(), ReservationError> {
    let ready = tx.find_reservations(
        &ReservationFilter::new()
            .book(book)
            .status(ReservationStatus::Ready),
        ReservationOrder::CreatedAt,
    )?;
    match ready.into_iter().find(|r| Some(r.id) != except) {
        Some(holder) => Err(ReservationError::Conflict {
            book,
            holder: holder.id,
        }),
        None => Ok(()),
    }
}

fn ensure_unique_live(
    tx: &dyn StoreTx,
    book: BookId,
    member: MemberId,
    status: ReservationStatus,
    except: Option<ReservationId>,
) -> Result<(), ReservationError> {
    let existing = tx.find_reservations(
        &ReservationFilter::new()
            .book(book)
            .member(member)
            .status(status),
        ReservationOrder::CreatedAt,
    )?;
    if existing.iter().any(|r| Some(r.id) != except) {
        return Err(ReservationError::Duplicate(DuplicateKey::Reservation {
            book,
            member,
            status,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use rstest::rstest;

    use super::*;
    use crate::domain::ErrorKind;
    use crate::service::testing::{Desk, desk, t0};

    #[rstest]
    fn create_defaults_expiry_to_hold_period(desk: Desk) {
        let r = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();

        assert_eq!(r.status, ReservationStatus::Queued);
        assert_eq!(r.created_at, t0());
        assert_eq!(r.expires_at, t0() + TimeDelta::days(7));
    }

    #[rstest]
    fn create_keeps_explicit_expiry(desk: Desk) {
        let at = t0() + TimeDelta::hours(3);
        let r = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id).expires_at(at))
            .unwrap();

        assert_eq!(r.expires_at, at);
    }

    #[rstest]
    fn second_ready_reservation_conflicts(desk: Desk) {
        let first = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        let err = desk
            .service
            .create(NewReservation::ready(desk.bob.id, desk.book.id))
            .unwrap_err();

        assert!(matches!(err, ReservationError::Conflict { holder, .. } if holder == first.id));
    }

    #[rstest]
    fn ready_slot_is_checked_before_the_tuple(desk: Desk) {
        desk.service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        // Same member, same status: both rules are broken, the slot wins.
        let err = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[rstest]
    fn duplicate_live_tuple_is_rejected(desk: Desk) {
        desk.service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();

        let err = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[rstest]
    fn requeue_after_cancel_is_allowed(desk: Desk) {
        let first = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
        desk.service.cancel(first.id).unwrap();

        let again = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();

        assert_ne!(again.id, first.id);
    }

    #[rstest]
    fn member_may_hold_queued_and_ready_for_one_book(desk: Desk) {
        desk.service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        desk.service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
    }

    #[rstest]
    fn cannot_create_cancelled(desk: Desk) {
        let err = desk
            .service
            .create(
                NewReservation::queued(desk.alice.id, desk.book.id)
                    .with_status(ReservationStatus::Cancelled),
            )
            .unwrap_err();

        assert!(matches!(err, ReservationError::InvalidInitialStatus(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[rstest]
    fn unknown_member_is_not_found(desk: Desk) {
        let stranger = desk.service.ids.generate_member_id();

        let err = desk
            .service
            .create(NewReservation::queued(stranger, desk.book.id))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[rstest]
    fn cancel_twice_is_a_no_op(desk: Desk) {
        let r = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        let first = desk.service.cancel(r.id).unwrap();
        let second = desk.service.cancel(r.id).unwrap();

        assert_eq!(first.status, ReservationStatus::Cancelled);
        assert_eq!(second, first);
    }

    #[rstest]
    fn cancelled_never_moves_again(desk: Desk) {
        let r = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
        desk.service.cancel(r.id).unwrap();

        let err = desk.service.mark_ready(r.id).unwrap_err();

        assert!(matches!(
            err,
            ReservationError::InvalidState {
                from: ReservationStatus::Cancelled,
                to: ReservationStatus::Ready,
                ..
            }
        ));
        let stored = desk.service.reservation(r.id).unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
    }

    #[rstest]
    fn mark_ready_rechecks_the_slot(desk: Desk) {
        let queued = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
        let holder = desk
            .service
            .create(NewReservation::ready(desk.bob.id, desk.book.id))
            .unwrap();

        let err = desk.service.mark_ready(queued.id).unwrap_err();

        assert!(matches!(err, ReservationError::Conflict { holder: h, .. } if h == holder.id));
    }

    #[rstest]
    fn mark_ready_on_ready_is_not_a_transition(desk: Desk) {
        let r = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        let err = desk.service.mark_ready(r.id).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[rstest]
    fn mark_ready_keeps_expiry(desk: Desk) {
        let r = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();

        let ready = desk.service.mark_ready(r.id).unwrap();

        assert_eq!(ready.status, ReservationStatus::Ready);
        assert_eq!(ready.expires_at, r.expires_at);
    }

    #[rstest]
    fn expiry_follows_the_clock(desk: Desk) {
        let r = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();

        assert!(!desk.service.is_expired(&r));
        desk.clock.advance(TimeDelta::days(7));
        assert!(!desk.service.is_expired(&r));
        desk.clock.advance(TimeDelta::seconds(1));
        assert!(desk.service.is_expired(&r));
    }

    #[rstest]
    fn concurrent_mark_ready_leaves_one_ready(desk: Desk) {
        let queued: Vec<_> = [&desk.alice, &desk.bob, &desk.carol]
            .iter()
            .map(|m| {
                desk.service
                    .create(NewReservation::queued(m.id, desk.book.id))
                    .unwrap()
                    .id
            })
            .collect();
        let service = Arc::new(desk.service);

        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = queued
                .iter()
                .map(|&id| {
                    let service = Arc::clone(&service);
                    scope.spawn(move || service.mark_ready(id))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .filter_map(|o| o.as_ref().err())
                .all(|e| e.kind() == ErrorKind::Conflict)
        );
        assert_eq!(service.queue_length(desk.book.id).unwrap(), 2);
        assert!(service.has_active_reservation(desk.book.id).unwrap());
    }

    #[rstest]
    fn store_backstop_catches_a_second_ready_write(desk: Desk) {
        let first = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        // Write straight through a transaction, skipping the service checks.
        let mut rogue = first.clone();
        rogue.id = desk.service.ids.generate_reservation_id();
        rogue.member = desk.bob.id;
        let err = desk
            .service
            .store()
            .transaction(|tx| tx.save_reservation(&rogue).map_err(ReservationError::from))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
