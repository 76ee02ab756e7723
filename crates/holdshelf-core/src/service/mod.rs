//! ReservationService - the public face of the reservation core.
//!
//! Every operation runs inside one `EntityStore` transaction and re-checks
//! the invariants it depends on there, never from state read earlier.
//! （事前に読んだ状態ではなく、トランザクション内で必ず再確認する）
//!
//! # Layout
//! - `transitions`: create / cancel / mark-ready / expiry predicate
//! - `promotion`: ready-slot lookup, next-in-queue, promotion, per-book expiry settlement
//! - `admin`: manual desk actions (return a book, promote or expire a selection)
//! - `queries`: catalog registration and read-only listings
//!
//! The `*_in` functions are the transaction-scoped building blocks; the sweep
//! composes them into a single unit per book.

pub mod admin;
pub mod promotion;
pub mod queries;
pub mod transitions;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::ReservationPolicy;
use crate::domain::{BookId, MemberId, ReservationStatus};
use crate::ports::{Clock, EntityStore, IdGenerator, UlidGenerator};

pub use self::admin::ReturnOutcome;
pub use self::promotion::BookSettlement;

/// Request to create a reservation.
///
/// The expiry default is applied when the request is turned into a record,
/// from the policy's hold period and the creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub member: MemberId,
    pub book: BookId,
    pub status: ReservationStatus,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewReservation {
    pub fn queued(member: MemberId, book: BookId) -> Self {
        Self {
            member,
            book,
            status: ReservationStatus::Queued,
            expires_at: None,
        }
    }

    pub fn ready(member: MemberId, book: BookId) -> Self {
        Self {
            status: ReservationStatus::Ready,
            ..Self::queued(member, book)
        }
    }

    pub fn with_status(mut self, status: ReservationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn expiry_from(&self, created_at: DateTime<Utc>, policy: &ReservationPolicy) -> DateTime<Utc> {
        self.expires_at
            .unwrap_or_else(|| created_at + policy.hold_period())
    }
}

pub struct ReservationService<S, C> {
    store: Arc<S>,
    clock: C,
    ids: Arc<dyn IdGenerator>,
    policy: ReservationPolicy,
}

impl<S, C> ReservationService<S, C>
where
    S: EntityStore,
    C: Clock + Clone + 'static,
{
    /// Ids are minted from the same clock the service reads.
    pub fn new(store: Arc<S>, clock: C, policy: ReservationPolicy) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        Self {
            store,
            clock,
            ids,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for the service tests.

    use super::*;
    use crate::domain::{Book, Member};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    pub struct Desk {
        pub service: ReservationService<InMemoryStore, FixedClock>,
        pub clock: FixedClock,
        pub book: Book,
        pub alice: Member,
        pub bob: Member,
        pub carol: Member,
    }

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
    }

    #[rstest::fixture]
    pub fn desk() -> Desk {
        let clock = FixedClock::new(t0());
        let service = ReservationService::new(
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            ReservationPolicy::default(),
        );
        let book = service
            .add_book("The Left Hand of Darkness", "Le Guin", "9780441478125", true)
            .unwrap();
        let alice = service.register_member("Alice", "alice@example.com", None).unwrap();
        let bob = service.register_member("Bob", "bob@example.com", None).unwrap();
        let carol = service.register_member("Carol", "carol@example.com", None).unwrap();
        Desk {
            service,
            clock,
            book,
            alice,
            bob,
            carol,
        }
    }
}
