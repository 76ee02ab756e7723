//! IdGenerator port.
//!
//! `UlidGenerator` stamps ULIDs with the injected clock and keeps them
//! monotonic: two ids minted in the same millisecond (or after the clock was
//! moved backwards) still sort in minting order. Queue ordering relies on
//! that for its tie-break.

use std::sync::Mutex;
use std::time::SystemTime;

use ulid::{Generator, Ulid};

use crate::domain::ids::{BookId, MemberId, ReservationId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_member_id(&self) -> MemberId;

    fn generate_book_id(&self) -> BookId;

    fn generate_reservation_id(&self) -> ReservationId;
}

pub struct UlidGenerator<C> {
    clock: C,
    generator: Mutex<Generator>,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            generator: Mutex::new(Generator::new()),
        }
    }

    fn next_ulid(&self) -> Ulid {
        let at = SystemTime::from(self.clock.now());
        let mut generator = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        // Overflow needs 2^80 ids inside one millisecond; fall back to a fresh
        // random ULID rather than failing the caller.
        generator
            .generate_from_datetime(at)
            .unwrap_or_else(|_| Ulid::from_datetime(at))
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_member_id(&self) -> MemberId {
        MemberId::from_ulid(self.next_ulid())
    }

    fn generate_book_id(&self) -> BookId {
        BookId::from_ulid(self.next_ulid())
    }

    fn generate_reservation_id(&self) -> ReservationId {
        ReservationId::from_ulid(self.next_ulid())
    }
}
