//! InMemoryStore - transactional in-memory entity store.
//!
//! # 実装詳細
//! - One `Mutex<Tables>` serialises transactions.
//! - A transaction works on a copy of the tables and swaps it in on `Ok`,
//!   so an `Err` (or a panic) leaves the committed state untouched.
//! - `save_reservation` enforces the ready-slot and live-tuple uniqueness
//!   rules the way a partial unique index would.
//! - Whole-store snapshots (de)serialise with serde for the CLI data file.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::errors::EntityRef;
use crate::domain::ids::{BookId, MemberId, ReservationId};
use crate::domain::{Book, Member, Reservation, ReservationStatus};
use crate::ports::entity_store::{
    Constraint, EntityStore, ReservationFilter, ReservationOrder, StoreError, StoreTx,
};

/// Serialisable copy of every table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    members: BTreeMap<MemberId, Member>,
    books: BTreeMap<BookId, Book>,
    reservations: BTreeMap<ReservationId, Reservation>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    /// Books whose reservation writes fail with a backend error, with the
    /// number of writes each transaction may make first.
    failing_books: Mutex<HashMap<BookId, usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot, checking every uniqueness rule on the way in.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let store = Self::new();
        store.transaction(|tx| {
            for member in snapshot.members {
                tx.insert_member(member)?;
            }
            for book in snapshot.books {
                tx.insert_book(book)?;
            }
            for reservation in &snapshot.reservations {
                tx.save_reservation(reservation)?;
            }
            Ok::<_, StoreError>(())
        })?;
        Ok(store)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let tables = self.lock_tables();
        StoreSnapshot {
            members: tables.members.values().cloned().collect(),
            books: tables.books.values().cloned().collect(),
            reservations: tables.reservations.values().cloned().collect(),
        }
    }

    /// Make every reservation write for `book` fail until cleared.
    pub fn inject_write_failure(&self, book: BookId) {
        self.inject_write_failure_after(book, 0);
    }

    /// Let each transaction make `writes` reservation writes for `book`, then
    /// fail the next one. The budget resets with every transaction.
    pub fn inject_write_failure_after(&self, book: BookId, writes: usize) {
        self.lock_failures().insert(book, writes);
    }

    pub fn clear_write_failures(&self) {
        self.lock_failures().clear();
    }

    // Committed tables are only ever replaced wholesale after a successful
    // transaction, so a poisoned lock still guards consistent data.
    fn lock_tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<BookId, usize>> {
        self.failing_books.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EntityStore for InMemoryStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut committed = self.lock_tables();
        let mut tx = InMemoryTx {
            tables: committed.clone(),
            failing_books: self.lock_failures().clone(),
        };

        let out = f(&mut tx)?;
        *committed = tx.tables;
        Ok(out)
    }
}

/// Working copy used by one transaction.
struct InMemoryTx {
    tables: Tables,
    failing_books: HashMap<BookId, usize>,
}

impl InMemoryTx {
    fn check_reservation_constraints(&self, r: &Reservation) -> Result<(), StoreError> {
        let mut others = self
            .tables
            .reservations
            .values()
            .filter(|other| other.id != r.id && other.book == r.book);

        // Ready slot first, so a second Ready reports the conflict rather than
        // a tuple duplicate.
        if r.status == ReservationStatus::Ready {
            if let Some(holder) = others
                .clone()
                .find(|other| other.status == ReservationStatus::Ready)
            {
                return Err(StoreError::Constraint(Constraint::ReadySlot {
                    book: r.book,
                    holder: holder.id,
                }));
            }
        }
        if r.is_live() && others.any(|other| other.member == r.member && other.status == r.status) {
            return Err(StoreError::Constraint(Constraint::LiveTuple {
                book: r.book,
                member: r.member,
                status: r.status,
            }));
        }
        Ok(())
    }
}

impl StoreTx for InMemoryTx {
    fn member(&self, id: MemberId) -> Result<Member, StoreError> {
        self.tables
            .members
            .get(&id)
            .cloned()
            .ok_or(StoreError::Missing(EntityRef::Member(id)))
    }

    fn members(&self) -> Result<Vec<Member>, StoreError> {
        Ok(self.tables.members.values().cloned().collect())
    }

    fn insert_member(&mut self, member: Member) -> Result<(), StoreError> {
        if self.tables.members.values().any(|m| m.email == member.email) {
            return Err(StoreError::Constraint(Constraint::MemberEmail(member.email)));
        }
        self.tables.members.insert(member.id, member);
        Ok(())
    }

    fn book(&self, id: BookId) -> Result<Book, StoreError> {
        self.tables
            .books
            .get(&id)
            .cloned()
            .ok_or(StoreError::Missing(EntityRef::Book(id)))
    }

    fn books(&self) -> Result<Vec<Book>, StoreError> {
        Ok(self.tables.books.values().cloned().collect())
    }

    fn insert_book(&mut self, book: Book) -> Result<(), StoreError> {
        if self.tables.books.values().any(|b| b.isbn == book.isbn) {
            return Err(StoreError::Constraint(Constraint::BookIsbn(book.isbn)));
        }
        self.tables.books.insert(book.id, book);
        Ok(())
    }

    fn reservation(&self, id: ReservationId) -> Result<Reservation, StoreError> {
        self.tables
            .reservations
            .get(&id)
            .cloned()
            .ok_or(StoreError::Missing(EntityRef::Reservation(id)))
    }

    fn find_reservations(
        &self,
        filter: &ReservationFilter,
        order: ReservationOrder,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut found: Vec<Reservation> = self
            .tables
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        order.sort(&mut found);
        Ok(found)
    }

    fn save_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        if let Some(left) = self.failing_books.get_mut(&reservation.book) {
            if *left == 0 {
                return Err(StoreError::Backend(format!(
                    "write rejected for {}",
                    reservation.book
                )));
            }
            *left -= 1;
        }
        if !self.tables.members.contains_key(&reservation.member) {
            return Err(StoreError::Missing(EntityRef::Member(reservation.member)));
        }
        if !self.tables.books.contains_key(&reservation.book) {
            return Err(StoreError::Missing(EntityRef::Book(reservation.book)));
        }
        self.check_reservation_constraints(reservation)?;

        self.tables
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }
}
