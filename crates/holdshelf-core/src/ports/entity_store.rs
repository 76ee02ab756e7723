//! EntityStore port: the system of record for members, books and reservations.
//!
//! All access goes through [`EntityStore::transaction`]. A transaction either
//! commits every write made through its [`StoreTx`] or none of them, and
//! writes to the same reservation or book are serialised by the store. The
//! core re-validates its invariants inside the transaction; implementations
//! must additionally refuse to save a record that would give a book two
//! Ready reservations or duplicate a live (book, member, status) tuple.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::errors::EntityRef;
use crate::domain::ids::{BookId, MemberId, ReservationId};
use crate::domain::{Book, Member, Reservation, ReservationStatus};

/// Uniqueness rules the store enforces on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Partial unique index on (book) where status = ready.
    ReadySlot { book: BookId, holder: ReservationId },
    /// Unique (book, member, status) among live reservations.
    LiveTuple {
        book: BookId,
        member: MemberId,
        status: ReservationStatus,
    },
    MemberEmail(String),
    BookIsbn(String),
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::ReadySlot { book, .. } => write!(f, "ready slot of {book}"),
            Constraint::LiveTuple { book, member, status } => {
                write!(f, "live ({book}, {member}, {status})")
            }
            Constraint::MemberEmail(email) => write!(f, "member email {email}"),
            Constraint::BookIsbn(isbn) => write!(f, "book isbn {isbn}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} does not exist")]
    Missing(EntityRef),

    #[error("constraint violated: {0}")]
    Constraint(Constraint),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// Reservation query. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub book: Option<BookId>,
    pub member: Option<MemberId>,
    pub statuses: Option<Vec<ReservationStatus>>,
    /// Only reservations with `expires_at < expires_before`.
    pub expires_before: Option<DateTime<Utc>>,
}

impl ReservationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(mut self, book: BookId) -> Self {
        self.book = Some(book);
        self
    }

    pub fn member(mut self, member: MemberId) -> Self {
        self.member = Some(member);
        self
    }

    pub fn status(self, status: ReservationStatus) -> Self {
        self.statuses([status])
    }

    pub fn statuses(mut self, statuses: impl IntoIterator<Item = ReservationStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn live(self) -> Self {
        self.statuses(ReservationStatus::LIVE)
    }

    pub fn expires_before(mut self, at: DateTime<Utc>) -> Self {
        self.expires_before = Some(at);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.book.is_none_or(|book| r.book == book)
            && self.member.is_none_or(|member| r.member == member)
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&r.status))
            && self.expires_before.is_none_or(|at| r.expires_at < at)
    }
}

/// Sort order for reservation queries. Ascending; ties break on id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReservationOrder {
    #[default]
    CreatedAt,
    ExpiresAt,
}

impl ReservationOrder {
    pub fn sort(self, reservations: &mut [Reservation]) {
        match self {
            ReservationOrder::CreatedAt => reservations.sort_by_key(Reservation::queue_key),
            ReservationOrder::ExpiresAt => reservations.sort_by_key(|r| (r.expires_at, r.id)),
        }
    }
}

/// Operations available inside a transaction.
pub trait StoreTx {
    fn member(&self, id: MemberId) -> Result<Member, StoreError>;

    fn members(&self) -> Result<Vec<Member>, StoreError>;

    fn insert_member(&mut self, member: Member) -> Result<(), StoreError>;

    fn book(&self, id: BookId) -> Result<Book, StoreError>;

    fn books(&self) -> Result<Vec<Book>, StoreError>;

    fn insert_book(&mut self, book: Book) -> Result<(), StoreError>;

    fn reservation(&self, id: ReservationId) -> Result<Reservation, StoreError>;

    fn find_reservations(
        &self,
        filter: &ReservationFilter,
        order: ReservationOrder,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Insert or overwrite by id.
    fn save_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;
}

pub trait EntityStore: Send + Sync {
    /// Run `f` as one atomic unit. Writes are committed only if `f` returns `Ok`.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, E>,
        E: From<StoreError>;
}
