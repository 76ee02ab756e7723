//! Error taxonomy of the reservation core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{BookId, MemberId, ReservationId};
use super::state::ReservationStatus;
use crate::ports::entity_store::{Constraint, StoreError};

/// Operational classification of a [`ReservationError`].
///
/// Callers (admin actions, the CLI) map these to user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A book's ready slot is already taken.
    Conflict,
    /// A uniqueness rule would be broken.
    Duplicate,
    /// The requested transition is not an edge of the state machine.
    InvalidState,
    /// A referenced entity does not exist.
    NotFound,
    /// The entity store failed. The current unit of work was rolled back.
    Storage,
}

/// Reference to a stored entity, used in not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Member(MemberId),
    Book(BookId),
    Reservation(ReservationId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Member(id) => write!(f, "{id}"),
            EntityRef::Book(id) => write!(f, "{id}"),
            EntityRef::Reservation(id) => write!(f, "{id}"),
        }
    }
}

/// The key that a duplicate would have collided on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateKey {
    /// (book, member, status) among live reservations.
    Reservation {
        book: BookId,
        member: MemberId,
        status: ReservationStatus,
    },
    MemberEmail(String),
    BookIsbn(String),
}

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateKey::Reservation {
                book,
                member,
                status,
            } => write!(f, "{member} already holds a {status} reservation for {book}"),
            DuplicateKey::MemberEmail(email) => write!(f, "email {email} is already registered"),
            DuplicateKey::BookIsbn(isbn) => write!(f, "isbn {isbn} is already catalogued"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("{book} already has a ready reservation ({holder})")]
    Conflict {
        book: BookId,
        holder: ReservationId,
    },

    #[error("duplicate: {0}")]
    Duplicate(DuplicateKey),

    #[error("{id} cannot move from {from} to {to}")]
    InvalidState {
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("reservations cannot be created as {0}")]
    InvalidInitialStatus(ReservationStatus),

    #[error("{0} not found")]
    NotFound(EntityRef),

    #[error("storage failure")]
    Storage(#[source] StoreError),
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::Conflict { .. } => ErrorKind::Conflict,
            ReservationError::Duplicate(_) => ErrorKind::Duplicate,
            ReservationError::InvalidState { .. } | ReservationError::InvalidInitialStatus(_) => {
                ErrorKind::InvalidState
            }
            ReservationError::NotFound(_) => ErrorKind::NotFound,
            ReservationError::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Storage-level constraint violations are the backstop for the invariants
/// the core checks itself, so they surface as the same error kinds.
impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing(entity) => ReservationError::NotFound(entity),
            StoreError::Constraint(Constraint::ReadySlot { book, holder }) => {
                ReservationError::Conflict { book, holder }
            }
            StoreError::Constraint(Constraint::LiveTuple {
                book,
                member,
                status,
            }) => ReservationError::Duplicate(DuplicateKey::Reservation {
                book,
                member,
                status,
            }),
            StoreError::Constraint(Constraint::MemberEmail(email)) => {
                ReservationError::Duplicate(DuplicateKey::MemberEmail(email))
            }
            StoreError::Constraint(Constraint::BookIsbn(isbn)) => {
                ReservationError::Duplicate(DuplicateKey::BookIsbn(isbn))
            }
            other @ StoreError::Backend(_) => ReservationError::Storage(other),
        }
    }
}
