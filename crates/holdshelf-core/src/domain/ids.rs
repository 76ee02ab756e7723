//! Strongly-typed identifiers.
//!
//! Every entity id is a ULID wrapped in `Id<T>`, where `T` is an uninhabited
//! marker type. The marker costs nothing at runtime but keeps a `BookId` from
//! being passed where a `MemberId` is expected.
//!
//! Ids render with a short prefix (`book-01J...`) and parse from either that
//! form or a bare ULID.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Marker trait supplying the display prefix of an id type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Failure to parse an id from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id {input:?}")]
pub struct IdParseError {
    kind: &'static str,
    input: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| IdParseError {
                kind: T::prefix().trim_end_matches('-'),
                input: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemberTag {}

impl IdMarker for MemberTag {
    fn prefix() -> &'static str {
        "member-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BookTag {}

impl IdMarker for BookTag {
    fn prefix() -> &'static str {
        "book-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReservationTag {}

impl IdMarker for ReservationTag {
    fn prefix() -> &'static str {
        "rsv-"
    }
}

/// Identifier of a library member.
pub type MemberId = Id<MemberTag>;

/// Identifier of a book.
pub type BookId = Id<BookTag>;

/// Identifier of a reservation.
pub type ReservationId = Id<ReservationTag>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_type_prefix() {
        let ulid = Ulid::new();

        assert_eq!(MemberId::from_ulid(ulid).to_string(), format!("member-{ulid}"));
        assert_eq!(BookId::from_ulid(ulid).to_string(), format!("book-{ulid}"));
        assert_eq!(ReservationId::from_ulid(ulid).to_string(), format!("rsv-{ulid}"));
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = BookId::from_ulid(Ulid::new());

        let prefixed: BookId = id.to_string().parse().unwrap();
        let bare: BookId = id.as_ulid().to_string().parse().unwrap();

        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "book-not-a-ulid".parse::<BookId>().unwrap_err();
        assert!(err.to_string().contains("book"));
    }

    #[test]
    fn serializes_as_plain_ulid_string() {
        let id = ReservationId::from_ulid(Ulid::new());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: ReservationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_marker_is_free() {
        assert_eq!(std::mem::size_of::<ReservationId>(), std::mem::size_of::<Ulid>());
    }
}
