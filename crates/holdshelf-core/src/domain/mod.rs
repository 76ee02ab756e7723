//! Domain model: ids, catalog entities, reservations and their errors.

pub mod catalog;
pub mod errors;
pub mod ids;
pub mod reservation;
pub mod state;

pub use catalog::{Book, Member};
pub use errors::{DuplicateKey, EntityRef, ErrorKind, ReservationError};
pub use ids::{BookId, IdParseError, MemberId, ReservationId};
pub use reservation::Reservation;
pub use state::ReservationStatus;
