//! holdshelf-core
//!
//! Reservation queue for a lending library: members queue for books, at most
//! one reservation per book is Ready for pickup, and a sweep cancels expired
//! reservations and promotes the next in line.
//!
//! # Modules
//! - **domain**: records, ids, the status state machine and errors
//! - **ports**: `EntityStore`, `Clock`, `IdGenerator`
//! - **service**: `ReservationService` (transitions, promotion, admin actions, queries)
//! - **app**: `ExpirationSweep` and the periodic `SweepLoop`
//! - **impls**: `InMemoryStore`
//! - **config**: policy and sweep settings

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod service;

pub use app::{ExpirationSweep, SweepLoop, SweepMode, SweepReport};
pub use config::{HoldshelfConfig, ReservationPolicy, SweepSettings};
pub use domain::{ErrorKind, ReservationError, ReservationStatus};
pub use service::{NewReservation, ReservationService};
