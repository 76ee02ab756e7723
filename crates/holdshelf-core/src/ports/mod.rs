//! Ports - 抽象化レイヤー
//!
//! 予約コアと外部（ストレージ、時計、ID 採番）との境界を trait で定義します。
//!
//! - `EntityStore`: transactional system of record
//! - `Clock`: current time
//! - `IdGenerator`: entity ids

pub mod clock;
pub mod entity_store;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::entity_store::{
    Constraint, EntityStore, ReservationFilter, ReservationOrder, StoreError, StoreTx,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
