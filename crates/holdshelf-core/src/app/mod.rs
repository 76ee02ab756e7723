//! App - アプリケーション層
//!
//! サービスの上で動くジョブ（期限切れ予約の掃除）をまとめます。
//!
//! # Components
//! - **ExpirationSweep**: cancels expired reservations and refills ready slots, one book at a time
//! - **SweepLoop**: runs the sweep on a fixed interval until shut down

pub mod sweep;
pub mod sweep_loop;

pub use self::sweep::{ExpirationSweep, SweepAction, SweepFailure, SweepMode, SweepReport};
pub use self::sweep_loop::SweepLoop;
