//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! - `InMemoryStore`: transactional in-memory entity store, used by tests and
//!   by the CLI (persisted as a JSON snapshot between runs)

pub mod inmem_store;

pub use self::inmem_store::{InMemoryStore, StoreSnapshot};
