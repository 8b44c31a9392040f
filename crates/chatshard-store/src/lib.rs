//! chatshard-store — shared-state store for the chatshard control plane.
//!
//! All coordination between the controller, its shadow, the serving workers
//! and the migration workers happens through a small set of tables in a
//! single transactional Postgres database. This crate owns the typed access
//! layer over those tables:
//!
//! - [`ControlStore`] — the adapter trait; every operation runs inside one
//!   transaction and classifies failures as reconcilable (retry) or terminal
//!   (surface).
//! - [`PgStore`] — the production implementation over a bounded `sqlx`
//!   connection pool.
//! - [`MemStore`] — an in-memory implementation with the same constraint
//!   behavior, for tests.
//! - [`RetryPolicy`] — the bounded retry wrapper with a configurable backoff
//!   schedule that every caller routes store operations through.

pub mod ctx;
pub mod env;
pub mod error;
pub mod mem;
pub mod pg;
pub mod retry;
pub mod store;
pub mod types;

pub use ctx::OpCtx;
pub use error::{StoreError, StoreResult};
pub use mem::MemStore;
pub use pg::PgStore;
pub use retry::{BackoffKind, RetryPolicy};
pub use store::ControlStore;
pub use types::*;
