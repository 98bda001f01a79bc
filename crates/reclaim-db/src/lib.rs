//! Reclaim record store
//!
//! The persistence seam for the engine: a `RecordStore` trait offering typed
//! document CRUD, field-equality queries, and a single atomic multi-document
//! batch write, plus two implementations: an in-memory store for tests and
//! single-instance deployments, and a Postgres store where the batch write is
//! a transaction.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{RecordBatch, RecordStore, WriteOp};
