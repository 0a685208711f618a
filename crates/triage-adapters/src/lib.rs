//! Postgres, in-memory, and Redis adapters for the fraud triage core.
//!
//! `triage-core` depends only on the `PersistenceAdapter` and `CoordinationStore`
//! traits; this crate supplies the two production implementations (Postgres-backed
//! relational store, Redis-backed sliding-window coordination store) plus an
//! in-memory test double of each for unit tests and local development without
//! external services.

#![deny(unsafe_code)]

pub mod backend;
pub mod memory;
pub mod postgres;
pub mod redis_store;

pub use backend::{CoordinationBackend, PersistenceBackend};
pub use memory::{InMemoryCoordinationStore, InMemoryPersistenceAdapter};
pub use postgres::PostgresPersistenceAdapter;
pub use redis_store::RedisCoordinationStore;
