//! PostgreSQL implementation of event storage.

mod event_storage;

pub use event_storage::PostgresEventStorage;
