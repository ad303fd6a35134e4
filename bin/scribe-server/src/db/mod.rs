//! Database layer.
//!
//! The storage interface the engine needs is [`scribe_core::TaskStore`];
//! the default implementation here is [`sqlite::SqliteStore`]. To swap to
//! another database (Postgres, MySQL, …), implement the trait for your new
//! type and change the concrete type in [`crate::state::AppState`].

pub mod sqlite;
