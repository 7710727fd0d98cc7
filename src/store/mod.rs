//! Persistence layer — libSQL-backed storage for emails, LPs, and deals.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::EmailStore;
