//! SQLite persistence layer.
//!
//! The `articles` table's (source_id, guid) and (source_id, link) unique
//! pairs are the system's dedup boundary; all ingestion goes through the
//! atomic insert-or-ignore in [`article`].

pub mod article;
pub mod core;
pub mod schema;
pub mod settings;
pub mod source;
pub mod stats;

pub use self::core::Database;
