//! RSS/Atom feed ingestion.

mod fetcher;

pub use self::fetcher::{run_rss_cycle, USER_AGENT};
