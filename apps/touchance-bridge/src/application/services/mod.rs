//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `HistoryPager`: pages through a history window with retry/backoff

mod history;

pub use history::{HistoryPager, HistorySource};
