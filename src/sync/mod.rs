//! Sync Engine (C5, §4.5) and its cooperating state (lockout set, watermark
//! reads, sanitize/upsert).

pub mod engine;
pub mod lockout;
pub mod upsert;
pub mod watermark;

pub use engine::{SyncEngine, SyncEngineError};
pub use lockout::{LockoutKey, LockoutSet};
