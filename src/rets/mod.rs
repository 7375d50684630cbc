//! C1 (Protocol Client) and C2 (Response Parser) — §4.1, §4.2.

pub mod client;
pub mod dmql;
pub mod operations;
pub mod parser;

pub use client::{ClientError, RetsClient, Session};
