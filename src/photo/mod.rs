//! Photo pipeline: fetch (C7), resize/encode (C8), upload (C9), and the
//! scheduler that drives them (C10).

pub mod fetcher;
pub mod object_store;
pub mod pipeline;
pub mod scheduler;

pub use object_store::{ObjectStore, StorageError};
pub use pipeline::ImageError;
pub use scheduler::PhotoScheduler;
