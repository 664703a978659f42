//! Batch summary persistence

mod storage;

pub use storage::{EnvironmentInfo, StoredBatch, SummaryStorage};
