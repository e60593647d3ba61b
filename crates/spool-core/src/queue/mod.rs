//! Queue module: in-memory job store and retry policy.

mod retry;
mod store;

pub use retry::RetryPolicy;
pub use store::{JobFilter, JobStore, StatusCounts};
pub(crate) use store::deadline_after;
