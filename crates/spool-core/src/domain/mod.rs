//! Domain model (ids, job record, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod job;

pub use errors::{JobFailure, ProcessError, SpoolError};
pub use events::{EventKind, JobEvent};
pub use ids::{JobId, ParseJobIdError};
pub use job::{Job, JobOptions, JobStatus};
