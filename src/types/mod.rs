//! Public task types: the status state machine and the status snapshot.
//!
//! Storage-side concerns (versions, resubmission links) live on
//! [`TaskRecord`](crate::domain::TaskRecord) in the [`domain`](crate::domain) module.

pub mod task;

pub use task::*;
