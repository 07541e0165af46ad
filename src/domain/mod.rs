//! Domain types for internal task representation.
//!
//! [`TaskRecord`] is what stores persist. Callers normally see the
//! [`TaskView`](crate::types::TaskView) snapshot instead.

pub mod record;

pub use record::*;
