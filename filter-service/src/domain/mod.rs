//! Domain layer for the filter service.
//!
//! Jobs, their state machine, and the validated filter chain they carry.

pub mod filter;
pub mod job;

pub use filter::{FilterKind, FilterStep, OutputFormat, parse_filter_steps};
pub use job::{Job, JobId, JobState, JobTransition, NewJob};
