//! Filter domain module.

mod parse;
mod types;

pub use parse::{MAX_FILTER_STEPS, parse_filter_steps};
pub use types::{FilterKind, FilterStep, OutputFormat};
