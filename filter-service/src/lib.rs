//! filter-service library crate.
//!
//! Asynchronous image filter jobs: submit an image with a filter chain, let a
//! bounded worker pool run it, poll for progress and download the result.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod pipeline;
pub mod scratch;
pub mod utils;

pub use error::{Error, Result};
