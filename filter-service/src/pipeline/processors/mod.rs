//! Filter implementations and their registry.

mod image_ops;
mod registry;
mod traits;

pub use registry::FilterRegistry;
pub use traits::{FilterFn, FnFilter};
