//! Filter function trait.

use image::DynamicImage;

use filter_pipeline::BoxError;

/// One swappable image transformation, keyed by a filter kind.
///
/// Implementations run on the blocking thread pool and must not block on
/// async work.
pub trait FilterFn: Send + Sync {
    /// Get the filter name.
    fn name(&self) -> &str;

    /// Apply the filter, consuming the previous step's output.
    fn apply(&self, image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError>;
}

/// A [`FilterFn`] backed by a closure.
pub struct FnFilter<F> {
    name: String,
    f: F,
}

impl<F> FnFilter<F>
where
    F: Fn(DynamicImage, Option<f64>) -> Result<DynamicImage, BoxError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> FilterFn for FnFilter<F>
where
    F: Fn(DynamicImage, Option<f64>) -> Result<DynamicImage, BoxError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, image: DynamicImage, value: Option<f64>) -> Result<DynamicImage, BoxError> {
        (self.f)(image, value)
    }
}
