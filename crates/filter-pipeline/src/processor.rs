//! # Processor
//!
//! A processor is one step of a pipeline. It takes ownership of the artifact
//! produced by the previous step and returns the artifact for the next one.

/// Boxed error type returned by processors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A single transformation step over an artifact of type `T`.
pub trait Processor<T>: Send {
    /// Transform the input artifact into the next one.
    fn process(&mut self, input: T) -> Result<T, BoxError>;

    /// Name used in logs and error messages.
    fn name(&self) -> &str;
}

/// Adapter that turns a closure into a [`Processor`].
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<T, F> Processor<T> for FnProcessor<F>
where
    F: FnMut(T) -> Result<T, BoxError> + Send,
{
    fn process(&mut self, input: T) -> Result<T, BoxError> {
        (self.f)(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
