//! Registry mapping every filter kind to its implementation.

use std::collections::HashMap;
use std::sync::Arc;

use strum::IntoEnumIterator;
use tracing::debug;

use super::image_ops;
use super::traits::FilterFn;
use crate::domain::FilterKind;
use crate::{Error, Result};

/// Filter implementations keyed by kind.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<FilterKind, Arc<dyn FilterFn>>,
}

impl FilterRegistry {
    /// An empty registry. Must be filled before [`validate`](Self::validate) passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in implementation of every kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in FilterKind::iter() {
            registry.register(kind, image_ops::builtin(kind));
        }
        registry
    }

    /// Register or replace the implementation for a kind.
    pub fn register(&mut self, kind: FilterKind, filter: Arc<dyn FilterFn>) -> &mut Self {
        debug!(kind = %kind, filter = filter.name(), "Registering filter");
        self.filters.insert(kind, filter);
        self
    }

    pub fn get(&self, kind: FilterKind) -> Option<Arc<dyn FilterFn>> {
        self.filters.get(&kind).cloned()
    }

    /// Confirm that every kind has an implementation.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&'static str> = FilterKind::iter()
            .filter(|kind| !self.filters.contains_key(kind))
            .map(FilterKind::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::config(format!(
                "no implementation registered for filter kinds: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("kinds", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processors::FnFilter;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = FilterRegistry::with_defaults();
        assert!(registry.validate().is_ok());
        assert_eq!(registry.len(), FilterKind::iter().count());
    }

    #[test]
    fn test_missing_kind_fails_validation() {
        let mut registry = FilterRegistry::new();
        registry.register(
            FilterKind::Invert,
            Arc::new(FnFilter::new("invert", |img, _| Ok(img))),
        );

        let err = registry.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("grayscale")));
        assert!(!err.to_string().contains("invert,"));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = FilterRegistry::with_defaults();
        registry.register(
            FilterKind::Blur,
            Arc::new(FnFilter::new("fake-blur", |img, _| Ok(img))),
        );
        assert_eq!(registry.get(FilterKind::Blur).unwrap().name(), "fake-blur");
    }
}
