//! Configuration of graph normalization and injector creation. Defaults are suitable for most use
//! cases, so usually there's no need to touch them.

/// Options for the normalization pass.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct NormalizerConfig {
    /// Accept the same binding registered more than once, e.g. when two installed components both
    /// install a shared one. Conflicting bindings are always rejected.
    pub allow_identical_duplicates: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            allow_identical_duplicates: true,
        }
    }
}

impl NormalizerConfig {
    pub fn with_allow_identical_duplicates(mut self, allow_identical_duplicates: bool) -> Self {
        self.allow_identical_duplicates = allow_identical_duplicates;
        self
    }
}

/// Options for creating an [Injector](crate::injector::Injector).
#[non_exhaustive]
#[derive(Clone, Debug, Default)]
pub struct InjectorConfig {
    /// Construct all bindings right after creating the injector, which surfaces construction
    /// errors early.
    pub eager_injection: bool,

    /// Options used when normalizing the injector component.
    pub normalizer: NormalizerConfig,
}

impl InjectorConfig {
    pub fn with_eager_injection(mut self, eager_injection: bool) -> Self {
        self.eager_injection = eager_injection;
        self
    }

    pub fn with_normalizer(mut self, normalizer: NormalizerConfig) -> Self {
        self.normalizer = normalizer;
        self
    }
}
