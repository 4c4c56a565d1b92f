//! Dependency injection based on composable components. Bindings are collected in
//! [Component](component::Component)s, validated once by normalization and served lazily by an
//! [Injector](injector::Injector).

mod cache;
pub mod component;
pub mod component_registry;
pub mod config;
pub mod dependencies;
mod error;
pub mod factory;
pub mod injector;
pub mod instance_provider;
pub mod normalizer;

pub use error::{Error, ErrorPtr, InjectionError, NormalizationError};
