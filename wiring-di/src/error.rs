use crate::component_registry::ComponentSource;
use crate::instance_provider::TypeKey;
use itertools::Itertools;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by user-supplied providers. They are wrapped in
/// [InjectionError::ConstructionFailed] when surfacing from an injector.
pub type ErrorPtr = Arc<dyn std::error::Error + Send + Sync>;

fn format_keys(keys: &[TypeKey]) -> String {
    keys.iter().map(TypeKey::name).join(", ")
}

/// Errors related to creating and using instances in an injector.
#[derive(Error, Clone, Debug)]
pub enum InjectionError {
    #[error("Type is not provided by the injector: {0}")]
    TypeNotProvided(TypeKey),
    #[error("Detected dependency cycle while constructing: {0}")]
    DependencyCycle(TypeKey),
    #[error("Tried to downcast instance to incompatible type: {0}")]
    IncompatibleInstance(TypeKey),
    #[error("Error constructing {key}: {error}")]
    ConstructionFailed { key: TypeKey, error: ErrorPtr },
    #[error("Injector was dropped before its handle was used")]
    InjectorDropped,
}

/// Errors found while normalizing a binding graph. A graph with any of these cannot be turned into
/// an injector.
#[derive(Error, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum NormalizationError {
    #[error("Type {key} bound by {first} conflicts with the binding from {second}")]
    DuplicateBinding {
        key: TypeKey,
        first: ComponentSource,
        second: ComponentSource,
    },
    #[error("Interface {interface} is bound to type {target}, which has no binding")]
    UnresolvedInterfaceBinding { interface: TypeKey, target: TypeKey },
    #[error("No bindings found for required types: {}", format_keys(.keys))]
    UnsatisfiedRequirements { keys: Vec<TypeKey> },
    #[error("Type {key} is both required and provided by {component}")]
    RequirementLeak {
        key: TypeKey,
        component: ComponentSource,
    },
}

/// Any error produced while building or using an injector.
#[derive(Error, Clone, Debug)]
pub enum Error {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Injection(#[from] InjectionError),
}
