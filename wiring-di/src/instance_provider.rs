//! Type-erased access to instances, and the strongly-typed helpers built on top of it.

use crate::component_registry::{collect_multibindings, CollectFunction};
use crate::error::InjectionError;
use derivative::Derivative;
#[cfg(test)]
use mockall::automock;
use std::any::{type_name, Any, TypeId};
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Shared pointer to every instance managed or served by an injector.
pub type InstancePtr<T> = Arc<T>;

/// Marker trait for injectable types - both concrete types and `dyn Trait` interfaces.
pub trait Injectable: Send + Sync + 'static {}

impl<T: ?Sized + Send + Sync + 'static> Injectable for T {}

/// Identifier of a bound type. Identity is based solely on [TypeId]; the type name is kept for
/// diagnostics.
#[derive(Copy, Clone)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialOrd for TypeKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeKey {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Debug for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

impl Display for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased instance. Always wraps an [InstancePtr] of the type described by
/// [ErasedInstance::key].
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ErasedInstance {
    key: TypeKey,
    address: usize,
    #[derivative(Debug = "ignore")]
    pointer: Arc<dyn Any + Send + Sync>,
}

impl ErasedInstance {
    pub fn new<T: Injectable + ?Sized>(instance: InstancePtr<T>) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            address: Arc::as_ptr(&instance) as *const () as usize,
            pointer: Arc::new(instance),
        }
    }

    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Address of the wrapped object, usable for identity comparisons.
    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    /// Recovers the typed pointer, if `T` matches the wrapped type.
    #[inline]
    pub fn downcast<T: Injectable + ?Sized>(&self) -> Option<InstancePtr<T>> {
        self.pointer.downcast_ref::<InstancePtr<T>>().cloned()
    }
}

/// Generic provider for instances, working on erased types. Constructors and providers registered
/// in a [Component](crate::component::Component) receive their dependencies through it.
#[cfg_attr(test, automock)]
pub trait InstanceProvider {
    /// Returns the instance bound to given type, constructing it first if needed.
    fn instance(&self, key: TypeKey) -> Result<ErasedInstance, InjectionError>;

    /// Like [InstanceProvider::instance], but returns `None` when the type is not bound at all.
    fn instance_option(&self, key: TypeKey) -> Result<Option<ErasedInstance>, InjectionError>;

    /// Returns all multibindings for given type as an erased `InstancePtr<Vec<InstancePtr<T>>>`.
    /// `collect` builds the collection when no multibindings are registered for the type.
    fn multibindings(
        &self,
        key: TypeKey,
        collect: CollectFunction,
    ) -> Result<ErasedInstance, InjectionError>;
}

/// Helper trait for [InstanceProvider] providing strongly-typed access.
pub trait TypedInstanceProvider {
    /// Typesafe version of [InstanceProvider::instance].
    fn get<T: Injectable + ?Sized>(&self) -> Result<InstancePtr<T>, InjectionError>;

    /// Returns `None` instead of failing when `T` is not bound. Construction errors are still
    /// reported.
    fn unsafe_get<T: Injectable + ?Sized>(&self) -> Result<Option<InstancePtr<T>>, InjectionError>;

    /// Returns all instances registered as multibindings for `T`. Repeated calls return the same
    /// collection.
    fn get_multibindings<T: Injectable + ?Sized>(
        &self,
    ) -> Result<InstancePtr<Vec<InstancePtr<T>>>, InjectionError>;
}

fn downcast_instance<T: Injectable + ?Sized>(
    instance: ErasedInstance,
) -> Result<InstancePtr<T>, InjectionError> {
    instance
        .downcast()
        .ok_or_else(|| InjectionError::IncompatibleInstance(TypeKey::of::<T>()))
}

impl<P: InstanceProvider + ?Sized> TypedInstanceProvider for P {
    fn get<T: Injectable + ?Sized>(&self) -> Result<InstancePtr<T>, InjectionError> {
        self.instance(TypeKey::of::<T>()).and_then(downcast_instance)
    }

    fn unsafe_get<T: Injectable + ?Sized>(&self) -> Result<Option<InstancePtr<T>>, InjectionError> {
        self.instance_option(TypeKey::of::<T>())?
            .map(downcast_instance)
            .transpose()
    }

    fn get_multibindings<T: Injectable + ?Sized>(
        &self,
    ) -> Result<InstancePtr<Vec<InstancePtr<T>>>, InjectionError> {
        self.multibindings(TypeKey::of::<T>(), collect_multibindings::<T>)?
            .downcast::<Vec<InstancePtr<T>>>()
            .ok_or_else(|| InjectionError::IncompatibleInstance(TypeKey::of::<T>()))
    }
}
