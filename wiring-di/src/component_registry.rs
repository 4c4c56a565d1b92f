//! Storage for bindings registered in a [Component](crate::component::Component). The storage is
//! append-only: components only ever add bindings, either directly or by installing other
//! components. Validation is deferred until the storage is normalized.

use crate::error::InjectionError;
use crate::injector::InjectorHandle;
use crate::instance_provider::{ErasedInstance, Injectable, InstanceProvider, InstancePtr, TypeKey};
use derivative::Derivative;
use itertools::Itertools;
use std::any::TypeId;
use std::fmt::{Display, Formatter};
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

fn next_unique_id() -> u64 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Type-erased creation function for constructor, provider and factory bindings.
pub(crate) type CreateFunction = Arc<
    dyn Fn(&dyn InstanceProvider) -> Result<ErasedInstance, InjectionError> + Send + Sync,
>;

/// Converts an implementation instance into an interface instance.
pub(crate) type UpcastFunction =
    Arc<dyn Fn(ErasedInstance) -> Result<ErasedInstance, InjectionError> + Send + Sync>;

/// Turns realized multibinding elements into a single erased `InstancePtr<Vec<InstancePtr<T>>>`.
pub type CollectFunction = fn(Vec<ErasedInstance>) -> Result<ErasedInstance, InjectionError>;

/// Component which contributed a given binding. Each component gets a unique id, so two
/// components with the same name are still distinguishable.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct ComponentSource {
    id: u64,
    name: Arc<str>,
}

impl ComponentSource {
    pub(crate) fn new(name: Arc<str>) -> Self {
        Self {
            id: next_unique_id(),
            name,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ComponentSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "component '{}' (#{})", self.name, self.id)
    }
}

/// Construction strategy of a binding.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum BindingKind {
    Constructor,
    Provider,
    Instance,
    Interface,
    Factory,
}

/// Identity used to distinguish re-registration of the same binding (e.g. installing the same
/// component twice) from a conflicting one. Zero-sized callables (function items and closures
/// without captures) are identified by their type, since every call behaves the same.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) enum BindingIdentity {
    Callable(TypeId),
    Instance(usize),
    Unique(u64),
}

impl BindingIdentity {
    pub(crate) fn of_callable<F: 'static>() -> Self {
        if size_of::<F>() == 0 {
            BindingIdentity::Callable(TypeId::of::<F>())
        } else {
            BindingIdentity::Unique(next_unique_id())
        }
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) enum BindingDescriptor {
    Constructor(#[derivative(Debug = "ignore")] CreateFunction),
    Provider(#[derivative(Debug = "ignore")] CreateFunction),
    Instance(ErasedInstance),
    Interface {
        target: TypeKey,
        #[derivative(Debug = "ignore")]
        upcast: UpcastFunction,
    },
    Factory(#[derivative(Debug = "ignore")] CreateFunction),
}

impl BindingDescriptor {
    pub(crate) fn kind(&self) -> BindingKind {
        match self {
            BindingDescriptor::Constructor(_) => BindingKind::Constructor,
            BindingDescriptor::Provider(_) => BindingKind::Provider,
            BindingDescriptor::Instance(_) => BindingKind::Instance,
            BindingDescriptor::Interface { .. } => BindingKind::Interface,
            BindingDescriptor::Factory(_) => BindingKind::Factory,
        }
    }

    /// Owned instances are released by the injector on teardown. Instances are external and
    /// interfaces only alias an instance owned by their target binding.
    pub(crate) fn owns_instance(&self) -> bool {
        !matches!(
            self,
            BindingDescriptor::Instance(_) | BindingDescriptor::Interface { .. }
        )
    }
}

/// A single binding for a type.
#[derive(Clone, Debug)]
pub(crate) struct Binding {
    pub(crate) key: TypeKey,
    pub(crate) dependencies: Vec<TypeKey>,
    pub(crate) identity: BindingIdentity,
    pub(crate) source: ComponentSource,
    pub(crate) descriptor: BindingDescriptor,
}

impl Binding {
    pub(crate) fn is_identical(&self, other: &Binding) -> bool {
        self.identity == other.identity
            && self.descriptor.kind() == other.descriptor.kind()
            && self.dependencies == other.dependencies
    }
}

/// Interface binding waiting for normalization, where its target gets resolved.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) struct DeferredInterfaceBinding {
    pub(crate) interface: TypeKey,
    pub(crate) target: TypeKey,
    pub(crate) identity: BindingIdentity,
    pub(crate) source: ComponentSource,
    #[derivative(Debug = "ignore")]
    pub(crate) upcast: UpcastFunction,
}

impl DeferredInterfaceBinding {
    pub(crate) fn into_binding(self) -> Binding {
        Binding {
            key: self.interface,
            dependencies: vec![self.target],
            identity: self.identity,
            source: self.source,
            descriptor: BindingDescriptor::Interface {
                target: self.target,
                upcast: self.upcast,
            },
        }
    }
}

#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) enum MultibindingDescriptor {
    Instance(ErasedInstance),
    Provider(#[derivative(Debug = "ignore")] CreateFunction),
    Interface {
        target: TypeKey,
        #[derivative(Debug = "ignore")]
        upcast: UpcastFunction,
    },
}

/// One element contributed to the collection of a multibound type.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) struct Multibinding {
    pub(crate) key: TypeKey,
    pub(crate) dependencies: Vec<TypeKey>,
    pub(crate) source: ComponentSource,
    pub(crate) descriptor: MultibindingDescriptor,
    #[derivative(Debug = "ignore")]
    pub(crate) collect: CollectFunction,
}

/// Requirement explicitly declared by a component.
#[derive(Clone, Debug)]
pub(crate) struct Requirement {
    pub(crate) key: TypeKey,
    pub(crate) source: ComponentSource,
}

/// Accumulated, not yet validated, bindings of a component.
#[derive(Clone, Debug, Default)]
pub(crate) struct ComponentStorage {
    pub(crate) bindings: Vec<Binding>,
    pub(crate) interfaces: Vec<DeferredInterfaceBinding>,
    pub(crate) multibindings: Vec<Multibinding>,
    pub(crate) requirements: Vec<Requirement>,
}

impl ComponentStorage {
    /// Appends all bindings from other storage, preserving their order.
    pub(crate) fn install(&mut self, other: ComponentStorage) {
        self.bindings.extend(other.bindings);
        self.interfaces.extend(other.interfaces);
        self.multibindings.extend(other.multibindings);
        self.requirements.extend(other.requirements);
    }

    /// Keys of all (possibly deferred) non-multibinding bindings.
    pub(crate) fn bound_keys(&self) -> Vec<TypeKey> {
        self.bindings
            .iter()
            .map(|binding| binding.key)
            .chain(self.interfaces.iter().map(|interface| interface.interface))
            .unique()
            .sorted_by_key(|key| key.name())
            .collect()
    }

    /// Declared requirements together with dependencies and interface targets which have no
    /// binding in this storage. The injector handle is always available, so it is never required.
    pub(crate) fn required_keys(&self) -> Vec<TypeKey> {
        let bound = self.bound_keys();
        self.requirements
            .iter()
            .map(|requirement| requirement.key)
            .chain(
                self.bindings
                    .iter()
                    .flat_map(|binding| binding.dependencies.iter().copied()),
            )
            .chain(self.interfaces.iter().map(|interface| interface.target))
            .chain(
                self.multibindings
                    .iter()
                    .flat_map(|multibinding| multibinding.dependencies.iter().copied()),
            )
            .filter(|key| !bound.contains(key) && *key != TypeKey::of::<InjectorHandle>())
            .unique()
            .sorted_by_key(|key| key.name())
            .collect()
    }
}

/// Collects realized multibinding elements of type `T`.
pub(crate) fn collect_multibindings<T: Injectable + ?Sized>(
    elements: Vec<ErasedInstance>,
) -> Result<ErasedInstance, InjectionError> {
    let instances: Vec<InstancePtr<T>> = elements
        .into_iter()
        .map(|element| {
            element
                .downcast::<T>()
                .ok_or_else(|| InjectionError::IncompatibleInstance(TypeKey::of::<T>()))
        })
        .try_collect()?;

    Ok(ErasedInstance::new(InstancePtr::new(instances)))
}

/// Creates an erased upcast function from a typed one.
pub(crate) fn erase_upcast<I, C, F>(upcast: F) -> UpcastFunction
where
    I: Injectable + ?Sized,
    C: Injectable + ?Sized,
    F: Fn(InstancePtr<C>) -> InstancePtr<I> + Send + Sync + 'static,
{
    Arc::new(
        move |instance: ErasedInstance| -> Result<ErasedInstance, InjectionError> {
            let implementation = instance
                .downcast::<C>()
                .ok_or_else(|| InjectionError::IncompatibleInstance(TypeKey::of::<C>()))?;
            Ok(ErasedInstance::new(upcast(implementation)))
        },
    )
}

pub(crate) mod registry {
    use crate::component_registry::{Binding, DeferredInterfaceBinding};
    use crate::error::NormalizationError;
    use crate::instance_provider::TypeKey;
    use crate::normalizer::NormalizedGraph;
    use fxhash::FxHashMap;
    use std::collections::hash_map::Entry;
    use tracing::trace;

    /// Map of bindings being merged, optionally layered on top of already normalized parent
    /// graphs, nearest first.
    #[derive(Debug)]
    pub(crate) struct BindingMap<'a> {
        bindings: FxHashMap<TypeKey, Binding>,
        parents: &'a [&'a NormalizedGraph],
        allow_identical_duplicates: bool,
    }

    impl<'a> BindingMap<'a> {
        pub(crate) fn new(
            parents: &'a [&'a NormalizedGraph],
            allow_identical_duplicates: bool,
        ) -> Self {
            Self {
                bindings: Default::default(),
                parents,
                allow_identical_duplicates,
            }
        }

        #[inline]
        pub(crate) fn is_bound(&self, key: TypeKey) -> bool {
            self.bindings.contains_key(&key)
                || self.parents.iter().any(|parent| parent.is_bound(key))
        }

        #[inline]
        pub(crate) fn binding(&self, key: TypeKey) -> Option<&Binding> {
            self.bindings.get(&key)
        }

        pub(crate) fn try_register_binding(
            &mut self,
            binding: Binding,
        ) -> Result<(), NormalizationError> {
            if let Some(existing) = self
                .parents
                .iter()
                .find_map(|parent| parent.binding(binding.key))
            {
                return self.check_duplicate(existing, &binding);
            }

            match self.bindings.entry(binding.key) {
                Entry::Occupied(entry) => {
                    let existing = entry.get();
                    if self.allow_identical_duplicates && existing.is_identical(&binding) {
                        trace!(key = %binding.key, "Skipping identical binding");
                        Ok(())
                    } else {
                        Err(NormalizationError::DuplicateBinding {
                            key: binding.key,
                            first: existing.source.clone(),
                            second: binding.source,
                        })
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(binding);
                    Ok(())
                }
            }
        }

        fn check_duplicate(
            &self,
            existing: &Binding,
            binding: &Binding,
        ) -> Result<(), NormalizationError> {
            if self.allow_identical_duplicates && existing.is_identical(binding) {
                trace!(key = %binding.key, "Skipping binding already present in parent");
                Ok(())
            } else {
                Err(NormalizationError::DuplicateBinding {
                    key: binding.key,
                    first: existing.source.clone(),
                    second: binding.source.clone(),
                })
            }
        }

        /// Registers an interface binding, if its target is already bound. Returns the binding
        /// back when the target is missing, so it can be retried after other interfaces.
        pub(crate) fn try_register_interface(
            &mut self,
            interface: DeferredInterfaceBinding,
        ) -> Result<Option<DeferredInterfaceBinding>, NormalizationError> {
            if !self.is_bound(interface.target) {
                return Ok(Some(interface));
            }

            self.try_register_binding(interface.into_binding())
                .map(|_| None)
        }

        pub(crate) fn into_bindings(self) -> FxHashMap<TypeKey, Binding> {
            self.bindings
        }
    }

    #[cfg(test)]
    mod tests {
        use crate::component_registry::registry::BindingMap;
        use crate::component_registry::{
            Binding, BindingDescriptor, BindingIdentity, ComponentSource,
            DeferredInterfaceBinding,
        };
        use crate::error::{InjectionError, NormalizationError};
        use crate::instance_provider::{ErasedInstance, InstanceProvider, InstancePtr, TypeKey};
        use std::sync::Arc;

        fn constructor(
            _instance_provider: &dyn InstanceProvider,
        ) -> Result<ErasedInstance, InjectionError> {
            Ok(ErasedInstance::new(InstancePtr::new(0i8)))
        }

        fn create_binding(identity: BindingIdentity, source: &ComponentSource) -> Binding {
            Binding {
                key: TypeKey::of::<i8>(),
                dependencies: vec![],
                identity,
                source: source.clone(),
                descriptor: BindingDescriptor::Constructor(Arc::new(constructor)),
            }
        }

        fn create_interface(target: TypeKey) -> DeferredInterfaceBinding {
            DeferredInterfaceBinding {
                interface: TypeKey::of::<u8>(),
                target,
                identity: BindingIdentity::Unique(0),
                source: ComponentSource::new("interfaces".into()),
                upcast: Arc::new(
                    |instance: ErasedInstance| -> Result<ErasedInstance, InjectionError> {
                        Ok(instance)
                    },
                ),
            }
        }

        #[test]
        fn should_register_binding() {
            let source = ComponentSource::new("test".into());
            let mut map = BindingMap::new(&[], true);
            map.try_register_binding(create_binding(BindingIdentity::Unique(1), &source))
                .unwrap();

            assert!(map.is_bound(TypeKey::of::<i8>()));
            assert!(!map.is_bound(TypeKey::of::<u8>()));
        }

        #[test]
        fn should_skip_identical_binding() {
            let source = ComponentSource::new("test".into());
            let mut map = BindingMap::new(&[], true);
            map.try_register_binding(create_binding(BindingIdentity::Unique(1), &source))
                .unwrap();
            map.try_register_binding(create_binding(BindingIdentity::Unique(1), &source))
                .unwrap();
        }

        #[test]
        fn should_reject_identical_binding_when_not_allowed() {
            let source = ComponentSource::new("test".into());
            let mut map = BindingMap::new(&[], false);
            map.try_register_binding(create_binding(BindingIdentity::Unique(1), &source))
                .unwrap();

            assert!(matches!(
                map.try_register_binding(create_binding(BindingIdentity::Unique(1), &source))
                    .unwrap_err(),
                NormalizationError::DuplicateBinding { .. }
            ));
        }

        #[test]
        fn should_reject_conflicting_binding() {
            let first = ComponentSource::new("first".into());
            let second = ComponentSource::new("second".into());
            let mut map = BindingMap::new(&[], true);
            map.try_register_binding(create_binding(BindingIdentity::Unique(1), &first))
                .unwrap();

            assert_eq!(
                map.try_register_binding(create_binding(BindingIdentity::Unique(2), &second))
                    .unwrap_err(),
                NormalizationError::DuplicateBinding {
                    key: TypeKey::of::<i8>(),
                    first,
                    second,
                }
            );
        }

        #[test]
        fn should_defer_interface_with_missing_target() {
            let mut map = BindingMap::new(&[], true);
            assert!(map
                .try_register_interface(create_interface(TypeKey::of::<i8>()))
                .unwrap()
                .is_some());

            let source = ComponentSource::new("test".into());
            map.try_register_binding(create_binding(BindingIdentity::Unique(1), &source))
                .unwrap();

            assert!(map
                .try_register_interface(create_interface(TypeKey::of::<i8>()))
                .unwrap()
                .is_none());
            assert!(map.is_bound(TypeKey::of::<u8>()));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::component_registry::{
        collect_multibindings, erase_upcast, BindingIdentity, ComponentSource, ComponentStorage,
        Requirement,
    };
    use crate::error::InjectionError;
    use crate::instance_provider::{ErasedInstance, InstancePtr, TypeKey};

    trait Shape: Send + Sync {
        fn sides(&self) -> u8;
    }

    struct Square;

    impl Shape for Square {
        fn sides(&self) -> u8 {
            4
        }
    }

    #[test]
    fn should_identify_zero_sized_callables_by_type() {
        fn constructor() -> i8 {
            0
        }

        fn identity_of<F: 'static>(_: &F) -> BindingIdentity {
            BindingIdentity::of_callable::<F>()
        }

        assert_eq!(identity_of(&constructor), identity_of(&constructor));

        let captured = 5;
        let closure = move || captured;
        assert_ne!(identity_of(&closure), identity_of(&closure));
    }

    #[test]
    fn should_install_requirements_in_order() {
        let first = ComponentSource::new("first".into());
        let second = ComponentSource::new("second".into());

        let mut storage = ComponentStorage::default();
        storage.requirements.push(Requirement {
            key: TypeKey::of::<u8>(),
            source: first,
        });

        let mut other = ComponentStorage::default();
        other.requirements.push(Requirement {
            key: TypeKey::of::<i8>(),
            source: second.clone(),
        });
        other.requirements.push(Requirement {
            key: TypeKey::of::<u8>(),
            source: second,
        });

        storage.install(other);

        assert_eq!(storage.requirements.len(), 3);
        assert_eq!(
            storage.required_keys(),
            vec![TypeKey::of::<i8>(), TypeKey::of::<u8>()]
        );
    }

    #[test]
    fn should_upcast_erased_instances() {
        let upcast = erase_upcast::<dyn Shape, Square, _>(|square| square);
        let instance = upcast(ErasedInstance::new(InstancePtr::new(Square))).unwrap();

        assert_eq!(instance.key(), TypeKey::of::<dyn Shape>());
        assert_eq!(instance.downcast::<dyn Shape>().unwrap().sides(), 4);
        assert!(matches!(
            upcast(ErasedInstance::new(InstancePtr::new(0u8))).unwrap_err(),
            InjectionError::IncompatibleInstance(..)
        ));
    }

    #[test]
    fn should_collect_multibindings() {
        let collection = collect_multibindings::<u8>(vec![
            ErasedInstance::new(InstancePtr::new(1u8)),
            ErasedInstance::new(InstancePtr::new(2u8)),
        ])
        .unwrap();

        let values = collection.downcast::<Vec<InstancePtr<u8>>>().unwrap();
        assert_eq!(values.iter().map(|value| **value).collect::<Vec<_>>(), [1, 2]);
    }
}
