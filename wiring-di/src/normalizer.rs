//! Normalization turns the bindings accumulated in a [Component] into a validated
//! [NormalizedGraph]: duplicates are rejected, deferred interface bindings are resolved and the
//! set of still unsatisfied requirements is computed.
//!
//! Normalization is relatively expensive compared to creating an injector from an already
//! normalized graph. When many short-lived injectors share most of their bindings (e.g. one
//! injector per request in a server), normalize the shared part once with [NormalizedComponent]
//! and create each injector with
//! [Injector::from_normalized](crate::injector::Injector::from_normalized), which only normalizes
//! the small, per-injector component.

use crate::component::Component;
use crate::component_registry::registry::BindingMap;
use crate::component_registry::{
    Binding, BindingKind, CollectFunction, ComponentStorage, DeferredInterfaceBinding,
    Multibinding, Requirement,
};
use crate::config::NormalizerConfig;
use crate::error::NormalizationError;
use crate::injector::InjectorHandle;
use crate::instance_provider::TypeKey;
use derivative::Derivative;
use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

/// All multibindings for a single type, in contribution order.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) struct MultibindingSet {
    pub(crate) elements: Vec<Multibinding>,
    #[derivative(Debug = "ignore")]
    pub(crate) collect: CollectFunction,
}

/// Immutable, validated binding graph. Safe to share between any number of injectors and threads.
#[derive(Debug, Default)]
pub struct NormalizedGraph {
    bindings: FxHashMap<TypeKey, Binding>,
    multibindings: FxHashMap<TypeKey, MultibindingSet>,
    required: FxHashSet<TypeKey>,
}

impl NormalizedGraph {
    /// Checks if given type has a binding in this graph.
    #[inline]
    pub fn is_bound(&self, key: TypeKey) -> bool {
        self.bindings.contains_key(&key)
    }

    /// Returns the construction strategy for given type.
    pub fn binding_kind(&self, key: TypeKey) -> Option<BindingKind> {
        self.bindings
            .get(&key)
            .map(|binding| binding.descriptor.kind())
    }

    /// Types bound in this graph, sorted by name.
    pub fn provided(&self) -> Vec<TypeKey> {
        self.bindings
            .keys()
            .copied()
            .sorted_by_key(|key| key.name())
            .collect()
    }

    /// Types still missing a binding, sorted by name.
    pub fn required(&self) -> Vec<TypeKey> {
        self.required
            .iter()
            .copied()
            .sorted_by_key(|key| key.name())
            .collect()
    }

    /// A complete graph has no unsatisfied requirements.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.required.is_empty()
    }

    /// Number of multibinding elements for given type.
    pub fn multibinding_count(&self, key: TypeKey) -> usize {
        self.multibindings
            .get(&key)
            .map(|set| set.elements.len())
            .unwrap_or(0)
    }

    #[inline]
    pub(crate) fn binding(&self, key: TypeKey) -> Option<&Binding> {
        self.bindings.get(&key)
    }

    #[inline]
    pub(crate) fn multibinding_set(&self, key: TypeKey) -> Option<&MultibindingSet> {
        self.multibindings.get(&key)
    }

    pub(crate) fn bound_keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.bindings.keys().copied()
    }

    pub(crate) fn multibinding_collectors(
        &self,
    ) -> impl Iterator<Item = (TypeKey, CollectFunction)> + '_ {
        self.multibindings
            .iter()
            .map(|(key, set)| (*key, set.collect))
    }
}

/// A [Component] normalized once and shared afterwards. Cloning is cheap. The graph may be
/// partial - its requirements can be satisfied by the component passed to
/// [Injector::from_normalized](crate::injector::Injector::from_normalized).
#[derive(Clone, Debug)]
pub struct NormalizedComponent {
    graph: Arc<NormalizedGraph>,
}

impl NormalizedComponent {
    pub fn new(component: Component) -> Result<Self, NormalizationError> {
        Self::with_config(component, &NormalizerConfig::default())
    }

    pub fn with_config(
        component: Component,
        config: &NormalizerConfig,
    ) -> Result<Self, NormalizationError> {
        normalize(component.into_storage(), &[], config).map(|graph| Self {
            graph: Arc::new(graph),
        })
    }

    #[inline]
    pub fn graph(&self) -> &NormalizedGraph {
        &self.graph
    }

    #[inline]
    pub fn provided(&self) -> Vec<TypeKey> {
        self.graph.provided()
    }

    #[inline]
    pub fn required(&self) -> Vec<TypeKey> {
        self.graph.required()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graph.is_complete()
    }

    #[inline]
    pub(crate) fn shared_graph(&self) -> Arc<NormalizedGraph> {
        self.graph.clone()
    }
}

/// Normalizes given storage, optionally on top of already normalized parent graphs, nearest
/// first. With parents, the result contains only the new bindings, while requirements and
/// multibindings are computed for all layers combined.
pub(crate) fn normalize(
    storage: ComponentStorage,
    parents: &[&NormalizedGraph],
    config: &NormalizerConfig,
) -> Result<NormalizedGraph, NormalizationError> {
    let ComponentStorage {
        bindings,
        interfaces,
        multibindings,
        requirements,
    } = storage;

    let mut binding_map = BindingMap::new(parents, config.allow_identical_duplicates);
    for binding in bindings {
        binding_map.try_register_binding(binding)?;
    }

    resolve_interfaces(&mut binding_map, interfaces)?;
    check_requirement_leaks(&binding_map, &requirements)?;

    let required: FxHashSet<TypeKey> = requirements
        .iter()
        .map(|requirement| requirement.key)
        .chain(
            multibindings
                .iter()
                .flat_map(|multibinding| multibinding.dependencies.iter().copied()),
        )
        // the nearest parent already accounts for everything below it
        .chain(
            parents
                .first()
                .into_iter()
                .flat_map(|parent| parent.required.iter().copied()),
        )
        .collect();

    let bindings = binding_map.into_bindings();
    let required: FxHashSet<TypeKey> = required
        .into_iter()
        .chain(
            bindings
                .values()
                .flat_map(|binding| binding.dependencies.iter().copied()),
        )
        .filter(|key| {
            *key != TypeKey::of::<InjectorHandle>()
                && !bindings.contains_key(key)
                && !parents.iter().any(|parent| parent.is_bound(*key))
        })
        .collect();

    let multibindings = merge_multibindings(multibindings, parents);

    debug!(
        bindings = bindings.len(),
        multibindings = multibindings.len(),
        required = required.len(),
        layers = parents.len(),
        "Normalized binding graph"
    );

    Ok(NormalizedGraph {
        bindings,
        multibindings,
        required,
    })
}

/// Registers interfaces in dependency order, so interfaces bound to other interfaces work
/// regardless of registration order.
fn resolve_interfaces(
    binding_map: &mut BindingMap,
    mut pending: Vec<DeferredInterfaceBinding>,
) -> Result<(), NormalizationError> {
    while !pending.is_empty() {
        let pending_count = pending.len();
        let mut unresolved = Vec::new();

        for interface in pending {
            if let Some(interface) = binding_map.try_register_interface(interface)? {
                unresolved.push(interface);
            }
        }

        if unresolved.len() == pending_count {
            if let Some(interface) = unresolved
                .into_iter()
                .min_by_key(|interface| interface.interface.name())
            {
                return Err(NormalizationError::UnresolvedInterfaceBinding {
                    interface: interface.interface,
                    target: interface.target,
                });
            }

            break;
        }

        pending = unresolved;
    }

    Ok(())
}

/// A component can't require a type it binds itself.
fn check_requirement_leaks(
    binding_map: &BindingMap,
    requirements: &[Requirement],
) -> Result<(), NormalizationError> {
    requirements
        .iter()
        .find(|requirement| {
            binding_map
                .binding(requirement.key)
                .map(|binding| binding.source == requirement.source)
                .unwrap_or(false)
        })
        .map_or(Ok(()), |requirement| {
            Err(NormalizationError::RequirementLeak {
                key: requirement.key,
                component: requirement.source.clone(),
            })
        })
}

fn merge_multibindings(
    multibindings: Vec<Multibinding>,
    parents: &[&NormalizedGraph],
) -> FxHashMap<TypeKey, MultibindingSet> {
    let mut sets: FxHashMap<TypeKey, MultibindingSet> = FxHashMap::default();

    for multibinding in multibindings {
        let key = multibinding.key;
        let collect = multibinding.collect;

        sets.entry(key)
            .or_insert_with(|| {
                parents
                    .iter()
                    .find_map(|parent| parent.multibinding_set(key))
                    .cloned()
                    .unwrap_or_else(|| MultibindingSet {
                        elements: Vec::new(),
                        collect,
                    })
            })
            .elements
            .push(multibinding);
    }

    sets
}
