//! Core functionality for creating instances from a normalized binding graph.
//!
//! An [Injector] creates instances lazily, when they are first requested, and keeps them for its
//! whole lifetime - every type is constructed at most once per injector. When the injector is
//! dropped, instances it created are released in reverse construction order. Instances bound with
//! [Component::bind_instance](crate::component::Component::bind_instance) are owned by the caller
//! and never released by the injector.
//!
//! Injectors can be standalone, created from a single complete [Component], or layered on top of
//! a shared [NormalizedComponent]. The latter only normalizes the new component, which makes it
//! suitable for creating many short-lived injectors, e.g. one per request:
//!
//! ```
//! use wiring_di::component::Component;
//! use wiring_di::injector::Injector;
//! use wiring_di::instance_provider::{InstancePtr, TypedInstanceProvider};
//! use wiring_di::normalizer::NormalizedComponent;
//!
//! struct ServerContext;
//!
//! struct RequestContext(String);
//!
//! struct RequestHandler {
//!     server: InstancePtr<ServerContext>,
//!     request: InstancePtr<RequestContext>,
//! }
//!
//! impl RequestHandler {
//!     fn new(server: InstancePtr<ServerContext>, request: InstancePtr<RequestContext>) -> Self {
//!         Self { server, request }
//!     }
//! }
//!
//! let server_context = InstancePtr::new(ServerContext);
//! let normalized = NormalizedComponent::new(
//!     Component::new()
//!         .bind_instance(server_context.clone())
//!         .register_constructor(RequestHandler::new),
//! )
//! .unwrap();
//!
//! let injector = Injector::from_normalized(
//!     &normalized,
//!     Component::new().bind_instance(InstancePtr::new(RequestContext("GET /".to_string()))),
//! )
//! .unwrap();
//!
//! let handler = injector.get::<RequestHandler>().unwrap();
//! assert_eq!(handler.request.0, "GET /");
//! assert!(InstancePtr::ptr_eq(&handler.server, &server_context));
//! ```
//!
//! Bound types can also depend on the injector itself, through an [InjectorHandle]. It is always
//! available and allows creating child injectors, which see everything their parent provides:
//!
//! ```
//! use wiring_di::component::Component;
//! use wiring_di::injector::{Injector, InjectorHandle};
//! use wiring_di::instance_provider::{InstancePtr, TypedInstanceProvider};
//!
//! struct Config(u16);
//!
//! struct Port(u16);
//!
//! struct Launcher(InstancePtr<InjectorHandle>);
//!
//! let injector = Injector::new(
//!     Component::new()
//!         .bind_instance(InstancePtr::new(Config(8080)))
//!         .register_constructor(Launcher),
//! )
//! .unwrap();
//!
//! let launcher = injector.get::<Launcher>().unwrap();
//! let child = launcher
//!     .0
//!     .child(Component::new().register_constructor(|config: InstancePtr<Config>| Port(config.0)))
//!     .unwrap();
//!
//! assert_eq!(child.get::<Port>().unwrap().0, 8080);
//! ```

use crate::cache::InstanceCache;
use crate::component::Component;
use crate::component_registry::{
    Binding, BindingDescriptor, CollectFunction, Multibinding, MultibindingDescriptor,
};
use crate::config::{InjectorConfig, NormalizerConfig};
use crate::error::{Error, InjectionError, NormalizationError};
use crate::instance_provider::{ErasedInstance, InstanceProvider, InstancePtr, TypeKey};
use crate::normalizer::{normalize, MultibindingSet, NormalizedComponent, NormalizedGraph};
use derivative::Derivative;
use fxhash::FxHashSet;
use itertools::Itertools;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Builder for [Injector] with sensible defaults, for easy construction.
pub struct InjectorBuilder {
    component: Component,
    parent: Option<NormalizedComponent>,
    config: InjectorConfig,
}

impl InjectorBuilder {
    /// Creates a new builder for an injector serving given component.
    pub fn new(component: Component) -> Self {
        Self {
            component,
            parent: None,
            config: Default::default(),
        }
    }

    /// Sets a normalized parent graph, which is shared with other injectors.
    pub fn with_parent(mut self, parent: NormalizedComponent) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets new [InjectorConfig].
    pub fn with_config(mut self, config: InjectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds resulting [Injector], constructing all instances if eager injection is enabled.
    pub fn build(self) -> Result<Injector, Error> {
        let state = InjectorState::create(
            self.component,
            self.parent.as_ref().map(NormalizedComponent::shared_graph),
            None,
            &self.config.normalizer,
        )?;
        let injector = Injector { state };

        if self.config.eager_injection {
            injector.eagerly_inject_all()?;
        }

        Ok(injector)
    }
}

#[derive(Clone, Copy)]
enum ConstructionKind {
    Instance,
    Multibindings,
}

#[derive(Default)]
struct ConstructionState {
    types_under_construction: FxHashSet<TypeKey>,
    multibindings_under_construction: FxHashSet<TypeKey>,
    construction_log: Vec<ErasedInstance>,
}

impl ConstructionState {
    fn under_construction(&mut self, kind: ConstructionKind) -> &mut FxHashSet<TypeKey> {
        match kind {
            ConstructionKind::Instance => &mut self.types_under_construction,
            ConstructionKind::Multibindings => &mut self.multibindings_under_construction,
        }
    }
}

/// Marks a key as being under construction until dropped, including when a constructor panics.
struct ConstructionMark<'a> {
    state: &'a RefCell<ConstructionState>,
    key: TypeKey,
    kind: ConstructionKind,
}

impl<'a> ConstructionMark<'a> {
    fn acquire(
        state: &'a RefCell<ConstructionState>,
        key: TypeKey,
        kind: ConstructionKind,
    ) -> Result<Self, InjectionError> {
        if !state.borrow_mut().under_construction(kind).insert(key) {
            return Err(InjectionError::DependencyCycle(key));
        }

        Ok(Self { state, key, kind })
    }
}

impl Drop for ConstructionMark<'_> {
    fn drop(&mut self) {
        self.state
            .borrow_mut()
            .under_construction(self.kind)
            .remove(&self.key);
    }
}

/// Everything an injector owns. Shared between the [Injector] and its [InjectorHandle]s, but
/// only the former and child injectors keep it alive.
#[derive(Derivative)]
#[derivative(Debug)]
struct InjectorState {
    graph: Arc<NormalizedGraph>,
    // normalized parent, whose bindings are constructed by this injector
    base: Option<Arc<NormalizedGraph>>,
    // live parent injector, which constructs and owns its own bindings
    #[derivative(Debug = "ignore")]
    parent: Option<Arc<InjectorState>>,
    #[derivative(Debug = "ignore")]
    handle: ErasedInstance,
    cache: InstanceCache,
    #[derivative(Debug = "ignore")]
    construction: ReentrantMutex<RefCell<ConstructionState>>,
}

impl InjectorState {
    fn create(
        component: Component,
        base: Option<Arc<NormalizedGraph>>,
        parent: Option<Arc<InjectorState>>,
        config: &NormalizerConfig,
    ) -> Result<Arc<Self>, NormalizationError> {
        let graph = {
            let layers = base
                .as_deref()
                .into_iter()
                .chain(parent.iter().flat_map(|parent| parent.layers()))
                .collect_vec();

            normalize(component.into_storage(), &layers, config)?
        };

        if !graph.is_complete() {
            return Err(NormalizationError::UnsatisfiedRequirements {
                keys: graph.required(),
            });
        }

        debug!(
            bindings = graph.bound_keys().count(),
            layered = base.is_some(),
            child = parent.is_some(),
            "Created injector"
        );

        Ok(Arc::new_cyclic(|state| Self {
            graph: Arc::new(graph),
            base,
            parent,
            handle: ErasedInstance::new(InstancePtr::new(InjectorHandle {
                state: state.clone(),
            })),
            cache: Default::default(),
            construction: ReentrantMutex::new(RefCell::new(ConstructionState::default())),
        }))
    }

    /// All graphs visible from this injector, nearest first.
    fn layers(&self) -> Vec<&NormalizedGraph> {
        let mut layers = vec![self.graph.as_ref()];
        layers.extend(self.base.as_deref());

        if let Some(parent) = &self.parent {
            layers.extend(parent.layers());
        }

        layers
    }

    fn bound_keys(&self) -> Vec<TypeKey> {
        self.layers()
            .into_iter()
            .flat_map(|layer| layer.bound_keys())
            .unique()
            .sorted_by_key(|key| key.name())
            .collect()
    }

    fn eagerly_inject_all(&self) -> Result<(), InjectionError> {
        for key in self.bound_keys() {
            self.instance(key)?;
        }

        let collectors = self
            .layers()
            .into_iter()
            .flat_map(|layer| layer.multibinding_collectors())
            .unique_by(|(key, _)| *key)
            .sorted_by_key(|(key, _)| key.name())
            .collect_vec();

        for (key, collect) in collectors {
            self.multibindings(key, collect)?;
        }

        Ok(())
    }

    fn binding(&self, key: TypeKey) -> Option<&Binding> {
        self.graph
            .binding(key)
            .or_else(|| self.base.as_ref().and_then(|base| base.binding(key)))
    }

    fn multibinding_set(&self, key: TypeKey) -> Option<&MultibindingSet> {
        self.graph
            .multibinding_set(key)
            .or_else(|| self.base.as_ref().and_then(|base| base.multibinding_set(key)))
    }

    fn construct(&self, binding: &Binding) -> Result<ErasedInstance, InjectionError> {
        if let BindingDescriptor::Instance(instance) = &binding.descriptor {
            return Ok(instance.clone());
        }

        let state = self.construction.lock();

        // another thread might have finished constructing while we were waiting
        if let Some(instance) = self.cache.instance(binding.key) {
            return Ok(instance);
        }

        let mark = ConstructionMark::acquire(&state, binding.key, ConstructionKind::Instance)?;

        trace!(key = %binding.key, kind = ?binding.descriptor.kind(), "Constructing instance");

        let instance = match &binding.descriptor {
            BindingDescriptor::Constructor(create)
            | BindingDescriptor::Provider(create)
            | BindingDescriptor::Factory(create) => create(self),
            BindingDescriptor::Interface { target, upcast } => {
                self.instance(*target).and_then(|instance| upcast(instance))
            }
            BindingDescriptor::Instance(instance) => Ok(instance.clone()),
        };

        drop(mark);
        let instance = instance?;

        if binding.descriptor.owns_instance() {
            state.borrow_mut().construction_log.push(instance.clone());
        }

        self.cache.store_instance(binding.key, instance.clone());
        Ok(instance)
    }

    fn construct_multibindings(
        &self,
        key: TypeKey,
        set: &MultibindingSet,
    ) -> Result<ErasedInstance, InjectionError> {
        let state = self.construction.lock();

        if let Some(collection) = self.cache.multibindings(key) {
            return Ok(collection);
        }

        let mark = ConstructionMark::acquire(&state, key, ConstructionKind::Multibindings)?;

        trace!(key = %key, elements = set.elements.len(), "Constructing multibindings");

        let elements: Result<Vec<ErasedInstance>, InjectionError> = set
            .elements
            .iter()
            .map(|multibinding| self.construct_multibinding(multibinding, &state))
            .try_collect();

        drop(mark);

        let collection = (set.collect)(elements?)?;
        Ok(self.cache.store_multibindings(key, collection))
    }

    fn construct_multibinding(
        &self,
        multibinding: &Multibinding,
        state: &RefCell<ConstructionState>,
    ) -> Result<ErasedInstance, InjectionError> {
        match &multibinding.descriptor {
            MultibindingDescriptor::Instance(instance) => Ok(instance.clone()),
            MultibindingDescriptor::Provider(create) => {
                let instance = create(self)?;
                state.borrow_mut().construction_log.push(instance.clone());
                Ok(instance)
            }
            MultibindingDescriptor::Interface { target, upcast } => {
                self.instance(*target).and_then(|instance| upcast(instance))
            }
        }
    }
}

impl InstanceProvider for InjectorState {
    fn instance(&self, key: TypeKey) -> Result<ErasedInstance, InjectionError> {
        self.instance_option(key)?
            .ok_or(InjectionError::TypeNotProvided(key))
    }

    fn instance_option(&self, key: TypeKey) -> Result<Option<ErasedInstance>, InjectionError> {
        if let Some(instance) = self.cache.instance(key) {
            return Ok(Some(instance));
        }

        if let Some(binding) = self.binding(key) {
            return self.construct(binding).map(Some);
        }

        if key == TypeKey::of::<InjectorHandle>() {
            return Ok(Some(self.handle.clone()));
        }

        match &self.parent {
            Some(parent) => parent.instance_option(key),
            None => Ok(None),
        }
    }

    fn multibindings(
        &self,
        key: TypeKey,
        collect: CollectFunction,
    ) -> Result<ErasedInstance, InjectionError> {
        if let Some(collection) = self.cache.multibindings(key) {
            return Ok(collection);
        }

        if let Some(set) = self.multibinding_set(key) {
            return self.construct_multibindings(key, set);
        }

        if let Some(parent) = &self.parent {
            return parent.multibindings(key, collect);
        }

        Ok(self.cache.store_multibindings(key, collect(Vec::new())?))
    }
}

impl Drop for InjectorState {
    fn drop(&mut self) {
        trace!(cached = self.cache.len(), "Dropping injector");
        self.cache.clear();

        let construction_log =
            std::mem::take(&mut self.construction.get_mut().get_mut().construction_log);

        trace!(instances = construction_log.len(), "Releasing injector instances");

        for instance in construction_log.into_iter().rev() {
            trace!(key = %instance.key(), "Releasing instance");
            drop(instance);
        }
    }
}

/// Lazily creates and stores instances described by a normalized graph. Please see the
/// module-level documentation for more information.
///
/// Injectors are `Send + Sync`. Retrieving already created instances doesn't block, while
/// construction is serialized, so each type is still constructed only once when requested from
/// multiple threads.
#[derive(Debug)]
pub struct Injector {
    state: Arc<InjectorState>,
}

impl Injector {
    /// Creates an injector from a complete component.
    pub fn new(component: Component) -> Result<Self, NormalizationError> {
        InjectorState::create(component, None, None, &NormalizerConfig::default())
            .map(|state| Self { state })
    }

    /// Creates an injector layered on top of a shared normalized parent. Only `component` gets
    /// normalized; together with the parent, it must satisfy all requirements.
    pub fn from_normalized(
        parent: &NormalizedComponent,
        component: Component,
    ) -> Result<Self, NormalizationError> {
        InjectorState::create(
            component,
            Some(parent.shared_graph()),
            None,
            &NormalizerConfig::default(),
        )
        .map(|state| Self { state })
    }

    /// Creates a child injector for given component. The child provides everything this
    /// injector does, using the instances created here, and keeps this injector's state alive
    /// for as long as it exists. Only the child's own bindings are constructed and owned by it.
    pub fn child(&self, component: Component) -> Result<Injector, NormalizationError> {
        InjectorState::create(
            component,
            None,
            Some(self.state.clone()),
            &NormalizerConfig::default(),
        )
        .map(|state| Self { state })
    }

    /// Returns a non-owning handle to this injector, which is also what bound types receive when
    /// depending on `InstancePtr<InjectorHandle>`.
    pub fn handle(&self) -> InjectorHandle {
        InjectorHandle {
            state: Arc::downgrade(&self.state),
        }
    }

    /// All types which can be requested from this injector, sorted by name.
    pub fn bound_keys(&self) -> Vec<TypeKey> {
        self.state.bound_keys()
    }

    /// Number of instances created and owned by this injector.
    pub fn constructed_count(&self) -> usize {
        self.state
            .construction
            .lock()
            .borrow()
            .construction_log
            .len()
    }

    /// Constructs all bound types and multibindings now, instead of waiting for them to be
    /// requested. Useful for detecting construction errors early.
    pub fn eagerly_inject_all(&self) -> Result<(), InjectionError> {
        self.state.eagerly_inject_all()
    }
}

impl InstanceProvider for Injector {
    #[inline]
    fn instance(&self, key: TypeKey) -> Result<ErasedInstance, InjectionError> {
        self.state.instance(key)
    }

    #[inline]
    fn instance_option(&self, key: TypeKey) -> Result<Option<ErasedInstance>, InjectionError> {
        self.state.instance_option(key)
    }

    #[inline]
    fn multibindings(
        &self,
        key: TypeKey,
        collect: CollectFunction,
    ) -> Result<ErasedInstance, InjectionError> {
        self.state.multibindings(key, collect)
    }
}

/// Non-owning handle to an [Injector]. Every injector binds its own handle implicitly, so
/// constructors can depend on `InstancePtr<InjectorHandle>` to look up instances on demand or to
/// create child injectors. Using a handle after its injector is dropped results in
/// [InjectionError::InjectorDropped].
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct InjectorHandle {
    #[derivative(Debug = "ignore")]
    state: Weak<InjectorState>,
}

impl InjectorHandle {
    fn state(&self) -> Result<Arc<InjectorState>, InjectionError> {
        self.state.upgrade().ok_or(InjectionError::InjectorDropped)
    }

    /// Creates a child injector, as [Injector::child] does.
    pub fn child(&self, component: Component) -> Result<Injector, Error> {
        let state = InjectorState::create(
            component,
            None,
            Some(self.state()?),
            &NormalizerConfig::default(),
        )?;

        Ok(Injector { state })
    }
}

impl InstanceProvider for InjectorHandle {
    fn instance(&self, key: TypeKey) -> Result<ErasedInstance, InjectionError> {
        self.state()?.instance(key)
    }

    fn instance_option(&self, key: TypeKey) -> Result<Option<ErasedInstance>, InjectionError> {
        self.state()?.instance_option(key)
    }

    fn multibindings(
        &self,
        key: TypeKey,
        collect: CollectFunction,
    ) -> Result<ErasedInstance, InjectionError> {
        self.state()?.multibindings(key, collect)
    }
}
