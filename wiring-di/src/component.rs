//! One of the basic blocks of dependency injection is a [Component] - a bundle of bindings,
//! describing how to obtain instances of given types, together with the types it requires from
//! the outside. Components are composable: installing one component into another merges their
//! bindings.
//!
//! ## Registering bindings
//!
//! Every binding method consumes the component and returns an updated one, so components are
//! naturally built as a chain of calls:
//!
//! ```
//! use wiring_di::component::Component;
//! use wiring_di::injector::Injector;
//! use wiring_di::instance_provider::{InstancePtr, TypedInstanceProvider};
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! struct Config {
//!     name: String,
//! }
//!
//! struct ConfiguredGreeter {
//!     config: InstancePtr<Config>,
//! }
//!
//! impl ConfiguredGreeter {
//!     fn new(config: InstancePtr<Config>) -> Self {
//!         Self { config }
//!     }
//! }
//!
//! impl Greeter for ConfiguredGreeter {
//!     fn greet(&self) -> String {
//!         format!("Hello {}!", self.config.name)
//!     }
//! }
//!
//! fn greeter_component() -> Component {
//!     Component::named("greeter")
//!         // requests for dyn Greeter are redirected to ConfiguredGreeter
//!         .bind::<dyn Greeter, ConfiguredGreeter, _>(|greeter| greeter)
//!         // ConfiguredGreeter is created with ConfiguredGreeter::new, with injected parameters
//!         .register_constructor(ConfiguredGreeter::new)
//!         // Config is expected to come from somewhere else
//!         .require::<Config>()
//! }
//!
//! let injector = Injector::new(
//!     Component::new()
//!         .install(greeter_component())
//!         .bind_instance(InstancePtr::new(Config {
//!             name: "world".to_string(),
//!         })),
//! )
//! .unwrap();
//!
//! assert_eq!(injector.get::<dyn Greeter>().unwrap().greet(), "Hello world!");
//! ```
//!
//! ## Supported bindings
//!
//! * [Component::bind] - interface binding; the implementation binding may be registered later, or
//! in another component
//! * [Component::register_constructor] - infallible function with injected parameters
//! * [Component::register_provider] - fallible function with injected parameters
//! * [Component::bind_instance] - externally owned instance
//! * [Component::register_factory] - a [Factory](crate::factory::Factory) creating new instances
//! on demand
//! * [Component::add_multibinding], [Component::add_instance_multibinding],
//! [Component::add_instance_multibindings], [Component::add_multibinding_provider] - elements of a
//! collection of instances for a single type
//!
//! Function parameters must be [InstancePtr]s of other bound types. Closures need explicit
//! parameter types.
//!
//! Nothing is validated when registering bindings - all checks happen when a component is
//! normalized, i.e. when creating a [NormalizedComponent](crate::normalizer::NormalizedComponent)
//! or an [Injector](crate::injector::Injector).

use crate::component_registry::{
    collect_multibindings, erase_upcast, Binding, BindingDescriptor, BindingIdentity,
    ComponentSource, ComponentStorage, DeferredInterfaceBinding, Multibinding,
    MultibindingDescriptor, Requirement,
};
use crate::dependencies::{Constructor, Dependencies};
use crate::error::{ErrorPtr, InjectionError};
use crate::factory::Factory;
use crate::injector::InjectorHandle;
use crate::instance_provider::{
    ErasedInstance, Injectable, InstanceProvider, InstancePtr, TypeKey, TypedInstanceProvider,
};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// A bundle of bindings. Please see the module-level documentation for more information.
///
/// Components are not `Clone`: every binding method consumes the component and returns the
/// updated one.
#[derive(Debug)]
pub struct Component {
    source: ComponentSource,
    storage: ComponentStorage,
}

impl Default for Component {
    fn default() -> Self {
        Self::new()
    }
}

impl Component {
    /// Creates a new, empty component.
    pub fn new() -> Self {
        Self::named("component")
    }

    /// Creates a new, empty component with given name, which is used in diagnostics.
    pub fn named<N: Into<Arc<str>>>(name: N) -> Self {
        Self {
            source: ComponentSource::new(name.into()),
            storage: Default::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.source.name()
    }

    #[inline]
    pub fn source(&self) -> &ComponentSource {
        &self.source
    }

    /// Types bound by this component, including installed components.
    pub fn provided(&self) -> Vec<TypeKey> {
        self.storage.bound_keys()
    }

    /// Types required by this component: declared requirements, dependencies and interface targets
    /// it has no binding for, including installed components.
    pub fn required(&self) -> Vec<TypeKey> {
        self.storage.required_keys()
    }

    /// Binds interface `I` to implementation `C`, using `upcast` for the conversion. Usually
    /// `upcast` is simply `|implementation| implementation`.
    pub fn bind<I, C, F>(mut self, upcast: F) -> Self
    where
        I: Injectable + ?Sized,
        C: Injectable + ?Sized,
        F: Fn(InstancePtr<C>) -> InstancePtr<I> + Send + Sync + 'static,
    {
        self.storage.interfaces.push(DeferredInterfaceBinding {
            interface: TypeKey::of::<I>(),
            target: TypeKey::of::<C>(),
            identity: BindingIdentity::of_callable::<F>(),
            source: self.source.clone(),
            upcast: erase_upcast(upcast),
        });
        self
    }

    /// Registers a function creating `C` from injected dependencies.
    pub fn register_constructor<C, Deps, F>(mut self, constructor: F) -> Self
    where
        C: Injectable,
        Deps: Dependencies,
        F: Constructor<Deps, C>,
    {
        let identity = BindingIdentity::of_callable::<F>();
        let create = Arc::new(
            move |instance_provider: &dyn InstanceProvider| -> Result<ErasedInstance, InjectionError> {
                let dependencies = Deps::resolve(instance_provider)?;
                Ok(ErasedInstance::new(InstancePtr::new(
                    constructor.construct(dependencies),
                )))
            },
        );

        self.push_binding::<C>(
            Deps::keys(),
            identity,
            BindingDescriptor::Constructor(create),
        );
        self
    }

    /// Registers a fallible function creating `C` from injected dependencies. Errors are reported
    /// as [InjectionError::ConstructionFailed].
    pub fn register_provider<C, Deps, F>(mut self, provider: F) -> Self
    where
        C: Injectable,
        Deps: Dependencies,
        F: Constructor<Deps, Result<C, ErrorPtr>>,
    {
        let identity = BindingIdentity::of_callable::<F>();
        let create = Arc::new(
            move |instance_provider: &dyn InstanceProvider| -> Result<ErasedInstance, InjectionError> {
                provide::<C, Deps, F>(&provider, instance_provider)
            },
        );

        self.push_binding::<C>(Deps::keys(), identity, BindingDescriptor::Provider(create));
        self
    }

    /// Binds an externally owned instance. The injector never releases it on teardown.
    pub fn bind_instance<C: Injectable + ?Sized>(mut self, instance: InstancePtr<C>) -> Self {
        let instance = ErasedInstance::new(instance);
        self.push_binding::<C>(
            Vec::new(),
            BindingIdentity::Instance(instance.address()),
            BindingDescriptor::Instance(instance),
        );
        self
    }

    /// Registers a [Factory] for `C`, available as `Factory<Args, C>`. Dependencies are resolved
    /// on the first [Factory::create] and reused afterwards, so they may depend on the factory
    /// themselves. `factory` is called on every [Factory::create] with the resolved dependencies
    /// and the caller's arguments.
    pub fn register_factory<Args, C, Deps, F>(mut self, factory: F) -> Self
    where
        Args: 'static,
        C: 'static,
        Deps: Dependencies,
        F: Fn(&Deps, Args) -> C + Send + Sync + 'static,
    {
        let identity = BindingIdentity::of_callable::<F>();
        let factory = Arc::new(factory);
        let create = Arc::new(
            move |instance_provider: &dyn InstanceProvider| -> Result<ErasedInstance, InjectionError> {
                let injector = instance_provider.get::<InjectorHandle>()?;
                let dependencies = OnceCell::new();
                let factory = factory.clone();

                Ok(ErasedInstance::new(InstancePtr::new(Factory::new(
                    move |args: Args| {
                        let dependencies =
                            dependencies.get_or_try_init(|| Deps::resolve(&*injector))?;
                        Ok((*factory)(dependencies, args))
                    },
                ))))
            },
        );

        self.push_binding::<Factory<Args, C>>(
            Deps::keys(),
            identity,
            BindingDescriptor::Factory(create),
        );
        self
    }

    /// Adds the instance bound to `C` to the collection of `I` multibindings.
    pub fn add_multibinding<I, C, F>(mut self, upcast: F) -> Self
    where
        I: Injectable + ?Sized,
        C: Injectable + ?Sized,
        F: Fn(InstancePtr<C>) -> InstancePtr<I> + Send + Sync + 'static,
    {
        self.push_multibinding::<I>(
            vec![TypeKey::of::<C>()],
            MultibindingDescriptor::Interface {
                target: TypeKey::of::<C>(),
                upcast: erase_upcast(upcast),
            },
        );
        self
    }

    /// Adds an externally owned instance to the collection of `C` multibindings.
    pub fn add_instance_multibinding<C: Injectable + ?Sized>(
        mut self,
        instance: InstancePtr<C>,
    ) -> Self {
        self.push_multibinding::<C>(
            Vec::new(),
            MultibindingDescriptor::Instance(ErasedInstance::new(instance)),
        );
        self
    }

    /// Adds externally owned instances to the collection of `C` multibindings, in iteration order.
    pub fn add_instance_multibindings<C, It>(self, instances: It) -> Self
    where
        C: Injectable + ?Sized,
        It: IntoIterator<Item = InstancePtr<C>>,
    {
        instances
            .into_iter()
            .fold(self, |component, instance| {
                component.add_instance_multibinding(instance)
            })
    }

    /// Adds an instance created by a fallible function to the collection of `C` multibindings.
    pub fn add_multibinding_provider<C, Deps, F>(mut self, provider: F) -> Self
    where
        C: Injectable,
        Deps: Dependencies,
        F: Constructor<Deps, Result<C, ErrorPtr>>,
    {
        let create = Arc::new(
            move |instance_provider: &dyn InstanceProvider| -> Result<ErasedInstance, InjectionError> {
                provide::<C, Deps, F>(&provider, instance_provider)
            },
        );

        self.push_multibinding::<C>(Deps::keys(), MultibindingDescriptor::Provider(create));
        self
    }

    /// Declares `T` as required - it must be bound by another component before an injector can
    /// be created.
    pub fn require<T: Injectable + ?Sized>(mut self) -> Self {
        self.storage.requirements.push(Requirement {
            key: TypeKey::of::<T>(),
            source: self.source.clone(),
        });
        self
    }

    /// Merges all bindings and requirements from given component into this one.
    pub fn install(mut self, component: Component) -> Self {
        self.storage.install(component.storage);
        self
    }

    pub(crate) fn into_storage(self) -> ComponentStorage {
        self.storage
    }

    fn push_binding<C: Injectable + ?Sized>(
        &mut self,
        dependencies: Vec<TypeKey>,
        identity: BindingIdentity,
        descriptor: BindingDescriptor,
    ) {
        self.storage.bindings.push(Binding {
            key: TypeKey::of::<C>(),
            dependencies,
            identity,
            source: self.source.clone(),
            descriptor,
        });
    }

    fn push_multibinding<C: Injectable + ?Sized>(
        &mut self,
        dependencies: Vec<TypeKey>,
        descriptor: MultibindingDescriptor,
    ) {
        self.storage.multibindings.push(Multibinding {
            key: TypeKey::of::<C>(),
            dependencies,
            source: self.source.clone(),
            descriptor,
            collect: collect_multibindings::<C>,
        });
    }
}

fn provide<C, Deps, F>(
    provider: &F,
    instance_provider: &dyn InstanceProvider,
) -> Result<ErasedInstance, InjectionError>
where
    C: Injectable,
    Deps: Dependencies,
    F: Constructor<Deps, Result<C, ErrorPtr>>,
{
    let dependencies = Deps::resolve(instance_provider)?;
    provider
        .construct(dependencies)
        .map(|instance| ErasedInstance::new(InstancePtr::new(instance)))
        .map_err(|error| InjectionError::ConstructionFailed {
            key: TypeKey::of::<C>(),
            error,
        })
}
