//! Factories are callables produced by factory bindings. A factory is itself a singleton within an
//! injector, but each [Factory::create] call builds a new instance from caller-supplied arguments.
//! Injected dependencies are resolved on the first call and reused afterwards, so two types can
//! reach each other through a factory without forming a dependency cycle. Created instances are
//! not managed by the injector.
//!
//! ```
//! use wiring_di::component::Component;
//! use wiring_di::factory::Factory;
//! use wiring_di::injector::Injector;
//! use wiring_di::instance_provider::{InstancePtr, TypedInstanceProvider};
//!
//! struct Prefix(&'static str);
//!
//! struct Greeting(String);
//!
//! let injector = Injector::new(
//!     Component::new()
//!         .bind_instance(InstancePtr::new(Prefix("Hello")))
//!         .register_factory(|(prefix,): &(InstancePtr<Prefix>,), name: String| {
//!             Greeting(format!("{} {}", prefix.0, name))
//!         }),
//! )
//! .unwrap();
//!
//! let factory = injector.get::<Factory<String, Greeting>>().unwrap();
//! assert_eq!(factory.create("world".to_string()).unwrap().0, "Hello world");
//! ```

use crate::error::InjectionError;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Repeatable constructor for `T` taking runtime arguments `Args`. Use a tuple for multiple
/// arguments.
pub struct Factory<Args, T> {
    create: Arc<dyn Fn(Args) -> Result<T, InjectionError> + Send + Sync>,
}

impl<Args, T> Factory<Args, T> {
    pub fn new<F>(create: F) -> Self
    where
        F: Fn(Args) -> Result<T, InjectionError> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
        }
    }

    /// Creates a new, independent instance. Fails if the factory's dependencies cannot be
    /// resolved.
    #[inline]
    pub fn create(&self, args: Args) -> Result<T, InjectionError> {
        (self.create)(args)
    }
}

impl<Args, T> Clone for Factory<Args, T> {
    fn clone(&self) -> Self {
        Self {
            create: self.create.clone(),
        }
    }
}

impl<Args, T> Debug for Factory<Args, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("args", &std::any::type_name::<Args>())
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}
