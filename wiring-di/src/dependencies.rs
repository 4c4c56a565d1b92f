//! Typed description of constructor parameters.
//!
//! Constructors and providers are plain functions whose parameters are all [InstancePtr]s. The
//! parameter list is captured as a tuple implementing [Dependencies], which knows both the ordered
//! list of dependency keys (needed by the normalizer) and how to resolve them from an
//! [InstanceProvider] (needed by the injector). Up to 8 parameters are supported.

use crate::error::InjectionError;
use crate::instance_provider::{
    Injectable, InstanceProvider, InstancePtr, TypeKey, TypedInstanceProvider,
};

/// An ordered set of injected dependencies.
pub trait Dependencies: Sized + Send + Sync + 'static {
    /// Keys of all dependencies, in parameter order.
    fn keys() -> Vec<TypeKey>;

    /// Resolves all dependencies using given provider.
    fn resolve(instance_provider: &dyn InstanceProvider) -> Result<Self, InjectionError>;
}

/// A function creating `Output` from resolved [Dependencies]. Implemented for all
/// `Fn(InstancePtr<A>, InstancePtr<B>, ...) -> Output` functions.
pub trait Constructor<Deps: Dependencies, Output>: Send + Sync + 'static {
    fn construct(&self, dependencies: Deps) -> Output;
}

impl Dependencies for () {
    #[inline]
    fn keys() -> Vec<TypeKey> {
        Vec::new()
    }

    #[inline]
    fn resolve(_instance_provider: &dyn InstanceProvider) -> Result<Self, InjectionError> {
        Ok(())
    }
}

impl<Func, Output> Constructor<(), Output> for Func
where
    Func: Fn() -> Output + Send + Sync + 'static,
{
    #[inline]
    fn construct(&self, _dependencies: ()) -> Output {
        (self)()
    }
}

macro_rules! impl_dependencies {
    ($($name:ident),+) => {
        impl<$($name: Injectable + ?Sized),+> Dependencies for ($(InstancePtr<$name>,)+) {
            fn keys() -> Vec<TypeKey> {
                vec![$(TypeKey::of::<$name>()),+]
            }

            fn resolve(instance_provider: &dyn InstanceProvider) -> Result<Self, InjectionError> {
                Ok(($(instance_provider.get::<$name>()?,)+))
            }
        }

        impl<Func, Output, $($name: Injectable + ?Sized),+> Constructor<($(InstancePtr<$name>,)+), Output> for Func
        where
            Func: Fn($(InstancePtr<$name>),+) -> Output + Send + Sync + 'static,
        {
            #[allow(non_snake_case)]
            fn construct(&self, dependencies: ($(InstancePtr<$name>,)+)) -> Output {
                let ($($name,)+) = dependencies;
                (self)($($name),+)
            }
        }
    };
}

impl_dependencies!(A1);
impl_dependencies!(A1, A2);
impl_dependencies!(A1, A2, A3);
impl_dependencies!(A1, A2, A3, A4);
impl_dependencies!(A1, A2, A3, A4, A5);
impl_dependencies!(A1, A2, A3, A4, A5, A6);
impl_dependencies!(A1, A2, A3, A4, A5, A6, A7);
impl_dependencies!(A1, A2, A3, A4, A5, A6, A7, A8);
