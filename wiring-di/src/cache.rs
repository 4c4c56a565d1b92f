//! Instance storage of an injector. Every injector has its own cache, so instances are singletons
//! in the scope of a single injector. Reads only take a shared lock, so already created instances
//! can be retrieved concurrently.

use crate::instance_provider::{ErasedInstance, TypeKey};
use fxhash::FxHashMap;
use parking_lot::RwLock;

#[derive(Default, Debug)]
pub(crate) struct InstanceCache {
    instances: RwLock<FxHashMap<TypeKey, ErasedInstance>>,
    multibindings: RwLock<FxHashMap<TypeKey, ErasedInstance>>,
}

impl InstanceCache {
    #[inline]
    pub(crate) fn instance(&self, key: TypeKey) -> Option<ErasedInstance> {
        self.instances.read().get(&key).cloned()
    }

    #[inline]
    pub(crate) fn store_instance(&self, key: TypeKey, instance: ErasedInstance) {
        self.instances.write().insert(key, instance);
    }

    #[inline]
    pub(crate) fn multibindings(&self, key: TypeKey) -> Option<ErasedInstance> {
        self.multibindings.read().get(&key).cloned()
    }

    /// Stores the collection unless one is already present, and returns the stored one.
    pub(crate) fn store_multibindings(
        &self,
        key: TypeKey,
        collection: ErasedInstance,
    ) -> ErasedInstance {
        self.multibindings
            .write()
            .entry(key)
            .or_insert(collection)
            .clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub(crate) fn clear(&mut self) {
        self.instances.get_mut().clear();
        self.multibindings.get_mut().clear();
    }
}
