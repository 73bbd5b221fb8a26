//! Handle registry
//!
//! Maps opaque handles to native objects. The registry owns exactly one
//! reference per issued handle and records which object each entry was created
//! from, so releasing an owner releases its dependents with it.

use crate::backend::Backend;
use crate::error::{BridgeError, Result};
use crate::handle::{ObjectKey, RawHandle};
use crate::object::{Kind, Object};
use slotmap::SlotMap;

struct Entry<B: Backend> {
    object: Object<B>,
    parent: Option<ObjectKey>,
    children: Vec<ObjectKey>,
}

/// Generation-tagged slot table of every live object
pub(crate) struct Registry<B: Backend> {
    slots: SlotMap<ObjectKey, Entry<B>>,
}

impl<B: Backend> Default for Registry<B> {
    fn default() -> Self {
        Self { slots: SlotMap::with_key() }
    }
}

fn invalid<H: RawHandle>(handle: H) -> BridgeError {
    BridgeError::InvalidHandle {
        expected: H::KIND,
        raw: handle.raw(),
    }
}

impl<B: Backend> Registry<B> {
    /// Registers an object, linking it to `parent` for cascading release
    ///
    /// # Arguments
    /// * `parent` - Live owner whose release also releases this object
    /// * `state` - Object payload
    ///
    /// # Returns
    /// The typed handle of the new entry
    pub fn insert<K: Kind<B>>(&mut self, parent: Option<ObjectKey>, state: K) -> (K::Handle, ObjectKey) {
        let key = self.slots.insert(Entry {
            object: state.wrap(),
            parent,
            children: Vec::new(),
        });
        if let Some(entry) = parent.and_then(|parent| self.slots.get_mut(parent)) {
            entry.children.push(key);
        }
        (<K::Handle as RawHandle>::from_key(key), key)
    }

    /// Resolves a handle to its key, checking the object kind
    pub fn key<K: Kind<B>>(&self, handle: K::Handle) -> Result<ObjectKey> {
        ObjectKey::from_raw(handle.raw())
            .filter(|key| self.slots.get(*key).is_some_and(|entry| K::project(&entry.object).is_some()))
            .ok_or_else(|| invalid(handle))
    }

    pub fn get<K: Kind<B>>(&self, handle: K::Handle) -> Result<(ObjectKey, &K)> {
        let key = self.key::<K>(handle)?;
        self.by_key::<K>(key).map(|state| (key, state)).ok_or_else(|| invalid(handle))
    }

    pub fn get_mut<K: Kind<B>>(&mut self, handle: K::Handle) -> Result<(ObjectKey, &mut K)> {
        let key = self.key::<K>(handle)?;
        self.by_key_mut::<K>(key).map(|state| (key, state)).ok_or_else(|| invalid(handle))
    }

    /// Looks up an entry by key; `None` once released
    pub fn by_key<K: Kind<B>>(&self, key: ObjectKey) -> Option<&K> {
        self.slots.get(key).and_then(|entry| K::project(&entry.object))
    }

    pub fn by_key_mut<K: Kind<B>>(&mut self, key: ObjectKey) -> Option<&mut K> {
        self.slots.get_mut(key).and_then(|entry| K::project_mut(&mut entry.object))
    }

    pub fn contains(&self, key: ObjectKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Releases a handle and everything created from it
    ///
    /// # Returns
    /// The removed objects, the released one first
    pub fn release<K: Kind<B>>(&mut self, handle: K::Handle) -> Result<Vec<Object<B>>> {
        let key = self.key::<K>(handle)?;
        Ok(self.remove(key))
    }

    /// Removes an entry by key together with its dependents
    pub fn remove(&mut self, key: ObjectKey) -> Vec<Object<B>> {
        let Some(parent) = self.slots.get(key).map(|entry| entry.parent) else {
            return Vec::new();
        };
        if let Some(siblings) = parent.and_then(|parent| self.slots.get_mut(parent)) {
            siblings.children.retain(|child| *child != key);
        }

        let mut removed = Vec::new();
        let mut pending = vec![key];
        while let Some(next) = pending.pop() {
            if let Some(entry) = self.slots.remove(next) {
                pending.extend(entry.children);
                removed.push(entry.object);
            }
        }
        removed
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, HeadlessDevice};
    use crate::error::ErrorKind;
    use crate::handle::{CommandQueueHandle, DeviceHandle};
    use crate::object::{DeviceState, QueueState};

    fn device_state(backend: &HeadlessBackend) -> DeviceState<HeadlessBackend> {
        let native: HeadlessDevice = backend.open_device(0).unwrap();
        DeviceState {
            limits: backend.device_limits(&native),
            native,
            index: 0,
            info: backend.adapters()[0].clone(),
        }
    }

    #[test]
    fn test_get_after_insert_and_release() {
        let backend = HeadlessBackend::default();
        let mut registry = Registry::<HeadlessBackend>::default();
        let (device, _) = registry.insert(None, device_state(&backend));

        let (_, state) = registry.get::<DeviceState<_>>(device).unwrap();
        assert_eq!(state.index, 0);

        registry.release::<DeviceState<_>>(device).unwrap();
        let err = registry.get::<DeviceState<_>>(device).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(registry.release::<DeviceState<_>>(device).err().unwrap().kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn test_wrong_kind_and_null_are_invalid() {
        let backend = HeadlessBackend::default();
        let mut registry = Registry::<HeadlessBackend>::default();
        let (device, _) = registry.insert(None, device_state(&backend));

        // The same raw value presented as another kind of handle
        let disguised = CommandQueueHandle::from_raw(device.to_raw());
        assert!(registry.get::<QueueState<_>>(disguised).is_err());
        assert!(registry.get::<DeviceState<_>>(DeviceHandle::NULL).is_err());
        assert!(registry.get::<DeviceState<_>>(DeviceHandle::from_raw(0xdead_beef)).is_err());
    }

    #[test]
    fn test_release_cascades_to_dependents() {
        let backend = HeadlessBackend::default();
        let mut registry = Registry::<HeadlessBackend>::default();
        let (device, device_key) = registry.insert(None, device_state(&backend));
        let native = &registry.get::<DeviceState<_>>(device).unwrap().1.native;
        let queue_native = backend.create_queue(native).unwrap();
        let (queue, _) = registry.insert(
            Some(device_key),
            QueueState::<HeadlessBackend> {
                native: queue_native,
                device: device_key,
            },
        );
        assert_eq!(registry.len(), 2);

        let removed = registry.release::<DeviceState<_>>(device).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(matches!(removed[0], Object::Device(_)));
        assert!(registry.get::<QueueState<_>>(queue).is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_released_child_is_unlinked_from_parent() {
        let backend = HeadlessBackend::default();
        let mut registry = Registry::<HeadlessBackend>::default();
        let (device, device_key) = registry.insert(None, device_state(&backend));
        let native = backend.open_device(0).unwrap();
        let (queue, queue_key) = registry.insert(
            Some(device_key),
            QueueState::<HeadlessBackend> {
                native: backend.create_queue(&native).unwrap(),
                device: device_key,
            },
        );

        registry.release::<QueueState<_>>(queue).unwrap();
        assert!(!registry.contains(queue_key));
        assert_eq!(registry.release::<DeviceState<_>>(device).unwrap().len(), 1);
    }
}
