//! Generational registries behind the renderer's opaque handles.
//!
//! A handle is a slot index plus the generation the slot had when the value
//! was inserted. Removing a value bumps the slot's generation, so handles to
//! it stop resolving even after the slot is reused.

use std::fmt;

/// A registry key.
pub trait Key: Copy + Eq + fmt::Debug {
    /// Name used in log and error messages.
    const KIND: &'static str;

    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl Key for $name {
            const KIND: &'static str = $kind;

            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> u32 {
                self.index
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}v{})", stringify!($name), self.index, self.generation)
            }
        }
    };
}

handle!(
    /// A scene: instances, views and lights.
    SceneHandle,
    "scene"
);
handle!(
    /// A camera over one scene.
    ViewHandle,
    "view"
);
handle!(InstanceHandle, "instance");
handle!(MeshHandle, "mesh");
handle!(TextureHandle, "texture");
handle!(ShaderHandle, "shader");

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Values addressed by generational keys.
pub struct Registry<K: Key, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _key: std::marker::PhantomData<K>,
}

impl<K: Key, T> Default for Registry<K, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: std::marker::PhantomData,
        }
    }
}

impl<K: Key, T> Registry<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return K::from_parts(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        K::from_parts(index, 0)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self
            .slots
            .get_mut(key.index() as usize)
            .filter(|slot| slot.generation == key.generation())?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index());
        self.len -= 1;
        Some(value)
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from_parts(i as u32, slot.generation), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (K::from_parts(i as u32, generation), value))
        })
    }

    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(key, _)| key).collect()
    }

    /// Remove every entry, in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let values = self
            .slots
            .iter_mut()
            .filter_map(|slot| {
                let value = slot.value.take()?;
                slot.generation = slot.generation.wrapping_add(1);
                Some(value)
            })
            .collect();
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.len = 0;
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut registry: Registry<MeshHandle, &str> = Registry::new();
        let a = registry.insert("a");
        assert_eq!(registry.remove(a), Some("a"));

        let b = registry.insert("b");
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(registry.get(a), None);
        assert_eq!(registry.get(b), Some(&"b"));
        assert_eq!(registry.remove(a), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn iteration_follows_slot_order() {
        let mut registry: Registry<SceneHandle, u32> = Registry::new();
        let keys: Vec<_> = (0..4).map(|i| registry.insert(i)).collect();
        registry.remove(keys[1]);

        let values: Vec<_> = registry.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, [0, 2, 3]);
        assert_eq!(registry.keys(), [keys[0], keys[2], keys[3]]);
    }

    #[test]
    fn drain_empties_and_invalidates() {
        let mut registry: Registry<TextureHandle, u32> = Registry::new();
        let a = registry.insert(1);
        let b = registry.insert(2);

        assert_eq!(registry.drain(), [1, 2]);
        assert!(registry.is_empty());
        assert!(!registry.contains(a));
        assert!(!registry.contains(b));

        let c = registry.insert(3);
        assert_eq!(c.index(), 0);
        assert_eq!(registry.get(c), Some(&3));
    }
}
