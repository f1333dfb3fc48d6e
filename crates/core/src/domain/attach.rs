//! Keyed get-or-create storage for objects attached to an owner

use std::collections::HashMap;
use std::hash::Hash;

type Factory<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// Objects of one kind attached to owners, created on first reference
pub struct AttachedObjects<K, V> {
    factory: Factory<K, V>,
    objects: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> AttachedObjects<K, V> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            objects: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.objects.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.objects.get_mut(key)
    }

    /// Object attached to `key`, building it with the factory if absent
    pub fn get_or_create(&mut self, key: &K) -> &mut V {
        let factory = &self.factory;
        self.objects
            .entry(key.clone())
            .or_insert_with(|| factory(key))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.objects.remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.objects.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.objects.keys()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.objects.values_mut()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
