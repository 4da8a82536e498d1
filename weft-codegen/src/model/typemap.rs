//! A type-keyed associative container.  `TypeMap` buckets entries by the stable hash of the
//! `TypeKey` and breaks bucket collisions by full structural comparison, so lookups never depend
//! on hash uniqueness.  Iteration is in insertion order, which (because every phase inserts in
//! declaration order) is what makes the whole pipeline's output reproducible byte for byte.

use crate::model::types::TypeKey;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TypeMap<V> {
    buckets: HashMap<u64, Vec<usize>>,
    entries: Vec<(TypeKey, V)>,
}

impl<V> Default for TypeMap<V> {
    fn default() -> TypeMap<V> {
        TypeMap::new()
    }
}

impl<V> TypeMap<V> {
    pub fn new() -> TypeMap<V> {
        TypeMap {
            buckets: HashMap::new(),
            entries: Vec::new(),
        }
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, key: &TypeKey) -> Option<usize> {
        self.buckets.get(&key.stable_hash()).and_then(|indices| {
            indices
                .iter()
                .cloned()
                .find(|&i| &self.entries[i].0 == key)
        })
    }

    pub fn contains_key(&self, key: &TypeKey) -> bool {
        self.index_of(key).is_some()
    }

    pub fn get(&self, key: &TypeKey) -> Option<&V> {
        self.index_of(key).map(move |i| &self.entries[i].1)
    }

    /// Inserts the entry if the key is vacant.  An occupied key leaves the map unchanged and
    /// hands the rejected value back so the caller can report the conflict.
    pub fn try_insert(&mut self, key: TypeKey, value: V) -> Result<(), V> {
        if self.index_of(&key).is_some() {
            return Err(value);
        }
        let index = self.entries.len();
        self.buckets
            .entry(key.stable_hash())
            .or_insert_with(Vec::new)
            .push(index);
        self.entries.push((key, value));
        Ok(())
    }

    /// Entries in insertion order
    #[allow(dead_code)]
    pub fn iter(&self) -> impl Iterator<Item = (&TypeKey, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &TypeKey> {
        self.entries.iter().map(|(k, _)| k)
    }
}
