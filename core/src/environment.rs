//! A persistent map with scoped layers, the substrate of the typing
//! environment.
//!
//! An environment is a linked list of layers. Only the innermost layer is
//! ever modified; cloning an environment freezes the current layer and makes
//! it (and everything below) shared between the original and the clone.
//! Insertions after a clone never affect the other copies, which is exactly
//! what threading an environment by value through a checker requires:
//! overload resolution can keep an environment value obtained before a failed
//! attempt and retry from it untouched.
//!
//! Layers are [`IndexMap`]s so that iterating over an environment is
//! deterministic: the order of type variables and constraints is observable
//! in solver queries and error messages, and must be reproducible across
//! runs.
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

/// A persistent map from `K` to `V`, as a linked list of shared layers.
#[derive(Debug)]
pub struct Environment<K: Hash + Eq, V> {
    current: Rc<IndexMap<K, V>>,
    previous: Option<Rc<Environment<K, V>>>,
}

impl<K: Hash + Eq, V> Default for Environment<K, V> {
    fn default() -> Self {
        Environment {
            current: Rc::new(IndexMap::new()),
            previous: None,
        }
    }
}

impl<K: Hash + Eq, V> Clone for Environment<K, V> {
    fn clone(&self) -> Self {
        if self.current.is_empty() {
            Environment {
                current: Rc::new(IndexMap::new()),
                previous: self.previous.clone(),
            }
        } else {
            Environment {
                current: Rc::new(IndexMap::new()),
                previous: Some(Rc::new(Environment {
                    current: self.current.clone(),
                    previous: self.previous.clone(),
                })),
            }
        }
    }
}

impl<K: Hash + Eq, V> Environment<K, V> {
    /// Create a new empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key-value pair into the innermost layer.
    pub fn insert(&mut self, key: K, value: V) {
        match Rc::get_mut(&mut self.current) {
            Some(current) => {
                current.insert(key, value);
            }
            None => {
                // The current layer is shared with a clone: freeze it below a
                // fresh layer holding the new binding.
                let frozen = Environment {
                    current: self.current.clone(),
                    previous: self.previous.take(),
                };
                self.previous = Some(Rc::new(frozen));
                self.current = Rc::new(IndexMap::from_iter([(key, value)]));
            }
        }
    }

    /// Find the value of a key, looking through all layers from the
    /// innermost to the outermost.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.iter_layers().find_map(|layer| layer.get(key))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Iterate over the layers, from the innermost to the outermost.
    pub fn iter_layers(&self) -> impl Iterator<Item = &IndexMap<K, V>> {
        std::iter::successors(Some(self), |env| env.previous.as_deref())
            .map(|env| env.current.as_ref())
    }

    /// Iterate over all bindings, from the oldest to the most recent. A key
    /// bound in several layers appears once, at its oldest position, with its
    /// most recent value.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut collapsed: IndexMap<&K, &V> = IndexMap::new();
        let layers: Vec<_> = self.iter_layers().collect();
        for layer in layers.into_iter().rev() {
            for (key, value) in layer {
                collapsed.insert(key, value);
            }
        }
        collapsed.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.iter_layers().all(|layer| layer.is_empty())
    }
}

impl<K: Hash + Eq, V> FromIterator<(K, V)> for Environment<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Environment {
            current: Rc::new(IndexMap::from_iter(iter)),
            previous: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl<K: Hash + Eq, V> Environment<K, V> {
        fn depth(&self) -> usize {
            self.iter_layers().count()
        }
    }

    #[test]
    fn base_insert_get() {
        let mut env = Environment::new();
        env.insert(1, 'a');
        assert_eq!(env.get(&1), Some(&'a'));
        assert_eq!(env.get(&5), None);
        assert_eq!(env.depth(), 1);
    }

    #[test]
    fn clones_are_independent() {
        let mut base = Environment::new();
        base.insert(1, 'a');

        let mut scoped = base.clone();
        scoped.insert(2, 'b');
        assert_eq!(scoped.get(&1), Some(&'a'));
        assert_eq!(scoped.get(&2), Some(&'b'));

        base.insert(3, 'c');
        assert_eq!(scoped.get(&3), None);
        assert_eq!(base.get(&3), Some(&'c'));
        assert_eq!(base.get(&2), None);

        base.insert(1, 'z');
        assert_eq!(base.get(&1), Some(&'z'));
        assert_eq!(scoped.get(&1), Some(&'a'));
    }

    #[test]
    fn shadowing_keeps_oldest_position() {
        let mut env = Environment::new();
        env.insert("x", 1);
        env.insert("y", 2);
        let mut inner = env.clone();
        inner.insert("x", 10);

        let collected: Vec<_> = inner.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(collected, vec![("x", 10), ("y", 2)]);
    }

    #[test]
    fn empty_clone_does_not_grow() {
        let env: Environment<u8, u8> = Environment::new();
        let clone = env.clone().clone().clone();
        assert_eq!(clone.depth(), 1);
    }
}
