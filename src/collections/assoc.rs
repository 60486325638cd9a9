//! Insertion-ordered association list.

use std::borrow::Borrow;

/// Ordered key -> value association.
///
/// Sets here stay small (topics of one channel, keys of one route), so a
/// linear scan beats hashing and keeps iteration in insertion order.
/// Removed values are dropped, which releases whatever they own.
#[derive(Clone, Debug)]
pub struct AssocList<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: PartialEq, V> AssocList<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.entries.iter().position(|(k, _)| k.borrow() == key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        match self.position(key) {
            Some(i) => Some(&mut self.entries[i].1),
            None => None,
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).is_some()
    }

    /// Find the first entry whose key satisfies a custom equality.
    pub fn find<F>(&self, mut matches: F) -> Option<(&K, &V)>
    where
        F: FnMut(&K) -> bool,
    {
        self.entries
            .iter()
            .find(|(k, _)| matches(k))
            .map(|(k, v)| (k, v))
    }

    /// Insert or replace. Returns the previous value for `key`.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.position(&key) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Value for `key`, appending `make()` at the end if absent.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let i = match self.position(&key) {
            Some(i) => i,
            None => {
                self.entries.push((key, make()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[i].1
    }

    /// Remove `key`, preserving the order of the remaining entries.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: PartialEq + ?Sized,
    {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.entries.retain_mut(|(k, v)| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: PartialEq, V> Default for AssocList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> IntoIterator for AssocList<K, V> {
    type Item = (K, V);
    type IntoIter = std::vec::IntoIter<(K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_kept() {
        let mut list = AssocList::new();
        list.insert("b".to_string(), 2);
        list.insert("a".to_string(), 1);
        list.insert("c".to_string(), 3);

        let keys: Vec<_> = list.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);

        list.remove("a");
        let keys: Vec<_> = list.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_insert_replaces() {
        let mut list = AssocList::new();
        assert_eq!(list.insert("k".to_string(), 1), None);
        assert_eq!(list.insert("k".to_string(), 2), Some(1));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get("k"), Some(&2));
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut list: AssocList<String, Vec<u32>> = AssocList::new();
        list.get_or_insert_with("k".to_string(), Vec::new).push(1);
        list.get_or_insert_with("k".to_string(), Vec::new).push(2);
        assert_eq!(list.get("k"), Some(&vec![1, 2]));
    }

    #[test]
    fn test_find_custom_equality() {
        let mut list = AssocList::new();
        list.insert("Orders".to_string(), 1);
        let found = list.find(|k| k.eq_ignore_ascii_case("orders"));
        assert_eq!(found.map(|(_, v)| *v), Some(1));
    }

    #[test]
    fn test_removed_value_is_dropped() {
        use std::rc::Rc;

        let value = Rc::new(());
        let mut list = AssocList::new();
        list.insert(1u32, Rc::clone(&value));
        assert_eq!(Rc::strong_count(&value), 2);

        list.retain(|_, _| false);
        assert_eq!(Rc::strong_count(&value), 1);
        assert!(list.is_empty());
    }
}
