//! Ordered membership set with round-robin rotation.

use std::collections::VecDeque;

/// Insertion-ordered set of members.
///
/// Used for subscriber lists and bound-queue lists. `rotate` gives the
/// round-robin pick: the last member moves to the front and is returned,
/// so N consecutive rotations visit every member exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberSet<T> {
    items: VecDeque<T>,
}

impl<T: PartialEq> MemberSet<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, member: &T) -> bool {
        self.items.contains(member)
    }

    /// Append `member`. Returns false if it was already present.
    pub fn insert(&mut self, member: T) -> bool {
        if self.items.contains(&member) {
            return false;
        }
        self.items.push_back(member);
        true
    }

    /// Returns false if `member` was not present.
    pub fn remove(&mut self, member: &T) -> bool {
        match self.items.iter().position(|m| m == member) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    /// Rotate by one and return the new first member.
    pub fn rotate(&mut self) -> Option<&T> {
        if self.items.len() > 1 {
            self.items.rotate_right(1);
        }
        self.items.front()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: PartialEq + Clone> MemberSet<T> {
    /// Copy of the current members, for walks that may mutate the set.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: PartialEq> Default for MemberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> FromIterator<T> for MemberSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = MemberSet::new();
        for member in iter {
            set.insert(member);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = MemberSet::new();
        assert!(set.insert(1));
        assert!(set.insert(2));
        assert!(!set.insert(1));
        assert_eq!(set.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_remove() {
        let mut set: MemberSet<u32> = [1, 2, 3].into_iter().collect();
        assert!(set.remove(&2));
        assert!(!set.remove(&2));
        assert_eq!(set.to_vec(), vec![1, 3]);
    }

    #[test]
    fn test_rotate_visits_each_member_once() {
        let mut set: MemberSet<u32> = [1, 2, 3].into_iter().collect();
        let picks: Vec<u32> = (0..3).map(|_| *set.rotate().unwrap()).collect();
        assert_eq!(picks, vec![3, 2, 1]);

        // Back to the starting order after a full cycle.
        assert_eq!(set.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rotate_single_and_empty() {
        let mut set = MemberSet::new();
        assert_eq!(set.rotate(), None);
        set.insert(9);
        assert_eq!(set.rotate(), Some(&9));
        assert_eq!(set.rotate(), Some(&9));
    }
}
