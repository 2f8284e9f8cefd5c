// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Equality-group tester.
//!
//! Items added in one group must be pairwise equal and hash-equal; items in
//! different groups must be pairwise unequal.

use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Collects equality groups and checks `Eq`/`Hash` consistency across them.
///
/// # Example
///
/// ```
/// use aspect_dry_tests::EqualsTester;
///
/// EqualsTester::new()
///     .add_equality_group(["a".to_string(), String::from("a")])
///     .add_equality_group(["b".to_string()])
///     .test_equals();
/// ```
#[derive(Debug)]
pub struct EqualsTester<T> {
    groups: Vec<Vec<T>>,
}

impl<T> Default for EqualsTester<T> {
    fn default() -> Self {
        Self { groups: Vec::new() }
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl<T: Eq + Hash + Debug> EqualsTester<T> {
    /// Create an empty tester.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group of items that must all be equal to each other.
    pub fn add_equality_group(mut self, items: impl IntoIterator<Item = T>) -> Self {
        let group: Vec<T> = items.into_iter().collect();
        assert!(!group.is_empty(), "equality group must not be empty");
        self.groups.push(group);
        self
    }

    /// Number of groups added so far.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Run every check; panics with the offending pair on failure.
    pub fn test_equals(&self) {
        for (g, group) in self.groups.iter().enumerate() {
            for (i, a) in group.iter().enumerate() {
                for (j, b) in group.iter().enumerate() {
                    assert!(
                        a == b,
                        "group {g}: item {i} ({a:?}) != item {j} ({b:?})"
                    );
                    assert_eq!(
                        hash_of(a),
                        hash_of(b),
                        "group {g}: item {i} and item {j} are equal but hash differently"
                    );
                }
            }
        }
        for (g, left) in self.groups.iter().enumerate() {
            for (h, right) in self.groups.iter().enumerate().skip(g + 1) {
                for a in left {
                    for b in right {
                        assert!(a != b, "group {g} item {a:?} equals group {h} item {b:?}");
                        assert!(b != a, "group {h} item {b:?} equals group {g} item {a:?}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_on_consistent_groups() {
        EqualsTester::new()
            .add_equality_group([1, 1])
            .add_equality_group([2])
            .test_equals();
    }

    #[test]
    #[should_panic(expected = "equals group")]
    fn fails_when_groups_overlap() {
        EqualsTester::new()
            .add_equality_group([1])
            .add_equality_group([1])
            .test_equals();
    }

    #[test]
    #[should_panic(expected = "!=")]
    fn fails_when_group_is_split() {
        EqualsTester::new().add_equality_group([1, 2]).test_equals();
    }
}
