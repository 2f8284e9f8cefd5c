// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Aspect parameters: an immutable, single-valued attribute map.

use std::collections::btree_map::{self, BTreeMap, Entry};
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::KeyError;

static EMPTY_PARAMETERS: OnceLock<Arc<AspectParameters>> = OnceLock::new();

/// Immutable mapping from attribute name to attribute value attached to one
/// aspect application.
///
/// Attributes are kept sorted by name, so equality, hashing, and encoding
/// are independent of the order the builder saw them in.
///
/// # Identity
///
/// The empty value is a process-wide singleton: [`AspectParameters::empty`]
/// and every builder that adds no attributes return clones of the same
/// `Arc`. Non-empty values are only identical after passing through an
/// [`InternSession`](crate::InternSession).
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AspectParameters {
    attributes: BTreeMap<String, String>,
}

impl AspectParameters {
    /// Starts a new builder.
    pub fn builder() -> AspectParametersBuilder {
        AspectParametersBuilder::default()
    }

    /// The shared empty instance.
    pub fn empty() -> Arc<AspectParameters> {
        Arc::clone(EMPTY_PARAMETERS.get_or_init(|| Arc::new(Self::default())))
    }

    /// Value of `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Returns `true` if `name` is set.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns `true` if no attributes are set.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Attributes in ascending name order.
    pub fn iter(&self) -> AttributeIter<'_> {
        AttributeIter {
            inner: self.attributes.iter(),
        }
    }
}

impl fmt::Display for AspectParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for AspectParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.attributes.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a AspectParameters {
    type Item = (&'a str, &'a str);
    type IntoIter = AttributeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Name-ordered iterator over an [`AspectParameters`] value.
#[derive(Debug, Clone)]
pub struct AttributeIter<'a> {
    inner: btree_map::Iter<'a, String, String>,
}

impl<'a> Iterator for AttributeIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for AttributeIter<'_> {}

/// Accumulates attributes for an [`AspectParameters`] value.
///
/// Conflicts are recorded rather than reported immediately so the builder
/// stays chainable; [`build`](Self::build) reports the first one.
#[derive(Debug, Default)]
pub struct AspectParametersBuilder {
    attributes: BTreeMap<String, String>,
    conflict: Option<KeyError>,
}

impl AspectParametersBuilder {
    /// Adds `name = value`.
    ///
    /// Re-adding an identical pair is a no-op. Adding a different value for
    /// a name already present makes [`build`](Self::build) fail with
    /// [`KeyError::DuplicateAttribute`].
    pub fn add_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.attributes.entry(name.into()) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(slot) => {
                if *slot.get() != value && self.conflict.is_none() {
                    self.conflict = Some(KeyError::DuplicateAttribute {
                        name: slot.key().clone(),
                        existing: slot.get().clone(),
                        conflicting: value,
                    });
                }
            }
        }
        self
    }

    /// Finishes the value.
    ///
    /// An empty builder yields the shared [`AspectParameters::empty`]
    /// instance.
    pub fn build(self) -> Result<Arc<AspectParameters>, KeyError> {
        if let Some(err) = self.conflict {
            return Err(err);
        }
        if self.attributes.is_empty() {
            return Ok(AspectParameters::empty());
        }
        Ok(Arc::new(AspectParameters {
            attributes: self.attributes,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rustc_hash::FxHasher;
    use std::hash::{Hash, Hasher};

    fn fx(value: &AspectParameters) -> u64 {
        let mut h = FxHasher::default();
        value.hash(&mut h);
        h.finish()
    }

    #[test]
    fn build_order_does_not_matter() {
        let a = AspectParameters::builder()
            .add_attribute("foo", "bar")
            .add_attribute("abc", "def")
            .build()
            .unwrap();
        let b = AspectParameters::builder()
            .add_attribute("abc", "def")
            .add_attribute("foo", "bar")
            .build()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(fx(&a), fx(&b));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn empty_is_a_singleton() {
        let a = AspectParameters::empty();
        let b = AspectParameters::builder().build().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_empty());
        assert_eq!(a.to_string(), "");
    }

    #[test]
    fn conflicting_values_are_rejected() {
        let err = AspectParameters::builder()
            .add_attribute("foo", "bar")
            .add_attribute("foo", "baz")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            KeyError::DuplicateAttribute {
                name: "foo".into(),
                existing: "bar".into(),
                conflicting: "baz".into(),
            }
        );
    }

    #[test]
    fn repeated_identical_pair_is_idempotent() {
        let p = AspectParameters::builder()
            .add_attribute("foo", "bar")
            .add_attribute("foo", "bar")
            .build()
            .unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.get("foo"), Some("bar"));
    }

    #[test]
    fn first_conflict_wins() {
        let err = AspectParameters::builder()
            .add_attribute("a", "1")
            .add_attribute("a", "2")
            .add_attribute("b", "1")
            .add_attribute("b", "2")
            .build()
            .unwrap_err();
        assert!(matches!(err, KeyError::DuplicateAttribute { ref name, .. } if name == "a"));
    }

    #[test]
    fn display_is_name_ordered() {
        let p = AspectParameters::builder()
            .add_attribute("z", "1")
            .add_attribute("a", "2")
            .build()
            .unwrap();
        assert_eq!(p.to_string(), r#"[a="2",z="1"]"#);
        let names: Vec<_> = p.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "z"]);
    }
}
