// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Opaque identity handles handed to the key layer by its collaborators.
//!
//! None of these types parse anything. A [`Label`] is whatever canonical
//! string the target parser produced; a [`ConfigId`] is whatever digest the
//! configuration layer computed; an [`AspectClass`] is the registered name
//! of an aspect implementation. The key layer only compares them.
use std::fmt;
use std::sync::Arc;

use blake3::Hasher;

use crate::error::KeyError;

/// Canonical 256-bit digest used for configuration identities.
pub type Hash = [u8; 32];

/// Number of hex characters shown when a digest is rendered for humans.
const SHORT_HEX_LEN: usize = 12;

/// Canonical, globally unique name of a build target (e.g. `//a:l1`).
///
/// Cloning is a reference-count bump. Two labels are equal when their text
/// is equal, regardless of which allocation backs them.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(Arc<str>);

impl Label {
    /// Wraps an already-canonical label string.
    ///
    /// Rejects only the empty string; everything else is the parser's
    /// responsibility.
    pub fn new(text: impl Into<Arc<str>>) -> Result<Self, KeyError> {
        let text = text.into();
        if text.is_empty() {
            return Err(KeyError::EmptyLabel);
        }
        Ok(Self(text))
    }

    /// Returns the label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({})", self.0)
    }
}

/// Opaque identity of a build configuration ("target", "exec", ...).
///
/// Produced by [`make_config_id`] or wrapped from a digest supplied by the
/// configuration layer. Keys that differ only in `ConfigId` are never equal.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigId(pub Hash);

impl ConfigId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Full lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.to_hex();
        f.write_str(&full[..SHORT_HEX_LEN])
    }
}

impl fmt::Debug for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigId({self})")
    }
}

/// Produces a stable, domain-separated configuration identifier (prefix
/// `b"config:"`) from the configuration's checksum using BLAKE3.
pub fn make_config_id(checksum: &str) -> ConfigId {
    let mut hasher = Hasher::new();
    hasher.update(b"config:");
    hasher.update(checksum.as_bytes());
    ConfigId(hasher.finalize().into())
}

/// Identifier of an aspect implementation (e.g. `AttributeAspect`).
///
/// Classes are compared by name. Two classes never compare equal because
/// their parameters happen to coincide; parameters live on the
/// [`AspectDescriptor`](crate::AspectDescriptor), not here.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AspectClass(Arc<str>);

impl AspectClass {
    /// Wraps a registered aspect class name.
    pub fn new(name: impl Into<Arc<str>>) -> Result<Self, KeyError> {
        let name = name.into();
        if name.is_empty() {
            return Err(KeyError::EmptyAspectClass);
        }
        Ok(Self(name))
    }

    /// Returns the class name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AspectClass({})", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn labels_compare_by_text_not_allocation() {
        let a = Label::new("//a:l1").unwrap();
        let b = Label::new(String::from("//a:l1")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Label::new("//a:l2").unwrap());
    }

    #[test]
    fn empty_handles_are_rejected() {
        assert_eq!(Label::new(""), Err(KeyError::EmptyLabel));
        assert_eq!(AspectClass::new(""), Err(KeyError::EmptyAspectClass));
    }

    #[test]
    fn config_ids_are_stable_and_distinct() {
        assert_eq!(make_config_id("target"), make_config_id("target"));
        assert_ne!(make_config_id("target"), make_config_id("exec"));
    }

    #[test]
    fn config_id_display_is_short_hex() {
        let id = make_config_id("target");
        let shown = id.to_string();
        assert_eq!(shown.len(), SHORT_HEX_LEN);
        assert!(id.to_hex().starts_with(&shown));
    }
}
