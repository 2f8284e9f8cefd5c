// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Composite aspect keys and their constructors.
//!
//! A key is either a *root* application (one descriptor on one configured
//! target) or a *derived* application that additionally depends on an
//! ordered chain of keys already applied to the same configured target.
//!
//! # Hashing
//!
//! The structural hash is computed once at construction with an
//! order-sensitive fold ([`mix`]) over the variant tag, the base, the
//! descriptor, and each prerequisite's cached hash in chain order. Later
//! aspects observe the outputs of earlier ones, so reordering a chain must
//! produce a different key; a commutative combine (sum, xor) would make
//! permutations collide.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ptr;
use std::sync::Arc;

use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};

use crate::base::ConfiguredTargetKey;
use crate::descriptor::AspectDescriptor;
use crate::error::{ChainIntegrityError, KeyError};
use crate::ident::{AspectClass, ConfigId, Label};
use crate::params::AspectParameters;

/// Multiplier of the fold; the 64-bit `FxHasher` constant.
const MIX_K: u64 = 0xf135_7aea_2e62_a9c5;

const ROOT_TAG: u64 = 0x52;
const DERIVED_TAG: u64 = 0x44;

/// Non-commutative combine step: `mix(mix(a, x), y) != mix(mix(a, y), x)`
/// for almost all `x != y`.
#[inline]
fn mix(acc: u64, word: u64) -> u64 {
    (acc.rotate_left(5) ^ word).wrapping_mul(MIX_K)
}

fn fx_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    FxBuildHasher.hash_one(value)
}

#[derive(Clone)]
enum Chain {
    Root,
    Derived(Arc<[Arc<AspectKey>]>),
}

/// Identity of one aspect application in the build graph.
///
/// Keys are immutable and `Send + Sync`; they are handed around as
/// `Arc<AspectKey>` and compared structurally. Construct them through
/// [`AspectKeyCreator`].
#[derive(Clone)]
pub struct AspectKey {
    descriptor: AspectDescriptor,
    chain: Chain,
    base: ConfiguredTargetKey,
    hash: u64,
    depth: usize,
}

impl AspectKey {
    fn assemble(descriptor: AspectDescriptor, chain: Chain, base: ConfiguredTargetKey) -> Self {
        let mut acc = match chain {
            Chain::Root => ROOT_TAG,
            Chain::Derived(_) => DERIVED_TAG,
        };
        acc = mix(acc, fx_hash(&base));
        acc = mix(acc, fx_hash(&descriptor));
        let mut depth = 1;
        if let Chain::Derived(prerequisites) = &chain {
            acc = mix(acc, prerequisites.len() as u64);
            for prerequisite in prerequisites.iter() {
                acc = mix(acc, prerequisite.hash);
                depth = depth.max(prerequisite.depth + 1);
            }
        }
        Self {
            descriptor,
            chain,
            base,
            hash: acc,
            depth,
        }
    }

    /// Same key rebuilt over `parameters` and `prerequisites`, which must be
    /// structurally equal to the current ones. Chain validation is skipped.
    pub(crate) fn with_parts(
        &self,
        parameters: Arc<AspectParameters>,
        prerequisites: Vec<Arc<AspectKey>>,
    ) -> Self {
        let descriptor = AspectDescriptor::of(self.aspect_class().clone(), parameters);
        let chain = match self.chain {
            Chain::Root => Chain::Root,
            Chain::Derived(_) => Chain::Derived(prerequisites.into()),
        };
        Self::assemble(descriptor, chain, self.base.clone())
    }

    /// The descriptor applied by this key.
    pub fn descriptor(&self) -> &AspectDescriptor {
        &self.descriptor
    }

    /// The aspect class applied by this key.
    pub fn aspect_class(&self) -> &AspectClass {
        self.descriptor.aspect_class()
    }

    /// The parameters the aspect runs with.
    pub fn parameters(&self) -> &Arc<AspectParameters> {
        self.descriptor.parameters()
    }

    /// The configured target the chain is rooted on.
    pub fn base(&self) -> &ConfiguredTargetKey {
        &self.base
    }

    /// The target label.
    pub fn label(&self) -> &Label {
        self.base.label()
    }

    /// The configuration of the base target.
    pub fn configuration(&self) -> ConfigId {
        self.base.configuration()
    }

    /// Ordered prerequisite keys; empty for a root key.
    pub fn prerequisites(&self) -> &[Arc<AspectKey>] {
        match &self.chain {
            Chain::Root => &[],
            Chain::Derived(prerequisites) => prerequisites,
        }
    }

    /// Returns `true` for a root key.
    pub fn is_root(&self) -> bool {
        matches!(self.chain, Chain::Root)
    }

    /// Length of the longest chain ending at this key; a root key has depth 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The precomputed structural hash.
    pub fn structural_hash(&self) -> u64 {
        self.hash
    }

    /// Human-readable form, e.g.
    /// `ExtraAttributeAspect[foo="baz"] on top of [AttributeAspect] on //a:l1`.
    pub fn description(&self) -> String {
        match &self.chain {
            Chain::Root => format!("{} on {}", self.descriptor, self.base.label()),
            Chain::Derived(prerequisites) => {
                let names: Vec<String> = prerequisites
                    .iter()
                    .map(|p| p.descriptor.description())
                    .collect();
                format!(
                    "{} on top of [{}] on {}",
                    self.descriptor,
                    names.join(", "),
                    self.base.label()
                )
            }
        }
    }
}

impl PartialEq for AspectKey {
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        if self.hash != other.hash || self.is_root() != other.is_root() {
            return false;
        }
        if self.base != other.base || self.descriptor != other.descriptor {
            return false;
        }
        let (ours, theirs) = (self.prerequisites(), other.prerequisites());
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(theirs)
                .all(|(a, b)| Arc::ptr_eq(a, b) || **a == **b)
    }
}

impl Eq for AspectKey {}

impl Hash for AspectKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for AspectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.base.configuration())
    }
}

impl fmt::Debug for AspectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectKey")
            .field("descriptor", &self.descriptor)
            .field("prerequisites", &self.prerequisites())
            .field("base", &self.base)
            .finish()
    }
}

/// Constructors for [`AspectKey`].
///
/// The derived constructor owns chain integrity: callers never need to
/// pre-validate a prerequisite list.
#[derive(Debug, Clone, Copy, Default)]
pub struct AspectKeyCreator;

impl AspectKeyCreator {
    /// Key for applying `descriptor` directly to `base`.
    pub fn create_root_key(
        descriptor: AspectDescriptor,
        base: ConfiguredTargetKey,
    ) -> Arc<AspectKey> {
        Arc::new(AspectKey::assemble(descriptor, Chain::Root, base))
    }

    /// Key for applying `descriptor` to `base` on top of `prerequisites`, in
    /// order.
    ///
    /// # Errors
    ///
    /// [`KeyError::ChainIntegrity`] if the chain is empty, if any
    /// prerequisite is rooted on a different configured target, or if the
    /// chain applies one aspect class twice. The same key reached along two
    /// paths of the chain is a single application and is accepted.
    pub fn create_derived_key(
        descriptor: AspectDescriptor,
        prerequisites: Vec<Arc<AspectKey>>,
        base: ConfiguredTargetKey,
    ) -> Result<Arc<AspectKey>, KeyError> {
        validate_chain(&prerequisites, &base)?;
        let chain = Chain::Derived(prerequisites.into());
        Ok(Arc::new(AspectKey::assemble(descriptor, chain, base)))
    }

    /// Root key when `prerequisites` is empty, derived key otherwise.
    pub fn create_key(
        descriptor: AspectDescriptor,
        prerequisites: Vec<Arc<AspectKey>>,
        base: ConfiguredTargetKey,
    ) -> Result<Arc<AspectKey>, KeyError> {
        if prerequisites.is_empty() {
            return Ok(Self::create_root_key(descriptor, base));
        }
        Self::create_derived_key(descriptor, prerequisites, base)
    }
}

fn validate_chain(
    prerequisites: &[Arc<AspectKey>],
    base: &ConfiguredTargetKey,
) -> Result<(), ChainIntegrityError> {
    if prerequisites.is_empty() {
        return Err(ChainIntegrityError::EmptyChain);
    }

    let mut direct: FxHashSet<&AspectClass> = FxHashSet::default();
    for (index, prerequisite) in prerequisites.iter().enumerate() {
        if prerequisite.base != *base {
            return Err(ChainIntegrityError::BaseMismatch {
                index,
                expected: base.clone(),
                found: prerequisite.base.clone(),
            });
        }
        if !direct.insert(prerequisite.aspect_class()) {
            return Err(ChainIntegrityError::DuplicateClass {
                class: prerequisite.aspect_class().clone(),
            });
        }
    }

    // Transitive closure: one application per class. Prerequisites were
    // validated when they were built, so each sub-chain is already sound;
    // only cross-branch collisions remain.
    let mut seen: FxHashMap<&AspectClass, &AspectKey> = FxHashMap::default();
    let mut stack: Vec<&AspectKey> = prerequisites.iter().map(|p| &**p).collect();
    while let Some(key) = stack.pop() {
        match seen.get(key.aspect_class()) {
            Some(existing) if **existing == *key => {}
            Some(_) => {
                return Err(ChainIntegrityError::DuplicateClass {
                    class: key.aspect_class().clone(),
                });
            }
            None => {
                seen.insert(key.aspect_class(), key);
                stack.extend(key.prerequisites().iter().map(|p| &**p));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::make_config_id;

    fn base(label: &str, config: &str) -> ConfiguredTargetKey {
        ConfiguredTargetKey::new(Label::new(label).unwrap(), make_config_id(config))
    }

    fn descriptor(class: &str) -> AspectDescriptor {
        AspectDescriptor::without_parameters(AspectClass::new(class).unwrap())
    }

    fn root(class: &str, on: &ConfiguredTargetKey) -> Arc<AspectKey> {
        AspectKeyCreator::create_root_key(descriptor(class), on.clone())
    }

    #[test]
    fn mix_is_order_sensitive() {
        assert_ne!(mix(mix(0, 1), 2), mix(mix(0, 2), 1));
    }

    #[test]
    fn root_keys_are_structural() {
        let t = base("//a:l1", "target");
        let a = root("A", &t);
        let b = root("A", &t);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
        assert_eq!(a.structural_hash(), b.structural_hash());
        assert!(a.is_root());
        assert_eq!(a.depth(), 1);
    }

    #[test]
    fn prerequisite_order_changes_identity() {
        let t = base("//a:l1", "target");
        let (b, c) = (root("B", &t), root("C", &t));
        let bc = AspectKeyCreator::create_derived_key(
            descriptor("A"),
            vec![b.clone(), c.clone()],
            t.clone(),
        )
        .unwrap();
        let cb = AspectKeyCreator::create_derived_key(descriptor("A"), vec![c, b], t).unwrap();
        assert_ne!(bc, cb);
        assert_ne!(bc.structural_hash(), cb.structural_hash());
    }

    #[test]
    fn root_and_derived_never_collide() {
        let t = base("//a:l1", "target");
        let r = root("A", &t);
        let d = AspectKeyCreator::create_derived_key(descriptor("A"), vec![root("B", &t)], t)
            .unwrap();
        assert_ne!(*r, *d);
        assert!(!d.is_root());
        assert_eq!(d.depth(), 2);
    }

    #[test]
    fn empty_chain_is_rejected() {
        let err = AspectKeyCreator::create_derived_key(
            descriptor("A"),
            Vec::new(),
            base("//a:l1", "target"),
        )
        .unwrap_err();
        assert_eq!(err, KeyError::ChainIntegrity(ChainIntegrityError::EmptyChain));
    }

    #[test]
    fn create_key_dispatches_on_chain_length() {
        let t = base("//a:l1", "target");
        let r = AspectKeyCreator::create_key(descriptor("A"), Vec::new(), t.clone()).unwrap();
        assert!(r.is_root());
        let d = AspectKeyCreator::create_key(descriptor("A"), vec![root("B", &t)], t).unwrap();
        assert!(!d.is_root());
    }

    #[test]
    fn base_mismatch_is_rejected() {
        let target = base("//a:l1", "target");
        let exec = base("//a:l1", "exec");
        let err = AspectKeyCreator::create_derived_key(
            descriptor("A"),
            vec![root("B", &target)],
            exec.clone(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            KeyError::ChainIntegrity(ChainIntegrityError::BaseMismatch {
                index: 0,
                expected: exec,
                found: target,
            })
        );
    }

    #[test]
    fn repeated_class_in_sequence_is_rejected() {
        let t = base("//a:l1", "target");
        let b = root("B", &t);
        let err =
            AspectKeyCreator::create_derived_key(descriptor("A"), vec![b.clone(), b], t)
                .unwrap_err();
        assert!(matches!(
            err,
            KeyError::ChainIntegrity(ChainIntegrityError::DuplicateClass { ref class })
                if class.name() == "B"
        ));
    }

    #[test]
    fn diamond_through_one_key_is_accepted() {
        let t = base("//a:l1", "target");
        let b = root("B", &t);
        let c = AspectKeyCreator::create_derived_key(descriptor("C"), vec![b.clone()], t.clone())
            .unwrap();
        let a = AspectKeyCreator::create_derived_key(descriptor("A"), vec![b, c], t).unwrap();
        assert_eq!(a.depth(), 3);
    }

    #[test]
    fn two_applications_of_one_class_across_branches_are_rejected() {
        let t = base("//a:l1", "target");
        let with_params = AspectDescriptor::of(
            AspectClass::new("B").unwrap(),
            AspectParameters::builder()
                .add_attribute("k", "v")
                .build()
                .unwrap(),
        );
        let b1 = root("B", &t);
        let b2 = AspectKeyCreator::create_root_key(with_params, t.clone());
        let c = AspectKeyCreator::create_derived_key(descriptor("C"), vec![b2], t.clone())
            .unwrap();
        let err =
            AspectKeyCreator::create_derived_key(descriptor("A"), vec![b1, c], t).unwrap_err();
        assert!(matches!(
            err,
            KeyError::ChainIntegrity(ChainIntegrityError::DuplicateClass { .. })
        ));
    }

    #[test]
    fn description_names_the_chain() {
        let t = base("//a:l1", "target");
        let d = AspectKeyCreator::create_derived_key(descriptor("A"), vec![root("B", &t)], t)
            .unwrap();
        assert_eq!(d.description(), "A on top of [B] on //a:l1");
    }

    #[test]
    fn keys_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AspectKey>();
        assert_send_sync::<Arc<AspectParameters>>();
    }
}
