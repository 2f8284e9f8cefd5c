// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session-scoped interning of parameters and keys.
//!
//! [`Interner`] maps a structural value to one shared `Arc`. It is sharded:
//! each shard is an `RwLock` over an `FxHashSet<Arc<T>>`, and a value's
//! shard is picked from its hash, so canonicalizations of unrelated values
//! only contend when they land on the same shard.
//!
//! [`InternSession`] bundles the interners for one build session and
//! brackets their lifetime with [`InternSession::create`] and
//! [`InternSession::dispose`].
//!
//! # Lifetime Contract
//!
//! Entries accumulate monotonically while a session is live and are all
//! released on dispose. Callers must not keep relying on the identity of
//! canonical instances past dispose: the `Arc`s stay valid memory, but a new
//! session will hand out different instances for the same values.

use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::KeyError;
use crate::key::AspectKey;
use crate::params::AspectParameters;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// High hash bits hashbrown keeps as its per-slot control tag.
const CONTROL_TAG_BITS: u32 = 7;

/// Counters describing an [`Interner`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternStats {
    /// Canonical instances currently held.
    pub entries: usize,
    /// Calls that returned an existing instance.
    pub hits: u64,
    /// Calls that installed their candidate as canonical.
    pub misses: u64,
}

/// Concurrent canonicalization set for values of type `T`.
///
/// # Race Semantics
///
/// A lookup first takes the shard's read lock. On a miss it takes the write
/// lock and looks again before inserting, so when several threads intern
/// equal values at once exactly one candidate is installed and every caller
/// receives that instance.
///
/// Once sealed, an interner is empty and stays empty: `intern` hands the
/// candidate back without storing it.
pub struct Interner<T> {
    shards: Box<[RwLock<FxHashSet<Arc<T>>>]>,
    shift: u32,
    sealed: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Eq + Hash> Interner<T> {
    /// Create an interner with `shard_count` shards, rounded up to a power
    /// of two.
    pub fn with_shards(shard_count: usize) -> Self {
        let count = shard_count.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| RwLock::new(FxHashSet::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            shift: u64::BITS - count.trailing_zeros(),
            sealed: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, value: &T) -> &RwLock<FxHashSet<Arc<T>>> {
        let hash = FxBuildHasher.hash_one(value);
        // FxHasher mixes upward so the low bits are weakest, and the top
        // bits are the shard set's control tag; take the bits just below it.
        let index = (hash << CONTROL_TAG_BITS)
            .checked_shr(self.shift)
            .unwrap_or(0);
        let index = usize::try_from(index).unwrap_or(0);
        &self.shards[index]
    }

    /// Returns the canonical instance equal to `candidate`, installing
    /// `candidate` if no such instance exists yet.
    pub fn intern(&self, candidate: Arc<T>) -> Arc<T> {
        let shard = self.shard_for(&candidate);
        {
            let set = shard.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = set.get(&*candidate) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(existing);
            }
        }
        let mut set = shard.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = set.get(&*candidate) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(existing);
        }
        // Checked under the write lock: `seal` clears each shard under the
        // same lock after raising the flag.
        if self.sealed.load(Ordering::Acquire) {
            return candidate;
        }
        set.insert(Arc::clone(&candidate));
        self.misses.fetch_add(1, Ordering::Relaxed);
        candidate
    }

    /// Returns the canonical instance equal to `value` without inserting.
    pub fn get(&self, value: &T) -> Option<Arc<T>> {
        let set = self
            .shard_for(value)
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        set.get(value).cloned()
    }

    /// Number of canonical instances held.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Returns `true` if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Snapshot of entry count and hit/miss counters.
    pub fn stats(&self) -> InternStats {
        InternStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Returns `true` once the owning session has been disposed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Drops every canonical instance and refuses further inserts.
    fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        for shard in self.shards.iter() {
            shard.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }
}

/// The interning registry of one build/evaluation session.
///
/// Shared across worker threads as `Arc<InternSession>`. All methods take
/// `&self`.
pub struct InternSession {
    id: u64,
    config: SessionConfig,
    parameters: Interner<AspectParameters>,
    keys: Option<Interner<AspectKey>>,
    disposed: AtomicBool,
}

impl InternSession {
    /// Open a session with a validated configuration.
    pub fn create(config: SessionConfig) -> Result<Arc<Self>, KeyError> {
        config.validate()?;
        Ok(Self::open(config))
    }

    /// Open a session with [`SessionConfig::default`].
    pub fn with_default_config() -> Arc<Self> {
        Self::open(SessionConfig::default())
    }

    fn open(config: SessionConfig) -> Arc<Self> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let keys = config
            .intern_keys
            .then(|| Interner::with_shards(config.shard_count));
        debug!(
            session = id,
            shards = config.shard_count,
            intern_keys = config.intern_keys,
            "intern session created"
        );
        Arc::new(Self {
            id,
            parameters: Interner::with_shards(config.shard_count),
            keys,
            config,
            disposed: AtomicBool::new(false),
        })
    }

    /// Process-unique session number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The configuration this session was opened with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns `true` if keys are canonicalized as well as parameters.
    pub fn interns_keys(&self) -> bool {
        self.keys.is_some()
    }

    /// Returns `true` once [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) {
        assert!(
            !self.is_disposed(),
            "intern session {} used after dispose",
            self.id
        );
    }

    /// Canonical instance for `candidate`.
    ///
    /// The empty value never touches the registry: it is always the global
    /// [`AspectParameters::empty`] singleton.
    ///
    /// # Panics
    ///
    /// If the session has been disposed.
    pub fn canonicalize_parameters(
        &self,
        candidate: Arc<AspectParameters>,
    ) -> Arc<AspectParameters> {
        self.ensure_live();
        let canonical = self.intern_parameters(candidate);
        self.ensure_live();
        canonical
    }

    /// Canonical instance for `candidate`.
    ///
    /// Nested values are canonicalized first: the key's parameters, then
    /// each prerequisite, bottom-up. The key is rebuilt over those canonical
    /// parts unless it already holds them. With key interning disabled the
    /// rebuilt key is returned without being registered.
    ///
    /// # Panics
    ///
    /// If the session has been disposed.
    pub fn canonicalize_key(&self, candidate: Arc<AspectKey>) -> Arc<AspectKey> {
        self.ensure_live();
        let mut visited = FxHashMap::default();
        let rebuilt = self.over_canonical_parts(&candidate, &mut visited);
        let canonical = self.intern_key(rebuilt);
        self.ensure_live();
        canonical
    }

    fn intern_parameters(&self, candidate: Arc<AspectParameters>) -> Arc<AspectParameters> {
        if candidate.is_empty() {
            return AspectParameters::empty();
        }
        let canonical = self.parameters.intern(Arc::clone(&candidate));
        if Arc::ptr_eq(&canonical, &candidate) {
            trace!(session = self.id, parameters = %canonical, "new canonical parameters");
        }
        canonical
    }

    fn intern_key(&self, candidate: Arc<AspectKey>) -> Arc<AspectKey> {
        let Some(keys) = &self.keys else {
            return candidate;
        };
        let canonical = keys.intern(Arc::clone(&candidate));
        if Arc::ptr_eq(&canonical, &candidate) {
            trace!(session = self.id, key = %canonical, "new canonical key");
        }
        canonical
    }

    fn is_canonical_parameters(&self, parameters: &Arc<AspectParameters>) -> bool {
        if parameters.is_empty() {
            return Arc::ptr_eq(parameters, &AspectParameters::empty());
        }
        self.parameters
            .get(parameters)
            .is_some_and(|existing| Arc::ptr_eq(&existing, parameters))
    }

    /// `key` with canonical parameters and canonical prerequisites; `key`
    /// itself when it already has them. The result is not interned.
    fn over_canonical_parts(
        &self,
        key: &Arc<AspectKey>,
        visited: &mut FxHashMap<*const AspectKey, Arc<AspectKey>>,
    ) -> Arc<AspectKey> {
        let parameters = if self.is_canonical_parameters(key.parameters()) {
            Arc::clone(key.parameters())
        } else {
            self.intern_parameters(Arc::clone(key.parameters()))
        };
        let prerequisites: Vec<Arc<AspectKey>> = key
            .prerequisites()
            .iter()
            .map(|p| self.canonical_prerequisite(p, visited))
            .collect();
        let unchanged = Arc::ptr_eq(&parameters, key.parameters())
            && prerequisites
                .iter()
                .zip(key.prerequisites())
                .all(|(ours, theirs)| Arc::ptr_eq(ours, theirs));
        if unchanged {
            return Arc::clone(key);
        }
        Arc::new(key.with_parts(parameters, prerequisites))
    }

    fn canonical_prerequisite(
        &self,
        key: &Arc<AspectKey>,
        visited: &mut FxHashMap<*const AspectKey, Arc<AspectKey>>,
    ) -> Arc<AspectKey> {
        if let Some(done) = visited.get(&Arc::as_ptr(key)) {
            return Arc::clone(done);
        }
        // A registered instance was built over canonical parts.
        let registered = self
            .keys
            .as_ref()
            .and_then(|keys| keys.get(key))
            .is_some_and(|existing| Arc::ptr_eq(&existing, key));
        let canonical = if registered {
            Arc::clone(key)
        } else {
            let rebuilt = self.over_canonical_parts(key, visited);
            self.intern_key(rebuilt)
        };
        visited.insert(Arc::as_ptr(key), Arc::clone(&canonical));
        canonical
    }

    /// Counters for the parameter interner.
    pub fn parameter_stats(&self) -> InternStats {
        self.parameters.stats()
    }

    /// Counters for the key interner, if key interning is enabled.
    pub fn key_stats(&self) -> Option<InternStats> {
        self.keys.as_ref().map(Interner::stats)
    }

    /// Ends the session and releases every canonical instance.
    ///
    /// Idempotent. Any later canonicalization through this session panics,
    /// including one already in flight on another thread: the interners are
    /// sealed before they are cleared, so nothing is stored after dispose.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let parameters = self.parameters.stats();
        let keys = self.key_stats().unwrap_or_default();
        self.parameters.seal();
        if let Some(interner) = &self.keys {
            interner.seal();
        }
        debug!(
            session = self.id,
            parameter_entries = parameters.entries,
            parameter_hits = parameters.hits,
            key_entries = keys.entries,
            key_hits = keys.hits,
            "intern session disposed"
        );
    }
}
