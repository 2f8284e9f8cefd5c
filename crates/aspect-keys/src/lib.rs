// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical aspect keys for memoized build graphs.
//!
//! An [`AspectKey`] names one unit of work in an incremental build graph:
//! "apply aspect `A` with parameters `P` to target `T` built under
//! configuration `C`", optionally chained onto an ordered list of aspects
//! already applied to the same configured target.
//!
//! The crate provides four things:
//!
//! - construction of keys and [`AspectParameters`] with structural equality
//!   and hashing ([`AspectKeyCreator`]),
//! - a session-scoped [`InternSession`] that collapses structurally-equal
//!   values into one shared `Arc`,
//! - a deterministic binary wire format ([`codec`]) whose decoders route
//!   every decoded value through the session, and
//! - a serde-loadable [`SessionConfig`].
//!
//! # Identity Policy
//!
//! Pointer equality (`Arc::ptr_eq`) is only guaranteed for values that went
//! through [`InternSession`] canonicalization, and for the empty parameter
//! singleton ([`AspectParameters::empty`]). Freshly constructed values are
//! equal by value, never assumed identical.
//!
//! # Determinism Invariant
//!
//! Encoding is a pure function of structure: equal values encode to equal
//! bytes, so [`codec::fingerprint`] is usable as a content address.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod base;
pub mod codec;
mod config;
mod descriptor;
mod error;
pub mod ident;
pub mod intern;
mod key;
mod params;

pub use base::ConfiguredTargetKey;
pub use codec::{
    decode_batch, decode_key, decode_parameters, encode_batch, encode_key, encode_parameters,
    fingerprint, CodecError, ContentHash, WireValue,
};
pub use config::SessionConfig;
pub use descriptor::AspectDescriptor;
pub use error::{ChainIntegrityError, KeyError};
pub use ident::{make_config_id, AspectClass, ConfigId, Label};
pub use intern::{InternSession, InternStats, Interner};
pub use key::{AspectKey, AspectKeyCreator};
pub use params::{AspectParameters, AspectParametersBuilder, AttributeIter};
