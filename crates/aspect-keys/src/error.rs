// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for key construction and decoding.
//!
//! Every variant is a local, synchronous failure: a programming error in the
//! caller or corrupt bytes. None of them are transient, so nothing here is
//! retried.

use thiserror::Error;

use crate::base::ConfiguredTargetKey;
use crate::codec::CodecError;
use crate::ident::AspectClass;

/// Errors produced while building parameters, keys, or decoding wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// One attribute name was given two different values.
    #[error("[ASPECT_DUPLICATE_ATTRIBUTE] attribute {name:?} set to {existing:?} and {conflicting:?}")]
    DuplicateAttribute {
        /// Attribute name.
        name: String,
        /// Value recorded first.
        existing: String,
        /// Value that conflicted with it.
        conflicting: String,
    },
    /// The prerequisite chain of a derived key is malformed.
    #[error("[ASPECT_CHAIN_INTEGRITY] {0}")]
    ChainIntegrity(#[from] ChainIntegrityError),
    /// Bytes could not be decoded into a value.
    #[error("[ASPECT_MALFORMED_ENCODING] {0}")]
    MalformedEncoding(#[from] CodecError),
    /// A target label was empty.
    #[error("[ASPECT_EMPTY_LABEL] target label must not be empty")]
    EmptyLabel,
    /// An aspect class name was empty.
    #[error("[ASPECT_EMPTY_CLASS] aspect class name must not be empty")]
    EmptyAspectClass,
    /// A session configuration value is out of range or unparsable.
    #[error("[ASPECT_CONFIG] {0}")]
    Config(String),
}

/// Reasons a prerequisite chain is rejected by the derived-key constructor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainIntegrityError {
    /// A derived key needs at least one prerequisite; use a root key instead.
    #[error("derived key requires at least one prerequisite")]
    EmptyChain,
    /// A prerequisite is rooted on a different configured target.
    #[error("prerequisite #{index} is rooted on {found}, expected {expected}")]
    BaseMismatch {
        /// Position of the offending prerequisite.
        index: usize,
        /// Base the derived key is being built on.
        expected: ConfiguredTargetKey,
        /// Base the prerequisite carries.
        found: ConfiguredTargetKey,
    },
    /// Two distinct applications of one aspect class appear in the chain.
    #[error("aspect class {class} applied more than once in one chain")]
    DuplicateClass {
        /// The repeated class.
        class: AspectClass,
    },
}
