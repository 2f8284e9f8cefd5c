// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for aspect-keys.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`equals`] - Equality-group tester for `Eq + Hash` types
//! - [`fixtures`] - Well-known aspect classes, configurations, labels, and
//!   key builders mirroring the shapes the evaluator produces

pub mod equals;
pub mod fixtures;

// Re-export commonly used items at crate root for convenience
pub use equals::EqualsTester;
pub use fixtures::{
    attribute_aspect, configured_target, create_derived_key, create_key, exec_configuration,
    extra_attribute_aspect, full_chain, label, params, target_configuration, ATTRIBUTE_ASPECT_NAME,
    EXTRA_ATTRIBUTE_ASPECT_NAME,
};
