// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session configuration.

use serde::{Deserialize, Serialize};

use crate::error::KeyError;

/// Tunables for an [`InternSession`](crate::InternSession) and the codec
/// bounds it enforces while decoding.
///
/// Missing fields take their defaults, so an evaluator can persist only
/// the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Interner shards; must be a power of two.
    pub shard_count: usize,
    /// Canonicalize keys as well as parameters.
    pub intern_keys: bool,
    /// Longest label, class name, attribute name or value accepted by decode.
    pub max_string_len: usize,
    /// Most attributes accepted in one decoded parameter value.
    pub max_attributes: usize,
    /// Most prerequisites accepted on one decoded derived key.
    pub max_prerequisites: usize,
    /// Deepest prerequisite nesting accepted by decode.
    pub max_chain_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shard_count: 64,
            intern_keys: true,
            max_string_len: 4096,
            max_attributes: 1024,
            max_prerequisites: 256,
            max_chain_depth: 64,
        }
    }
}

impl SessionConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|e| KeyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), KeyError> {
        if !self.shard_count.is_power_of_two() {
            return Err(KeyError::Config(format!(
                "shard_count must be a power of two, got {}",
                self.shard_count
            )));
        }
        let limits = [
            ("max_string_len", self.max_string_len),
            ("max_attributes", self.max_attributes),
            ("max_prerequisites", self.max_prerequisites),
            ("max_chain_depth", self.max_chain_depth),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(KeyError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}
