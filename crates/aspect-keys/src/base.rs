// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The configured target an aspect chain is rooted on.

use std::fmt;

use crate::ident::{ConfigId, Label};

/// A target built under one configuration: the terminus of every aspect
/// chain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfiguredTargetKey {
    label: Label,
    configuration: ConfigId,
}

impl ConfiguredTargetKey {
    /// Pairs a target with the configuration it is built in.
    pub fn new(label: Label, configuration: ConfigId) -> Self {
        Self {
            label,
            configuration,
        }
    }

    /// The target label.
    pub fn label(&self) -> &Label {
        &self.label
    }

    /// The configuration identity.
    pub fn configuration(&self) -> ConfigId {
        self.configuration
    }
}

impl fmt::Display for ConfiguredTargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.configuration)
    }
}

impl fmt::Debug for ConfiguredTargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfiguredTargetKey({self})")
    }
}
