// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Aspect descriptor: which aspect, with which parameters.

use std::fmt;
use std::sync::Arc;

use crate::ident::AspectClass;
use crate::params::AspectParameters;

/// Pairs an [`AspectClass`] with the [`AspectParameters`] it runs with.
///
/// Equal only when both the class and the parameters are equal.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AspectDescriptor {
    class: AspectClass,
    parameters: Arc<AspectParameters>,
}

impl AspectDescriptor {
    /// Builds a descriptor.
    pub fn of(class: AspectClass, parameters: Arc<AspectParameters>) -> Self {
        Self { class, parameters }
    }

    /// Builds a descriptor with the shared empty parameters.
    pub fn without_parameters(class: AspectClass) -> Self {
        Self::of(class, AspectParameters::empty())
    }

    /// The aspect class.
    pub fn aspect_class(&self) -> &AspectClass {
        &self.class
    }

    /// The parameters.
    pub fn parameters(&self) -> &Arc<AspectParameters> {
        &self.parameters
    }

    /// Human-readable form, e.g. `AttributeAspect[foo="bar"]`.
    pub fn description(&self) -> String {
        format!("{}{}", self.class, self.parameters)
    }
}

impl fmt::Display for AspectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.parameters)
    }
}

impl fmt::Debug for AspectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AspectDescriptor({self})")
    }
}
