// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Well-known aspects, configurations, and key builders for tests.
//!
//! Inputs here are compile-time constants or test-supplied literals, so the
//! builders panic instead of returning `Result`.
#![allow(clippy::expect_used)]

use std::sync::Arc;

use aspect_keys::{
    make_config_id, AspectClass, AspectDescriptor, AspectKey, AspectKeyCreator, AspectParameters,
    ConfigId, ConfiguredTargetKey, Label,
};

/// Name of the attribute-propagating test aspect.
pub const ATTRIBUTE_ASPECT_NAME: &str = "AttributeAspect";

/// Name of the test aspect that adds an extra attribute.
pub const EXTRA_ATTRIBUTE_ASPECT_NAME: &str = "ExtraAttributeAspect";

/// The attribute-propagating test aspect class.
pub fn attribute_aspect() -> AspectClass {
    AspectClass::new(ATTRIBUTE_ASPECT_NAME).expect("constant class name")
}

/// The extra-attribute test aspect class.
pub fn extra_attribute_aspect() -> AspectClass {
    AspectClass::new(EXTRA_ATTRIBUTE_ASPECT_NAME).expect("constant class name")
}

/// Identity of the default target configuration.
pub fn target_configuration() -> ConfigId {
    make_config_id("k8-fastbuild")
}

/// Identity of the execution configuration.
pub fn exec_configuration() -> ConfigId {
    make_config_id("k8-opt-exec")
}

/// A label from a literal; every call allocates a fresh backing string.
pub fn label(text: &str) -> Label {
    Label::new(String::from(text)).expect("non-empty test label")
}

/// Parameters from literal pairs; each call builds a distinct instance.
pub fn params(pairs: &[(&str, &str)]) -> Arc<AspectParameters> {
    pairs
        .iter()
        .fold(AspectParameters::builder(), |b, (name, value)| {
            b.add_attribute(*name, *value)
        })
        .build()
        .expect("test parameters must not conflict")
}

/// `label` built under `configuration`.
pub fn configured_target(label: &Label, configuration: ConfigId) -> ConfiguredTargetKey {
    ConfiguredTargetKey::new(label.clone(), configuration)
}

/// Root key applying `class` with `parameters` to `label` under `configuration`.
pub fn create_key(
    label: &Label,
    configuration: ConfigId,
    class: &AspectClass,
    parameters: &Arc<AspectParameters>,
) -> Arc<AspectKey> {
    AspectKeyCreator::create_root_key(
        AspectDescriptor::of(class.clone(), Arc::clone(parameters)),
        configured_target(label, configuration),
    )
}

/// Derived key applying `(class2, parameters2)` on top of the root key
/// `(class1, parameters1)`, both on `label` under `configuration`.
pub fn create_derived_key(
    label: &Label,
    configuration: ConfigId,
    class1: &AspectClass,
    parameters1: &Arc<AspectParameters>,
    class2: &AspectClass,
    parameters2: &Arc<AspectParameters>,
) -> Arc<AspectKey> {
    let base_key = create_key(label, configuration, class1, parameters1);
    AspectKeyCreator::create_derived_key(
        AspectDescriptor::of(class2.clone(), Arc::clone(parameters2)),
        vec![base_key],
        configured_target(label, configuration),
    )
    .expect("single-prerequisite chain on the same target is valid")
}

/// Top of a chain of `len` parameterless aspects on `label`, where aspect
/// `i` depends on every aspect `0..i`.
///
/// Each prerequisite is shared by every later aspect, so naive walks of the
/// result are exponential in `len`.
///
/// # Panics
///
/// If `len` is zero.
pub fn full_chain(label: &Label, configuration: ConfigId, len: usize) -> Arc<AspectKey> {
    let base = configured_target(label, configuration);
    let mut chain: Vec<Arc<AspectKey>> = Vec::with_capacity(len);
    for i in 0..len {
        let class = AspectClass::new(format!("ChainAspect{i}")).expect("non-empty class name");
        let key = AspectKeyCreator::create_key(
            AspectDescriptor::without_parameters(class),
            chain.clone(),
            base.clone(),
        )
        .expect("fully connected chain over distinct classes is valid");
        chain.push(key);
    }
    chain.pop().expect("chain length must be positive")
}
