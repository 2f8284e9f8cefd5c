// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Encode/decode round trips through an intern session.
//!
//! Decoding must reproduce structure, and decoding equal values through one
//! session must hand back one shared instance.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use aspect_dry_tests::{
    attribute_aspect, configured_target, create_derived_key, create_key, extra_attribute_aspect,
    full_chain, label, params, target_configuration,
};
use aspect_keys::codec::{Encode, Writer};
use aspect_keys::{
    decode_batch, decode_key, decode_parameters, encode_batch, encode_key, encode_parameters,
    fingerprint, AspectDescriptor, AspectKeyCreator, AspectParameters, CodecError, InternSession,
    KeyError, SessionConfig, WireValue,
};

#[test]
fn round_tripping_empty_parameters_outputs_single_instance() {
    let subject = [
        AspectParameters::builder().build().unwrap(),
        AspectParameters::builder().build().unwrap(),
    ];
    // Empty parameters are a process-wide singleton.
    assert!(Arc::ptr_eq(&subject[0], &subject[1]));

    let session = InternSession::with_default_config();
    let bytes = encode_batch(&[
        WireValue::from(Arc::clone(&subject[0])),
        WireValue::from(Arc::clone(&subject[1])),
    ])
    .unwrap();
    let decoded = decode_batch(&bytes, &session).unwrap();

    // It's preserved by round tripping.
    for value in &decoded {
        assert!(Arc::ptr_eq(value.as_parameters().unwrap(), &subject[0]));
    }
    assert_eq!(session.parameter_stats().entries, 0);
}

#[test]
fn round_tripping_merges_equivalent_parameters() {
    let subject = [params(&[("abc", "def")]), params(&[("abc", "def")])];
    assert!(!Arc::ptr_eq(&subject[0], &subject[1]));

    let session = InternSession::with_default_config();
    let bytes = encode_batch(&[
        WireValue::from(Arc::clone(&subject[0])),
        WireValue::from(Arc::clone(&subject[1])),
    ])
    .unwrap();
    let decoded = decode_batch(&bytes, &session).unwrap();

    let first = decoded[0].as_parameters().unwrap();
    let second = decoded[1].as_parameters().unwrap();
    assert!(Arc::ptr_eq(first, second));
    assert_eq!(**first, *subject[0]);
}

#[test]
fn separate_decodes_share_instances_within_a_session() {
    let session = InternSession::with_default_config();
    let bytes = encode_parameters(&params(&[("foo", "bar")])).unwrap();
    let a = decode_parameters(&bytes, &session).unwrap();
    let b = decode_parameters(&bytes, &session).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn sessions_do_not_share_instances() {
    let bytes = encode_parameters(&params(&[("foo", "bar")])).unwrap();
    let first = InternSession::with_default_config();
    let second = InternSession::with_default_config();
    let a = decode_parameters(&bytes, &first).unwrap();
    let b = decode_parameters(&bytes, &second).unwrap();
    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(&a, &b));
}

#[test]
fn round_tripping_merges_equivalent_keys_and_their_parts() {
    let l = label("//a:l1");
    let c = target_configuration();
    let i1 = params(&[("foo", "bar")]);
    let i1b = params(&[("foo", "bar")]);
    let derived_a = create_derived_key(
        &l,
        c,
        &attribute_aspect(),
        &i1,
        &extra_attribute_aspect(),
        &i1,
    );
    let derived_b = create_derived_key(
        &label("//a:l1"),
        c,
        &attribute_aspect(),
        &i1b,
        &extra_attribute_aspect(),
        &i1b,
    );
    assert!(!Arc::ptr_eq(&derived_a, &derived_b));

    let session = InternSession::with_default_config();
    let bytes = encode_batch(&[
        WireValue::from(Arc::clone(&derived_a)),
        WireValue::from(derived_b),
    ])
    .unwrap();
    let decoded = decode_batch(&bytes, &session).unwrap();
    let (x, y) = (decoded[0].as_key().unwrap(), decoded[1].as_key().unwrap());

    assert_eq!(**x, *derived_a);
    assert!(Arc::ptr_eq(x, y));
    // Nested values were canonicalized first: the prerequisite and the outer
    // key share one parameter instance.
    assert!(Arc::ptr_eq(x.parameters(), x.prerequisites()[0].parameters()));

    // Decoding the prerequisite on its own yields the nested instance.
    let prerequisite_bytes = encode_key(&derived_a.prerequisites()[0]).unwrap();
    let prerequisite = decode_key(&prerequisite_bytes, &session).unwrap();
    assert!(Arc::ptr_eq(&prerequisite, &x.prerequisites()[0]));
}

#[test]
fn mixed_batches_keep_their_order() {
    let l = label("//a:l2");
    let p = params(&[("foo", "baz")]);
    let key = create_key(&l, target_configuration(), &attribute_aspect(), &p);
    let values = vec![
        WireValue::from(Arc::clone(&p)),
        WireValue::from(Arc::clone(&key)),
        WireValue::from(AspectParameters::empty()),
    ];
    let session = InternSession::with_default_config();
    let decoded = decode_batch(&encode_batch(&values).unwrap(), &session).unwrap();
    assert_eq!(decoded, values);
    assert!(Arc::ptr_eq(
        decoded[0].as_parameters().unwrap(),
        decoded[1].as_key().unwrap().parameters()
    ));
}

#[test]
fn key_interning_can_be_disabled() {
    let config = SessionConfig {
        intern_keys: false,
        ..SessionConfig::default()
    };
    let session = InternSession::create(config).unwrap();
    assert!(!session.interns_keys());
    let key = create_key(
        &label("//a:l1"),
        target_configuration(),
        &attribute_aspect(),
        &params(&[("foo", "bar")]),
    );
    let bytes = encode_key(&key).unwrap();
    let a = decode_key(&bytes, &session).unwrap();
    let b = decode_key(&bytes, &session).unwrap();
    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(&a, &b));
    // Parameters are still canonical.
    assert!(Arc::ptr_eq(a.parameters(), b.parameters()));
    assert!(session.key_stats().is_none());
}

#[test]
fn encoding_is_deterministic_across_construction_paths() {
    let c = target_configuration();
    let a = create_key(
        &label("//a:l1"),
        c,
        &attribute_aspect(),
        &params(&[("x", "1"), ("y", "2")]),
    );
    let b = create_key(
        &label("//a:l1"),
        c,
        &attribute_aspect(),
        &params(&[("y", "2"), ("x", "1")]),
    );
    let (ea, eb) = (encode_key(&a).unwrap(), encode_key(&b).unwrap());
    assert_eq!(ea, eb);
    assert_eq!(fingerprint(&ea), fingerprint(&eb));
}

#[test]
fn broken_chain_on_the_wire_is_malformed() {
    // Hand-assemble a derived key whose prerequisite sits on another label.
    let c = target_configuration();
    let p = params(&[("foo", "bar")]);
    let prerequisite = create_key(&label("//a:l2"), c, &attribute_aspect(), &p);

    let mut w = Writer::default();
    w.write_u8(0x11);
    AspectDescriptor::of(extra_attribute_aspect(), Arc::clone(&p))
        .encode(&mut w)
        .unwrap();
    w.write_u32_le(1);
    prerequisite.encode(&mut w).unwrap();
    configured_target(&label("//a:l1"), c)
        .encode(&mut w)
        .unwrap();

    let session = InternSession::with_default_config();
    let err = decode_key(&w.into_vec(), &session).unwrap_err();
    assert!(matches!(
        err,
        KeyError::MalformedEncoding(CodecError::Invalid(ref msg)) if msg.contains("rooted on")
    ));
}

#[test]
fn batch_inside_batch_is_rejected() {
    let session = InternSession::with_default_config();
    let inner = encode_batch(&Vec::new()).unwrap();
    let mut bytes = vec![0x20, 1, 0, 0, 0];
    bytes.extend_from_slice(&inner);
    assert!(matches!(
        decode_batch(&bytes, &session),
        Err(KeyError::MalformedEncoding(CodecError::UnexpectedTag { found: 0x20, .. }))
    ));
}

#[test]
fn string_bounds_come_from_the_session() {
    let config = SessionConfig {
        max_string_len: 4,
        ..SessionConfig::default()
    };
    let session = InternSession::create(config).unwrap();
    let bytes = encode_parameters(&params(&[("attribute", "v")])).unwrap();
    assert_eq!(
        decode_parameters(&bytes, &session),
        Err(KeyError::MalformedEncoding(CodecError::StringTooLong))
    );
}

#[test]
#[should_panic(expected = "used after dispose")]
fn decoding_into_a_disposed_session_panics() {
    let session = InternSession::with_default_config();
    let bytes = encode_parameters(&params(&[("foo", "bar")])).unwrap();
    session.dispose();
    let _ = decode_parameters(&bytes, &session);
}

#[test]
fn derived_key_built_from_decoded_parts_matches() {
    let session = InternSession::with_default_config();
    let l = label("//a:l1");
    let c = target_configuration();
    let p = params(&[("foo", "bar")]);
    let prerequisite = create_key(&l, c, &attribute_aspect(), &p);
    let decoded = decode_key(&encode_key(&prerequisite).unwrap(), &session).unwrap();
    let rebuilt = AspectKeyCreator::create_derived_key(
        AspectDescriptor::of(extra_attribute_aspect(), p),
        vec![decoded],
        configured_target(&l, c),
    )
    .unwrap();
    assert_eq!(rebuilt.depth(), 2);
}

#[test]
fn key_canonicalized_directly_carries_canonical_parameters() {
    let l = label("//a:l1");
    let c = target_configuration();
    let session = InternSession::with_default_config();

    // The key reaches the registry before its parameters do.
    let direct = session.canonicalize_key(create_derived_key(
        &l,
        c,
        &attribute_aspect(),
        &params(&[("foo", "bar")]),
        &extra_attribute_aspect(),
        &params(&[("foo", "bar")]),
    ));
    let canonical_params = session.canonicalize_parameters(params(&[("foo", "bar")]));
    assert!(Arc::ptr_eq(direct.parameters(), &canonical_params));
    assert!(Arc::ptr_eq(
        direct.prerequisites()[0].parameters(),
        &canonical_params
    ));

    let decoded = decode_key(&encode_key(&direct).unwrap(), &session).unwrap();
    assert!(Arc::ptr_eq(&decoded, &direct));
    assert!(Arc::ptr_eq(decoded.parameters(), &canonical_params));
}

#[test]
fn fully_connected_chain_encodes_compactly() {
    let top = full_chain(&label("//a:l1"), target_configuration(), 20);
    assert_eq!(top.depth(), 20);

    let bytes = encode_key(&top).unwrap();
    // 20 full keys plus one reference per remaining edge.
    assert!(bytes.len() < 4096, "{} bytes", bytes.len());

    let session = InternSession::create(SessionConfig {
        intern_keys: false,
        ..SessionConfig::default()
    })
    .unwrap();
    let decoded = decode_key(&bytes, &session).unwrap();
    assert_eq!(decoded.depth(), 20);
    assert_eq!(decoded.structural_hash(), top.structural_hash());
    // References resolve to the instance decoded first, even without key
    // interning.
    let first = &decoded.prerequisites()[0];
    for later in &decoded.prerequisites()[1..] {
        assert!(Arc::ptr_eq(&later.prerequisites()[0], first));
    }
    assert_eq!(encode_key(&decoded).unwrap(), bytes);
}
