// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic wire codec for parameters and keys (length-prefixed, LE
//! scalars).
//!
//! # Layout (v1)
//!
//! ```text
//! value        := tag:u8 body
//! 0x00 EMPTY   := (no body)
//! 0x01 PARAMS  := count:u32 (name:str value:str){count}   names strictly ascending, count > 0
//! 0x10 ROOT    := descriptor base
//! 0x11 DERIVED := descriptor count:u32 key{count} base
//! 0x12 KEY_REF := index:u32
//! 0x20 BATCH   := count:u32 (params | key){count}
//! descriptor   := class:str params
//! base         := label:str config:[u8; 32]
//! str          := len:u32 utf8[len]
//! ```
//!
//! Attributes are always written in name order, so equal values produce
//! equal bytes and [`fingerprint`] is a content address.
//!
//! A key is written in full the first time it appears within one top-level
//! value or batch. Each later occurrence of an equal key is a `KEY_REF`
//! naming it by the order in which full keys were completed (post-order,
//! starting at 0). A chain where every aspect depends on all earlier ones
//! therefore encodes in quadratic rather than exponential size.
//!
//! Decoding is bottom-up: parameters are canonicalized first, then each
//! prerequisite key, then the enclosing key, all through the caller's
//! [`InternSession`]. Decoded derived keys are rebuilt through
//! [`AspectKeyCreator`], so a broken chain on the wire is rejected exactly
//! like a broken chain in memory.

use std::fmt;
use std::str;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::base::ConfiguredTargetKey;
use crate::config::SessionConfig;
use crate::descriptor::AspectDescriptor;
use crate::error::KeyError;
use crate::ident::{AspectClass, ConfigId, Label};
use crate::intern::InternSession;
use crate::key::{AspectKey, AspectKeyCreator};
use crate::params::AspectParameters;

const TAG_EMPTY_PARAMS: u8 = 0x00;
const TAG_PARAMS: u8 = 0x01;
const TAG_ROOT_KEY: u8 = 0x10;
const TAG_DERIVED_KEY: u8 = 0x11;
const TAG_KEY_REF: u8 = 0x12;
const TAG_BATCH: u8 = 0x20;

const CONFIG_ID_LEN: usize = 32;

/// Errors produced by codec readers and writers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Attempted to read beyond the end of the buffer.
    #[error("buffer too short")]
    OutOfBounds,
    /// UTF-8 decoding failed.
    #[error("invalid utf-8")]
    InvalidUtf8,
    /// String length exceeded max bound.
    #[error("string too long")]
    StringTooLong,
    /// Length prefix or element count exceeded max bound.
    #[error("length too large")]
    LengthTooLarge,
    /// The leading tag byte names no known value kind.
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),
    /// A known tag appeared where a different kind of value was required.
    #[error("expected {expected}, found tag 0x{found:02x}")]
    UnexpectedTag {
        /// What the reader was looking for.
        expected: &'static str,
        /// The tag it found.
        found: u8,
    },
    /// Attribute names were not strictly ascending.
    #[error("attribute names not strictly ascending")]
    UnsortedAttributes,
    /// Prerequisite nesting exceeded the configured depth.
    #[error("prerequisite chain nested deeper than {0}")]
    TooDeep(usize),
    /// A key reference named no key decoded before it.
    #[error("key reference {0} names no earlier key")]
    DanglingReference(u32),
    /// Bytes remained after the top-level value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    /// Well-formed bytes describing a value that cannot be constructed.
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// A 32-byte BLAKE3 digest of an encoding.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// View the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Content address of an encoded value.
///
/// No domain prefix: the encoding's leading tag already separates kinds.
pub fn fingerprint(bytes: &[u8]) -> ContentHash {
    ContentHash(*blake3::hash(bytes).as_bytes())
}

/// A top-level value carried by a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    /// A parameter value.
    Parameters(Arc<AspectParameters>),
    /// An aspect key.
    Key(Arc<AspectKey>),
}

impl WireValue {
    /// The key, if this is one.
    pub fn as_key(&self) -> Option<&Arc<AspectKey>> {
        match self {
            Self::Key(key) => Some(key),
            Self::Parameters(_) => None,
        }
    }

    /// The parameters, if this is a parameter value.
    pub fn as_parameters(&self) -> Option<&Arc<AspectParameters>> {
        match self {
            Self::Parameters(parameters) => Some(parameters),
            Self::Key(_) => None,
        }
    }
}

impl From<Arc<AspectKey>> for WireValue {
    fn from(key: Arc<AspectKey>) -> Self {
        Self::Key(key)
    }
}

impl From<Arc<AspectParameters>> for WireValue {
    fn from(parameters: Arc<AspectParameters>) -> Self {
        Self::Parameters(parameters)
    }
}

/// Trait for deterministic encoding to bytes.
pub trait Encode {
    /// Encode into the provided writer.
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError>;
}

/// Encode a value into a fresh Vec.
pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::default();
    value.encode(&mut writer)?;
    Ok(writer.into_vec())
}

/// Deterministic writer for little-endian scalars and length-prefixed bytes.
///
/// Also remembers every key written in full, so repeats become references.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
    written_keys: FxHashMap<AspectKey, u32>,
}

impl Writer {
    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a little-endian u32.
    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a count as a little-endian u32.
    pub fn write_count(&mut self, count: usize) -> Result<(), CodecError> {
        let count: u32 = count.try_into().map_err(|_| CodecError::LengthTooLarge)?;
        self.write_u32_le(count);
        Ok(())
    }

    /// Write length-prefixed bytes (u32 LE length).
    pub fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_count(bytes.len())?;
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_len_prefixed_bytes(value.as_bytes())
    }

    /// Consume the writer and return the buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Deterministic reader for little-endian scalars and length-prefixed bytes.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over the provided byte slice.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(CodecError::OutOfBounds)?;
        let out = self
            .bytes
            .get(self.offset..end)
            .ok_or(CodecError::OutOfBounds)?;
        self.offset = end;
        Ok(out)
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let chunk = self.take(1)?;
        Ok(chunk[0])
    }

    /// Read a little-endian u32.
    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        let chunk = self.take(4)?;
        let raw: [u8; 4] = chunk.try_into().map_err(|_| CodecError::OutOfBounds)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let chunk = self.take(N)?;
        chunk.try_into().map_err(|_| CodecError::OutOfBounds)
    }

    /// Read a u32 count with a max bound.
    pub fn read_count(&mut self, max: usize) -> Result<usize, CodecError> {
        let count =
            usize::try_from(self.read_u32_le()?).map_err(|_| CodecError::LengthTooLarge)?;
        if count > max {
            return Err(CodecError::LengthTooLarge);
        }
        Ok(count)
    }

    /// Read a length-prefixed UTF-8 string with a max bound.
    pub fn read_string(&mut self, max_len: usize) -> Result<&'a str, CodecError> {
        let len =
            usize::try_from(self.read_u32_le()?).map_err(|_| CodecError::LengthTooLarge)?;
        if len > max_len {
            return Err(CodecError::StringTooLong);
        }
        let bytes = self.take(len)?;
        str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Encode for AspectParameters {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        if self.is_empty() {
            writer.write_u8(TAG_EMPTY_PARAMS);
            return Ok(());
        }
        writer.write_u8(TAG_PARAMS);
        writer.write_count(self.len())?;
        for (name, value) in self {
            writer.write_string(name)?;
            writer.write_string(value)?;
        }
        Ok(())
    }
}

impl Encode for AspectDescriptor {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        writer.write_string(self.aspect_class().name())?;
        self.parameters().encode(writer)
    }
}

impl Encode for ConfiguredTargetKey {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        writer.write_string(self.label().as_str())?;
        writer.write_bytes(self.configuration().as_bytes());
        Ok(())
    }
}

impl Encode for AspectKey {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        if let Some(&index) = writer.written_keys.get(self) {
            writer.write_u8(TAG_KEY_REF);
            writer.write_u32_le(index);
            return Ok(());
        }
        if self.is_root() {
            writer.write_u8(TAG_ROOT_KEY);
            self.descriptor().encode(writer)?;
        } else {
            writer.write_u8(TAG_DERIVED_KEY);
            self.descriptor().encode(writer)?;
            writer.write_count(self.prerequisites().len())?;
            for prerequisite in self.prerequisites() {
                prerequisite.encode(writer)?;
            }
        }
        self.base().encode(writer)?;
        let index =
            u32::try_from(writer.written_keys.len()).map_err(|_| CodecError::LengthTooLarge)?;
        writer.written_keys.insert(self.clone(), index);
        Ok(())
    }
}

impl Encode for WireValue {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        match self {
            Self::Parameters(parameters) => parameters.encode(writer),
            Self::Key(key) => key.encode(writer),
        }
    }
}

impl Encode for [WireValue] {
    fn encode(&self, writer: &mut Writer) -> Result<(), CodecError> {
        writer.write_u8(TAG_BATCH);
        writer.write_count(self.len())?;
        for value in self {
            value.encode(writer)?;
        }
        Ok(())
    }
}

/// Reads values and canonicalizes them through one session.
struct Decoder<'a, 's> {
    reader: Reader<'a>,
    session: &'s InternSession,
    limits: &'s SessionConfig,
    /// Canonical keys in the order they were completed; `KEY_REF` targets.
    keys: Vec<Arc<AspectKey>>,
}

impl<'a, 's> Decoder<'a, 's> {
    fn new(bytes: &'a [u8], session: &'s InternSession) -> Self {
        Self {
            reader: Reader::new(bytes),
            session,
            limits: session.config(),
            keys: Vec::new(),
        }
    }

    fn finish<T>(&self, value: T) -> Result<T, CodecError> {
        match self.reader.remaining() {
            0 => Ok(value),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    fn string(&mut self) -> Result<&'a str, CodecError> {
        self.reader.read_string(self.limits.max_string_len)
    }

    fn parameters(&mut self) -> Result<Arc<AspectParameters>, CodecError> {
        let tag = self.reader.read_u8()?;
        self.parameters_after_tag(tag)
    }

    fn parameters_after_tag(&mut self, tag: u8) -> Result<Arc<AspectParameters>, CodecError> {
        match tag {
            TAG_EMPTY_PARAMS => return Ok(AspectParameters::empty()),
            TAG_PARAMS => {}
            other => {
                return Err(CodecError::UnexpectedTag {
                    expected: "parameters",
                    found: other,
                })
            }
        }
        let count = self.reader.read_count(self.limits.max_attributes)?;
        if count == 0 {
            return Err(CodecError::Invalid(
                "empty parameters must use the empty tag".into(),
            ));
        }
        let mut builder = AspectParameters::builder();
        let mut previous: Option<&str> = None;
        for _ in 0..count {
            let name = self.string()?;
            let value = self.string()?;
            if previous.is_some_and(|p| p >= name) {
                return Err(CodecError::UnsortedAttributes);
            }
            previous = Some(name);
            builder = builder.add_attribute(name, value);
        }
        let parameters = builder
            .build()
            .map_err(|e| CodecError::Invalid(e.to_string()))?;
        Ok(self.session.canonicalize_parameters(parameters))
    }

    fn descriptor(&mut self) -> Result<AspectDescriptor, CodecError> {
        let class =
            AspectClass::new(self.string()?).map_err(|e| CodecError::Invalid(e.to_string()))?;
        let parameters = self.parameters()?;
        Ok(AspectDescriptor::of(class, parameters))
    }

    fn base(&mut self) -> Result<ConfiguredTargetKey, CodecError> {
        let label = Label::new(self.string()?).map_err(|e| CodecError::Invalid(e.to_string()))?;
        let config = ConfigId(self.reader.read_array::<CONFIG_ID_LEN>()?);
        Ok(ConfiguredTargetKey::new(label, config))
    }

    fn key(&mut self, depth: usize) -> Result<Arc<AspectKey>, CodecError> {
        let tag = self.reader.read_u8()?;
        self.key_after_tag(tag, depth)
    }

    fn key_after_tag(&mut self, tag: u8, depth: usize) -> Result<Arc<AspectKey>, CodecError> {
        if tag == TAG_KEY_REF {
            let index = self.reader.read_u32_le()?;
            return usize::try_from(index)
                .ok()
                .and_then(|i| self.keys.get(i))
                .cloned()
                .ok_or(CodecError::DanglingReference(index));
        }
        if depth > self.limits.max_chain_depth {
            return Err(CodecError::TooDeep(self.limits.max_chain_depth));
        }
        let key = match tag {
            TAG_ROOT_KEY => {
                let descriptor = self.descriptor()?;
                let base = self.base()?;
                AspectKeyCreator::create_root_key(descriptor, base)
            }
            TAG_DERIVED_KEY => {
                let descriptor = self.descriptor()?;
                let count = self.reader.read_count(self.limits.max_prerequisites)?;
                let mut prerequisites = Vec::with_capacity(count);
                for _ in 0..count {
                    prerequisites.push(self.key(depth + 1)?);
                }
                let base = self.base()?;
                AspectKeyCreator::create_derived_key(descriptor, prerequisites, base)
                    .map_err(|e| CodecError::Invalid(e.to_string()))?
            }
            TAG_EMPTY_PARAMS | TAG_PARAMS | TAG_BATCH => {
                return Err(CodecError::UnexpectedTag {
                    expected: "aspect key",
                    found: tag,
                })
            }
            other => return Err(CodecError::UnknownTag(other)),
        };
        let canonical = self.session.canonicalize_key(key);
        self.keys.push(Arc::clone(&canonical));
        Ok(canonical)
    }

    fn value(&mut self) -> Result<WireValue, CodecError> {
        match self.reader.read_u8()? {
            tag @ (TAG_EMPTY_PARAMS | TAG_PARAMS) => {
                self.parameters_after_tag(tag).map(WireValue::Parameters)
            }
            tag @ (TAG_ROOT_KEY | TAG_DERIVED_KEY | TAG_KEY_REF) => {
                self.key_after_tag(tag, 1).map(WireValue::Key)
            }
            TAG_BATCH => Err(CodecError::UnexpectedTag {
                expected: "parameters or aspect key",
                found: TAG_BATCH,
            }),
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    fn batch(&mut self) -> Result<Vec<WireValue>, CodecError> {
        let tag = self.reader.read_u8()?;
        if tag != TAG_BATCH {
            return Err(CodecError::UnexpectedTag {
                expected: "batch",
                found: tag,
            });
        }
        // Each element is at least one byte; bound the allocation by input.
        let count = self.reader.read_count(self.reader.remaining())?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.value()?);
        }
        Ok(values)
    }
}

fn report(kind: &'static str, session: &InternSession, err: CodecError) -> KeyError {
    warn!(session = session.id(), kind, %err, "rejected malformed encoding");
    KeyError::MalformedEncoding(err)
}

/// Encode a parameter value.
pub fn encode_parameters(parameters: &AspectParameters) -> Result<Vec<u8>, KeyError> {
    Ok(encode_to_vec(parameters)?)
}

/// Encode a key, including its prerequisites, recursively.
pub fn encode_key(key: &AspectKey) -> Result<Vec<u8>, KeyError> {
    Ok(encode_to_vec(key)?)
}

/// Encode several values as one batch.
pub fn encode_batch(values: &[WireValue]) -> Result<Vec<u8>, KeyError> {
    Ok(encode_to_vec(values)?)
}

/// Decode a parameter value and canonicalize it through `session`.
///
/// # Panics
///
/// If `session` has been disposed.
pub fn decode_parameters(
    bytes: &[u8],
    session: &InternSession,
) -> Result<Arc<AspectParameters>, KeyError> {
    let mut decoder = Decoder::new(bytes, session);
    decoder
        .parameters()
        .and_then(|v| decoder.finish(v))
        .map_err(|e| report("parameters", session, e))
}

/// Decode a key and canonicalize it, and everything nested in it, through
/// `session`.
///
/// # Panics
///
/// If `session` has been disposed.
pub fn decode_key(bytes: &[u8], session: &InternSession) -> Result<Arc<AspectKey>, KeyError> {
    let mut decoder = Decoder::new(bytes, session);
    decoder
        .key(1)
        .and_then(|v| decoder.finish(v))
        .map_err(|e| report("key", session, e))
}

/// Decode a batch. Structurally equal elements come back as the same `Arc`.
///
/// # Panics
///
/// If `session` has been disposed.
#[instrument(level = "debug", skip_all, fields(session = session.id(), bytes = bytes.len()))]
pub fn decode_batch(bytes: &[u8], session: &InternSession) -> Result<Vec<WireValue>, KeyError> {
    let mut decoder = Decoder::new(bytes, session);
    decoder
        .batch()
        .and_then(|v| decoder.finish(v))
        .map_err(|e| report("batch", session, e))
}
