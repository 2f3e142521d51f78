//! Key Fingerprint Module
//!
//! Turns a function identity plus its arguments into a fixed-width
//! `CacheKey`. Encoding is canonical and seed-free, so keys are stable
//! across process restarts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Domain separator mixed into every fingerprint
const KEY_DOMAIN: &[u8] = b"ycache-key-v1";

// == Cache Key ==
/// 256-bit digest identifying one logical call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, used for entry file names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the output of `to_hex`. Returns None for anything else.
    pub fn from_hex(raw: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(raw, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Hashes an arbitrary label into a key, for callers that manage their
    /// own identities.
    pub fn for_label(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(b"label");
        hasher.update(label.as_bytes());
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..12])
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CacheKey::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid cache key: {raw}")))
    }
}

// == Argument Values ==
/// Closed set of argument shapes that can take part in a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    None,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<ArgValue>),
    Map(Vec<(ArgValue, ArgValue)>),
}

impl ArgValue {
    /// Runtime type tag mixed in when fingerprints are type-sensitive.
    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::None => "none",
            ArgValue::Bool(_) => "bool",
            ArgValue::Int(_) => "int",
            ArgValue::UInt(_) => "uint",
            ArgValue::Float(_) => "float",
            ArgValue::Str(_) => "str",
            ArgValue::Bytes(_) => "bytes",
            ArgValue::Seq(_) => "seq",
            ArgValue::Map(_) => "map",
        }
    }

    /// Adapts any serde-serializable value through its JSON data model.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)
            .map_err(|e| CacheError::UnsupportedArgument(e.to_string()))?;
        json.to_arg()
    }

    fn is_scalar(&self) -> bool {
        !matches!(self, ArgValue::Seq(_) | ArgValue::Map(_))
    }

    /// Appends the canonical encoding of this value to `out`.
    fn encode(&self, type_sensitive: bool, out: &mut Vec<u8>) -> Result<()> {
        if type_sensitive {
            write_bytes(out, self.type_name().as_bytes());
        }
        match self {
            ArgValue::None => out.push(b'0'),
            ArgValue::Bool(b) => {
                out.push(b'b');
                out.push(u8::from(*b));
            }
            ArgValue::Int(i) => write_number(out, i128::from(*i)),
            ArgValue::UInt(u) => write_number(out, i128::from(*u)),
            ArgValue::Float(f) => match integral_float(*f) {
                Some(whole) => write_number(out, whole),
                None => {
                    out.push(b'f');
                    let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
                    out.extend_from_slice(&bits.to_le_bytes());
                }
            },
            ArgValue::Str(s) => {
                out.push(b's');
                write_bytes(out, s.as_bytes());
            }
            ArgValue::Bytes(b) => {
                out.push(b'y');
                write_bytes(out, b);
            }
            ArgValue::Seq(items) => {
                out.push(b'l');
                write_len(out, items.len());
                for item in items {
                    item.encode(type_sensitive, out)?;
                }
            }
            ArgValue::Map(pairs) => {
                // Sort by encoded key so insertion order never matters
                let mut encoded = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    if !k.is_scalar() {
                        return Err(CacheError::UnsupportedArgument(format!(
                            "unhashable map key of type {}",
                            k.type_name()
                        )));
                    }
                    let mut key_buf = Vec::new();
                    k.encode(type_sensitive, &mut key_buf)?;
                    let mut value_buf = Vec::new();
                    v.encode(type_sensitive, &mut value_buf)?;
                    encoded.push((key_buf, value_buf));
                }
                encoded.sort();
                out.push(b'm');
                write_len(out, encoded.len());
                for (k, v) in encoded {
                    out.extend_from_slice(&k);
                    out.extend_from_slice(&v);
                }
            }
        }
        Ok(())
    }
}

/// Floats with no fractional part share the integer encoding, so `1` and
/// `1.0` collide unless types are mixed in.
fn integral_float(f: f64) -> Option<i128> {
    const LIMIT: f64 = 1.7e38; // inside i128 range
    if f.is_finite() && f.fract() == 0.0 && f.abs() < LIMIT {
        Some(f as i128)
    } else {
        None
    }
}

fn write_number(out: &mut Vec<u8>, n: i128) {
    out.push(b'n');
    out.extend_from_slice(&n.to_le_bytes());
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_len(out, bytes.len());
    out.extend_from_slice(bytes);
}

// == Cache Arg Capability ==
/// A value that can be fingerprinted.
pub trait CacheArg {
    fn to_arg(&self) -> Result<ArgValue>;
}

impl CacheArg for ArgValue {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(self.clone())
    }
}

impl CacheArg for () {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::None)
    }
}

impl CacheArg for bool {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Bool(*self))
    }
}

macro_rules! signed_arg {
    ($($t:ty),*) => {
        $(impl CacheArg for $t {
            fn to_arg(&self) -> Result<ArgValue> {
                Ok(ArgValue::Int(i64::from(*self)))
            }
        })*
    };
}

macro_rules! unsigned_arg {
    ($($t:ty),*) => {
        $(impl CacheArg for $t {
            fn to_arg(&self) -> Result<ArgValue> {
                Ok(ArgValue::UInt(u64::from(*self)))
            }
        })*
    };
}

signed_arg!(i8, i16, i32, i64);
unsigned_arg!(u8, u16, u32, u64);

impl CacheArg for isize {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Int(*self as i64))
    }
}

impl CacheArg for usize {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::UInt(*self as u64))
    }
}

impl CacheArg for f32 {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Float(f64::from(*self)))
    }
}

impl CacheArg for f64 {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Float(*self))
    }
}

impl CacheArg for str {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Str(self.to_string()))
    }
}

impl CacheArg for String {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Str(self.clone()))
    }
}

impl<T: CacheArg + ?Sized> CacheArg for &T {
    fn to_arg(&self) -> Result<ArgValue> {
        (**self).to_arg()
    }
}

impl<T: CacheArg> CacheArg for Option<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        match self {
            Some(v) => v.to_arg(),
            None => Ok(ArgValue::None),
        }
    }
}

impl<T: CacheArg> CacheArg for [T] {
    fn to_arg(&self) -> Result<ArgValue> {
        self.iter()
            .map(CacheArg::to_arg)
            .collect::<Result<Vec<_>>>()
            .map(ArgValue::Seq)
    }
}

impl<T: CacheArg> CacheArg for Vec<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        self.as_slice().to_arg()
    }
}

impl<A: CacheArg, B: CacheArg> CacheArg for (A, B) {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Seq(vec![self.0.to_arg()?, self.1.to_arg()?]))
    }
}

impl<A: CacheArg, B: CacheArg, C: CacheArg> CacheArg for (A, B, C) {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Seq(vec![
            self.0.to_arg()?,
            self.1.to_arg()?,
            self.2.to_arg()?,
        ]))
    }
}

impl<K: CacheArg, V: CacheArg> CacheArg for BTreeMap<K, V> {
    fn to_arg(&self) -> Result<ArgValue> {
        self.iter()
            .map(|(k, v)| Ok((k.to_arg()?, v.to_arg()?)))
            .collect::<Result<Vec<_>>>()
            .map(ArgValue::Map)
    }
}

impl<K: CacheArg, V: CacheArg, S> CacheArg for HashMap<K, V, S> {
    fn to_arg(&self) -> Result<ArgValue> {
        self.iter()
            .map(|(k, v)| Ok((k.to_arg()?, v.to_arg()?)))
            .collect::<Result<Vec<_>>>()
            .map(ArgValue::Map)
    }
}

impl CacheArg for serde_json::Value {
    fn to_arg(&self) -> Result<ArgValue> {
        use serde_json::Value;
        Ok(match self {
            Value::Null => ArgValue::None,
            Value::Bool(b) => ArgValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ArgValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    ArgValue::UInt(u)
                } else {
                    let f = n.as_f64().ok_or_else(|| {
                        CacheError::UnsupportedArgument(format!("unrepresentable number {n}"))
                    })?;
                    ArgValue::Float(f)
                }
            }
            Value::String(s) => ArgValue::Str(s.clone()),
            Value::Array(items) => items.as_slice().to_arg()?,
            Value::Object(map) => ArgValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((ArgValue::Str(k.clone()), v.to_arg()?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

// == Call Arguments ==
/// One logical call: function identity, positional and keyword arguments.
///
/// Conversion failures are deferred and reported by `fingerprint`, so a
/// call can be built fluently.
#[derive(Debug, Clone)]
pub struct CallArgs {
    function: String,
    positional: Vec<ArgValue>,
    keyword: BTreeMap<String, ArgValue>,
    error: Option<String>,
}

impl CallArgs {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            positional: Vec::new(),
            keyword: BTreeMap::new(),
            error: None,
        }
    }

    /// Appends a positional argument.
    pub fn arg<T: CacheArg + ?Sized>(mut self, value: &T) -> Self {
        match value.to_arg() {
            Ok(v) => self.positional.push(v),
            Err(e) => self.record_error(e),
        }
        self
    }

    /// Sets a keyword argument. Keywords are kept sorted by name.
    pub fn kwarg<T: CacheArg + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        match value.to_arg() {
            Ok(v) => {
                self.keyword.insert(name.into(), v);
            }
            Err(e) => self.record_error(e),
        }
        self
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    fn record_error(&mut self, err: CacheError) {
        if self.error.is_none() {
            self.error = Some(err.to_string());
        }
    }
}

// == Fingerprinter ==
/// Builds cache keys for one cache instance.
#[derive(Debug, Clone, Copy)]
pub struct KeyFingerprinter {
    type_sensitive: bool,
}

impl KeyFingerprinter {
    pub fn new(type_sensitive: bool) -> Self {
        Self { type_sensitive }
    }

    pub fn type_sensitive(&self) -> bool {
        self.type_sensitive
    }

    pub fn fingerprint(&self, call: &CallArgs) -> Result<CacheKey> {
        if let Some(reason) = &call.error {
            return Err(CacheError::UnsupportedArgument(reason.clone()));
        }
        let kwargs: Vec<(&str, &ArgValue)> =
            call.keyword.iter().map(|(k, v)| (k.as_str(), v)).collect();
        digest(&call.function, &call.positional, &kwargs, self.type_sensitive)
    }
}

/// Fingerprints a call given as raw parts. Keyword order is irrelevant;
/// duplicate keyword names are rejected.
pub fn fingerprint(
    function_id: &str,
    args: &[ArgValue],
    kwargs: &[(&str, ArgValue)],
    type_sensitive: bool,
) -> Result<CacheKey> {
    let mut sorted: Vec<(&str, &ArgValue)> = kwargs.iter().map(|(k, v)| (*k, v)).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    if let Some(dup) = sorted.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(CacheError::UnsupportedArgument(format!(
            "duplicate keyword argument '{}'",
            dup[0].0
        )));
    }
    digest(function_id, args, &sorted, type_sensitive)
}

fn digest(
    function_id: &str,
    args: &[ArgValue],
    sorted_kwargs: &[(&str, &ArgValue)],
    type_sensitive: bool,
) -> Result<CacheKey> {
    if function_id.is_empty() {
        return Err(CacheError::UnsupportedArgument(
            "function identity must not be empty".to_string(),
        ));
    }

    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(KEY_DOMAIN);
    buf.push(u8::from(type_sensitive));
    write_bytes(&mut buf, function_id.as_bytes());
    write_len(&mut buf, args.len());
    for arg in args {
        arg.encode(type_sensitive, &mut buf)?;
    }
    write_len(&mut buf, sorted_kwargs.len());
    for (name, value) in sorted_kwargs {
        write_bytes(&mut buf, name.as_bytes());
        value.encode(type_sensitive, &mut buf)?;
    }

    Ok(CacheKey(Sha256::digest(&buf).into()))
}
