//! Cache Key Module
//!
//! Derives deterministic cache keys from a function name and its arguments.
//!
//! Keys have the shape `namespace:function:hash:partition`, where `hash` is the
//! SHA-512 digest of the function name followed by its sorted arguments and
//! `partition` is the as-of date formatted as `YYYYMMDD_HHMM` (or `0`).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha512};
use tracing::warn;

use crate::cache::{FUNC_DEF_SUFFIX, KEY_DELIMITER, NO_PARTITION, PARTITION_FORMAT};
use crate::error::{CacheError, Result};

/// Hex length of the parameter digest.
pub const HASH_HEX_LENGTH: usize = 128;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// == Call Arguments ==
/// Normalized argument mapping of one function call.
///
/// Arguments are kept ordered by name so the call-site order never affects the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallArgs(BTreeMap<String, Value>);

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an argument, replacing any previous value with the same name.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Adds an argument from any serializable value (dates, structs, ...).
    pub fn try_arg(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.0.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for CallArgs {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl FromIterator<(String, Value)> for CallArgs {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// == Partition Token ==
/// Date-derived suffix of a cache key, `YYYYMMDD_HHMM` or `0`.
///
/// The format is fixed-width and zero-padded, so string order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionToken(String);

impl PartitionToken {
    /// Token used when no as-of date is present.
    pub fn none() -> Self {
        Self(NO_PARTITION.to_string())
    }

    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime.format(PARTITION_FORMAT).to_string())
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self::from_datetime(date.and_time(NaiveTime::MIN))
    }

    /// Parses an already formatted token (`YYYYMMDD_HHMM` or `0`).
    pub fn from_token(token: &str) -> Option<Self> {
        if token == NO_PARTITION {
            return Some(Self::none());
        }
        parse_token(token).map(Self::from_datetime)
    }

    /// Parses a date-like string: a formatted token, RFC 3339, ISO date-time or ISO date.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(datetime) = parse_token(input) {
            return Some(Self::from_datetime(datetime));
        }
        if let Ok(datetime) = DateTime::parse_from_rfc3339(input) {
            return Some(Self::from_datetime(datetime.naive_local()));
        }
        for format in DATETIME_FORMATS {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(input, format) {
                return Some(Self::from_datetime(datetime));
            }
        }
        NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .ok()
            .map(Self::from_date)
    }

    /// Parses an argument value; only strings can carry a date.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Returns true when the token carries a date.
    pub fn is_dated(&self) -> bool {
        self.0 != NO_PARTITION
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"^(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})$").expect("valid token regex")
    })
}

fn parse_token(token: &str) -> Option<NaiveDateTime> {
    let caps = token_regex().captures(token)?;
    let field = |i: usize| caps[i].parse::<u32>().ok();
    let year = caps[1].parse::<i32>().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(2)?, field(3)?)?;
    let time = NaiveTime::from_hms_opt(field(4)?, field(5)?, 0)?;
    Some(date.and_time(time))
}

// == Cache Key ==
/// Composite key `namespace:function:hash:partition`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    function: String,
    hash: String,
    partition: PartitionToken,
}

impl CacheKey {
    pub fn new(
        namespace: impl Into<String>,
        function: impl Into<String>,
        hash: impl Into<String>,
        partition: PartitionToken,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            function: function.into(),
            hash: hash.into(),
            partition,
        }
    }

    /// Parses a rendered key; signature sets and function-definition keys are rejected.
    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split(KEY_DELIMITER).collect();
        let invalid = || CacheError::InvalidRequest(format!("Malformed cache key: {}", key));

        let [namespace, function, hash, partition] = parts[..] else {
            return Err(invalid());
        };
        if !is_hex(hash) {
            return Err(invalid());
        }
        validate_namespace(namespace)?;
        validate_function(function)?;
        let partition = PartitionToken::from_token(partition).ok_or_else(invalid)?;

        Ok(Self::new(namespace, function, hash, partition))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn partition(&self) -> &PartitionToken {
        &self.partition
    }

    /// `namespace:function:hash`, the name of the signature set.
    pub fn signature(&self) -> String {
        signature(&self.namespace, &self.function, &self.hash)
    }

    /// Primary key holding the function-definition record of this signature.
    pub fn func_def_key(&self) -> String {
        format!("{}{}{}", self.signature(), KEY_DELIMITER, FUNC_DEF_SUFFIX)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.signature(), KEY_DELIMITER, self.partition)
    }
}

/// Renders a signature from its components.
pub fn signature(namespace: &str, function: &str, hash: &str) -> String {
    format!(
        "{ns}{d}{func}{d}{hash}",
        ns = namespace,
        func = function,
        hash = hash,
        d = KEY_DELIMITER
    )
}

/// Extracts the function name from a function-definition record.
pub fn function_of_record(record: &str) -> &str {
    record.split('{').next().unwrap_or(record)
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// == Key Codec ==
/// Output of key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKey {
    pub key: CacheKey,
    /// Function name followed by its sorted arguments, as hashed
    pub func_def: String,
}

impl DerivedKey {
    pub fn signature(&self) -> String {
        self.key.signature()
    }
}

/// Derives cache keys for one namespace.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    namespace: String,
    date_arg: String,
}

impl KeyCodec {
    pub fn new(namespace: impl Into<String>, date_arg: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            date_arg: date_arg.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Derives the key and function-definition record of a call.
    ///
    /// The as-of date argument is removed before hashing and becomes the partition
    /// token. A date that cannot be parsed falls back to the `0` partition.
    pub fn derive(&self, function: &str, args: &CallArgs) -> Result<DerivedKey> {
        validate_function(function)?;

        let mut remaining = args.0.clone();
        let partition = match remaining.remove(&self.date_arg) {
            None | Some(Value::Null) => PartitionToken::none(),
            Some(value) => PartitionToken::from_value(&value).unwrap_or_else(|| {
                warn!(
                    "Unparseable {} argument {} for {}, using partition {}",
                    self.date_arg, value, function, NO_PARTITION
                );
                PartitionToken::none()
            }),
        };

        let func_def = format!("{}{}", function, serde_json::to_string(&remaining)?);
        let hash = hex::encode(Sha512::digest(func_def.as_bytes()));

        Ok(DerivedKey {
            key: CacheKey::new(self.namespace.clone(), function, hash, partition),
            func_def,
        })
    }
}

fn validate_function(function: &str) -> Result<()> {
    if function.is_empty() {
        return Err(CacheError::InvalidRequest(
            "Function name cannot be empty".to_string(),
        ));
    }
    if function.contains(|c: char| c == KEY_DELIMITER || c == '{' || c == '*' || c == '?')
        || !is_path_safe(function)
    {
        return Err(CacheError::InvalidRequest(format!(
            "Function name '{}' contains a reserved character",
            function
        )));
    }
    Ok(())
}

/// Namespaces name a directory under the file root, so they must stay one path component.
pub(crate) fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(CacheError::InvalidRequest(
            "Namespace cannot be empty".to_string(),
        ));
    }
    if namespace.contains(KEY_DELIMITER) || !is_path_safe(namespace) {
        return Err(CacheError::InvalidRequest(format!(
            "Invalid namespace '{}'",
            namespace
        )));
    }
    Ok(())
}

fn is_path_safe(component: &str) -> bool {
    component != "." && component != ".." && !component.contains(['/', '\\', '\0'])
}
