//! Pair parsing / 参数解析
//!
//! A [`Pair`] is a key plus a tagged value. Each operation declares its keys
//! as data (a `&'static [KeySpec]`), and [`parse`] turns an unordered pair
//! list into a deduplicated [`ParsedPairs`] that the typed option records in
//! [`records`] are built from.

mod policy;
mod records;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::{Credential, Endpoint, ListMode};

pub use policy::{DefaultPairs, PairPolicy};
pub use records::*;

/// Callback invoked with every chunk of data read or written / IO回调
pub type IoCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Every operation the facades expose / 操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    NewService,
    ServiceCreate,
    ServiceDelete,
    ServiceGet,
    ServiceList,
    NewStorage,
    Metadata,
    Statistical,
    Stat,
    Read,
    Write,
    Delete,
    Copy,
    Move,
    List,
    Fetch,
    Reach,
    CreateMultipart,
    WriteMultipart,
    CompleteMultipart,
    ListMultipart,
    AbortMultipart,
}

impl Operation {
    /// Name recorded in errors / 错误中记录的操作名
    pub fn name(&self) -> &'static str {
        match self {
            Operation::NewService | Operation::NewStorage => "new",
            Operation::ServiceCreate => "create",
            Operation::ServiceDelete => "delete",
            Operation::ServiceGet => "get",
            Operation::ServiceList => "list",
            Operation::Metadata => "metadata",
            Operation::Statistical => "statistical",
            Operation::Stat => "stat",
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::Copy => "copy",
            Operation::Move => "move",
            Operation::List => "list",
            Operation::Fetch => "fetch",
            Operation::Reach => "reach",
            Operation::CreateMultipart => "create_multipart",
            Operation::WriteMultipart => "write_multipart",
            Operation::CompleteMultipart => "complete_multipart",
            Operation::ListMultipart => "list_multipart",
            Operation::AbortMultipart => "abort_multipart",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pair value / 参数值
#[derive(Clone)]
pub enum PairValue {
    Bool(bool),
    Int(i64),
    Str(String),
    ListMode(ListMode),
    PairPolicy(PairPolicy),
    DefaultPairs(DefaultPairs),
    Credential(Credential),
    Endpoint(Endpoint),
    IoCallback(IoCallback),
}

impl PairValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PairValue::Bool(_) => ValueKind::Bool,
            PairValue::Int(_) => ValueKind::Int,
            PairValue::Str(_) => ValueKind::Str,
            PairValue::ListMode(_) => ValueKind::ListMode,
            PairValue::PairPolicy(_) => ValueKind::PairPolicy,
            PairValue::DefaultPairs(_) => ValueKind::DefaultPairs,
            PairValue::Credential(_) => ValueKind::Credential,
            PairValue::Endpoint(_) => ValueKind::Endpoint,
            PairValue::IoCallback(_) => ValueKind::IoCallback,
        }
    }
}

impl fmt::Debug for PairValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairValue::Bool(v) => write!(f, "{}", v),
            PairValue::Int(v) => write!(f, "{}", v),
            PairValue::Str(v) => write!(f, "{:?}", v),
            PairValue::ListMode(v) => write!(f, "{:?}", v),
            PairValue::PairPolicy(v) => write!(f, "{:?}", v),
            PairValue::DefaultPairs(v) => write!(f, "{:?}", v),
            PairValue::Credential(v) => write!(f, "{:?}", v),
            PairValue::Endpoint(v) => write!(f, "{}", v),
            PairValue::IoCallback(_) => f.write_str("<io_callback>"),
        }
    }
}

/// Value type expected by a key / 参数值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Str,
    ListMode,
    PairPolicy,
    DefaultPairs,
    Credential,
    Endpoint,
    IoCallback,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Str => "string",
            ValueKind::ListMode => "list mode",
            ValueKind::PairPolicy => "pair policy",
            ValueKind::DefaultPairs => "default pairs",
            ValueKind::Credential => "credential",
            ValueKind::Endpoint => "endpoint",
            ValueKind::IoCallback => "io callback",
        };
        f.write_str(name)
    }
}

/// Key/value configuration entry / 键值参数
#[derive(Debug, Clone)]
pub struct Pair {
    key: Cow<'static, str>,
    value: PairValue,
}

impl Pair {
    pub fn new(key: impl Into<Cow<'static, str>>, value: PairValue) -> Self {
        Self { key: key.into(), value }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &PairValue {
        &self.value
    }
}

/// One schema entry / 参数声明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub key: &'static str,
    pub kind: ValueKind,
    pub required: bool,
}

impl KeySpec {
    pub const fn required(key: &'static str, kind: ValueKind) -> Self {
        Self { key, kind, required: true }
    }

    pub const fn optional(key: &'static str, kind: ValueKind) -> Self {
        Self { key, kind, required: false }
    }
}

/// Configuration error, raised before any backend call / 参数错误
#[derive(Debug, Clone, thiserror::Error)]
pub enum PairError {
    #[error("pair required: {0}")]
    Required(&'static str),
    #[error("pair unsupported: {}", .0.key())]
    Unsupported(Pair),
    #[error("pair {key} expects {expected}, got {found}")]
    Invalid {
        key: &'static str,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("pair {key} is malformed: {reason}")]
    Malformed { key: &'static str, reason: String },
}

impl PairError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PairError::Required(_) => ErrorKind::PairRequired,
            PairError::Unsupported(_) => ErrorKind::PairUnsupported,
            PairError::Invalid { .. } | PairError::Malformed { .. } => ErrorKind::PairInvalid,
        }
    }
}

/// Deduplicated, type-checked pairs / 解析后的参数
#[derive(Debug, Clone, Default)]
pub struct ParsedPairs {
    values: BTreeMap<&'static str, PairValue>,
}

impl ParsedPairs {
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&PairValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(PairValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(PairValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(PairValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn take(&mut self, key: &str) -> Option<PairValue> {
        self.values.remove(key)
    }

    pub fn take_str(&mut self, key: &str) -> Option<String> {
        match self.take(key)? {
            PairValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn take_int(&mut self, key: &str) -> Option<i64> {
        match self.take(key)? {
            PairValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn take_bool(&mut self, key: &str) -> Option<bool> {
        match self.take(key)? {
            PairValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

/// Parse pairs against a schema / 按声明解析参数
///
/// `extras` are backend-declared keys; an extra with the same key as a
/// schema entry replaces it. The first occurrence of a key wins. Unknown keys
/// fail only when `restrictive` is set.
pub fn parse<I>(schema: &[KeySpec], extras: &[KeySpec], pairs: I, restrictive: bool) -> Result<ParsedPairs, PairError>
where
    I: IntoIterator<Item = Pair>,
{
    let lookup = |key: &str| -> Option<&KeySpec> {
        extras
            .iter()
            .find(|spec| spec.key == key)
            .or_else(|| schema.iter().find(|spec| spec.key == key))
    };

    let mut parsed = ParsedPairs::default();
    for pair in pairs {
        let Some(spec) = lookup(pair.key()) else {
            if restrictive {
                return Err(PairError::Unsupported(pair));
            }
            continue;
        };
        if parsed.values.contains_key(spec.key) {
            continue;
        }
        let found = pair.value.kind();
        if found != spec.kind {
            return Err(PairError::Invalid {
                key: spec.key,
                expected: spec.kind,
                found,
            });
        }
        parsed.values.insert(spec.key, pair.value);
    }

    for spec in schema.iter().chain(extras) {
        if lookup(spec.key).is_some_and(|s| s.required) && !parsed.values.contains_key(spec.key) {
            return Err(PairError::Required(spec.key));
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairs;

    const SCHEMA: &[KeySpec] = &[
        KeySpec::required("expire", ValueKind::Int),
        KeySpec::optional("content_type", ValueKind::Str),
    ];

    fn fingerprint(p: &ParsedPairs) -> Vec<(String, String)> {
        p.values.iter().map(|(k, v)| (k.to_string(), format!("{:?}", v))).collect()
    }

    #[test]
    fn test_parse_is_deterministic() {
        let input = vec![pairs::with_expire(60), pairs::with_content_type("text/plain")];
        let a = parse(SCHEMA, &[], input.clone(), false).unwrap();
        let b = parse(SCHEMA, &[], input, false).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_missing_required() {
        let err = parse(SCHEMA, &[], vec![pairs::with_content_type("text/plain")], false).unwrap_err();
        assert!(matches!(err, PairError::Required("expire")));
        assert_eq!(err.kind(), ErrorKind::PairRequired);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let input = vec![
            pairs::with_expire(1),
            pairs::with_content_type("a/first"),
            pairs::with_expire(2),
            pairs::with_content_type("b/second"),
        ];
        let parsed = parse(SCHEMA, &[], input, true).unwrap();
        assert_eq!(parsed.get_int("expire"), Some(1));
        assert_eq!(parsed.get_str("content_type"), Some("a/first"));
    }

    #[test]
    fn test_unknown_pair_policy() {
        let input = vec![pairs::with_expire(1), pairs::with_offset(3)];
        let parsed = parse(SCHEMA, &[], input.clone(), false).unwrap();
        assert!(!parsed.contains("offset"));

        let err = parse(SCHEMA, &[], input, true).unwrap_err();
        match err {
            PairError::Unsupported(pair) => assert_eq!(pair.key(), "offset"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_type_checked_at_parse_time() {
        let input = vec![Pair::new("expire", PairValue::Str("soon".to_string()))];
        let err = parse(SCHEMA, &[], input, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairInvalid);
    }

    #[test]
    fn test_extras_extend_and_override() {
        const EXTRAS: &[KeySpec] = &[
            KeySpec::optional("s3_storage_class", ValueKind::Str),
            KeySpec::optional("expire", ValueKind::Int),
        ];
        let input = vec![Pair::new("s3_storage_class", PairValue::Str("GLACIER".to_string()))];
        // backend relaxed "expire" to optional
        let parsed = parse(SCHEMA, EXTRAS, input, true).unwrap();
        assert_eq!(parsed.get_str("s3_storage_class"), Some("GLACIER"));
    }
}
