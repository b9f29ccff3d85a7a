//! Typed option records, one per operation / 各操作的参数记录
//!
//! Each record declares its schema in `KEYS` and is built from the parser
//! output by a pure `from_parsed`. Keys declared by the backend stay in
//! `extra`.

use super::{DefaultPairs, KeySpec, Operation, PairPolicy, PairValue, ParsedPairs, ValueKind};
use crate::pairs::*;
use crate::types::{Credential, Endpoint, ListMode};

pub trait OperationOptions: Sized {
    const OPERATION: Operation;
    const KEYS: &'static [KeySpec];

    fn from_parsed(parsed: ParsedPairs) -> Self;
}

fn take_policy(parsed: &mut ParsedPairs) -> PairPolicy {
    match parsed.take(PAIR_POLICY) {
        Some(PairValue::PairPolicy(p)) => p,
        _ => PairPolicy::default(),
    }
}

fn take_defaults(parsed: &mut ParsedPairs, key: &str) -> DefaultPairs {
    match parsed.take(key) {
        Some(PairValue::DefaultPairs(d)) => d,
        _ => DefaultPairs::default(),
    }
}

fn take_credential(parsed: &mut ParsedPairs) -> Option<Credential> {
    match parsed.take(CREDENTIAL)? {
        PairValue::Credential(c) => Some(c),
        _ => None,
    }
}

fn take_endpoint(parsed: &mut ParsedPairs) -> Option<Endpoint> {
    match parsed.take(ENDPOINT)? {
        PairValue::Endpoint(e) => Some(e),
        _ => None,
    }
}

fn take_callback(parsed: &mut ParsedPairs) -> Option<super::IoCallback> {
    match parsed.take(IO_CALLBACK)? {
        PairValue::IoCallback(cb) => Some(cb),
        _ => None,
    }
}

/// Records whose only content is backend extras / 仅含后端参数的记录
macro_rules! extra_only {
    ($($(#[$meta:meta])* $name:ident => $op:ident;)*) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub extra: ParsedPairs,
        }

        impl OperationOptions for $name {
            const OPERATION: Operation = Operation::$op;
            const KEYS: &'static [KeySpec] = &[];

            fn from_parsed(parsed: ParsedPairs) -> Self {
                Self { extra: parsed }
            }
        }
    )*};
}

extra_only! {
    MetadataOptions => Metadata;
    StatisticalOptions => Statistical;
    StatOptions => Stat;
    CopyOptions => Copy;
    MoveOptions => Move;
    FetchOptions => Fetch;
    CompleteMultipartOptions => CompleteMultipart;
    ListMultipartOptions => ListMultipart;
    AbortMultipartOptions => AbortMultipart;
}

// ---------- constructors ----------

/// Pairs accepted when opening a storage / 打开存储的参数
#[derive(Debug, Clone)]
pub struct NewStorageOptions {
    pub name: String,
    pub work_dir: Option<String>,
    pub location: Option<String>,
    pub credential: Option<Credential>,
    pub endpoint: Option<Endpoint>,
    pub pair_policy: PairPolicy,
    pub default_pairs: DefaultPairs,
    pub extra: ParsedPairs,
}

impl OperationOptions for NewStorageOptions {
    const OPERATION: Operation = Operation::NewStorage;
    const KEYS: &'static [KeySpec] = &[
        KeySpec::required(NAME, ValueKind::Str),
        KeySpec::optional(WORK_DIR, ValueKind::Str),
        KeySpec::optional(LOCATION, ValueKind::Str),
        KeySpec::optional(CREDENTIAL, ValueKind::Credential),
        KeySpec::optional(ENDPOINT, ValueKind::Endpoint),
        KeySpec::optional(PAIR_POLICY, ValueKind::PairPolicy),
        KeySpec::optional(DEFAULT_STORAGE_PAIRS, ValueKind::DefaultPairs),
    ];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            name: parsed.take_str(NAME).unwrap_or_default(),
            work_dir: parsed.take_str(WORK_DIR),
            location: parsed.take_str(LOCATION),
            credential: take_credential(&mut parsed),
            endpoint: take_endpoint(&mut parsed),
            pair_policy: take_policy(&mut parsed),
            default_pairs: take_defaults(&mut parsed, DEFAULT_STORAGE_PAIRS),
            extra: parsed,
        }
    }
}

/// Pairs accepted when opening a service / 打开服务的参数
#[derive(Debug, Clone)]
pub struct NewServiceOptions {
    pub credential: Option<Credential>,
    pub endpoint: Option<Endpoint>,
    pub pair_policy: PairPolicy,
    pub default_pairs: DefaultPairs,
    /// Template for storages produced by the service / 服务生成存储的默认参数
    pub default_storage_pairs: DefaultPairs,
    pub extra: ParsedPairs,
}

impl OperationOptions for NewServiceOptions {
    const OPERATION: Operation = Operation::NewService;
    const KEYS: &'static [KeySpec] = &[
        KeySpec::required(CREDENTIAL, ValueKind::Credential),
        KeySpec::optional(ENDPOINT, ValueKind::Endpoint),
        KeySpec::optional(PAIR_POLICY, ValueKind::PairPolicy),
        KeySpec::optional(DEFAULT_SERVICE_PAIRS, ValueKind::DefaultPairs),
        KeySpec::optional(DEFAULT_STORAGE_PAIRS, ValueKind::DefaultPairs),
    ];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            credential: take_credential(&mut parsed),
            endpoint: take_endpoint(&mut parsed),
            pair_policy: take_policy(&mut parsed),
            default_pairs: take_defaults(&mut parsed, DEFAULT_SERVICE_PAIRS),
            default_storage_pairs: take_defaults(&mut parsed, DEFAULT_STORAGE_PAIRS),
            extra: parsed,
        }
    }
}

// ---------- service ----------

macro_rules! located {
    ($($name:ident => $op:ident;)*) => {$(
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            pub location: Option<String>,
            pub extra: ParsedPairs,
        }

        impl OperationOptions for $name {
            const OPERATION: Operation = Operation::$op;
            const KEYS: &'static [KeySpec] = &[KeySpec::optional(LOCATION, ValueKind::Str)];

            fn from_parsed(mut parsed: ParsedPairs) -> Self {
                Self {
                    location: parsed.take_str(LOCATION),
                    extra: parsed,
                }
            }
        }
    )*};
}

located! {
    ServiceCreateOptions => ServiceCreate;
    ServiceGetOptions => ServiceGet;
    ServiceDeleteOptions => ServiceDelete;
    ServiceListOptions => ServiceList;
}

// ---------- storage ----------

#[derive(Clone, Default)]
pub struct ReadOptions {
    pub offset: Option<i64>,
    pub size: Option<i64>,
    pub io_callback: Option<super::IoCallback>,
    pub extra: ParsedPairs,
}

impl OperationOptions for ReadOptions {
    const OPERATION: Operation = Operation::Read;
    const KEYS: &'static [KeySpec] = &[
        KeySpec::optional(OFFSET, ValueKind::Int),
        KeySpec::optional(SIZE, ValueKind::Int),
        KeySpec::optional(IO_CALLBACK, ValueKind::IoCallback),
    ];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            offset: parsed.take_int(OFFSET),
            size: parsed.take_int(SIZE),
            io_callback: take_callback(&mut parsed),
            extra: parsed,
        }
    }
}

impl std::fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOptions")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("io_callback", &self.io_callback.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct WriteOptions {
    pub content_md5: Option<String>,
    pub content_type: Option<String>,
    pub storage_class: Option<String>,
    pub io_callback: Option<super::IoCallback>,
    pub extra: ParsedPairs,
}

impl OperationOptions for WriteOptions {
    const OPERATION: Operation = Operation::Write;
    const KEYS: &'static [KeySpec] = &[
        KeySpec::optional(CONTENT_MD5, ValueKind::Str),
        KeySpec::optional(CONTENT_TYPE, ValueKind::Str),
        KeySpec::optional(STORAGE_CLASS, ValueKind::Str),
        KeySpec::optional(IO_CALLBACK, ValueKind::IoCallback),
    ];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            content_md5: parsed.take_str(CONTENT_MD5),
            content_type: parsed.take_str(CONTENT_TYPE),
            storage_class: parsed.take_str(STORAGE_CLASS),
            io_callback: take_callback(&mut parsed),
            extra: parsed,
        }
    }
}

impl std::fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteOptions")
            .field("content_md5", &self.content_md5)
            .field("content_type", &self.content_type)
            .field("storage_class", &self.storage_class)
            .field("io_callback", &self.io_callback.is_some())
            .field("extra", &self.extra)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Abort this in-flight upload instead of deleting an object / 取消分片上传
    pub multipart_id: Option<String>,
    pub extra: ParsedPairs,
}

impl OperationOptions for DeleteOptions {
    const OPERATION: Operation = Operation::Delete;
    const KEYS: &'static [KeySpec] = &[KeySpec::optional(MULTIPART_ID, ValueKind::Str)];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            multipart_id: parsed.take_str(MULTIPART_ID),
            extra: parsed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub list_mode: ListMode,
    pub extra: ParsedPairs,
}

impl OperationOptions for ListOptions {
    const OPERATION: Operation = Operation::List;
    const KEYS: &'static [KeySpec] = &[KeySpec::optional(LIST_MODE, ValueKind::ListMode)];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        let list_mode = match parsed.take(LIST_MODE) {
            Some(PairValue::ListMode(mode)) => mode,
            _ => ListMode::default(),
        };
        Self {
            list_mode,
            extra: parsed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReachOptions {
    /// Seconds the URL stays valid / 链接有效期（秒）
    pub expire: i64,
    pub extra: ParsedPairs,
}

impl OperationOptions for ReachOptions {
    const OPERATION: Operation = Operation::Reach;
    const KEYS: &'static [KeySpec] = &[KeySpec::required(EXPIRE, ValueKind::Int)];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            expire: parsed.take_int(EXPIRE).unwrap_or_default(),
            extra: parsed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateMultipartOptions {
    pub content_type: Option<String>,
    pub storage_class: Option<String>,
    pub extra: ParsedPairs,
}

impl OperationOptions for CreateMultipartOptions {
    const OPERATION: Operation = Operation::CreateMultipart;
    const KEYS: &'static [KeySpec] = &[
        KeySpec::optional(CONTENT_TYPE, ValueKind::Str),
        KeySpec::optional(STORAGE_CLASS, ValueKind::Str),
    ];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            content_type: parsed.take_str(CONTENT_TYPE),
            storage_class: parsed.take_str(STORAGE_CLASS),
            extra: parsed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteMultipartOptions {
    pub content_md5: Option<String>,
    pub extra: ParsedPairs,
}

impl OperationOptions for WriteMultipartOptions {
    const OPERATION: Operation = Operation::WriteMultipart;
    const KEYS: &'static [KeySpec] = &[KeySpec::optional(CONTENT_MD5, ValueKind::Str)];

    fn from_parsed(mut parsed: ParsedPairs) -> Self {
        Self {
            content_md5: parsed.take_str(CONTENT_MD5),
            extra: parsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::parse;
    use crate::pairs;

    fn build<T: OperationOptions>(pairs: Vec<crate::options::Pair>) -> T {
        T::from_parsed(parse(T::KEYS, &[], pairs, false).unwrap())
    }

    #[test]
    fn test_write_record() {
        let opts: WriteOptions = build(vec![
            pairs::with_content_type("text/plain"),
            pairs::with_storage_class("STANDARD_IA"),
        ]);
        assert_eq!(opts.content_type.as_deref(), Some("text/plain"));
        assert_eq!(opts.storage_class.as_deref(), Some("STANDARD_IA"));
        assert!(opts.content_md5.is_none());
        assert!(opts.extra.is_empty());
    }

    #[test]
    fn test_list_mode_defaults_to_prefix() {
        let opts: ListOptions = build(vec![]);
        assert_eq!(opts.list_mode, ListMode::Prefix);
        let opts: ListOptions = build(vec![pairs::with_list_mode(ListMode::Dir)]);
        assert_eq!(opts.list_mode, ListMode::Dir);
    }

    #[test]
    fn test_new_storage_requires_name() {
        let err = parse(NewStorageOptions::KEYS, &[], vec![pairs::with_work_dir("/a")], false).unwrap_err();
        assert!(matches!(err, crate::options::PairError::Required("name")));

        let opts: NewStorageOptions = build(vec![pairs::with_name("bucket"), pairs::with_work_dir("/a")]);
        assert_eq!(opts.name, "bucket");
        assert_eq!(opts.work_dir.as_deref(), Some("/a"));
        assert!(!opts.pair_policy.all);
    }

    #[test]
    fn test_backend_extras_stay_in_extra() {
        const EXTRAS: &[KeySpec] = &[KeySpec::optional("memory_page_size", ValueKind::Int)];
        let parsed = parse(
            ListOptions::KEYS,
            EXTRAS,
            vec![crate::options::Pair::new("memory_page_size", PairValue::Int(10))],
            true,
        )
        .unwrap();
        let opts = ListOptions::from_parsed(parsed);
        assert_eq!(opts.extra.get_int("memory_page_size"), Some(10));
    }
}
