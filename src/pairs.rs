//! Core pair keys and constructors / 核心参数键与构造函数
//!
//! Backend-specific keys are prefixed with the backend type
//! (`s3_force_path_style`, `memory_page_size`) and declared by the backend.

use std::sync::Arc;

use crate::options::{DefaultPairs, Pair, PairPolicy, PairValue};
use crate::types::{Credential, Endpoint, ListMode};

pub const NAME: &str = "name";
pub const WORK_DIR: &str = "work_dir";
pub const LOCATION: &str = "location";
pub const CREDENTIAL: &str = "credential";
pub const ENDPOINT: &str = "endpoint";
pub const PAIR_POLICY: &str = "pair_policy";
pub const DEFAULT_STORAGE_PAIRS: &str = "default_storage_pairs";
pub const DEFAULT_SERVICE_PAIRS: &str = "default_service_pairs";
pub const CONTENT_MD5: &str = "content_md5";
pub const CONTENT_TYPE: &str = "content_type";
pub const STORAGE_CLASS: &str = "storage_class";
pub const IO_CALLBACK: &str = "io_callback";
pub const OFFSET: &str = "offset";
pub const SIZE: &str = "size";
pub const LIST_MODE: &str = "list_mode";
pub const EXPIRE: &str = "expire";
pub const MULTIPART_ID: &str = "multipart_id";

pub fn with_name(name: impl Into<String>) -> Pair {
    Pair::new(NAME, PairValue::Str(name.into()))
}

pub fn with_work_dir(work_dir: impl Into<String>) -> Pair {
    Pair::new(WORK_DIR, PairValue::Str(work_dir.into()))
}

pub fn with_location(location: impl Into<String>) -> Pair {
    Pair::new(LOCATION, PairValue::Str(location.into()))
}

pub fn with_credential(credential: Credential) -> Pair {
    Pair::new(CREDENTIAL, PairValue::Credential(credential))
}

pub fn with_endpoint(endpoint: Endpoint) -> Pair {
    Pair::new(ENDPOINT, PairValue::Endpoint(endpoint))
}

pub fn with_pair_policy(policy: PairPolicy) -> Pair {
    Pair::new(PAIR_POLICY, PairValue::PairPolicy(policy))
}

pub fn with_default_storage_pairs(defaults: DefaultPairs) -> Pair {
    Pair::new(DEFAULT_STORAGE_PAIRS, PairValue::DefaultPairs(defaults))
}

pub fn with_default_service_pairs(defaults: DefaultPairs) -> Pair {
    Pair::new(DEFAULT_SERVICE_PAIRS, PairValue::DefaultPairs(defaults))
}

pub fn with_content_md5(md5: impl Into<String>) -> Pair {
    Pair::new(CONTENT_MD5, PairValue::Str(md5.into()))
}

pub fn with_content_type(content_type: impl Into<String>) -> Pair {
    Pair::new(CONTENT_TYPE, PairValue::Str(content_type.into()))
}

pub fn with_storage_class(class: impl Into<String>) -> Pair {
    Pair::new(STORAGE_CLASS, PairValue::Str(class.into()))
}

pub fn with_io_callback<F>(callback: F) -> Pair
where
    F: Fn(&[u8]) + Send + Sync + 'static,
{
    Pair::new(IO_CALLBACK, PairValue::IoCallback(Arc::new(callback)))
}

pub fn with_offset(offset: i64) -> Pair {
    Pair::new(OFFSET, PairValue::Int(offset))
}

pub fn with_size(size: i64) -> Pair {
    Pair::new(SIZE, PairValue::Int(size))
}

pub fn with_list_mode(mode: ListMode) -> Pair {
    Pair::new(LIST_MODE, PairValue::ListMode(mode))
}

/// Presigned URL lifetime in seconds / 链接有效期（秒）
pub fn with_expire(seconds: i64) -> Pair {
    Pair::new(EXPIRE, PairValue::Int(seconds))
}

pub fn with_multipart_id(id: impl Into<String>) -> Pair {
    Pair::new(MULTIPART_ID, PairValue::Str(id.into()))
}
