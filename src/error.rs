//! Canonical error taxonomy and normalizer / 统一错误分类与归一化
//!
//! Every failure that leaves the facade is an [`Error`]: the operation name,
//! the path(s) involved, a small [`ErrorKind`] and the original cause.
//! Backends report wire failures as [`ServiceError`] and declare an
//! [`ErrorTable`] that maps `(status, code)` onto a kind.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::ContextError;
use crate::options::PairError;

/// Canonical error kind / 错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required pair is missing / 缺少必需参数
    PairRequired,
    /// Pair not accepted by the operation under a restrictive policy / 不支持的参数
    PairUnsupported,
    /// Pair value has the wrong type for its key / 参数类型错误
    PairInvalid,
    NotFound,
    PermissionDenied,
    /// Operation not implemented by this backend / 后端不支持该操作
    Unsupported,
    /// Segment already completed or aborted / 分片上传已结束
    SegmentNotActive,
    /// Reader length does not match the declared size / 数据长度不匹配
    SizeMismatch,
    Canceled,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PairRequired => "pair required",
            ErrorKind::PairUnsupported => "pair unsupported",
            ErrorKind::PairInvalid => "pair invalid",
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::SegmentNotActive => "segment not active",
            ErrorKind::SizeMismatch => "size mismatch",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Configuration kinds are raised before any backend call / 配置类错误
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ErrorKind::PairRequired | ErrorKind::PairUnsupported | ErrorKind::PairInvalid
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error returned by every facade operation / 统一错误
#[derive(Debug, thiserror::Error)]
#[error("{op} {paths:?}: {kind}: {cause}")]
pub struct Error {
    op: &'static str,
    paths: Vec<String>,
    kind: ErrorKind,
    #[source]
    cause: anyhow::Error,
}

impl Error {
    pub fn new(op: &'static str, kind: ErrorKind, cause: impl Into<anyhow::Error>, paths: &[&str]) -> Self {
        Self {
            op,
            paths: paths.iter().map(|p| p.to_string()).collect(),
            kind,
            cause: cause.into(),
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn is_not_found(&self) -> bool {
        self.is(ErrorKind::NotFound)
    }

    /// Original cause as reported by the backend / 原始错误
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Find an error of type `T` anywhere in the cause chain / 在错误链中查找
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        self.cause
            .downcast_ref::<T>()
            .or_else(|| self.cause.chain().find_map(|e| e.downcast_ref::<T>()))
    }
}

/// Status/code error reported by a backend / 后端返回的状态码错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("service responded {status} {code:?}: {message}")]
pub struct ServiceError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ServiceError {
    pub fn new(status: u16, code: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: String::new(),
            request_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Reader yielded a different number of bytes than declared / 数据长度与声明不符
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("declared {expected} bytes, reader yielded {actual}")]
pub struct SizeMismatch {
    pub expected: u64,
    /// On over-read this is `expected + 1`.
    pub actual: u64,
}

/// Backend-declared `(status, code) -> kind` mapping / 后端错误映射表
///
/// An empty code registers a wildcard for that status. Exact `(status, code)`
/// rules win over the wildcard.
#[derive(Debug, Clone, Default)]
pub struct ErrorTable {
    rules: HashMap<(u16, String), ErrorKind>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, status: u16, code: &str, kind: ErrorKind) -> Self {
        self.rules.insert((status, code.to_string()), kind);
        self
    }

    pub fn lookup(&self, status: u16, code: &str) -> Option<ErrorKind> {
        self.rules
            .get(&(status, code.to_string()))
            .or_else(|| self.rules.get(&(status, String::new())))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Normalize a backend result / 错误归一化
///
/// `None` in, `None` out. Never fails; the fallback is [`ErrorKind::Unexpected`].
pub fn normalize(
    op: &'static str,
    cause: Option<anyhow::Error>,
    table: &ErrorTable,
    paths: &[&str],
) -> Option<Error> {
    cause.map(|cause| classify(op, cause, table, paths))
}

pub(crate) fn classify(op: &'static str, cause: anyhow::Error, table: &ErrorTable, paths: &[&str]) -> Error {
    let cause = match cause.downcast::<Error>() {
        Ok(mut err) => {
            if err.paths.is_empty() {
                err.op = op;
                err.paths = paths.iter().map(|p| p.to_string()).collect();
            }
            return err;
        }
        Err(cause) => cause,
    };

    let kind = kind_of(&cause, table);
    if kind == ErrorKind::Unexpected {
        tracing::warn!("storager {} {:?} failed unexpectedly: {:#}", op, paths, cause);
    }
    Error::new(op, kind, cause, paths)
}

fn kind_of(cause: &anyhow::Error, table: &ErrorTable) -> ErrorKind {
    for err in cause.chain() {
        if let Some(kind) = marker_kind(err, table) {
            return kind;
        }
        // io::Error hides its payload from source(), look inside explicitly
        if let Some(inner) = err.downcast_ref::<std::io::Error>().and_then(|e| e.get_ref()) {
            if let Some(kind) = marker_kind(inner, table) {
                return kind;
            }
        }
    }
    ErrorKind::Unexpected
}

fn marker_kind(err: &(dyn std::error::Error + 'static), table: &ErrorTable) -> Option<ErrorKind> {
    if let Some(e) = err.downcast_ref::<PairError>() {
        return Some(e.kind());
    }
    if err.downcast_ref::<ContextError>().is_some() {
        return Some(ErrorKind::Canceled);
    }
    if err.downcast_ref::<SizeMismatch>().is_some() {
        return Some(ErrorKind::SizeMismatch);
    }
    if let Some(e) = err.downcast_ref::<ServiceError>() {
        return Some(table.lookup(e.status, &e.code).unwrap_or(ErrorKind::Unexpected));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn declared_table() -> ErrorTable {
        ErrorTable::new()
            .rule(404, "", ErrorKind::NotFound)
            .rule(404, "object_not_exists", ErrorKind::NotFound)
            .rule(403, "permission_denied", ErrorKind::PermissionDenied)
            .rule(404, "bucket_gone_elsewhere", ErrorKind::PermissionDenied)
    }

    #[test]
    fn test_normalize_none() {
        assert!(normalize("stat", None, &declared_table(), &["a"]).is_none());
    }

    #[test]
    fn test_generic_error_is_unexpected() {
        let err = normalize("stat", Some(anyhow!("boom")), &declared_table(), &["a"]).unwrap();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(err.op(), "stat");
        assert_eq!(err.paths(), &["a".to_string()]);
        assert_eq!(err.cause().to_string(), "boom");
    }

    #[test]
    fn test_status_without_code_uses_wildcard() {
        let err = classify("read", ServiceError::new(404, "").into(), &declared_table(), &["x"]);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_declared_code() {
        let table = declared_table();
        let err = classify("read", ServiceError::new(404, "object_not_exists").into(), &table, &["x"]);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.downcast_ref::<ServiceError>().unwrap().code, "object_not_exists");

        let err = classify("write", ServiceError::new(403, "permission_denied").into(), &table, &["x"]);
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_exact_rule_beats_wildcard() {
        let err = classify("stat", ServiceError::new(404, "bucket_gone_elsewhere").into(), &declared_table(), &[]);
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        // unknown code falls back to the bare-status rule
        let err = classify("stat", ServiceError::new(404, "something_else").into(), &declared_table(), &[]);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unmapped_status_is_unexpected() {
        let err = classify("stat", ServiceError::new(401, "").into(), &declared_table(), &["a"]);
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(!err.is_not_found());
        assert_eq!(err.downcast_ref::<ServiceError>().unwrap().status, 401);
    }

    #[test]
    fn test_context_layers_are_searched() {
        let cause = anyhow::Error::new(ServiceError::new(403, "permission_denied")).context("listing page");
        let err = classify("list", cause, &declared_table(), &["dir/"]);
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_size_mismatch_inside_io_error() {
        let io = std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            SizeMismatch { expected: 5, actual: 3 },
        );
        let err = classify("write", io.into(), &ErrorTable::new(), &["a"]);
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_pair_error_keeps_config_kind() {
        let err = classify("reach", PairError::Required("expire").into(), &declared_table(), &["a"]);
        assert_eq!(err.kind(), ErrorKind::PairRequired);
        assert!(err.kind().is_config());
    }

    #[test]
    fn test_canonical_error_passes_through() {
        let inner = Error::new("stat", ErrorKind::NotFound, anyhow!("gone"), &["a"]);
        let err = classify("move", inner.into(), &ErrorTable::new(), &["a", "b"]);
        assert_eq!(err.op(), "stat");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
