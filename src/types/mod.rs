//! Core data types / 核心数据类型

mod credential;
mod endpoint;
mod object;
mod segment;

pub use credential::Credential;
pub use endpoint::Endpoint;
pub use object::{ListMode, Object, ObjectMode, StorageMeta, StorageStatistic};
pub use segment::{Part, Segment, SegmentState};

/// Malformed `protocol:value` string / 格式错误的配置值
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what} {input:?}: {reason}")]
pub struct ParseError {
    pub what: &'static str,
    pub input: String,
    pub reason: &'static str,
}

impl ParseError {
    pub(crate) fn new(what: &'static str, input: &str, reason: &'static str) -> Self {
        Self {
            what,
            input: input.to_string(),
            reason,
        }
    }
}
