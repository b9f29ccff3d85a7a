use serde::{Deserialize, Serialize};

/// Multipart upload state / 分片上传状态
///
/// A segment only exists once created, so there is no "uninitialized" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Active,
    Completed,
    Aborted,
}

impl SegmentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SegmentState::Active)
    }
}

/// Handle to one in-flight multipart upload / 分片上传句柄
///
/// Identity is `(path, id)`. The backend owns part bookkeeping; this value
/// only tracks the local lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    path: String,
    id: String,
    state: SegmentState,
}

impl Segment {
    /// Rebuild an active handle from `(path, upload id)` / 由路径和上传ID构造
    pub fn new(path: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
            state: SegmentState::Active,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SegmentState::Active
    }

    pub(crate) fn finish(&mut self, state: SegmentState) {
        debug_assert!(self.is_active() && state.is_terminal());
        self.state = state;
    }
}

/// One uploaded chunk of a segment / 已上传分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub index: u32,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Part {
    pub fn new(index: u32, size: i64) -> Self {
        Self { index, size, etag: None }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}
