use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object mode / 对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectMode {
    /// Readable object / 普通对象
    #[default]
    Read,
    /// Common prefix returned by a delimiter listing / 目录
    Dir,
    /// Object assembled from a multipart upload / 分片对象
    Part,
}

/// Listing mode / 列举模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMode {
    /// Flat listing of every key under the prefix / 平铺列举
    #[default]
    Prefix,
    /// One level, deeper keys collapsed into `Dir` objects / 按目录列举
    Dir,
}

/// Object with sparse attributes / 对象（稀疏属性）
///
/// Every attribute is independently present or absent; `None` means the
/// backend did not report it, never "zero".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Object {
    /// Backend-absolute key / 后端绝对路径
    pub id: String,
    /// Path relative to the storage work dir / 相对路径
    pub path: String,
    pub mode: ObjectMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_metadata: BTreeMap<String, String>,
    /// Backend-specific attributes / 后端特有属性
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub system_metadata: BTreeMap<String, String>,
}

impl Object {
    pub fn new(id: impl Into<String>, path: impl Into<String>, mode: ObjectMode) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            mode,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode == ObjectMode::Dir
    }
}

/// Storage instance metadata / 存储实例元数据
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageMeta {
    pub name: String,
    pub work_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl StorageMeta {
    pub fn new(name: impl Into<String>, work_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Usage summary of a storage / 存储用量统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageStatistic {
    /// Total bytes stored / 已用空间（字节）
    pub size: i64,
    /// Number of objects / 对象数量
    pub count: i64,
}

impl StorageStatistic {
    pub fn add(&mut self, size: i64) {
        self.size += size;
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_is_not_zero() {
        let unknown = Object::new("a", "a", ObjectMode::Read);
        let empty = Object::new("a", "a", ObjectMode::Read).with_size(0);
        assert_eq!(unknown.size, None);
        assert_eq!(empty.size, Some(0));
        assert_ne!(unknown, empty);

        let json = serde_json::to_value(&unknown).unwrap();
        assert!(json.get("size").is_none());
        let json = serde_json::to_value(&empty).unwrap();
        assert_eq!(json["size"], 0);
    }
}
