//! Backend contract and facades / 后端接口与门面
//!
//! A backend implements [`Storager`] (and optionally [`Servicer`]) with
//! primitive operations only. Optional features are separate traits,
//! exposed through capability accessors so the facade can detect them
//! without calling the backend.

use async_trait::async_trait;
use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::context::Context;
use crate::error::ErrorTable;
use crate::iterator::BoxPager;
use crate::options::*;
use crate::types::{Object, Part, Segment, StorageMeta, StorageStatistic};

pub mod facade;
pub mod io;
pub mod manager;
pub mod service;

pub use facade::Storage;
pub use manager::{BackendFactory, Registry, DEFAULT_REGISTRY};
pub use service::Service;

pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Backend capability declaration / 后端能力声明
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Server-side copy / 服务端复制
    pub can_copy: bool,
    /// Native move or rename / 移动
    pub can_move: bool,
    /// Pull a remote URL into the storage / 远程抓取
    pub can_fetch: bool,
    /// Presigned public URL / 预签名链接
    pub can_reach: bool,
    /// Multipart upload / 分片上传
    pub can_multipart: bool,
    /// Total size and object count / 用量统计
    pub can_statistical: bool,
}

/// Storage backend interface / 存储后端接口
///
/// Paths handed to the backend are relative to the storage work dir; the
/// backend resolves them against its own root.
#[async_trait]
pub trait Storager: Send + Sync {
    /// Backend type name / 后端类型
    fn backend_type(&self) -> &'static str;

    /// Backend-declared keys for `op`, on top of the core schema / 后端扩展参数
    fn pairs(&self, _op: Operation) -> &'static [KeySpec] {
        &[]
    }

    /// `(status, code) -> kind` rules for this backend / 错误映射表
    fn error_table(&self) -> ErrorTable {
        ErrorTable::new()
    }

    fn metadata(&self, opts: &MetadataOptions) -> StorageMeta;

    async fn stat(&self, path: &str, opts: &StatOptions) -> Result<Object>;

    /// Open a reader, honouring `offset`/`size` / 打开读取器
    async fn read(&self, path: &str, opts: &ReadOptions) -> Result<BoxReader>;

    /// Store `data` as the full content of `path`, returns bytes written / 写入
    async fn write(&self, path: &str, data: Bytes, opts: &WriteOptions) -> Result<u64>;

    /// Remove `path`; removing a missing object succeeds / 删除
    async fn delete(&self, path: &str, opts: &DeleteOptions) -> Result<()>;

    async fn list(&self, path: &str, opts: &ListOptions) -> Result<BoxPager<Object>>;

    fn copier(&self) -> Option<&dyn Copier> {
        None
    }

    fn mover(&self) -> Option<&dyn Mover> {
        None
    }

    fn fetcher(&self) -> Option<&dyn Fetcher> {
        None
    }

    fn reacher(&self) -> Option<&dyn Reacher> {
        None
    }

    fn multiparter(&self) -> Option<&dyn Multiparter> {
        None
    }

    fn statister(&self) -> Option<&dyn Statister> {
        None
    }

    fn capability(&self) -> Capability {
        Capability {
            can_copy: self.copier().is_some(),
            can_move: self.mover().is_some(),
            can_fetch: self.fetcher().is_some(),
            can_reach: self.reacher().is_some(),
            can_multipart: self.multiparter().is_some(),
            can_statistical: self.statister().is_some(),
        }
    }
}

#[async_trait]
pub trait Copier: Send + Sync {
    async fn copy(&self, src: &str, dst: &str, opts: &CopyOptions) -> Result<()>;
}

#[async_trait]
pub trait Mover: Send + Sync {
    async fn move_object(&self, src: &str, dst: &str, opts: &MoveOptions) -> Result<()>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` into `path` / 抓取远程内容
    async fn fetch(&self, path: &str, url: &str, opts: &FetchOptions) -> Result<()>;
}

#[async_trait]
pub trait Reacher: Send + Sync {
    /// Public URL valid for `opts.expire` seconds / 生成公开链接
    async fn reach(&self, path: &str, opts: &ReachOptions) -> Result<String>;
}

#[async_trait]
pub trait Statister: Send + Sync {
    /// Bytes and objects under the work dir, upload staging excluded / 用量统计
    async fn statistical(&self, opts: &StatisticalOptions) -> Result<StorageStatistic>;
}

/// Multipart upload primitives / 分片上传
///
/// The backend owns part bookkeeping. Lifecycle checks on [`Segment`] are
/// done by the facade before any of these is called.
#[async_trait]
pub trait Multiparter: Send + Sync {
    async fn create_multipart(&self, path: &str, opts: &CreateMultipartOptions) -> Result<Segment>;

    async fn write_multipart(
        &self,
        seg: &Segment,
        data: Bytes,
        index: u32,
        opts: &WriteMultipartOptions,
    ) -> Result<Part>;

    async fn complete_multipart(&self, seg: &Segment, parts: &[Part], opts: &CompleteMultipartOptions) -> Result<()>;

    async fn abort_multipart(&self, seg: &Segment, opts: &AbortMultipartOptions) -> Result<()>;

    /// In-flight uploads under `prefix` / 进行中的分片上传
    async fn list_multipart(&self, prefix: &str, opts: &ListMultipartOptions) -> Result<BoxPager<Segment>>;

    /// Parts already uploaded to `seg` / 已上传分片
    async fn list_parts(&self, seg: &Segment, opts: &ListMultipartOptions) -> Result<BoxPager<Part>>;
}

/// Service backend interface, manages storage containers / 服务后端接口
#[async_trait]
pub trait Servicer: Send + Sync {
    fn backend_type(&self) -> &'static str;

    fn pairs(&self, _op: Operation) -> &'static [KeySpec] {
        &[]
    }

    fn error_table(&self) -> ErrorTable {
        ErrorTable::new()
    }

    async fn create(&self, name: &str, opts: &ServiceCreateOptions) -> Result<Arc<dyn Storager>>;

    async fn get(&self, name: &str, opts: &ServiceGetOptions) -> Result<Arc<dyn Storager>>;

    async fn delete(&self, name: &str, opts: &ServiceDeleteOptions) -> Result<()>;

    async fn list(&self, opts: &ServiceListOptions) -> Result<BoxPager<Arc<dyn Storager>>>;
}
