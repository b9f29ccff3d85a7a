//! Unified object storage abstraction / 统一对象存储抽象
//!
//! Callers talk to [`Storage`] and [`Service`] facades; backends implement
//! [`storage::Storager`] and [`storage::Servicer`] plus optional capability
//! traits, and are looked up by type name in a [`Registry`].

pub mod config;
pub mod context;
pub mod error;
pub mod iterator;
pub mod options;
pub mod pairs;
pub mod storage;
pub mod types;
pub mod utils;

// Backend modules (point to project root drivers via path attribute) / 后端模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use config::{BackendConfig, ServiceConfig, StorageConfig};
pub use context::Context;
pub use error::{normalize, Error, ErrorKind, ErrorTable, ServiceError};
pub use iterator::{Iter, Page, Pager};
pub use options::{Operation, Pair, PairPolicy, PairValue};
pub use storage::{Registry, Service, Storage, DEFAULT_REGISTRY};
pub use types::{Credential, Endpoint, ListMode, Object, ObjectMode, Part, Segment, SegmentState, StorageMeta, StorageStatistic};

/// Open a storage with the default registry / 使用默认注册表创建存储
pub fn new_storager(backend_type: &str, pairs: Vec<Pair>) -> Result<Storage, Error> {
    DEFAULT_REGISTRY.new_storager(backend_type, pairs)
}

/// Open a service with the default registry / 使用默认注册表创建服务
pub fn new_servicer(backend_type: &str, pairs: Vec<Pair>) -> Result<Service, Error> {
    DEFAULT_REGISTRY.new_servicer(backend_type, pairs)
}
