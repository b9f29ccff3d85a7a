// Driver package / 驱动包
pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use crate::storage::Registry;

/// Register all bundled backends / 注册所有内置后端
pub fn register_all(registry: &Registry) {
    // In-memory backend / 注册内存后端
    registry.register_factory(Arc::new(memory::MemoryFactory));
    // Local filesystem backend / 注册本地驱动
    registry.register_factory(Arc::new(local::LocalFactory));
    // S3 compatible backend / 注册S3驱动
    registry.register_factory(Arc::new(s3::S3Factory));
}
