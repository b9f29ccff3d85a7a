use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::{Service, Servicer, Storage, Storager};
use crate::config::{BackendConfig, ServiceConfig, StorageConfig};
use crate::error::{classify, Error, ErrorKind, ErrorTable};
use crate::options::*;

/// Backend factory trait / 后端工厂 trait
pub trait BackendFactory: Send + Sync {
    /// Backend type name / 后端类型名称
    fn backend_type(&self) -> &'static str;

    /// Backend-specific keys accepted by `new` / 构造时接受的后端参数
    fn new_pairs(&self, _op: Operation) -> &'static [KeySpec] {
        &[]
    }

    /// Create a storage backend / 创建存储后端
    fn create_storager(&self, opts: &NewStorageOptions) -> Result<Arc<dyn Storager>>;

    /// Create a service backend, `None` when the backend has no service level / 创建服务后端
    fn create_servicer(&self, _opts: &NewServiceOptions) -> Result<Option<Arc<dyn Servicer>>> {
        Ok(None)
    }
}

/// Process-wide registry with every bundled backend / 全局后端注册表
pub static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    crate::drivers::register_all(&registry);
    registry
});

/// Backend registry (creates storages and services by type) / 后端注册表
#[derive(Clone, Default)]
pub struct Registry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn BackendFactory>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register backend factory / 注册后端工厂
    pub fn register_factory(&self, factory: Arc<dyn BackendFactory>) {
        let backend_type = factory.backend_type().to_string();
        self.factories.write().insert(backend_type.clone(), factory);
        tracing::info!("Backend factory registered: {}", backend_type);
    }

    /// List all available backend types / 列出所有可用的后端类型
    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    fn factory(&self, backend_type: &str) -> Result<Arc<dyn BackendFactory>, Error> {
        self.factories.read().get(backend_type).cloned().ok_or_else(|| {
            Error::new(
                "new",
                ErrorKind::Unsupported,
                anyhow!("Backend type not found: {}", backend_type),
                &[],
            )
        })
    }

    /// Open a storage from `new` pairs / 创建存储实例
    pub fn new_storager(&self, backend_type: &str, pairs: Vec<Pair>) -> Result<Storage, Error> {
        let factory = self.factory(backend_type)?;
        let op = Operation::NewStorage;
        let opts: NewStorageOptions = parse_new(factory.new_pairs(op), pairs, op)?;
        let backend = factory
            .create_storager(&opts)
            .map_err(|e| classify(op.name(), e, &ErrorTable::new(), &[&opts.name]))?;
        tracing::info!("Storage created: {} ({})", opts.name, backend_type);
        Ok(Storage::new(backend, StorageConfig::from_options(&opts)))
    }

    /// Open a service from `new` pairs / 创建服务实例
    pub fn new_servicer(&self, backend_type: &str, pairs: Vec<Pair>) -> Result<Service, Error> {
        let factory = self.factory(backend_type)?;
        let op = Operation::NewService;
        let opts: NewServiceOptions = parse_new(factory.new_pairs(op), pairs, op)?;
        let backend = factory
            .create_servicer(&opts)
            .map_err(|e| classify(op.name(), e, &ErrorTable::new(), &[]))?
            .ok_or_else(|| {
                Error::new(
                    op.name(),
                    ErrorKind::Unsupported,
                    anyhow!("{} has no service level", backend_type),
                    &[],
                )
            })?;
        tracing::info!("Service created: {}", backend_type);
        Ok(Service::new(backend, ServiceConfig::from_options(&opts)))
    }

    /// Open a storage from a serialized description / 从配置创建存储
    pub fn open(&self, config: BackendConfig) -> Result<Storage, Error> {
        let backend_type = config.backend_type.clone();
        let pairs = config
            .into_pairs()
            .map_err(|e| Error::new("new", ErrorKind::PairInvalid, e, &[]))?;
        self.new_storager(&backend_type, pairs)
    }
}

/// The policy for `new` travels inside the pairs themselves; the first
/// `pair_policy` pair decides whether unknown keys are rejected.
fn parse_new<T: OperationOptions>(extras: &'static [KeySpec], pairs: Vec<Pair>, op: Operation) -> Result<T, Error> {
    let restrictive = pairs
        .iter()
        .find(|p| p.key() == crate::pairs::PAIR_POLICY)
        .map(|p| matches!(p.value(), PairValue::PairPolicy(policy) if policy.is_restrictive(op)))
        .unwrap_or(false);
    let parsed = parse(T::KEYS, extras, pairs, restrictive)
        .map_err(|e| classify(op.name(), e.into(), &ErrorTable::new(), &[]))?;
    Ok(T::from_parsed(parsed))
}
