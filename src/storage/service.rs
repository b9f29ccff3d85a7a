//! Service facade / 服务门面
//!
//! Manages storage containers (buckets). Storages handed out inherit the
//! service's pair policy and default storage pairs.

use std::fmt;
use std::sync::Arc;

use super::{Servicer, Storage, Storager};
use crate::config::ServiceConfig;
use crate::context::Context;
use crate::error::{classify, Error, ErrorTable};
use crate::iterator::{Iter, MapPager};
use crate::options::*;

struct Inner {
    backend: Arc<dyn Servicer>,
    config: ServiceConfig,
    errors: Arc<ErrorTable>,
}

#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

impl Service {
    pub fn new(backend: Arc<dyn Servicer>, config: ServiceConfig) -> Self {
        let errors = Arc::new(backend.error_table());
        Self {
            inner: Arc::new(Inner { backend, config, errors }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Servicer> {
        &self.inner.backend
    }

    fn parse<T: OperationOptions>(&self, pairs: Vec<Pair>, paths: &[&str]) -> Result<T, Error> {
        let op = T::OPERATION;
        let merged = self.inner.config.default_pairs.merge(op, pairs);
        let restrictive = self.inner.config.pair_policy.is_restrictive(op);
        parse(T::KEYS, self.inner.backend.pairs(op), merged, restrictive)
            .map(T::from_parsed)
            .map_err(|e| self.fail(op, e.into(), paths))
    }

    fn fail(&self, op: Operation, err: anyhow::Error, paths: &[&str]) -> Error {
        classify(op.name(), err, &self.inner.errors, paths)
    }

    fn wrap(config: &ServiceConfig, backend: Arc<dyn Storager>) -> Storage {
        let meta = backend.metadata(&MetadataOptions::default());
        let config = config.storage_config(&meta.name, &meta.work_dir);
        Storage::new(backend, config)
    }

    /// Create container `name` / 创建存储容器
    pub async fn create(&self, name: &str, pairs: Vec<Pair>) -> Result<Storage, Error> {
        self.create_with_context(&Context::background(), name, pairs).await
    }

    pub async fn create_with_context(&self, ctx: &Context, name: &str, pairs: Vec<Pair>) -> Result<Storage, Error> {
        let opts: ServiceCreateOptions = self.parse(pairs, &[name])?;
        tracing::debug!("service {}: create {}", self.inner.backend.backend_type(), name);
        let backend = ctx
            .run(self.inner.backend.create(name, &opts))
            .await
            .map_err(|e| self.fail(Operation::ServiceCreate, e, &[name]))?;
        Ok(Self::wrap(&self.inner.config, backend))
    }

    pub async fn get(&self, name: &str, pairs: Vec<Pair>) -> Result<Storage, Error> {
        self.get_with_context(&Context::background(), name, pairs).await
    }

    pub async fn get_with_context(&self, ctx: &Context, name: &str, pairs: Vec<Pair>) -> Result<Storage, Error> {
        let opts: ServiceGetOptions = self.parse(pairs, &[name])?;
        let backend = ctx
            .run(self.inner.backend.get(name, &opts))
            .await
            .map_err(|e| self.fail(Operation::ServiceGet, e, &[name]))?;
        Ok(Self::wrap(&self.inner.config, backend))
    }

    pub async fn delete(&self, name: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        self.delete_with_context(&Context::background(), name, pairs).await
    }

    pub async fn delete_with_context(&self, ctx: &Context, name: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        let opts: ServiceDeleteOptions = self.parse(pairs, &[name])?;
        tracing::debug!("service {}: delete {}", self.inner.backend.backend_type(), name);
        ctx.run(self.inner.backend.delete(name, &opts))
            .await
            .map_err(|e| self.fail(Operation::ServiceDelete, e, &[name]))
    }

    /// Lazy listing of containers / 列举存储容器
    pub async fn list(&self, pairs: Vec<Pair>) -> Result<Iter<Storage>, Error> {
        self.list_with_context(&Context::background(), pairs).await
    }

    pub async fn list_with_context(&self, ctx: &Context, pairs: Vec<Pair>) -> Result<Iter<Storage>, Error> {
        let op = Operation::ServiceList;
        let opts: ServiceListOptions = self.parse(pairs, &[])?;
        let pager = ctx
            .run(self.inner.backend.list(&opts))
            .await
            .map_err(|e| self.fail(op, e, &[]))?;
        let config = self.inner.config.clone();
        let pager = MapPager::new(pager, move |backend| Self::wrap(&config, backend));
        Ok(Iter::new(
            Box::new(pager),
            ctx.clone(),
            op.name(),
            &[],
            self.inner.errors.clone(),
        ))
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Servicer {}", self.inner.backend.backend_type())
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryService;
    use crate::error::ErrorKind;
    use crate::pairs;

    fn service(config: ServiceConfig) -> Service {
        Service::new(Arc::new(MemoryService::new().with_page_size(2)), config)
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let svc = service(ServiceConfig::default());
        let storage = svc.create("bucket", vec![pairs::with_location("mem-1")]).await.unwrap();
        let meta = storage.metadata(vec![]).unwrap();
        assert_eq!(meta.name, "bucket");
        assert_eq!(meta.location.as_deref(), Some("mem-1"));

        let again = svc.get("bucket", vec![]).await.unwrap();
        again.write("k", &b"v"[..], 1, vec![]).await.unwrap();
        // container is not empty yet
        let err = svc.delete("bucket", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);

        again.delete("k", vec![]).await.unwrap();
        svc.delete("bucket", vec![]).await.unwrap();
        let err = svc.get("bucket", vec![]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_pages_storages() {
        let svc = service(ServiceConfig::default());
        for name in ["a", "b", "c", "d", "e"] {
            svc.create(name, vec![]).await.unwrap();
        }
        let names: Vec<String> = svc
            .list(vec![])
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.config().name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_storages_inherit_policy() {
        let config = ServiceConfig {
            pair_policy: PairPolicy::strict(),
            ..Default::default()
        };
        let svc = service(config);
        let storage = svc.create("strict", vec![]).await.unwrap();
        let err = storage.stat("x", vec![pairs::with_expire(1)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairUnsupported);
    }

    #[tokio::test]
    async fn test_service_policy_applies_to_service_ops() {
        let config = ServiceConfig {
            pair_policy: PairPolicy::default().restrict(Operation::ServiceCreate),
            ..Default::default()
        };
        let err = service(config).create("x", vec![pairs::with_offset(1)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairUnsupported);
        assert_eq!(err.op(), "create");
    }
}
