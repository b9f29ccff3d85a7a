use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::driver::LocalStorage;
use super::service::LocalService;
use crate::options::*;
use crate::storage::{BackendFactory, Servicer, Storager};
use crate::types::Endpoint;

pub(super) const PAGE_SIZE_KEY: &str = "local_page_size";

const NEW_PAIRS: &[KeySpec] = &[KeySpec::optional(PAGE_SIZE_KEY, ValueKind::Int)];

pub struct LocalFactory;

impl LocalFactory {
    /// Create and canonicalize a root directory / 创建并规范化根目录
    fn prepare_root(root: PathBuf) -> Result<PathBuf> {
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| anyhow!("Failed to create root directory {:?}: {}", root, e))?;
        }
        let root = root.canonicalize()?;
        tracing::info!("Local driver initialized, root: {:?}", root);
        Ok(root)
    }

    fn base(endpoint: Option<&Endpoint>) -> Result<Option<PathBuf>> {
        match endpoint {
            None => Ok(None),
            Some(Endpoint::File(path)) => Ok(Some(path.clone())),
            Some(other) => Err(anyhow!("local backend needs a file endpoint, got {}", other)),
        }
    }
}

impl BackendFactory for LocalFactory {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn new_pairs(&self, _op: Operation) -> &'static [KeySpec] {
        NEW_PAIRS
    }

    /// Root is `work_dir` under the file endpoint, or `work_dir` alone / 根目录
    fn create_storager(&self, opts: &NewStorageOptions) -> Result<Arc<dyn Storager>> {
        let work_dir = opts.work_dir.clone();
        let root = match (Self::base(opts.endpoint.as_ref())?, work_dir) {
            (Some(base), Some(dir)) => base.join(dir.trim_start_matches('/')),
            (Some(base), None) => base,
            (None, Some(dir)) => PathBuf::from(dir),
            (None, None) => return Err(anyhow!("local backend needs a work_dir or a file endpoint")),
        };
        let mut storage = LocalStorage::new(opts.name.clone(), Self::prepare_root(root)?);
        if let Some(page_size) = opts.extra.get_int(PAGE_SIZE_KEY) {
            storage = storage.with_page_size(page_size.max(1) as usize);
        }
        Ok(Arc::new(storage))
    }

    fn create_servicer(&self, opts: &NewServiceOptions) -> Result<Option<Arc<dyn Servicer>>> {
        let root = Self::base(opts.endpoint.as_ref())?
            .ok_or_else(|| anyhow!("local service needs a file endpoint"))?;
        let mut service = LocalService::new(Self::prepare_root(root)?);
        if let Some(page_size) = opts.extra.get_int(PAGE_SIZE_KEY) {
            service = service.with_page_size(page_size.max(1) as usize);
        }
        Ok(Some(Arc::new(service)))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::pairs;
    use crate::storage::Registry;
    use crate::types::{Credential, Endpoint};

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.register_factory(std::sync::Arc::new(super::LocalFactory));
        registry
    }

    #[tokio::test]
    async fn test_new_storager_under_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let storage = registry()
            .new_storager(
                "local",
                vec![
                    pairs::with_name("files"),
                    pairs::with_endpoint(Endpoint::File(dir.path().to_path_buf())),
                    pairs::with_work_dir("/data/"),
                    crate::options::Pair::new("local_page_size", crate::options::PairValue::Int(10)),
                ],
            )
            .unwrap();
        storage.write("x.txt", &b"x"[..], 1, vec![]).await.unwrap();
        assert!(dir.path().join("data/x.txt").exists());
    }

    #[test]
    fn test_http_endpoint_is_rejected() {
        let err = registry()
            .new_storager(
                "local",
                vec![pairs::with_name("n"), pairs::with_endpoint("http:example.com".parse::<Endpoint>().unwrap())],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_new_servicer() {
        let dir = tempfile::tempdir().unwrap();
        let service = registry()
            .new_servicer(
                "local",
                vec![
                    pairs::with_credential(Credential::Env),
                    pairs::with_endpoint(Endpoint::File(dir.path().to_path_buf())),
                ],
            )
            .unwrap();
        assert_eq!(service.to_string(), "Servicer local");
    }
}
