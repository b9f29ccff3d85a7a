//! Local service: every sub directory of the root is a storage / 本地服务

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::driver::{error_table, io_error, LocalStorage, VecPager, DEFAULT_PAGE_SIZE};
use crate::error::{ErrorTable, ServiceError};
use crate::iterator::BoxPager;
use crate::options::*;
use crate::storage::{Servicer, Storager};

pub struct LocalService {
    root: PathBuf,
    page_size: usize,
}

impl LocalService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn container(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(ServiceError::new(400, "InvalidBucketName")
                .with_message(format!("{:?} is not a valid storage name", name))
                .into());
        }
        Ok(self.root.join(name))
    }

    fn storage(&self, name: &str, dir: PathBuf) -> Arc<dyn Storager> {
        Arc::new(LocalStorage::new(name, dir).with_page_size(self.page_size))
    }
}

#[async_trait]
impl Servicer for LocalService {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn error_table(&self) -> ErrorTable {
        error_table()
    }

    async fn create(&self, name: &str, _opts: &ServiceCreateOptions) -> Result<Arc<dyn Storager>> {
        let dir = self.container(name)?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_error(e, &dir))?;
        tracing::debug!("local service: create {:?}", dir);
        Ok(self.storage(name, dir))
    }

    async fn get(&self, name: &str, _opts: &ServiceGetOptions) -> Result<Arc<dyn Storager>> {
        let dir = self.container(name)?;
        let meta = tokio::fs::metadata(&dir).await.map_err(|e| io_error(e, &dir))?;
        if !meta.is_dir() {
            return Err(ServiceError::new(404, "ENOENT")
                .with_message(format!("{} is not a directory", dir.display()))
                .into());
        }
        Ok(self.storage(name, dir))
    }

    /// Only empty directories are removed / 只删除空目录
    async fn delete(&self, name: &str, _opts: &ServiceDeleteOptions) -> Result<()> {
        let dir = self.container(name)?;
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io_error(e, &dir))?;
        if entries.next_entry().await?.is_some() {
            return Err(ServiceError::new(409, "ENOTEMPTY")
                .with_message(format!("{} is not empty", dir.display()))
                .into());
        }
        tokio::fs::remove_dir(&dir).await.map_err(|e| io_error(e, &dir))
    }

    async fn list(&self, _opts: &ServiceListOptions) -> Result<BoxPager<Arc<dyn Storager>>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| io_error(e, &self.root))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') && entry.file_type().await?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        let storages = names
            .into_iter()
            .map(|name| {
                let dir = self.root.join(&name);
                self.storage(&name, dir)
            })
            .collect();
        Ok(Box::new(VecPager::new(storages, self.page_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::error::ErrorKind;
    use crate::storage::Service;

    #[tokio::test]
    async fn test_directories_as_storages() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Service::new(Arc::new(LocalService::new(dir.path().to_path_buf()).with_page_size(1)), ServiceConfig::default());

        let photos = svc.create("photos", vec![]).await.unwrap();
        svc.create("music", vec![]).await.unwrap();
        photos.write("a.png", &b"png"[..], 3, vec![]).await.unwrap();
        assert!(dir.path().join("photos/a.png").exists());

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
        assert_eq!(names, vec!["music", "photos"]);

        let err = svc.delete("photos", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        svc.delete("music", vec![]).await.unwrap();
        assert!(svc.get("music", vec![]).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_nested_names() {
        let dir = tempfile::tempdir().unwrap();
        let svc = Service::new(Arc::new(LocalService::new(dir.path().to_path_buf())), ServiceConfig::default());
        let err = svc.create("../escape", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }
}
