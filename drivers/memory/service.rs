//! In-memory service: a set of named memory storages / 内存服务

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::driver::{error_table, MemoryStorage, DEFAULT_PAGE_SIZE};
use crate::context::Context;
use crate::error::{ErrorTable, ServiceError};
use crate::iterator::{BoxPager, Page, Pager};
use crate::options::*;
use crate::storage::{Servicer, Storager};

pub struct MemoryService {
    page_size: usize,
    buckets: Arc<Mutex<BTreeMap<String, Arc<MemoryStorage>>>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buckets: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn no_such_bucket(name: &str) -> anyhow::Error {
        ServiceError::new(404, "NoSuchBucket")
            .with_message(format!("bucket {} does not exist", name))
            .into()
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Servicer for MemoryService {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn error_table(&self) -> ErrorTable {
        error_table()
    }

    /// Creating an existing bucket returns it unchanged / 已存在时直接返回
    async fn create(&self, name: &str, opts: &ServiceCreateOptions) -> Result<Arc<dyn Storager>> {
        let mut buckets = self.buckets.lock();
        let storage = buckets
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("memory service: create bucket {}", name);
                Arc::new(
                    MemoryStorage::new(name, "/")
                        .with_page_size(self.page_size)
                        .with_location(opts.location.clone()),
                )
            })
            .clone();
        Ok(storage)
    }

    async fn get(&self, name: &str, _opts: &ServiceGetOptions) -> Result<Arc<dyn Storager>> {
        let buckets = self.buckets.lock();
        let storage = buckets.get(name).cloned().ok_or_else(|| Self::no_such_bucket(name))?;
        Ok(storage)
    }

    async fn delete(&self, name: &str, _opts: &ServiceDeleteOptions) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let storage = buckets.get(name).ok_or_else(|| Self::no_such_bucket(name))?;
        if !storage.is_empty() {
            return Err(ServiceError::new(409, "BucketNotEmpty")
                .with_message(format!("bucket {} is not empty", name))
                .into());
        }
        buckets.remove(name);
        Ok(())
    }

    async fn list(&self, _opts: &ServiceListOptions) -> Result<BoxPager<Arc<dyn Storager>>> {
        Ok(Box::new(BucketPager {
            page_size: self.page_size,
            buckets: self.buckets.clone(),
        }))
    }
}

struct BucketPager {
    page_size: usize,
    buckets: Arc<Mutex<BTreeMap<String, Arc<MemoryStorage>>>>,
}

#[async_trait]
impl Pager<Arc<dyn Storager>> for BucketPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Arc<dyn Storager>>> {
        let buckets = self.buckets.lock();
        let lower = match cursor {
            Some(token) => std::ops::Bound::Excluded(token.to_string()),
            None => std::ops::Bound::Unbounded,
        };
        let mut items: Vec<Arc<dyn Storager>> = Vec::new();
        let mut last = None;
        let mut more = false;
        for (name, storage) in buckets.range((lower, std::ops::Bound::Unbounded)) {
            if items.len() == self.page_size {
                more = true;
                break;
            }
            items.push(storage.clone());
            last = Some(name.clone());
        }
        Ok(Page::new(items, if more { last } else { None }))
    }
}
