use std::sync::Arc;

use anyhow::Result;

use super::driver::{MemoryStorage, PAGE_SIZE_KEY};
use super::service::MemoryService;
use crate::options::*;
use crate::storage::{BackendFactory, Servicer, Storager};

const NEW_PAIRS: &[KeySpec] = &[KeySpec::optional(PAGE_SIZE_KEY, ValueKind::Int)];

pub struct MemoryFactory;

impl BackendFactory for MemoryFactory {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn new_pairs(&self, _op: Operation) -> &'static [KeySpec] {
        NEW_PAIRS
    }

    fn create_storager(&self, opts: &NewStorageOptions) -> Result<Arc<dyn Storager>> {
        let mut storage = MemoryStorage::new(opts.name.clone(), opts.work_dir.clone().unwrap_or_else(|| "/".to_string()))
            .with_location(opts.location.clone());
        if let Some(page_size) = opts.extra.get_int(PAGE_SIZE_KEY) {
            storage = storage.with_page_size(page_size.max(1) as usize);
        }
        Ok(Arc::new(storage))
    }

    fn create_servicer(&self, opts: &NewServiceOptions) -> Result<Option<Arc<dyn Servicer>>> {
        let mut service = MemoryService::new();
        if let Some(page_size) = opts.extra.get_int(PAGE_SIZE_KEY) {
            service = service.with_page_size(page_size.max(1) as usize);
        }
        Ok(Some(Arc::new(service)))
    }
}
