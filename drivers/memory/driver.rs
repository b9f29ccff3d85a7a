//! In-memory storage backend / 内存存储后端
//!
//! Objects live in a sorted map keyed by backend key, so listings come out in
//! key order and page cursors are simply the last key consumed.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::context::Context;
use crate::error::{ErrorKind, ErrorTable, ServiceError};
use crate::iterator::{BoxPager, Page, Pager};
use crate::options::*;
use crate::storage::io::{clamp_range, md5_hex, verify_md5};
use crate::storage::{BoxReader, Copier, Multiparter, Mover, Statister, Storager};
use crate::types::{ListMode, Object, ObjectMode, Part, Segment, StorageMeta, StorageStatistic};
use crate::utils::{abs_path, rel_path};

pub const DEFAULT_PAGE_SIZE: usize = 200;

pub(super) const PAGE_SIZE_KEY: &str = "memory_page_size";

const LIST_PAIRS: &[KeySpec] = &[KeySpec::optional(PAGE_SIZE_KEY, ValueKind::Int)];

pub(super) fn error_table() -> ErrorTable {
    ErrorTable::new()
        .rule(404, "", ErrorKind::NotFound)
        .rule(404, "NoSuchKey", ErrorKind::NotFound)
        .rule(404, "NoSuchUpload", ErrorKind::NotFound)
        .rule(404, "NoSuchBucket", ErrorKind::NotFound)
        .rule(403, "", ErrorKind::PermissionDenied)
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    content_md5: String,
    storage_class: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Upload {
    content_type: Option<String>,
    storage_class: Option<String>,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    /// (key, upload id)
    uploads: BTreeMap<(String, String), Upload>,
}

/// In-memory storage / 内存存储
pub struct MemoryStorage {
    name: String,
    work_dir: String,
    location: Option<String>,
    page_size: usize,
    state: Arc<Mutex<State>>,
    invocations: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>, work_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            work_dir: work_dir.into(),
            location: None,
            page_size: DEFAULT_PAGE_SIZE,
            state: Arc::new(Mutex::new(State::default())),
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of backend calls served so far, page fetches included / 后端调用次数
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(super) fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.objects.is_empty() && state.uploads.is_empty()
    }

    fn touch(&self) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
    }

    fn key(&self, path: &str) -> String {
        abs_path(&self.work_dir, path)
    }

    fn object(&self, key: &str, stored: &StoredObject) -> Object {
        let mut obj = Object::new(key, rel_path(&self.work_dir, key), ObjectMode::Read)
            .with_size(stored.data.len() as i64)
            .with_etag(stored.content_md5.clone())
            .with_last_modified(stored.last_modified);
        obj.content_md5 = Some(stored.content_md5.clone());
        obj.content_type = stored.content_type.clone();
        obj.storage_class = stored.storage_class.clone();
        obj
    }

    fn no_such_key(key: &str) -> anyhow::Error {
        ServiceError::new(404, "NoSuchKey")
            .with_message(format!("object {} does not exist", key))
            .into()
    }

    fn no_such_upload(seg: &Segment) -> anyhow::Error {
        ServiceError::new(404, "NoSuchUpload")
            .with_message(format!("upload {} does not exist", seg.id()))
            .into()
    }

    fn page_size(&self, extra: &ParsedPairs) -> usize {
        extra
            .get_int(PAGE_SIZE_KEY)
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(self.page_size)
    }
}

#[async_trait]
impl Storager for MemoryStorage {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    fn pairs(&self, op: Operation) -> &'static [KeySpec] {
        match op {
            Operation::List => LIST_PAIRS,
            _ => &[],
        }
    }

    fn error_table(&self) -> ErrorTable {
        error_table()
    }

    fn metadata(&self, _opts: &MetadataOptions) -> StorageMeta {
        self.touch();
        let meta = StorageMeta::new(self.name.clone(), self.work_dir.clone())
            .with_attribute("page_size", self.page_size.to_string());
        match &self.location {
            Some(location) => meta.with_location(location.clone()),
            None => meta,
        }
    }

    async fn stat(&self, path: &str, _opts: &StatOptions) -> Result<Object> {
        self.touch();
        let key = self.key(path);
        let state = self.state.lock();
        let stored = state.objects.get(&key).ok_or_else(|| Self::no_such_key(&key))?;
        Ok(self.object(&key, stored))
    }

    async fn read(&self, path: &str, opts: &ReadOptions) -> Result<BoxReader> {
        self.touch();
        let key = self.key(path);
        let data = {
            let state = self.state.lock();
            let stored = state.objects.get(&key).ok_or_else(|| Self::no_such_key(&key))?;
            stored.data.clone()
        };
        let (start, end) = clamp_range(opts.offset, opts.size, data.len() as u64);
        Ok(Box::new(std::io::Cursor::new(data.slice(start as usize..end as usize))))
    }

    async fn write(&self, path: &str, data: Bytes, opts: &WriteOptions) -> Result<u64> {
        self.touch();
        if let Some(expected) = &opts.content_md5 {
            verify_md5(&data, expected)?;
        }
        let key = self.key(path);
        let len = data.len() as u64;
        let stored = StoredObject {
            content_md5: md5_hex(&data),
            data,
            content_type: opts.content_type.clone(),
            storage_class: opts.storage_class.clone(),
            last_modified: Utc::now(),
        };
        self.state.lock().objects.insert(key, stored);
        Ok(len)
    }

    async fn delete(&self, path: &str, _opts: &DeleteOptions) -> Result<()> {
        self.touch();
        let key = self.key(path);
        self.state.lock().objects.remove(&key);
        Ok(())
    }

    async fn list(&self, path: &str, opts: &ListOptions) -> Result<BoxPager<Object>> {
        self.touch();
        Ok(Box::new(ObjectPager {
            prefix: self.key(path),
            work_dir: self.work_dir.clone(),
            mode: opts.list_mode,
            page_size: self.page_size(&opts.extra),
            state: self.state.clone(),
            invocations: self.invocations.clone(),
        }))
    }

    fn copier(&self) -> Option<&dyn Copier> {
        Some(self)
    }

    fn mover(&self) -> Option<&dyn Mover> {
        Some(self)
    }

    fn multiparter(&self) -> Option<&dyn Multiparter> {
        Some(self)
    }

    fn statister(&self) -> Option<&dyn Statister> {
        Some(self)
    }
}

#[async_trait]
impl Statister for MemoryStorage {
    async fn statistical(&self, _opts: &StatisticalOptions) -> Result<StorageStatistic> {
        self.touch();
        // "/" keeps the trailing slash, so "/data" does not match "database/.."
        let prefix = self.key("/");
        let state = self.state.lock();
        let mut stat = StorageStatistic::default();
        for (_, stored) in state.objects.range(prefix.clone()..).take_while(|(key, _)| key.starts_with(&prefix)) {
            stat.add(stored.data.len() as i64);
        }
        Ok(stat)
    }
}

#[async_trait]
impl Copier for MemoryStorage {
    async fn copy(&self, src: &str, dst: &str, _opts: &CopyOptions) -> Result<()> {
        self.touch();
        let (src, dst) = (self.key(src), self.key(dst));
        let mut state = self.state.lock();
        let mut stored = state.objects.get(&src).cloned().ok_or_else(|| Self::no_such_key(&src))?;
        stored.last_modified = Utc::now();
        state.objects.insert(dst, stored);
        Ok(())
    }
}

#[async_trait]
impl Mover for MemoryStorage {
    async fn move_object(&self, src: &str, dst: &str, _opts: &MoveOptions) -> Result<()> {
        self.touch();
        let (src, dst) = (self.key(src), self.key(dst));
        let mut state = self.state.lock();
        let stored = state.objects.remove(&src).ok_or_else(|| Self::no_such_key(&src))?;
        state.objects.insert(dst, stored);
        Ok(())
    }
}

#[async_trait]
impl Multiparter for MemoryStorage {
    async fn create_multipart(&self, path: &str, opts: &CreateMultipartOptions) -> Result<Segment> {
        self.touch();
        let id = uuid::Uuid::new_v4().to_string();
        let upload = Upload {
            content_type: opts.content_type.clone(),
            storage_class: opts.storage_class.clone(),
            parts: BTreeMap::new(),
        };
        self.state.lock().uploads.insert((self.key(path), id.clone()), upload);
        Ok(Segment::new(path, id))
    }

    async fn write_multipart(&self, seg: &Segment, data: Bytes, index: u32, opts: &WriteMultipartOptions) -> Result<Part> {
        self.touch();
        if let Some(expected) = &opts.content_md5 {
            verify_md5(&data, expected)?;
        }
        let etag = md5_hex(&data);
        let size = data.len() as i64;
        let mut state = self.state.lock();
        let upload = state
            .uploads
            .get_mut(&(self.key(seg.path()), seg.id().to_string()))
            .ok_or_else(|| Self::no_such_upload(seg))?;
        upload.parts.insert(index, (data, etag.clone()));
        Ok(Part::new(index, size).with_etag(etag))
    }

    async fn complete_multipart(&self, seg: &Segment, parts: &[Part], _opts: &CompleteMultipartOptions) -> Result<()> {
        self.touch();
        let key = self.key(seg.path());
        let mut state = self.state.lock();
        let upload_key = (key.clone(), seg.id().to_string());
        let upload = state.uploads.get(&upload_key).ok_or_else(|| Self::no_such_upload(seg))?;

        let mut indices: Vec<u32> = parts.iter().map(|p| p.index).collect();
        indices.sort_unstable();
        indices.dedup();
        let contiguous = !indices.is_empty() && indices.iter().enumerate().all(|(i, idx)| *idx as usize == i);
        if !contiguous {
            return Err(ServiceError::new(400, "InvalidPart")
                .with_message(format!("part indices {:?} are not contiguous from 0", indices))
                .into());
        }

        let mut data = BytesMut::new();
        for index in &indices {
            let (bytes, _) = upload.parts.get(index).ok_or_else(|| {
                anyhow::Error::new(ServiceError::new(400, "InvalidPart").with_message(format!("part {} was not uploaded", index)))
            })?;
            data.extend_from_slice(bytes);
        }

        let data = data.freeze();
        let stored = StoredObject {
            content_md5: md5_hex(&data),
            data,
            content_type: upload.content_type.clone(),
            storage_class: upload.storage_class.clone(),
            last_modified: Utc::now(),
        };
        state.uploads.remove(&upload_key);
        state.objects.insert(key, stored);
        Ok(())
    }

    async fn abort_multipart(&self, seg: &Segment, _opts: &AbortMultipartOptions) -> Result<()> {
        self.touch();
        self.state
            .lock()
            .uploads
            .remove(&(self.key(seg.path()), seg.id().to_string()))
            .map(|_| ())
            .ok_or_else(|| Self::no_such_upload(seg))
    }

    async fn list_multipart(&self, prefix: &str, opts: &ListMultipartOptions) -> Result<BoxPager<Segment>> {
        self.touch();
        Ok(Box::new(UploadPager {
            prefix: self.key(prefix),
            work_dir: self.work_dir.clone(),
            page_size: self.page_size(&opts.extra),
            state: self.state.clone(),
            invocations: self.invocations.clone(),
        }))
    }

    async fn list_parts(&self, seg: &Segment, opts: &ListMultipartOptions) -> Result<BoxPager<Part>> {
        self.touch();
        Ok(Box::new(PartPager {
            upload: (self.key(seg.path()), seg.id().to_string()),
            page_size: self.page_size(&opts.extra),
            state: self.state.clone(),
            invocations: self.invocations.clone(),
        }))
    }
}

struct ObjectPager {
    prefix: String,
    work_dir: String,
    mode: ListMode,
    page_size: usize,
    state: Arc<Mutex<State>>,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Pager<Object> for ObjectPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Object>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let lower = match cursor {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(self.prefix.clone()),
        };

        let mut items = Vec::new();
        let mut last_key: Option<String> = None;
        let mut last_dir: Option<String> = None;
        let mut more = false;

        for (key, stored) in state.objects.range((lower, Bound::Unbounded)) {
            if !key.starts_with(&self.prefix) {
                break;
            }
            // keys below a directory already emitted are folded into it
            if let Some(dir) = &last_dir {
                if key.starts_with(dir.as_str()) {
                    last_key = Some(key.clone());
                    continue;
                }
            }
            if items.len() >= self.page_size {
                more = true;
                break;
            }

            let rest = &key[self.prefix.len()..];
            match (self.mode, rest.find('/')) {
                (ListMode::Dir, Some(idx)) => {
                    let dir = format!("{}{}", self.prefix, &rest[..=idx]);
                    items.push(Object::new(dir.clone(), rel_path(&self.work_dir, &dir), ObjectMode::Dir));
                    last_dir = Some(dir);
                }
                _ => {
                    let mut obj = Object::new(key.clone(), rel_path(&self.work_dir, key), ObjectMode::Read)
                        .with_size(stored.data.len() as i64)
                        .with_etag(stored.content_md5.clone())
                        .with_last_modified(stored.last_modified);
                    obj.content_type = stored.content_type.clone();
                    items.push(obj);
                }
            }
            last_key = Some(key.clone());
        }

        let next = if more { last_key } else { None };
        Ok(Page::new(items, next))
    }
}

struct UploadPager {
    prefix: String,
    work_dir: String,
    page_size: usize,
    state: Arc<Mutex<State>>,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Pager<Segment> for UploadPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Segment>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let skip: usize = cursor.map(str::parse::<usize>).transpose()?.unwrap_or(0);
        let state = self.state.lock();
        let matching: Vec<Segment> = state
            .uploads
            .keys()
            .filter(|(key, _)| key.starts_with(&self.prefix))
            .skip(skip)
            .take(self.page_size + 1)
            .map(|(key, id)| Segment::new(rel_path(&self.work_dir, key), id.clone()))
            .collect();
        Ok(offset_page(matching, skip, self.page_size))
    }
}

struct PartPager {
    upload: (String, String),
    page_size: usize,
    state: Arc<Mutex<State>>,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl Pager<Part> for PartPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Part>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let skip: usize = cursor.map(str::parse::<usize>).transpose()?.unwrap_or(0);
        let state = self.state.lock();
        let upload = state.uploads.get(&self.upload).ok_or_else(|| {
            anyhow::Error::new(
                ServiceError::new(404, "NoSuchUpload").with_message(format!("upload {} does not exist", self.upload.1)),
            )
        })?;
        let parts: Vec<Part> = upload
            .parts
            .iter()
            .skip(skip)
            .take(self.page_size + 1)
            .map(|(index, (data, etag))| Part::new(*index, data.len() as i64).with_etag(etag.clone()))
            .collect();
        Ok(offset_page(parts, skip, self.page_size))
    }
}

/// `items` holds up to `page_size + 1` entries; the extra one only signals more data.
fn offset_page<T>(mut items: Vec<T>, skip: usize, page_size: usize) -> Page<T> {
    if items.len() > page_size {
        items.truncate(page_size);
        Page::new(items, Some((skip + page_size).to_string()))
    } else {
        Page::last(items)
    }
}
