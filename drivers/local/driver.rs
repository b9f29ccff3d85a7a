use async_trait::async_trait;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::Context;
use crate::error::{ErrorKind, ErrorTable, ServiceError};
use crate::iterator::{BoxPager, Page, Pager};
use crate::options::*;
use crate::storage::io::{fetch_url, md5_hex, verify_md5};
use crate::storage::{BoxReader, Copier, Fetcher, Mover, Multiparter, Statister, Storager};
use crate::types::{ListMode, Object, ObjectMode, Part, Segment, StorageMeta, StorageStatistic};

/// Staging directory for multipart uploads, hidden from listings / 分片暂存目录
const MULTIPART_DIR: &str = ".multipart";
const META_FILE: &str = "meta.json";

pub const DEFAULT_PAGE_SIZE: usize = 200;

pub(super) fn error_table() -> ErrorTable {
    ErrorTable::new()
        .rule(404, "", ErrorKind::NotFound)
        .rule(404, "ENOENT", ErrorKind::NotFound)
        .rule(404, "NoSuchUpload", ErrorKind::NotFound)
        .rule(403, "", ErrorKind::PermissionDenied)
        .rule(403, "EACCES", ErrorKind::PermissionDenied)
}

/// Map io errors onto status/code errors / IO错误映射
pub(super) fn io_error(err: std::io::Error, path: &Path) -> anyhow::Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => ServiceError::new(404, "ENOENT")
            .with_message(format!("{}: {}", path.display(), err))
            .into(),
        std::io::ErrorKind::PermissionDenied => ServiceError::new(403, "EACCES")
            .with_message(format!("{}: {}", path.display(), err))
            .into(),
        _ => anyhow::Error::new(err).context(format!("local io failed on {}", path.display())),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UploadMeta {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

/// Local filesystem storage / 本地文件系统存储
pub struct LocalStorage {
    name: String,
    root: PathBuf,
    page_size: usize,
    client: reqwest::Client,
}

impl LocalStorage {
    pub fn new(name: impl Into<String>, root: PathBuf) -> Self {
        Self {
            name: name.into(),
            root,
            page_size: DEFAULT_PAGE_SIZE,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Get root directory / 获取根目录
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Normalize path to prevent directory traversal attacks / 规范化路径
    fn normalize_path(&self, path: &str) -> Result<PathBuf> {
        let path = path.trim_start_matches('/').replace('\\', "/");

        let normalized: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
        for component in &normalized {
            if *component == ".." {
                return Err(ServiceError::new(403, "EACCES")
                    .with_message("Access path exceeds root directory scope")
                    .into());
            }
        }
        if normalized.first() == Some(&MULTIPART_DIR) {
            return Err(ServiceError::new(403, "EACCES")
                .with_message("Access to the multipart staging area is not allowed")
                .into());
        }

        Ok(self.root.join(normalized.join("/")))
    }

    fn upload_dir(&self, id: &str) -> Result<PathBuf> {
        // ids are generated here, anything else is not ours
        if uuid::Uuid::parse_str(id).is_err() {
            return Err(Self::no_such_upload(id));
        }
        Ok(self.root.join(MULTIPART_DIR).join(id))
    }

    fn no_such_upload(id: &str) -> anyhow::Error {
        ServiceError::new(404, "NoSuchUpload")
            .with_message(format!("upload {} does not exist", id))
            .into()
    }

    async fn upload_meta(&self, seg: &Segment) -> Result<UploadMeta> {
        let meta_path = self.upload_dir(seg.id())?.join(META_FILE);
        let content = match tokio::fs::read(&meta_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Self::no_such_upload(seg.id())),
            Err(e) => return Err(io_error(e, &meta_path)),
        };
        let meta: UploadMeta = serde_json::from_slice(&content)?;
        if meta.path != seg.path() {
            return Err(Self::no_such_upload(seg.id()));
        }
        Ok(meta)
    }
}

#[async_trait]
impl Storager for LocalStorage {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn error_table(&self) -> ErrorTable {
        error_table()
    }

    fn metadata(&self, _opts: &MetadataOptions) -> StorageMeta {
        StorageMeta::new(self.name.clone(), self.root.to_string_lossy())
    }

    async fn stat(&self, path: &str, _opts: &StatOptions) -> Result<Object> {
        let full_path = self.normalize_path(path)?;
        let meta = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| io_error(e, &full_path))?;
        Ok(file_object(path.trim_start_matches('/'), &full_path, &meta))
    }

    async fn read(&self, path: &str, opts: &ReadOptions) -> Result<BoxReader> {
        let full_path = self.normalize_path(path)?;
        let offset = opts.offset.unwrap_or(0).max(0) as u64;

        // Use sync IO to improve network share performance / 使用同步IO
        let file = tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&full_path).map_err(|e| io_error(e, &full_path))?;
            if offset > 0 {
                use std::io::Seek;
                file.seek(std::io::SeekFrom::Start(offset))?;
            }
            Ok::<std::fs::File, anyhow::Error>(file)
        })
        .await??;

        let async_file = tokio::fs::File::from_std(file);
        match opts.size {
            Some(size) if size >= 0 => {
                use tokio::io::AsyncReadExt;
                Ok(Box::new(async_file.take(size as u64)))
            }
            _ => Ok(Box::new(async_file)),
        }
    }

    async fn write(&self, path: &str, data: Bytes, opts: &WriteOptions) -> Result<u64> {
        if let Some(expected) = &opts.content_md5 {
            verify_md5(&data, expected)?;
        }
        let full_path = self.normalize_path(path)?;
        let len = data.len() as u64;
        tracing::debug!("local write: {:?} ({} bytes)", full_path, len);

        tokio::task::spawn_blocking(move || {
            // Ensure parent directory exists / 确保父目录存在
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error(e, parent))?;
            }
            std::fs::write(&full_path, &data).map_err(|e| io_error(e, &full_path))
        })
        .await??;
        Ok(len)
    }

    async fn delete(&self, path: &str, _opts: &DeleteOptions) -> Result<()> {
        let full_path = self.normalize_path(path)?;
        if full_path == self.root {
            return Err(ServiceError::new(403, "EACCES")
                .with_message("Refusing to delete the storage root")
                .into());
        }
        let result = match tokio::fs::metadata(&full_path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full_path).await,
            Ok(_) => tokio::fs::remove_file(&full_path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e, &full_path)),
        }
    }

    async fn list(&self, path: &str, opts: &ListOptions) -> Result<BoxPager<Object>> {
        // validates the prefix up front
        self.normalize_path(path)?;
        Ok(Box::new(LocalPager {
            root: self.root.clone(),
            prefix: path.trim_start_matches('/').to_string(),
            mode: opts.list_mode,
            page_size: self.page_size,
        }))
    }

    fn copier(&self) -> Option<&dyn Copier> {
        Some(self)
    }

    fn mover(&self) -> Option<&dyn Mover> {
        Some(self)
    }

    fn fetcher(&self) -> Option<&dyn Fetcher> {
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
impl Statister for LocalStorage {
    /// Walk the whole tree, staging area excluded / 遍历统计
    async fn statistical(&self, _opts: &StatisticalOptions) -> Result<StorageStatistic> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut stat = StorageStatistic::default();
            let mut pending = vec![root.clone()];
            while let Some(dir) = pending.pop() {
                for entry in std::fs::read_dir(&dir).map_err(|e| io_error(e, &dir))? {
                    let entry = entry?;
                    if dir == root && entry.file_name() == MULTIPART_DIR {
                        continue;
                    }
                    let meta = entry.metadata()?;
                    if meta.is_dir() {
                        pending.push(entry.path());
                    } else {
                        stat.add(meta.len() as i64);
                    }
                }
            }
            Ok::<StorageStatistic, anyhow::Error>(stat)
        })
        .await?
    }
}

#[async_trait]
impl Copier for LocalStorage {
    /// Server-side copy: use sync IO to improve network share performance / 服务端复制
    async fn copy(&self, src: &str, dst: &str, _opts: &CopyOptions) -> Result<()> {
        let src_full = self.normalize_path(src)?;
        let dst_full = self.normalize_path(dst)?;

        tokio::task::spawn_blocking(move || {
            if !src_full.exists() {
                return Err(io_error(std::io::ErrorKind::NotFound.into(), &src_full));
            }
            // Ensure target directory exists / 确保目标目录存在
            if let Some(parent) = dst_full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if src_full.is_dir() {
                copy_dir_recursive_sync(&src_full, &dst_full)?;
            } else {
                std::fs::copy(&src_full, &dst_full).map_err(|e| io_error(e, &src_full))?;
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

#[async_trait]
impl Mover for LocalStorage {
    async fn move_object(&self, src: &str, dst: &str, _opts: &MoveOptions) -> Result<()> {
        let old_full = self.normalize_path(src)?;
        let new_full = self.normalize_path(dst)?;

        // Ensure target directory exists / 确保目标目录存在
        if let Some(parent) = new_full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(e, parent))?;
        }
        tokio::fs::rename(&old_full, &new_full)
            .await
            .map_err(|e| io_error(e, &old_full))
    }
}

#[async_trait]
impl Fetcher for LocalStorage {
    async fn fetch(&self, path: &str, url: &str, _opts: &FetchOptions) -> Result<()> {
        let data = fetch_url(&self.client, url).await?;
        self.write(path, data, &WriteOptions::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl Multiparter for LocalStorage {
    async fn create_multipart(&self, path: &str, opts: &CreateMultipartOptions) -> Result<Segment> {
        self.normalize_path(path)?;
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.upload_dir(&id)?;
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_error(e, &dir))?;

        let meta = UploadMeta {
            path: path.trim_start_matches('/').to_string(),
            content_type: opts.content_type.clone(),
        };
        tokio::fs::write(dir.join(META_FILE), serde_json::to_vec(&meta)?).await?;
        tracing::debug!("local multipart created: {} -> {:?}", path, dir);
        Ok(Segment::new(meta.path, id))
    }

    async fn write_multipart(&self, seg: &Segment, data: Bytes, index: u32, opts: &WriteMultipartOptions) -> Result<Part> {
        if let Some(expected) = &opts.content_md5 {
            verify_md5(&data, expected)?;
        }
        self.upload_meta(seg).await?;
        let part_path = self.upload_dir(seg.id())?.join(format!("{}.part", index));
        let etag = md5_hex(&data);
        let size = data.len() as i64;
        tokio::fs::write(&part_path, &data)
            .await
            .map_err(|e| io_error(e, &part_path))?;
        Ok(Part::new(index, size).with_etag(etag))
    }

    async fn complete_multipart(&self, seg: &Segment, parts: &[Part], _opts: &CompleteMultipartOptions) -> Result<()> {
        self.upload_meta(seg).await?;
        let dir = self.upload_dir(seg.id())?;
        let dst = self.normalize_path(seg.path())?;

        let mut indices: Vec<u32> = parts.iter().map(|p| p.index).collect();
        indices.sort_unstable();
        indices.dedup();
        if indices.is_empty() || indices.iter().enumerate().any(|(i, idx)| *idx as usize != i) {
            return Err(ServiceError::new(400, "InvalidPart")
                .with_message(format!("part indices {:?} are not contiguous from 0", indices))
                .into());
        }

        tokio::task::spawn_blocking(move || {
            let sources: Vec<PathBuf> = indices.iter().map(|i| dir.join(format!("{}.part", i))).collect();
            if let Some(missing) = sources.iter().find(|p| !p.exists()) {
                return Err(anyhow::Error::new(
                    ServiceError::new(400, "InvalidPart").with_message(format!("{} was not uploaded", missing.display())),
                ));
            }
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = std::fs::File::create(&dst).map_err(|e| io_error(e, &dst))?;
            for source in &sources {
                let mut input = std::fs::File::open(source)?;
                std::io::copy(&mut input, &mut out)?;
            }
            out.sync_all()?;
            std::fs::remove_dir_all(&dir)?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn abort_multipart(&self, seg: &Segment, _opts: &AbortMultipartOptions) -> Result<()> {
        self.upload_meta(seg).await?;
        let dir = self.upload_dir(seg.id())?;
        tokio::fs::remove_dir_all(&dir).await.map_err(|e| io_error(e, &dir))
    }

    async fn list_multipart(&self, prefix: &str, _opts: &ListMultipartOptions) -> Result<BoxPager<Segment>> {
        let staging = self.root.join(MULTIPART_DIR);
        let prefix = prefix.trim_start_matches('/').to_string();
        let segments = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            let entries = match std::fs::read_dir(&staging) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
                Err(e) => return Err(io_error(e, &staging)),
            };
            for entry in entries {
                let entry = entry?;
                let id = entry.file_name().to_string_lossy().to_string();
                let meta_path = entry.path().join(META_FILE);
                // a half-written upload must not hide the others
                let meta = match std::fs::read(&meta_path) {
                    Ok(content) => match serde_json::from_slice::<UploadMeta>(&content) {
                        Ok(meta) => meta,
                        Err(e) => {
                            tracing::warn!("Skipping upload {} with unreadable metadata: {}", id, e);
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Skipping upload {}, cannot read {:?}: {}", id, meta_path, e);
                        continue;
                    }
                };
                if meta.path.starts_with(&prefix) {
                    out.push(Segment::new(meta.path, id));
                }
            }
            out.sort_by(|a, b| (a.path(), a.id()).cmp(&(b.path(), b.id())));
            Ok::<Vec<Segment>, anyhow::Error>(out)
        })
        .await??;
        Ok(Box::new(VecPager::new(segments, self.page_size)))
    }

    async fn list_parts(&self, seg: &Segment, _opts: &ListMultipartOptions) -> Result<BoxPager<Part>> {
        self.upload_meta(seg).await?;
        let dir = self.upload_dir(seg.id())?;
        let parts = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in std::fs::read_dir(&dir).map_err(|e| io_error(e, &dir))? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(index) = name.strip_suffix(".part").and_then(|i| i.parse::<u32>().ok()) else {
                    continue;
                };
                out.push(Part::new(index, entry.metadata()?.len() as i64));
            }
            out.sort_by_key(|p| p.index);
            Ok::<Vec<Part>, anyhow::Error>(out)
        })
        .await??;
        Ok(Box::new(VecPager::new(parts, self.page_size)))
    }
}

/// Listing read from disk page by page / 按页读取的列举
///
/// Keys come out in byte order, so the cursor is the last key returned and
/// each page only walks what lies after it.
struct LocalPager {
    root: PathBuf,
    prefix: String,
    mode: ListMode,
    page_size: usize,
}

/// One directory level as `(key, path, metadata)`, sorted by key / 单层目录
///
/// Directory keys end in '/', which puts "a/sub/x" after "a/sub-file" the
/// same way a flat key listing would.
fn read_level(root: &Path, dir: &Path, dir_key: &str) -> Result<Vec<(String, PathBuf, std::fs::Metadata)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(e, dir)),
    };
    let mut level = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if dir == root && name == MULTIPART_DIR {
            continue;
        }
        let meta = entry.metadata()?;
        let key = if meta.is_dir() {
            format!("{}{}/", dir_key, name)
        } else {
            format!("{}{}", dir_key, name)
        };
        level.push((key, entry.path(), meta));
    }
    level.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(level)
}

/// Collects up to `limit` objects after `cursor` / 收集一页
struct PageScan<'a> {
    root: &'a Path,
    prefix: &'a str,
    cursor: Option<&'a str>,
    limit: usize,
    out: Vec<Object>,
}

impl PageScan<'_> {
    fn after_cursor(&self, key: &str) -> bool {
        self.cursor.map_or(true, |cursor| key > cursor)
    }

    fn dir_level(&mut self, base: &Path, base_key: &str) -> Result<()> {
        for (key, path, meta) in read_level(self.root, base, base_key)? {
            if self.out.len() >= self.limit {
                break;
            }
            if key.starts_with(self.prefix) && self.after_cursor(&key) {
                self.out.push(file_object(&key, &path, &meta));
            }
        }
        Ok(())
    }

    fn walk(&mut self, dir: &Path, dir_key: &str) -> Result<()> {
        for (key, path, meta) in read_level(self.root, dir, dir_key)? {
            if self.out.len() >= self.limit {
                break;
            }
            if meta.is_dir() {
                let in_prefix = key.starts_with(self.prefix) || self.prefix.starts_with(&key);
                // every key below `key` sorts before a cursor outside it
                let consumed = self
                    .cursor
                    .is_some_and(|cursor| cursor > key.as_str() && !cursor.starts_with(&key));
                if in_prefix && !consumed {
                    self.walk(&path, &key)?;
                }
            } else if key.starts_with(self.prefix) && self.after_cursor(&key) {
                self.out.push(file_object(&key, &path, &meta));
            }
        }
        Ok(())
    }
}

impl LocalPager {
    fn scan(root: &Path, prefix: &str, mode: ListMode, cursor: Option<&str>, limit: usize) -> Result<Vec<Object>> {
        // directory that holds every candidate key
        let base_key = match prefix.rfind('/') {
            Some(idx) => &prefix[..=idx],
            None => "",
        };
        let base = root.join(base_key);
        let mut scan = PageScan {
            root,
            prefix,
            cursor,
            limit,
            out: Vec::new(),
        };
        match mode {
            ListMode::Dir => scan.dir_level(&base, base_key)?,
            ListMode::Prefix => scan.walk(&base, base_key)?,
        }
        Ok(scan.out)
    }
}

#[async_trait]
impl Pager<Object> for LocalPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Object>> {
        let (root, prefix, mode) = (self.root.clone(), self.prefix.clone(), self.mode);
        let cursor = cursor.map(str::to_string);
        // one extra entry tells whether another page follows
        let limit = self.page_size + 1;
        let mut items = tokio::task::spawn_blocking(move || LocalPager::scan(&root, &prefix, mode, cursor.as_deref(), limit))
            .await
            .map_err(|e| anyhow!("list task failed: {}", e))??;

        let next = if items.len() > self.page_size {
            items.truncate(self.page_size);
            items.last().map(|o| o.path.clone())
        } else {
            None
        };
        Ok(Page::new(items, next))
    }
}

fn file_object(key: &str, full: &Path, meta: &std::fs::Metadata) -> Object {
    let mode = if meta.is_dir() { ObjectMode::Dir } else { ObjectMode::Read };
    let mut obj = Object::new(full.to_string_lossy(), key, mode);
    if !meta.is_dir() {
        obj.size = Some(meta.len() as i64);
        obj.content_type = mime_guess::from_path(full).first().map(|m| m.to_string());
    }
    obj.last_modified = meta.modified().ok().map(DateTime::<Utc>::from);
    obj
}

/// Pages over an in-memory list using offset cursors / 基于偏移量的分页
pub(super) struct VecPager<T> {
    items: Vec<T>,
    page_size: usize,
}

impl<T> VecPager<T> {
    pub(super) fn new(items: Vec<T>, page_size: usize) -> Self {
        Self { items, page_size }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Pager<T> for VecPager<T> {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<T>> {
        let start = cursor.map(str::parse::<usize>).transpose()?.unwrap_or(0).min(self.items.len());
        let end = (start + self.page_size).min(self.items.len());
        let next = (end < self.items.len()).then(|| end.to_string());
        Ok(Page::new(self.items[start..end].to_vec(), next))
    }
}

/// Recursively copy directory (sync version for spawn_blocking) / 递归复制目录
fn copy_dir_recursive_sync(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive_sync(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}
