//! S3 driver / S3驱动核心实现
//!
//! rust-s3 is used without `fail-on-err`, so every response carries its
//! status code and error bodies are decoded here.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::Region;
use serde::Deserialize;

use super::config::S3Config;
use crate::context::Context;
use crate::error::{ErrorKind, ErrorTable, ServiceError};
use crate::iterator::{BoxPager, Page, Pager};
use crate::options::*;
use crate::storage::io::{fetch_url, verify_md5};
use crate::storage::{BoxReader, Copier, Fetcher, Mover, Multiparter, Reacher, Storager};
use crate::types::{ListMode, Object, ObjectMode, Part, Segment, StorageMeta};
use crate::utils::{abs_path, rel_path};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";
/// Separates key and upload id inside an upload listing cursor
const CURSOR_SEP: char = '\0';

pub(super) fn error_table() -> ErrorTable {
    ErrorTable::new()
        .rule(404, "", ErrorKind::NotFound)
        .rule(404, "NoSuchKey", ErrorKind::NotFound)
        .rule(404, "NoSuchBucket", ErrorKind::NotFound)
        .rule(404, "NoSuchUpload", ErrorKind::NotFound)
        .rule(403, "", ErrorKind::PermissionDenied)
        .rule(403, "AccessDenied", ErrorKind::PermissionDenied)
        .rule(501, "NotImplemented", ErrorKind::Unsupported)
}

/// `<Error>` document returned by S3 / S3错误响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    request_id: Option<String>,
}

/// Decode an error response into a status/code error / 解析错误响应
pub(super) fn service_error(status: u16, body: &[u8]) -> ServiceError {
    let text = String::from_utf8_lossy(body);
    match quick_xml::de::from_str::<ErrorBody>(&text) {
        Ok(parsed) => {
            let err = ServiceError::new(status, parsed.code).with_message(parsed.message);
            match parsed.request_id {
                Some(id) => err.with_request_id(id),
                None => err,
            }
        }
        Err(_) => ServiceError::new(status, "").with_message(text.chars().take(200).collect::<String>()),
    }
}

fn s3_error(err: S3Error) -> anyhow::Error {
    match err {
        S3Error::HttpFailWithBody(status, body) => service_error(status, body.as_bytes()).into(),
        other => anyhow!("s3 request failed: {}", other),
    }
}

fn check_status(status: u16, body: &[u8]) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(service_error(status, body).into())
    }
}

/// Wire part number for a 0-based index / 分片号转换
fn part_number(index: u32) -> Result<u32> {
    index.checked_add(1).ok_or_else(|| {
        anyhow::Error::new(ServiceError::new(400, "InvalidPart").with_message(format!("part index {} is out of range", index)))
    })
}

/// Storage class names are plain upper-case words / 存储类型校验
fn check_storage_class(class: &str) -> Result<()> {
    if !class.is_empty() && class.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_') {
        Ok(())
    } else {
        Err(ServiceError::new(400, "InvalidStorageClass")
            .with_message(format!("invalid storage class {:?}", class))
            .into())
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// S3 storage / S3存储
pub struct S3Storage {
    config: S3Config,
    bucket: Arc<Bucket>,
    client: reqwest::Client,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Result<Self> {
        let bucket = Self::create_bucket(&config)?;
        Ok(Self {
            config,
            bucket,
            client: reqwest::Client::new(),
        })
    }

    /// Create S3 Bucket client / 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config) -> Result<Arc<Bucket>> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| anyhow!("Failed to create S3 credentials: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| anyhow!("Failed to create S3 bucket client: {}", e))?;

        let bucket = if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        Ok(Arc::from(bucket))
    }

    pub fn config(&self) -> &S3Config {
        &self.config
    }

    fn key(&self, path: &str) -> String {
        abs_path(&self.config.root_path, path)
    }

    /// Bucket client that sends `x-amz-storage-class` when a class is given / 指定存储类型
    fn bucket_for_class(&self, class: Option<&str>) -> Result<Arc<Bucket>> {
        match class {
            Some(class) => {
                check_storage_class(class)?;
                let mut bucket = (*self.bucket).clone();
                bucket.add_header(STORAGE_CLASS_HEADER, class);
                Ok(Arc::new(bucket))
            }
            None => Ok(self.bucket.clone()),
        }
    }

    /// S3 CopyObject, the source must be URL encoded / 服务端复制
    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let encoded_src = urlencoding::encode(src_key);
        tracing::debug!("S3 CopyObject: src_key={}, encoded={}, dst_key={}", src_key, encoded_src, dst_key);

        let code = self
            .bucket
            .copy_object_internal(&encoded_src, dst_key)
            .await
            .map_err(s3_error)?;
        check_status(code, &[])
    }
}

#[async_trait]
impl Storager for S3Storage {
    fn backend_type(&self) -> &'static str {
        "s3"
    }

    fn error_table(&self) -> ErrorTable {
        error_table()
    }

    fn metadata(&self, _opts: &MetadataOptions) -> StorageMeta {
        StorageMeta::new(self.config.bucket.clone(), self.config.root_path.clone())
            .with_location(self.config.region.clone())
            .with_attribute("endpoint", self.config.endpoint.clone())
    }

    async fn stat(&self, path: &str, _opts: &StatOptions) -> Result<Object> {
        let key = self.key(path);
        let (head, code) = self.bucket.head_object(&key).await.map_err(s3_error)?;
        // HEAD responses have no body
        check_status(code, &[])?;

        let mut obj = Object::new(key, path.trim_start_matches('/'), ObjectMode::Read);
        obj.size = head.content_length;
        obj.content_type = head.content_type;
        obj.etag = head.e_tag;
        obj.storage_class = head.storage_class;
        obj.last_modified = head.last_modified.as_deref().and_then(parse_time);
        if let Some(metadata) = head.metadata {
            obj.user_metadata = metadata.into_iter().collect();
        }
        Ok(obj)
    }

    async fn read(&self, path: &str, opts: &ReadOptions) -> Result<BoxReader> {
        let key = self.key(path);
        let start = opts.offset.unwrap_or(0).max(0) as u64;
        let response = match opts.size {
            Some(size) if size <= 0 => return Ok(Box::new(std::io::Cursor::new(Bytes::new()))),
            Some(size) => self.bucket.get_object_range(&key, start, Some(start + size as u64 - 1)).await,
            None if start > 0 => self.bucket.get_object_range(&key, start, None).await,
            None => self.bucket.get_object(&key).await,
        }
        .map_err(s3_error)?;

        // reading past the end is an empty read
        if response.status_code() == 416 {
            return Ok(Box::new(std::io::Cursor::new(Bytes::new())));
        }
        check_status(response.status_code(), response.bytes())?;
        Ok(Box::new(std::io::Cursor::new(response.bytes().clone())))
    }

    async fn write(&self, path: &str, data: Bytes, opts: &WriteOptions) -> Result<u64> {
        if let Some(expected) = &opts.content_md5 {
            verify_md5(&data, expected)?;
        }
        let key = self.key(path);
        let content_type = opts
            .content_type
            .clone()
            .or_else(|| mime_guess::from_path(&key).first().map(|m| m.to_string()))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        tracing::debug!("S3 PutObject: key={}, size={}, class={:?}", key, data.len(), opts.storage_class);

        let response = self
            .bucket_for_class(opts.storage_class.as_deref())?
            .put_object_with_content_type(&key, &data, &content_type)
            .await
            .map_err(s3_error)?;
        check_status(response.status_code(), response.bytes())?;
        Ok(data.len() as u64)
    }

    async fn delete(&self, path: &str, _opts: &DeleteOptions) -> Result<()> {
        let key = self.key(path);
        let response = self.bucket.delete_object(&key).await.map_err(s3_error)?;
        match response.status_code() {
            404 => Ok(()),
            code => check_status(code, response.bytes()),
        }
    }

    async fn list(&self, path: &str, opts: &ListOptions) -> Result<BoxPager<Object>> {
        Ok(Box::new(ObjectPager {
            bucket: self.bucket.clone(),
            root: self.config.root_path.clone(),
            prefix: self.key(path),
            delimiter: (opts.list_mode == ListMode::Dir).then(|| "/".to_string()),
            page_size: self.config.page_size,
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

    fn reacher(&self) -> Option<&dyn Reacher> {
        Some(self)
    }

    fn multiparter(&self) -> Option<&dyn Multiparter> {
        Some(self)
    }
}

#[async_trait]
impl Copier for S3Storage {
    async fn copy(&self, src: &str, dst: &str, _opts: &CopyOptions) -> Result<()> {
        self.copy_object(&self.key(src), &self.key(dst)).await
    }
}

#[async_trait]
impl Mover for S3Storage {
    /// S3 has no rename, copy then delete / 复制后删除
    async fn move_object(&self, src: &str, dst: &str, _opts: &MoveOptions) -> Result<()> {
        let src_key = self.key(src);
        self.copy_object(&src_key, &self.key(dst)).await?;
        let response = self.bucket.delete_object(&src_key).await.map_err(s3_error)?;
        check_status(response.status_code(), response.bytes())
    }
}

#[async_trait]
impl Fetcher for S3Storage {
    async fn fetch(&self, path: &str, url: &str, _opts: &FetchOptions) -> Result<()> {
        let data = fetch_url(&self.client, url).await?;
        self.write(path, data, &WriteOptions::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl Reacher for S3Storage {
    async fn reach(&self, path: &str, opts: &ReachOptions) -> Result<String> {
        let key = self.key(path);

        if !self.config.custom_host.is_empty() {
            let host = self.config.custom_host.trim_end_matches('/');
            return Ok(format!("{}/{}", host, key));
        }

        let expire = u32::try_from(opts.expire).map_err(|_| anyhow!("expire {} is out of range", opts.expire))?;
        self.bucket
            .presign_get(&key, expire, None)
            .await
            .map_err(|e| anyhow!("Failed to presign URL: {}", e))
    }
}

#[async_trait]
impl Multiparter for S3Storage {
    async fn create_multipart(&self, path: &str, opts: &CreateMultipartOptions) -> Result<Segment> {
        let key = self.key(path);
        let content_type = opts.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        let init = self
            .bucket_for_class(opts.storage_class.as_deref())?
            .initiate_multipart_upload(&key, content_type)
            .await
            .map_err(s3_error)?;
        tracing::debug!("S3 multipart started: key={}, upload_id={}", key, init.upload_id);
        Ok(Segment::new(path.trim_start_matches('/'), init.upload_id))
    }

    /// Part numbers are 1-based on the wire / 分片号从1开始
    async fn write_multipart(&self, seg: &Segment, data: Bytes, index: u32, opts: &WriteMultipartOptions) -> Result<Part> {
        if let Some(expected) = &opts.content_md5 {
            verify_md5(&data, expected)?;
        }
        let key = self.key(seg.path());
        let number = part_number(index)?;
        let size = data.len() as i64;
        tracing::debug!("S3 upload part: key={}, part={}, size={}", key, number, size);
        let part = self
            .bucket
            .put_multipart_chunk(data.to_vec(), &key, number, seg.id(), DEFAULT_CONTENT_TYPE)
            .await
            .map_err(s3_error)?;
        Ok(Part::new(index, size).with_etag(part.etag))
    }

    async fn complete_multipart(&self, seg: &Segment, parts: &[Part], _opts: &CompleteMultipartOptions) -> Result<()> {
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            let etag = part
                .etag
                .clone()
                .ok_or_else(|| anyhow::Error::new(ServiceError::new(400, "InvalidPart").with_message(format!("part {} has no etag", part.index))))?;
            completed.push(s3::serde_types::Part {
                part_number: part_number(part.index)?,
                etag,
            });
        }
        completed.sort_by_key(|p| p.part_number);

        let key = self.key(seg.path());
        let response = self
            .bucket
            .complete_multipart_upload(&key, seg.id(), completed)
            .await
            .map_err(s3_error)?;
        check_status(response.status_code(), response.bytes())?;
        tracing::debug!("S3 multipart completed: key={}", key);
        Ok(())
    }

    async fn abort_multipart(&self, seg: &Segment, _opts: &AbortMultipartOptions) -> Result<()> {
        self.bucket
            .abort_upload(&self.key(seg.path()), seg.id())
            .await
            .map_err(s3_error)
    }

    async fn list_multipart(&self, prefix: &str, _opts: &ListMultipartOptions) -> Result<BoxPager<Segment>> {
        Ok(Box::new(UploadPager {
            bucket: self.bucket.clone(),
            root: self.config.root_path.clone(),
            prefix: self.key(prefix),
            page_size: self.config.page_size,
        }))
    }

    async fn list_parts(&self, seg: &Segment, _opts: &ListMultipartOptions) -> Result<BoxPager<Part>> {
        Err(ServiceError::new(501, "NotImplemented")
            .with_message(format!("listing parts of {} is not supported by this client", seg.id()))
            .into())
    }
}

/// ListObjectsV2 pages, continuation token as cursor / 对象列举分页
struct ObjectPager {
    bucket: Arc<Bucket>,
    root: String,
    prefix: String,
    delimiter: Option<String>,
    page_size: usize,
}

#[async_trait]
impl Pager<Object> for ObjectPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Object>> {
        let (result, code) = self
            .bucket
            .list_page(
                self.prefix.clone(),
                self.delimiter.clone(),
                cursor.map(str::to_string),
                None,
                Some(self.page_size),
            )
            .await
            .map_err(s3_error)?;
        check_status(code, &[])?;

        let mut items = Vec::new();
        for cp in result.common_prefixes.unwrap_or_default() {
            let path = rel_path(&self.root, &cp.prefix);
            items.push(Object::new(cp.prefix, path, ObjectMode::Dir));
        }
        for obj in result.contents {
            let mut item = Object::new(obj.key.clone(), rel_path(&self.root, &obj.key), ObjectMode::Read);
            item.size = Some(obj.size as i64);
            item.etag = obj.e_tag;
            item.storage_class = obj.storage_class;
            item.last_modified = parse_time(&obj.last_modified);
            items.push(item);
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));

        let next = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };
        Ok(Page::new(items, next))
    }
}

/// `key\0upload_id` of the last upload on a page / 分片列举游标
fn upload_cursor(key: &str, upload_id: &str) -> String {
    format!("{}{}{}", key, CURSOR_SEP, upload_id)
}

fn split_upload_cursor(cursor: &str) -> (&str, Option<&str>) {
    match cursor.split_once(CURSOR_SEP) {
        Some((key, id)) => (key, Some(id)),
        None => (cursor, None),
    }
}

/// Cursor for the page after `last`; a truncated page must move forward
fn next_upload_cursor(truncated: bool, last: Option<(&str, &str)>) -> Result<Option<String>> {
    match (truncated, last) {
        (false, _) => Ok(None),
        (true, Some((key, id))) => Ok(Some(upload_cursor(key, id))),
        (true, None) => Err(anyhow!("truncated upload listing returned no uploads")),
    }
}

/// ListMultipartUploads pages, key and upload id markers as cursor / 分片上传列举分页
///
/// Several uploads may share a key, so the key marker alone would skip the
/// ones that spill over a page boundary.
struct UploadPager {
    bucket: Arc<Bucket>,
    root: String,
    prefix: String,
    page_size: usize,
}

#[async_trait]
impl Pager<Segment> for UploadPager {
    async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> Result<Page<Segment>> {
        let (key_marker, upload_id_marker) = match cursor {
            Some(cursor) => {
                let (key, id) = split_upload_cursor(cursor);
                (Some(key.to_string()), id)
            }
            None => (None, None),
        };
        let bucket = match upload_id_marker {
            Some(id) => {
                let mut bucket = (*self.bucket).clone();
                bucket.add_query("upload-id-marker", id);
                Arc::new(bucket)
            }
            None => self.bucket.clone(),
        };

        let (result, code) = bucket
            .list_multiparts_uploads_page(Some(self.prefix.as_str()), None, key_marker, Some(self.page_size))
            .await
            .map_err(s3_error)?;
        check_status(code, &[])?;

        let next = next_upload_cursor(
            result.is_truncated,
            result.uploads.last().map(|u| (u.key.as_str(), u.id.as_str())),
        )?;
        let items = result
            .uploads
            .into_iter()
            .map(|upload| Segment::new(rel_path(&self.root, &upload.key), upload.id))
            .collect();
        Ok(Page::new(items, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_body() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
  <Code>NoSuchKey</Code>
  <Message>The specified key does not exist.</Message>
  <Key>photos/a.png</Key>
  <RequestId>4442587FB7D0A2F9</RequestId>
</Error>"#;
        let err = service_error(404, body);
        assert_eq!(err.status, 404);
        assert_eq!(err.code, "NoSuchKey");
        assert_eq!(err.message, "The specified key does not exist.");
        assert_eq!(err.request_id.as_deref(), Some("4442587FB7D0A2F9"));
        assert_eq!(error_table().lookup(err.status, &err.code), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_non_xml_body_keeps_status() {
        let err = service_error(403, b"forbidden");
        assert_eq!(err.code, "");
        assert_eq!(err.message, "forbidden");
        assert_eq!(error_table().lookup(err.status, &err.code), Some(ErrorKind::PermissionDenied));
    }

    #[test]
    fn test_unknown_code_falls_back_to_status() {
        assert_eq!(error_table().lookup(403, "SignatureDoesNotMatch"), Some(ErrorKind::PermissionDenied));
        assert_eq!(error_table().lookup(501, "NotImplemented"), Some(ErrorKind::Unsupported));
        assert_eq!(error_table().lookup(500, "InternalError"), None);
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(204, &[]).is_ok());
        let err = check_status(404, &[]).unwrap_err();
        assert_eq!(err.downcast_ref::<ServiceError>().map(|e| e.status), Some(404));
    }

    #[test]
    fn test_part_number_overflow_is_invalid_part() {
        assert_eq!(part_number(0).unwrap(), 1);
        assert_eq!(part_number(9_999).unwrap(), 10_000);
        let err = part_number(u32::MAX).unwrap_err();
        let svc = err.downcast_ref::<ServiceError>().unwrap();
        assert_eq!((svc.status, svc.code.as_str()), (400, "InvalidPart"));
    }

    #[test]
    fn test_upload_cursor_keeps_upload_id() {
        let cursor = next_upload_cursor(true, Some(("photos/a", "id-1"))).unwrap().unwrap();
        assert_eq!(split_upload_cursor(&cursor), ("photos/a", Some("id-1")));
        // a bare key marker still works
        assert_eq!(split_upload_cursor("photos/a"), ("photos/a", None));
        assert_eq!(next_upload_cursor(false, Some(("photos/a", "id-1"))).unwrap(), None);
        assert!(next_upload_cursor(true, None).is_err());
    }

    #[test]
    fn test_storage_class_selects_bucket() {
        let storage = S3Storage::new(S3Config {
            bucket: "b".into(),
            endpoint: "http://localhost:9000".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            force_path_style: true,
            ..Default::default()
        })
        .unwrap();
        let plain = storage.bucket_for_class(None).unwrap();
        assert!(Arc::ptr_eq(&plain, &storage.bucket));
        let glacier = storage.bucket_for_class(Some("GLACIER")).unwrap();
        assert!(!Arc::ptr_eq(&glacier, &storage.bucket));

        let err = storage.bucket_for_class(Some("standard ia")).unwrap_err();
        assert_eq!(err.downcast_ref::<ServiceError>().unwrap().code, "InvalidStorageClass");
    }

    #[test]
    fn test_parse_time_formats() {
        assert!(parse_time("2024-01-02T03:04:05.000Z").is_some());
        assert!(parse_time("Tue, 02 Jan 2024 03:04:05 GMT").is_some());
        assert!(parse_time("yesterday").is_none());
    }

    #[test]
    fn test_keys_live_under_root() {
        let config = S3Config {
            bucket: "b".into(),
            endpoint: "http://localhost:9000".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            root_path: "/backup/".into(),
            force_path_style: true,
            ..Default::default()
        };
        let storage = S3Storage::new(config).unwrap();
        assert_eq!(storage.key("a/b.txt"), "backup/a/b.txt");
        assert_eq!(storage.key("dir/"), "backup/dir/");
        let meta = storage.metadata(&MetadataOptions::default());
        assert_eq!(meta.name, "b");
        assert_eq!(meta.location.as_deref(), Some("us-east-1"));
    }
}
