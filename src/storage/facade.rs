//! Storage facade / 存储门面
//!
//! Every operation follows the same pipeline: merge defaults, parse pairs,
//! detect capability, call the backend inside the [`Context`], normalize
//! errors. The facade keeps no request state and is cheap to clone.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::io::{AsyncRead, AsyncWrite};

use super::io::{copy_with_callback, read_sized, report_chunks};
use super::{Capability, Storager};
use crate::config::StorageConfig;
use crate::context::Context;
use crate::error::{classify, Error, ErrorKind, ErrorTable};
use crate::iterator::Iter;
use crate::options::*;
use crate::types::{Object, Part, Segment, SegmentState, StorageMeta, StorageStatistic};

struct Inner {
    backend: Arc<dyn Storager>,
    config: StorageConfig,
    errors: Arc<ErrorTable>,
}

/// Unified storage handle / 统一存储句柄
#[derive(Clone)]
pub struct Storage {
    inner: Arc<Inner>,
}

impl Storage {
    pub fn new(backend: Arc<dyn Storager>, config: StorageConfig) -> Self {
        let errors = Arc::new(backend.error_table());
        Self {
            inner: Arc::new(Inner { backend, config, errors }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Storager> {
        &self.inner.backend
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn capability(&self) -> Capability {
        self.inner.backend.capability()
    }

    fn parse<T: OperationOptions>(&self, pairs: Vec<Pair>) -> Result<T, PairError> {
        let op = T::OPERATION;
        let merged = self.inner.config.default_pairs.merge(op, pairs);
        let restrictive = self.inner.config.pair_policy.is_restrictive(op);
        let parsed = parse(T::KEYS, self.inner.backend.pairs(op), merged, restrictive)?;
        Ok(T::from_parsed(parsed))
    }

    fn parse_for<T: OperationOptions>(&self, pairs: Vec<Pair>, paths: &[&str]) -> Result<T, Error> {
        self.parse(pairs).map_err(|e| self.fail(T::OPERATION, e.into(), paths))
    }

    fn fail(&self, op: Operation, err: anyhow::Error, paths: &[&str]) -> Error {
        classify(op.name(), err, &self.inner.errors, paths)
    }

    fn unsupported(&self, op: Operation, paths: &[&str]) -> Error {
        Error::new(
            op.name(),
            ErrorKind::Unsupported,
            anyhow!("{} does not support {}", self.inner.backend.backend_type(), op),
            paths,
        )
    }

    fn check_active(op: Operation, seg: &Segment) -> Result<(), Error> {
        if seg.is_active() {
            return Ok(());
        }
        Err(Error::new(
            op.name(),
            ErrorKind::SegmentNotActive,
            anyhow!("segment {} is {:?}", seg.id(), seg.state()),
            &[seg.path()],
        ))
    }

    // ---------- metadata / stat ----------

    /// Storage metadata / 存储元数据
    pub fn metadata(&self, pairs: Vec<Pair>) -> Result<StorageMeta, Error> {
        self.metadata_with_context(&Context::background(), pairs)
    }

    pub fn metadata_with_context(&self, ctx: &Context, pairs: Vec<Pair>) -> Result<StorageMeta, Error> {
        let opts: MetadataOptions = self.parse_for(pairs, &[])?;
        if let Some(err) = ctx.err() {
            return Err(self.fail(Operation::Metadata, err.into(), &[]));
        }
        Ok(self.inner.backend.metadata(&opts))
    }

    /// Total size and object count / 存储用量统计
    pub async fn statistical(&self, pairs: Vec<Pair>) -> Result<StorageStatistic, Error> {
        self.statistical_with_context(&Context::background(), pairs).await
    }

    pub async fn statistical_with_context(&self, ctx: &Context, pairs: Vec<Pair>) -> Result<StorageStatistic, Error> {
        let op = Operation::Statistical;
        let opts: StatisticalOptions = self.parse_for(pairs, &[])?;
        let statister = self
            .inner
            .backend
            .statister()
            .ok_or_else(|| self.unsupported(op, &[]))?;
        tracing::debug!("storager {}: statistical", self.inner.backend.backend_type());
        ctx.run(statister.statistical(&opts))
            .await
            .map_err(|e| self.fail(op, e, &[]))
    }

    pub async fn stat(&self, path: &str, pairs: Vec<Pair>) -> Result<Object, Error> {
        self.stat_with_context(&Context::background(), path, pairs).await
    }

    pub async fn stat_with_context(&self, ctx: &Context, path: &str, pairs: Vec<Pair>) -> Result<Object, Error> {
        let opts: StatOptions = self.parse_for(pairs, &[path])?;
        tracing::debug!("storager {}: stat path={}", self.inner.backend.backend_type(), path);
        ctx.run(self.inner.backend.stat(path, &opts))
            .await
            .map_err(|e| self.fail(Operation::Stat, e, &[path]))
    }

    // ---------- read / write / delete ----------

    /// Copy the object (or the requested range) into `writer`, returns bytes copied / 读取
    pub async fn read<W>(&self, path: &str, writer: &mut W, pairs: Vec<Pair>) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.read_with_context(&Context::background(), path, writer, pairs).await
    }

    pub async fn read_with_context<W>(
        &self,
        ctx: &Context,
        path: &str,
        writer: &mut W,
        pairs: Vec<Pair>,
    ) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let opts: ReadOptions = self.parse_for(pairs, &[path])?;
        tracing::debug!(
            "storager {}: read path={}, offset={:?}, size={:?}",
            self.inner.backend.backend_type(),
            path,
            opts.offset,
            opts.size
        );
        let copied = ctx
            .run(async {
                let mut reader = self.inner.backend.read(path, &opts).await?;
                copy_with_callback(&mut reader, writer, opts.io_callback.as_ref()).await
            })
            .await;
        copied.map_err(|e| self.fail(Operation::Read, e, &[path]))
    }

    /// Store exactly `size` bytes from `reader` at `path` / 写入
    ///
    /// A reader yielding fewer or more bytes fails with
    /// [`ErrorKind::SizeMismatch`] and nothing is written.
    pub async fn write<R>(&self, path: &str, reader: R, size: u64, pairs: Vec<Pair>) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.write_with_context(&Context::background(), path, reader, size, pairs)
            .await
    }

    pub async fn write_with_context<R>(
        &self,
        ctx: &Context,
        path: &str,
        reader: R,
        size: u64,
        pairs: Vec<Pair>,
    ) -> Result<u64, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let opts: WriteOptions = self.parse_for(pairs, &[path])?;
        tracing::debug!("storager {}: write path={}, size={}", self.inner.backend.backend_type(), path, size);
        let written = ctx
            .run(async {
                let data = read_sized(reader, size).await?;
                report_chunks(&data, opts.io_callback.as_ref());
                self.inner.backend.write(path, data, &opts).await
            })
            .await;
        written.map_err(|e| self.fail(Operation::Write, e, &[path]))
    }

    /// Delete an object, or abort an upload when `multipart_id` is given / 删除
    pub async fn delete(&self, path: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        self.delete_with_context(&Context::background(), path, pairs).await
    }

    pub async fn delete_with_context(&self, ctx: &Context, path: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        let opts: DeleteOptions = self.parse_for(pairs, &[path])?;
        tracing::debug!("storager {}: delete path={}", self.inner.backend.backend_type(), path);

        let result = match &opts.multipart_id {
            Some(id) => {
                let multiparter = self
                    .inner
                    .backend
                    .multiparter()
                    .ok_or_else(|| self.unsupported(Operation::Delete, &[path]))?;
                let seg = Segment::new(path, id.clone());
                ctx.run(multiparter.abort_multipart(&seg, &AbortMultipartOptions::default()))
                    .await
            }
            None => ctx.run(self.inner.backend.delete(path, &opts)).await,
        };
        result.map_err(|e| self.fail(Operation::Delete, e, &[path]))
    }

    // ---------- copy / move / fetch / reach ----------

    pub async fn copy(&self, src: &str, dst: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        self.copy_with_context(&Context::background(), src, dst, pairs).await
    }

    pub async fn copy_with_context(&self, ctx: &Context, src: &str, dst: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        let paths = [src, dst];
        let opts: CopyOptions = self.parse_for(pairs, &paths)?;
        let copier = self
            .inner
            .backend
            .copier()
            .ok_or_else(|| self.unsupported(Operation::Copy, &paths))?;
        tracing::debug!("storager {}: copy {} -> {}", self.inner.backend.backend_type(), src, dst);
        ctx.run(copier.copy(src, dst, &opts))
            .await
            .map_err(|e| self.fail(Operation::Copy, e, &paths))
    }

    pub async fn move_object(&self, src: &str, dst: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        self.move_with_context(&Context::background(), src, dst, pairs).await
    }

    pub async fn move_with_context(&self, ctx: &Context, src: &str, dst: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        let paths = [src, dst];
        let opts: MoveOptions = self.parse_for(pairs, &paths)?;
        let mover = self
            .inner
            .backend
            .mover()
            .ok_or_else(|| self.unsupported(Operation::Move, &paths))?;
        tracing::debug!("storager {}: move {} -> {}", self.inner.backend.backend_type(), src, dst);
        ctx.run(mover.move_object(src, dst, &opts))
            .await
            .map_err(|e| self.fail(Operation::Move, e, &paths))
    }

    /// Pull `url` into `path` on the backend side / 远程抓取
    pub async fn fetch(&self, path: &str, url: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        self.fetch_with_context(&Context::background(), path, url, pairs).await
    }

    pub async fn fetch_with_context(&self, ctx: &Context, path: &str, url: &str, pairs: Vec<Pair>) -> Result<(), Error> {
        let paths = [path, url];
        let opts: FetchOptions = self.parse_for(pairs, &paths)?;
        let fetcher = self
            .inner
            .backend
            .fetcher()
            .ok_or_else(|| self.unsupported(Operation::Fetch, &paths))?;
        tracing::debug!("storager {}: fetch {} <- {}", self.inner.backend.backend_type(), path, url);
        ctx.run(fetcher.fetch(path, url, &opts))
            .await
            .map_err(|e| self.fail(Operation::Fetch, e, &paths))
    }

    /// Public URL for `path`; requires the `expire` pair / 生成公开链接
    pub async fn reach(&self, path: &str, pairs: Vec<Pair>) -> Result<String, Error> {
        self.reach_with_context(&Context::background(), path, pairs).await
    }

    pub async fn reach_with_context(&self, ctx: &Context, path: &str, pairs: Vec<Pair>) -> Result<String, Error> {
        let opts: ReachOptions = self.parse_for(pairs, &[path])?;
        let reacher = self
            .inner
            .backend
            .reacher()
            .ok_or_else(|| self.unsupported(Operation::Reach, &[path]))?;
        tracing::debug!("storager {}: reach path={}, expire={}", self.inner.backend.backend_type(), path, opts.expire);
        ctx.run(reacher.reach(path, &opts))
            .await
            .map_err(|e| self.fail(Operation::Reach, e, &[path]))
    }

    // ---------- list ----------

    /// Lazy listing of objects under `path` / 列举对象
    pub async fn list(&self, path: &str, pairs: Vec<Pair>) -> Result<Iter<Object>, Error> {
        self.list_with_context(&Context::background(), path, pairs).await
    }

    pub async fn list_with_context(&self, ctx: &Context, path: &str, pairs: Vec<Pair>) -> Result<Iter<Object>, Error> {
        let opts: ListOptions = self.parse_for(pairs, &[path])?;
        tracing::debug!(
            "storager {}: list path={}, mode={:?}",
            self.inner.backend.backend_type(),
            path,
            opts.list_mode
        );
        let pager = ctx
            .run(self.inner.backend.list(path, &opts))
            .await
            .map_err(|e| self.fail(Operation::List, e, &[path]))?;
        Ok(Iter::new(
            pager,
            ctx.clone(),
            Operation::List.name(),
            &[path],
            self.inner.errors.clone(),
        ))
    }

    // ---------- segments ----------

    /// Start a multipart upload / 创建分片上传
    pub async fn init_segment(&self, path: &str, pairs: Vec<Pair>) -> Result<Segment, Error> {
        self.init_segment_with_context(&Context::background(), path, pairs).await
    }

    pub async fn init_segment_with_context(&self, ctx: &Context, path: &str, pairs: Vec<Pair>) -> Result<Segment, Error> {
        let opts: CreateMultipartOptions = self.parse_for(pairs, &[path])?;
        let multiparter = self
            .inner
            .backend
            .multiparter()
            .ok_or_else(|| self.unsupported(Operation::CreateMultipart, &[path]))?;
        let seg = ctx
            .run(multiparter.create_multipart(path, &opts))
            .await
            .map_err(|e| self.fail(Operation::CreateMultipart, e, &[path]))?;
        tracing::debug!(
            "storager {}: segment created path={}, id={}",
            self.inner.backend.backend_type(),
            path,
            seg.id()
        );
        Ok(seg)
    }

    /// Upload one part; exactly `size` bytes are consumed from `reader` / 上传分片
    pub async fn write_segment_part<R>(
        &self,
        seg: &Segment,
        reader: R,
        index: u32,
        size: u64,
        pairs: Vec<Pair>,
    ) -> Result<Part, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.write_segment_part_with_context(&Context::background(), seg, reader, index, size, pairs)
            .await
    }

    pub async fn write_segment_part_with_context<R>(
        &self,
        ctx: &Context,
        seg: &Segment,
        reader: R,
        index: u32,
        size: u64,
        pairs: Vec<Pair>,
    ) -> Result<Part, Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        let op = Operation::WriteMultipart;
        Self::check_active(op, seg)?;
        let opts: WriteMultipartOptions = self.parse_for(pairs, &[seg.path()])?;
        let multiparter = self
            .inner
            .backend
            .multiparter()
            .ok_or_else(|| self.unsupported(op, &[seg.path()]))?;
        tracing::debug!(
            "storager {}: write part path={}, id={}, index={}, size={}",
            self.inner.backend.backend_type(),
            seg.path(),
            seg.id(),
            index,
            size
        );
        let part = ctx
            .run(async {
                let data = read_sized(reader, size).await?;
                multiparter.write_multipart(seg, data, index, &opts).await
            })
            .await;
        part.map_err(|e| self.fail(op, e, &[seg.path()]))
    }

    /// Assemble the parts; the segment becomes `Completed` / 完成分片上传
    pub async fn complete_segment(&self, seg: &mut Segment, parts: &[Part], pairs: Vec<Pair>) -> Result<(), Error> {
        self.complete_segment_with_context(&Context::background(), seg, parts, pairs)
            .await
    }

    pub async fn complete_segment_with_context(
        &self,
        ctx: &Context,
        seg: &mut Segment,
        parts: &[Part],
        pairs: Vec<Pair>,
    ) -> Result<(), Error> {
        let op = Operation::CompleteMultipart;
        Self::check_active(op, seg)?;
        let opts: CompleteMultipartOptions = self.parse_for(pairs, &[seg.path()])?;
        let multiparter = self
            .inner
            .backend
            .multiparter()
            .ok_or_else(|| self.unsupported(op, &[seg.path()]))?;
        tracing::debug!(
            "storager {}: complete segment path={}, id={}, parts={}",
            self.inner.backend.backend_type(),
            seg.path(),
            seg.id(),
            parts.len()
        );
        ctx.run(multiparter.complete_multipart(seg, parts, &opts))
            .await
            .map_err(|e| self.fail(op, e, &[seg.path()]))?;
        seg.finish(SegmentState::Completed);
        Ok(())
    }

    /// Discard the upload; the segment becomes `Aborted` / 取消分片上传
    pub async fn abort_segment(&self, seg: &mut Segment, pairs: Vec<Pair>) -> Result<(), Error> {
        self.abort_segment_with_context(&Context::background(), seg, pairs).await
    }

    pub async fn abort_segment_with_context(&self, ctx: &Context, seg: &mut Segment, pairs: Vec<Pair>) -> Result<(), Error> {
        let op = Operation::AbortMultipart;
        Self::check_active(op, seg)?;
        let opts: AbortMultipartOptions = self.parse_for(pairs, &[seg.path()])?;
        let multiparter = self
            .inner
            .backend
            .multiparter()
            .ok_or_else(|| self.unsupported(op, &[seg.path()]))?;
        tracing::debug!(
            "storager {}: abort segment path={}, id={}",
            self.inner.backend.backend_type(),
            seg.path(),
            seg.id()
        );
        ctx.run(multiparter.abort_multipart(seg, &opts))
            .await
            .map_err(|e| self.fail(op, e, &[seg.path()]))?;
        seg.finish(SegmentState::Aborted);
        Ok(())
    }

    /// In-flight uploads under `prefix` / 列举进行中的分片上传
    pub async fn list_segments(&self, prefix: &str, pairs: Vec<Pair>) -> Result<Iter<Segment>, Error> {
        self.list_segments_with_context(&Context::background(), prefix, pairs)
            .await
    }

    pub async fn list_segments_with_context(
        &self,
        ctx: &Context,
        prefix: &str,
        pairs: Vec<Pair>,
    ) -> Result<Iter<Segment>, Error> {
        let op = Operation::ListMultipart;
        let opts: ListMultipartOptions = self.parse_for(pairs, &[prefix])?;
        let multiparter = self
            .inner
            .backend
            .multiparter()
            .ok_or_else(|| self.unsupported(op, &[prefix]))?;
        let pager = ctx
            .run(multiparter.list_multipart(prefix, &opts))
            .await
            .map_err(|e| self.fail(op, e, &[prefix]))?;
        Ok(Iter::new(pager, ctx.clone(), op.name(), &[prefix], self.inner.errors.clone()))
    }

    /// Parts already uploaded to `seg` / 列举已上传分片
    pub async fn list_parts(&self, seg: &Segment, pairs: Vec<Pair>) -> Result<Iter<Part>, Error> {
        self.list_parts_with_context(&Context::background(), seg, pairs).await
    }

    pub async fn list_parts_with_context(&self, ctx: &Context, seg: &Segment, pairs: Vec<Pair>) -> Result<Iter<Part>, Error> {
        let op = Operation::ListMultipart;
        Self::check_active(op, seg)?;
        let opts: ListMultipartOptions = self.parse_for(pairs, &[seg.path()])?;
        let multiparter = self
            .inner
            .backend
            .multiparter()
            .ok_or_else(|| self.unsupported(op, &[seg.path()]))?;
        let pager = ctx
            .run(multiparter.list_parts(seg, &opts))
            .await
            .map_err(|e| self.fail(op, e, &[seg.path()]))?;
        Ok(Iter::new(pager, ctx.clone(), op.name(), &[seg.path()], self.inner.errors.clone()))
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Storager {} {{name: {}, work_dir: {}}}",
            self.inner.backend.backend_type(),
            self.inner.config.name,
            self.inner.config.work_dir
        )
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryStorage;
    use crate::error::ServiceError;
    use crate::iterator::BoxPager;
    use crate::pairs;
    use crate::storage::{BoxReader, Reacher};
    use crate::types::{ListMode, ObjectMode};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn memory(page_size: usize) -> (Storage, Arc<MemoryStorage>) {
        memory_with(page_size, StorageConfig::new("test"))
    }

    fn memory_with(page_size: usize, config: StorageConfig) -> (Storage, Arc<MemoryStorage>) {
        let backend = Arc::new(MemoryStorage::new("test", "/").with_page_size(page_size));
        (Storage::new(backend.clone(), config), backend)
    }

    async fn read_all(s: &Storage, path: &str, pairs: Vec<Pair>) -> Result<Vec<u8>, Error> {
        let mut out = Vec::new();
        s.read(path, &mut out, pairs).await?;
        Ok(out)
    }

    #[tokio::test]
    async fn test_write_stat_read_round_trip() {
        let (s, _) = memory(200);
        let n = s.write("a.txt", &b"hello"[..], 5, vec![]).await.unwrap();
        assert_eq!(n, 5);

        let obj = s.stat("a.txt", vec![]).await.unwrap();
        assert_eq!(obj.size, Some(5));
        assert_eq!(obj.mode, ObjectMode::Read);
        assert_eq!(read_all(&s, "a.txt", vec![]).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_range_and_callback() {
        let (s, _) = memory(200);
        s.write("r", &b"0123456789"[..], 10, vec![]).await.unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let data = read_all(
            &s,
            "r",
            vec![
                pairs::with_offset(4),
                pairs::with_size(3),
                pairs::with_io_callback(move |b| {
                    counter.fetch_add(b.len(), Ordering::SeqCst);
                }),
            ],
        )
        .await
        .unwrap();
        assert_eq!(data, b"456");
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_size_mismatch_never_reaches_backend() {
        let (s, backend) = memory(200);
        let err = s.write("short", &b"abc"[..], 5, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        let err = s.write("long", &b"abcdefg"[..], 5, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
        assert_eq!(backend.invocations(), 0);
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let (s, _) = memory(200);
        let err = s.stat("missing", vec![]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.op(), "stat");
        assert_eq!(err.paths(), &["missing".to_string()]);
        assert_eq!(err.downcast_ref::<ServiceError>().unwrap().code, "NoSuchKey");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (s, _) = memory(200);
        s.write("d", &b"x"[..], 1, vec![]).await.unwrap();
        s.delete("d", vec![]).await.unwrap();
        s.delete("d", vec![]).await.unwrap();
        assert!(s.stat("d", vec![]).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_250_over_200_item_pages() {
        let (s, backend) = memory(200);
        for i in 0..250 {
            s.write(&format!("items/{:04}", i), &b"x"[..], 1, vec![]).await.unwrap();
        }
        let before = backend.invocations();
        let mut it = s.list("items/", vec![]).await.unwrap();
        let mut paths = Vec::new();
        while let Some(obj) = it.next().await.unwrap() {
            paths.push(obj.path);
        }
        assert_eq!(paths.len(), 250);
        assert_eq!(paths[0], "items/0000");
        assert_eq!(paths[249], "items/0249");
        // list call + two page fetches
        assert_eq!(backend.invocations() - before, 3);
        for _ in 0..3 {
            assert!(it.next().await.unwrap().is_none());
        }
        assert_eq!(backend.invocations() - before, 3);
    }

    #[tokio::test]
    async fn test_list_dir_mode() {
        let (s, _) = memory(200);
        for path in ["root/a", "root/sub/b", "root/sub/c", "other"] {
            s.write(path, &b"x"[..], 1, vec![]).await.unwrap();
        }
        let objs = s
            .list("root/", vec![pairs::with_list_mode(ListMode::Dir)])
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        let got: Vec<(String, bool)> = objs.into_iter().map(|o| (o.path.clone(), o.is_dir())).collect();
        assert_eq!(got, vec![("root/a".to_string(), false), ("root/sub/".to_string(), true)]);
    }

    #[tokio::test]
    async fn test_two_part_multipart() {
        let (s, _) = memory(200);
        let mut seg = s.init_segment("big", vec![]).await.unwrap();
        assert!(seg.is_active());
        // any order
        let p1 = s.write_segment_part(&seg, &b"world"[..], 1, 5, vec![]).await.unwrap();
        let p0 = s.write_segment_part(&seg, &b"hello "[..], 0, 6, vec![]).await.unwrap();

        let listed = s.list_parts(&seg, vec![]).await.unwrap().collect_all().await.unwrap();
        assert_eq!(listed.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1]);

        s.complete_segment(&mut seg, &[p0, p1], vec![]).await.unwrap();
        assert_eq!(seg.state(), SegmentState::Completed);
        assert_eq!(read_all(&s, "big", vec![]).await.unwrap(), b"hello world");
        assert_eq!(s.stat("big", vec![]).await.unwrap().size, Some(11));
    }

    #[tokio::test]
    async fn test_terminal_segment_makes_no_backend_calls() {
        let (s, backend) = memory(200);
        let mut seg = s.init_segment("x", vec![]).await.unwrap();
        s.abort_segment(&mut seg, vec![]).await.unwrap();
        assert_eq!(seg.state(), SegmentState::Aborted);

        let before = backend.invocations();
        let err = s.write_segment_part(&seg, &b"a"[..], 0, 1, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SegmentNotActive);
        let err = s.complete_segment(&mut seg, &[], vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SegmentNotActive);
        let err = s.abort_segment(&mut seg, vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SegmentNotActive);
        assert_eq!(seg.state(), SegmentState::Aborted);
        assert_eq!(backend.invocations(), before);
    }

    #[tokio::test]
    async fn test_failed_complete_keeps_segment_active() {
        let (s, _) = memory(200);
        let mut seg = s.init_segment("gap", vec![]).await.unwrap();
        let p1 = s.write_segment_part(&seg, &b"b"[..], 1, 1, vec![]).await.unwrap();
        assert!(s.complete_segment(&mut seg, &[p1], vec![]).await.is_err());
        assert!(seg.is_active());
        let p0 = s.write_segment_part(&seg, &b"a"[..], 0, 1, vec![]).await.unwrap();
        let p1 = Part::new(1, 1);
        s.complete_segment(&mut seg, &[p0, p1], vec![]).await.unwrap();
        assert_eq!(read_all(&s, "gap", vec![]).await.unwrap(), b"ab");
    }

    #[tokio::test]
    async fn test_list_segments_and_delete_by_multipart_id() {
        let (s, _) = memory(1);
        let a = s.init_segment("up/a", vec![]).await.unwrap();
        let b = s.init_segment("up/a", vec![]).await.unwrap();
        assert_ne!(a.id(), b.id());
        s.init_segment("elsewhere", vec![]).await.unwrap();

        let segs = s.list_segments("up/", vec![]).await.unwrap().collect_all().await.unwrap();
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|seg| seg.path() == "up/a" && seg.is_active()));

        s.delete("up/a", vec![pairs::with_multipart_id(a.id())]).await.unwrap();
        let segs = s.list_segments("up/", vec![]).await.unwrap().collect_all().await.unwrap();
        assert_eq!(segs, vec![b]);
    }

    #[tokio::test]
    async fn test_statistical_counts_objects() {
        let (s, _) = memory(200);
        assert_eq!(s.statistical(vec![]).await.unwrap(), StorageStatistic::default());
        s.write("a", &b"12345"[..], 5, vec![]).await.unwrap();
        s.write("dir/b", &b"123"[..], 3, vec![]).await.unwrap();
        // uploads in flight are not counted
        let seg = s.init_segment("c", vec![]).await.unwrap();
        s.write_segment_part(&seg, &b"zz"[..], 0, 2, vec![]).await.unwrap();

        let stat = s.statistical(vec![]).await.unwrap();
        assert_eq!((stat.size, stat.count), (8, 2));
        assert!(s.capability().can_statistical);
    }

    #[tokio::test]
    async fn test_copy_and_move() {
        let (s, _) = memory(200);
        s.write("src", &b"data"[..], 4, vec![]).await.unwrap();
        s.copy("src", "copy", vec![]).await.unwrap();
        s.move_object("src", "moved", vec![]).await.unwrap();
        assert!(s.stat("src", vec![]).await.unwrap_err().is_not_found());
        assert_eq!(read_all(&s, "copy", vec![]).await.unwrap(), b"data");
        assert_eq!(read_all(&s, "moved", vec![]).await.unwrap(), b"data");

        let err = s.copy("nope", "x", vec![]).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.paths().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_capability_is_unsupported() {
        let (s, backend) = memory(200);
        let before = backend.invocations();
        let err = s.reach("a", vec![pairs::with_expire(60)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = s.fetch("a", "https://example.com/a", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(backend.invocations(), before);

        let slow = Storage::new(Arc::new(SlowReach { calls: AtomicUsize::new(0) }), StorageConfig::new("slow"));
        let err = slow.statistical(vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.op(), "statistical");
        assert!(!slow.capability().can_statistical);
        assert!(!s.capability().can_reach);
        assert!(s.capability().can_multipart);
    }

    #[tokio::test]
    async fn test_explicit_pairs_beat_defaults() {
        let defaults = DefaultPairs::new().set(Operation::Write, vec![pairs::with_content_type("application/octet-stream")]);
        let (s, _) = memory_with(200, StorageConfig::new("test").with_default_pairs(defaults));

        s.write("explicit", &b"{}"[..], 2, vec![pairs::with_content_type("application/json")])
            .await
            .unwrap();
        s.write("default", &b"{}"[..], 2, vec![]).await.unwrap();
        let explicit = s.stat("explicit", vec![]).await.unwrap();
        let default = s.stat("default", vec![]).await.unwrap();
        assert_eq!(explicit.content_type.as_deref(), Some("application/json"));
        assert_eq!(default.content_type.as_deref(), Some("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_restrictive_policy() {
        let config = StorageConfig::new("test").with_pair_policy(PairPolicy::default().restrict(Operation::Write));
        let (s, backend) = memory_with(200, config);

        let err = s.write("a", &b"x"[..], 1, vec![pairs::with_expire(1)]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairUnsupported);
        assert_eq!(backend.invocations(), 0);
        // other operations stay permissive
        s.delete("a", vec![pairs::with_expire(1)]).await.unwrap();
        // backend-declared keys are not unknown
        let config = StorageConfig::new("test").with_pair_policy(PairPolicy::strict());
        let (s, _) = memory_with(200, config);
        s.list("", vec![Pair::new("memory_page_size", PairValue::Int(5))]).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_pair_type_fails_before_backend() {
        let (s, backend) = memory(200);
        let err = s
            .write("a", &b"x"[..], 1, vec![Pair::new("content_type", PairValue::Int(3))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairInvalid);
        assert_eq!(backend.invocations(), 0);
    }

    #[tokio::test]
    async fn test_content_md5_checked() {
        let (s, _) = memory(200);
        let err = s
            .write("a", &b"hello"[..], 5, vec![pairs::with_content_md5("0000")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        s.write("a", &b"hello"[..], 5, vec![pairs::with_content_md5("5d41402abc4b2a76b9719d911017c592")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_canceled_context() {
        let (s, backend) = memory(200);
        let ctx = Context::background();
        ctx.cancel();
        let err = s.stat_with_context(&ctx, "a", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(backend.invocations(), 0);
    }

    #[test]
    fn test_display() {
        let (s, _) = memory_with(200, StorageConfig::new("bucket").with_work_dir("/data/"));
        assert_eq!(s.to_string(), "Storager memory {name: bucket, work_dir: /data/}");
        let meta = s.metadata(vec![]).unwrap();
        assert_eq!(meta.name, "test");
    }

    /// Reacher that hangs, counting how often it is entered.
    struct SlowReach {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Storager for SlowReach {
        fn backend_type(&self) -> &'static str {
            "slow"
        }

        fn metadata(&self, _opts: &MetadataOptions) -> StorageMeta {
            StorageMeta::new("slow", "/")
        }

        async fn stat(&self, path: &str, _opts: &StatOptions) -> anyhow::Result<Object> {
            Err(ServiceError::new(401, "").with_message(format!("no access to {}", path)).into())
        }

        async fn read(&self, _path: &str, _opts: &ReadOptions) -> anyhow::Result<BoxReader> {
            unimplemented!()
        }

        async fn write(&self, _path: &str, _data: Bytes, _opts: &WriteOptions) -> anyhow::Result<u64> {
            unimplemented!()
        }

        async fn delete(&self, _path: &str, _opts: &DeleteOptions) -> anyhow::Result<()> {
            unimplemented!()
        }

        async fn list(&self, _path: &str, _opts: &ListOptions) -> anyhow::Result<BoxPager<Object>> {
            unimplemented!()
        }

        fn reacher(&self) -> Option<&dyn Reacher> {
            Some(self)
        }
    }

    #[async_trait]
    impl Reacher for SlowReach {
        async fn reach(&self, _path: &str, _opts: &ReachOptions) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("https://example.com".to_string())
        }
    }

    #[tokio::test]
    async fn test_reach_requires_expire() {
        let backend = Arc::new(SlowReach { calls: AtomicUsize::new(0) });
        let s = Storage::new(backend.clone(), StorageConfig::new("slow"));
        let err = s.reach("a", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PairRequired);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deadline_interrupts_backend() {
        let backend = Arc::new(SlowReach { calls: AtomicUsize::new(0) });
        let s = Storage::new(backend.clone(), StorageConfig::new("slow"));
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = s
            .reach_with_context(&ctx, "a", vec![pairs::with_expire(60)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmapped_status_is_unexpected() {
        let s = Storage::new(Arc::new(SlowReach { calls: AtomicUsize::new(0) }), StorageConfig::new("slow"));
        let err = s.stat("a", vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(err.downcast_ref::<ServiceError>().unwrap().status, 401);
    }
}
