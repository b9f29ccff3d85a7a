//! Paginated listing iterator / 分页列举迭代器
//!
//! A backend exposes a listing as a [`Pager`] that fetches one page for a
//! cursor. [`Iter`] buffers pages and hands out items one at a time, fetching
//! the next page only when the buffer runs dry.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{self, Stream};

use crate::context::Context;
use crate::error::{classify, Error, ErrorTable};

/// One page of a listing / 一页数据
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page, `None` when this is the last / 下一页游标
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>) -> Self {
        Self { items, next }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Fetches pages for a listing / 分页拉取
#[async_trait]
pub trait Pager<T>: Send + Sync {
    /// `cursor` is `None` for the first page.
    async fn next_page(&self, ctx: &Context, cursor: Option<&str>) -> anyhow::Result<Page<T>>;
}

pub type BoxPager<T> = Box<dyn Pager<T>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Start,
    Token(String),
    End,
}

/// Lazy, non-rewinding iterator over a paginated listing / 惰性迭代器
pub struct Iter<T> {
    pager: BoxPager<T>,
    ctx: Context,
    op: &'static str,
    paths: Vec<String>,
    errors: Arc<ErrorTable>,
    buffer: VecDeque<T>,
    cursor: Cursor,
}

impl<T: Send + 'static> Iter<T> {
    pub fn new(pager: BoxPager<T>, ctx: Context, op: &'static str, paths: &[&str], errors: Arc<ErrorTable>) -> Self {
        Self {
            pager,
            ctx,
            op,
            paths: paths.iter().map(|p| p.to_string()).collect(),
            errors,
            buffer: VecDeque::new(),
            cursor: Cursor::Start,
        }
    }

    /// Next item, `Ok(None)` once the listing is exhausted / 下一项
    ///
    /// A failed page fetch leaves the cursor where it was, so calling again
    /// retries the same page. A pager that answers with the cursor it was
    /// given cannot make progress; that page fails with
    /// [`ErrorKind::Unexpected`](crate::error::ErrorKind::Unexpected) and its
    /// items are dropped.
    pub async fn next(&mut self) -> Result<Option<T>, Error> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            let token = match &self.cursor {
                Cursor::End => return Ok(None),
                Cursor::Start => None,
                Cursor::Token(token) => Some(token.as_str()),
            };

            let page = self
                .ctx
                .run(self.pager.next_page(&self.ctx, token))
                .await
                .map_err(|e| self.normalize(e))?;

            let next = match page.next {
                Some(next) if token == Some(next.as_str()) => {
                    return Err(self.normalize(anyhow!("{} pager repeated cursor {:?}", self.op, next)));
                }
                Some(next) => Cursor::Token(next),
                None => Cursor::End,
            };
            tracing::debug!("{} page: {} items, next={:?}", self.op, page.items.len(), next);
            self.buffer.extend(page.items);
            self.cursor = next;
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor == Cursor::End && self.buffer.is_empty()
    }

    /// Drain the rest of the listing / 读取全部
    pub async fn collect_all(mut self) -> Result<Vec<T>, Error> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }

    /// Adapt to a [`Stream`]; the stream ends after yielding an error / 转换为流
    pub fn into_stream(self) -> impl Stream<Item = Result<T, Error>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut iter = state?;
            match iter.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(iter))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    fn normalize(&self, err: anyhow::Error) -> Error {
        let paths: Vec<&str> = self.paths.iter().map(String::as_str).collect();
        classify(self.op, err, &self.errors, &paths)
    }
}

/// Map every item of a pager / 映射分页结果
pub struct MapPager<A, B, F> {
    inner: BoxPager<A>,
    f: F,
    _marker: PhantomData<fn() -> B>,
}

impl<A, B, F> MapPager<A, B, F>
where
    F: Fn(A) -> B + Send + Sync,
{
    pub fn new(inner: BoxPager<A>, f: F) -> Self {
        Self {
            inner,
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A, B, F> Pager<B> for MapPager<A, B, F>
where
    A: Send + 'static,
    B: Send + 'static,
    F: Fn(A) -> B + Send + Sync,
{
    async fn next_page(&self, ctx: &Context, cursor: Option<&str>) -> anyhow::Result<Page<B>> {
        let page = self.inner.next_page(ctx, cursor).await?;
        Ok(Page::new(page.items.into_iter().map(&self.f).collect(), page.next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ServiceError};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `total` numbers in pages of `page_size`, optionally failing once.
    struct Numbers {
        total: usize,
        page_size: usize,
        calls: Arc<AtomicUsize>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl Pager<usize> for Numbers {
        async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> anyhow::Result<Page<usize>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_call == Some(call) {
                return Err(ServiceError::new(503, "SlowDown").into());
            }
            let start = cursor.map(str::parse::<usize>).transpose()?.unwrap_or(0);
            let end = (start + self.page_size).min(self.total);
            let next = (end < self.total).then(|| end.to_string());
            Ok(Page::new((start..end).collect(), next))
        }
    }

    fn iter(total: usize, page_size: usize, fail_on_call: Option<usize>) -> (Iter<usize>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let pager = Numbers {
            total,
            page_size,
            calls: calls.clone(),
            fail_on_call,
        };
        let it = Iter::new(
            Box::new(pager),
            Context::background(),
            "list",
            &["prefix/"],
            Arc::new(ErrorTable::new()),
        );
        (it, calls)
    }

    #[tokio::test]
    async fn test_yields_in_page_order() {
        let (it, calls) = iter(250, 200, None);
        let items = it.collect_all().await.unwrap();
        assert_eq!(items, (0..250).collect::<Vec<_>>());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_idempotent() {
        let (mut it, calls) = iter(3, 2, None);
        for _ in 0..3 {
            assert!(it.next().await.unwrap().is_some());
        }
        assert!(it.next().await.unwrap().is_none());
        assert!(it.is_done());
        let before = calls.load(Ordering::SeqCst);
        for _ in 0..5 {
            assert!(it.next().await.unwrap().is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_error_keeps_cursor() {
        // second page fetch fails once
        let (mut it, _) = iter(4, 2, Some(1));
        assert_eq!(it.next().await.unwrap(), Some(0));
        assert_eq!(it.next().await.unwrap(), Some(1));
        let err = it.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(err.op(), "list");
        // retry re-issues the same page
        assert_eq!(it.next().await.unwrap(), Some(2));
        assert_eq!(it.next().await.unwrap(), Some(3));
        assert_eq!(it.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let (mut it, calls) = iter(0, 10, None);
        assert_eq!(it.next().await.unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_canceled_context() {
        let (mut it, calls) = iter(10, 2, None);
        it.ctx.cancel();
        let err = it.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_stops_after_error() {
        let (it, _) = iter(6, 2, Some(1));
        let items: Vec<_> = it.into_stream().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[2].is_err());
    }

    /// Always hands back the cursor it was asked for.
    struct Stuck;

    #[async_trait]
    impl Pager<usize> for Stuck {
        async fn next_page(&self, _ctx: &Context, cursor: Option<&str>) -> anyhow::Result<Page<usize>> {
            Ok(Page::new(vec![1], Some(cursor.unwrap_or("same").to_string())))
        }
    }

    #[tokio::test]
    async fn test_repeated_cursor_is_unexpected() {
        let mut it = Iter::new(Box::new(Stuck), Context::background(), "list", &["p/"], Arc::new(ErrorTable::new()));
        assert_eq!(it.next().await.unwrap(), Some(1));
        let err = it.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(err.paths(), &["p/".to_string()]);
        assert!(!it.is_done());
    }

    #[tokio::test]
    async fn test_map_pager() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Numbers {
            total: 3,
            page_size: 2,
            calls,
            fail_on_call: None,
        };
        let mapped = MapPager::new(Box::new(inner), |n: usize| n * 10);
        let it = Iter::new(Box::new(mapped), Context::background(), "list", &[], Arc::new(ErrorTable::new()));
        assert_eq!(it.collect_all().await.unwrap(), vec![0, 10, 20]);
    }
}
