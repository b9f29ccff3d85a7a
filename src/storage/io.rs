//! IO helpers shared by the facade and the backends / IO辅助函数

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ServiceError, SizeMismatch};
use crate::options::IoCallback;

const CHUNK_SIZE: usize = 64 * 1024;

/// Read exactly `size` bytes into memory / 读取指定长度数据
///
/// One extra byte is requested so an over-long reader is detected without
/// draining it.
pub async fn read_sized<R>(reader: R, size: u64) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(size.min(8 * 1024 * 1024) as usize);
    reader.take(size.saturating_add(1)).read_to_end(&mut buf).await?;
    let actual = buf.len() as u64;
    if actual != size {
        return Err(SizeMismatch { expected: size, actual }.into());
    }
    Ok(Bytes::from(buf))
}

/// Copy reader to writer, reporting each chunk / 复制并回调进度
pub async fn copy_with_callback<R, W>(reader: &mut R, writer: &mut W, callback: Option<&IoCallback>) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        if let Some(cb) = callback {
            cb(&buf[..n]);
        }
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Feed `data` to the callback in read-sized chunks / 按块回调
pub fn report_chunks(data: &[u8], callback: Option<&IoCallback>) {
    if let Some(cb) = callback {
        for chunk in data.chunks(CHUNK_SIZE) {
            cb(chunk);
        }
    }
}

/// Clamp an `offset`/`size` request to a content length / 计算读取范围
pub fn clamp_range(offset: Option<i64>, size: Option<i64>, len: u64) -> (u64, u64) {
    let start = offset.unwrap_or(0).max(0) as u64;
    let start = start.min(len);
    let end = match size {
        Some(size) if size >= 0 => start.saturating_add(size as u64).min(len),
        _ => len,
    };
    (start, end)
}

/// Check data against a hex or base64 MD5 / 校验MD5
pub fn verify_md5(data: &[u8], expected: &str) -> Result<()> {
    let digest = md5::compute(data);
    let hex = format!("{:x}", digest);
    let b64 = BASE64.encode(digest.0);
    if expected.eq_ignore_ascii_case(&hex) || expected == b64 {
        return Ok(());
    }
    Err(ServiceError::new(400, "BadDigest")
        .with_message(format!("content md5 {} does not match {}", hex, expected))
        .into())
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// HTTP GET a remote URL into memory / 下载远程内容
pub async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<Bytes> {
    let parsed = url::Url::parse(url).map_err(|e| anyhow!("invalid fetch url {}: {}", url, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("unsupported fetch scheme: {}", parsed.scheme()));
    }

    tracing::debug!("fetch: GET {}", parsed);
    let resp = client.get(parsed).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ServiceError::new(status.as_u16(), "")
            .with_message(format!("fetch {} failed", url))
            .into());
    }
    Ok(resp.bytes().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_sized_exact() {
        let data = read_sized(&b"hello"[..], 5).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_sized_short_and_long() {
        let err = read_sized(&b"hel"[..], 5).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<SizeMismatch>(),
            Some(&SizeMismatch { expected: 5, actual: 3 })
        );
        let err = read_sized(&b"hello world"[..], 5).await.unwrap_err();
        assert_eq!(err.downcast_ref::<SizeMismatch>().unwrap().actual, 6);
    }

    #[tokio::test]
    async fn test_copy_with_callback_counts() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let cb: IoCallback = Arc::new(move |b: &[u8]| {
            counter.fetch_add(b.len(), Ordering::SeqCst);
        });
        let mut out = Vec::new();
        let n = copy_with_callback(&mut &b"abcdef"[..], &mut out, Some(&cb)).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(out, b"abcdef");
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(None, None, 10), (0, 10));
        assert_eq!(clamp_range(Some(3), None, 10), (3, 10));
        assert_eq!(clamp_range(Some(3), Some(4), 10), (3, 7));
        assert_eq!(clamp_range(Some(8), Some(4), 10), (8, 10));
        assert_eq!(clamp_range(Some(20), None, 10), (10, 10));
    }

    #[test]
    fn test_verify_md5() {
        // md5("hello")
        assert!(verify_md5(b"hello", "5d41402abc4b2a76b9719d911017c592").is_ok());
        assert!(verify_md5(b"hello", "XUFAKrxLKna5cZ2REBfFkg==").is_ok());
        let err = verify_md5(b"hello", "00").unwrap_err();
        assert_eq!(err.downcast_ref::<ServiceError>().unwrap().code, "BadDigest");
    }
}
