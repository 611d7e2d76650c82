//! Collaborator interfaces consumed by the core.
//!
//! The core never opens files or sockets itself. Callers hand it bytes pulled
//! through these helpers, which enforce the shared size cap and the
//! since-first-byte timeout.

use std::io::Read;
use std::time::Duration;

use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{HarpError, HarpResult};

const READ_CHUNK: usize = 64 * 1024;

/// Drain `reader` into memory.
///
/// Fails with `SizeLimitExceeded` as soon as more than `limit` bytes arrive,
/// and with an I/O `TimedOut` error when the stream has not finished within
/// `timeout` of its first byte.
pub async fn read_capped<R>(mut reader: R, limit: u64, timeout: Duration) -> HarpResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];

    // The clock starts with the first byte, not with the call.
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Ok(out);
    }
    out.extend_from_slice(&buf[..n]);
    HarpError::check_size("input stream", out.len() as u64, limit)?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let n = tokio::time::timeout_at(deadline, reader.read(&mut buf))
            .await
            .map_err(|_| {
                HarpError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("input not complete within {}s of first byte", timeout.as_secs()),
                ))
            })??;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
        HarpError::check_size("input stream", out.len() as u64, limit)?;
    }

    tracing::debug!(bytes = out.len(), "input stream drained");
    Ok(out)
}

/// Blocking counterpart of [`read_capped`] for `std::io` readers (no timeout).
pub fn read_capped_sync<R: Read>(reader: R, limit: u64) -> HarpResult<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut out)?;
    HarpError::check_size("input stream", out.len() as u64, limit)?;
    Ok(out)
}

/// Source of interactive secrets (passphrases).
pub trait SecretPrompt {
    /// Ask for a secret. With `confirm`, the secret is asked twice and must
    /// match.
    fn read_secret(&self, prompt: &str, confirm: bool) -> HarpResult<SecretString>;
}

/// Non-interactive prompt that always answers with the same secret.
pub struct FixedPrompt(SecretString);

impl FixedPrompt {
    pub fn new(secret: SecretString) -> Self {
        Self(secret)
    }
}

impl SecretPrompt for FixedPrompt {
    fn read_secret(&self, _prompt: &str, _confirm: bool) -> HarpResult<SecretString> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_read_capped_within_limit() {
        let data = vec![7u8; 1000];
        let out = read_capped(&data[..], 1000, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_read_capped_empty() {
        let out = tokio_test::block_on(read_capped(&b""[..], 10, Duration::from_secs(5))).unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_read_capped_over_limit() {
        let data = vec![0u8; 2048];
        let err = read_capped(&data[..], 1024, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, HarpError::SizeLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_read_capped_times_out_after_first_byte() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"x").await.unwrap();
            // Keep the stream open past the deadline.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(tx);
        });

        let err = read_capped(rx, 1024, Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            HarpError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_read_capped_sync() {
        assert_eq!(read_capped_sync(&b"abc"[..], 3).unwrap(), b"abc");
        assert!(read_capped_sync(&b"abcd"[..], 3).is_err());
    }

    #[test]
    fn test_fixed_prompt() {
        let prompt = FixedPrompt::new(SecretString::from("hunter2"));
        let secret = prompt.read_secret("passphrase", true).unwrap();
        assert_eq!(secret.expose_secret(), "hunter2");
    }
}
