//! Scoped secret buffers.
//!
//! Container keys, unwrapped private keys, and derived KEKs live in a
//! [`SecretBuffer`]: a fixed-size heap region, locked in memory where the
//! platform allows it, single-owner, and zeroized before it is released.

use rand::RngCore;
use zeroize::Zeroize;

/// Fixed-length secret bytes. Never cloned, never resized, zeroized on drop.
pub struct SecretBuffer {
    bytes: Box<[u8]>,
    locked: bool,
}

impl SecretBuffer {
    /// Allocate `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        let bytes = vec![0u8; len].into_boxed_slice();
        let locked = lock(&bytes);
        Self { bytes, locked }
    }

    /// Copy `data` into a fresh buffer. The caller remains responsible for
    /// wiping its own copy.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = Self::zeroed(data.len());
        buf.bytes.copy_from_slice(data);
        buf
    }

    /// `len` bytes from the OS CSPRNG.
    pub fn random(len: usize) -> Self {
        let mut buf = Self::zeroed(len);
        rand::rngs::OsRng.fill_bytes(&mut buf.bytes);
        buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            unlock(&self.bytes);
        }
    }
}

impl std::fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for SecretBuffer {
    fn eq(&self, other: &Self) -> bool {
        ct_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for SecretBuffer {}

/// Length-revealing, content-constant-time comparison.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(unix)]
fn lock(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length describe a live allocation owned by the
    // caller for at least the duration of the call.
    let ret = unsafe { libc::mlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if ret != 0 {
        tracing::trace!("mlock failed: {}", std::io::Error::last_os_error());
        return false;
    }
    true
}

#[cfg(unix)]
fn unlock(bytes: &[u8]) {
    // SAFETY: same allocation that was passed to `lock`.
    let ret = unsafe { libc::munlock(bytes.as_ptr() as *const libc::c_void, bytes.len()) };
    if ret != 0 {
        tracing::trace!("munlock failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn lock(_bytes: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock(_bytes: &[u8]) {}
