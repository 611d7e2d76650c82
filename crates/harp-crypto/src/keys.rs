//! Container key and HKDF helpers.

use hkdf::Hkdf;
use harp_core::{HarpError, HarpResult};
use secrecy::SecretString;
use sha2::{Sha256, Sha512};

use crate::secret::SecretBuffer;
use crate::{b64, KEY_SIZE};

/// The 256-bit symmetric key protecting a container payload.
///
/// Held in locked memory, zeroized on drop, never serialized into a
/// container. Single owner: there is deliberately no `Clone`.
pub struct ContainerKey {
    buf: SecretBuffer,
}

impl ContainerKey {
    /// Draw a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        Self {
            buf: SecretBuffer::random(KEY_SIZE),
        }
    }

    /// Adopt an existing secret buffer, which must be exactly 32 bytes.
    pub fn from_buffer(buf: SecretBuffer) -> HarpResult<Self> {
        if buf.len() != KEY_SIZE {
            return Err(HarpError::key_material(format!(
                "container key must be {KEY_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        Ok(Self { buf })
    }

    /// Parse the URL-safe base64 form produced by [`ContainerKey::to_key_string`].
    pub fn from_key_string(text: &str) -> HarpResult<Self> {
        Self::from_buffer(b64::decode_secret(text)?)
    }

    /// Export as URL-safe base64 (for `unseal --key`).
    pub fn to_key_string(&self) -> SecretString {
        SecretString::from(b64::encode(self.buf.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }
}

impl std::fmt::Debug for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// HKDF-SHA-512 extract-and-expand of `out_len` bytes.
///
/// `info` parts are concatenated in order.
pub fn hkdf_sha512(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[&[u8]],
    out_len: usize,
) -> HarpResult<SecretBuffer> {
    let hkdf = Hkdf::<Sha512>::new(salt, ikm);
    let mut okm = SecretBuffer::zeroed(out_len);
    hkdf.expand_multi_info(info, okm.as_mut_bytes())
        .map_err(|e| HarpError::key_material(format!("HKDF-SHA-512 expand failed: {e}")))?;
    Ok(okm)
}

/// HKDF-SHA-256 variant, kept for the legacy identity scheme.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: Option<&[u8]>,
    info: &[&[u8]],
    out_len: usize,
) -> HarpResult<SecretBuffer> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = SecretBuffer::zeroed(out_len);
    hkdf.expand_multi_info(info, okm.as_mut_bytes())
        .map_err(|e| HarpError::key_material(format!("HKDF-SHA-256 expand failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_container_key_generation() {
        let k1 = ContainerKey::generate();
        let k2 = ContainerKey::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
        assert_eq!(k1.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_key_string_roundtrip() {
        let key = ContainerKey::generate();
        let text = key.to_key_string();
        let parsed = ContainerKey::from_key_string(text.expose_secret()).unwrap();
        assert_eq!(key.as_bytes(), parsed.as_bytes());
    }

    #[test]
    fn test_key_string_wrong_length() {
        let err = ContainerKey::from_key_string(&b64::encode(&[1u8; 16])).unwrap_err();
        assert!(matches!(err, HarpError::InvalidKeyMaterial(_)));
    }

    #[test]
    fn test_hkdf_different_info() {
        let a = hkdf_sha512(&[42u8; 32], None, &[b"harp-a"], 32).unwrap();
        let b = hkdf_sha512(&[42u8; 32], None, &[b"harp-b"], 32).unwrap();
        assert_ne!(a, b, "different domains must produce different keys");
    }

    #[test]
    fn test_hkdf_multi_info_is_concatenation() {
        let split = hkdf_sha512(&[7u8; 32], None, &[b"harp-", b"dckd"], 32).unwrap();
        let joined = hkdf_sha512(&[7u8; 32], None, &[b"harp-dckd"], 32).unwrap();
        assert_eq!(split, joined);
    }

    #[test]
    fn test_debug_is_redacted() {
        let dbg = format!("{:?}", ContainerKey::generate());
        assert!(dbg.contains("REDACTED"));
    }
}
