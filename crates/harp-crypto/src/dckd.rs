//! Deterministic container key derivation (DCKD)
//!
//! ```text
//! container key = HKDF-SHA-512(seed, info = "harp-dckd" || target)                      (32 bytes)
//! ephemeral     = HKDF-SHA-512(seed, info = "harp-dckd-ephemeral" || target || rpub)   (per recipient)
//! identity      = HKDF-SHA-512(seed, info = "harp-dckd-container-identity" || target)
//! ```
//!
//! Two sealers holding the same seed and target derive the same key and the
//! same per-recipient ephemerals, which is what makes sealed output
//! byte-identical across machines.

use harp_core::{HarpError, HarpResult};

use crate::keys::{hkdf_sha512, ContainerKey};
use crate::secret::SecretBuffer;
use crate::{b64, KEY_SIZE};

const CONTAINER_KEY_INFO: &[u8] = b"harp-dckd";
const EPHEMERAL_INFO: &[u8] = b"harp-dckd-ephemeral";
const CONTAINER_IDENTITY_INFO: &[u8] = b"harp-dckd-container-identity";

/// A 32-byte DCKD master seed bound to a target string.
pub struct DckdSeed {
    master: SecretBuffer,
    target: String,
}

impl DckdSeed {
    /// Build from raw seed bytes.
    pub fn new(master: SecretBuffer, target: &str) -> HarpResult<Self> {
        if master.len() != KEY_SIZE {
            return Err(HarpError::InvalidMasterKey(format!(
                "seed must be exactly {KEY_SIZE} bytes, got {}",
                master.len()
            )));
        }
        if target.is_empty() {
            return Err(HarpError::input("DCKD target must not be empty"));
        }
        Ok(Self {
            master,
            target: target.to_string(),
        })
    }

    /// Build from the URL-safe base64 master key string.
    pub fn from_key_string(master_b64: &str, target: &str) -> HarpResult<Self> {
        let master = b64::decode_secret(master_b64)
            .map_err(|_| HarpError::InvalidMasterKey("seed is not valid base64url".into()))?;
        Self::new(master, target)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Derive the container key for this target.
    pub fn container_key(&self) -> HarpResult<ContainerKey> {
        let okm = hkdf_sha512(
            self.master.as_bytes(),
            None,
            &[CONTAINER_KEY_INFO, self.target.as_bytes()],
            KEY_SIZE,
        )?;
        ContainerKey::from_buffer(okm)
    }

    /// Derive `len` bytes of ephemeral scalar material for one recipient.
    ///
    /// `counter` lets curve code re-derive when the first candidate is not a
    /// valid scalar; it is omitted from the info string when zero.
    pub fn ephemeral_material(
        &self,
        recipient_pub: &[u8],
        counter: u8,
        len: usize,
    ) -> HarpResult<SecretBuffer> {
        let counter_bytes = [counter];
        let mut info: Vec<&[u8]> = vec![EPHEMERAL_INFO, self.target.as_bytes(), recipient_pub];
        if counter > 0 {
            info.push(&counter_bytes);
        }
        hkdf_sha512(self.master.as_bytes(), None, &info, len)
    }

    /// Seed material for the container identity of a deterministic seal.
    pub fn container_identity_material(&self, counter: u8, len: usize) -> HarpResult<SecretBuffer> {
        hkdf_sha512(
            self.master.as_bytes(),
            None,
            &[CONTAINER_IDENTITY_INFO, self.target.as_bytes(), &[counter]],
            len,
        )
    }
}

impl std::fmt::Debug for DckdSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DckdSeed")
            .field("master", &"[REDACTED]")
            .field("target", &self.target)
            .finish()
    }
}
