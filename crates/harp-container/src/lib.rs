//! harp-container: sealed secret containers
//!
//! Pipeline: bundle → canonical JSON → AEAD under a container key → per-recipient key wrap
//!
//! ```text
//! "HARP" | 0x02 | flags | recip_count | RecipientBlock* | nonce | cipher_len | ciphertext
//!
//! flags: bit0 deterministic (DCKD)
//!        bit1 no container identity
//!        bit2 outer AEAD is AES-256-GCM (else XChaCha20-Poly1305)
//!
//! AAD  = magic || version || flags || recipients
//! KEK  = HKDF-SHA-512(ECDH(e, R) || R || E, "harp-seal-v{n}")
//! ```
//!
//! Identity versions: 1 (X25519 / Ed25519), 2 (P-384 ECDH / ECDSA), and
//! 0 (legacy X25519, unseal only).

pub mod codec;
pub mod identity;
pub mod recipient;
pub mod seal;
pub mod unseal;

pub use codec::{Flags, RecipientBlock, SealedContainer, CONTAINER_VERSION, MAGIC};
pub use identity::{
    identity_new, identity_recover, IdentityFile, IdentityKey, IdentityVersion, KeyWrap, Recipient,
};
pub use seal::{seal, seal_bytes, SealInfo, SealOptions, SealOutcome};
pub use unseal::{unseal, UnsealKey, UnsealOptions};
