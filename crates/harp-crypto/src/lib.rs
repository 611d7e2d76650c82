//! harp-crypto: primitive catalog, value transformers, and container-key material
//!
//! Every value transformation in harp goes through a key string:
//!
//! ```text
//! <algorithm-id>:<payload>
//!   aes-gcm:<b64>            AEAD, output = nonce || ciphertext || tag
//!   jwe:pbes2-hs512-a256kw:<passphrase>
//!   es384:<b64 scalar>       signature, output = u16 len || sig || payload
//!   hash:sha256 | compression:zstd | encoding:base64url
//! ```
//!
//! Key hierarchy for a container:
//! ```text
//! Container Key (256-bit, random or DCKD)
//!   ├── DCKD: HKDF-SHA-512(seed, "harp-dckd" || target)
//!   └── per-recipient KEK: HKDF-SHA-512(ECDH || rpub || epub, "harp-seal-v{n}")
//! ```

pub mod aead;
pub mod b64;
pub mod catalog;
pub mod compression;
pub mod dckd;
pub mod encoding;
pub mod hash;
pub mod jwe;
pub mod keygen;
pub mod keys;
pub mod secret;
pub mod signature;
pub mod transformer;

pub use catalog::{Catalog, Primitive};
pub use dckd::DckdSeed;
pub use jwe::{JweWrapper, KeyManagement};
pub use keys::{hkdf_sha256, hkdf_sha512, ContainerKey};
pub use secret::SecretBuffer;
pub use transformer::{transform, transform_stream, Direction, TransformContext, Transformer};

/// Size of a container key and of a DCKD master seed (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const XNONCE_SIZE: usize = 24;

/// Size of an AES-GCM nonce (96-bit)
pub const GCM_NONCE_SIZE: usize = 12;

/// Size of a Poly1305 / GCM authentication tag
pub const TAG_SIZE: usize = 16;
