//! harp-bundle: the plaintext side of a container
//!
//! - `model`: Bundle → Package → SecretChain, canonical bytes, validation
//! - `protect`: in-bundle value encryption driven by package annotations

pub mod model;
pub mod protect;

pub use model::{Bundle, KeyValue, Package, SecretChain, BUNDLE_VERSION};
pub use protect::{decrypt, encrypt, ProtectionOptions, ENCRYPTION_KEY_ALIAS};
