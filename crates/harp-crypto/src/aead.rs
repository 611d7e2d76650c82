//! Symmetric AEAD family of the catalog.
//!
//! Nonce-based ciphers emit `[nonce][ciphertext][tag]` with a fresh random
//! nonce per call, the same layout the chunk encryption code has always
//! used. Fernet and PASETO emit their own token text.

use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use aes_siv::{Aes128PmacSivAead, Aes128SivAead, Aes256PmacSivAead, Aes256SivAead};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chacha20poly1305::aead::consts::U12;
use chacha20poly1305::aead::generic_array::typenum::Unsigned;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, Nonce, Payload};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use crypto_secretbox::XSalsa20Poly1305;
use harp_core::{HarpError, HarpResult};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::version4::{LocalToken, V4};
use pasetors::Local;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::secret::SecretBuffer;
use crate::transformer::{TransformContext, Transformer};
use crate::{b64, KEY_SIZE};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// A keyed symmetric cipher from the closed catalog.
pub enum SymmetricCipher {
    AesGcm(SecretBuffer),
    ChaCha20(SecretBuffer),
    XChaCha20(SecretBuffer),
    SecretBox(SecretBuffer),
    AesSiv(SecretBuffer),
    AesPmacSiv(SecretBuffer),
    Fernet(Box<fernet::Fernet>),
    Paseto(Box<SymmetricKey<V4>>),
}

impl SymmetricCipher {
    /// `aes-gcm:<b64>` with a 128, 192 or 256-bit key.
    pub fn aes_gcm(payload: &str) -> HarpResult<Self> {
        let key = b64::decode_secret(payload)?;
        match key.len() {
            16 | 24 | 32 => Ok(Self::AesGcm(key)),
            n => Err(HarpError::key_material(format!(
                "aes-gcm key must be 16, 24 or 32 bytes, got {n}"
            ))),
        }
    }

    pub fn chacha20(payload: &str) -> HarpResult<Self> {
        Ok(Self::ChaCha20(exact_key("chacha20", payload, KEY_SIZE)?))
    }

    pub fn xchacha20(payload: &str) -> HarpResult<Self> {
        Ok(Self::XChaCha20(exact_key("xchacha20", payload, KEY_SIZE)?))
    }

    pub fn secretbox(payload: &str) -> HarpResult<Self> {
        Ok(Self::SecretBox(exact_key("secretbox", payload, KEY_SIZE)?))
    }

    /// `aes-siv:<b64>`: 32 bytes selects AES-128-SIV, 64 bytes AES-256-SIV.
    pub fn aes_siv(payload: &str) -> HarpResult<Self> {
        Ok(Self::AesSiv(siv_key("aes-siv", payload)?))
    }

    pub fn aes_pmac_siv(payload: &str) -> HarpResult<Self> {
        Ok(Self::AesPmacSiv(siv_key("aes-pmac-siv", payload)?))
    }

    /// `fernet:<key>`: 32 bytes of base64url, padded or not.
    pub fn fernet(payload: &str) -> HarpResult<Self> {
        let key = exact_key("fernet", payload, KEY_SIZE)?;
        let canonical = Zeroizing::new(URL_SAFE.encode(key.as_bytes()));
        fernet::Fernet::new(&canonical)
            .map(|f| Self::Fernet(Box::new(f)))
            .ok_or_else(|| HarpError::key_material("fernet key rejected"))
    }

    /// `paseto:<b64>`: a 256-bit PASETO v4.local key.
    pub fn paseto(payload: &str) -> HarpResult<Self> {
        let key = exact_key("paseto", payload, KEY_SIZE)?;
        let sk = SymmetricKey::<V4>::from(key.as_bytes())
            .map_err(|_| HarpError::key_material("paseto key rejected"))?;
        Ok(Self::Paseto(Box::new(sk)))
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::AesGcm(_) => "aes-gcm",
            Self::ChaCha20(_) => "chacha20",
            Self::XChaCha20(_) => "xchacha20",
            Self::SecretBox(_) => "secretbox",
            Self::AesSiv(_) => "aes-siv",
            Self::AesPmacSiv(_) => "aes-pmac-siv",
            Self::Fernet(_) => "fernet",
            Self::Paseto(_) => "paseto",
        }
    }

    pub fn encrypt(&self, aad: &[u8], plaintext: &[u8]) -> HarpResult<Vec<u8>> {
        match self {
            Self::AesGcm(k) => match k.len() {
                16 => seal_with::<Aes128Gcm>(k, aad, plaintext),
                24 => seal_with::<Aes192Gcm>(k, aad, plaintext),
                _ => seal_with::<Aes256Gcm>(k, aad, plaintext),
            },
            Self::ChaCha20(k) => seal_with::<ChaCha20Poly1305>(k, aad, plaintext),
            Self::XChaCha20(k) => seal_with::<XChaCha20Poly1305>(k, aad, plaintext),
            Self::SecretBox(k) => seal_with::<XSalsa20Poly1305>(k, aad, plaintext),
            Self::AesSiv(k) => match k.len() {
                32 => seal_with::<Aes128SivAead>(k, aad, plaintext),
                _ => seal_with::<Aes256SivAead>(k, aad, plaintext),
            },
            Self::AesPmacSiv(k) => match k.len() {
                32 => seal_with::<Aes128PmacSivAead>(k, aad, plaintext),
                _ => seal_with::<Aes256PmacSivAead>(k, aad, plaintext),
            },
            Self::Fernet(f) => Ok(f.encrypt(plaintext).into_bytes()),
            Self::Paseto(sk) => {
                let message = Zeroizing::new(b64::encode(plaintext));
                let implicit = (!aad.is_empty()).then_some(aad);
                LocalToken::encrypt(sk, message.as_bytes(), None, implicit)
                    .map(String::into_bytes)
                    .map_err(|_| HarpError::input("paseto encryption failed"))
            }
        }
    }

    pub fn decrypt(&self, aad: &[u8], data: &[u8]) -> HarpResult<Vec<u8>> {
        match self {
            Self::AesGcm(k) => match k.len() {
                16 => open_with::<Aes128Gcm>(k, aad, data),
                24 => open_with::<Aes192Gcm>(k, aad, data),
                _ => open_with::<Aes256Gcm>(k, aad, data),
            },
            Self::ChaCha20(k) => open_with::<ChaCha20Poly1305>(k, aad, data),
            Self::XChaCha20(k) => open_with::<XChaCha20Poly1305>(k, aad, data),
            Self::SecretBox(k) => open_with::<XSalsa20Poly1305>(k, aad, data),
            Self::AesSiv(k) => match k.len() {
                32 => open_with::<Aes128SivAead>(k, aad, data),
                _ => open_with::<Aes256SivAead>(k, aad, data),
            },
            Self::AesPmacSiv(k) => match k.len() {
                32 => open_with::<Aes128PmacSivAead>(k, aad, data),
                _ => open_with::<Aes256PmacSivAead>(k, aad, data),
            },
            Self::Fernet(f) => {
                let token = std::str::from_utf8(data)
                    .map_err(|_| HarpError::auth("fernet token is not text"))?;
                f.decrypt(token)
                    .map_err(|_| HarpError::auth("fernet token rejected"))
            }
            Self::Paseto(sk) => {
                let token = std::str::from_utf8(data)
                    .map_err(|_| HarpError::auth("paseto token is not text"))?;
                let untrusted = UntrustedToken::<Local, V4>::try_from(token)
                    .map_err(|_| HarpError::auth("malformed paseto token"))?;
                let implicit = (!aad.is_empty()).then_some(aad);
                let trusted = LocalToken::decrypt(sk, &untrusted, None, implicit)
                    .map_err(|_| HarpError::auth("paseto token rejected"))?;
                b64::decode(trusted.payload())
                    .map_err(|_| HarpError::auth("paseto payload is not base64url"))
            }
        }
    }
}

impl Transformer for SymmetricCipher {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.encrypt(ctx.aad(), input)
    }

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.decrypt(ctx.aad(), input)
    }
}

impl std::fmt::Debug for SymmetricCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricCipher")
            .field("algorithm", &self.algorithm())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn exact_key(id: &str, payload: &str, len: usize) -> HarpResult<SecretBuffer> {
    let key = b64::decode_secret(payload)?;
    if key.len() != len {
        return Err(HarpError::key_material(format!(
            "{id} key must be {len} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

fn siv_key(id: &str, payload: &str) -> HarpResult<SecretBuffer> {
    let key = b64::decode_secret(payload)?;
    match key.len() {
        32 | 64 => Ok(key),
        n => Err(HarpError::key_material(format!(
            "{id} key must be 32 or 64 bytes, got {n}"
        ))),
    }
}

/// Encrypt with a random nonce: `[nonce][ciphertext][tag]`
fn seal_with<A>(key: &SecretBuffer, aad: &[u8], plaintext: &[u8]) -> HarpResult<Vec<u8>>
where
    A: Aead + AeadCore + KeyInit,
{
    let cipher = A::new_from_slice(key.as_bytes())
        .map_err(|_| HarpError::key_material("key length rejected by cipher"))?;

    let mut nonce = Nonce::<A>::default();
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| HarpError::input("encryption failed"))?;

    let mut result = Vec::with_capacity(nonce.len() + ciphertext.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt the output of [`seal_with`].
fn open_with<A>(key: &SecretBuffer, aad: &[u8], data: &[u8]) -> HarpResult<Vec<u8>>
where
    A: Aead + AeadCore + KeyInit,
{
    let nonce_len = A::NonceSize::to_usize();
    let tag_len = A::TagSize::to_usize();
    if data.len() < nonce_len + tag_len {
        return Err(HarpError::auth(format!(
            "ciphertext too short: {} bytes (minimum {})",
            data.len(),
            nonce_len + tag_len
        )));
    }

    let (nonce, ciphertext) = data.split_at(nonce_len);
    let cipher = A::new_from_slice(key.as_bytes())
        .map_err(|_| HarpError::key_material("key length rejected by cipher"))?;

    cipher
        .decrypt(Nonce::<A>::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| HarpError::auth("invalid key, corrupted data, or associated data mismatch"))
}
