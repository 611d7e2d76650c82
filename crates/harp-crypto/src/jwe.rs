//! JWE compact serialization with AES key wrap or PBES2 key management
//! (`jwe:a256kw:<b64 key>`, `jwe:pbes2-hs512-a256kw:<passphrase>`).
//!
//! Content is always encrypted with A256GCM under a fresh CEK. The CEK is
//! wrapped with AES-KW under either the given key or a PBKDF2-derived one.
//! Caller AAD is bound the way RFC 7516 binds JSON-serialization `aad`:
//! `b64(header) || '.' || b64(aad)`.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_kw::{KekAes128, KekAes192, KekAes256};
use harp_core::{HarpError, HarpResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::b64;
use crate::secret::SecretBuffer;
use crate::transformer::{TransformContext, Transformer};

/// Default PBES2 iteration count for new tokens.
pub const DEFAULT_PBES2_ITERATIONS: u32 = 600_000;
/// Accepted `p2c` range when opening a token.
pub const MIN_PBES2_ITERATIONS: u32 = 1_000;
pub const MAX_PBES2_ITERATIONS: u32 = 10_000_000;

const CONTENT_ENCRYPTION: &str = "A256GCM";
const CEK_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const P2S_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyManagement {
    A128Kw,
    A192Kw,
    A256Kw,
    Pbes2Hs256A128Kw,
    Pbes2Hs384A192Kw,
    Pbes2Hs512A256Kw,
}

impl KeyManagement {
    fn from_name(name: &str) -> HarpResult<Self> {
        let km = match name.to_ascii_lowercase().as_str() {
            "a128kw" => Self::A128Kw,
            "a192kw" => Self::A192Kw,
            "a256kw" => Self::A256Kw,
            "pbes2-hs256-a128kw" => Self::Pbes2Hs256A128Kw,
            "pbes2-hs384-a192kw" => Self::Pbes2Hs384A192Kw,
            "pbes2-hs512-a256kw" => Self::Pbes2Hs512A256Kw,
            other => return Err(HarpError::UnsupportedPrimitive(format!("jwe:{other}"))),
        };
        Ok(km)
    }

    /// The JOSE `alg` header value.
    pub fn header_alg(&self) -> &'static str {
        match self {
            Self::A128Kw => "A128KW",
            Self::A192Kw => "A192KW",
            Self::A256Kw => "A256KW",
            Self::Pbes2Hs256A128Kw => "PBES2-HS256+A128KW",
            Self::Pbes2Hs384A192Kw => "PBES2-HS384+A192KW",
            Self::Pbes2Hs512A256Kw => "PBES2-HS512+A256KW",
        }
    }

    fn kek_len(&self) -> usize {
        match self {
            Self::A128Kw | Self::Pbes2Hs256A128Kw => 16,
            Self::A192Kw | Self::Pbes2Hs384A192Kw => 24,
            Self::A256Kw | Self::Pbes2Hs512A256Kw => 32,
        }
    }

    fn is_pbes2(&self) -> bool {
        matches!(
            self,
            Self::Pbes2Hs256A128Kw | Self::Pbes2Hs384A192Kw | Self::Pbes2Hs512A256Kw
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    enc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    p2s: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p2c: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cty: Option<String>,
}

/// A JWE key-management configuration plus its secret (AES-KW key or
/// passphrase).
pub struct JweWrapper {
    alg: KeyManagement,
    secret: SecretBuffer,
    iterations: u32,
    content_type: Option<String>,
}

impl JweWrapper {
    /// Parse the part after `jwe:`.
    pub fn parse(payload: &str) -> HarpResult<Self> {
        let (name, secret) = payload.split_once(':').ok_or_else(|| {
            HarpError::input("jwe key must look like jwe:<algorithm>:<secret>")
        })?;
        let alg = KeyManagement::from_name(name)?;
        if alg.is_pbes2() {
            Self::pbes2(alg, secret.as_bytes())
        } else {
            Self::key_wrap(alg, b64::decode_secret(secret)?)
        }
    }

    /// AES key wrap with a raw key of the algorithm's size.
    pub fn key_wrap(alg: KeyManagement, key: SecretBuffer) -> HarpResult<Self> {
        if alg.is_pbes2() {
            return Err(HarpError::input("PBES2 algorithms take a passphrase"));
        }
        if key.len() != alg.kek_len() {
            return Err(HarpError::key_material(format!(
                "{} key must be {} bytes, got {}",
                alg.header_alg(),
                alg.kek_len(),
                key.len()
            )));
        }
        Ok(Self {
            alg,
            secret: key,
            iterations: DEFAULT_PBES2_ITERATIONS,
            content_type: None,
        })
    }

    /// Passphrase-based key management.
    pub fn pbes2(alg: KeyManagement, passphrase: &[u8]) -> HarpResult<Self> {
        if !alg.is_pbes2() {
            return Err(HarpError::input("AES-KW algorithms take a raw key"));
        }
        if passphrase.is_empty() {
            return Err(HarpError::key_material("PBES2 passphrase must not be empty"));
        }
        Ok(Self {
            alg,
            secret: SecretBuffer::from_slice(passphrase),
            iterations: DEFAULT_PBES2_ITERATIONS,
            content_type: None,
        })
    }

    /// Override the PBKDF2 iteration count used for new tokens.
    pub fn with_iterations(mut self, iterations: u32) -> HarpResult<Self> {
        check_iterations(iterations)?;
        self.iterations = iterations;
        Ok(self)
    }

    /// Set the `cty` header of produced tokens.
    pub fn with_content_type(mut self, cty: &str) -> Self {
        self.content_type = Some(cty.to_string());
        self
    }

    pub fn key_management(&self) -> KeyManagement {
        self.alg
    }

    /// Encrypt `plaintext` into a compact JWE.
    pub fn encrypt(&self, aad: &[u8], plaintext: &[u8]) -> HarpResult<String> {
        let mut header = Header {
            alg: self.alg.header_alg().to_string(),
            enc: CONTENT_ENCRYPTION.to_string(),
            p2s: None,
            p2c: None,
            cty: self.content_type.clone(),
        };

        let kek = if self.alg.is_pbes2() {
            let mut p2s = [0u8; P2S_LEN];
            rand::rngs::OsRng.fill_bytes(&mut p2s);
            header.p2s = Some(b64::encode(&p2s));
            header.p2c = Some(self.iterations);
            self.derive_kek(&p2s, self.iterations)
        } else {
            SecretBuffer::from_slice(self.secret.as_bytes())
        };

        let cek = SecretBuffer::random(CEK_LEN);
        let encrypted_key = wrap_key(&kek, cek.as_bytes())?;

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| HarpError::input(format!("JWE header: {e}")))?;
        let header_b64 = b64::encode(&header_json);

        let mut iv = [0u8; IV_LEN];
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(cek.as_bytes())
            .map_err(|_| HarpError::key_material("CEK length rejected"))?;
        let protected_aad = content_aad(&header_b64, aad);
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext,
                    aad: protected_aad.as_bytes(),
                },
            )
            .map_err(|_| HarpError::input("JWE content encryption failed"))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{header_b64}.{}.{}.{}.{}",
            b64::encode(&encrypted_key),
            b64::encode(&iv),
            b64::encode(&sealed),
            b64::encode(&tag)
        ))
    }

    /// Open a compact JWE produced with the same key management.
    pub fn decrypt(&self, aad: &[u8], token: &str) -> HarpResult<Vec<u8>> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        let [header_b64, ek_b64, iv_b64, ct_b64, tag_b64] = parts[..] else {
            return Err(HarpError::auth("JWE compact serialization must have 5 parts"));
        };

        let header_json = b64::decode(header_b64).map_err(|_| malformed())?;
        let header: Header = serde_json::from_slice(&header_json).map_err(|_| malformed())?;
        if header.alg != self.alg.header_alg() {
            return Err(HarpError::auth(format!(
                "JWE alg {} does not match expected {}",
                header.alg,
                self.alg.header_alg()
            )));
        }
        if header.enc != CONTENT_ENCRYPTION {
            return Err(HarpError::UnsupportedPrimitive(format!("JWE enc {}", header.enc)));
        }

        let kek = if self.alg.is_pbes2() {
            let p2s = header
                .p2s
                .as_deref()
                .ok_or_else(|| HarpError::auth("PBES2 token without p2s"))?;
            let p2s = b64::decode(p2s).map_err(|_| malformed())?;
            let p2c = header
                .p2c
                .ok_or_else(|| HarpError::auth("PBES2 token without p2c"))?;
            check_iterations(p2c)?;
            self.derive_kek(&p2s, p2c)
        } else {
            SecretBuffer::from_slice(self.secret.as_bytes())
        };

        let encrypted_key = b64::decode(ek_b64).map_err(|_| malformed())?;
        let cek = unwrap_key(&kek, &encrypted_key)?;

        let iv = b64::decode(iv_b64).map_err(|_| malformed())?;
        if iv.len() != IV_LEN {
            return Err(malformed());
        }
        let mut sealed = b64::decode(ct_b64).map_err(|_| malformed())?;
        let tag = b64::decode(tag_b64).map_err(|_| malformed())?;
        if tag.len() != TAG_LEN {
            return Err(malformed());
        }
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new_from_slice(cek.as_bytes())
            .map_err(|_| HarpError::auth("unwrapped CEK has the wrong length"))?;
        let protected_aad = content_aad(header_b64, aad);
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: protected_aad.as_bytes(),
                },
            )
            .map_err(|_| HarpError::auth("JWE content authentication failed"))
    }

    fn derive_kek(&self, p2s: &[u8], iterations: u32) -> SecretBuffer {
        // salt = UTF8(alg) || 0x00 || p2s
        let alg = self.alg.header_alg().as_bytes();
        let mut salt = Vec::with_capacity(alg.len() + 1 + p2s.len());
        salt.extend_from_slice(alg);
        salt.push(0);
        salt.extend_from_slice(p2s);

        let mut kek = SecretBuffer::zeroed(self.alg.kek_len());
        let pass = self.secret.as_bytes();
        match self.alg {
            KeyManagement::Pbes2Hs256A128Kw => {
                pbkdf2_hmac::<Sha256>(pass, &salt, iterations, kek.as_mut_bytes())
            }
            KeyManagement::Pbes2Hs384A192Kw => {
                pbkdf2_hmac::<Sha384>(pass, &salt, iterations, kek.as_mut_bytes())
            }
            _ => pbkdf2_hmac::<Sha512>(pass, &salt, iterations, kek.as_mut_bytes()),
        }
        kek
    }
}

impl Transformer for JweWrapper {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.encrypt(ctx.aad(), input).map(String::into_bytes)
    }

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        let token =
            std::str::from_utf8(input).map_err(|_| HarpError::auth("JWE token is not text"))?;
        self.decrypt(ctx.aad(), token)
    }
}

impl std::fmt::Debug for JweWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JweWrapper")
            .field("alg", &self.alg.header_alg())
            .field("iterations", &self.iterations)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

fn check_iterations(iterations: u32) -> HarpResult<()> {
    if !(MIN_PBES2_ITERATIONS..=MAX_PBES2_ITERATIONS).contains(&iterations) {
        return Err(HarpError::input(format!(
            "PBES2 iteration count {iterations} outside [{MIN_PBES2_ITERATIONS}, {MAX_PBES2_ITERATIONS}]"
        )));
    }
    Ok(())
}

fn content_aad(header_b64: &str, aad: &[u8]) -> String {
    if aad.is_empty() {
        header_b64.to_string()
    } else {
        format!("{header_b64}.{}", b64::encode(aad))
    }
}

fn malformed() -> HarpError {
    HarpError::auth("malformed JWE token")
}

fn kek_array<const N: usize>(kek: &SecretBuffer) -> HarpResult<Zeroizing<[u8; N]>> {
    let mut out = Zeroizing::new([0u8; N]);
    if kek.len() != N {
        return Err(HarpError::key_material("AES-KW key length mismatch"));
    }
    out.copy_from_slice(kek.as_bytes());
    Ok(out)
}

fn wrap_key(kek: &SecretBuffer, cek: &[u8]) -> HarpResult<Vec<u8>> {
    let wrapped = match kek.len() {
        16 => KekAes128::from(*kek_array::<16>(kek)?).wrap_vec(cek),
        24 => KekAes192::from(*kek_array::<24>(kek)?).wrap_vec(cek),
        32 => KekAes256::from(*kek_array::<32>(kek)?).wrap_vec(cek),
        n => return Err(HarpError::key_material(format!("no AES-KW variant for {n}-byte keys"))),
    };
    wrapped.map_err(|_| HarpError::input("AES-KW wrap failed"))
}

fn unwrap_key(kek: &SecretBuffer, wrapped: &[u8]) -> HarpResult<SecretBuffer> {
    let cek = match kek.len() {
        16 => KekAes128::from(*kek_array::<16>(kek)?).unwrap_vec(wrapped),
        24 => KekAes192::from(*kek_array::<24>(kek)?).unwrap_vec(wrapped),
        32 => KekAes256::from(*kek_array::<32>(kek)?).unwrap_vec(wrapped),
        n => return Err(HarpError::key_material(format!("no AES-KW variant for {n}-byte keys"))),
    };
    let cek = Zeroizing::new(cek.map_err(|_| HarpError::auth("CEK unwrap failed"))?);
    Ok(SecretBuffer::from_slice(&cek))
}
