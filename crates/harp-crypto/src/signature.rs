//! Signature family: EdDSA, ECDSA, RSA (PKCS#1 v1.5 and PSS), and HMAC.
//!
//! Attached output is `[sig_len: u16 BE][signature][payload]`. In detached
//! mode `to` returns the signature alone and `from` checks
//! `TransformContext::detached_signature` against its input.

use harp_core::{HarpError, HarpResult};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs1v15, pss, RsaPrivateKey};
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};

use crate::b64;
use crate::secret::SecretBuffer;
use crate::transformer::{TransformContext, Transformer};

const MIN_RSA_BYTES: usize = 256;
const ED448_KEY_LEN: usize = 57;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaSize {
    Sha256,
    Sha384,
    Sha512,
}

impl ShaSize {
    fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaScheme {
    Pkcs1v15,
    Pss,
}

pub enum SignatureKey {
    Ed25519(Box<ed25519_dalek::SigningKey>),
    Ed448(Box<ed448_rust::PrivateKey>),
    Es256(Box<p256::ecdsa::SigningKey>),
    Es384(Box<p384::ecdsa::SigningKey>),
    Es512(Box<p521::ecdsa::SigningKey>),
    Rsa {
        key: Box<RsaPrivateKey>,
        scheme: RsaScheme,
        hash: ShaSize,
    },
    Hmac {
        key: SecretBuffer,
        hash: ShaSize,
    },
}

macro_rules! rsa_sign {
    ($digest:ty, $key:expr, $scheme:expr, $ctx:expr, $msg:expr) => {
        match $scheme {
            RsaScheme::Pkcs1v15 => {
                let signer = pkcs1v15::SigningKey::<$digest>::new(RsaPrivateKey::clone($key));
                if $ctx.prehashed {
                    signer.sign_prehash($msg).map(|s| s.to_vec())
                } else {
                    signer.try_sign($msg).map(|s| s.to_vec())
                }
            }
            RsaScheme::Pss => {
                let signer = pss::BlindedSigningKey::<$digest>::new(RsaPrivateKey::clone($key));
                signer.try_sign_with_rng(&mut OsRng, $msg).map(|s| s.to_vec())
            }
        }
    };
}

macro_rules! rsa_verify {
    ($digest:ty, $key:expr, $scheme:expr, $ctx:expr, $msg:expr, $sig:expr) => {
        match $scheme {
            RsaScheme::Pkcs1v15 => {
                let verifier = pkcs1v15::VerifyingKey::<$digest>::new($key.to_public_key());
                let sig = pkcs1v15::Signature::try_from($sig).map_err(|_| bad_signature())?;
                if $ctx.prehashed {
                    verifier.verify_prehash($msg, &sig)
                } else {
                    verifier.verify($msg, &sig)
                }
            }
            RsaScheme::Pss => {
                let verifier = pss::VerifyingKey::<$digest>::new($key.to_public_key());
                let sig = pss::Signature::try_from($sig).map_err(|_| bad_signature())?;
                verifier.verify($msg, &sig)
            }
        }
    };
}

macro_rules! hmac_tag {
    ($digest:ty, $key:expr, $msg:expr) => {{
        let mut mac = Hmac::<$digest>::new_from_slice($key)
            .map_err(|_| HarpError::key_material("HMAC key rejected"))?;
        mac.update($msg);
        mac.finalize().into_bytes().to_vec()
    }};
}

macro_rules! hmac_check {
    ($digest:ty, $key:expr, $msg:expr, $sig:expr) => {{
        let mut mac = Hmac::<$digest>::new_from_slice($key)
            .map_err(|_| HarpError::key_material("HMAC key rejected"))?;
        mac.update($msg);
        mac.verify_slice($sig).map_err(|_| bad_signature())
    }};
}

impl SignatureKey {
    /// Build from a catalog id (`ed25519`, `es384`, `ps512`, `hs256`, ...)
    /// and its base64url key payload.
    pub fn parse(id: &str, payload: &str) -> HarpResult<Self> {
        let key = match id {
            "ed25519" => {
                let seed = fixed_key(id, payload, ed25519_dalek::SECRET_KEY_LENGTH)?;
                let mut bytes = zeroize::Zeroizing::new([0u8; ed25519_dalek::SECRET_KEY_LENGTH]);
                bytes.copy_from_slice(seed.as_bytes());
                Self::Ed25519(Box::new(ed25519_dalek::SigningKey::from_bytes(&bytes)))
            }
            "ed448" => {
                let seed = fixed_key(id, payload, ED448_KEY_LEN)?;
                let mut bytes = zeroize::Zeroizing::new([0u8; ED448_KEY_LEN]);
                bytes.copy_from_slice(seed.as_bytes());
                Self::Ed448(Box::new(ed448_rust::PrivateKey::from(&*bytes)))
            }
            "es256" => {
                let d = fixed_key(id, payload, 32)?;
                Self::Es256(Box::new(
                    p256::ecdsa::SigningKey::from_slice(d.as_bytes()).map_err(|_| invalid_scalar(id))?,
                ))
            }
            "es384" => {
                let d = fixed_key(id, payload, 48)?;
                Self::Es384(Box::new(
                    p384::ecdsa::SigningKey::from_slice(d.as_bytes()).map_err(|_| invalid_scalar(id))?,
                ))
            }
            "es512" => {
                let d = fixed_key(id, payload, 66)?;
                Self::Es512(Box::new(
                    p521::ecdsa::SigningKey::from_slice(d.as_bytes()).map_err(|_| invalid_scalar(id))?,
                ))
            }
            "rs256" | "rs384" | "rs512" | "ps256" | "ps384" | "ps512" => {
                let scheme = if id.starts_with("rs") {
                    RsaScheme::Pkcs1v15
                } else {
                    RsaScheme::Pss
                };
                Self::Rsa {
                    key: Box::new(parse_rsa_key(payload)?),
                    scheme,
                    hash: sha_size(&id[2..]),
                }
            }
            "hs256" | "hs384" | "hs512" => {
                let hash = sha_size(&id[2..]);
                let key = b64::decode_secret(payload)?;
                if key.len() < hash.output_len() {
                    return Err(HarpError::key_material(format!(
                        "{id} key must be at least {} bytes, got {}",
                        hash.output_len(),
                        key.len()
                    )));
                }
                Self::Hmac { key, hash }
            }
            other => return Err(HarpError::UnsupportedPrimitive(other.to_string())),
        };
        Ok(key)
    }

    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Ed25519(_) => "ed25519",
            Self::Ed448(_) => "ed448",
            Self::Es256(_) => "es256",
            Self::Es384(_) => "es384",
            Self::Es512(_) => "es512",
            Self::Rsa { scheme, hash, .. } => match (scheme, hash) {
                (RsaScheme::Pkcs1v15, ShaSize::Sha256) => "rs256",
                (RsaScheme::Pkcs1v15, ShaSize::Sha384) => "rs384",
                (RsaScheme::Pkcs1v15, ShaSize::Sha512) => "rs512",
                (RsaScheme::Pss, ShaSize::Sha256) => "ps256",
                (RsaScheme::Pss, ShaSize::Sha384) => "ps384",
                (RsaScheme::Pss, ShaSize::Sha512) => "ps512",
            },
            Self::Hmac { hash, .. } => match hash {
                ShaSize::Sha256 => "hs256",
                ShaSize::Sha384 => "hs384",
                ShaSize::Sha512 => "hs512",
            },
        }
    }

    /// Produce a raw signature over `msg` (or over a digest when
    /// `ctx.prehashed`).
    pub fn sign(&self, ctx: &TransformContext, msg: &[u8]) -> HarpResult<Vec<u8>> {
        if ctx.prehashed && !self.supports_prehash() {
            return Err(self.prehash_unsupported());
        }
        let sig = match self {
            Self::Ed25519(k) => k.sign(msg).to_vec(),
            Self::Ed448(k) => k
                .sign(msg, None)
                .map_err(|e| HarpError::input(format!("ed448 signing failed: {e:?}")))?
                .to_vec(),
            Self::Es256(k) => {
                let sig: p256::ecdsa::Signature = if ctx.prehashed {
                    k.sign_prehash(msg).map_err(sign_err)?
                } else if ctx.deterministic {
                    k.try_sign(msg).map_err(sign_err)?
                } else {
                    k.try_sign_with_rng(&mut OsRng, msg).map_err(sign_err)?
                };
                sig.to_vec()
            }
            Self::Es384(k) => {
                let sig: p384::ecdsa::Signature = if ctx.prehashed {
                    k.sign_prehash(msg).map_err(sign_err)?
                } else if ctx.deterministic {
                    k.try_sign(msg).map_err(sign_err)?
                } else {
                    k.try_sign_with_rng(&mut OsRng, msg).map_err(sign_err)?
                };
                sig.to_vec()
            }
            Self::Es512(k) => {
                // RFC 6979 only.
                let sig: p521::ecdsa::Signature = k.try_sign(msg).map_err(sign_err)?;
                sig.to_vec()
            }
            Self::Rsa { key, scheme, hash } => {
                let signed = match hash {
                    ShaSize::Sha256 => rsa_sign!(Sha256, key, scheme, ctx, msg),
                    ShaSize::Sha384 => rsa_sign!(Sha384, key, scheme, ctx, msg),
                    ShaSize::Sha512 => rsa_sign!(Sha512, key, scheme, ctx, msg),
                };
                signed.map_err(sign_err)?
            }
            Self::Hmac { key, hash } => match hash {
                ShaSize::Sha256 => hmac_tag!(Sha256, key.as_bytes(), msg),
                ShaSize::Sha384 => hmac_tag!(Sha384, key.as_bytes(), msg),
                ShaSize::Sha512 => hmac_tag!(Sha512, key.as_bytes(), msg),
            },
        };
        Ok(sig)
    }

    /// Check `sig` over `msg`. Any mismatch is `AuthenticationFailed`.
    pub fn verify(&self, ctx: &TransformContext, msg: &[u8], sig: &[u8]) -> HarpResult<()> {
        if ctx.prehashed && !self.supports_prehash() {
            return Err(self.prehash_unsupported());
        }
        let result = match self {
            Self::Ed25519(k) => {
                let sig = ed25519_dalek::Signature::from_slice(sig).map_err(|_| bad_signature())?;
                k.verifying_key().verify_strict(msg, &sig)
            }
            Self::Ed448(k) => {
                let public = ed448_rust::PublicKey::from(&**k);
                return public.verify(msg, sig, None).map_err(|_| bad_signature());
            }
            Self::Es256(k) => {
                let sig = p256::ecdsa::Signature::from_slice(sig).map_err(|_| bad_signature())?;
                if ctx.prehashed {
                    k.verifying_key().verify_prehash(msg, &sig)
                } else {
                    k.verifying_key().verify(msg, &sig)
                }
            }
            Self::Es384(k) => {
                let sig = p384::ecdsa::Signature::from_slice(sig).map_err(|_| bad_signature())?;
                if ctx.prehashed {
                    k.verifying_key().verify_prehash(msg, &sig)
                } else {
                    k.verifying_key().verify(msg, &sig)
                }
            }
            Self::Es512(k) => {
                let sig = p521::ecdsa::Signature::from_slice(sig).map_err(|_| bad_signature())?;
                p521::ecdsa::VerifyingKey::from(&**k).verify(msg, &sig)
            }
            Self::Rsa { key, scheme, hash } => match hash {
                ShaSize::Sha256 => rsa_verify!(Sha256, key, scheme, ctx, msg, sig),
                ShaSize::Sha384 => rsa_verify!(Sha384, key, scheme, ctx, msg, sig),
                ShaSize::Sha512 => rsa_verify!(Sha512, key, scheme, ctx, msg, sig),
            },
            Self::Hmac { key, hash } => {
                return match hash {
                    ShaSize::Sha256 => hmac_check!(Sha256, key.as_bytes(), msg, sig),
                    ShaSize::Sha384 => hmac_check!(Sha384, key.as_bytes(), msg, sig),
                    ShaSize::Sha512 => hmac_check!(Sha512, key.as_bytes(), msg, sig),
                };
            }
        };
        result.map_err(|_| bad_signature())
    }

    fn supports_prehash(&self) -> bool {
        match self {
            Self::Es256(_) | Self::Es384(_) | Self::Hmac { .. } => true,
            Self::Rsa { scheme, .. } => *scheme == RsaScheme::Pkcs1v15,
            _ => false,
        }
    }

    fn prehash_unsupported(&self) -> HarpError {
        HarpError::input(format!(
            "{} does not support pre-hashed input",
            self.algorithm()
        ))
    }
}

impl Transformer for SignatureKey {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        let sig = self.sign(ctx, input)?;
        if ctx.detached {
            return Ok(sig);
        }
        let sig_len = u16::try_from(sig.len())
            .map_err(|_| HarpError::input("signature longer than 65535 bytes"))?;
        let mut out = Vec::with_capacity(2 + sig.len() + input.len());
        out.extend_from_slice(&sig_len.to_be_bytes());
        out.extend_from_slice(&sig);
        out.extend_from_slice(input);
        Ok(out)
    }

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        if ctx.detached {
            let sig = ctx.detached_signature.as_deref().ok_or_else(|| {
                HarpError::input("detached verification needs the signature in the context")
            })?;
            self.verify(ctx, input, sig)?;
            return Ok(input.to_vec());
        }

        if input.len() < 2 {
            return Err(bad_signature());
        }
        let sig_len = u16::from_be_bytes([input[0], input[1]]) as usize;
        let rest = &input[2..];
        if rest.len() < sig_len {
            return Err(bad_signature());
        }
        let (sig, payload) = rest.split_at(sig_len);
        self.verify(ctx, payload, sig)?;
        Ok(payload.to_vec())
    }
}

impl std::fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureKey")
            .field("algorithm", &self.algorithm())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn fixed_key(id: &str, payload: &str, len: usize) -> HarpResult<SecretBuffer> {
    let key = b64::decode_secret(payload)?;
    if key.len() != len {
        return Err(HarpError::key_material(format!(
            "{id} private key must be {len} bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

fn parse_rsa_key(payload: &str) -> HarpResult<RsaPrivateKey> {
    let der = b64::decode_secret(payload)?;
    let key = RsaPrivateKey::from_pkcs8_der(der.as_bytes())
        .map_err(|_| HarpError::key_material("RSA key is not a PKCS#8 DER private key"))?;
    if key.size() < MIN_RSA_BYTES {
        return Err(HarpError::key_material(format!(
            "RSA modulus must be at least {} bits, got {}",
            MIN_RSA_BYTES * 8,
            key.size() * 8
        )));
    }
    Ok(key)
}

fn sha_size(suffix: &str) -> ShaSize {
    match suffix {
        "384" => ShaSize::Sha384,
        "512" => ShaSize::Sha512,
        _ => ShaSize::Sha256,
    }
}

fn invalid_scalar(id: &str) -> HarpError {
    HarpError::key_material(format!("{id} private scalar is out of range"))
}

fn sign_err(e: signature::Error) -> HarpError {
    HarpError::input(format!("signing failed: {e}"))
}

fn bad_signature() -> HarpError {
    HarpError::auth("signature verification failed")
}
