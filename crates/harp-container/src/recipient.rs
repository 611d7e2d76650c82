//! Per-recipient wrapping of the container key.
//!
//! ```text
//! e, E  = ephemeral (random, or derived from the DCKD seed)
//! s     = ECDH(e, R)
//! okm   = HKDF-SHA-512(s || R || E, info = "harp-seal-v{n}")
//! kek   = okm[..32], nonce = okm[32..]
//! block = (n, E, AEAD(kek, nonce, container_key, aad = [n]))
//!
//! v1: X25519 + XChaCha20-Poly1305 (24-byte nonce)
//! v2: P-384 + AES-256-GCM (12-byte nonce)
//! v0: X25519 + HKDF-SHA-256 + XSalsa20-Poly1305, nonce prefixed (open only)
//! ```

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use crypto_secretbox::XSalsa20Poly1305;
use harp_core::{HarpError, HarpResult};
use harp_crypto::{
    hkdf_sha256, hkdf_sha512, ContainerKey, DckdSeed, SecretBuffer, GCM_NONCE_SIZE, KEY_SIZE,
    XNONCE_SIZE,
};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::codec::RecipientBlock;
use crate::identity::{IdentityKey, KeyMaterial, Recipient};

const LEGACY: u8 = 0;
const MODERN: u8 = 1;
const NIST: u8 = 2;

const X25519_SIZE: usize = 32;
const P384_SCALAR_SIZE: usize = 48;

/// Wrap `key` for `recipient`.
///
/// With a DCKD seed the ephemeral is derived from the seed and the recipient
/// public key, which makes the block reproducible.
pub fn encapsulate(
    recipient: &Recipient,
    key: &ContainerKey,
    dckd: Option<&DckdSeed>,
) -> HarpResult<RecipientBlock> {
    match recipient {
        Recipient::Modern(rpub) => {
            let esk = match dckd {
                Some(seed) => {
                    let material = seed.ephemeral_material(rpub.as_bytes(), 0, X25519_SIZE)?;
                    let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(
                        material
                            .as_bytes()
                            .try_into()
                            .map_err(|_| HarpError::key_material("ephemeral derivation"))?,
                    );
                    x25519_dalek::StaticSecret::from(*bytes)
                }
                None => x25519_dalek::StaticSecret::random_from_rng(OsRng),
            };
            let epub = x25519_dalek::PublicKey::from(&esk);
            let shared = esk.diffie_hellman(rpub);
            if !shared.was_contributory() {
                return Err(HarpError::key_material("recipient is a low-order point"));
            }

            let okm = derive_kek(
                MODERN,
                shared.as_bytes(),
                rpub.as_bytes(),
                epub.as_bytes(),
                XNONCE_SIZE,
            )?;
            let (kek, nonce) = okm.as_bytes().split_at(KEY_SIZE);
            let wrapped = XChaCha20Poly1305::new_from_slice(kek)
                .map_err(|_| HarpError::key_material("KEK length"))?
                .encrypt(
                    nonce.into(),
                    Payload {
                        msg: key.as_bytes(),
                        aad: &[MODERN],
                    },
                )
                .map_err(|_| HarpError::key_material("container key wrap failed"))?;

            Ok(RecipientBlock {
                version: MODERN,
                epub: epub.as_bytes().to_vec(),
                wrapped,
            })
        }
        Recipient::Nist(rpub) => {
            let rpub_bytes = rpub.to_encoded_point(true);
            let esk = match dckd {
                Some(seed) => nist_ephemeral(seed, rpub_bytes.as_bytes())?,
                None => p384::SecretKey::random(&mut OsRng),
            };
            let epub = esk.public_key().to_encoded_point(true);
            let shared = p384::ecdh::diffie_hellman(esk.to_nonzero_scalar(), rpub.as_affine());

            let okm = derive_kek(
                NIST,
                shared.raw_secret_bytes(),
                rpub_bytes.as_bytes(),
                epub.as_bytes(),
                GCM_NONCE_SIZE,
            )?;
            let (kek, nonce) = okm.as_bytes().split_at(KEY_SIZE);
            let wrapped = Aes256Gcm::new_from_slice(kek)
                .map_err(|_| HarpError::key_material("KEK length"))?
                .encrypt(
                    nonce.into(),
                    Payload {
                        msg: key.as_bytes(),
                        aad: &[NIST],
                    },
                )
                .map_err(|_| HarpError::key_material("container key wrap failed"))?;

            Ok(RecipientBlock {
                version: NIST,
                epub: epub.as_bytes().to_vec(),
                wrapped,
            })
        }
        Recipient::Legacy(_) => Err(HarpError::UnsupportedVersion(
            "legacy identities are accepted for unseal only".into(),
        )),
    }
}

/// Try to unwrap the container key from `block` with `identity`.
///
/// Any mismatch (version, key, tag) is an error; the unseal loop treats all
/// of them as "not this pairing".
pub fn decapsulate(identity: &IdentityKey, block: &RecipientBlock) -> HarpResult<ContainerKey> {
    let mismatch = || HarpError::auth("recipient block does not open with this identity");

    match (identity.material(), block.version) {
        (KeyMaterial::Modern(sk), MODERN) => {
            let esk = x25519_dalek::StaticSecret::from(*Zeroizing::new(sk.to_scalar_bytes()));
            let rpub = x25519_dalek::PublicKey::from(&esk);
            let epub = x25519_public(&block.epub).ok_or_else(mismatch)?;
            let shared = esk.diffie_hellman(&epub);
            if !shared.was_contributory() {
                return Err(mismatch());
            }

            let okm = derive_kek(
                MODERN,
                shared.as_bytes(),
                rpub.as_bytes(),
                epub.as_bytes(),
                XNONCE_SIZE,
            )?;
            let (kek, nonce) = okm.as_bytes().split_at(KEY_SIZE);
            let plain = XChaCha20Poly1305::new_from_slice(kek)
                .map_err(|_| mismatch())?
                .decrypt(
                    nonce.into(),
                    Payload {
                        msg: &block.wrapped,
                        aad: &[MODERN],
                    },
                )
                .map_err(|_| mismatch())?;
            container_key_from(plain)
        }
        (KeyMaterial::Nist(sk), NIST) => {
            let rpub = sk.public_key().to_encoded_point(true);
            let epub = p384::PublicKey::from_sec1_bytes(&block.epub).map_err(|_| mismatch())?;
            let shared = p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), epub.as_affine());

            let okm = derive_kek(
                NIST,
                shared.raw_secret_bytes(),
                rpub.as_bytes(),
                &block.epub,
                GCM_NONCE_SIZE,
            )?;
            let (kek, nonce) = okm.as_bytes().split_at(KEY_SIZE);
            let plain = Aes256Gcm::new_from_slice(kek)
                .map_err(|_| mismatch())?
                .decrypt(
                    nonce.into(),
                    Payload {
                        msg: &block.wrapped,
                        aad: &[NIST],
                    },
                )
                .map_err(|_| mismatch())?;
            container_key_from(plain)
        }
        (KeyMaterial::Legacy(sk), LEGACY) => {
            let rpub = x25519_dalek::PublicKey::from(sk);
            let epub = x25519_public(&block.epub).ok_or_else(mismatch)?;
            let shared = sk.diffie_hellman(&epub);
            if !shared.was_contributory() || block.wrapped.len() < XNONCE_SIZE {
                return Err(mismatch());
            }

            let ikm = concat_secret(&[shared.as_bytes(), rpub.as_bytes(), epub.as_bytes()]);
            let kek = hkdf_sha256(&ikm, None, &[b"harp-seal-v0"], KEY_SIZE)?;
            let (nonce, sealed) = block.wrapped.split_at(XNONCE_SIZE);
            let plain = XSalsa20Poly1305::new_from_slice(kek.as_bytes())
                .map_err(|_| mismatch())?
                .decrypt(nonce.into(), sealed)
                .map_err(|_| mismatch())?;
            container_key_from(plain)
        }
        _ => Err(mismatch()),
    }
}

/// HKDF-SHA-512 over `shared || rpub || epub` yielding KEK plus nonce.
fn derive_kek(
    version: u8,
    shared: &[u8],
    rpub: &[u8],
    epub: &[u8],
    nonce_len: usize,
) -> HarpResult<SecretBuffer> {
    let ikm = concat_secret(&[shared, rpub, epub]);
    let info = format!("harp-seal-v{version}");
    hkdf_sha512(&ikm, None, &[info.as_bytes()], KEY_SIZE + nonce_len)
}

fn concat_secret(parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(parts.iter().map(|p| p.len()).sum()));
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Derive a valid P-384 scalar from the DCKD seed, re-deriving with a
/// counter while the candidate is zero or not below the group order.
fn nist_ephemeral(seed: &DckdSeed, rpub: &[u8]) -> HarpResult<p384::SecretKey> {
    for counter in 0..=u8::MAX {
        let material = seed.ephemeral_material(rpub, counter, P384_SCALAR_SIZE)?;
        if let Ok(sk) = p384::SecretKey::from_slice(material.as_bytes()) {
            return Ok(sk);
        }
    }
    Err(HarpError::key_material(
        "no valid P-384 ephemeral after 256 derivations",
    ))
}

fn x25519_public(bytes: &[u8]) -> Option<x25519_dalek::PublicKey> {
    let arr: [u8; 32] = bytes.try_into().ok()?;
    Some(x25519_dalek::PublicKey::from(arr))
}

fn container_key_from(plain: Vec<u8>) -> HarpResult<ContainerKey> {
    let plain = Zeroizing::new(plain);
    ContainerKey::from_buffer(SecretBuffer::from_slice(&plain))
}
