//! Seal orchestrator.
//!
//! `recipients → container key → wrap per recipient → canonical bundle →
//! outer AEAD → wire bytes`. Any failure aborts the whole job; the container
//! key and the plaintext buffer are wiped on every exit path.

use std::borrow::Cow;
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::XChaCha20Poly1305;
use harp_bundle::{Bundle, ProtectionOptions};
use harp_core::limits::Limits;
use harp_core::{HarpError, HarpResult};
use harp_crypto::{hkdf_sha512, Catalog, ContainerKey, DckdSeed};
use rand::rngs::OsRng;
use rand::RngCore;
use rayon::prelude::*;
use secrecy::SecretString;
use serde::Serialize;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::codec::{Flags, SealedContainer};
use crate::identity::{IdentityFile, IdentityKey, IdentityVersion, Recipient};
use crate::recipient::encapsulate;

const NONCE_INFO: &[u8] = b"harp-dckd-nonce";

/// Inputs of a seal job.
#[derive(Debug, Default)]
pub struct SealOptions {
    /// Recipient strings (`v1.sk.…`, `v2.sk.…`).
    pub recipients: Vec<String>,
    /// Identity files whose (verified) public keys are added as recipients.
    pub identity_files: Vec<IdentityFile>,
    /// Deterministic mode: derive the container key and every ephemeral.
    pub dckd: Option<DckdSeed>,
    /// Do not add a generated container identity as an extra recipient.
    pub no_container_identity: bool,
    /// Fill [`SealOutcome::metadata`].
    pub json_output: bool,
    /// In-bundle value protection applied before serialization.
    pub protection: Option<ProtectionOptions>,
    /// Caps for recipients, values and the serialized bundle.
    pub limits: Limits,
}

/// Post-seal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SealInfo {
    /// BLAKE3 of the container bytes, hex.
    pub container_id: String,
    pub recipient_count: usize,
    /// Unix seconds. Not part of the container.
    pub sealed_at: u64,
}

pub struct SealOutcome {
    pub container: Vec<u8>,
    pub info: SealInfo,
    /// Private key of the generated container identity (`v1.ck.…`), the
    /// handle for `unseal --key`. `None` with `no_container_identity`.
    pub container_key: Option<SecretString>,
    /// JSON summary when `json_output` was requested. Never holds secrets.
    pub metadata: Option<serde_json::Value>,
}

impl std::fmt::Debug for SealOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealOutcome")
            .field("container_len", &self.container.len())
            .field("info", &self.info)
            .field("container_key", &self.container_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Parse serialized bundle bytes and seal them.
pub fn seal_bytes(bundle: &[u8], options: &SealOptions) -> HarpResult<SealOutcome> {
    seal(&Bundle::from_slice_with(bundle, &options.limits)?, options)
}

/// Seal `bundle` for the recipients in `options`.
pub fn seal(bundle: &Bundle, options: &SealOptions) -> HarpResult<SealOutcome> {
    let fips = Catalog::current().fips();
    let dckd = options.dckd.as_ref();
    let deterministic = dckd.is_some();
    if deterministic && options.protection.is_some() {
        return Err(HarpError::input(
            "in-bundle protection is not reproducible and cannot be combined with DCKD",
        ));
    }

    // ── Recipients ──
    let mut recipients = resolve_recipients(options, fips)?;

    let container_identity = if options.no_container_identity {
        None
    } else {
        Some(container_identity(dckd, fips)?)
    };
    if let Some(identity) = &container_identity {
        push_unique(&mut recipients, identity.recipient());
    }

    if recipients.is_empty() && !deterministic {
        return Err(HarpError::input(
            "no recipient: pass a recipient, an identity file, or a DCKD master key",
        ));
    }
    if recipients.len() > options.limits.max_recipients {
        return Err(HarpError::input(format!(
            "{} recipients exceeds the limit of {}",
            recipients.len(),
            options.limits.max_recipients
        )));
    }
    if deterministic {
        recipients.sort_by_cached_key(Recipient::public_bytes);
    }

    // ── Container key ──
    let key = match dckd {
        Some(seed) => seed.container_key()?,
        None => ContainerKey::generate(),
    };

    let blocks = recipients
        .par_iter()
        .map(|r| encapsulate(r, &key, dckd))
        .collect::<HarpResult<Vec<_>>>()?;
    tracing::debug!(recipients = blocks.len(), deterministic, "container key wrapped");

    // ── Payload ──
    let bundle = match &options.protection {
        Some(protection) => Cow::Owned(harp_bundle::encrypt(bundle, protection)?),
        None => Cow::Borrowed(bundle),
    };
    bundle.validate_with(&options.limits)?;
    let plaintext = bundle.to_canonical_bytes()?;
    HarpError::check_size(
        "serialized bundle",
        plaintext.len() as u64,
        options.limits.max_container_size,
    )?;

    let flags = Flags::default()
        .set(Flags::DETERMINISTIC, deterministic)
        .set(Flags::NO_CONTAINER_IDENTITY, options.no_container_identity)
        .set(Flags::AES_GCM, fips);
    let nonce = if deterministic {
        derived_nonce(&key, &plaintext, flags.nonce_len())?
    } else {
        let mut nonce = vec![0u8; flags.nonce_len()];
        OsRng.fill_bytes(&mut nonce);
        nonce
    };

    let mut container = SealedContainer {
        flags,
        recipients: blocks,
        nonce,
        ciphertext: Vec::new(),
    };
    let aad = container.aad()?;
    container.ciphertext = seal_payload(&key, flags, &container.nonce, &aad, &plaintext)?;
    drop(plaintext);
    drop(key);

    let bytes = container.to_bytes()?;

    // ── Report ──
    let info = SealInfo {
        container_id: blake3::hash(&bytes).to_hex().to_string(),
        recipient_count: container.recipients.len(),
        sealed_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    };
    let metadata = options.json_output.then(|| {
        serde_json::json!({
            "container_id": info.container_id,
            "recipient_count": info.recipient_count,
            "sealed_at": info.sealed_at,
            "deterministic": deterministic,
            "aead": if flags.aes_gcm() { "aes-256-gcm" } else { "xchacha20-poly1305" },
            "recipients": recipients.iter().map(Recipient::fingerprint).collect::<Vec<_>>(),
            "target": dckd.map(DckdSeed::target),
        })
    });

    tracing::info!(
        container_id = %info.container_id,
        recipients = info.recipient_count,
        deterministic,
        bytes = bytes.len(),
        "container sealed"
    );

    Ok(SealOutcome {
        container: bytes,
        info,
        container_key: container_identity.map(|id| id.to_key_string()),
        metadata,
    })
}

fn resolve_recipients(options: &SealOptions, fips: bool) -> HarpResult<Vec<Recipient>> {
    let mut out = Vec::with_capacity(options.recipients.len() + options.identity_files.len() + 1);
    for text in &options.recipients {
        let recipient = Recipient::parse(text)?;
        recipient.version().check_sealable(fips)?;
        push_unique(&mut out, recipient);
    }
    for file in &options.identity_files {
        let recipient = file.recipient()?;
        recipient.version().check_sealable(fips)?;
        push_unique(&mut out, recipient);
    }
    Ok(out)
}

fn push_unique(list: &mut Vec<Recipient>, recipient: Recipient) {
    if list.contains(&recipient) {
        tracing::debug!(recipient = %recipient.fingerprint(), "duplicate recipient dropped");
        return;
    }
    list.push(recipient);
}

/// The extra recipient whose private key is handed back to the caller.
/// Derived from the seed in deterministic mode so the output stays
/// reproducible.
fn container_identity(dckd: Option<&DckdSeed>, fips: bool) -> HarpResult<IdentityKey> {
    let version = IdentityVersion::default_for(fips);
    let Some(seed) = dckd else {
        return IdentityKey::generate(version);
    };
    let len = match version {
        IdentityVersion::Nist => 48,
        _ => 32,
    };
    for counter in 0..=u8::MAX {
        let material = seed.container_identity_material(counter, len)?;
        if let Ok(identity) = IdentityKey::from_seed(version, material.as_bytes()) {
            return Ok(identity);
        }
    }
    Err(HarpError::key_material(
        "no valid container identity after 256 derivations",
    ))
}

/// `HKDF-SHA-512(key, info = "harp-dckd-nonce" || SHA-512(plaintext))`
fn derived_nonce(key: &ContainerKey, plaintext: &[u8], len: usize) -> HarpResult<Vec<u8>> {
    let digest = Sha512::digest(plaintext);
    let okm = hkdf_sha512(key.as_bytes(), None, &[NONCE_INFO, digest.as_slice()], len)?;
    Ok(okm.as_bytes().to_vec())
}

fn seal_payload(
    key: &ContainerKey,
    flags: Flags,
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> HarpResult<Vec<u8>> {
    let payload = Payload { msg: plaintext, aad };
    let sealed = if flags.aes_gcm() {
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| HarpError::key_material("container key length"))?
            .encrypt(nonce.into(), payload)
    } else {
        XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|_| HarpError::key_material("container key length"))?
            .encrypt(nonce.into(), payload)
    };
    sealed.map_err(|_| HarpError::input("payload encryption failed"))
}

/// Decrypt the payload of a parsed container.
pub(crate) fn open_payload(
    container: &SealedContainer,
    key: &ContainerKey,
) -> HarpResult<Zeroizing<Vec<u8>>> {
    let aad = container.aad()?;
    let payload = Payload {
        msg: &container.ciphertext,
        aad: &aad,
    };
    let nonce = container.nonce.as_slice();
    let opened = if container.flags.aes_gcm() {
        Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| HarpError::key_material("container key length"))?
            .decrypt(nonce.into(), payload)
    } else {
        XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|_| HarpError::key_material("container key length"))?
            .decrypt(nonce.into(), payload)
    };
    opened
        .map(Zeroizing::new)
        .map_err(|_| HarpError::auth("container payload does not authenticate"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use harp_bundle::Package;
    use harp_crypto::b64;
    use secrecy::ExposeSecret;

    fn bundle() -> Bundle {
        let mut bundle = Bundle::new();
        bundle
            .packages
            .push(Package::new("app/prod/db").with_secret("password", "hunter2"));
        bundle
    }

    fn seed() -> DckdSeed {
        DckdSeed::from_key_string(&b64::encode(&[0x11; 32]), "us-east-1/v1").unwrap()
    }

    #[test]
    fn test_empty_recipients_rejected() {
        let options = SealOptions {
            no_container_identity: true,
            ..Default::default()
        };
        let err = seal(&bundle(), &options).unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)));
    }

    #[test]
    fn test_container_identity_is_default_recipient() {
        let outcome = seal(&bundle(), &SealOptions::default()).unwrap();
        assert_eq!(outcome.info.recipient_count, 1);
        let key = outcome.container_key.expect("container identity");
        assert!(key.expose_secret().starts_with("v1.ck."));

        let parsed = SealedContainer::parse(&outcome.container).unwrap();
        assert!(!parsed.flags.no_container_identity());
        assert!(!parsed.flags.deterministic());
    }

    #[test]
    fn test_dckd_only_container_has_no_blocks() {
        let options = SealOptions {
            dckd: Some(seed()),
            no_container_identity: true,
            ..Default::default()
        };
        let outcome = seal(&bundle(), &options).unwrap();
        assert!(outcome.container_key.is_none());
        let parsed = SealedContainer::parse(&outcome.container).unwrap();
        assert!(parsed.recipients.is_empty());
        assert!(parsed.flags.deterministic());
        assert!(parsed.flags.no_container_identity());
    }

    #[test]
    fn test_deterministic_container_identity() {
        let options = || SealOptions {
            dckd: Some(seed()),
            ..Default::default()
        };
        let a = seal(&bundle(), &options()).unwrap();
        let b = seal(&bundle(), &options()).unwrap();
        assert_eq!(a.container, b.container);
        assert_eq!(
            a.container_key.unwrap().expose_secret(),
            b.container_key.unwrap().expose_secret()
        );
    }

    #[test]
    fn test_duplicate_recipients_collapse() {
        let id = IdentityKey::generate(IdentityVersion::Modern).unwrap();
        let r = id.recipient().to_string();
        let options = SealOptions {
            recipients: vec![r.clone(), r],
            no_container_identity: true,
            ..Default::default()
        };
        assert_eq!(seal(&bundle(), &options).unwrap().info.recipient_count, 1);
    }

    #[test]
    fn test_legacy_recipient_refused() {
        let options = SealOptions {
            recipients: vec![b64::encode(&[9u8; 32])],
            ..Default::default()
        };
        let err = seal(&bundle(), &options).unwrap_err();
        assert!(matches!(err, HarpError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_lowered_recipient_limit_honored() {
        let recipients: Vec<String> = (0..3)
            .map(|_| {
                IdentityKey::generate(IdentityVersion::Modern)
                    .unwrap()
                    .recipient()
                    .to_string()
            })
            .collect();
        let options = |max| SealOptions {
            recipients: recipients.clone(),
            no_container_identity: true,
            limits: Limits::tightened(u64::MAX, max, u64::MAX),
            ..Default::default()
        };
        assert_eq!(seal(&bundle(), &options(3)).unwrap().info.recipient_count, 3);
        let err = seal(&bundle(), &options(2)).unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)), "{err}");
    }

    #[test]
    fn test_dckd_with_protection_refused() {
        let options = SealOptions {
            dckd: Some(seed()),
            protection: Some(ProtectionOptions::whole(format!(
                "aes-gcm:{}",
                b64::encode(&[2u8; 32])
            ))),
            ..Default::default()
        };
        let err = seal(&bundle(), &options).unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)));
    }

    #[test]
    fn test_metadata_only_on_request() {
        let outcome = seal(&bundle(), &SealOptions::default()).unwrap();
        assert!(outcome.metadata.is_none());

        let options = SealOptions {
            json_output: true,
            ..Default::default()
        };
        let outcome = seal(&bundle(), &options).unwrap();
        let meta = outcome.metadata.unwrap();
        assert_eq!(meta["container_id"], outcome.info.container_id);
        assert_eq!(meta["recipient_count"], 1);
        let text = meta.to_string();
        assert!(!text.contains(outcome.container_key.unwrap().expose_secret()));
    }

    #[test]
    fn test_container_id_is_blake3_of_bytes() {
        let outcome = seal(&bundle(), &SealOptions::default()).unwrap();
        assert_eq!(
            outcome.info.container_id,
            blake3::hash(&outcome.container).to_hex().to_string()
        );
    }

    #[test]
    fn test_open_payload_wrong_key() {
        let options = SealOptions {
            dckd: Some(seed()),
            no_container_identity: true,
            ..Default::default()
        };
        let outcome = seal(&bundle(), &options).unwrap();
        let parsed = SealedContainer::parse(&outcome.container).unwrap();

        let right = seed().container_key().unwrap();
        let plaintext = open_payload(&parsed, &right).unwrap();
        assert_eq!(Bundle::from_slice(&plaintext).unwrap(), bundle());

        let err = open_payload(&parsed, &ContainerKey::generate()).unwrap_err();
        assert!(matches!(err, HarpError::AuthenticationFailed(_)));
    }
}
