//! Unseal orchestrator.
//!
//! Parse, find the container key (directly, by DCKD, or by trying every
//! identity against every recipient block of its version), open the payload
//! and parse the bundle. Unknown recipient versions are skipped with a
//! warning as long as at least one known block remains.

use std::slice;

use harp_bundle::{Bundle, ProtectionOptions};
use harp_core::io::SecretPrompt;
use harp_core::limits::Limits;
use harp_core::{HarpError, HarpResult};
use harp_crypto::{Catalog, ContainerKey, DckdSeed};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::codec::{RecipientBlock, SealedContainer};
use crate::identity::{IdentityFile, IdentityKey, IdentityVersion};
use crate::recipient::decapsulate;
use crate::seal::open_payload;

/// Key material offered to [`unseal`].
pub enum UnsealKey {
    /// A container identity key (`v1.ck.…` / `v2.ck.…`), or a bare
    /// base64url container key. A bare key that does not open the payload
    /// is retried as a legacy identity key.
    KeyString(SecretString),
    /// Recovered identity keys.
    Identities(Vec<IdentityKey>),
    /// Passphrase-protected identity files; needs [`UnsealOptions::prompt`].
    IdentityFiles(Vec<IdentityFile>),
    /// DCKD master seed and target.
    Dckd(DckdSeed),
}

impl std::fmt::Debug for UnsealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyString(_) => f.write_str("KeyString([REDACTED])"),
            Self::Identities(ids) => f.debug_tuple("Identities").field(&ids.len()).finish(),
            Self::IdentityFiles(files) => f.debug_tuple("IdentityFiles").field(&files.len()).finish(),
            Self::Dckd(seed) => f.debug_tuple("Dckd").field(seed).finish(),
        }
    }
}

pub struct UnsealOptions<'a> {
    pub key: UnsealKey,
    /// Reverse in-bundle protection after opening.
    pub protection: Option<ProtectionOptions>,
    /// Passphrase source for [`UnsealKey::IdentityFiles`].
    pub prompt: Option<&'a dyn SecretPrompt>,
    pub limits: Limits,
}

impl<'a> UnsealOptions<'a> {
    pub fn new(key: UnsealKey) -> Self {
        Self {
            key,
            protection: None,
            prompt: None,
            limits: Limits::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_protection(mut self, protection: ProtectionOptions) -> Self {
        self.protection = Some(protection);
        self
    }

    pub fn with_prompt(mut self, prompt: &'a dyn SecretPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

/// Open a sealed container.
pub fn unseal(data: &[u8], options: &UnsealOptions<'_>) -> HarpResult<Bundle> {
    let container = SealedContainer::parse_with(data, &options.limits)?;
    tracing::debug!(
        recipients = container.recipients.len(),
        deterministic = container.flags.deterministic(),
        "container parsed"
    );

    if Catalog::current().fips() && !container.flags.aes_gcm() {
        return Err(HarpError::FipsNotPermitted(
            "container payload is XChaCha20-Poly1305".into(),
        ));
    }

    let plaintext = match &options.key {
        UnsealKey::KeyString(text) => open_with_key_string(&container, text.expose_secret())?,
        UnsealKey::Identities(identities) => {
            let key = find_container_key(&container, identities)?;
            open_payload(&container, &key)?
        }
        UnsealKey::IdentityFiles(files) => {
            let prompt = options.prompt.ok_or_else(|| {
                HarpError::input("identity files given without a passphrase prompt")
            })?;
            let identities = files
                .iter()
                .map(|file| file.recover_with_prompt(prompt))
                .collect::<HarpResult<Vec<_>>>()?;
            let key = find_container_key(&container, &identities)?;
            open_payload(&container, &key)?
        }
        UnsealKey::Dckd(seed) => open_payload(&container, &seed.container_key()?)?,
    };

    let mut bundle = Bundle::from_slice_with(&plaintext, &options.limits)?;
    drop(plaintext);

    if let Some(protection) = &options.protection {
        bundle = harp_bundle::decrypt(&bundle, protection)?;
    }

    tracing::info!(
        packages = bundle.packages.len(),
        recipients = container.recipients.len(),
        "container unsealed"
    );
    Ok(bundle)
}

fn open_with_key_string(container: &SealedContainer, text: &str) -> HarpResult<Zeroizing<Vec<u8>>> {
    if IdentityKey::has_version_prefix(text) {
        let identity = IdentityKey::from_key_string(text)?;
        let key = find_container_key(container, slice::from_ref(&identity))?;
        return open_payload(container, &key);
    }

    let direct = ContainerKey::from_key_string(text)?;
    match open_payload(container, &direct) {
        Err(HarpError::AuthenticationFailed(_))
            if container.recipients.iter().any(|b| b.version == 0) =>
        {
            tracing::debug!("key does not open the payload directly, trying it as a legacy identity");
            let identity = IdentityKey::from_key_string(text)?;
            let key = find_container_key(container, slice::from_ref(&identity))?;
            open_payload(container, &key)
        }
        other => other,
    }
}

/// Try every identity against every block of its version; first success wins.
fn find_container_key(
    container: &SealedContainer,
    identities: &[IdentityKey],
) -> HarpResult<ContainerKey> {
    let known: Vec<&RecipientBlock> = container
        .recipients
        .iter()
        .filter(|block| match IdentityVersion::from_u8(block.version) {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(
                    version = block.version,
                    "skipping recipient block with unknown version"
                );
                false
            }
        })
        .collect();

    if known.is_empty() && !container.recipients.is_empty() {
        return Err(HarpError::UnsupportedContainerVersion(
            "no recipient block has a known version".into(),
        ));
    }

    for identity in identities {
        let version = identity.version().as_u8();
        for (index, block) in known.iter().enumerate() {
            if block.version != version {
                continue;
            }
            if let Ok(key) = decapsulate(identity, block) {
                tracing::debug!(block = index, version, "recipient block opened");
                return Ok(key);
            }
        }
    }
    Err(HarpError::NoMatchingRecipient)
}
