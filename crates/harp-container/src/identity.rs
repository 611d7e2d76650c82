//! Identities: long-term key pairs that container keys are sealed to.
//!
//! ```text
//! version  sealing        signing       private key string   recipient string
//! 0        X25519 (raw)   none          <b64>                <b64>
//! 1        X25519*        Ed25519       v1.ck.<b64 seed>     v1.sk.<b64 x25519 pub>
//! 2        P-384 ECDH     ECDSA P-384   v2.ck.<b64 scalar>   v2.sk.<b64 SEC1 compressed>
//!
//! * derived from the Ed25519 key (clamped scalar / Montgomery form)
//! ```
//!
//! An identity file is a signed JSON document. Its private half is a JWK
//! wrapped either by a passphrase (JWE PBES2-HS512-A256KW) or by a catalog
//! transformer key, with the public key as associated data.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, Verifier};
use harp_core::io::SecretPrompt;
use harp_core::{HarpError, HarpResult};
use harp_crypto::jwe::DEFAULT_PBES2_ITERATIONS;
use harp_crypto::{b64, Catalog, JweWrapper, KeyManagement, TransformContext, Transformer};
use p384::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// `@context` written into new identity files.
pub const IDENTITY_CONTEXT: &str = "https://harp.elastic.co/schemas/identity/v1";

const ENCODING_JWE: &str = "jwe";
const ENCODING_TRANSFORMER: &str = "transformer";
const JWK_CONTENT_TYPE: &str = "jwk+json";

const MODERN_PRIVATE_PREFIX: &str = "v1.ck.";
const MODERN_PUBLIC_PREFIX: &str = "v1.sk.";
const NIST_PRIVATE_PREFIX: &str = "v2.ck.";
const NIST_PUBLIC_PREFIX: &str = "v2.sk.";

const P384_SCALAR_SIZE: usize = 48;

// ── Versions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityVersion {
    Legacy,
    Modern,
    Nist,
}

impl IdentityVersion {
    pub fn from_u8(v: u8) -> HarpResult<Self> {
        match v {
            0 => Ok(Self::Legacy),
            1 => Ok(Self::Modern),
            2 => Ok(Self::Nist),
            other => Err(HarpError::UnsupportedVersion(format!("identity version {other}"))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Legacy => 0,
            Self::Modern => 1,
            Self::Nist => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Modern => "modern",
            Self::Nist => "nist",
        }
    }

    /// Version generated when the caller does not ask for one.
    pub fn default_for(fips: bool) -> Self {
        if fips {
            Self::Nist
        } else {
            Self::Modern
        }
    }

    /// Refuse versions that cannot be used to seal (or be generated).
    pub(crate) fn check_sealable(self, fips: bool) -> HarpResult<()> {
        match self {
            Self::Legacy => Err(HarpError::UnsupportedVersion(
                "legacy identities are accepted for unseal only".into(),
            )),
            Self::Modern if fips => Err(HarpError::FipsNotPermitted(
                "modern identity (X25519/Ed25519)".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for IdentityVersion {
    type Err = HarpError;

    fn from_str(s: &str) -> HarpResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "v0" | "0" => Ok(Self::Legacy),
            "modern" | "v1" | "1" => Ok(Self::Modern),
            "nist" | "v2" | "2" => Ok(Self::Nist),
            other => Err(HarpError::UnsupportedVersion(format!("'{other}'"))),
        }
    }
}

impl fmt::Display for IdentityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Private keys ─────────────────────────────────────────────────────────

pub(crate) enum KeyMaterial {
    Legacy(x25519_dalek::StaticSecret),
    Modern(ed25519_dalek::SigningKey),
    Nist(p384::SecretKey),
}

/// Private identity key.
///
/// The key material lives behind a box so moving an `IdentityKey` around
/// never leaves stale copies of it in freed heap blocks. Every variant wipes
/// itself on drop.
pub struct IdentityKey {
    material: Box<KeyMaterial>,
}

impl IdentityKey {
    /// Generate a fresh key pair.
    pub fn generate(version: IdentityVersion) -> HarpResult<Self> {
        let material = match version {
            IdentityVersion::Legacy => {
                return Err(HarpError::UnsupportedVersion(
                    "legacy identities cannot be generated".into(),
                ))
            }
            IdentityVersion::Modern => {
                KeyMaterial::Modern(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
            IdentityVersion::Nist => KeyMaterial::Nist(p384::SecretKey::random(&mut OsRng)),
        };
        Ok(Self::from_material(material))
    }

    /// Deterministic key pair from caller-supplied seed bytes (32 for modern,
    /// 48 for NIST). NIST seeds that are not a valid scalar are refused.
    pub fn from_seed(version: IdentityVersion, seed: &[u8]) -> HarpResult<Self> {
        let material = match version {
            IdentityVersion::Modern => {
                let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
                    seed.try_into()
                        .map_err(|_| HarpError::key_material("modern seed must be 32 bytes"))?,
                );
                KeyMaterial::Modern(ed25519_dalek::SigningKey::from_bytes(&seed))
            }
            IdentityVersion::Nist => {
                if seed.len() != P384_SCALAR_SIZE {
                    return Err(HarpError::key_material("NIST seed must be 48 bytes"));
                }
                KeyMaterial::Nist(
                    p384::SecretKey::from_slice(seed)
                        .map_err(|_| HarpError::key_material("seed is not a valid P-384 scalar"))?,
                )
            }
            IdentityVersion::Legacy => {
                let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
                    seed.try_into()
                        .map_err(|_| HarpError::key_material("legacy key must be 32 bytes"))?,
                );
                KeyMaterial::Legacy(x25519_dalek::StaticSecret::from(*seed))
            }
        };
        Ok(Self::from_material(material))
    }

    fn from_material(material: KeyMaterial) -> Self {
        Self {
            material: Box::new(material),
        }
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn version(&self) -> IdentityVersion {
        match *self.material {
            KeyMaterial::Legacy(_) => IdentityVersion::Legacy,
            KeyMaterial::Modern(_) => IdentityVersion::Modern,
            KeyMaterial::Nist(_) => IdentityVersion::Nist,
        }
    }

    /// Parse `v1.ck.` / `v2.ck.` strings; anything unprefixed is a legacy key.
    pub fn from_key_string(text: &str) -> HarpResult<Self> {
        let text = text.trim();
        let (version, payload) = if let Some(rest) = text.strip_prefix(MODERN_PRIVATE_PREFIX) {
            (IdentityVersion::Modern, rest)
        } else if let Some(rest) = text.strip_prefix(NIST_PRIVATE_PREFIX) {
            (IdentityVersion::Nist, rest)
        } else {
            (IdentityVersion::Legacy, text)
        };
        let raw = b64::decode_secret(payload)?;
        Self::from_seed(version, raw.as_bytes())
    }

    /// Whether `text` carries a `v1.ck.` / `v2.ck.` prefix.
    pub fn has_version_prefix(text: &str) -> bool {
        let text = text.trim_start();
        text.starts_with(MODERN_PRIVATE_PREFIX) || text.starts_with(NIST_PRIVATE_PREFIX)
    }

    pub fn to_key_string(&self) -> SecretString {
        let text = match &*self.material {
            KeyMaterial::Legacy(sk) => b64::encode(&Zeroizing::new(sk.to_bytes())[..]),
            KeyMaterial::Modern(sk) => format!(
                "{MODERN_PRIVATE_PREFIX}{}",
                b64::encode(&Zeroizing::new(sk.to_bytes())[..])
            ),
            KeyMaterial::Nist(sk) => format!(
                "{NIST_PRIVATE_PREFIX}{}",
                b64::encode(&Zeroizing::new(sk.to_bytes().to_vec()))
            ),
        };
        SecretString::from(text)
    }

    /// Public half used for sealing.
    pub fn recipient(&self) -> Recipient {
        match &*self.material {
            KeyMaterial::Legacy(sk) => Recipient::Legacy(x25519_dalek::PublicKey::from(sk)),
            KeyMaterial::Modern(sk) => Recipient::from_ed25519(&sk.verifying_key()),
            KeyMaterial::Nist(sk) => Recipient::Nist(sk.public_key()),
        }
    }

    /// Public key as written to the `public` field of an identity file:
    /// the Ed25519 verifying key, the SEC1-compressed P-384 point, or the
    /// raw X25519 key.
    pub fn public_bytes(&self) -> Vec<u8> {
        match &*self.material {
            KeyMaterial::Legacy(sk) => x25519_dalek::PublicKey::from(sk).as_bytes().to_vec(),
            KeyMaterial::Modern(sk) => sk.verifying_key().to_bytes().to_vec(),
            KeyMaterial::Nist(sk) => sk.public_key().to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    fn sign_public(&self) -> HarpResult<Option<Vec<u8>>> {
        let message = signed_message(self.version(), &self.public_bytes());
        let signature = match &*self.material {
            KeyMaterial::Legacy(_) => return Ok(None),
            KeyMaterial::Modern(sk) => sk.sign(&message).to_bytes().to_vec(),
            KeyMaterial::Nist(sk) => {
                let signing = p384::ecdsa::SigningKey::from_bytes(&sk.to_bytes())
                    .map_err(|_| HarpError::key_material("P-384 scalar rejected by ECDSA"))?;
                let sig: p384::ecdsa::Signature = signing.sign(&message);
                sig.to_bytes().to_vec()
            }
        };
        Ok(Some(signature))
    }

    fn to_jwk(&self) -> PrivateJwk {
        match &*self.material {
            KeyMaterial::Legacy(sk) => PrivateJwk {
                kty: "OKP".into(),
                crv: "X25519".into(),
                x: b64::encode(x25519_dalek::PublicKey::from(sk).as_bytes()),
                y: None,
                d: b64::encode(&Zeroizing::new(sk.to_bytes())[..]),
            },
            KeyMaterial::Modern(sk) => PrivateJwk {
                kty: "OKP".into(),
                crv: "Ed25519".into(),
                x: b64::encode(sk.verifying_key().as_bytes()),
                y: None,
                d: b64::encode(&Zeroizing::new(sk.to_bytes())[..]),
            },
            KeyMaterial::Nist(sk) => {
                let point = sk.public_key().to_encoded_point(false);
                PrivateJwk {
                    kty: "EC".into(),
                    crv: "P-384".into(),
                    x: point.x().map(|x| b64::encode(x)).unwrap_or_default(),
                    y: point.y().map(|y| b64::encode(y)),
                    d: b64::encode(&Zeroizing::new(sk.to_bytes().to_vec())),
                }
            }
        }
    }

    fn from_jwk(jwk: &PrivateJwk) -> HarpResult<Self> {
        let version = match (jwk.kty.as_str(), jwk.crv.as_str()) {
            ("OKP", "Ed25519") => IdentityVersion::Modern,
            ("EC", "P-384") => IdentityVersion::Nist,
            ("OKP", "X25519") => IdentityVersion::Legacy,
            (kty, crv) => {
                return Err(HarpError::key_material(format!(
                    "unsupported private key type {kty}/{crv}"
                )))
            }
        };
        let d = b64::decode_secret(&jwk.d)?;
        let key = Self::from_seed(version, d.as_bytes())?;

        let expected = key.to_jwk();
        if expected.x != jwk.x || expected.y != jwk.y {
            return Err(HarpError::key_material(
                "private key does not match its public coordinates",
            ));
        }
        Ok(key)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("version", &self.version())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct PrivateJwk {
    kty: String,
    crv: String,
    x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<String>,
    d: String,
}

fn signed_message(version: IdentityVersion, public: &[u8]) -> Vec<u8> {
    let mut msg = format!("harp-identity-v{}:", version.as_u8()).into_bytes();
    msg.extend_from_slice(public);
    msg
}

// ── Recipients ───────────────────────────────────────────────────────────

/// Public sealing key of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Legacy(x25519_dalek::PublicKey),
    Modern(x25519_dalek::PublicKey),
    Nist(p384::PublicKey),
}

impl Recipient {
    /// Parse a recipient string (`v1.sk.…`, `v2.sk.…`, or legacy raw b64).
    pub fn parse(text: &str) -> HarpResult<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix(MODERN_PUBLIC_PREFIX) {
            return Ok(Self::Modern(x25519_from(&b64::decode(rest)?)?));
        }
        if let Some(rest) = text.strip_prefix(NIST_PUBLIC_PREFIX) {
            let point = p384::PublicKey::from_sec1_bytes(&b64::decode(rest)?)
                .map_err(|_| HarpError::key_material("recipient is not a valid P-384 point"))?;
            return Ok(Self::Nist(point));
        }
        if text.starts_with('v') && text.get(2..6) == Some(".sk.") {
            return Err(HarpError::UnsupportedVersion(format!(
                "recipient prefix '{}'",
                &text[..6]
            )));
        }
        Ok(Self::Legacy(x25519_from(&b64::decode(text)?)?))
    }

    fn from_ed25519(vk: &ed25519_dalek::VerifyingKey) -> Self {
        Self::Modern(x25519_dalek::PublicKey::from(vk.to_montgomery().to_bytes()))
    }

    pub fn version(&self) -> IdentityVersion {
        match self {
            Self::Legacy(_) => IdentityVersion::Legacy,
            Self::Modern(_) => IdentityVersion::Modern,
            Self::Nist(_) => IdentityVersion::Nist,
        }
    }

    /// Sealing public key bytes; the sort key in deterministic mode and
    /// part of the KEK derivation.
    pub fn public_bytes(&self) -> Vec<u8> {
        match self {
            Self::Legacy(pk) | Self::Modern(pk) => pk.as_bytes().to_vec(),
            Self::Nist(pk) => pk.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Short BLAKE3 fingerprint for logs and seal metadata.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.public_bytes());
        hash.to_hex()[..16].to_string()
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy(_) => write!(f, "{}", b64::encode(&self.public_bytes())),
            Self::Modern(_) => write!(f, "{MODERN_PUBLIC_PREFIX}{}", b64::encode(&self.public_bytes())),
            Self::Nist(_) => write!(f, "{NIST_PUBLIC_PREFIX}{}", b64::encode(&self.public_bytes())),
        }
    }
}

fn x25519_from(bytes: &[u8]) -> HarpResult<x25519_dalek::PublicKey> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| HarpError::key_material("X25519 public key must be 32 bytes"))?;
    Ok(x25519_dalek::PublicKey::from(arr))
}

// ── Identity files ───────────────────────────────────────────────────────

/// How the private half of an identity file is wrapped.
pub enum KeyWrap {
    /// JWE PBES2-HS512-A256KW with the given passphrase.
    Passphrase {
        passphrase: SecretString,
        iterations: u32,
    },
    /// Any catalog transformer key string, e.g. `aes-gcm:<b64>`.
    Transformer(SecretString),
}

impl KeyWrap {
    pub fn passphrase(passphrase: SecretString) -> Self {
        Self::Passphrase {
            passphrase,
            iterations: DEFAULT_PBES2_ITERATIONS,
        }
    }
}

impl fmt::Debug for KeyWrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase { iterations, .. } => f
                .debug_struct("Passphrase")
                .field("iterations", iterations)
                .finish_non_exhaustive(),
            Self::Transformer(_) => f.write_str("Transformer([REDACTED])"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateEnvelope {
    pub encoding: String,
    pub content: String,
}

/// On-disk identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFile {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(default = "default_file_version")]
    pub version: u8,
    #[serde(default)]
    pub description: String,
    /// URL-safe base64 public key.
    pub public: String,
    pub private: PrivateEnvelope,
    /// URL-safe base64 self-signature over the public key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

fn default_file_version() -> u8 {
    IdentityVersion::Modern.as_u8()
}

impl IdentityFile {
    pub fn from_json(data: &[u8]) -> HarpResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| HarpError::input(format!("identity file is not valid JSON: {e}")))
    }

    pub fn to_json(&self) -> HarpResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| HarpError::input(format!("identity serialization: {e}")))
    }

    pub fn identity_version(&self) -> HarpResult<IdentityVersion> {
        IdentityVersion::from_u8(self.version)
    }

    /// Check the self-signature. Legacy files carry none.
    pub fn verify(&self) -> HarpResult<()> {
        let version = self.identity_version()?;
        if version == IdentityVersion::Legacy {
            return Ok(());
        }
        let public = b64::decode(&self.public)?;
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| HarpError::auth("identity file is not signed"))
            .and_then(b64::decode)?;
        let message = signed_message(version, &public);
        let invalid = || HarpError::auth("identity signature does not verify");

        match version {
            IdentityVersion::Modern => {
                let public: [u8; 32] = public.as_slice().try_into().map_err(|_| invalid())?;
                let vk = ed25519_dalek::VerifyingKey::from_bytes(&public).map_err(|_| invalid())?;
                let sig = ed25519_dalek::Signature::from_slice(&signature).map_err(|_| invalid())?;
                vk.verify_strict(&message, &sig).map_err(|_| invalid())
            }
            IdentityVersion::Nist => {
                let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(&public)
                    .map_err(|_| invalid())?;
                let sig = p384::ecdsa::Signature::from_slice(&signature).map_err(|_| invalid())?;
                vk.verify(&message, &sig).map_err(|_| invalid())
            }
            IdentityVersion::Legacy => Ok(()),
        }
    }

    /// Verified sealing key of this identity.
    pub fn recipient(&self) -> HarpResult<Recipient> {
        self.verify()?;
        let public = b64::decode(&self.public)?;
        match self.identity_version()? {
            IdentityVersion::Legacy => Ok(Recipient::Legacy(x25519_from(&public)?)),
            IdentityVersion::Modern => {
                let public: [u8; 32] = public
                    .as_slice()
                    .try_into()
                    .map_err(|_| HarpError::key_material("Ed25519 public key must be 32 bytes"))?;
                let vk = ed25519_dalek::VerifyingKey::from_bytes(&public)
                    .map_err(|_| HarpError::key_material("invalid Ed25519 public key"))?;
                Ok(Recipient::from_ed25519(&vk))
            }
            IdentityVersion::Nist => p384::PublicKey::from_sec1_bytes(&public)
                .map(Recipient::Nist)
                .map_err(|_| HarpError::key_material("invalid P-384 public key")),
        }
    }

    pub fn is_passphrase_protected(&self) -> bool {
        self.private.encoding == ENCODING_JWE
    }

    /// Unwrap the private key.
    pub fn recover(&self, wrap: &KeyWrap) -> HarpResult<IdentityKey> {
        let aad = self.public.as_bytes();
        let plaintext = Zeroizing::new(match (self.private.encoding.as_str(), wrap) {
            (ENCODING_JWE, KeyWrap::Passphrase { passphrase, .. }) => {
                JweWrapper::pbes2(KeyManagement::Pbes2Hs512A256Kw, passphrase.expose_secret().as_bytes())?
                    .decrypt(aad, &self.private.content)?
            }
            (ENCODING_TRANSFORMER, KeyWrap::Transformer(key)) => {
                let transformer = Catalog::current().parse(key.expose_secret())?;
                let sealed = b64::decode(&self.private.content)?;
                transformer.from(&TransformContext::with_aad(aad), &sealed)?
            }
            (ENCODING_JWE, KeyWrap::Transformer(key)) => {
                // A `jwe:` key string opens a JWE envelope directly.
                let transformer = Catalog::current().parse(key.expose_secret())?;
                transformer.from(
                    &TransformContext::with_aad(aad),
                    self.private.content.as_bytes(),
                )?
            }
            (ENCODING_TRANSFORMER, KeyWrap::Passphrase { .. }) => {
                return Err(HarpError::input(
                    "identity is wrapped with a transformer key, not a passphrase",
                ))
            }
            (other, _) => {
                return Err(HarpError::UnsupportedPrimitive(format!(
                    "private key encoding '{other}'"
                )))
            }
        });

        let jwk: PrivateJwk = serde_json::from_slice(&plaintext)
            .map_err(|_| HarpError::key_material("unwrapped private key is not a JWK"))?;
        let key = IdentityKey::from_jwk(&jwk)?;

        if key.version() != self.identity_version()? || b64::encode(&key.public_bytes()) != self.public
        {
            return Err(HarpError::key_material(
                "private key does not belong to this identity",
            ));
        }
        Ok(key)
    }

    /// Unwrap a passphrase-protected private key, asking `prompt` for the
    /// passphrase.
    pub fn recover_with_prompt(&self, prompt: &dyn SecretPrompt) -> HarpResult<IdentityKey> {
        if !self.is_passphrase_protected() {
            return Err(HarpError::input(
                "identity is not passphrase protected; a transformer key is required",
            ));
        }
        let label = if self.description.is_empty() {
            "identity passphrase".to_string()
        } else {
            format!("passphrase for '{}'", self.description)
        };
        let passphrase = prompt.read_secret(&label, false)?;
        self.recover(&KeyWrap::passphrase(passphrase))
    }
}

/// Generate an identity and wrap its private key.
///
/// Returns the file and the clear private key; callers that only persist the
/// file should drop the key right away.
pub fn identity_new(
    description: &str,
    version: IdentityVersion,
    wrap: &KeyWrap,
) -> HarpResult<(IdentityFile, IdentityKey)> {
    let catalog = Catalog::current();
    version.check_sealable(catalog.fips())?;

    let key = IdentityKey::generate(version)?;
    let public = b64::encode(&key.public_bytes());
    let aad = public.as_bytes();

    let jwk = Zeroizing::new(
        serde_json::to_vec(&key.to_jwk())
            .map_err(|e| HarpError::input(format!("private key serialization: {e}")))?,
    );

    let private = match wrap {
        KeyWrap::Passphrase {
            passphrase,
            iterations,
        } => PrivateEnvelope {
            encoding: ENCODING_JWE.into(),
            content: JweWrapper::pbes2(
                KeyManagement::Pbes2Hs512A256Kw,
                passphrase.expose_secret().as_bytes(),
            )?
            .with_iterations(*iterations)?
            .with_content_type(JWK_CONTENT_TYPE)
            .encrypt(aad, &jwk)?,
        },
        KeyWrap::Transformer(key) => {
            let transformer = catalog.parse(key.expose_secret())?;
            let sealed = transformer.to(&TransformContext::with_aad(aad), &jwk)?;
            PrivateEnvelope {
                encoding: ENCODING_TRANSFORMER.into(),
                content: b64::encode(&sealed),
            }
        }
    };

    let file = IdentityFile {
        context: IDENTITY_CONTEXT.into(),
        version: version.as_u8(),
        description: description.to_string(),
        public,
        private,
        signature: key.sign_public()?.map(|s| b64::encode(&s)),
    };

    tracing::info!(
        version = %version,
        recipient = %key.recipient().fingerprint(),
        encoding = %file.private.encoding,
        "identity created"
    );
    Ok((file, key))
}

/// Recover the private key of an identity file.
pub fn identity_recover(file: &IdentityFile, wrap: &KeyWrap) -> HarpResult<IdentityKey> {
    let key = file.recover(wrap)?;
    tracing::info!(
        version = %key.version(),
        recipient = %key.recipient().fingerprint(),
        "identity recovered"
    );
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harp_core::io::FixedPrompt;

    fn fast_passphrase(pass: &str) -> KeyWrap {
        KeyWrap::Passphrase {
            passphrase: SecretString::from(pass),
            iterations: 1_000,
        }
    }

    #[test]
    fn test_version_names() {
        assert_eq!("nist".parse::<IdentityVersion>().unwrap(), IdentityVersion::Nist);
        assert_eq!("v1".parse::<IdentityVersion>().unwrap(), IdentityVersion::Modern);
        assert!(matches!(
            "v9".parse::<IdentityVersion>().unwrap_err(),
            HarpError::UnsupportedVersion(_)
        ));
        assert_eq!(IdentityVersion::default_for(true), IdentityVersion::Nist);
    }

    #[test]
    fn test_legacy_never_generated() {
        let err = IdentityKey::generate(IdentityVersion::Legacy).unwrap_err();
        assert!(matches!(err, HarpError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_key_string_roundtrip() {
        for version in [IdentityVersion::Modern, IdentityVersion::Nist] {
            let key = IdentityKey::generate(version).unwrap();
            let text = key.to_key_string();
            let parsed = IdentityKey::from_key_string(text.expose_secret()).unwrap();
            assert_eq!(parsed.version(), version);
            assert_eq!(parsed.recipient(), key.recipient());
        }
        let text = key_string_for_legacy();
        let legacy = IdentityKey::from_key_string(&text).unwrap();
        assert_eq!(legacy.version(), IdentityVersion::Legacy);
    }

    fn key_string_for_legacy() -> String {
        b64::encode(&[7u8; 32])
    }

    #[test]
    fn test_recipient_string_roundtrip() {
        for version in [IdentityVersion::Modern, IdentityVersion::Nist] {
            let recipient = IdentityKey::generate(version).unwrap().recipient();
            let text = recipient.to_string();
            assert!(text.starts_with(if version == IdentityVersion::Modern {
                "v1.sk."
            } else {
                "v2.sk."
            }));
            assert_eq!(Recipient::parse(&text).unwrap(), recipient);
        }
    }

    #[test]
    fn test_recipient_parse_errors() {
        assert!(matches!(
            Recipient::parse("v1.sk.AAAA").unwrap_err(),
            HarpError::InvalidKeyMaterial(_)
        ));
        assert!(matches!(
            Recipient::parse("v7.sk.AAAA").unwrap_err(),
            HarpError::UnsupportedVersion(_)
        ));
        assert!(Recipient::parse("v2.sk.AAAA").is_err());
    }

    #[test]
    fn test_modern_recipient_matches_sealing_secret() {
        // The Montgomery form of the verifying key must be the X25519 public
        // key of the clamped signing scalar.
        let key = IdentityKey::generate(IdentityVersion::Modern).unwrap();
        let KeyMaterial::Modern(sk) = key.material() else {
            unreachable!()
        };
        let secret = x25519_dalek::StaticSecret::from(sk.to_scalar_bytes());
        assert_eq!(
            key.recipient(),
            Recipient::Modern(x25519_dalek::PublicKey::from(&secret))
        );
    }

    #[test]
    fn test_identity_file_passphrase_roundtrip() {
        for version in [IdentityVersion::Modern, IdentityVersion::Nist] {
            let (file, key) = identity_new("ops", version, &fast_passphrase("correct horse")).unwrap();
            assert_eq!(file.private.encoding, "jwe");
            assert!(file.is_passphrase_protected());
            file.verify().unwrap();

            let json = file.to_json().unwrap();
            let parsed = IdentityFile::from_json(&json).unwrap();
            assert_eq!(parsed, file);

            let recovered = identity_recover(&parsed, &fast_passphrase("correct horse")).unwrap();
            assert_eq!(recovered.recipient(), key.recipient());
            assert_eq!(parsed.recipient().unwrap(), key.recipient());
        }
    }

    #[test]
    fn test_wrong_passphrase() {
        let (file, _) =
            identity_new("ops", IdentityVersion::Modern, &fast_passphrase("right")).unwrap();
        let err = identity_recover(&file, &fast_passphrase("wrong")).unwrap_err();
        assert!(matches!(err, HarpError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_transformer_wrap() {
        let wrap = KeyWrap::Transformer(SecretString::from(format!(
            "aes-gcm:{}",
            b64::encode(&[9u8; 32])
        )));
        let (file, key) = identity_new("", IdentityVersion::Nist, &wrap).unwrap();
        assert_eq!(file.private.encoding, "transformer");
        assert!(!file.is_passphrase_protected());
        assert_eq!(identity_recover(&file, &wrap).unwrap().recipient(), key.recipient());

        let err = identity_recover(&file, &fast_passphrase("x")).unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)));
    }

    #[test]
    fn test_private_bound_to_public() {
        let wrap = fast_passphrase("pw");
        let (mut file, _) = identity_new("a", IdentityVersion::Modern, &wrap).unwrap();
        let (other, _) = identity_new("b", IdentityVersion::Modern, &wrap).unwrap();
        // Splice another identity's public key: the AAD no longer matches.
        file.public = other.public;
        assert!(identity_recover(&file, &wrap).is_err());
    }

    #[test]
    fn test_signature_tamper_detected() {
        let (mut file, _) =
            identity_new("a", IdentityVersion::Nist, &fast_passphrase("pw")).unwrap();
        let (other, _) =
            identity_new("b", IdentityVersion::Nist, &fast_passphrase("pw")).unwrap();
        file.signature = other.signature;
        assert!(matches!(
            file.verify().unwrap_err(),
            HarpError::AuthenticationFailed(_)
        ));
        assert!(file.recipient().is_err());

        file.signature = None;
        assert!(file.verify().is_err());
    }

    #[test]
    fn test_recover_with_prompt() {
        let (file, key) =
            identity_new("ci", IdentityVersion::Modern, &fast_passphrase("from-prompt")).unwrap();
        let prompt = FixedPrompt::new(SecretString::from("from-prompt"));
        let recovered = file.recover_with_prompt(&prompt).unwrap();
        assert_eq!(recovered.recipient(), key.recipient());
    }

    #[test]
    fn test_debug_redacted() {
        let key = IdentityKey::generate(IdentityVersion::Modern).unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(key.to_key_string().expose_secret()));
    }
}
