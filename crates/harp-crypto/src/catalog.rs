//! Primitive catalog: key string → keyed transformer.
//!
//! Key strings are `<algorithm-id>:<payload>`. The registry is closed; an
//! unknown id is `UnsupportedPrimitive`, a bad payload `InvalidKeyMaterial`.
//! In FIPS mode the id is checked against the approved set before any key
//! material is parsed.

use harp_core::{HarpError, HarpResult};

use crate::aead::SymmetricCipher;
use crate::compression::Compression;
use crate::encoding::Encoding;
use crate::hash::HashAlgorithm;
use crate::jwe::JweWrapper;
use crate::signature::SignatureKey;
use crate::transformer::{TransformContext, Transformer};

const SIGNATURE_IDS: &[&str] = &[
    "ed25519", "ed448", "es256", "es384", "es512", "rs256", "rs384", "rs512", "ps256", "ps384",
    "ps512", "hs256", "hs384", "hs512",
];

/// A parsed catalog entry.
#[derive(Debug)]
pub enum Primitive {
    Symmetric(SymmetricCipher),
    Jwe(JweWrapper),
    Signature(SignatureKey),
    Hash(HashAlgorithm),
    Compression(Compression),
    Encoding(Encoding),
}

impl Primitive {
    /// Algorithm id for logs and error messages.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Symmetric(c) => c.algorithm(),
            Self::Jwe(_) => "jwe",
            Self::Signature(s) => s.algorithm(),
            Self::Hash(h) => h.name(),
            Self::Compression(c) => c.name(),
            Self::Encoding(e) => e.name(),
        }
    }

    fn inner(&self) -> &dyn Transformer {
        match self {
            Self::Symmetric(t) => t,
            Self::Jwe(t) => t,
            Self::Signature(t) => t,
            Self::Hash(t) => t,
            Self::Compression(t) => t,
            Self::Encoding(t) => t,
        }
    }
}

impl Transformer for Primitive {
    fn to(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.inner().to(ctx, input)
    }

    fn from(&self, ctx: &TransformContext, input: &[u8]) -> HarpResult<Vec<u8>> {
        self.inner().from(ctx, input)
    }
}

/// Registry view, bound to a FIPS setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Catalog {
    fips: bool,
}

impl Catalog {
    pub fn new(fips: bool) -> Self {
        Self { fips }
    }

    /// Catalog for the process-wide FIPS flag.
    pub fn current() -> Self {
        Self::new(harp_core::fips::enabled())
    }

    pub fn fips(&self) -> bool {
        self.fips
    }

    /// Parse a key string into a ready-to-use primitive.
    pub fn parse(&self, key: &str) -> HarpResult<Primitive> {
        let (id, payload) = key.split_once(':').ok_or_else(|| {
            HarpError::input("key string must look like <algorithm>:<payload>")
        })?;
        let id = id.trim().to_ascii_lowercase();

        self.check_allowed(key)?;

        let primitive = match id.as_str() {
            "aes-gcm" => Primitive::Symmetric(SymmetricCipher::aes_gcm(payload)?),
            "chacha20" => Primitive::Symmetric(SymmetricCipher::chacha20(payload)?),
            "xchacha20" => Primitive::Symmetric(SymmetricCipher::xchacha20(payload)?),
            "secretbox" => Primitive::Symmetric(SymmetricCipher::secretbox(payload)?),
            "aes-siv" => Primitive::Symmetric(SymmetricCipher::aes_siv(payload)?),
            "aes-pmac-siv" => Primitive::Symmetric(SymmetricCipher::aes_pmac_siv(payload)?),
            "fernet" => Primitive::Symmetric(SymmetricCipher::fernet(payload)?),
            "paseto" => Primitive::Symmetric(SymmetricCipher::paseto(payload)?),
            "jwe" => Primitive::Jwe(JweWrapper::parse(payload)?),
            "hash" => Primitive::Hash(HashAlgorithm::from_name(payload)?),
            "compression" => Primitive::Compression(Compression::from_name(payload)?),
            "encoding" => Primitive::Encoding(Encoding::from_name(payload)?),
            sig if SIGNATURE_IDS.contains(&sig) => {
                Primitive::Signature(SignatureKey::parse(sig, payload)?)
            }
            other => return Err(HarpError::UnsupportedPrimitive(other.to_string())),
        };

        tracing::trace!(algorithm = primitive.algorithm(), fips = self.fips, "primitive parsed");
        Ok(primitive)
    }

    /// Refuse ids outside the FIPS set when FIPS mode is on.
    ///
    /// Accepts a full key string or a bare `<id>[:<sub-algorithm>]` prefix.
    /// Unknown ids pass through so that parsing reports them as unsupported.
    pub fn check_allowed(&self, key: &str) -> HarpResult<()> {
        if !self.fips {
            return Ok(());
        }
        let (id, rest) = key.split_once(':').unwrap_or((key, ""));
        let id = id.trim().to_ascii_lowercase();
        match fips_approved(&id, rest) {
            Some(false) => Err(HarpError::FipsNotPermitted(id)),
            _ => Ok(()),
        }
    }
}

/// `None` for ids the catalog does not know.
///
/// Approved: AES-GCM, Fernet, and the AES-256 key-wrap JWE modes. Encoders
/// and compressors carry no key and stay available. Signatures, HMAC and
/// hashes are refused.
fn fips_approved(id: &str, rest: &str) -> Option<bool> {
    let approved = match id {
        "aes-gcm" | "fernet" => true,
        "jwe" => matches!(
            rest.split(':').next().map(str::to_ascii_lowercase).as_deref(),
            Some("a256kw" | "pbes2-hs512-a256kw")
        ),
        "encoding" | "compression" => true,
        "hash" => false,
        "chacha20" | "xchacha20" | "secretbox" | "aes-siv" | "aes-pmac-siv" | "paseto" => false,
        sig if SIGNATURE_IDS.contains(&sig) => false,
        _ => return None,
    };
    Some(approved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b64;

    fn key(id: &str, len: usize) -> String {
        format!("{id}:{}", b64::encode(&vec![0x42; len]))
    }

    #[test]
    fn test_parse_families() {
        let catalog = Catalog::new(false);
        let cases = [
            (key("aes-gcm", 32), "aes-gcm"),
            (key("xchacha20", 32), "xchacha20"),
            (key("ed25519", 32), "ed25519"),
            (key("hs256", 32), "hs256"),
            ("hash:sha256".to_string(), "sha256"),
            ("compression:zstd".to_string(), "zstd"),
            ("encoding:base64url".to_string(), "base64url"),
            (key("jwe:a256kw", 32), "jwe"),
        ];
        for (k, alg) in cases {
            assert_eq!(catalog.parse(&k).unwrap().algorithm(), alg);
        }
    }

    #[test]
    fn test_unknown_id() {
        let err = Catalog::new(false).parse("rot13:abc").unwrap_err();
        assert!(matches!(err, HarpError::UnsupportedPrimitive(_)));
        let err = Catalog::new(true).parse("rot13:abc").unwrap_err();
        assert!(matches!(err, HarpError::UnsupportedPrimitive(_)));
    }

    #[test]
    fn test_missing_separator() {
        let err = Catalog::new(false).parse("aes-gcm").unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)));
    }

    #[test]
    fn test_bad_payload_is_key_material() {
        let err = Catalog::new(false).parse("aes-gcm:!!!").unwrap_err();
        assert!(matches!(err, HarpError::InvalidKeyMaterial(_)));
        let err = Catalog::new(false).parse(&key("chacha20", 12)).unwrap_err();
        assert!(matches!(err, HarpError::InvalidKeyMaterial(_)));
    }

    #[test]
    fn test_fips_whitelist() {
        let fips = Catalog::new(true);
        for allowed in [
            key("aes-gcm", 32),
            key("jwe:a256kw", 32),
            "jwe:pbes2-hs512-a256kw:passphrase".to_string(),
            "encoding:hex".to_string(),
            "compression:gzip".to_string(),
        ] {
            assert!(fips.parse(&allowed).is_ok(), "{allowed}");
        }

        for refused in [
            key("xchacha20", 32),
            key("secretbox", 32),
            key("ed25519", 32),
            key("es256", 32),
            key("hs256", 32),
            key("hs512", 64),
            key("jwe:a128kw", 16),
            "jwe:pbes2-hs256-a128kw:passphrase".to_string(),
            "hash:sha256".to_string(),
            "hash:md5".to_string(),
        ] {
            let err = fips.parse(&refused).unwrap_err();
            assert!(matches!(err, HarpError::FipsNotPermitted(_)), "{refused}");
        }
    }

    #[test]
    fn test_fips_prefix_check() {
        let fips = Catalog::new(true);
        assert!(fips.check_allowed("jwe:a256kw").is_ok());
        assert!(fips.check_allowed("JWE:A256KW").is_ok());
        assert!(fips.check_allowed("jwe:a192kw").is_err());
        assert!(fips.check_allowed("hs256").is_err());
    }

    #[test]
    fn test_fips_refuses_before_parsing_key() {
        // Garbage payload, but the id alone is enough to refuse.
        let err = Catalog::new(true).parse("chacha20:***").unwrap_err();
        assert!(matches!(err, HarpError::FipsNotPermitted(_)));
    }

    #[test]
    fn test_primitive_is_transformer() {
        let p = Catalog::new(false).parse(&key("aes-gcm", 16)).unwrap();
        let ctx = TransformContext::with_aad("aad");
        let ct = p.to(&ctx, b"value").unwrap();
        assert_eq!(p.from(&ctx, &ct).unwrap(), b"value");
    }
}
