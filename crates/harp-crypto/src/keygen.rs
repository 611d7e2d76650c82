//! Fresh key strings for the symmetric side of the catalog.

use harp_core::{HarpError, HarpResult};
use secrecy::SecretString;

use crate::catalog::Catalog;
use crate::secret::SecretBuffer;
use crate::{b64, KEY_SIZE};

/// Kinds accepted by [`generate`], in the order `harp keygen --list` prints them.
pub const KINDS: &[&str] = &[
    "aes-gcm",
    "aes-gcm-128",
    "aes-gcm-192",
    "chacha20",
    "xchacha20",
    "secretbox",
    "aes-siv",
    "aes-pmac-siv",
    "fernet",
    "paseto",
    "hs256",
    "hs384",
    "hs512",
    "jwe-a256kw",
    "dckd-master",
];

/// Generate a key string of the given kind, e.g. `aes-gcm:<b64>`.
///
/// `dckd-master` yields a bare 32-byte seed (no algorithm prefix), the form
/// `seal --dckd-master` takes. Refused under FIPS for non-approved kinds.
pub fn generate(kind: &str) -> HarpResult<SecretString> {
    generate_with(&Catalog::current(), kind)
}

pub fn generate_with(catalog: &Catalog, kind: &str) -> HarpResult<SecretString> {
    let (prefix, len) = match kind {
        "aes-gcm" | "aes-gcm-256" => ("aes-gcm", 32),
        "aes-gcm-128" => ("aes-gcm", 16),
        "aes-gcm-192" => ("aes-gcm", 24),
        "chacha20" => ("chacha20", KEY_SIZE),
        "xchacha20" => ("xchacha20", KEY_SIZE),
        "secretbox" => ("secretbox", KEY_SIZE),
        "aes-siv" => ("aes-siv", 64),
        "aes-pmac-siv" => ("aes-pmac-siv", 64),
        "fernet" => ("fernet", KEY_SIZE),
        "paseto" => ("paseto", KEY_SIZE),
        "hs256" => ("hs256", 32),
        "hs384" => ("hs384", 48),
        "hs512" => ("hs512", 64),
        "jwe-a256kw" => ("jwe:a256kw", 32),
        "dckd-master" => {
            let seed = SecretBuffer::random(KEY_SIZE);
            return Ok(SecretString::from(b64::encode(seed.as_bytes())));
        }
        other => {
            return Err(HarpError::UnsupportedPrimitive(format!(
                "no key generator for '{other}'"
            )))
        }
    };

    catalog.check_allowed(prefix)?;

    let key = SecretBuffer::random(len);
    tracing::debug!(kind, bits = len * 8, "generated key");
    Ok(SecretString::from(format!(
        "{prefix}:{}",
        b64::encode(key.as_bytes())
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_every_kind_parses_back() {
        let catalog = Catalog::new(false);
        for kind in KINDS.iter().filter(|k| **k != "dckd-master") {
            let key = generate_with(&catalog, kind).unwrap();
            catalog
                .parse(key.expose_secret())
                .unwrap_or_else(|e| panic!("{kind}: {e}"));
        }
    }

    #[test]
    fn test_keys_are_fresh() {
        let catalog = Catalog::new(false);
        let a = generate_with(&catalog, "xchacha20").unwrap();
        let b = generate_with(&catalog, "xchacha20").unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
        assert!(a.expose_secret().starts_with("xchacha20:"));
    }

    #[test]
    fn test_dckd_master_is_bare_seed() {
        let seed = generate_with(&Catalog::new(false), "dckd-master").unwrap();
        assert_eq!(b64::decode(seed.expose_secret()).unwrap().len(), KEY_SIZE);
    }

    #[test]
    fn test_fips_restricts_kinds() {
        let fips = Catalog::new(true);
        assert!(generate_with(&fips, "aes-gcm").is_ok());
        assert!(generate_with(&fips, "jwe-a256kw").is_ok());
        assert!(matches!(
            generate_with(&fips, "chacha20").unwrap_err(),
            HarpError::FipsNotPermitted(_)
        ));
    }

    #[test]
    fn test_unknown_kind() {
        assert!(generate_with(&Catalog::new(false), "rot13").is_err());
    }
}
