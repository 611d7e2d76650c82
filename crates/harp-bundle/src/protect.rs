//! In-bundle value protection.
//!
//! Two modes, exactly one of which must be selected:
//! - whole: one transformer applied to every value of every package;
//! - aliased: packages annotated with [`ENCRYPTION_KEY_ALIAS`] are
//!   transformed with the key mapped to their alias; others pass through.
//!
//! Each value is bound to its location with AAD `package || 0x00 || field`,
//! so a protected value moved to another field or package fails to open.
//! Packages are processed in parallel; errors are reported in package order.

use std::collections::BTreeMap;

use harp_core::{HarpError, HarpResult};
use harp_crypto::{Catalog, Direction, Primitive, TransformContext, Transformer};
use rayon::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::model::{Bundle, Package};

/// Package annotation naming the transformer alias.
pub const ENCRYPTION_KEY_ALIAS: &str = "harp.elastic.co/v1/package#encryptionKeyAlias";

/// Transformer selection for [`encrypt`] and [`decrypt`].
#[derive(Default)]
pub struct ProtectionOptions {
    /// Whole-bundle transformer key string.
    pub transformer: Option<SecretString>,
    /// Alias → transformer key string.
    pub key_aliases: BTreeMap<String, SecretString>,
    /// Pass packages with an unmapped alias through unchanged instead of failing.
    pub skip_unresolved: bool,
}

impl ProtectionOptions {
    pub fn whole(key: impl Into<String>) -> Self {
        Self {
            transformer: Some(SecretString::from(key.into())),
            ..Default::default()
        }
    }

    pub fn aliased<I, A, K>(aliases: I, skip_unresolved: bool) -> Self
    where
        I: IntoIterator<Item = (A, K)>,
        A: Into<String>,
        K: Into<String>,
    {
        Self {
            transformer: None,
            key_aliases: aliases
                .into_iter()
                .map(|(a, k)| (a.into(), SecretString::from(k.into())))
                .collect(),
            skip_unresolved,
        }
    }

    fn resolve(&self, catalog: &Catalog) -> HarpResult<Mode> {
        match (&self.transformer, self.key_aliases.is_empty()) {
            (Some(_), false) => Err(HarpError::input(
                "whole-bundle transformer and key aliases are mutually exclusive",
            )),
            (None, true) => Err(HarpError::input(
                "either a whole-bundle transformer or a key alias map is required",
            )),
            (Some(key), true) => Ok(Mode::Whole(catalog.parse(key.expose_secret())?)),
            (None, false) => {
                let transformers = self
                    .key_aliases
                    .iter()
                    .map(|(alias, key)| Ok((alias.clone(), catalog.parse(key.expose_secret())?)))
                    .collect::<HarpResult<BTreeMap<_, _>>>()?;
                Ok(Mode::Aliased {
                    transformers,
                    skip_unresolved: self.skip_unresolved,
                })
            }
        }
    }
}

impl std::fmt::Debug for ProtectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionOptions")
            .field("whole", &self.transformer.is_some())
            .field("aliases", &self.key_aliases.keys().collect::<Vec<_>>())
            .field("skip_unresolved", &self.skip_unresolved)
            .finish()
    }
}

enum Mode {
    Whole(Primitive),
    Aliased {
        transformers: BTreeMap<String, Primitive>,
        skip_unresolved: bool,
    },
}

/// Encrypt package values. The input bundle is left untouched.
pub fn encrypt(bundle: &Bundle, options: &ProtectionOptions) -> HarpResult<Bundle> {
    run(bundle, options, Direction::Encode)
}

/// Reverse [`encrypt`] with the same options.
pub fn decrypt(bundle: &Bundle, options: &ProtectionOptions) -> HarpResult<Bundle> {
    run(bundle, options, Direction::Decode)
}

fn run(bundle: &Bundle, options: &ProtectionOptions, direction: Direction) -> HarpResult<Bundle> {
    let mode = options.resolve(&Catalog::current())?;
    let mut out = bundle.clone();

    let results: Vec<HarpResult<usize>> = out
        .packages
        .par_iter_mut()
        .map(|package| process_package(package, &mode, direction))
        .collect();

    let mut values = 0;
    let mut packages = 0;
    for result in results {
        let n = result?;
        if n > 0 {
            packages += 1;
            values += n;
        }
    }

    tracing::info!(?direction, packages, values, "bundle values processed");
    Ok(out)
}

/// Returns the number of values transformed.
fn process_package(package: &mut Package, mode: &Mode, direction: Direction) -> HarpResult<usize> {
    let transformer = match mode {
        Mode::Whole(t) => t,
        Mode::Aliased {
            transformers,
            skip_unresolved,
        } => {
            let Some(alias) = package.annotations.get(ENCRYPTION_KEY_ALIAS) else {
                return Ok(0);
            };
            match transformers.get(alias) {
                Some(t) => t,
                None if *skip_unresolved => {
                    tracing::warn!(
                        package = %package.name,
                        alias = %alias,
                        "key alias not resolvable, package left unchanged"
                    );
                    return Ok(0);
                }
                None => {
                    return Err(HarpError::UnresolvedAlias {
                        alias: alias.clone(),
                        package: package.name.clone(),
                    })
                }
            }
        }
    };

    let name = &package.name;
    for kv in &mut package.secrets.data {
        let ctx = TransformContext::with_aad(value_aad(name, &kv.key));
        let transformed = transformer
            .apply(direction, &ctx, &kv.value)
            .map_err(|e| match direction {
                Direction::Decode => HarpError::auth(format!(
                    "package '{name}' field '{}': {e}",
                    kv.key
                )),
                Direction::Encode => e,
            })?;
        kv.value.zeroize();
        kv.value = transformed;
    }

    tracing::debug!(
        package = %name,
        algorithm = transformer.algorithm(),
        fields = package.secrets.data.len(),
        "package values transformed"
    );
    Ok(package.secrets.data.len())
}

fn value_aad(package: &str, field: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(package.len() + 1 + field.len());
    aad.extend_from_slice(package.as_bytes());
    aad.push(0);
    aad.extend_from_slice(field.as_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use harp_crypto::b64;
    use proptest::prelude::*;

    fn aes_key(byte: u8) -> String {
        format!("aes-gcm:{}", b64::encode(&[byte; 32]))
    }

    fn bundle() -> Bundle {
        let mut bundle = Bundle::new();
        bundle.packages.push(
            Package::new("app/prod/db")
                .with_annotation(ENCRYPTION_KEY_ALIAS, "primary")
                .with_secret("password", "hunter2"),
        );
        bundle
            .packages
            .push(Package::new("app/prod/cache").with_secret("token", "abc"));
        bundle
    }

    #[test]
    fn test_whole_mode_roundtrip() {
        let options = ProtectionOptions::whole(aes_key(1));
        let sealed = encrypt(&bundle(), &options).unwrap();
        for package in &sealed.packages {
            assert!(package.secrets.data.iter().all(|kv| kv.value.len() > 28));
        }
        assert_eq!(decrypt(&sealed, &options).unwrap(), bundle());
    }

    #[test]
    fn test_aliased_mode_touches_only_annotated() {
        let options = ProtectionOptions::aliased([("primary", aes_key(2))], false);
        let sealed = encrypt(&bundle(), &options).unwrap();
        assert_ne!(sealed.packages[0].get("password"), Some(&b"hunter2"[..]));
        assert_eq!(sealed.packages[1], bundle().packages[1]);
        assert_eq!(decrypt(&sealed, &options).unwrap(), bundle());
    }

    #[test]
    fn test_unresolved_alias() {
        let options = ProtectionOptions::aliased([("secondary", aes_key(2))], false);
        let err = encrypt(&bundle(), &options).unwrap_err();
        match err {
            HarpError::UnresolvedAlias { alias, package } => {
                assert_eq!(alias, "primary");
                assert_eq!(package, "app/prod/db");
            }
            other => panic!("expected UnresolvedAlias, got {other:?}"),
        }

        let options = ProtectionOptions::aliased([("secondary", aes_key(2))], true);
        assert_eq!(encrypt(&bundle(), &options).unwrap(), bundle());
    }

    #[test]
    fn test_mode_selection() {
        let err = encrypt(&bundle(), &ProtectionOptions::default()).unwrap_err();
        assert!(matches!(err, HarpError::InputValidation(_)));

        let mut both = ProtectionOptions::aliased([("primary", aes_key(1))], false);
        both.transformer = Some(SecretString::from(aes_key(1)));
        assert!(matches!(
            encrypt(&bundle(), &both).unwrap_err(),
            HarpError::InputValidation(_)
        ));
    }

    #[test]
    fn test_bad_alias_key() {
        let options = ProtectionOptions::aliased([("primary", "aes-gcm:short")], false);
        assert!(matches!(
            encrypt(&bundle(), &options).unwrap_err(),
            HarpError::InvalidKeyMaterial(_)
        ));
    }

    #[test]
    fn test_wrong_key_names_package() {
        let sealed = encrypt(&bundle(), &ProtectionOptions::whole(aes_key(1))).unwrap();
        let err = decrypt(&sealed, &ProtectionOptions::whole(aes_key(9))).unwrap_err();
        assert!(matches!(err, HarpError::AuthenticationFailed(_)));
        assert!(err.to_string().contains("app/prod/db"));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_value_bound_to_location() {
        let options = ProtectionOptions::whole(aes_key(1));
        let mut sealed = encrypt(&bundle(), &options).unwrap();
        let moved = sealed.packages[0].secrets.data[0].value.clone();
        sealed.packages[1].secrets.data[0].value = moved;
        let err = decrypt(&sealed, &options).unwrap_err();
        assert!(err.to_string().contains("app/prod/cache"));
    }

    #[test]
    fn test_input_not_mutated() {
        let original = bundle();
        let _ = encrypt(&original, &ProtectionOptions::whole(aes_key(1))).unwrap();
        assert_eq!(original, bundle());
    }

    #[test]
    fn test_debug_hides_keys() {
        let dbg = format!("{:?}", ProtectionOptions::whole(aes_key(1)));
        assert!(!dbg.contains(&b64::encode(&[1u8; 32])));
    }

    proptest! {
        #[test]
        fn encrypt_then_decrypt_is_identity(
            values in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..8)
        ) {
            let mut bundle = Bundle::new();
            for (i, v) in values.into_iter().enumerate() {
                bundle.packages.push(Package::new(format!("pkg/{i}")).with_secret("value", v));
            }
            let options = ProtectionOptions::whole(format!("chacha20:{}", b64::encode(&[3u8; 32])));
            let sealed = encrypt(&bundle, &options).unwrap();
            prop_assert_eq!(decrypt(&sealed, &options).unwrap(), bundle);
        }
    }
}
