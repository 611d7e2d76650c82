//! Every single-bit flip after the magic must make unseal fail.
//!
//! Header, nonce and ciphertext flips surface as an authentication failure
//! or a parse error. A flip inside a recipient block corrupts only the
//! wrapped key of that block, so it surfaces as `NoMatchingRecipient`.

use harp_bundle::{Bundle, Package};
use harp_container::{
    seal, unseal, IdentityKey, IdentityVersion, SealOptions, SealedContainer, UnsealKey,
    UnsealOptions,
};
use harp_core::HarpError;
use secrecy::ExposeSecret;

fn db_bundle() -> Bundle {
    let mut bundle = Bundle::new();
    bundle
        .packages
        .push(Package::new("app/prod/db").with_secret("password", "hunter2"));
    bundle
}

fn sealed(identity: &IdentityKey) -> Vec<u8> {
    let options = SealOptions {
        recipients: vec![identity.recipient().to_string()],
        no_container_identity: true,
        ..Default::default()
    };
    seal(&db_bundle(), &options).unwrap().container
}

/// Kinds a single-bit flip may produce.
fn expected_failure(err: &HarpError, in_recipient_blocks: bool) -> bool {
    match err {
        HarpError::AuthenticationFailed(_)
        | HarpError::MalformedContainer(_)
        | HarpError::UnsupportedContainerVersion(_)
        | HarpError::SizeLimitExceeded { .. } => true,
        HarpError::NoMatchingRecipient => in_recipient_blocks,
        _ => false,
    }
}

fn options_for(identity: &IdentityKey) -> UnsealOptions<'static> {
    let copy = IdentityKey::from_key_string(identity.to_key_string().expose_secret()).unwrap();
    UnsealOptions::new(UnsealKey::Identities(vec![copy]))
}

#[test]
fn flip_inside_ciphertext_fails_authentication() {
    let identity = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let mut container = sealed(&identity);
    let offset = container.len() - 17;
    container[offset] ^= 0x01;

    let err = unseal(&container, &options_for(&identity)).unwrap_err();
    assert!(matches!(err, HarpError::AuthenticationFailed(_)), "{err}");
}

#[test]
fn every_bit_after_magic_is_covered() {
    for version in [IdentityVersion::Modern, IdentityVersion::Nist] {
        let identity = IdentityKey::generate(version).unwrap();
        let container = sealed(&identity);
        let options = options_for(&identity);
        assert!(unseal(&container, &options).is_ok());

        // P-384 is slow in debug builds: one rotating bit per byte there.
        let bits = |offset: usize| match version {
            IdentityVersion::Nist => (offset % 8)..(offset % 8 + 1),
            _ => 0..8,
        };

        // magic, version, flags, u16 count
        let blocks = 8..SealedContainer::parse(&container).unwrap().aad().unwrap().len();

        for offset in 4..container.len() {
            for bit in bits(offset) {
                let mut tampered = container.clone();
                tampered[offset] ^= 1 << bit;
                let Err(err) = unseal(&tampered, &options) else {
                    panic!("{version}: flip of bit {bit} at offset {offset} went unnoticed");
                };
                assert!(
                    expected_failure(&err, blocks.contains(&offset)),
                    "{version}: flip of bit {bit} at offset {offset} gave {err:?}"
                );
            }
        }
    }
}

#[test]
fn ciphertext_flips_are_authentication_failures() {
    let identity = IdentityKey::generate(IdentityVersion::Nist).unwrap();
    let container = sealed(&identity);
    let options = options_for(&identity);
    let parsed = SealedContainer::parse(&container).unwrap();
    let start = container.len() - parsed.ciphertext.len();

    for offset in start..container.len() {
        let mut tampered = container.clone();
        tampered[offset] ^= 0x80;
        assert!(matches!(
            unseal(&tampered, &options).unwrap_err(),
            HarpError::AuthenticationFailed(_)
        ));
    }
}

#[test]
fn truncation_is_a_parse_error() {
    let identity = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let container = sealed(&identity);
    let options = options_for(&identity);
    for len in [0, 4, 8, 40, container.len() - 1] {
        let err = unseal(&container[..len], &options).unwrap_err();
        assert!(matches!(err, HarpError::MalformedContainer(_)), "len {len}: {err}");
    }
}
