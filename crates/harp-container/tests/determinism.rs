//! Deterministic (DCKD) sealing.

use harp_bundle::{Bundle, Package, ProtectionOptions};
use harp_container::{
    seal, unseal, IdentityKey, IdentityVersion, SealOptions, SealedContainer, UnsealKey,
    UnsealOptions,
};
use harp_core::HarpError;
use harp_crypto::{b64, DckdSeed};
use sha2::{Digest, Sha256};

const TARGET: &str = "us-east-1/v1";

fn db_bundle() -> Bundle {
    let mut bundle = Bundle::new();
    bundle
        .packages
        .push(Package::new("app/prod/db").with_secret("password", "hunter2"));
    bundle
}

fn master() -> String {
    b64::encode(&[0x11; 32])
}

fn dckd() -> DckdSeed {
    DckdSeed::from_key_string(&master(), TARGET).unwrap()
}

#[test]
fn dckd_runs_are_byte_identical() {
    let run = || {
        let options = SealOptions {
            dckd: Some(dckd()),
            no_container_identity: true,
            ..Default::default()
        };
        seal(&db_bundle(), &options).unwrap().container
    };

    let first = run();
    let second = run();
    assert_eq!(Sha256::digest(&first), Sha256::digest(&second));
    assert_eq!(first, second);

    let parsed = SealedContainer::parse(&first).unwrap();
    assert!(parsed.flags.deterministic());
    assert!(parsed.flags.no_container_identity());
    assert!(parsed.recipients.is_empty());

    let opened = unseal(&first, &UnsealOptions::new(UnsealKey::Dckd(dckd()))).unwrap();
    assert_eq!(opened, db_bundle());
}

#[test]
fn dckd_with_recipients_is_order_independent() {
    let a = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let b = IdentityKey::generate(IdentityVersion::Nist).unwrap();
    let c = IdentityKey::generate(IdentityVersion::Modern).unwrap();

    let sealed = |order: [&IdentityKey; 3]| {
        let options = SealOptions {
            recipients: order.iter().map(|id| id.recipient().to_string()).collect(),
            dckd: Some(dckd()),
            no_container_identity: true,
            ..Default::default()
        };
        seal(&db_bundle(), &options).unwrap().container
    };

    let forward = sealed([&a, &b, &c]);
    let backward = sealed([&c, &b, &a]);
    assert_eq!(forward, backward);

    // Blocks are sorted by recipient public key bytes.
    let parsed = SealedContainer::parse(&forward).unwrap();
    assert_eq!(parsed.recipients.len(), 3);
    let mut keys: Vec<Vec<u8>> = [&a, &b, &c]
        .iter()
        .map(|id| id.recipient().public_bytes())
        .collect();
    keys.sort();
    let expected: Vec<u8> = keys
        .iter()
        .map(|k| if k.len() == 32 { 1 } else { 2 })
        .collect();
    let actual: Vec<u8> = parsed.recipients.iter().map(|r| r.version).collect();
    assert_eq!(actual, expected);

    // Every recipient gets the DCKD-derived key.
    for identity in [a, b, c] {
        let opened = unseal(
            &forward,
            &UnsealOptions::new(UnsealKey::Identities(vec![identity])),
        )
        .unwrap();
        assert_eq!(opened, db_bundle());
    }
    assert!(unseal(&forward, &UnsealOptions::new(UnsealKey::Dckd(dckd()))).is_ok());
}

#[test]
fn different_targets_differ() {
    let seal_for = |target: &str| {
        let options = SealOptions {
            dckd: Some(DckdSeed::from_key_string(&master(), target).unwrap()),
            no_container_identity: true,
            ..Default::default()
        };
        seal(&db_bundle(), &options).unwrap().container
    };
    assert_ne!(seal_for("us-east-1/v1"), seal_for("eu-west-1/v1"));
}

#[test]
fn random_mode_differs_between_runs() {
    let identity = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let run = || {
        let options = SealOptions {
            recipients: vec![identity.recipient().to_string()],
            no_container_identity: true,
            ..Default::default()
        };
        seal(&db_bundle(), &options).unwrap().container
    };
    assert_ne!(run(), run());
}

#[test]
fn bad_master_key_rejected() {
    let err = DckdSeed::from_key_string(&b64::encode(&[1u8; 16]), TARGET).unwrap_err();
    assert!(matches!(err, harp_core::HarpError::InvalidMasterKey(_)));
}

#[test]
fn dckd_refuses_in_bundle_protection() {
    let options = SealOptions {
        dckd: Some(dckd()),
        no_container_identity: true,
        protection: Some(ProtectionOptions::whole(format!(
            "aes-gcm:{}",
            b64::encode(&[0x22; 32])
        ))),
        ..Default::default()
    };
    let err = seal(&db_bundle(), &options).unwrap_err();
    assert!(matches!(err, HarpError::InputValidation(_)), "{err}");
}

#[test]
fn protected_bundle_sealed_with_dckd_is_reproducible() {
    let key = format!("aes-gcm:{}", b64::encode(&[0x22; 32]));
    let protected =
        harp_bundle::encrypt(&db_bundle(), &ProtectionOptions::whole(key.clone())).unwrap();

    let run = || {
        let options = SealOptions {
            dckd: Some(dckd()),
            no_container_identity: true,
            ..Default::default()
        };
        seal(&protected, &options).unwrap().container
    };
    assert_eq!(run(), run());

    let opened = unseal(&run(), &UnsealOptions::new(UnsealKey::Dckd(dckd()))).unwrap();
    let plain = harp_bundle::decrypt(&opened, &ProtectionOptions::whole(key)).unwrap();
    assert_eq!(plain, db_bundle());
}
