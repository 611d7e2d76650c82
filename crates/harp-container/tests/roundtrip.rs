//! Seal/unseal round trips across identity versions.

use harp_bundle::{Bundle, Package};
use harp_container::{
    seal, unseal, IdentityKey, IdentityVersion, SealOptions, UnsealKey, UnsealOptions,
};
use harp_core::HarpError;
use proptest::prelude::*;

fn db_bundle() -> Bundle {
    let mut bundle = Bundle::new();
    bundle
        .packages
        .push(Package::new("app/prod/db").with_secret("password", "hunter2"));
    bundle
}

fn seal_to(bundle: &Bundle, recipients: &[&IdentityKey]) -> Vec<u8> {
    let options = SealOptions {
        recipients: recipients.iter().map(|id| id.recipient().to_string()).collect(),
        no_container_identity: true,
        ..Default::default()
    };
    seal(bundle, &options).unwrap().container
}

fn open_with(container: &[u8], identity: IdentityKey) -> Result<Bundle, HarpError> {
    unseal(
        container,
        &UnsealOptions::new(UnsealKey::Identities(vec![identity])),
    )
}

/// Independent copy of an identity key (keys are single-owner).
fn copy(identity: &IdentityKey) -> IdentityKey {
    use secrecy::ExposeSecret;
    IdentityKey::from_key_string(identity.to_key_string().expose_secret()).unwrap()
}

#[test]
fn minimal_modern_seal_unseal() {
    let identity = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let bundle = db_bundle();

    let container = seal_to(&bundle, &[&identity]);
    assert_eq!(&container[..4], b"HARP");

    let opened = open_with(&container, identity).unwrap();
    assert_eq!(opened, bundle);
    assert_eq!(
        opened.package("app/prod/db").unwrap().get("password"),
        Some(&b"hunter2"[..])
    );
}

#[test]
fn mixed_versions_each_recipient_opens() {
    let alice = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let bob = IdentityKey::generate(IdentityVersion::Nist).unwrap();
    let carol = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let mallory = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let bundle = db_bundle();

    let container = seal_to(&bundle, &[&alice, &bob, &carol]);

    for identity in [alice, bob, carol] {
        assert_eq!(open_with(&container, identity).unwrap(), bundle);
    }
    assert!(matches!(
        open_with(&container, mallory).unwrap_err(),
        HarpError::NoMatchingRecipient
    ));
}

#[test]
fn outsider_cannot_open_even_knowing_recipients() {
    let alice = IdentityKey::generate(IdentityVersion::Nist).unwrap();
    let container = seal_to(&db_bundle(), &[&alice]);

    // Same version, and an identity of the other version.
    for outsider in [IdentityVersion::Nist, IdentityVersion::Modern] {
        let outsider = IdentityKey::generate(outsider).unwrap();
        assert!(matches!(
            open_with(&container, outsider).unwrap_err(),
            HarpError::NoMatchingRecipient
        ));
    }
    assert!(open_with(&container, copy(&alice)).is_ok());
}

#[test]
fn several_identities_first_match_wins() {
    let alice = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let stranger = IdentityKey::generate(IdentityVersion::Nist).unwrap();
    let container = seal_to(&db_bundle(), &[&alice]);

    let options = UnsealOptions::new(UnsealKey::Identities(vec![stranger, alice]));
    assert_eq!(unseal(&container, &options).unwrap(), db_bundle());
}

#[test]
fn recipients_in_input_order_when_random() {
    let a = IdentityKey::generate(IdentityVersion::Modern).unwrap();
    let b = IdentityKey::generate(IdentityVersion::Nist).unwrap();
    let container = seal_to(&db_bundle(), &[&a, &b]);
    let parsed = harp_container::SealedContainer::parse(&container).unwrap();
    let versions: Vec<u8> = parsed.recipients.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[test]
fn seal_from_identity_file() {
    use harp_container::{identity_new, KeyWrap};
    use secrecy::SecretString;

    let wrap = KeyWrap::Passphrase {
        passphrase: SecretString::from("pw"),
        iterations: 1_000,
    };
    let (file, identity) = identity_new("ops", IdentityVersion::Nist, &wrap).unwrap();
    let options = SealOptions {
        identity_files: vec![file],
        no_container_identity: true,
        ..Default::default()
    };
    let outcome = seal(&db_bundle(), &options).unwrap();
    assert_eq!(outcome.info.recipient_count, 1);
    assert_eq!(open_with(&outcome.container, identity).unwrap(), db_bundle());
}

#[test]
fn tampered_identity_file_refused_for_seal() {
    use harp_container::{identity_new, KeyWrap};
    use secrecy::SecretString;

    let wrap = KeyWrap::Passphrase {
        passphrase: SecretString::from("pw"),
        iterations: 1_000,
    };
    let (mut file, _) = identity_new("ops", IdentityVersion::Modern, &wrap).unwrap();
    let (other, _) = identity_new("evil", IdentityVersion::Modern, &wrap).unwrap();
    file.public = other.public;

    let options = SealOptions {
        identity_files: vec![file],
        ..Default::default()
    };
    assert!(matches!(
        seal(&db_bundle(), &options).unwrap_err(),
        HarpError::AuthenticationFailed(_)
    ));
}

fn arb_bundle() -> impl Strategy<Value = Bundle> {
    proptest::collection::btree_map(
        "[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}",
        proptest::collection::btree_map("[a-zA-Z_]{1,12}", proptest::collection::vec(any::<u8>(), 0..128), 1..5),
        1..6,
    )
    .prop_map(|packages| {
        let mut bundle = Bundle::new();
        for (name, fields) in packages {
            let mut package = Package::new(name);
            for (key, value) in fields {
                package = package.with_secret(&key, value);
            }
            bundle.packages.push(package);
        }
        bundle
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn random_bundles_roundtrip(bundle in arb_bundle(), nist in any::<bool>()) {
        let version = if nist { IdentityVersion::Nist } else { IdentityVersion::Modern };
        let identity = IdentityKey::generate(version).unwrap();
        let container = seal_to(&bundle, &[&identity]);
        prop_assert_eq!(open_with(&container, identity).unwrap(), bundle);
    }
}
