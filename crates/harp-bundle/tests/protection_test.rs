//! Annotation-driven encryption over a serialized bundle.

use harp_bundle::{decrypt, encrypt, Bundle, Package, ProtectionOptions, ENCRYPTION_KEY_ALIAS};
use harp_crypto::b64;

fn two_package_bundle() -> Bundle {
    let mut bundle = Bundle::new();
    bundle.packages.push(
        Package::new("app/prod/db")
            .with_annotation(ENCRYPTION_KEY_ALIAS, "primary")
            .with_secret("password", "hunter2")
            .with_secret("user", "admin"),
    );
    bundle.packages.push(
        Package::new("app/prod/cache")
            .with_annotation("infra.example.com/owner", "platform")
            .with_secret("token", "s3cr3t-cache-token"),
    );
    bundle
}

#[test]
fn partial_encryption_leaves_unannotated_packages_byte_identical() {
    let key = format!("aes-gcm:{}", b64::encode(&[0x5a; 32]));
    let options = ProtectionOptions::aliased([("primary", key)], false);

    let plain = two_package_bundle();
    let protected = encrypt(&plain, &options).unwrap();

    // Annotated package: no value is readable as plaintext.
    let db = protected.package("app/prod/db").unwrap();
    for field in ["password", "user"] {
        let value = db.get(field).unwrap();
        assert_ne!(value, plain.package("app/prod/db").unwrap().get(field).unwrap());
        assert!(!value.windows(7).any(|w| w == b"hunter2"));
    }

    // Unannotated package: byte-identical once serialized.
    let before = serde_json::to_vec(plain.package("app/prod/cache").unwrap()).unwrap();
    let after = serde_json::to_vec(protected.package("app/prod/cache").unwrap()).unwrap();
    assert_eq!(before, after);

    // The protected bundle survives its own canonical form.
    let bytes = protected.to_canonical_bytes().unwrap();
    let reparsed = Bundle::from_slice(&bytes).unwrap();
    assert_eq!(decrypt(&reparsed, &options).unwrap(), plain);
}

#[test]
fn fernet_and_jwe_transformers_protect_values() {
    let keys = [
        format!("fernet:{}", b64::encode(&[0x21; 32])),
        format!("jwe:a256kw:{}", b64::encode(&[0x22; 32])),
        format!("aes-siv:{}", b64::encode(&[0x23; 64])),
    ];
    for key in keys {
        let options = ProtectionOptions::whole(key);
        let protected = encrypt(&two_package_bundle(), &options).unwrap();
        assert_eq!(decrypt(&protected, &options).unwrap(), two_package_bundle());
    }
}
