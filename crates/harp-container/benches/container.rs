use harp_bundle::{Bundle, Package};
use harp_container::{
    seal, unseal, IdentityKey, IdentityVersion, SealOptions, UnsealKey, UnsealOptions,
};
use secrecy::ExposeSecret;

fn main() {
    divan::main();
}

fn make_bundle(packages: usize) -> Bundle {
    let mut bundle = Bundle::new();
    for i in 0..packages {
        bundle.packages.push(
            Package::new(format!("app/prod/svc{i}"))
                .with_secret("username", format!("svc{i}"))
                .with_secret("password", vec![0x41; 64]),
        );
    }
    bundle
}

fn version(name: &str) -> IdentityVersion {
    name.parse().unwrap()
}

#[divan::bench(args = ["v1", "v2"])]
fn bench_seal_single_recipient(bencher: divan::Bencher, v: &str) {
    let identity = IdentityKey::generate(version(v)).unwrap();
    let bundle = make_bundle(16);
    let options = SealOptions {
        recipients: vec![identity.recipient().to_string()],
        no_container_identity: true,
        ..Default::default()
    };
    bencher.bench(|| seal(divan::black_box(&bundle), &options).unwrap());
}

#[divan::bench(args = [1, 8, 64])]
fn bench_seal_many_recipients(bencher: divan::Bencher, recipients: usize) {
    let bundle = make_bundle(4);
    let options = SealOptions {
        recipients: (0..recipients)
            .map(|_| {
                IdentityKey::generate(IdentityVersion::Modern)
                    .unwrap()
                    .recipient()
                    .to_string()
            })
            .collect(),
        no_container_identity: true,
        ..Default::default()
    };
    bencher.bench(|| seal(&bundle, &options).unwrap());
}

#[divan::bench(args = ["v1", "v2"])]
fn bench_unseal_identity(bencher: divan::Bencher, v: &str) {
    let identity = IdentityKey::generate(version(v)).unwrap();
    let key_string = identity.to_key_string();
    let options = SealOptions {
        recipients: vec![identity.recipient().to_string()],
        ..Default::default()
    };
    let container = seal(&make_bundle(16), &options).unwrap().container;
    let unseal_options = UnsealOptions::new(UnsealKey::Identities(vec![
        IdentityKey::from_key_string(key_string.expose_secret()).unwrap(),
    ]));
    bencher.bench(|| unseal(divan::black_box(&container), &unseal_options).unwrap());
}
