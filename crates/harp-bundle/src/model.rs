//! Bundle data model
//!
//! JSON is the canonical byte form: struct fields serialize in declaration
//! order and every map is a `BTreeMap`, so equal bundles always produce
//! equal bytes. Secret values are base64 inside the JSON.

use std::collections::{BTreeMap, HashSet};

use harp_core::limits::Limits;
use harp_core::{HarpError, HarpResult};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Bundle format version written by this crate.
pub const BUNDLE_VERSION: u32 = 1;

/// Root aggregate of secret packages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
    /// Template the bundle was rendered from, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_empty_packages: bool,
    #[serde(default)]
    pub packages: Vec<Package>,
}

/// A named unit of secrets, addressed by a slash-separated path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
    #[serde(default)]
    pub secrets: SecretChain,
}

/// Ordered field map of one package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretChain {
    #[serde(default)]
    pub version: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub data: Vec<KeyValue>,
}

/// One secret field. The value is wiped when the field is dropped.
#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyValue {
    pub key: String,
    #[serde(with = "b64_value")]
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValue")
            .field("key", &self.key)
            .field("value", &format_args!("[{} bytes]", self.value.len()))
            .finish()
    }
}

impl Bundle {
    pub fn new() -> Self {
        Self {
            version: BUNDLE_VERSION,
            ..Default::default()
        }
    }

    /// Parse canonical bytes and validate the result.
    pub fn from_slice(data: &[u8]) -> HarpResult<Self> {
        Self::from_slice_with(data, &Limits::default())
    }

    pub fn from_slice_with(data: &[u8], limits: &Limits) -> HarpResult<Self> {
        HarpError::check_size("bundle", data.len() as u64, limits.max_container_size)?;
        let bundle: Bundle = serde_json::from_slice(data)
            .map_err(|e| HarpError::input(format!("bundle is not valid JSON: {e}")))?;
        bundle.validate_with(limits)?;
        Ok(bundle)
    }

    /// Canonical byte form. The buffer is wiped on drop.
    pub fn to_canonical_bytes(&self) -> HarpResult<Zeroizing<Vec<u8>>> {
        serde_json::to_vec(self)
            .map(Zeroizing::new)
            .map_err(|e| HarpError::input(format!("bundle serialization: {e}")))
    }

    /// Check structural invariants against the hard caps.
    pub fn validate(&self) -> HarpResult<()> {
        self.validate_with(&Limits::default())
    }

    pub fn validate_with(&self, limits: &Limits) -> HarpResult<()> {
        validate_annotations(&self.annotations, "bundle")?;
        let mut seen = HashSet::with_capacity(self.packages.len());
        for package in &self.packages {
            validate_path(&package.name)?;
            validate_annotations(&package.annotations, &package.name)?;
            if !seen.insert(package.name.as_str()) {
                return Err(HarpError::input(format!(
                    "duplicate package path '{}'",
                    package.name
                )));
            }
            if package.secrets.data.is_empty() && !self.allow_empty_packages {
                return Err(HarpError::input(format!(
                    "package '{}' has no secrets",
                    package.name
                )));
            }
            package.secrets.validate(&package.name, limits)?;
        }
        Ok(())
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn package_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.name == name)
    }

    /// Prepend `prefix/` to every package path.
    pub fn prefix(&mut self, prefix: &str) -> HarpResult<()> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(HarpError::input("package prefix must not be empty"));
        }
        validate_path(prefix)?;
        for package in &mut self.packages {
            package.name = format!("{prefix}/{}", package.name);
        }
        Ok(())
    }

    /// Keep only the packages matching `keep`, preserving order.
    pub fn retain_packages<F>(&mut self, keep: F)
    where
        F: FnMut(&Package) -> bool,
    {
        self.packages.retain(keep);
    }
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style field insertion.
    pub fn with_secret(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(key, value);
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.secrets.get(key)
    }
}

impl SecretChain {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.data
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_slice())
    }

    /// Insert or replace a field, keeping its original position on replace.
    pub fn insert(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.data.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => {
                existing.value.zeroize();
                existing.value = value;
            }
            None => self.data.push(KeyValue::new(key, value)),
        }
    }

    fn validate(&self, package: &str, limits: &Limits) -> HarpResult<()> {
        let mut seen = HashSet::with_capacity(self.data.len());
        for kv in &self.data {
            if kv.key.is_empty() {
                return Err(HarpError::input(format!(
                    "package '{package}' has an empty field name"
                )));
            }
            if !seen.insert(kv.key.as_str()) {
                return Err(HarpError::input(format!(
                    "package '{package}' has duplicate field '{}'",
                    kv.key
                )));
            }
            HarpError::check_size(
                "secret value",
                kv.value.len() as u64,
                limits.max_value_size,
            )?;
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> HarpResult<()> {
    if path.is_empty() {
        return Err(HarpError::input("package path must not be empty"));
    }
    if path.split('/').any(str::is_empty) {
        return Err(HarpError::input(format!(
            "package path '{path}' has an empty segment"
        )));
    }
    Ok(())
}

/// Annotation keys are `<reverse-dns-domain>/<name>`,
/// e.g. `harp.elastic.co/v1/package#encryptionKeyAlias`.
fn validate_annotations(annotations: &BTreeMap<String, String>, owner: &str) -> HarpResult<()> {
    for key in annotations.keys() {
        if !is_annotation_key(key) {
            return Err(HarpError::input(format!(
                "{owner}: annotation key '{key}' is not of the form <reverse-dns-domain>/<name>"
            )));
        }
    }
    Ok(())
}

fn is_annotation_key(key: &str) -> bool {
    let Some((domain, name)) = key.split_once('/') else {
        return false;
    };
    let labels: Vec<&str> = domain.split('.').collect();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        });
    let name_ok = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./#".contains(&b));
    domain_ok && name_ok
}

mod b64_value {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let text = Zeroizing::new(STANDARD.encode(value));
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Zeroizing::new(String::deserialize(deserializer)?);
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
