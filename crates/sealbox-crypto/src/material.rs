//! Key-encryption-key material, material descriptions, and the keyring.

use std::collections::BTreeMap;

use rand::RngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sealbox_core::{SealboxError, SealboxResult};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::CEK_SIZE;

/// Caller-defined tag set used to pick the right KEK among several
/// registered ones. Equality is set-equality of entries; the empty
/// description is a valid, distinct key.
///
/// Wire format: a JSON object of string → string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialDescription(BTreeMap<String, String>);

impl MaterialDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> SealboxResult<String> {
        serde_json::to_string(&self.0)
            .map_err(|e| SealboxError::Envelope(format!("material description to JSON: {e}")))
    }

    pub fn from_json(json: &str) -> SealboxResult<Self> {
        let map: BTreeMap<String, String> = serde_json::from_str(json)
            .map_err(|e| SealboxError::Envelope(format!("material description from JSON: {e}")))?;
        Ok(Self(map))
    }
}

impl From<BTreeMap<String, String>> for MaterialDescription {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// A per-object 256-bit content encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; CEK_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; CEK_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; CEK_SIZE] {
        &self.bytes
    }

    /// Generate a fresh random content key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CEK_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A symmetric 256-bit key-encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKek {
    bytes: [u8; 32],
}

impl SymmetricKek {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }
}

impl Drop for SymmetricKek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKek")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The key-encryption key held by one `EncryptionMaterial`.
///
/// A closed set of variants rather than a trait object: the wrap algorithm
/// is decided by the variant, and the envelope records which one was used.
#[derive(Clone)]
pub enum KekMaterial {
    Symmetric(SymmetricKek),
    /// Public half wraps; the private half is only needed to unwrap.
    RsaKeyPair {
        public: RsaPublicKey,
        private: Option<RsaPrivateKey>,
    },
    /// Remote KMS-held master key, addressed by id. Both wrap directions
    /// are remote calls.
    Kms { key_id: String },
}

impl std::fmt::Debug for KekMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KekMaterial::Symmetric(_) => f.write_str("KekMaterial::Symmetric([REDACTED])"),
            KekMaterial::RsaKeyPair { private, .. } => write!(
                f,
                "KekMaterial::RsaKeyPair {{ private: {} }}",
                if private.is_some() { "present" } else { "absent" }
            ),
            KekMaterial::Kms { key_id } => {
                write!(f, "KekMaterial::Kms {{ key_id: {key_id:?} }}")
            }
        }
    }
}

/// One KEK plus the description under which it is registered.
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct EncryptionMaterial {
    kek: KekMaterial,
    description: MaterialDescription,
}

impl EncryptionMaterial {
    pub fn symmetric(kek: SymmetricKek, description: MaterialDescription) -> Self {
        Self {
            kek: KekMaterial::Symmetric(kek),
            description,
        }
    }

    pub fn rsa(
        public: RsaPublicKey,
        private: Option<RsaPrivateKey>,
        description: MaterialDescription,
    ) -> Self {
        Self {
            kek: KekMaterial::RsaKeyPair { public, private },
            description,
        }
    }

    pub fn kms(key_id: impl Into<String>, description: MaterialDescription) -> Self {
        Self {
            kek: KekMaterial::Kms {
                key_id: key_id.into(),
            },
            description,
        }
    }

    pub fn kek(&self) -> &KekMaterial {
        &self.kek
    }

    pub fn description(&self) -> &MaterialDescription {
        &self.description
    }
}

/// Holds several encryption materials concurrently for key rotation.
///
/// Encrypt always uses the latest-registered material; decrypt looks up the
/// unique material whose description exactly equals the envelope's.
#[derive(Debug, Default)]
pub struct Keyring {
    materials: Vec<EncryptionMaterial>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a material. Two materials with the same description would
    /// make decrypt lookups ambiguous, so the duplicate is rejected here
    /// rather than silently overwriting.
    pub fn register(&mut self, material: EncryptionMaterial) -> SealboxResult<()> {
        if self
            .materials
            .iter()
            .any(|m| m.description == material.description)
        {
            return Err(SealboxError::Config(format!(
                "encryption material already registered for description {}",
                material.description.to_json().unwrap_or_default()
            )));
        }
        self.materials.push(material);
        Ok(())
    }

    /// The material used for new encryptions: the latest registered.
    pub fn encryption_material(&self) -> SealboxResult<&EncryptionMaterial> {
        self.materials
            .last()
            .ok_or_else(|| SealboxError::Config("keyring holds no encryption material".into()))
    }

    /// The material matching a stored envelope's description.
    ///
    /// Exact description match first. A KMS wrap additionally records the
    /// master key id in the description, so a KMS material is also found by
    /// that id even though its registered description lacks the entry.
    pub fn decryption_material(
        &self,
        description: &MaterialDescription,
    ) -> SealboxResult<&EncryptionMaterial> {
        if let Some(material) = self.materials.iter().find(|m| &m.description == description) {
            return Ok(material);
        }
        if let Some(cmk) = description.get(crate::keywrap::KMS_CMK_ID_KEY) {
            if let Some(material) = self
                .materials
                .iter()
                .find(|m| matches!(&m.kek, KekMaterial::Kms { key_id } if key_id == cmk))
            {
                return Ok(material);
            }
        }
        Err(SealboxError::NoMatchingKey(
            description.to_json().unwrap_or_default(),
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}
