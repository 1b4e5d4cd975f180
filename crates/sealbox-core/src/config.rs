use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SealboxError, SealboxResult};

/// Top-level client configuration (loaded from sealbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealboxConfig {
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
}

impl SealboxConfig {
    /// Load configuration from a TOML file. Missing sections and fields
    /// fall back to their defaults.
    pub fn load(path: &Path) -> SealboxResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| SealboxError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

/// Which crypto policy the client runs under.
///
/// The mode decides both what gets written (legacy vs v2 envelope shape)
/// and what the client is willing to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryptoMode {
    /// Legacy unauthenticated content cipher (AES-CBC). Writes the old
    /// envelope shape so pre-v2 readers stay compatible.
    EncryptionOnly,
    /// Authenticated content cipher (AES-GCM). Ranged reads are permitted
    /// but skip tag verification; this is surfaced, not hidden.
    AuthenticatedEncryption,
    /// Like `AuthenticatedEncryption`, but refuses any read that cannot be
    /// fully tag-verified: no legacy envelopes, no ranged reads.
    StrictAuthenticatedEncryption,
}

/// Where the per-object envelope is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeStorageMode {
    /// Embedded in the object's user metadata.
    ObjectMetadata,
    /// A standalone sidecar object at `<objectId><suffix>`.
    InstructionFile,
}

/// Envelope encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub mode: CryptoMode,
    pub envelope_storage: EnvelopeStorageMode,
    /// Suffix appended to the object id for the default instruction object.
    pub instruction_file_suffix: String,
    /// In metadata mode, look for a sidecar instruction object when no
    /// envelope is embedded. The fallback is logged, never silent.
    pub instruction_file_fallback: bool,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            mode: CryptoMode::AuthenticatedEncryption,
            envelope_storage: EnvelopeStorageMode::ObjectMetadata,
            instruction_file_suffix: DEFAULT_INSTRUCTION_FILE_SUFFIX.into(),
            instruction_file_fallback: false,
        }
    }
}

/// Default suffix for sidecar instruction objects.
pub const DEFAULT_INSTRUCTION_FILE_SUFFIX: &str = ".instruction";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding the encrypted objects
    pub bucket: String,
    /// Enforce HTTPS for storage connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Retry budget for transient storage I/O
    pub max_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "sealbox".into(),
            enforce_tls: false,
            max_retries: 5,
        }
    }
}
