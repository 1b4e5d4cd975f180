//! sealbox-core: shared types for the sealbox client-side encryption engine
//!
//! Everything the other crates agree on lives here: the error taxonomy
//! (`SealboxError`), the result alias, and the configuration schema
//! (crypto mode, envelope placement, storage connection).

pub mod config;
pub mod error;

pub use config::{CryptoConfig, CryptoMode, EnvelopeStorageMode, SealboxConfig, StorageConfig};
pub use error::{SealboxError, SealboxResult};
