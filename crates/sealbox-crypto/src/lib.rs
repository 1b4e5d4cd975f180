//! sealbox-crypto: client-side envelope encryption engine
//!
//! Pipeline: plaintext → content cipher (AES-256 CBC/CTR/GCM) → ciphertext
//! upload, with the per-object envelope (IV, wrapped CEK, cipher id, wrap
//! algorithm, material description) carried in object metadata or a sidecar
//! instruction object.
//!
//! Key hierarchy:
//! ```text
//! Key-Encryption Key (caller-supplied: AES-256, RSA key pair, or KMS key id)
//!   └── Content Encryption Key (per-object, 256-bit random, wrapped by KEK)
//!       └── Content cipher: AES/CBC/PKCS5Padding | AES/CTR/NoPadding
//!           | AES/GCM/NoPadding (IV and wrapped CEK recorded in the envelope)
//! ```
//!
//! The wire format is compatible with the S3 encryption client envelope
//! (`x-amz-key`/`x-amz-key-v2`, `x-amz-iv`, `x-amz-matdesc`, ...), so objects
//! written by either implementation are mutually readable within the
//! documented crypto-mode limits.

pub mod cipher;
pub mod envelope;
pub mod keywrap;
pub mod material;
pub mod range;
pub mod scheme;
pub mod stream;

pub use cipher::{strip_pkcs7, CipherSession, CipherSnapshot};
pub use envelope::Envelope;
pub use keywrap::{unwrap_content_key, wrap_content_key, KmsKeyService, WrapAlgorithmId, WrappedKey};
pub use material::{ContentKey, EncryptionMaterial, KekMaterial, Keyring, MaterialDescription, SymmetricKek};
pub use range::{plan_range, IvStrategy, RangePlan};
pub use scheme::{CipherScheme, ContentCipherId};
pub use stream::{EncryptingReader, MultipartEncryptSession};

/// Size of a content encryption key in bytes (256-bit for every scheme)
pub const CEK_SIZE: usize = 32;

/// AES block size in bytes, shared by all three content ciphers
pub const BLOCK_SIZE: usize = 16;
