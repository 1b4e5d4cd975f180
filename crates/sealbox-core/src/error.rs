use thiserror::Error;

pub type SealboxResult<T> = Result<T, SealboxError>;

/// Error taxonomy for the envelope encryption engine.
///
/// Every variant except `Io` and `Storage` is fatal: it indicates a corrupt
/// envelope, a misconfigured keyring, or caller misuse of the streaming API,
/// none of which a retry can fix. Transient store I/O is retried inside the
/// storage layer (bounded) before it surfaces here.
#[derive(Debug, Error)]
pub enum SealboxError {
    /// The envelope names a content cipher this build does not know.
    /// Usually means the object was written by a newer client.
    #[error("unsupported content cipher: {0}")]
    UnsupportedCipher(String),

    /// The wrapped content key failed to unwrap: wrong KEK, corrupt
    /// ciphertext, or a wrap-algorithm label we do not dispatch on.
    #[error("content key unwrap failed: {0}")]
    KeyUnwrap(String),

    /// No registered encryption material matches the envelope's material
    /// description. A configuration problem, never transient.
    #[error("no encryption material matches description: {0}")]
    NoMatchingKey(String),

    /// A non-final multipart part was not a whole number of cipher blocks.
    #[error("part of {part_len} bytes is not a multiple of the {block_size}-byte cipher block (non-final parts must be block-aligned)")]
    PartAlignment { part_len: u64, block_size: usize },

    /// Zero or more than one part was flagged final in a multipart session.
    #[error("multipart finalization error: {0}")]
    MultipartFinalization(String),

    /// Integrity refusal: strict-mode policy violation or an authentication
    /// tag mismatch. No plaintext accompanies this error.
    #[error("security error: {0}")]
    Security(String),

    /// The envelope bytes/metadata could not be parsed or were internally
    /// inconsistent (IV length, tag length, missing fields).
    #[error("envelope error: {0}")]
    Envelope(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
