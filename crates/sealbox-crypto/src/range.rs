//! Planning for ranged reads of encrypted objects.
//!
//! A caller asks for plaintext bytes `[start, end]`; the ciphertext that has
//! to be fetched is wider (block alignment, a preceding block for CBC) and
//! narrower at the tail for GCM (the authentication tag is not content). The
//! planner turns the request into a fetch window plus instructions for
//! seeding the cipher and trimming the decrypted output. It performs no I/O.

use sealbox_core::{CryptoMode, SealboxError, SealboxResult};

use crate::scheme::ContentCipherId;
use crate::BLOCK_SIZE;

/// How to seed the decrypt session for a planned window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvStrategy {
    /// Decrypt from offset zero with the IV recorded in the envelope.
    FromEnvelope,
    /// The first cipher block of the fetched window is not content: it is
    /// the IV for the block that follows. Applies to CBC windows that do
    /// not start at the first block.
    PrecedingCipherBlock,
    /// Derive the counter block from the envelope IV and this block-aligned
    /// byte offset. Applies to CTR and to ranged GCM reads.
    AdjustedCounter { byte_offset: u64 },
}

/// A fetch-and-decrypt plan for one plaintext range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    /// First ciphertext byte to fetch.
    pub ct_start: u64,
    /// Last ciphertext byte to fetch, inclusive. `None` means through the
    /// end of the object.
    pub ct_end: Option<u64>,
    /// Plaintext bytes to discard from the front of the decrypted window
    /// (block-alignment slack, not counting an `IvStrategy` prefix block).
    pub discard_prefix: u64,
    /// Plaintext bytes to emit after the discard. `None` means everything
    /// to the end, with CBC padding stripped by the caller.
    pub emit_len: Option<u64>,
    pub iv: IvStrategy,
    /// False when the object carries an authentication tag that this plan
    /// does not check. Ranged GCM reads trade verification for seekability.
    pub verified: bool,
}

/// Plan a ranged read of `[start, end]` (inclusive; `end == None` means to
/// the end of the object).
///
/// `plaintext_len` is the unencrypted content length when known. It is
/// required for GCM so the tag can be excluded from the window, and it
/// clamps over-long requests for the other ciphers.
pub fn plan_range(
    cipher: ContentCipherId,
    mode: CryptoMode,
    start: u64,
    end: Option<u64>,
    plaintext_len: Option<u64>,
) -> SealboxResult<RangePlan> {
    if mode == CryptoMode::StrictAuthenticatedEncryption {
        return Err(SealboxError::Security(
            "ranged reads bypass tag verification and are refused in strict mode".into(),
        ));
    }
    if let Some(end) = end {
        if end < start {
            return Err(SealboxError::Config(format!(
                "invalid range: end {end} precedes start {start}"
            )));
        }
    }
    if let Some(len) = plaintext_len {
        if start >= len {
            return Err(SealboxError::Config(format!(
                "range start {start} is beyond the {len}-byte object"
            )));
        }
    }

    let block = BLOCK_SIZE as u64;
    let block_start = start - (start % block);

    // End of the requested plaintext, clamped to the object when its length
    // is known. None only when both are unknown.
    let last = match (end, plaintext_len) {
        (Some(e), Some(len)) => Some(e.min(len - 1)),
        (Some(e), None) => Some(e),
        (None, Some(len)) => Some(len - 1),
        (None, None) => None,
    };
    let emit_len = last.map(|l| l - start + 1);

    match cipher {
        ContentCipherId::AesCbc => {
            let (ct_start, iv) = if block_start == 0 {
                (0, IvStrategy::FromEnvelope)
            } else {
                (block_start - block, IvStrategy::PrecedingCipherBlock)
            };
            // Whole blocks only; round the window end up.
            let ct_end = last.map(|l| (l / block + 1) * block - 1);
            Ok(RangePlan {
                ct_start,
                ct_end,
                discard_prefix: start - block_start,
                emit_len,
                iv,
                verified: true,
            })
        }
        ContentCipherId::AesCtr => Ok(RangePlan {
            ct_start: block_start,
            ct_end: last,
            discard_prefix: start - block_start,
            emit_len,
            iv: IvStrategy::AdjustedCounter {
                byte_offset: block_start,
            },
            verified: true,
        }),
        ContentCipherId::AesGcm => {
            let len = plaintext_len.ok_or_else(|| {
                SealboxError::Envelope(
                    "plaintext length is required to range-read an authenticated object".into(),
                )
            })?;
            // The tag sits after the content; never fetch into it.
            let last = end.map_or(len - 1, |e| e.min(len - 1));
            Ok(RangePlan {
                ct_start: block_start,
                ct_end: Some(last),
                discard_prefix: start - block_start,
                emit_len: Some(last - start + 1),
                iv: IvStrategy::AdjustedCounter {
                    byte_offset: block_start,
                },
                verified: false,
            })
        }
    }
}
