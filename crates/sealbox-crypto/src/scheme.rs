//! Static catalog of supported content ciphers.
//!
//! The table is process-wide immutable constant data; nothing here locks or
//! mutates. Cipher algorithm labels are part of the envelope wire format and
//! must never change for objects to stay mutually readable across client
//! generations.

use sealbox_core::{SealboxError, SealboxResult};

use crate::BLOCK_SIZE;

/// Identifier of a content cipher, as recorded in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentCipherId {
    /// Legacy unauthenticated block-chained cipher (PKCS7 padded).
    AesCbc,
    /// Counter-mode cipher; keystream addressable by block index.
    AesCtr,
    /// Authenticated cipher with a 128-bit tag appended to the ciphertext.
    AesGcm,
}

/// Resolved attributes of a content cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherScheme {
    pub id: ContentCipherId,
    /// Wire label (`x-amz-cek-alg` value)
    pub cek_algorithm: &'static str,
    pub key_len_bits: usize,
    pub iv_len: usize,
    pub block_size: usize,
    /// 0 for non-authenticated ciphers
    pub tag_len_bits: usize,
}

pub const AES_CBC: CipherScheme = CipherScheme {
    id: ContentCipherId::AesCbc,
    cek_algorithm: "AES/CBC/PKCS5Padding",
    key_len_bits: 256,
    iv_len: 16,
    block_size: BLOCK_SIZE,
    tag_len_bits: 0,
};

pub const AES_CTR: CipherScheme = CipherScheme {
    id: ContentCipherId::AesCtr,
    cek_algorithm: "AES/CTR/NoPadding",
    key_len_bits: 256,
    iv_len: 16,
    block_size: BLOCK_SIZE,
    tag_len_bits: 0,
};

pub const AES_GCM: CipherScheme = CipherScheme {
    id: ContentCipherId::AesGcm,
    cek_algorithm: "AES/GCM/NoPadding",
    key_len_bits: 256,
    iv_len: 12,
    block_size: BLOCK_SIZE,
    tag_len_bits: 128,
};

/// GCM runs a 32-bit block counter; two counter values are reserved for the
/// pre-counter block and the tag, leaving 2^32 - 2 blocks of content.
pub const MAX_GCM_BLOCKS: u64 = (1 << 32) - 2;

/// Largest plaintext a single GCM object may hold (~64 GiB).
pub const MAX_GCM_PLAINTEXT_BYTES: u64 = MAX_GCM_BLOCKS * BLOCK_SIZE as u64;

impl ContentCipherId {
    pub fn scheme(self) -> &'static CipherScheme {
        match self {
            ContentCipherId::AesCbc => &AES_CBC,
            ContentCipherId::AesCtr => &AES_CTR,
            ContentCipherId::AesGcm => &AES_GCM,
        }
    }

    /// Resolve a wire label to a cipher id.
    ///
    /// A missing label means the envelope predates the v2 format and is
    /// implicitly legacy CBC. An unknown label is fatal: the object was
    /// written by a newer client than this build, and retrying cannot help.
    pub fn from_cek_algorithm(label: Option<&str>) -> SealboxResult<Self> {
        match label {
            None => Ok(ContentCipherId::AesCbc),
            Some(l) if l == AES_CBC.cek_algorithm => Ok(ContentCipherId::AesCbc),
            Some(l) if l == AES_CTR.cek_algorithm => Ok(ContentCipherId::AesCtr),
            Some(l) if l == AES_GCM.cek_algorithm => Ok(ContentCipherId::AesGcm),
            Some(other) => Err(SealboxError::UnsupportedCipher(other.to_string())),
        }
    }

    pub fn is_authenticated(self) -> bool {
        self.scheme().tag_len_bits > 0
    }
}

impl CipherScheme {
    pub fn tag_len_bytes(&self) -> usize {
        self.tag_len_bits / 8
    }

    /// Counter block positioned at `byte_offset` into the keystream.
    ///
    /// For GCM the stored 12-byte IV extends to the pre-counter block
    /// J0 = IV || be32(1); content encryption starts one block later, so the
    /// counter for content block b is J0 + 1 + b. For CTR the stored IV is
    /// the 16-byte counter block for offset zero. CBC is block-chained, not
    /// counter-addressed; asking for an adjusted IV there is a logic error
    /// upstream and is rejected.
    pub fn adjust_iv(&self, iv: &[u8], byte_offset: u64) -> SealboxResult<[u8; 16]> {
        if iv.len() != self.iv_len {
            return Err(SealboxError::Envelope(format!(
                "IV of {} bytes does not match {} (expected {})",
                iv.len(),
                self.cek_algorithm,
                self.iv_len
            )));
        }
        if byte_offset % self.block_size as u64 != 0 {
            return Err(SealboxError::Envelope(format!(
                "cannot seed a cipher mid-block (offset {byte_offset})"
            )));
        }
        let block_offset = byte_offset / self.block_size as u64;
        let mut counter = [0u8; 16];
        match self.id {
            ContentCipherId::AesGcm => {
                counter[..12].copy_from_slice(iv);
                counter[15] = 1;
                increment_blocks(&mut counter, 1 + block_offset);
            }
            ContentCipherId::AesCtr => {
                counter.copy_from_slice(iv);
                increment_blocks(&mut counter, block_offset);
            }
            ContentCipherId::AesCbc => {
                return Err(SealboxError::Envelope(
                    "CBC has no counter-derivable mid-stream IV".into(),
                ));
            }
        }
        Ok(counter)
    }
}

/// Add `delta` to the rightmost 64 bits of a 16-byte counter block,
/// big-endian. Sufficient for any offset under the GCM block ceiling.
pub(crate) fn increment_blocks(counter: &mut [u8; 16], delta: u64) {
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&counter[8..]);
    let value = u64::from_be_bytes(tail).wrapping_add(delta);
    counter[8..].copy_from_slice(&value.to_be_bytes());
}
