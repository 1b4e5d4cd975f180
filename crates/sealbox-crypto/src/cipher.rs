//! Streaming cipher sessions over the three content ciphers.
//!
//! A `CipherSession` owns the runtime cipher state for exactly one encrypt or
//! decrypt of one object: chaining state and a partial-block buffer for CBC,
//! the 64-bit keystream position for CTR, and the counter plus GHASH
//! accumulator for GCM. Sessions are never shared across threads and are
//! finished exactly once.
//!
//! GCM is composed from AES-CTR (32-bit counter, content starting at counter
//! block 2) and a GHASH accumulator, the standard construction; the unit
//! tests pin the output byte-for-byte against the `aes-gcm` crate.
//!
//! `snapshot`/`restore` capture the complete cipher state, including the
//! authentication accumulator, so a caller can mark a stream and later
//! resume from that exact point. All positions are 64-bit: objects larger
//! than 2^31 bytes are an explicit supported case.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit as BlockKeyInit, KeyIvInit,
    StreamCipher, StreamCipherSeek,
};
use aes::{Aes256, Block};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use sealbox_core::{SealboxError, SealboxResult};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::material::ContentKey;
use crate::scheme::{ContentCipherId, MAX_GCM_PLAINTEXT_BYTES};
use crate::BLOCK_SIZE;

type CbcEnc = cbc::Encryptor<Aes256>;
type CbcDec = cbc::Decryptor<Aes256>;
type Ctr128 = ctr::Ctr128BE<Aes256>;
type Ctr32 = ctr::Ctr32BE<Aes256>;

#[derive(Clone)]
enum SessionState {
    CbcEncrypt {
        cipher: CbcEnc,
        pending: Vec<u8>,
    },
    CbcDecrypt {
        cipher: CbcDec,
        pending: Vec<u8>,
        strip_padding: bool,
    },
    /// CTR encrypt and decrypt are the same keystream XOR. Also serves as
    /// the auxiliary path for ranged reads of GCM objects.
    Ctr {
        cipher: Ctr128,
    },
    GcmEncrypt(GcmCore),
    GcmDecrypt(GcmCore),
}

#[derive(Clone)]
struct GcmCore {
    ctr: Ctr32,
    ghash: GHash,
    /// Ciphertext bytes not yet absorbed into a full GHASH block
    ghash_pending: Vec<u8>,
    tag_mask: [u8; 16],
    /// Ciphertext bytes absorbed so far
    data_len: u64,
}

impl GcmCore {
    fn new(key: &[u8; 32], iv: &[u8]) -> SealboxResult<Self> {
        let aes = Aes256::new(GenericArray::from_slice(key));

        // GHASH subkey H = E(K, 0^128)
        let mut h = Block::default();
        aes.encrypt_block(&mut h);

        // Pre-counter block J0 = IV || be32(1); the tag mask is E(K, J0)
        // and content encryption starts one counter later.
        let mut j0 = [0u8; 16];
        j0[..12].copy_from_slice(iv);
        j0[15] = 1;
        let mut tag_mask = Block::clone_from_slice(&j0);
        aes.encrypt_block(&mut tag_mask);

        let mut ctr = Ctr32::new_from_slices(key, &j0)
            .map_err(|e| SealboxError::Envelope(format!("GCM counter init: {e}")))?;
        ctr.seek(BLOCK_SIZE as u64);

        let ghash = GHash::new(GenericArray::from_slice(&h));

        Ok(Self {
            ctr,
            ghash,
            ghash_pending: Vec::new(),
            tag_mask: tag_mask.into(),
            data_len: 0,
        })
    }

    /// Absorb ciphertext into the GHASH accumulator, block-buffered so that
    /// arbitrary chunk boundaries accumulate identically to one-shot input.
    fn absorb(&mut self, mut data: &[u8]) {
        self.data_len += data.len() as u64;
        if !self.ghash_pending.is_empty() {
            let need = BLOCK_SIZE - self.ghash_pending.len();
            let take = need.min(data.len());
            self.ghash_pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.ghash_pending.len() == BLOCK_SIZE {
                self.ghash
                    .update(&[Block::clone_from_slice(&self.ghash_pending)]);
                self.ghash_pending.clear();
            }
        }
        let full = (data.len() / BLOCK_SIZE) * BLOCK_SIZE;
        for chunk in data[..full].chunks_exact(BLOCK_SIZE) {
            self.ghash.update(&[Block::clone_from_slice(chunk)]);
        }
        self.ghash_pending.extend_from_slice(&data[full..]);
    }

    fn compute_tag(&self) -> [u8; 16] {
        let mut gh = self.ghash.clone();
        if !self.ghash_pending.is_empty() {
            gh.update_padded(&self.ghash_pending);
        }
        // No AAD in this format: lengths block is 0 || ciphertext bits.
        let mut len_block = [0u8; 16];
        len_block[8..].copy_from_slice(&(self.data_len * 8).to_be_bytes());
        gh.update(&[Block::clone_from_slice(&len_block)]);

        let digest = gh.finalize();
        let mut tag: [u8; 16] = digest.into();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }
}

/// Opaque saved cipher state; produced by [`CipherSession::snapshot`].
pub struct CipherSnapshot {
    state: SessionState,
    finished: bool,
    bytes_in: u64,
}

/// One streaming encrypt or decrypt session.
pub struct CipherSession {
    cipher_id: ContentCipherId,
    state: SessionState,
    finished: bool,
    bytes_in: u64,
}

impl CipherSession {
    /// Start an encrypt session at plaintext offset zero.
    pub fn encrypt(cipher: ContentCipherId, key: &ContentKey, iv: &[u8]) -> SealboxResult<Self> {
        Self::check_iv(cipher, iv)?;
        let state = match cipher {
            ContentCipherId::AesCbc => SessionState::CbcEncrypt {
                cipher: CbcEnc::new_from_slices(key.as_bytes(), iv)
                    .map_err(|e| SealboxError::Envelope(format!("CBC init: {e}")))?,
                pending: Vec::new(),
            },
            ContentCipherId::AesCtr => SessionState::Ctr {
                cipher: Ctr128::new_from_slices(key.as_bytes(), iv)
                    .map_err(|e| SealboxError::Envelope(format!("CTR init: {e}")))?,
            },
            ContentCipherId::AesGcm => SessionState::GcmEncrypt(GcmCore::new(key.as_bytes(), iv)?),
        };
        Ok(Self::new(cipher, state))
    }

    /// Start a full-object decrypt session: CBC strips padding at finalize,
    /// GCM must be finished with [`CipherSession::finalize_verify`].
    pub fn decrypt(cipher: ContentCipherId, key: &ContentKey, iv: &[u8]) -> SealboxResult<Self> {
        Self::check_iv(cipher, iv)?;
        let state = match cipher {
            ContentCipherId::AesCbc => SessionState::CbcDecrypt {
                cipher: CbcDec::new_from_slices(key.as_bytes(), iv)
                    .map_err(|e| SealboxError::Envelope(format!("CBC init: {e}")))?,
                pending: Vec::new(),
                strip_padding: true,
            },
            ContentCipherId::AesCtr => SessionState::Ctr {
                cipher: Ctr128::new_from_slices(key.as_bytes(), iv)
                    .map_err(|e| SealboxError::Envelope(format!("CTR init: {e}")))?,
            },
            ContentCipherId::AesGcm => SessionState::GcmDecrypt(GcmCore::new(key.as_bytes(), iv)?),
        };
        Ok(Self::new(cipher, state))
    }

    /// Mid-stream CBC decrypt: the IV is the ciphertext block preceding the
    /// fetch window (or the envelope IV for the first block) and no padding
    /// is stripped.
    pub fn decrypt_cbc_unpadded(key: &ContentKey, iv: &[u8]) -> SealboxResult<Self> {
        Self::check_iv(ContentCipherId::AesCbc, iv)?;
        Ok(Self::new(
            ContentCipherId::AesCbc,
            SessionState::CbcDecrypt {
                cipher: CbcDec::new_from_slices(key.as_bytes(), iv)
                    .map_err(|e| SealboxError::Envelope(format!("CBC init: {e}")))?,
                pending: Vec::new(),
                strip_padding: false,
            },
        ))
    }

    /// Counter-mode decrypt seeded at a block-aligned byte offset, derived
    /// purely from the envelope IV and the block index. For GCM objects this
    /// is the auxiliary path: plaintext comes back without tag verification.
    pub fn decrypt_at_offset(
        cipher: ContentCipherId,
        key: &ContentKey,
        envelope_iv: &[u8],
        byte_offset: u64,
    ) -> SealboxResult<Self> {
        let counter = cipher.scheme().adjust_iv(envelope_iv, byte_offset)?;
        Ok(Self::new(
            cipher,
            SessionState::Ctr {
                cipher: Ctr128::new_from_slices(key.as_bytes(), &counter)
                    .map_err(|e| SealboxError::Envelope(format!("CTR init: {e}")))?,
            },
        ))
    }

    fn new(cipher_id: ContentCipherId, state: SessionState) -> Self {
        Self {
            cipher_id,
            state,
            finished: false,
            bytes_in: 0,
        }
    }

    fn check_iv(cipher: ContentCipherId, iv: &[u8]) -> SealboxResult<()> {
        let scheme = cipher.scheme();
        if iv.len() != scheme.iv_len {
            return Err(SealboxError::Envelope(format!(
                "IV of {} bytes does not match {} (expected {})",
                iv.len(),
                scheme.cek_algorithm,
                scheme.iv_len
            )));
        }
        Ok(())
    }

    pub fn cipher_id(&self) -> ContentCipherId {
        self.cipher_id
    }

    /// Input bytes consumed so far (plaintext for encrypt sessions,
    /// ciphertext for decrypt sessions).
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_in
    }

    /// Process a chunk, returning whatever output is ready. CBC holds back
    /// partial blocks (and, when stripping padding, the final block) until
    /// more input or finalize.
    pub fn update(&mut self, input: &[u8]) -> SealboxResult<Vec<u8>> {
        if self.finished {
            return Err(SealboxError::MultipartFinalization(
                "cipher session already finished".into(),
            ));
        }
        if matches!(self.state, SessionState::GcmEncrypt(_))
            && self.bytes_in + input.len() as u64 > MAX_GCM_PLAINTEXT_BYTES
        {
            return Err(SealboxError::Security(format!(
                "GCM plaintext would exceed the {MAX_GCM_PLAINTEXT_BYTES}-byte ceiling"
            )));
        }
        self.bytes_in += input.len() as u64;

        let out = match &mut self.state {
            SessionState::CbcEncrypt { cipher, pending } => {
                pending.extend_from_slice(input);
                let take = (pending.len() / BLOCK_SIZE) * BLOCK_SIZE;
                let mut out = Vec::with_capacity(take);
                for chunk in pending[..take].chunks_exact(BLOCK_SIZE) {
                    let mut block = Block::clone_from_slice(chunk);
                    cipher.encrypt_block_mut(&mut block);
                    out.extend_from_slice(&block);
                }
                pending.drain(..take);
                out
            }
            SessionState::CbcDecrypt {
                cipher,
                pending,
                strip_padding,
            } => {
                pending.extend_from_slice(input);
                // When stripping padding, the final ciphertext block stays
                // buffered until finalize so the pad can be removed.
                let keep = if *strip_padding { BLOCK_SIZE } else { 0 };
                let available = pending.len().saturating_sub(keep);
                let take = (available / BLOCK_SIZE) * BLOCK_SIZE;
                let mut out = Vec::with_capacity(take);
                for chunk in pending[..take].chunks_exact(BLOCK_SIZE) {
                    let mut block = Block::clone_from_slice(chunk);
                    cipher.decrypt_block_mut(&mut block);
                    out.extend_from_slice(&block);
                }
                pending.drain(..take);
                out
            }
            SessionState::Ctr { cipher } => {
                let mut out = input.to_vec();
                cipher.apply_keystream(&mut out);
                out
            }
            SessionState::GcmEncrypt(core) => {
                let mut out = input.to_vec();
                core.ctr.apply_keystream(&mut out);
                core.absorb(&out);
                out
            }
            SessionState::GcmDecrypt(core) => {
                core.absorb(input);
                let mut out = input.to_vec();
                core.ctr.apply_keystream(&mut out);
                out
            }
        };
        Ok(out)
    }

    /// Finish the session, returning any remaining output: the padded final
    /// block for CBC encrypt, the unpadded final block for CBC decrypt, the
    /// authentication tag for GCM encrypt.
    ///
    /// GCM decrypt must use [`CipherSession::finalize_verify`]; plaintext
    /// already streamed out of `update` is unverified until then.
    pub fn finalize(&mut self) -> SealboxResult<Vec<u8>> {
        if self.finished {
            return Err(SealboxError::MultipartFinalization(
                "cipher session already finished".into(),
            ));
        }
        self.finished = true;

        match &mut self.state {
            SessionState::CbcEncrypt { cipher, pending } => {
                let pad = BLOCK_SIZE - (pending.len() % BLOCK_SIZE);
                let mut last = pending.clone();
                last.resize(last.len() + pad, pad as u8);
                pending.zeroize();
                pending.clear();
                let mut out = Vec::with_capacity(last.len());
                for chunk in last.chunks_exact(BLOCK_SIZE) {
                    let mut block = Block::clone_from_slice(chunk);
                    cipher.encrypt_block_mut(&mut block);
                    out.extend_from_slice(&block);
                }
                last.zeroize();
                Ok(out)
            }
            SessionState::CbcDecrypt {
                cipher,
                pending,
                strip_padding,
            } => {
                if pending.len() % BLOCK_SIZE != 0 {
                    return Err(SealboxError::Security(format!(
                        "CBC ciphertext is not block aligned ({} trailing bytes)",
                        pending.len() % BLOCK_SIZE
                    )));
                }
                if *strip_padding && pending.is_empty() {
                    return Err(SealboxError::Security(
                        "CBC ciphertext truncated: missing padding block".into(),
                    ));
                }
                let mut out = Vec::with_capacity(pending.len());
                for chunk in pending.chunks_exact(BLOCK_SIZE) {
                    let mut block = Block::clone_from_slice(chunk);
                    cipher.decrypt_block_mut(&mut block);
                    out.extend_from_slice(&block);
                }
                pending.clear();
                if *strip_padding {
                    let stripped = strip_pkcs7(&out)?.len();
                    out.truncate(stripped);
                }
                Ok(out)
            }
            SessionState::Ctr { .. } => Ok(Vec::new()),
            SessionState::GcmEncrypt(core) => Ok(core.compute_tag().to_vec()),
            SessionState::GcmDecrypt(_) => Err(SealboxError::Security(
                "authenticated decrypt must be finished with finalize_verify".into(),
            )),
        }
    }

    /// Finish a GCM decrypt session, verifying the authentication tag in
    /// constant time. Fails closed: a mismatch yields `Security` and no
    /// further output.
    pub fn finalize_verify(&mut self, tag: &[u8]) -> SealboxResult<()> {
        if self.finished {
            return Err(SealboxError::MultipartFinalization(
                "cipher session already finished".into(),
            ));
        }
        self.finished = true;

        match &self.state {
            SessionState::GcmDecrypt(core) => {
                let expected = core.compute_tag();
                if bool::from(expected.ct_eq(tag)) {
                    Ok(())
                } else {
                    Err(SealboxError::Security(
                        "content authentication tag mismatch".into(),
                    ))
                }
            }
            _ => Err(SealboxError::Security(
                "finalize_verify is only valid for authenticated decrypt sessions".into(),
            )),
        }
    }

    /// Save the complete cipher state (chaining value, counter position,
    /// authentication accumulator) for a later [`CipherSession::restore`].
    pub fn snapshot(&self) -> CipherSnapshot {
        CipherSnapshot {
            state: self.state.clone(),
            finished: self.finished,
            bytes_in: self.bytes_in,
        }
    }

    /// Rewind to a previously captured snapshot.
    pub fn restore(&mut self, snapshot: &CipherSnapshot) {
        self.state = snapshot.state.clone();
        self.finished = snapshot.finished;
        self.bytes_in = snapshot.bytes_in;
    }

    /// Reposition a counter-mode session. O(1): the keystream is recomputed
    /// from the 64-bit block index, not replayed.
    pub fn seek_to(&mut self, byte_offset: u64) -> SealboxResult<()> {
        match &mut self.state {
            SessionState::Ctr { cipher } => {
                cipher
                    .try_seek(byte_offset)
                    .map_err(|e| SealboxError::Config(format!("keystream seek: {e}")))?;
                self.bytes_in = byte_offset;
                Ok(())
            }
            _ => Err(SealboxError::Config(
                "only counter-mode sessions are seekable".into(),
            )),
        }
    }
}

/// Validate and strip PKCS7 padding, returning the unpadded prefix.
pub fn strip_pkcs7(data: &[u8]) -> SealboxResult<&[u8]> {
    let pad = *data.last().ok_or_else(|| {
        SealboxError::Security("empty plaintext where a padding block was expected".into())
    })? as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(SealboxError::Security("invalid PKCS7 padding".into()));
    }
    if data[data.len() - pad..].iter().any(|&b| b as usize != pad) {
        return Err(SealboxError::Security("invalid PKCS7 padding".into()));
    }
    Ok(&data[..data.len() - pad])
}
