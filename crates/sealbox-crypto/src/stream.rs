//! Streaming wrappers over [`CipherSession`].
//!
//! `EncryptingReader` turns any seekable plaintext source into a ciphertext
//! `Read`, with mark/reset so a caller can retry a failed upload without
//! re-reading from the start. `MultipartEncryptSession` carries cipher state
//! across independently uploaded parts so the assembled object decrypts as a
//! single stream.

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};

use sealbox_core::{SealboxError, SealboxResult};

use crate::cipher::{CipherSession, CipherSnapshot};
use crate::material::ContentKey;
use crate::scheme::ContentCipherId;
use crate::BLOCK_SIZE;

const READ_CHUNK: usize = 64 * 1024;

struct Mark {
    snapshot: CipherSnapshot,
    source_pos: u64,
    buffered: VecDeque<u8>,
    source_done: bool,
    finalized: bool,
    position: u64,
}

/// Encrypts a plaintext source on the fly, yielding ciphertext (with the
/// authentication tag appended for GCM) through `std::io::Read`.
pub struct EncryptingReader<R> {
    source: R,
    session: CipherSession,
    buffered: VecDeque<u8>,
    source_done: bool,
    finalized: bool,
    /// Ciphertext bytes handed out so far; 64-bit, objects past 2 GiB are
    /// an ordinary case.
    position: u64,
    mark: Option<Mark>,
}

impl<R: Read + Seek> EncryptingReader<R> {
    pub fn new(
        source: R,
        cipher: ContentCipherId,
        key: &ContentKey,
        iv: &[u8],
    ) -> SealboxResult<Self> {
        Ok(Self {
            source,
            session: CipherSession::encrypt(cipher, key, iv)?,
            buffered: VecDeque::new(),
            source_done: false,
            finalized: false,
            position: 0,
            mark: None,
        })
    }

    /// Ciphertext bytes emitted so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Plaintext bytes consumed from the source so far.
    pub fn plaintext_consumed(&self) -> u64 {
        self.session.bytes_processed()
    }

    /// Remember the current stream state. A later [`EncryptingReader::reset`]
    /// rewinds both the source and the cipher to this exact point, so the
    /// bytes produced after the reset are identical to the first attempt.
    pub fn mark(&mut self) -> SealboxResult<()> {
        let source_pos = self.source.stream_position()?;
        self.mark = Some(Mark {
            snapshot: self.session.snapshot(),
            source_pos,
            buffered: self.buffered.clone(),
            source_done: self.source_done,
            finalized: self.finalized,
            position: self.position,
        });
        Ok(())
    }

    /// Rewind to the last mark.
    pub fn reset(&mut self) -> SealboxResult<()> {
        let mark = self
            .mark
            .as_ref()
            .ok_or_else(|| SealboxError::Config("reset without a prior mark".into()))?;
        self.source.seek(SeekFrom::Start(mark.source_pos))?;
        self.session.restore(&mark.snapshot);
        self.buffered = mark.buffered.clone();
        self.source_done = mark.source_done;
        self.finalized = mark.finalized;
        self.position = mark.position;
        Ok(())
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.buffered.is_empty() && !self.finalized {
            if self.source_done {
                let tail = self.session.finalize().map_err(io::Error::other)?;
                self.buffered.extend(tail);
                self.finalized = true;
                break;
            }
            let n = self.source.read(&mut chunk)?;
            if n == 0 {
                self.source_done = true;
                continue;
            }
            let out = self.session.update(&chunk[..n]).map_err(io::Error::other)?;
            self.buffered.extend(out);
        }
        Ok(())
    }
}

impl<R: Read + Seek> Read for EncryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill()?;
        let n = buf.len().min(self.buffered.len());
        for (i, byte) in self.buffered.drain(..n).enumerate() {
            buf[i] = byte;
        }
        self.position += n as u64;
        Ok(n)
    }
}

/// Carries one cipher stream across separately encrypted parts.
///
/// Every part except the last must be a whole number of cipher blocks so
/// that the chaining state (or counter position) lines up with the next
/// part. Exactly one part is encrypted with `last == true`; it carries the
/// padding block for CBC or the authentication tag for GCM.
pub struct MultipartEncryptSession {
    session: CipherSession,
    final_seen: bool,
}

impl MultipartEncryptSession {
    pub fn new(cipher: ContentCipherId, key: &ContentKey, iv: &[u8]) -> SealboxResult<Self> {
        Ok(Self {
            session: CipherSession::encrypt(cipher, key, iv)?,
            final_seen: false,
        })
    }

    /// Encrypt the next part. Parts must be fed in object order.
    pub fn encrypt_part(&mut self, plaintext: &[u8], last: bool) -> SealboxResult<Vec<u8>> {
        if self.final_seen {
            return Err(SealboxError::MultipartFinalization(
                "a part was submitted after the final part".into(),
            ));
        }
        if !last && plaintext.len() % BLOCK_SIZE != 0 {
            return Err(SealboxError::PartAlignment {
                part_len: plaintext.len() as u64,
                block_size: BLOCK_SIZE,
            });
        }
        let mut out = self.session.update(plaintext)?;
        if last {
            out.extend(self.session.finalize()?);
            self.final_seen = true;
        }
        Ok(out)
    }

    /// Confirm the upload is complete. Fails if no final part was ever
    /// encrypted, which would leave an undecryptable object behind.
    pub fn complete(&self) -> SealboxResult<()> {
        if !self.final_seen {
            return Err(SealboxError::MultipartFinalization(
                "upload completed without a final part".into(),
            ));
        }
        Ok(())
    }

    pub fn bytes_processed(&self) -> u64 {
        self.session.bytes_processed()
    }
}
