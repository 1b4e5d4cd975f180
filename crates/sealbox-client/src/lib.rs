//! sealbox-client: envelope encryption over any [`ObjectStore`]
//!
//! Write path: generate a fresh content key and IV per object, encrypt the
//! content with the mode's cipher, wrap the content key under the keyring's
//! current KEK, and persist the envelope next to the ciphertext (metadata or
//! instruction sidecar).
//!
//! Read path: recover the envelope, find the matching keyring material by
//! its description, unwrap the content key, decrypt. Authenticated objects
//! are verified before any plaintext is returned; ranged reads of them skip
//! verification and say so in the logs. Strict mode refuses both legacy
//! envelopes and ranged reads outright.

pub mod adapter;

use std::io::{Read, Seek};
use std::sync::Arc;

use rand::RngCore;
use sealbox_core::{CryptoConfig, CryptoMode, SealboxError, SealboxResult};
use sealbox_crypto::{
    plan_range, strip_pkcs7, unwrap_content_key, wrap_content_key, CipherSession, ContentCipherId,
    ContentKey, EncryptingReader, Envelope, IvStrategy, Keyring, KmsKeyService,
    MaterialDescription, MultipartEncryptSession,
};
use sealbox_storage::ObjectStore;

pub use sealbox_crypto::material::EncryptionMaterial;

pub struct EncryptionClient<S> {
    store: S,
    keyring: Keyring,
    kms: Option<Arc<dyn KmsKeyService>>,
    config: CryptoConfig,
}

impl<S: ObjectStore> EncryptionClient<S> {
    pub fn new(store: S, keyring: Keyring, config: CryptoConfig) -> Self {
        Self {
            store,
            keyring,
            kms: None,
            config,
        }
    }

    pub fn with_kms(mut self, kms: Arc<dyn KmsKeyService>) -> Self {
        self.kms = Some(kms);
        self
    }

    /// Direct access to the underlying store (unencrypted view).
    pub fn store(&self) -> &S {
        &self.store
    }

    fn content_cipher(&self) -> ContentCipherId {
        match self.config.mode {
            CryptoMode::EncryptionOnly => ContentCipherId::AesCbc,
            CryptoMode::AuthenticatedEncryption | CryptoMode::StrictAuthenticatedEncryption => {
                ContentCipherId::AesGcm
            }
        }
    }

    fn kms(&self) -> Option<&dyn KmsKeyService> {
        self.kms.as_deref()
    }

    /// Encrypt and store one object under a fresh content key.
    pub async fn put_object(&self, id: &str, plaintext: &[u8]) -> SealboxResult<()> {
        let (mut envelope, cek) = self.begin_encrypt()?;
        let mut session = CipherSession::encrypt(envelope.cipher, &cek, &envelope.iv)?;
        let mut ciphertext = session.update(plaintext)?;
        ciphertext.extend(session.finalize()?);

        envelope.plaintext_len = Some(plaintext.len() as u64);

        tracing::debug!(
            object = %id,
            cipher = %envelope.scheme().cek_algorithm,
            wrap = %envelope.wrap_algorithm.label(),
            "storing encrypted object"
        );
        adapter::store_with_envelope(&self.store, &self.config, id, ciphertext, &envelope).await
    }

    /// Encrypt and store one object from a seekable plaintext source.
    ///
    /// The source is encrypted through an [`EncryptingReader`], so a caller
    /// that needs upload retries can wrap the same machinery with mark/reset
    /// instead of re-reading the source from the start.
    pub async fn put_object_from_reader<R: Read + Seek>(
        &self,
        id: &str,
        source: R,
    ) -> SealboxResult<()> {
        let (mut envelope, cek) = self.begin_encrypt()?;
        let mut reader = EncryptingReader::new(source, envelope.cipher, &cek, &envelope.iv)?;
        let mut ciphertext = Vec::new();
        reader.read_to_end(&mut ciphertext)?;

        envelope.plaintext_len = Some(reader.plaintext_consumed());

        tracing::debug!(
            object = %id,
            cipher = %envelope.scheme().cek_algorithm,
            bytes = reader.plaintext_consumed(),
            "storing encrypted object from reader"
        );
        adapter::store_with_envelope(&self.store, &self.config, id, ciphertext, &envelope).await
    }

    /// Fetch and decrypt one object in full. Authenticated objects have
    /// their tag verified before plaintext is released.
    pub async fn get_object(&self, id: &str) -> SealboxResult<Vec<u8>> {
        let stored = self.store.get(id).await?;
        let envelope = adapter::load_envelope(&self.store, &self.config, id, &stored.metadata).await?;
        let cek = self.unwrap_cek(&envelope)?;

        match envelope.cipher {
            ContentCipherId::AesGcm => {
                let tag_len = envelope.scheme().tag_len_bytes();
                if stored.bytes.len() < tag_len {
                    return Err(SealboxError::Envelope(format!(
                        "object {id} is shorter than its authentication tag"
                    )));
                }
                let (body, tag) = stored.bytes.split_at(stored.bytes.len() - tag_len);
                let mut session = CipherSession::decrypt(envelope.cipher, &cek, &envelope.iv)?;
                let plaintext = session.update(body)?;
                session.finalize_verify(tag)?;
                Ok(plaintext)
            }
            ContentCipherId::AesCbc | ContentCipherId::AesCtr => {
                let mut session = CipherSession::decrypt(envelope.cipher, &cek, &envelope.iv)?;
                let mut plaintext = session.update(&stored.bytes)?;
                plaintext.extend(session.finalize()?);
                Ok(plaintext)
            }
        }
    }

    /// Fetch and decrypt plaintext bytes `[start, end]` (inclusive;
    /// `end == None` reads to the end of the content).
    ///
    /// Ranged reads of authenticated objects cannot verify the tag; strict
    /// mode refuses them, the other modes log the tradeoff.
    pub async fn get_object_range(
        &self,
        id: &str,
        start: u64,
        end: Option<u64>,
    ) -> SealboxResult<Vec<u8>> {
        let stat = self.store.stat(id).await?;
        let envelope = adapter::load_envelope(&self.store, &self.config, id, &stat.metadata).await?;

        let plaintext_len = match envelope.cipher {
            ContentCipherId::AesGcm => {
                let tag_len = envelope.scheme().tag_len_bytes() as u64;
                if stat.content_length < tag_len {
                    return Err(SealboxError::Envelope(format!(
                        "object {id} is shorter than its authentication tag"
                    )));
                }
                Some(
                    envelope
                        .plaintext_len
                        .unwrap_or(stat.content_length - tag_len),
                )
            }
            ContentCipherId::AesCtr => Some(envelope.plaintext_len.unwrap_or(stat.content_length)),
            // CBC ciphertext length includes padding; without the recorded
            // length the planner works open-ended and padding is stripped
            // after decrypt.
            ContentCipherId::AesCbc => envelope.plaintext_len,
        };

        let plan = plan_range(envelope.cipher, self.config.mode, start, end, plaintext_len)?;
        if !plan.verified {
            tracing::warn!(object = %id, "ranged read skips authentication tag verification");
        }

        let window = self.store.get_range(id, plan.ct_start, plan.ct_end).await?;
        let cek = self.unwrap_cek(&envelope)?;

        let decrypted = match plan.iv {
            IvStrategy::FromEnvelope => {
                let mut session = CipherSession::decrypt_cbc_unpadded(&cek, &envelope.iv)?;
                let mut out = session.update(&window)?;
                out.extend(session.finalize()?);
                out
            }
            IvStrategy::PrecedingCipherBlock => {
                if window.len() < sealbox_crypto::BLOCK_SIZE {
                    return Err(SealboxError::Envelope(format!(
                        "range window for {id} is shorter than one cipher block"
                    )));
                }
                let (iv, body) = window.split_at(sealbox_crypto::BLOCK_SIZE);
                let mut session = CipherSession::decrypt_cbc_unpadded(&cek, iv)?;
                let mut out = session.update(body)?;
                out.extend(session.finalize()?);
                out
            }
            IvStrategy::AdjustedCounter { byte_offset } => {
                let mut session = CipherSession::decrypt_at_offset(
                    envelope.cipher,
                    &cek,
                    &envelope.iv,
                    byte_offset,
                )?;
                session.update(&window)?
            }
        };

        // A CBC window that runs through the final ciphertext block decrypts
        // the padded tail; strip it before trimming to the requested range.
        // Keyed on the fetched window, not the recorded length, so foreign
        // envelopes without a length header cannot leak padding bytes.
        let window_end = plan.ct_start + window.len() as u64;
        let decrypted = if envelope.cipher == ContentCipherId::AesCbc
            && window_end == stat.content_length
        {
            strip_pkcs7(&decrypted)?.to_vec()
        } else {
            decrypted
        };

        let skip = plan.discard_prefix as usize;
        if skip > decrypted.len() {
            return Err(SealboxError::Envelope(format!(
                "range window for {id} decrypted shorter than the requested offset"
            )));
        }
        let mut out = decrypted[skip..].to_vec();
        if let Some(n) = plan.emit_len {
            out.truncate(n as usize);
        }
        Ok(out)
    }

    /// Delete an object and its instruction sidecar, if any.
    pub async fn delete_object(&self, id: &str) -> SealboxResult<()> {
        self.store.delete(id).await?;
        adapter::delete_sidecar(&self.store, &self.config, id).await;
        Ok(())
    }

    /// Re-wrap an object's content key under different keyring material and
    /// write the result as a new instruction sidecar at `<id><suffix>`. The
    /// content is not touched; the old envelope keeps working until it is
    /// deleted.
    pub async fn rewrap_envelope(
        &self,
        id: &str,
        new_description: &MaterialDescription,
        suffix: &str,
    ) -> SealboxResult<()> {
        let stat = self.store.stat(id).await?;
        let envelope = adapter::load_envelope(&self.store, &self.config, id, &stat.metadata).await?;

        if *new_description == envelope.material_description {
            return Err(SealboxError::Security(
                "envelope re-wrap requires a different key than the one in use".into(),
            ));
        }

        let cek = self.unwrap_cek(&envelope)?;
        let new_material = self.keyring.decryption_material(new_description)?;
        let rewrapped = wrap_content_key(new_material, &cek, self.kms())?;
        if rewrapped.bytes == envelope.wrapped_cek {
            return Err(SealboxError::Security(
                "re-wrapped content key is identical to the existing one".into(),
            ));
        }

        let new_envelope = Envelope {
            wrapped_cek: rewrapped.bytes,
            wrap_algorithm: rewrapped.algorithm,
            material_description: rewrapped.description,
            ..envelope
        };
        adapter::write_sidecar(&self.store, &self.config, id, suffix, &new_envelope).await
    }

    /// Begin a multipart upload. Parts are encrypted through one cipher
    /// stream; [`EncryptionClient::complete_multipart`] stores the object.
    pub fn start_multipart(&self, id: &str) -> SealboxResult<MultipartUpload> {
        let (envelope, cek) = self.begin_encrypt()?;
        let session = MultipartEncryptSession::new(envelope.cipher, &cek, &envelope.iv)?;
        Ok(MultipartUpload {
            id: id.to_string(),
            envelope,
            session,
            ciphertext: Vec::new(),
        })
    }

    /// Finish a multipart upload: requires that a final part was encrypted,
    /// then stores the assembled ciphertext with its envelope.
    pub async fn complete_multipart(&self, mut upload: MultipartUpload) -> SealboxResult<()> {
        upload.session.complete()?;
        upload.envelope.plaintext_len = Some(upload.session.bytes_processed());
        adapter::store_with_envelope(
            &self.store,
            &self.config,
            &upload.id,
            upload.ciphertext,
            &upload.envelope,
        )
        .await
    }

    /// Fresh envelope plus the content key it wraps.
    fn begin_encrypt(&self) -> SealboxResult<(Envelope, ContentKey)> {
        let cipher = self.content_cipher();
        let cek = ContentKey::generate();
        let mut iv = vec![0u8; cipher.scheme().iv_len];
        rand::thread_rng().fill_bytes(&mut iv);

        let material = self.keyring.encryption_material()?;
        let wrapped = wrap_content_key(material, &cek, self.kms())?;

        Ok((
            Envelope {
                iv,
                wrapped_cek: wrapped.bytes,
                cipher,
                wrap_algorithm: wrapped.algorithm,
                material_description: wrapped.description,
                plaintext_len: None,
                legacy: false,
            },
            cek,
        ))
    }

    fn unwrap_cek(&self, envelope: &Envelope) -> SealboxResult<ContentKey> {
        let material = self
            .keyring
            .decryption_material(&envelope.material_description)?;
        // The envelope's description, not the registered material's, is the
        // KMS decrypt context: the wrap recorded the kms_cmk_id entry there.
        unwrap_content_key(
            material,
            &envelope.wrapped_cek,
            envelope.wrap_algorithm,
            &envelope.material_description,
            self.kms(),
        )
    }
}

/// In-flight multipart upload state. Parts must be fed in object order;
/// exactly one part is the final one.
pub struct MultipartUpload {
    id: String,
    envelope: Envelope,
    session: MultipartEncryptSession,
    ciphertext: Vec<u8>,
}

impl MultipartUpload {
    pub fn object_id(&self) -> &str {
        &self.id
    }

    /// Encrypt the next part. All parts except the last must be a whole
    /// number of cipher blocks.
    pub fn upload_part(&mut self, plaintext: &[u8], last: bool) -> SealboxResult<()> {
        let ciphertext = self.session.encrypt_part(plaintext, last)?;
        self.ciphertext.extend(ciphertext);
        Ok(())
    }
}
