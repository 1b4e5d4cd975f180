//! Envelope placement: object metadata or a sidecar instruction object.
//!
//! In `ObjectMetadata` mode the envelope travels as user metadata on the
//! object itself. In `InstructionFile` mode the object carries no crypto
//! metadata; the envelope is a JSON sidecar at `<id><suffix>`, marked with
//! `x-amz-crypto-instr-file` so it is never mistaken for content.

use std::collections::HashMap;

use sealbox_core::{CryptoConfig, EnvelopeStorageMode, SealboxError, SealboxResult};
use sealbox_crypto::envelope::CRYPTO_INSTRUCTION_FILE;
use sealbox_crypto::Envelope;
use sealbox_storage::ObjectStore;

/// Id of the instruction object paired with `id`.
pub fn sidecar_id(id: &str, suffix: &str) -> String {
    format!("{id}{suffix}")
}

/// Store ciphertext plus its envelope according to the configured placement.
///
/// In sidecar mode the content object is written first: a crash between the
/// two writes then leaves an object without an envelope, which reads fail
/// loudly on, rather than an orphaned envelope that masks the missing data.
pub(crate) async fn store_with_envelope<S: ObjectStore>(
    store: &S,
    config: &CryptoConfig,
    id: &str,
    ciphertext: Vec<u8>,
    envelope: &Envelope,
) -> SealboxResult<()> {
    match config.envelope_storage {
        EnvelopeStorageMode::ObjectMetadata => {
            let metadata = envelope.to_metadata(config.mode)?;
            store.put(id, ciphertext, metadata).await
        }
        EnvelopeStorageMode::InstructionFile => {
            store.put(id, ciphertext, HashMap::new()).await?;
            write_sidecar(store, config, id, &config.instruction_file_suffix, envelope).await
        }
    }
}

pub(crate) async fn write_sidecar<S: ObjectStore>(
    store: &S,
    config: &CryptoConfig,
    id: &str,
    suffix: &str,
    envelope: &Envelope,
) -> SealboxResult<()> {
    let json = envelope.to_json(config.mode)?;
    let mut metadata = HashMap::new();
    metadata.insert(CRYPTO_INSTRUCTION_FILE.to_string(), String::new());
    store
        .put(&sidecar_id(id, suffix), json.into_bytes(), metadata)
        .await
}

/// Recover the envelope for an object whose metadata has already been
/// fetched. Looks in the metadata first, then (in sidecar mode, or when the
/// fallback is enabled) at the instruction object.
pub(crate) async fn load_envelope<S: ObjectStore>(
    store: &S,
    config: &CryptoConfig,
    id: &str,
    object_metadata: &HashMap<String, String>,
) -> SealboxResult<Envelope> {
    if Envelope::present_in_metadata(object_metadata) {
        return Envelope::from_metadata(object_metadata, config.mode);
    }

    let sidecar_allowed = config.envelope_storage == EnvelopeStorageMode::InstructionFile
        || config.instruction_file_fallback;
    if !sidecar_allowed {
        return Err(SealboxError::Envelope(format!(
            "object {id} carries no encryption envelope"
        )));
    }

    let sid = sidecar_id(id, &config.instruction_file_suffix);
    if !store.exists(&sid).await? {
        return Err(SealboxError::Envelope(format!(
            "object {id} carries no envelope and no instruction object exists at {sid}"
        )));
    }
    let sidecar = store.get(&sid).await?;
    if !sidecar.metadata.contains_key(CRYPTO_INSTRUCTION_FILE) {
        return Err(SealboxError::Envelope(format!(
            "object at {sid} is not marked as an instruction object"
        )));
    }
    if config.envelope_storage == EnvelopeStorageMode::ObjectMetadata {
        tracing::warn!(object = %id, sidecar = %sid, "no embedded envelope, using instruction object");
    }
    let json = String::from_utf8(sidecar.bytes)
        .map_err(|_| SealboxError::Envelope(format!("instruction object {sid} is not UTF-8")))?;
    Envelope::from_json(&json, config.mode)
}

/// Remove the instruction object paired with `id`, if any. Failures are
/// logged, not fatal: the content object is already gone.
pub(crate) async fn delete_sidecar<S: ObjectStore>(store: &S, config: &CryptoConfig, id: &str) {
    let sid = sidecar_id(id, &config.instruction_file_suffix);
    if let Err(err) = store.delete(&sid).await {
        tracing::warn!(sidecar = %sid, %err, "failed to delete instruction object");
    }
}
