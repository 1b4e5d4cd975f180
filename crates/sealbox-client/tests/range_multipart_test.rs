//! Ranged reads, multipart uploads, and envelope re-wrapping against the
//! in-memory store.

use std::sync::Arc;

use sealbox_client::EncryptionClient;
use sealbox_core::{CryptoConfig, CryptoMode, EnvelopeStorageMode, SealboxError};
use sealbox_crypto::{
    wrap_content_key, CipherSession, ContentCipherId, ContentKey, EncryptionMaterial, Envelope,
    Keyring, MaterialDescription, SymmetricKek,
};
use sealbox_storage::{MemoryStore, ObjectStore};

fn desc(id: &str) -> MaterialDescription {
    MaterialDescription::new().with("key-id", id)
}

fn keyring_with(materials: Vec<EncryptionMaterial>) -> Keyring {
    let mut ring = Keyring::new();
    for m in materials {
        ring.register(m).unwrap();
    }
    ring
}

fn symmetric(id: &str, byte: u8) -> EncryptionMaterial {
    EncryptionMaterial::symmetric(SymmetricKek::from_bytes([byte; 32]), desc(id))
}

fn config(mode: CryptoMode) -> CryptoConfig {
    CryptoConfig {
        mode,
        ..Default::default()
    }
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 241) as u8).collect()
}

async fn check_ranges(client: &EncryptionClient<MemoryStore>, id: &str, plaintext: &[u8]) {
    let cases: &[(u64, Option<u64>)] = &[
        (0, Some(0)),                          // first byte
        (0, Some(15)),                         // exactly the first block
        (16, Some(31)),                        // one interior block
        (5, Some(4999)),                       // straddles many blocks
        (17, Some(17)),                        // single interior byte
        (9999, Some(9999)),                    // last byte
        (0, Some(9999)),                       // whole object as a range
        (4000, Some(100_000)),                 // end clamped past the object
        (1234, None),                          // open-ended tail
    ];
    for &(start, end) in cases {
        let got = client.get_object_range(id, start, end).await.unwrap();
        let last = end.map_or(plaintext.len() - 1, |e| (e as usize).min(plaintext.len() - 1));
        assert_eq!(
            got,
            &plaintext[start as usize..=last],
            "range {start}..={end:?}"
        );
    }
}

#[tokio::test]
async fn ranged_reads_of_authenticated_objects() {
    let client = EncryptionClient::new(
        MemoryStore::new(),
        keyring_with(vec![symmetric("k1", 7)]),
        config(CryptoMode::AuthenticatedEncryption),
    );
    let plaintext = sample(10_000);
    client.put_object("obj", &plaintext).await.unwrap();
    check_ranges(&client, "obj", &plaintext).await;
}

#[tokio::test]
async fn ranged_reads_of_legacy_cbc_objects() {
    let client = EncryptionClient::new(
        MemoryStore::new(),
        keyring_with(vec![symmetric("k1", 7)]),
        config(CryptoMode::EncryptionOnly),
    );
    let plaintext = sample(10_000);
    client.put_object("obj", &plaintext).await.unwrap();
    check_ranges(&client, "obj", &plaintext).await;
}

#[tokio::test]
async fn range_requests_are_validated() {
    let client = EncryptionClient::new(
        MemoryStore::new(),
        keyring_with(vec![symmetric("k1", 7)]),
        config(CryptoMode::AuthenticatedEncryption),
    );
    client.put_object("obj", &sample(100)).await.unwrap();

    // Start beyond the content.
    assert!(client.get_object_range("obj", 100, None).await.is_err());
    // Inverted range.
    assert!(client.get_object_range("obj", 50, Some(10)).await.is_err());
}

#[tokio::test]
async fn strict_mode_refuses_ranged_reads() {
    let client = EncryptionClient::new(
        MemoryStore::new(),
        keyring_with(vec![symmetric("k1", 7)]),
        config(CryptoMode::StrictAuthenticatedEncryption),
    );
    client.put_object("obj", &sample(100)).await.unwrap();

    let err = client.get_object_range("obj", 0, Some(10)).await.unwrap_err();
    assert!(matches!(err, SealboxError::Security(_)), "{err}");

    // Full reads still work and are verified.
    assert_eq!(client.get_object("obj").await.unwrap(), sample(100));
}

/// An object written by a counter-mode producer (not a shape this client
/// writes) must still read back in full and by range.
#[tokio::test]
async fn counter_mode_object_from_another_writer() {
    let store = MemoryStore::new();
    let material = symmetric("k1", 7);
    let plaintext = sample(10_000);

    let cek = ContentKey::generate();
    let iv = [0x31u8; 16];
    let wrapped = wrap_content_key(&material, &cek, None).unwrap();
    let mut session = CipherSession::encrypt(ContentCipherId::AesCtr, &cek, &iv).unwrap();
    let mut ciphertext = session.update(&plaintext).unwrap();
    ciphertext.extend(session.finalize().unwrap());

    let envelope = Envelope {
        iv: iv.to_vec(),
        wrapped_cek: wrapped.bytes,
        cipher: ContentCipherId::AesCtr,
        wrap_algorithm: wrapped.algorithm,
        material_description: wrapped.description,
        plaintext_len: Some(plaintext.len() as u64),
        legacy: false,
    };
    let metadata = envelope.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
    store.put("obj", ciphertext, metadata).await.unwrap();

    let client = EncryptionClient::new(
        store,
        keyring_with(vec![material]),
        config(CryptoMode::AuthenticatedEncryption),
    );
    assert_eq!(client.get_object("obj").await.unwrap(), plaintext);
    check_ranges(&client, "obj", &plaintext).await;
}

/// A CBC object whose envelope omits the unencrypted content length must
/// never emit its padding bytes, even for a range that overshoots the end.
#[tokio::test]
async fn cbc_range_overshoot_never_emits_padding() {
    let store = MemoryStore::new();
    let material = symmetric("k1", 7);
    let plaintext = sample(100);

    let cek = ContentKey::generate();
    let iv = [0x42u8; 16];
    let wrapped = wrap_content_key(&material, &cek, None).unwrap();
    let mut session = CipherSession::encrypt(ContentCipherId::AesCbc, &cek, &iv).unwrap();
    let mut ciphertext = session.update(&plaintext).unwrap();
    ciphertext.extend(session.finalize().unwrap());

    let envelope = Envelope {
        iv: iv.to_vec(),
        wrapped_cek: wrapped.bytes,
        cipher: ContentCipherId::AesCbc,
        wrap_algorithm: wrapped.algorithm,
        material_description: wrapped.description,
        plaintext_len: None,
        legacy: false,
    };
    let metadata = envelope.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
    store.put("obj", ciphertext, metadata).await.unwrap();

    let client = EncryptionClient::new(
        store,
        keyring_with(vec![material]),
        config(CryptoMode::AuthenticatedEncryption),
    );

    // End well past the object: only real content comes back.
    let got = client.get_object_range("obj", 96, Some(200)).await.unwrap();
    assert_eq!(got, &plaintext[96..]);

    // Open-ended tail and a full read behave the same way.
    assert_eq!(
        client.get_object_range("obj", 50, None).await.unwrap(),
        &plaintext[50..]
    );
    assert_eq!(client.get_object("obj").await.unwrap(), plaintext);
}

#[tokio::test]
async fn multipart_upload_roundtrip() {
    for mode in [CryptoMode::EncryptionOnly, CryptoMode::AuthenticatedEncryption] {
        let client = EncryptionClient::new(
            MemoryStore::new(),
            keyring_with(vec![symmetric("k1", 7)]),
            config(mode),
        );

        let part1 = sample(8192);
        let part2 = sample(4096);
        let tail = sample(123);

        let mut upload = client.start_multipart("big").unwrap();
        upload.upload_part(&part1, false).unwrap();
        upload.upload_part(&part2, false).unwrap();
        upload.upload_part(&tail, true).unwrap();
        client.complete_multipart(upload).await.unwrap();

        let mut whole = part1;
        whole.extend(part2);
        whole.extend(tail);
        assert_eq!(client.get_object("big").await.unwrap(), whole, "{mode:?}");
    }
}

#[tokio::test]
async fn multipart_part_alignment_is_enforced() {
    let client = EncryptionClient::new(
        MemoryStore::new(),
        keyring_with(vec![symmetric("k1", 7)]),
        config(CryptoMode::AuthenticatedEncryption),
    );

    let mut upload = client.start_multipart("big").unwrap();
    let err = upload.upload_part(&sample(100), false).unwrap_err();
    assert!(matches!(err, SealboxError::PartAlignment { .. }), "{err}");

    // A final part of any length is fine.
    upload.upload_part(&sample(100), true).unwrap();
    let err = upload.upload_part(&sample(16), false).unwrap_err();
    assert!(matches!(err, SealboxError::MultipartFinalization(_)));
}

#[tokio::test]
async fn multipart_completion_requires_final_part() {
    let client = EncryptionClient::new(
        MemoryStore::new(),
        keyring_with(vec![symmetric("k1", 7)]),
        config(CryptoMode::AuthenticatedEncryption),
    );

    let mut upload = client.start_multipart("big").unwrap();
    upload.upload_part(&sample(4096), false).unwrap();
    let err = client.complete_multipart(upload).await.unwrap_err();
    assert!(matches!(err, SealboxError::MultipartFinalization(_)), "{err}");

    // Nothing was stored.
    assert!(!client.store().exists("big").await.unwrap());
}

#[tokio::test]
async fn rewrap_envelope_to_new_key() {
    let store = Arc::new(MemoryStore::new());
    let sidecar_cfg = CryptoConfig {
        mode: CryptoMode::AuthenticatedEncryption,
        envelope_storage: EnvelopeStorageMode::InstructionFile,
        ..Default::default()
    };

    // Written under the old key only.
    let writer = EncryptionClient::new(
        store.clone(),
        keyring_with(vec![symmetric("old", 1)]),
        sidecar_cfg.clone(),
    );
    let plaintext = sample(5000);
    writer.put_object("obj", &plaintext).await.unwrap();
    let original = store.get("obj").await.unwrap();

    // An operator holding both keys re-wraps to the new one.
    let operator = EncryptionClient::new(
        store.clone(),
        keyring_with(vec![symmetric("old", 1), symmetric("new", 2)]),
        sidecar_cfg.clone(),
    );
    operator
        .rewrap_envelope("obj", &desc("new"), ".instruction.v2")
        .await
        .unwrap();

    // The content object is untouched, byte for byte.
    let after = store.get("obj").await.unwrap();
    assert_eq!(after.bytes, original.bytes);
    assert_eq!(after.metadata, original.metadata);

    // A reader holding only the new key decrypts via the new sidecar.
    let new_reader = EncryptionClient::new(
        store.clone(),
        keyring_with(vec![symmetric("new", 2)]),
        CryptoConfig {
            instruction_file_suffix: ".instruction.v2".into(),
            ..sidecar_cfg.clone()
        },
    );
    assert_eq!(new_reader.get_object("obj").await.unwrap(), plaintext);

    // The original sidecar still works for the old key.
    let old_reader = EncryptionClient::new(
        store.clone(),
        keyring_with(vec![symmetric("old", 1)]),
        sidecar_cfg,
    );
    assert_eq!(old_reader.get_object("obj").await.unwrap(), plaintext);
}

#[tokio::test]
async fn rewrap_rejects_no_op_rotations() {
    let store = Arc::new(MemoryStore::new());
    let cfg = CryptoConfig {
        mode: CryptoMode::AuthenticatedEncryption,
        envelope_storage: EnvelopeStorageMode::InstructionFile,
        ..Default::default()
    };

    let writer = EncryptionClient::new(
        store.clone(),
        keyring_with(vec![symmetric("k1", 1)]),
        cfg.clone(),
    );
    writer.put_object("obj", &sample(100)).await.unwrap();

    // Same description as the envelope already uses.
    let err = writer
        .rewrap_envelope("obj", &desc("k1"), ".instruction.v2")
        .await
        .unwrap_err();
    assert!(matches!(err, SealboxError::Security(_)), "{err}");

    // Different description, same KEK bytes: the deterministic wrap would
    // produce the identical wrapped key, which is not a rotation.
    let operator = EncryptionClient::new(
        store.clone(),
        keyring_with(vec![symmetric("k1", 1), symmetric("alias", 1)]),
        cfg,
    );
    let err = operator
        .rewrap_envelope("obj", &desc("alias"), ".instruction.v2")
        .await
        .unwrap_err();
    assert!(matches!(err, SealboxError::Security(_)), "{err}");
}
