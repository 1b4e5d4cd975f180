//! Wrapping and unwrapping of the per-object content key under a KEK.
//!
//! Three algorithms, dispatched by the KEK variant on wrap and by the
//! envelope's recorded label on unwrap:
//!
//! - `AESWrap`: RFC 3394 key wrapping. Self-validating: a corrupt wrapped
//!   key fails the integrity check instead of unwrapping to garbage.
//! - `RSA/ECB/OAEPWithSHA-256AndMGF1Padding`: asymmetric wrap. The hash
//!   and MGF are part of the label and pinned; unwrap dispatches on the
//!   label, never on a build default.
//! - `kms`: both directions delegate to a remote key service which holds
//!   the master key; the material description is the encryption context.

use rsa::Oaep;
use sealbox_core::{SealboxError, SealboxResult};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::material::{ContentKey, EncryptionMaterial, KekMaterial, MaterialDescription};
use crate::CEK_SIZE;

/// Material description entry naming the KMS master key that wrapped the
/// CEK. Written into the envelope so decrypt can reconstruct the context.
pub const KMS_CMK_ID_KEY: &str = "kms_cmk_id";

/// Identifier of a key-wrap algorithm, as recorded in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapAlgorithmId {
    AesKeyWrap,
    RsaOaepSha256,
    Kms,
}

impl WrapAlgorithmId {
    /// Wire label (`x-amz-wrap-alg` value)
    pub fn label(self) -> &'static str {
        match self {
            WrapAlgorithmId::AesKeyWrap => "AESWrap",
            WrapAlgorithmId::RsaOaepSha256 => "RSA/ECB/OAEPWithSHA-256AndMGF1Padding",
            WrapAlgorithmId::Kms => "kms",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "AESWrap" => Some(WrapAlgorithmId::AesKeyWrap),
            "RSA/ECB/OAEPWithSHA-256AndMGF1Padding" => Some(WrapAlgorithmId::RsaOaepSha256),
            "kms" => Some(WrapAlgorithmId::Kms),
            _ => None,
        }
    }
}

/// External key-management service holding a master key.
///
/// `decrypt` hands back the plaintext content key, so implementations and
/// callers treat the buffer as sensitive; it rides in `Zeroizing` and is
/// wiped once the CEK has been copied out.
pub trait KmsKeyService: Send + Sync {
    fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        context: &MaterialDescription,
    ) -> SealboxResult<Vec<u8>>;

    fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &MaterialDescription,
    ) -> SealboxResult<Zeroizing<Vec<u8>>>;
}

/// A wrapped CEK plus the algorithm that produced it and the description to
/// record in the envelope (for KMS the description gains the master key id).
#[derive(Debug, Clone)]
pub struct WrappedKey {
    pub bytes: Vec<u8>,
    pub algorithm: WrapAlgorithmId,
    pub description: MaterialDescription,
}

/// Wrap a content key under the given material's KEK.
pub fn wrap_content_key(
    material: &EncryptionMaterial,
    cek: &ContentKey,
    kms: Option<&dyn KmsKeyService>,
) -> SealboxResult<WrappedKey> {
    match material.kek() {
        KekMaterial::Symmetric(kek) => {
            let wrapper = aes_kw::KekAes256::from(*kek.as_bytes());
            let bytes = wrapper
                .wrap_vec(cek.as_bytes())
                .map_err(|e| SealboxError::KeyUnwrap(format!("AESWrap wrap failed: {e}")))?;
            Ok(WrappedKey {
                bytes,
                algorithm: WrapAlgorithmId::AesKeyWrap,
                description: material.description().clone(),
            })
        }
        KekMaterial::RsaKeyPair { public, .. } => {
            let mut rng = rand::thread_rng();
            let bytes = public
                .encrypt(&mut rng, Oaep::new::<Sha256>(), cek.as_bytes())
                .map_err(|e| SealboxError::KeyUnwrap(format!("RSA-OAEP wrap failed: {e}")))?;
            Ok(WrappedKey {
                bytes,
                algorithm: WrapAlgorithmId::RsaOaepSha256,
                description: material.description().clone(),
            })
        }
        KekMaterial::Kms { key_id } => {
            let service = kms.ok_or_else(|| {
                SealboxError::Config("KMS material registered but no KMS service configured".into())
            })?;
            let mut description = material.description().clone();
            description.insert(KMS_CMK_ID_KEY, key_id.clone());
            tracing::debug!(key_id = %key_id, "wrapping content key via KMS");
            let bytes = service.encrypt(key_id, cek.as_bytes(), &description)?;
            Ok(WrappedKey {
                bytes,
                algorithm: WrapAlgorithmId::Kms,
                description,
            })
        }
    }
}

/// Unwrap a content key with the given material's KEK, dispatching on the
/// algorithm the envelope recorded.
///
/// `context` is the envelope's recorded material description. For KMS it is
/// the encryption context the wrap was performed under (including the
/// `kms_cmk_id` entry the wrap added), so it, not the registered material's
/// own description, is what the key service must see on decrypt.
///
/// The unwrapped key must decode to exactly the content cipher's key length;
/// anything else is a corrupt or wrong key and fails closed.
pub fn unwrap_content_key(
    material: &EncryptionMaterial,
    wrapped: &[u8],
    algorithm: WrapAlgorithmId,
    context: &MaterialDescription,
    kms: Option<&dyn KmsKeyService>,
) -> SealboxResult<ContentKey> {
    let plaintext: Zeroizing<Vec<u8>> = match (algorithm, material.kek()) {
        (WrapAlgorithmId::AesKeyWrap, KekMaterial::Symmetric(kek)) => {
            let wrapper = aes_kw::KekAes256::from(*kek.as_bytes());
            Zeroizing::new(wrapper.unwrap_vec(wrapped).map_err(|_| {
                SealboxError::KeyUnwrap(
                    "AESWrap integrity check failed: wrong KEK or corrupt wrapped key".into(),
                )
            })?)
        }
        (WrapAlgorithmId::RsaOaepSha256, KekMaterial::RsaKeyPair { private, .. }) => {
            let private = private.as_ref().ok_or_else(|| {
                SealboxError::KeyUnwrap("RSA private key not available for unwrap".into())
            })?;
            Zeroizing::new(private.decrypt(Oaep::new::<Sha256>(), wrapped).map_err(|_| {
                SealboxError::KeyUnwrap("RSA-OAEP unwrap failed: wrong key or corrupt data".into())
            })?)
        }
        (WrapAlgorithmId::Kms, KekMaterial::Kms { key_id }) => {
            let service = kms.ok_or_else(|| {
                SealboxError::Config("KMS-wrapped envelope but no KMS service configured".into())
            })?;
            tracing::debug!(key_id = %key_id, "unwrapping content key via KMS");
            service.decrypt(wrapped, context)?
        }
        (algorithm, _) => {
            return Err(SealboxError::KeyUnwrap(format!(
                "envelope wrap algorithm {} does not match the registered KEK kind",
                algorithm.label()
            )));
        }
    };

    if plaintext.len() != CEK_SIZE {
        return Err(SealboxError::KeyUnwrap(format!(
            "unwrapped key is {} bytes, expected {CEK_SIZE}",
            plaintext.len()
        )));
    }
    let mut bytes = [0u8; CEK_SIZE];
    bytes.copy_from_slice(&plaintext);
    Ok(ContentKey::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::SymmetricKek;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn symmetric_material() -> EncryptionMaterial {
        EncryptionMaterial::symmetric(
            SymmetricKek::from_bytes([7u8; 32]),
            MaterialDescription::new().with("kek", "unit-test"),
        )
    }

    #[test]
    fn test_labels_roundtrip() {
        for alg in [
            WrapAlgorithmId::AesKeyWrap,
            WrapAlgorithmId::RsaOaepSha256,
            WrapAlgorithmId::Kms,
        ] {
            assert_eq!(WrapAlgorithmId::from_label(alg.label()), Some(alg));
        }
        assert_eq!(WrapAlgorithmId::from_label("AES/ECB/NoPadding"), None);
    }

    #[test]
    fn test_aes_wrap_roundtrip() {
        let material = symmetric_material();
        let cek = ContentKey::generate();

        let wrapped = wrap_content_key(&material, &cek, None).unwrap();
        assert_eq!(wrapped.algorithm, WrapAlgorithmId::AesKeyWrap);
        // RFC 3394 output: key length + 8-byte integrity block
        assert_eq!(wrapped.bytes.len(), CEK_SIZE + 8);

        let unwrapped = unwrap_content_key(
            &material,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            None,
        )
        .unwrap();
        assert_eq!(unwrapped.as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_aes_wrap_detects_corruption() {
        let material = symmetric_material();
        let cek = ContentKey::generate();

        let mut wrapped = wrap_content_key(&material, &cek, None).unwrap();
        wrapped.bytes[3] ^= 0x40;

        let err = unwrap_content_key(
            &material,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SealboxError::KeyUnwrap(_)));
    }

    #[test]
    fn test_aes_wrap_wrong_kek() {
        let cek = ContentKey::generate();
        let wrapped = wrap_content_key(&symmetric_material(), &cek, None).unwrap();

        let other = EncryptionMaterial::symmetric(
            SymmetricKek::from_bytes([8u8; 32]),
            MaterialDescription::new(),
        );
        assert!(unwrap_content_key(
            &other,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            None
        )
        .is_err());
    }

    #[test]
    fn test_rsa_oaep_roundtrip() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = private.to_public_key();
        let material = EncryptionMaterial::rsa(
            public,
            Some(private),
            MaterialDescription::new().with("kek", "rsa-test"),
        );
        let cek = ContentKey::generate();

        let wrapped = wrap_content_key(&material, &cek, None).unwrap();
        assert_eq!(wrapped.algorithm, WrapAlgorithmId::RsaOaepSha256);

        let unwrapped = unwrap_content_key(
            &material,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            None,
        )
        .unwrap();
        assert_eq!(unwrapped.as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_rsa_unwrap_requires_private_half() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = private.to_public_key();
        let wrap_only = EncryptionMaterial::rsa(public, None, MaterialDescription::new());
        let cek = ContentKey::generate();

        let wrapped = wrap_content_key(&wrap_only, &cek, None).unwrap();
        let err = unwrap_content_key(
            &wrap_only,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SealboxError::KeyUnwrap(_)));
    }

    /// Minimal in-process stand-in for a remote key service: "wraps" by
    /// storing the plaintext under a random handle. The decrypt context must
    /// match the one the plaintext was stored under, as a real KMS enforces.
    struct FakeKms {
        vault: Mutex<HashMap<Vec<u8>, (Vec<u8>, MaterialDescription)>>,
    }

    impl FakeKms {
        fn new() -> Self {
            Self {
                vault: Mutex::new(HashMap::new()),
            }
        }
    }

    impl KmsKeyService for FakeKms {
        fn encrypt(
            &self,
            _key_id: &str,
            plaintext: &[u8],
            context: &MaterialDescription,
        ) -> SealboxResult<Vec<u8>> {
            use rand::RngCore;
            let mut handle = vec![0u8; 16];
            rand::thread_rng().fill_bytes(&mut handle);
            self.vault
                .lock()
                .unwrap()
                .insert(handle.clone(), (plaintext.to_vec(), context.clone()));
            Ok(handle)
        }

        fn decrypt(
            &self,
            ciphertext: &[u8],
            context: &MaterialDescription,
        ) -> SealboxResult<Zeroizing<Vec<u8>>> {
            let vault = self.vault.lock().unwrap();
            let (plaintext, stored_context) = vault
                .get(ciphertext)
                .ok_or_else(|| SealboxError::KeyUnwrap("unknown KMS ciphertext blob".into()))?;
            if stored_context != context {
                return Err(SealboxError::KeyUnwrap(
                    "encryption context mismatch".into(),
                ));
            }
            Ok(Zeroizing::new(plaintext.clone()))
        }
    }

    #[test]
    fn test_kms_roundtrip_records_key_id() {
        let kms = FakeKms::new();
        let material = EncryptionMaterial::kms("master-key-1", MaterialDescription::new());
        let cek = ContentKey::generate();

        let wrapped = wrap_content_key(&material, &cek, Some(&kms)).unwrap();
        assert_eq!(wrapped.algorithm, WrapAlgorithmId::Kms);
        assert_eq!(wrapped.description.get(KMS_CMK_ID_KEY), Some("master-key-1"));

        let unwrapped = unwrap_content_key(
            &material,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            Some(&kms),
        )
        .unwrap();
        assert_eq!(unwrapped.as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_kms_unwrap_uses_recorded_description_as_context() {
        let kms = FakeKms::new();
        let material = EncryptionMaterial::kms("master-key-1", MaterialDescription::new());
        let cek = ContentKey::generate();
        let wrapped = wrap_content_key(&material, &cek, Some(&kms)).unwrap();

        // The registered material's own description lacks the kms_cmk_id
        // entry the wrap added, so it is the wrong decrypt context.
        let err = unwrap_content_key(
            &material,
            &wrapped.bytes,
            wrapped.algorithm,
            material.description(),
            Some(&kms),
        )
        .unwrap_err();
        assert!(matches!(err, SealboxError::KeyUnwrap(_)));

        let unwrapped = unwrap_content_key(
            &material,
            &wrapped.bytes,
            wrapped.algorithm,
            &wrapped.description,
            Some(&kms),
        )
        .unwrap();
        assert_eq!(unwrapped.as_bytes(), cek.as_bytes());
    }

    #[test]
    fn test_kms_material_without_service() {
        let material = EncryptionMaterial::kms("master-key-1", MaterialDescription::new());
        let cek = ContentKey::generate();
        assert!(matches!(
            wrap_content_key(&material, &cek, None).unwrap_err(),
            SealboxError::Config(_)
        ));
    }

    #[test]
    fn test_algorithm_kek_mismatch() {
        let material = symmetric_material();
        let err = unwrap_content_key(
            &material,
            &[0u8; 40],
            WrapAlgorithmId::RsaOaepSha256,
            &MaterialDescription::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SealboxError::KeyUnwrap(_)));
    }
}
