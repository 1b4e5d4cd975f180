//! The per-object envelope: IV, wrapped CEK, cipher and wrap-algorithm ids,
//! material description, plaintext length.
//!
//! Two serialization targets share one field set: a flat string-keyed map
//! embedded in object metadata, and a JSON document stored as a sidecar
//! instruction object. Binary fields are base64.
//!
//! Two shapes exist on the wire. The legacy shape (pre-authenticated-mode
//! clients) carries `x-amz-key` and no cipher/wrap-algorithm fields; the v2
//! shape carries `x-amz-key-v2` plus explicit algorithm ids. Which shape is
//! written depends on the client's crypto mode; which shapes are accepted on
//! read does too.

use std::collections::{BTreeMap, HashMap};

use sealbox_core::{CryptoMode, SealboxError, SealboxResult};

use crate::keywrap::WrapAlgorithmId;
use crate::material::MaterialDescription;
use crate::scheme::{CipherScheme, ContentCipherId};

/// Envelope metadata keys (lowercase; object stores treat metadata keys
/// case-insensitively, so parsing folds incoming keys to lowercase first).
pub const CRYPTO_KEY: &str = "x-amz-key";
pub const CRYPTO_KEY_V2: &str = "x-amz-key-v2";
pub const CRYPTO_IV: &str = "x-amz-iv";
pub const MATERIALS_DESCRIPTION: &str = "x-amz-matdesc";
pub const CRYPTO_CEK_ALGORITHM: &str = "x-amz-cek-alg";
pub const CRYPTO_KEYWRAP_ALGORITHM: &str = "x-amz-wrap-alg";
pub const CRYPTO_TAG_LENGTH: &str = "x-amz-tag-len";
pub const UNENCRYPTED_CONTENT_LENGTH: &str = "x-amz-unencrypted-content-length";

/// Marker metadata field set on sidecar instruction objects.
pub const CRYPTO_INSTRUCTION_FILE: &str = "x-amz-crypto-instr-file";

/// Content crypto material for one stored object.
///
/// Created once per object at encrypt time and never mutated afterwards;
/// key rotation builds a new envelope rather than editing this one.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub iv: Vec<u8>,
    pub wrapped_cek: Vec<u8>,
    pub cipher: ContentCipherId,
    pub wrap_algorithm: WrapAlgorithmId,
    pub material_description: MaterialDescription,
    /// None when the length was not knowable before encryption started.
    pub plaintext_len: Option<u64>,
    /// True when parsed from the legacy (no cipher id) wire shape.
    pub legacy: bool,
}

impl Envelope {
    pub fn scheme(&self) -> &'static CipherScheme {
        self.cipher.scheme()
    }

    /// Whether this client mode writes the legacy wire shape.
    /// KMS-wrapped keys always need the v2 shape: the wrap label is load
    /// bearing for decrypt.
    fn writes_legacy_shape(&self, mode: CryptoMode) -> bool {
        mode == CryptoMode::EncryptionOnly && self.wrap_algorithm != WrapAlgorithmId::Kms
    }

    fn to_fields(&self, mode: CryptoMode) -> SealboxResult<BTreeMap<String, String>> {
        let mut fields = BTreeMap::new();
        fields.insert(CRYPTO_IV.to_string(), base64_encode(&self.iv));
        fields.insert(
            MATERIALS_DESCRIPTION.to_string(),
            self.material_description.to_json()?,
        );
        if let Some(len) = self.plaintext_len {
            fields.insert(UNENCRYPTED_CONTENT_LENGTH.to_string(), len.to_string());
        }
        if self.writes_legacy_shape(mode) {
            fields.insert(CRYPTO_KEY.to_string(), base64_encode(&self.wrapped_cek));
        } else {
            fields.insert(CRYPTO_KEY_V2.to_string(), base64_encode(&self.wrapped_cek));
            let scheme = self.scheme();
            fields.insert(
                CRYPTO_CEK_ALGORITHM.to_string(),
                scheme.cek_algorithm.to_string(),
            );
            if scheme.tag_len_bits > 0 {
                fields.insert(CRYPTO_TAG_LENGTH.to_string(), scheme.tag_len_bits.to_string());
            }
            fields.insert(
                CRYPTO_KEYWRAP_ALGORITHM.to_string(),
                self.wrap_algorithm.label().to_string(),
            );
        }
        Ok(fields)
    }

    /// Serialize into object metadata entries.
    pub fn to_metadata(&self, mode: CryptoMode) -> SealboxResult<HashMap<String, String>> {
        Ok(self.to_fields(mode)?.into_iter().collect())
    }

    /// Serialize into a JSON instruction document.
    pub fn to_json(&self, mode: CryptoMode) -> SealboxResult<String> {
        let fields = self.to_fields(mode)?;
        serde_json::to_string(&fields)
            .map_err(|e| SealboxError::Envelope(format!("instruction JSON: {e}")))
    }

    /// Parse from object metadata. Keys are matched case-insensitively.
    pub fn from_metadata(
        metadata: &HashMap<String, String>,
        mode: CryptoMode,
    ) -> SealboxResult<Self> {
        let fields: BTreeMap<String, String> = metadata
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        Self::from_fields(&fields, mode)
    }

    /// Parse from a JSON instruction document.
    pub fn from_json(json: &str, mode: CryptoMode) -> SealboxResult<Self> {
        let raw: BTreeMap<String, String> = serde_json::from_str(json)
            .map_err(|e| SealboxError::Envelope(format!("instruction JSON: {e}")))?;
        let fields: BTreeMap<String, String> = raw
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self::from_fields(&fields, mode)
    }

    /// True if any envelope field is present in the metadata map at all.
    pub fn present_in_metadata(metadata: &HashMap<String, String>) -> bool {
        metadata.keys().any(|k| {
            let k = k.to_ascii_lowercase();
            k == CRYPTO_KEY || k == CRYPTO_KEY_V2
        })
    }

    fn from_fields(fields: &BTreeMap<String, String>, mode: CryptoMode) -> SealboxResult<Self> {
        let (wrapped_b64, legacy) = match (fields.get(CRYPTO_KEY_V2), fields.get(CRYPTO_KEY)) {
            (Some(v2), _) => (v2, false),
            (None, Some(v1)) => (v1, true),
            (None, None) => {
                return Err(SealboxError::Envelope(
                    "content encrypting key not found".into(),
                ));
            }
        };
        let wrapped_cek = base64_decode(wrapped_b64)?;
        let iv = base64_decode(fields.get(CRYPTO_IV).ok_or_else(|| {
            SealboxError::Envelope("initialization vector not found".into())
        })?)?;

        let material_description = MaterialDescription::from_json(
            fields.get(MATERIALS_DESCRIPTION).ok_or_else(|| {
                SealboxError::Envelope("material description not found".into())
            })?,
        )?;

        let cek_label = fields.get(CRYPTO_CEK_ALGORITHM).map(String::as_str);
        let cipher = ContentCipherId::from_cek_algorithm(cek_label)?;
        let scheme = cipher.scheme();

        let wrap_label = fields.get(CRYPTO_KEYWRAP_ALGORITHM).map(String::as_str);
        let wrap_algorithm = match wrap_label {
            Some(label) => WrapAlgorithmId::from_label(label).ok_or_else(|| {
                SealboxError::KeyUnwrap(format!("unknown key-wrap algorithm: {label}"))
            })?,
            // Envelopes written before wrap ids existed used AES key wrap.
            None => WrapAlgorithmId::AesKeyWrap,
        };

        if mode == CryptoMode::StrictAuthenticatedEncryption {
            if legacy || cipher != ContentCipherId::AesGcm {
                return Err(SealboxError::Security(format!(
                    "strict authenticated mode refuses a {} envelope",
                    cek_label.unwrap_or("legacy")
                )));
            }
            if wrap_label.is_none() {
                return Err(SealboxError::Security(
                    "strict authenticated mode requires an explicit key-wrap algorithm".into(),
                ));
            }
        }

        if iv.len() != scheme.iv_len {
            return Err(SealboxError::Envelope(format!(
                "IV of {} bytes does not match {} (expected {})",
                iv.len(),
                scheme.cek_algorithm,
                scheme.iv_len
            )));
        }

        if scheme.tag_len_bits > 0 {
            let declared: usize = fields
                .get(CRYPTO_TAG_LENGTH)
                .ok_or_else(|| SealboxError::Envelope("tag length not found".into()))?
                .parse()
                .map_err(|e| SealboxError::Envelope(format!("tag length: {e}")))?;
            if declared != scheme.tag_len_bits {
                return Err(SealboxError::Envelope(format!(
                    "unsupported tag length: {declared}, expected {}",
                    scheme.tag_len_bits
                )));
            }
        }

        let plaintext_len = fields
            .get(UNENCRYPTED_CONTENT_LENGTH)
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|e| SealboxError::Envelope(format!("content length: {e}")))
            })
            .transpose()?;

        Ok(Self {
            iv,
            wrapped_cek,
            cipher,
            wrap_algorithm,
            material_description,
            plaintext_len,
            legacy,
        })
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> SealboxResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| SealboxError::Envelope(format!("base64 decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gcm_envelope() -> Envelope {
        Envelope {
            iv: vec![9u8; 12],
            wrapped_cek: vec![1u8; 40],
            cipher: ContentCipherId::AesGcm,
            wrap_algorithm: WrapAlgorithmId::AesKeyWrap,
            material_description: MaterialDescription::new().with("gen", "1"),
            plaintext_len: Some(100),
            legacy: false,
        }
    }

    fn cbc_envelope() -> Envelope {
        Envelope {
            iv: vec![3u8; 16],
            wrapped_cek: vec![2u8; 40],
            cipher: ContentCipherId::AesCbc,
            wrap_algorithm: WrapAlgorithmId::AesKeyWrap,
            material_description: MaterialDescription::new(),
            plaintext_len: Some(100),
            legacy: false,
        }
    }

    #[test]
    fn test_v2_metadata_roundtrip() {
        let env = gcm_envelope();
        let meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();

        assert!(meta.contains_key(CRYPTO_KEY_V2));
        assert!(!meta.contains_key(CRYPTO_KEY));
        assert_eq!(meta.get(CRYPTO_CEK_ALGORITHM).unwrap(), "AES/GCM/NoPadding");
        assert_eq!(meta.get(CRYPTO_TAG_LENGTH).unwrap(), "128");
        assert_eq!(meta.get(CRYPTO_KEYWRAP_ALGORITHM).unwrap(), "AESWrap");

        let parsed = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap();
        assert_eq!(parsed.iv, env.iv);
        assert_eq!(parsed.wrapped_cek, env.wrapped_cek);
        assert_eq!(parsed.cipher, ContentCipherId::AesGcm);
        assert_eq!(parsed.plaintext_len, Some(100));
        assert!(!parsed.legacy);
    }

    #[test]
    fn test_legacy_shape_written_in_encryption_only_mode() {
        let env = cbc_envelope();
        let meta = env.to_metadata(CryptoMode::EncryptionOnly).unwrap();

        assert!(meta.contains_key(CRYPTO_KEY));
        assert!(!meta.contains_key(CRYPTO_KEY_V2));
        assert!(!meta.contains_key(CRYPTO_CEK_ALGORITHM));
        assert!(!meta.contains_key(CRYPTO_KEYWRAP_ALGORITHM));
        assert!(!meta.contains_key(CRYPTO_TAG_LENGTH));
    }

    #[test]
    fn test_legacy_parse_defaults_to_cbc_aeswrap() {
        let env = cbc_envelope();
        let meta = env.to_metadata(CryptoMode::EncryptionOnly).unwrap();

        // Readable by a (non-strict) authenticated-mode client.
        let parsed = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap();
        assert!(parsed.legacy);
        assert_eq!(parsed.cipher, ContentCipherId::AesCbc);
        assert_eq!(parsed.wrap_algorithm, WrapAlgorithmId::AesKeyWrap);
    }

    #[test]
    fn test_strict_mode_rejects_legacy() {
        let env = cbc_envelope();
        let meta = env.to_metadata(CryptoMode::EncryptionOnly).unwrap();

        let err =
            Envelope::from_metadata(&meta, CryptoMode::StrictAuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::Security(_)));
    }

    #[test]
    fn test_strict_mode_rejects_v2_cbc() {
        let env = cbc_envelope();
        let meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();

        let err =
            Envelope::from_metadata(&meta, CryptoMode::StrictAuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::Security(_)));
    }

    #[test]
    fn test_strict_mode_accepts_v2_gcm() {
        let env = gcm_envelope();
        let meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
        assert!(Envelope::from_metadata(&meta, CryptoMode::StrictAuthenticatedEncryption).is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let env = gcm_envelope();
        let json = env.to_json(CryptoMode::AuthenticatedEncryption).unwrap();
        let parsed = Envelope::from_json(&json, CryptoMode::AuthenticatedEncryption).unwrap();
        assert_eq!(parsed.wrapped_cek, env.wrapped_cek);
        assert_eq!(parsed.material_description, env.material_description);
    }

    #[test]
    fn test_case_insensitive_metadata_keys() {
        let env = gcm_envelope();
        let meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
        let shouty: HashMap<String, String> = meta
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();

        let parsed = Envelope::from_metadata(&shouty, CryptoMode::AuthenticatedEncryption).unwrap();
        assert_eq!(parsed.cipher, ContentCipherId::AesGcm);
    }

    #[test]
    fn test_unknown_cipher_label_is_fatal() {
        let env = gcm_envelope();
        let mut meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
        meta.insert(CRYPTO_CEK_ALGORITHM.into(), "AES/XTS/NoPadding".into());

        let err = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::UnsupportedCipher(_)));
    }

    #[test]
    fn test_tag_length_mismatch() {
        let env = gcm_envelope();
        let mut meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
        meta.insert(CRYPTO_TAG_LENGTH.into(), "96".into());

        let err = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::Envelope(_)));
    }

    #[test]
    fn test_iv_length_must_match_scheme() {
        let mut env = gcm_envelope();
        env.iv = vec![9u8; 16]; // CBC-sized IV on a GCM envelope
        let meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();

        let err = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::Envelope(_)));
    }

    #[test]
    fn test_missing_key_field() {
        let meta = HashMap::from([(CRYPTO_IV.to_string(), "AAAA".to_string())]);
        let err = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::Envelope(_)));
    }

    #[test]
    fn test_empty_matdesc_distinct_from_absent() {
        let env = cbc_envelope(); // empty description
        let mut meta = env.to_metadata(CryptoMode::AuthenticatedEncryption).unwrap();
        assert_eq!(meta.get(MATERIALS_DESCRIPTION).unwrap(), "{}");

        meta.remove(MATERIALS_DESCRIPTION);
        let err = Envelope::from_metadata(&meta, CryptoMode::AuthenticatedEncryption).unwrap_err();
        assert!(matches!(err, SealboxError::Envelope(_)));
    }
}
