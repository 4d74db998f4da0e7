//! The universal tagged envelope carried in URL state, cookies and headers.
//!
//! Pipeline order is load-bearing for tamper detection:
//! `json → compress (zlib) → encrypt (AEAD, optional) → base64url`.
//! Decoders reverse it; an AEAD MAC failure surfaces as an `authentication`
//! problem, never `validation`.

use std::io::{Read, Write};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use grantor_types::error::Problem;
use grantor_types::session::{LocalSession, Session};
use grantor_types::task::WorkflowTask;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Encryptor seam
// ---------------------------------------------------------------------------

/// Symmetric sealing service. The production implementation is AEAD with a
/// server-held key; tests may use [`IdentityEncryptor`].
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Problem>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Problem>;
}

/// Pass-through encryptor for tests and round-trip property checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityEncryptor;

impl Encryptor for IdentityEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Problem> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Problem> {
        Ok(ciphertext.to_vec())
    }
}

// ---------------------------------------------------------------------------
// EncodingWrapper
// ---------------------------------------------------------------------------

/// Payload discriminator inside an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodedType {
    WorkflowTask,
    Auth,
    Session,
    SessionLocal,
}

impl std::fmt::Display for EncodedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EncodedType::WorkflowTask => "workflow_task",
            EncodedType::Auth => "auth",
            EncodedType::Session => "session",
            EncodedType::SessionLocal => "session_local",
        };
        f.write_str(s)
    }
}

/// The `{type, data}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingWrapper {
    #[serde(rename = "type")]
    pub wrapper_type: EncodedType,
    pub data: serde_json::Value,
}

impl EncodingWrapper {
    pub fn new(wrapper_type: EncodedType, data: serde_json::Value) -> Self {
        Self { wrapper_type, data }
    }

    /// `json → zlib → base64url`.
    pub fn encode(&self) -> Result<String, Problem> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Problem::runtime(format!("envelope serialization failed: {e}")))?;
        let compressed = compress(&json)?;
        Ok(URL_SAFE_NO_PAD.encode(compressed))
    }

    /// `json → zlib → AEAD → base64url`.
    pub fn encode_and_encrypt(&self, encryptor: &dyn Encryptor) -> Result<String, Problem> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Problem::runtime(format!("envelope serialization failed: {e}")))?;
        let compressed = compress(&json)?;
        let sealed = encryptor.encrypt(&compressed)?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Reverse of [`encode`](Self::encode).
    pub fn decode(input: &str) -> Result<Self, Problem> {
        let compressed = URL_SAFE_NO_PAD
            .decode(input.trim())
            .map_err(|_| Problem::validation("envelope is not valid base64url"))?;
        let json = decompress(&compressed)?;
        serde_json::from_slice(&json)
            .map_err(|_| Problem::validation("envelope payload is not a valid wrapper"))
    }

    /// Reverse of [`encode_and_encrypt`](Self::encode_and_encrypt).
    pub fn decode_and_decrypt(
        input: &str,
        encryptor: &dyn Encryptor,
    ) -> Result<Self, Problem> {
        let sealed = URL_SAFE_NO_PAD
            .decode(input.trim())
            .map_err(|_| Problem::validation("envelope is not valid base64url"))?;
        let compressed = encryptor.decrypt(&sealed)?;
        let json = decompress(&compressed)?;
        serde_json::from_slice(&json)
            .map_err(|_| Problem::validation("envelope payload is not a valid wrapper"))
    }

    /// Assert the discriminator and deserialize the payload.
    pub fn into_payload<T: serde::de::DeserializeOwned>(
        self,
        expected: EncodedType,
    ) -> Result<T, Problem> {
        if self.wrapper_type != expected {
            return Err(Problem::validation(format!(
                "unexpected envelope type: got {}, want {}",
                self.wrapper_type, expected
            )));
        }
        serde_json::from_value(self.data)
            .map_err(|e| Problem::validation(format!("envelope payload mismatch: {e}")))
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, Problem> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| Problem::runtime(format!("envelope compression failed: {e}")))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, Problem> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map(|_| out)
        .map_err(|_| Problem::validation("envelope payload is not valid compressed data"))
}

// ---------------------------------------------------------------------------
// Typed seal/unseal helpers
// ---------------------------------------------------------------------------

/// Seal a workflow task for URL state or callback links.
pub fn seal_task(task: &WorkflowTask, encryptor: &dyn Encryptor) -> Result<String, Problem> {
    EncodingWrapper::new(
        EncodedType::WorkflowTask,
        serde_json::to_value(task)
            .map_err(|e| Problem::runtime(format!("task serialization failed: {e}")))?,
    )
    .encode_and_encrypt(encryptor)
}

/// Unseal a workflow task from URL state.
pub fn unseal_task(state: &str, encryptor: &dyn Encryptor) -> Result<WorkflowTask, Problem> {
    EncodingWrapper::decode_and_decrypt(state, encryptor)?
        .into_payload(EncodedType::WorkflowTask)
}

/// Seal a remote session into the opaque string a [`LocalSession`] carries.
pub fn seal_session(session: &Session, encryptor: &dyn Encryptor) -> Result<String, Problem> {
    EncodingWrapper::new(
        EncodedType::Session,
        serde_json::to_value(session)
            .map_err(|e| Problem::runtime(format!("session serialization failed: {e}")))?,
    )
    .encode_and_encrypt(encryptor)
}

/// Unseal the remote session out of a [`LocalSession`].
pub fn unseal_session(
    local: &LocalSession,
    encryptor: &dyn Encryptor,
) -> Result<Session, Problem> {
    EncodingWrapper::decode_and_decrypt(&local.session, encryptor)?
        .into_payload(EncodedType::Session)
}

/// Encode a local session for transport (cookie, bearer, URL). Local
/// sessions are not themselves encrypted; the secret inside already is.
pub fn encode_local_session(local: &LocalSession) -> Result<String, Problem> {
    EncodingWrapper::new(
        EncodedType::SessionLocal,
        serde_json::to_value(local)
            .map_err(|e| Problem::runtime(format!("session serialization failed: {e}")))?,
    )
    .encode()
}

/// Decode a transported local session.
pub fn decode_local_session(input: &str) -> Result<LocalSession, Problem> {
    EncodingWrapper::decode(input)?.into_payload(EncodedType::SessionLocal)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wrappers() -> Vec<EncodingWrapper> {
        vec![
            EncodingWrapper::new(
                EncodedType::WorkflowTask,
                json!({"id": "task-123", "name": "test task"}),
            ),
            EncodingWrapper::new(
                EncodedType::Auth,
                json!({"user": "testuser", "token": "abc123"}),
            ),
            EncodingWrapper::new(
                EncodedType::Session,
                json!({"session_id": "sess-456", "expires": "2023-12-31"}),
            ),
            EncodingWrapper::new(
                EncodedType::SessionLocal,
                json!({"nested": {"deep": [1, 2, 3, "x"]}}),
            ),
        ]
    }

    #[test]
    fn encode_decode_roundtrip_for_every_type() {
        for wrapper in wrappers() {
            let encoded = wrapper.encode().unwrap();
            assert!(!encoded.is_empty());
            let decoded = EncodingWrapper::decode(&encoded).unwrap();
            assert_eq!(decoded, wrapper);
        }
    }

    #[test]
    fn encrypt_roundtrip_with_identity_encryptor() {
        let encryptor = IdentityEncryptor;
        for wrapper in wrappers() {
            let sealed = wrapper.encode_and_encrypt(&encryptor).unwrap();
            let opened = EncodingWrapper::decode_and_decrypt(&sealed, &encryptor).unwrap();
            assert_eq!(opened, wrapper);
        }
    }

    #[test]
    fn encoded_output_is_urlsafe() {
        let wrapper = EncodingWrapper::new(
            EncodedType::WorkflowTask,
            json!({"blob": "??>>//++==~~"}),
        );
        let encoded = wrapper.encode().unwrap();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(EncodingWrapper::decode("invalid-base64!@#").is_err());
        assert!(EncodingWrapper::decode("").is_err());
        // Valid base64 but not compressed data.
        let plain = URL_SAFE_NO_PAD.encode(b"Hello World");
        assert!(EncodingWrapper::decode(&plain).is_err());
    }

    #[test]
    fn type_tag_mismatch_is_rejected() {
        let wrapper = EncodingWrapper::new(EncodedType::Auth, json!({"x": 1}));
        let encoded = wrapper.encode().unwrap();
        let decoded = EncodingWrapper::decode(&encoded).unwrap();
        let err = decoded
            .into_payload::<serde_json::Value>(EncodedType::WorkflowTask)
            .unwrap_err();
        assert!(err.detail.contains("unexpected envelope type"));
    }

    /// An encryptor that authenticates with a trailing tag, enough to prove
    /// tamper detection maps to `authentication`.
    struct TaggedEncryptor;

    impl Encryptor for TaggedEncryptor {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Problem> {
            let mut out = plaintext.to_vec();
            let sum: u8 = plaintext.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            out.push(sum);
            Ok(out)
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Problem> {
            let (body, tag) = ciphertext
                .split_last_chunk::<1>()
                .ok_or_else(|| Problem::authentication("envelope too short"))?;
            let sum: u8 = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            if sum != tag[0] {
                return Err(Problem::authentication("envelope failed authentication"));
            }
            Ok(body.to_vec())
        }
    }

    #[test]
    fn tampered_byte_fails_with_authentication_not_validation() {
        let encryptor = TaggedEncryptor;
        let wrapper = EncodingWrapper::new(
            EncodedType::Session,
            json!({"token": "secret-token-value"}),
        );
        let sealed = wrapper.encode_and_encrypt(&encryptor).unwrap();

        // Flip one byte of the sealed payload.
        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let mid = raw.len() / 2;
        raw[mid] ^= 0x41;
        let tampered = URL_SAFE_NO_PAD.encode(raw);

        let err = EncodingWrapper::decode_and_decrypt(&tampered, &encryptor).unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Authentication);
    }

    #[test]
    fn local_session_transport_roundtrip() {
        let local = LocalSession {
            version: 1,
            expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            session: "sealed-inner".into(),
        };
        let encoded = encode_local_session(&local).unwrap();
        let decoded = decode_local_session(&encoded).unwrap();
        assert_eq!(decoded.session, "sealed-inner");
        assert_eq!(decoded.version, 1);
    }
}
