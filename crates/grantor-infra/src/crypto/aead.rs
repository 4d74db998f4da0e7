//! AES-256-GCM implementation of the envelope `Encryptor` seam.
//!
//! Each encryption generates a random 96-bit nonce, prepended to the
//! ciphertext (`nonce || ciphertext`), so sealing the same payload twice
//! produces different output. The master key can come from raw bytes, an
//! Argon2id-derived passphrase, or a key file on disk.
//!
//! SECURITY: errors never contain plaintext or key material, and a MAC
//! failure surfaces as an `authentication` problem, never `validation`,
//! so tampered envelopes are distinguishable from malformed ones.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use grantor_types::error::Problem;
use secrecy::{ExposeSecret, SecretString};

use grantor_core::encoding::Encryptor;

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

pub struct AesGcmEncryptor {
    cipher: Aes256Gcm,
}

impl AesGcmEncryptor {
    /// Build from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Derive the key from a passphrase with Argon2id (OWASP parameters:
    /// 19 MiB memory, 2 iterations, parallelism 1). The salt is
    /// deterministic so the same passphrase always yields the same key;
    /// the passphrase itself carries the entropy.
    pub fn from_passphrase(passphrase: &SecretString) -> Result<Self, Problem> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(19_456, 2, 1, Some(32))
            .map_err(|_| Problem::configuration("key derivation parameters rejected"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = b"grantor-envelope-v1";
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
            .map_err(|_| Problem::configuration("key derivation failed"))?;

        Ok(Self::new(&key))
    }

    /// Load the key from a file of 64 hex characters, generating and
    /// persisting a fresh key (mode 0600 on unix) when absent.
    pub fn from_key_file(path: &Path) -> Result<Self, Problem> {
        if path.exists() {
            let hex_key = std::fs::read_to_string(path)
                .map_err(|e| Problem::configuration(format!("cannot read key file: {e}")))?;
            let bytes = hex_decode(hex_key.trim())
                .map_err(|_| Problem::configuration("corrupted key file"))?;
            if bytes.len() != 32 {
                return Err(Problem::configuration("key file must hold a 32-byte key"));
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return Ok(Self::new(&key));
        }

        let key: [u8; 32] = random_key();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Problem::configuration(format!("cannot create key dir: {e}")))?;
        }
        std::fs::write(path, hex_encode(&key))
            .map_err(|e| Problem::configuration(format!("cannot write key file: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!(path = %path.display(), "generated new envelope key");
        Ok(Self::new(&key))
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Problem> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Problem::runtime("envelope encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, Problem> {
        if sealed.len() < NONCE_SIZE {
            return Err(Problem::authentication("envelope too short"));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Problem::authentication("envelope failed authentication"))
    }
}

fn random_key() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| format!("invalid hex at position {i}: {e}"))
        })
        .collect()
}
