//! Cryptographic backends.

mod aead;

pub use aead::AesGcmEncryptor;
