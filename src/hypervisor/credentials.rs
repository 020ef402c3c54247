//! Node TLS material at rest.
//!
//! A node's client certificate and key are stored AES-256-GCM encrypted.
//! Each field has its own key, derived as `SHA-256(master || field)`, so
//! both ciphertexts can share the node's single `enc_iv` nonce.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::Node;

use super::errors::{HypervisorError, HypervisorResult};

const NONCE_LEN: usize = 12;
const CERTIFICATE_FIELD: &str = "certificate";
const KEY_FIELD: &str = "key";

/// Decrypted client identity for one node
#[derive(Clone)]
pub struct NodeCredentials {
    pub certificate_pem: String,
    pub key_pem: String,
}

impl NodeCredentials {
    /// Certificate followed by key, the layout TLS identities load from
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = Vec::with_capacity(self.certificate_pem.len() + self.key_pem.len() + 1);
        pem.extend_from_slice(self.certificate_pem.trim_end().as_bytes());
        pem.push(b'\n');
        pem.extend_from_slice(self.key_pem.as_bytes());
        pem
    }
}

/// Encrypted fields ready to be stored on a node record
#[derive(Debug, Clone, Serialize)]
pub struct SealedCredentials {
    pub enc_iv: String,
    pub certificate: String,
    pub key: String,
}

/// Opens and seals node TLS material with the control plane's master key
#[derive(Clone)]
pub struct NodeCipher {
    master: [u8; 32],
}

impl NodeCipher {
    pub fn new(master: [u8; 32]) -> Self {
        Self { master }
    }

    /// Master key from its base64 form
    pub fn from_base64(encoded: &str) -> HypervisorResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HypervisorError::Credentials(format!("invalid master key: {}", e)))?;
        let master: [u8; 32] = bytes.try_into().map_err(|_| {
            HypervisorError::Credentials("master key must be 32 bytes".to_string())
        })?;
        Ok(Self::new(master))
    }

    /// Decrypt a node's certificate and key
    pub fn open(&self, node: &Node) -> HypervisorResult<NodeCredentials> {
        let nonce = decode_nonce(&node.enc_iv)?;
        Ok(NodeCredentials {
            certificate_pem: self.open_field(CERTIFICATE_FIELD, &nonce, &node.certificate)?,
            key_pem: self.open_field(KEY_FIELD, &nonce, &node.key)?,
        })
    }

    /// Encrypt a certificate and key under a fresh nonce
    pub fn seal(&self, certificate_pem: &str, key_pem: &str) -> HypervisorResult<SealedCredentials> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        Ok(SealedCredentials {
            enc_iv: STANDARD.encode(nonce),
            certificate: self.seal_field(CERTIFICATE_FIELD, &nonce, certificate_pem)?,
            key: self.seal_field(KEY_FIELD, &nonce, key_pem)?,
        })
    }

    fn field_cipher(&self, field: &str) -> HypervisorResult<Aes256Gcm> {
        let mut hasher = Sha256::new();
        hasher.update(self.master);
        hasher.update(field.as_bytes());
        let key = hasher.finalize();

        Aes256Gcm::new_from_slice(&key)
            .map_err(|e| HypervisorError::Credentials(format!("failed to create cipher: {}", e)))
    }

    fn open_field(&self, field: &str, nonce: &[u8; NONCE_LEN], encoded: &str) -> HypervisorResult<String> {
        let ciphertext = STANDARD
            .decode(encoded.trim())
            .map_err(|e| HypervisorError::Credentials(format!("{} is not base64: {}", field, e)))?;

        let plaintext = self
            .field_cipher(field)?
            .decrypt(Nonce::from_slice(nonce), ciphertext.as_ref())
            .map_err(|_| HypervisorError::Credentials(format!("{} failed to decrypt", field)))?;

        String::from_utf8(plaintext)
            .map_err(|_| HypervisorError::Credentials(format!("{} is not valid UTF-8", field)))
    }

    fn seal_field(&self, field: &str, nonce: &[u8; NONCE_LEN], plaintext: &str) -> HypervisorResult<String> {
        let ciphertext = self
            .field_cipher(field)?
            .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
            .map_err(|_| HypervisorError::Credentials(format!("{} failed to encrypt", field)))?;
        Ok(STANDARD.encode(ciphertext))
    }
}

fn decode_nonce(encoded: &str) -> HypervisorResult<[u8; NONCE_LEN]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| HypervisorError::Credentials(format!("enc_iv is not base64: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| HypervisorError::Credentials(format!("enc_iv must be {} bytes", NONCE_LEN)))
}
