use std::path::Path;

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::constants::SESSION_KEY_SIZE;
use crate::crypto::SessionKey;
use crate::error::KeyError;

pub const PRIVATE_KEY_FILE: &str = "private.pem";
pub const PUBLIC_KEY_FILE: &str = "public.pem";

/// The server's long-lived RSA identity.
///
/// Clients pin the SHA-256 fingerprint of the public key on first contact,
/// so this keypair must stay stable for the lifetime of the deployment.
pub struct ServerKeys {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl ServerKeys {
    /// Generate a fresh keypair. Slow for real key sizes; done once per
    /// deployment.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Load the keypair from PKCS#8 PEM files in `dir`.
    pub fn load(dir: &Path) -> Result<Self, KeyError> {
        let pem = std::fs::read_to_string(dir.join(PRIVATE_KEY_FILE))?;
        let private = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| KeyError::KeyFile(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Persist both halves as PEM files in `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), KeyError> {
        let private_pem = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyError::KeyFile(e.to_string()))?;
        std::fs::write(dir.join(PRIVATE_KEY_FILE), private_pem.as_bytes())?;

        let public_pem = self
            .public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::KeyFile(e.to_string()))?;
        std::fs::write(dir.join(PUBLIC_KEY_FILE), public_pem.as_bytes())?;
        Ok(())
    }

    /// Load the keypair from `dir`, generating and persisting one on first
    /// start. The boolean is true when a new keypair was generated.
    pub fn load_or_generate(dir: &Path, bits: usize) -> Result<(Self, bool), KeyError> {
        if dir.join(PRIVATE_KEY_FILE).exists() {
            Ok((Self::load(dir)?, false))
        } else {
            let keys = Self::generate(bits)?;
            keys.save(dir)?;
            Ok((keys, true))
        }
    }

    /// Modulus size in bits.
    pub fn bit_size(&self) -> usize {
        self.private.size() * 8
    }

    /// SPKI DER encoding of the public key, sent as the first handshake frame.
    pub fn public_key_der(&self) -> Result<Vec<u8>, KeyError> {
        let doc = self
            .public
            .to_public_key_der()
            .map_err(|e| KeyError::KeyFile(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Decrypt the session key the client wrapped to our public key.
    ///
    /// Anything that does not decrypt to exactly [`SESSION_KEY_SIZE`] bytes
    /// is rejected.
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> Result<SessionKey, KeyError> {
        let plain = self
            .private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| KeyError::UnwrapFailed)?;
        if plain.len() != SESSION_KEY_SIZE {
            return Err(KeyError::UnwrapFailed);
        }
        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&plain);
        Ok(key)
    }
}

/// Lowercase hex SHA-256 over the DER-encoded public key.
///
/// This is the value clients pin and compare on every connect.
pub fn fingerprint(public_key_der: &[u8]) -> String {
    hex::encode(Sha256::digest(public_key_der))
}

/// Encrypt a fresh session key to the server's public key (client side).
pub fn wrap_session_key(public_key_der: &[u8], key: &SessionKey) -> Result<Vec<u8>, KeyError> {
    let public =
        RsaPublicKey::from_public_key_der(public_key_der).map_err(|_| KeyError::InvalidPublicKey)?;
    let wrapped = public.encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), key)?;
    Ok(wrapped)
}
