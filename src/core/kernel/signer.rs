use crate::core::errors::DeribitError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

/// Signer trait for signature-based authentication payloads
pub trait Signer: Send + Sync {
    /// Sign `timestamp\nnonce\ndata` and return the hex-encoded signature
    fn sign_auth(&self, timestamp: i64, nonce: &str, data: &str) -> Result<String, DeribitError>;
}

/// HMAC-SHA256 signer used by the `client_signature` grant
pub struct HmacSigner {
    secret_key: Secret<String>,
}

impl HmacSigner {
    pub fn new(secret_key: Secret<String>) -> Self {
        Self { secret_key }
    }

    fn sign(&self, payload: &str) -> Result<String, DeribitError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| DeribitError::auth(None, format!("Invalid secret key: {}", e)))?;

        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Signer for HmacSigner {
    fn sign_auth(&self, timestamp: i64, nonce: &str, data: &str) -> Result<String, DeribitError> {
        self.sign(&format!("{}\n{}\n{}", timestamp, nonce, data))
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> HmacSigner {
        HmacSigner::new(Secret::new("test_secret".to_string()))
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let signature = signer().sign_auth(1_700_000_000_000, "abcd", "").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = signer().sign_auth(1, "nonce", "data").unwrap();
        let b = signer().sign_auth(1, "nonce", "data").unwrap();
        let c = signer().sign_auth(1, "other", "data").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
