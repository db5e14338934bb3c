#![forbid(unsafe_code)]

//! Security tokens: id-addressed sources of key material.
//!
//! Concrete token formats (X.509, UsernameToken, SAML) live outside the
//! pipeline; these are the minimal in-memory kinds the pipeline and its
//! tests need.

use std::fmt;

use stromsborg_core::Result;
use stromsborg_crypto::sign::is_hmac;
use stromsborg_crypto::SigningKey;

/// What a requested key is going to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    Encryption,
    Decryption,
    Signature,
    Verification,
}

pub trait SecurityToken: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Symmetric key material for `algorithm_uri`, if this token has any.
    fn secret_key(&self, algorithm_uri: &str, usage: KeyUsage) -> Result<Option<Vec<u8>>>;

    /// Key for a signature method (HMAC secret or RSA key).
    fn signing_key(&self, _algorithm_uri: &str, _usage: KeyUsage) -> Result<Option<SigningKey>> {
        Ok(None)
    }

    /// Id of the token this one was transported in.
    fn wrapping_token(&self) -> Option<&str> {
        None
    }

    /// Id of another token that holds the key material for this one.
    fn key_reference(&self) -> Option<&str> {
        None
    }
}

/// A shared secret.
pub struct SymmetricKeyToken {
    id: String,
    key: Vec<u8>,
    wrapping: Option<String>,
}

impl SymmetricKeyToken {
    pub fn new(id: &str, key: Vec<u8>) -> Self {
        Self {
            id: id.to_owned(),
            key,
            wrapping: None,
        }
    }

    pub fn wrapped_by(mut self, wrapping_id: &str) -> Self {
        self.wrapping = Some(wrapping_id.to_owned());
        self
    }
}

impl fmt::Debug for SymmetricKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKeyToken")
            .field("id", &self.id)
            .field("key_len", &self.key.len())
            .field("wrapping", &self.wrapping)
            .finish()
    }
}

impl SecurityToken for SymmetricKeyToken {
    fn id(&self) -> &str {
        &self.id
    }

    fn secret_key(&self, _algorithm_uri: &str, _usage: KeyUsage) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.key.clone()))
    }

    fn signing_key(&self, algorithm_uri: &str, _usage: KeyUsage) -> Result<Option<SigningKey>> {
        Ok(is_hmac(algorithm_uri).then(|| SigningKey::Hmac(self.key.clone())))
    }

    fn wrapping_token(&self) -> Option<&str> {
        self.wrapping.as_deref()
    }
}

/// An RSA key pair, or only its public half for verification.
#[derive(Debug)]
pub struct RsaKeyToken {
    id: String,
    private: Option<rsa::RsaPrivateKey>,
    public: rsa::RsaPublicKey,
}

impl RsaKeyToken {
    pub fn new(id: &str, private: rsa::RsaPrivateKey) -> Self {
        Self {
            id: id.to_owned(),
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    pub fn public(id: &str, public: rsa::RsaPublicKey) -> Self {
        Self {
            id: id.to_owned(),
            private: None,
            public,
        }
    }
}

impl SecurityToken for RsaKeyToken {
    fn id(&self) -> &str {
        &self.id
    }

    fn secret_key(&self, _algorithm_uri: &str, _usage: KeyUsage) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn signing_key(&self, algorithm_uri: &str, usage: KeyUsage) -> Result<Option<SigningKey>> {
        if is_hmac(algorithm_uri) {
            return Ok(None);
        }
        Ok(match usage {
            KeyUsage::Signature => self.private.clone().map(SigningKey::Rsa),
            _ => Some(SigningKey::RsaPublic(self.public.clone())),
        })
    }
}

/// A token that only points at another token, as a
/// `SecurityTokenReference` does.
#[derive(Debug, Clone)]
pub struct ReferenceToken {
    id: String,
    target: String,
}

impl ReferenceToken {
    pub fn new(id: &str, target: &str) -> Self {
        Self {
            id: id.to_owned(),
            target: target.to_owned(),
        }
    }
}

impl SecurityToken for ReferenceToken {
    fn id(&self) -> &str {
        &self.id
    }

    fn secret_key(&self, _algorithm_uri: &str, _usage: KeyUsage) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn key_reference(&self) -> Option<&str> {
        Some(&self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stromsborg_core::algorithm;

    #[test]
    fn test_symmetric_token_signing_key_only_for_hmac() {
        let token = SymmetricKeyToken::new("k", vec![9; 32]);
        assert!(token
            .signing_key(algorithm::HMAC_SHA256, KeyUsage::Signature)
            .unwrap()
            .is_some());
        assert!(token
            .signing_key(algorithm::RSA_SHA256, KeyUsage::Signature)
            .unwrap()
            .is_none());
        assert_eq!(
            token.secret_key(algorithm::AES256_CBC, KeyUsage::Encryption).unwrap(),
            Some(vec![9; 32])
        );
    }

    #[test]
    fn test_public_rsa_token_cannot_sign() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 512).unwrap();
        let token = RsaKeyToken::public("pub", private.to_public_key());
        assert!(token
            .signing_key(algorithm::RSA_SHA256, KeyUsage::Signature)
            .unwrap()
            .is_none());
        assert!(matches!(
            token.signing_key(algorithm::RSA_SHA256, KeyUsage::Verification).unwrap(),
            Some(SigningKey::RsaPublic(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = SymmetricKeyToken::new("k", vec![0xAA; 16]);
        let shown = format!("{token:?}");
        assert!(shown.contains("key_len: 16"));
        assert!(!shown.contains("170"));
    }
}
