#![forbid(unsafe_code)]

//! Algorithm registry mapping URIs to factory functions.

use rand::RngCore;
use stromsborg_core::Error;

use crate::cipher::BlockCipherAlgorithm;
use crate::digest::DigestAlgorithm;
use crate::sign::SignatureAlgorithm;

/// Source of algorithm implementations for the pipeline. Unknown URIs are
/// `UnsupportedAlgorithm`.
pub trait CryptoProvider: Send + Sync {
    fn digest(&self, uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error>;
    fn signature(&self, uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error>;
    fn cipher(&self, uri: &str) -> Result<Box<dyn BlockCipherAlgorithm>, Error>;

    /// Fresh random key material of `len` bytes.
    fn random_key(&self, len: usize) -> Vec<u8> {
        let mut key = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }
}

/// Central registry for all built-in cryptographic algorithms.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlgorithmRegistry;

impl CryptoProvider for AlgorithmRegistry {
    fn digest(&self, uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
        crate::digest::from_uri(uri)
    }

    fn signature(&self, uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
        crate::sign::from_uri(uri)
    }

    fn cipher(&self, uri: &str) -> Result<Box<dyn BlockCipherAlgorithm>, Error> {
        crate::cipher::from_uri(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stromsborg_core::algorithm;

    #[test]
    fn test_registry_lookups() {
        let provider: &dyn CryptoProvider = &AlgorithmRegistry;
        assert_eq!(provider.digest(algorithm::SHA256).unwrap().uri(), algorithm::SHA256);
        assert_eq!(provider.cipher(algorithm::AES128_CBC).unwrap().key_size(), 16);
        assert_eq!(provider.signature(algorithm::HMAC_SHA1).unwrap().uri(), algorithm::HMAC_SHA1);
        assert!(provider.cipher(algorithm::SHA256).is_err());
        assert_eq!(provider.random_key(24).len(), 24);
    }
}
