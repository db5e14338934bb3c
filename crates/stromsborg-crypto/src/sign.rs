#![forbid(unsafe_code)]

//! Signature algorithm implementations (RSA PKCS#1 v1.5, HMAC).

use std::fmt;
use std::marker::PhantomData;

use digest::const_oid::AssociatedOid;
use digest::core_api::BlockSizeUser;
use digest::Digest;
use hmac::{Mac, SimpleHmac};
use signature::{SignatureEncoding, Signer, Verifier};
use stromsborg_core::{algorithm, Error};

/// Key material for signature operations.
#[derive(Clone)]
pub enum SigningKey {
    Rsa(rsa::RsaPrivateKey),
    RsaPublic(rsa::RsaPublicKey),
    Hmac(Vec<u8>),
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::Rsa(_) => f.write_str("SigningKey::Rsa(..)"),
            SigningKey::RsaPublic(_) => f.write_str("SigningKey::RsaPublic(..)"),
            SigningKey::Hmac(k) => write!(f, "SigningKey::Hmac({} bytes)", k.len()),
        }
    }
}

/// A signature method, addressed by its XML Security URI.
pub trait SignatureAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error>;
}

/// Signature method for `uri`.
pub fn from_uri(uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
    let method = match uri {
        algorithm::RSA_SHA1 => rsa_method::<sha1::Sha1>(algorithm::RSA_SHA1),
        algorithm::RSA_SHA256 => rsa_method::<sha2::Sha256>(algorithm::RSA_SHA256),
        algorithm::RSA_SHA384 => rsa_method::<sha2::Sha384>(algorithm::RSA_SHA384),
        algorithm::RSA_SHA512 => rsa_method::<sha2::Sha512>(algorithm::RSA_SHA512),
        algorithm::HMAC_SHA1 => hmac_method::<sha1::Sha1>(algorithm::HMAC_SHA1),
        algorithm::HMAC_SHA256 => hmac_method::<sha2::Sha256>(algorithm::HMAC_SHA256),
        algorithm::HMAC_SHA384 => hmac_method::<sha2::Sha384>(algorithm::HMAC_SHA384),
        algorithm::HMAC_SHA512 => hmac_method::<sha2::Sha512>(algorithm::HMAC_SHA512),
        _ => return Err(Error::UnsupportedAlgorithm(format!("signature method {uri}"))),
    };
    Ok(method)
}

/// Whether `uri` names a keyed-hash (HMAC) signature method.
pub fn is_hmac(uri: &str) -> bool {
    matches!(
        uri,
        algorithm::HMAC_SHA1 | algorithm::HMAC_SHA256 | algorithm::HMAC_SHA384 | algorithm::HMAC_SHA512
    )
}

fn rsa_method<D>(uri: &'static str) -> Box<dyn SignatureAlgorithm>
where
    D: Digest + AssociatedOid + 'static,
{
    Box::new(RsaPkcs1v15::<D> { uri, hash: PhantomData })
}

fn hmac_method<D>(uri: &'static str) -> Box<dyn SignatureAlgorithm>
where
    D: Digest + BlockSizeUser + 'static,
{
    Box::new(KeyedHash::<D> { uri, hash: PhantomData })
}

/// RSASSA-PKCS1-v1_5 over hash `D`.
struct RsaPkcs1v15<D> {
    uri: &'static str,
    hash: PhantomData<fn() -> D>,
}

impl<D> SignatureAlgorithm for RsaPkcs1v15<D>
where
    D: Digest + AssociatedOid + 'static,
{
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        let SigningKey::Rsa(private) = key else {
            return Err(Error::Crypto(format!("{} needs an RSA private key", self.uri)));
        };
        let signer = rsa::pkcs1v15::SigningKey::<D>::new(private.clone());
        signer
            .try_sign(data)
            .map(|sig| sig.to_vec())
            .map_err(|e| Error::Crypto(format!("RSA signing failed: {e}")))
    }

    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error> {
        let public = match key {
            SigningKey::Rsa(private) => private.to_public_key(),
            SigningKey::RsaPublic(public) => public.clone(),
            SigningKey::Hmac(_) => {
                return Err(Error::Crypto(format!("{} needs an RSA key", self.uri)));
            }
        };
        let signature = rsa::pkcs1v15::Signature::try_from(signature)
            .map_err(|e| Error::Crypto(format!("malformed RSA signature: {e}")))?;
        let verifier = rsa::pkcs1v15::VerifyingKey::<D>::new(public);
        Ok(verifier.verify(data, &signature).is_ok())
    }
}

/// HMAC over hash `D`; verification accepts a truncated value.
struct KeyedHash<D> {
    uri: &'static str,
    hash: PhantomData<fn() -> D>,
}

impl<D> KeyedHash<D>
where
    D: Digest + BlockSizeUser + 'static,
{
    fn mac(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        let SigningKey::Hmac(secret) = key else {
            return Err(Error::Crypto(format!("{} needs a secret key", self.uri)));
        };
        let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(secret)
            .map_err(|e| Error::Crypto(format!("HMAC key rejected: {e}")))?;
        Mac::update(&mut mac, data);
        Ok(Mac::finalize(mac).into_bytes().to_vec())
    }
}

impl<D> SignatureAlgorithm for KeyedHash<D>
where
    D: Digest + BlockSizeUser + 'static,
{
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.mac(key, data)
    }

    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error> {
        let expected = self.mac(key, data)?;
        Ok(constant_time_eq(&expected, signature))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // An empty or over-long value never matches; a shorter one is a
    // truncated HMAC output.
    if b.is_empty() || b.len() > a.len() {
        return false;
    }
    a[..b.len()].iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sign_verify() {
        let key = SigningKey::Hmac(b"secret".to_vec());
        let alg = from_uri(algorithm::HMAC_SHA256).unwrap();
        let sig = alg.sign(&key, b"payload").unwrap();
        assert_eq!(sig.len(), 32);
        assert!(alg.verify(&key, b"payload", &sig).unwrap());
        assert!(!alg.verify(&key, b"tampered", &sig).unwrap());
        assert!(alg.verify(&key, b"payload", &sig[..16]).unwrap());
        assert!(!alg.verify(&key, b"payload", &[]).unwrap());
    }

    #[test]
    fn test_hmac_rejects_rsa_key() {
        let alg = from_uri(algorithm::HMAC_SHA1).unwrap();
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 512).unwrap();
        assert!(alg.sign(&SigningKey::Rsa(private), b"x").is_err());
    }

    #[test]
    fn test_rsa_sign_verify() {
        let mut rng = rand::thread_rng();
        let private = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public = SigningKey::RsaPublic(private.to_public_key());
        let alg = from_uri(algorithm::RSA_SHA256).unwrap();
        let sig = alg.sign(&SigningKey::Rsa(private), b"signed info").unwrap();
        assert!(alg.verify(&public, b"signed info", &sig).unwrap());
        assert!(!alg.verify(&public, b"signed inf0", &sig).unwrap());
        assert!(alg.sign(&public, b"x").is_err());
    }

    #[test]
    fn test_is_hmac() {
        assert!(is_hmac(algorithm::HMAC_SHA512));
        assert!(!is_hmac(algorithm::RSA_SHA256));
    }

    #[test]
    fn test_unknown_signature_uri() {
        assert!(matches!(
            from_uri("urn:nope"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
