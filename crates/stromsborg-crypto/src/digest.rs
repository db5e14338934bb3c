#![forbid(unsafe_code)]

//! Digest (hash) algorithm implementations.

use std::io;

use digest::Digest;
use stromsborg_core::{algorithm, Error};

/// An incremental hash, addressed by its XML Security URI.
pub trait DigestAlgorithm: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
    fn uri(&self) -> &'static str;
}

/// Fresh hasher for `uri`.
pub fn from_uri(uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
    let hasher = match uri {
        algorithm::SHA1 => hashing::<sha1::Sha1>(algorithm::SHA1),
        algorithm::SHA224 => hashing::<sha2::Sha224>(algorithm::SHA224),
        algorithm::SHA256 => hashing::<sha2::Sha256>(algorithm::SHA256),
        algorithm::SHA384 => hashing::<sha2::Sha384>(algorithm::SHA384),
        algorithm::SHA512 => hashing::<sha2::Sha512>(algorithm::SHA512),
        algorithm::SHA3_256 => hashing::<sha3::Sha3_256>(algorithm::SHA3_256),
        algorithm::SHA3_512 => hashing::<sha3::Sha3_512>(algorithm::SHA3_512),
        _ => return Err(Error::UnsupportedAlgorithm(format!("digest {uri}"))),
    };
    Ok(hasher)
}

/// One-shot digest of `data`.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut hasher = from_uri(uri)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// `io::Write` adapter so a canonicalizer can stream straight into a hash.
pub struct DigestWriter {
    inner: Box<dyn DigestAlgorithm>,
    written: u64,
}

impl DigestWriter {
    pub fn new(inner: Box<dyn DigestAlgorithm>) -> Self {
        Self { inner, written: 0 }
    }

    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        Ok(Self::new(from_uri(uri)?))
    }

    pub fn uri(&self) -> &'static str {
        self.inner.uri()
    }

    /// Number of bytes hashed so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finalize(self) -> Vec<u8> {
        self.inner.finalize()
    }
}

impl io::Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for DigestWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestWriter")
            .field("uri", &self.inner.uri())
            .field("written", &self.written)
            .finish()
    }
}

/// A RustCrypto hash behind [`DigestAlgorithm`].
struct Hashing<D> {
    uri: &'static str,
    inner: D,
}

impl<D: Digest + Send> DigestAlgorithm for Hashing<D> {
    fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.inner, data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        Digest::finalize(self.inner).to_vec()
    }

    fn uri(&self) -> &'static str {
        self.uri
    }
}

fn hashing<D: Digest + Send + 'static>(uri: &'static str) -> Box<dyn DigestAlgorithm> {
    Box::new(Hashing {
        uri,
        inner: <D as Digest>::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256() {
        let result = digest(algorithm::SHA256, b"hello").unwrap();
        assert_eq!(
            hex::encode(result),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_output_lengths() {
        for (uri, len) in [
            (algorithm::SHA1, 20),
            (algorithm::SHA224, 28),
            (algorithm::SHA384, 48),
            (algorithm::SHA512, 64),
            (algorithm::SHA3_256, 32),
            (algorithm::SHA3_512, 64),
        ] {
            assert_eq!(digest(uri, b"hello").unwrap().len(), len, "{uri}");
        }
    }

    #[test]
    fn test_writer_matches_one_shot() {
        let mut writer = DigestWriter::from_uri(algorithm::SHA256).unwrap();
        writer.write_all(b"hel").unwrap();
        writer.write_all(b"lo").unwrap();
        assert_eq!(writer.written(), 5);
        assert_eq!(writer.finalize(), digest(algorithm::SHA256, b"hello").unwrap());
    }

    #[test]
    fn test_unknown_uri() {
        assert!(matches!(
            from_uri("urn:nope"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
