#![forbid(unsafe_code)]

//! Block cipher algorithm implementations (AES-CBC, 3DES-CBC).
//!
//! Both directions are incremental. Ciphertext is laid out the XML
//! Encryption way: the IV is the first block, followed by CBC blocks whose
//! last block carries the padding length in its final byte.

use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit};
use rand::RngCore;
use stromsborg_core::{algorithm, Error};

/// Incremental encryption. The first output carries the random IV.
pub trait StreamEncryptor: Send {
    /// Encrypt `input`, appending every completed ciphertext block to `out`.
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), Error>;
    /// Pad and encrypt what is left.
    fn finalize(self: Box<Self>, out: &mut Vec<u8>) -> Result<(), Error>;
}

/// Incremental decryption. The IV is taken from the first input block and
/// the last block is held back until `finalize` so padding can be removed.
pub trait StreamDecryptor: Send {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), Error>;
    fn finalize(self: Box<Self>, out: &mut Vec<u8>) -> Result<(), Error>;
}

/// Trait for block cipher algorithms.
pub trait BlockCipherAlgorithm: Send + Sync {
    fn uri(&self) -> &'static str;
    fn key_size(&self) -> usize;
    fn block_size(&self) -> usize;
    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, Error>;
    fn decryptor(&self, key: &[u8]) -> Result<Box<dyn StreamDecryptor>, Error>;

    /// Encrypt in one shot; output is `IV || ciphertext`.
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut enc = self.encryptor(key)?;
        let mut out = Vec::with_capacity(plaintext.len() + 2 * self.block_size());
        enc.update(plaintext, &mut out)?;
        enc.finalize(&mut out)?;
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut dec = self.decryptor(key)?;
        let mut out = Vec::with_capacity(data.len());
        dec.update(data, &mut out)?;
        dec.finalize(&mut out)?;
        Ok(out)
    }
}

/// Create a cipher algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn BlockCipherAlgorithm>, Error> {
    match uri {
        algorithm::AES128_CBC => Ok(Box::new(AesCbc {
            key_size: 16,
            uri: algorithm::AES128_CBC,
        })),
        algorithm::AES192_CBC => Ok(Box::new(AesCbc {
            key_size: 24,
            uri: algorithm::AES192_CBC,
        })),
        algorithm::AES256_CBC => Ok(Box::new(AesCbc {
            key_size: 32,
            uri: algorithm::AES256_CBC,
        })),
        algorithm::TRIPLEDES_CBC => Ok(Box::new(TripleDesCbc)),
        _ => Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
    }
}

fn check_key(expected: usize, key: &[u8]) -> Result<(), Error> {
    if key.len() != expected {
        return Err(Error::Crypto(format!(
            "expected {expected} byte key, got {}",
            key.len()
        )));
    }
    Ok(())
}

// ── AES-CBC ──────────────────────────────────────────────────────────

struct AesCbc {
    key_size: usize,
    uri: &'static str,
}

impl BlockCipherAlgorithm for AesCbc {
    fn uri(&self) -> &'static str {
        self.uri
    }
    fn key_size(&self) -> usize {
        self.key_size
    }
    fn block_size(&self) -> usize {
        16
    }

    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, Error> {
        check_key(self.key_size, key)?;
        match self.key_size {
            16 => Ok(Box::new(CbcStreamEncryptor::<cbc::Encryptor<aes::Aes128>>::new(key)?)),
            24 => Ok(Box::new(CbcStreamEncryptor::<cbc::Encryptor<aes::Aes192>>::new(key)?)),
            32 => Ok(Box::new(CbcStreamEncryptor::<cbc::Encryptor<aes::Aes256>>::new(key)?)),
            _ => Err(Error::Crypto("unsupported AES key size".into())),
        }
    }

    fn decryptor(&self, key: &[u8]) -> Result<Box<dyn StreamDecryptor>, Error> {
        check_key(self.key_size, key)?;
        match self.key_size {
            16 => Ok(Box::new(CbcStreamDecryptor::<cbc::Decryptor<aes::Aes128>>::new(key))),
            24 => Ok(Box::new(CbcStreamDecryptor::<cbc::Decryptor<aes::Aes192>>::new(key))),
            32 => Ok(Box::new(CbcStreamDecryptor::<cbc::Decryptor<aes::Aes256>>::new(key))),
            _ => Err(Error::Crypto("unsupported AES key size".into())),
        }
    }
}

// ── 3DES-CBC ─────────────────────────────────────────────────────────

struct TripleDesCbc;

impl BlockCipherAlgorithm for TripleDesCbc {
    fn uri(&self) -> &'static str {
        algorithm::TRIPLEDES_CBC
    }
    fn key_size(&self) -> usize {
        24
    }
    fn block_size(&self) -> usize {
        8
    }

    fn encryptor(&self, key: &[u8]) -> Result<Box<dyn StreamEncryptor>, Error> {
        check_key(24, key)?;
        Ok(Box::new(CbcStreamEncryptor::<cbc::Encryptor<des::TdesEde3>>::new(key)?))
    }

    fn decryptor(&self, key: &[u8]) -> Result<Box<dyn StreamDecryptor>, Error> {
        check_key(24, key)?;
        Ok(Box::new(CbcStreamDecryptor::<cbc::Decryptor<des::TdesEde3>>::new(key)))
    }
}

// ── Streaming CBC ────────────────────────────────────────────────────

/// CBC encryption over any block cipher mode `E` (e.g. `cbc::Encryptor<aes::Aes128>`).
pub struct CbcStreamEncryptor<E> {
    mode: E,
    iv: Option<Vec<u8>>,
    pending: Vec<u8>,
}

impl<E> CbcStreamEncryptor<E>
where
    E: BlockEncryptMut + KeyIvInit,
{
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        let mut iv = vec![0u8; E::block_size()];
        rand::thread_rng().fill_bytes(&mut iv);
        let mode = E::new_from_slices(key, &iv)
            .map_err(|e| Error::Crypto(format!("CBC init: {e}")))?;
        Ok(Self {
            mode,
            iv: Some(iv),
            pending: Vec::new(),
        })
    }

    fn encrypt_whole_blocks(&mut self, out: &mut Vec<u8>) {
        if let Some(iv) = self.iv.take() {
            out.extend_from_slice(&iv);
        }
        let bs = E::block_size();
        let whole = self.pending.len() / bs * bs;
        for block in self.pending[..whole].chunks_exact_mut(bs) {
            self.mode
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out.extend_from_slice(&self.pending[..whole]);
        self.pending.drain(..whole);
    }
}

impl<E> StreamEncryptor for CbcStreamEncryptor<E>
where
    E: BlockEncryptMut + KeyIvInit + Send,
{
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        self.pending.extend_from_slice(input);
        self.encrypt_whole_blocks(out);
        Ok(())
    }

    fn finalize(mut self: Box<Self>, out: &mut Vec<u8>) -> Result<(), Error> {
        let bs = E::block_size();
        let pad_len = bs - self.pending.len() % bs;
        self.pending
            .extend(std::iter::repeat(pad_len as u8).take(pad_len));
        self.encrypt_whole_blocks(out);
        Ok(())
    }
}

/// CBC decryption over any block cipher mode `D` (e.g. `cbc::Decryptor<aes::Aes128>`).
pub struct CbcStreamDecryptor<D> {
    key: Vec<u8>,
    mode: Option<D>,
    pending: Vec<u8>,
}

impl<D> CbcStreamDecryptor<D>
where
    D: BlockDecryptMut + KeyIvInit,
{
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            mode: None,
            pending: Vec::new(),
        }
    }

    // Decrypt every complete block except the last `keep` bytes.
    fn decrypt_until(&mut self, keep: usize, out: &mut Vec<u8>) -> Result<(), Error> {
        let bs = D::block_size();
        if self.mode.is_none() {
            if self.pending.len() < bs {
                return Ok(());
            }
            let mode = D::new_from_slices(&self.key, &self.pending[..bs])
                .map_err(|e| Error::Crypto(format!("CBC init: {e}")))?;
            self.mode = Some(mode);
            self.key.clear();
            self.pending.drain(..bs);
        }
        let Some(mode) = self.mode.as_mut() else {
            return Ok(());
        };
        let whole = self.pending.len().saturating_sub(keep) / bs * bs;
        for block in self.pending[..whole].chunks_exact_mut(bs) {
            mode.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out.extend_from_slice(&self.pending[..whole]);
        self.pending.drain(..whole);
        Ok(())
    }
}

impl<D> StreamDecryptor for CbcStreamDecryptor<D>
where
    D: BlockDecryptMut + KeyIvInit + Send,
{
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        self.pending.extend_from_slice(input);
        // One byte back keeps at least the final block for `finalize`.
        self.decrypt_until(1, out)
    }

    fn finalize(mut self: Box<Self>, out: &mut Vec<u8>) -> Result<(), Error> {
        let bs = D::block_size();
        if self.mode.is_none() {
            return Err(Error::Crypto("ciphertext shorter than the IV".into()));
        }
        if self.pending.len() != bs {
            return Err(Error::Crypto(format!(
                "ciphertext is not a whole number of {bs} byte blocks"
            )));
        }
        let mut last = Vec::with_capacity(bs);
        self.decrypt_until(0, &mut last)?;
        out.extend_from_slice(&xmlenc_unpad(&last, bs)?);
        Ok(())
    }
}

/// Remove W3C XML Encryption padding.
///
/// Only the last byte (the padding length) is checked, which accepts both
/// PKCS#7 and ISO 10126 padded plaintext.
fn xmlenc_unpad(data: &[u8], block_size: usize) -> Result<&[u8], Error> {
    let Some(&pad_byte) = data.last() else {
        return Ok(data);
    };
    let pad_len = pad_byte as usize;
    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::Crypto("invalid padding".into()));
    }
    Ok(&data[..data.len() - pad_len])
}
