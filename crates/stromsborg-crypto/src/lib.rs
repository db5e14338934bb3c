#![forbid(unsafe_code)]

//! Cryptographic algorithm implementations for the Stromsborg pipeline.
//!
//! Digests and block ciphers are incremental so that canonical bytes and
//! ciphertext can be processed as they stream by; signature algorithms
//! work on the (small) canonical `SignedInfo`.

pub mod cipher;
pub mod digest;
pub mod registry;
pub mod sign;

pub use cipher::{BlockCipherAlgorithm, StreamDecryptor, StreamEncryptor};
pub use digest::{DigestAlgorithm, DigestWriter};
pub use registry::{AlgorithmRegistry, CryptoProvider};
pub use sign::{SignatureAlgorithm, SigningKey};
