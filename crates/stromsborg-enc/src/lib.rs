#![forbid(unsafe_code)]

//! XML Encryption over streaming event chains.
//!
//! Each encrypted or decrypted region runs its cipher on a dedicated
//! worker thread, connected to the chain thread by bounded channels so
//! that memory use stays independent of the region's size.
//!
//! Workers are plain OS threads rather than tasks on a pool. A chain runs
//! at most one worker per open region (a region nested in decrypted
//! plaintext adds one more while it is open), and every worker is joined
//! before its region closes or when the region is dropped after an error,
//! so no thread outlives the document that started it.

pub mod decrypt;
pub mod encrypt;
pub mod pipe;

pub use decrypt::DecryptInputProcessor;
pub use encrypt::{EncryptOutputProcessor, Modifier, SecurePart};
pub use pipe::{pipe, FaultSlot, PipeReader, PipeStats, PipeWriter};
