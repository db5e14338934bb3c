#![forbid(unsafe_code)]

//! XML Signature over streaming event chains.
//!
//! Signing digests the secure parts as they are written and places the
//! `ds:Signature` ahead of them; verification checks the signature when it
//! is read and digests the referenced elements as they follow.

pub mod sign;
pub mod signed_info;
pub mod verify;

pub use sign::{SignatureOutputProcessor, SignatureReferenceOutputProcessor};
pub use signed_info::{SignatureAccumulator, SignedReference};
pub use verify::{ReferenceSpec, ReferenceVerificationInputProcessor, SignatureInputProcessor};
