#![forbid(unsafe_code)]

//! Processor identity, ordering metadata and the two processor traits.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use stromsborg_core::Result;
use stromsborg_xml::XmlEvent;

use crate::input::InputProcessorChain;
use crate::output::OutputProcessorChain;

/// Process-unique processor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(u64);

impl ProcessorId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ProcessorId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse ordering bucket. Variants are declared in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    PreProcessing,
    Processing,
    PostProcessing,
}

/// What a processor is, for ordering constraints between kinds rather
/// than instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessorKind {
    DocumentReader,
    DocumentWriter,
    Decryption,
    /// Rejects encrypted data whose id was already decrypted.
    DecryptionGuard,
    Encryption,
    /// Canonicalizes and digests signed parts.
    SignatureReference,
    Signature,
    SignatureVerification,
    ReferenceVerification,
    OperationObserver,
    EventLogger,
    Rewrite,
    PassThrough,
    /// A processor supplied by an external collaborator.
    Custom(&'static str),
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorKind::Custom(name) => write!(f, "custom:{name}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Identity plus ordering metadata of one processor.
///
/// `must_precede` kinds must sit later in the list than this processor,
/// `must_follow` kinds earlier. Constraints only apply within a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorDescriptor {
    pub id: ProcessorId,
    pub kind: ProcessorKind,
    pub phase: Phase,
    pub must_precede: HashSet<ProcessorKind>,
    pub must_follow: HashSet<ProcessorKind>,
}

impl ProcessorDescriptor {
    pub fn new(kind: ProcessorKind, phase: Phase) -> Self {
        Self {
            id: ProcessorId::next(),
            kind,
            phase,
            must_precede: HashSet::new(),
            must_follow: HashSet::new(),
        }
    }

    /// Require this processor to come before every processor of `kind`.
    pub fn before(mut self, kind: ProcessorKind) -> Self {
        self.must_precede.insert(kind);
        self
    }

    /// Require this processor to come after every processor of `kind`.
    pub fn after(mut self, kind: ProcessorKind) -> Self {
        self.must_follow.insert(kind);
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.must_precede.is_empty() && self.must_follow.is_empty()
    }

    /// Whether `self` has to sit before `other` in the same phase, by a
    /// constraint declared on either side.
    pub fn orders_before(&self, other: &ProcessorDescriptor) -> bool {
        self.must_precede.contains(&other.kind) || other.must_follow.contains(&self.kind)
    }
}

/// A unit of pull-side behavior.
///
/// `handle_event` produces the next event for whoever pulled, usually by
/// pulling from the chain and transforming, buffering or replacing what it
/// gets. A processor that has nothing to do for an event simply returns
/// `chain.pull_event()`.
pub trait InputProcessor: Send {
    fn descriptor(&self) -> &ProcessorDescriptor;

    /// Events of the message header (up to and including the end of
    /// `soap:Header`).
    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        chain.pull_header_event()
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent>;

    /// End-of-stream checks; must delegate to `chain.finish()`.
    fn finish(&mut self, chain: &mut InputProcessorChain) -> Result<()> {
        chain.finish()
    }
}

/// A unit of push-side behavior.
///
/// `handle_event` receives one event and forwards zero or more events to
/// the rest of the chain with `chain.push_event`.
pub trait OutputProcessor: Send {
    fn descriptor(&self) -> &ProcessorDescriptor;

    fn handle_event(&mut self, event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()>;

    /// End-of-stream checks; must delegate to `chain.finish()`.
    fn finish(&mut self, chain: &mut OutputProcessorChain) -> Result<()> {
        chain.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ProcessorDescriptor::new(ProcessorKind::PassThrough, Phase::Processing);
        let b = ProcessorDescriptor::new(ProcessorKind::PassThrough, Phase::Processing);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::PreProcessing < Phase::Processing);
        assert!(Phase::Processing < Phase::PostProcessing);
    }

    #[test]
    fn test_orders_before_either_side() {
        let canon = ProcessorDescriptor::new(ProcessorKind::SignatureReference, Phase::Processing);
        let signer = ProcessorDescriptor::new(ProcessorKind::Signature, Phase::Processing)
            .after(ProcessorKind::SignatureReference);
        assert!(canon.orders_before(&signer));
        assert!(!signer.orders_before(&canon));

        let early = ProcessorDescriptor::new(ProcessorKind::Custom("x"), Phase::Processing)
            .before(ProcessorKind::Signature);
        assert!(early.orders_before(&signer));
        assert_eq!(early.kind.to_string(), "custom:x");
    }
}
