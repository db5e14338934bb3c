#![forbid(unsafe_code)]

//! Ordered, constraint-driven processor chains.
//!
//! An [`InputProcessorChain`] is pulled by the consumer and pulls, processor
//! by processor, from the [`processors::DocumentReaderProcessor`] at its end.
//! An [`OutputProcessorChain`] is pushed by the producer and pushes,
//! processor by processor, into the [`processors::DocumentWriterProcessor`]
//! at its end. Processors may insert or remove processors (themselves
//! included) while an event is in flight, and may fork a sub-chain that
//! continues right after them.

pub mod context;
pub mod event;
pub mod input;
pub mod list;
pub mod order;
pub mod output;
pub mod processor;
pub mod processors;
pub mod token;

pub use context::{CancellationToken, DocumentContext, SecurityContext};
pub use event::{
    AlgorithmUsage, CollectingEventSink, SecurityEvent, SecurityEventSink, TracingEventSink,
};
pub use input::{InputProcessorChain, SharedInputProcessor};
pub use output::{OutputProcessorChain, SharedOutputProcessor};
pub use processor::{
    InputProcessor, OutputProcessor, Phase, ProcessorDescriptor, ProcessorId, ProcessorKind,
};
pub use token::{KeyUsage, ReferenceToken, RsaKeyToken, SecurityToken, SymmetricKeyToken};
