#![forbid(unsafe_code)]

use stromsborg_core::Result;
use stromsborg_xml::{StartElement, XmlEvent};

use crate::output::OutputProcessorChain;
use crate::processor::{OutputProcessor, Phase, ProcessorDescriptor, ProcessorKind};

type Rewrite = Box<dyn FnMut(&mut StartElement) -> Result<()> + Send>;

/// Applies a closure to every start element before passing it on.
pub struct RewriteOutputProcessor {
    descriptor: ProcessorDescriptor,
    rewrite: Rewrite,
}

impl RewriteOutputProcessor {
    pub fn new<F>(rewrite: F) -> Self
    where
        F: FnMut(&mut StartElement) -> Result<()> + Send + 'static,
    {
        Self::with_descriptor(
            ProcessorDescriptor::new(ProcessorKind::Rewrite, Phase::PreProcessing),
            rewrite,
        )
    }

    /// Use a caller-built descriptor, e.g. to order the rewrite against
    /// other processors.
    pub fn with_descriptor<F>(descriptor: ProcessorDescriptor, rewrite: F) -> Self
    where
        F: FnMut(&mut StartElement) -> Result<()> + Send + 'static,
    {
        Self {
            descriptor,
            rewrite: Box::new(rewrite),
        }
    }
}

impl OutputProcessor for RewriteOutputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, mut event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        if let Some(start) = event.as_start_mut() {
            (self.rewrite)(start)?;
        }
        chain.push_event(event)
    }
}
