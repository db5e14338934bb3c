#![forbid(unsafe_code)]

use stromsborg_core::Result;
use stromsborg_xml::XmlEvent;

use crate::input::InputProcessorChain;
use crate::output::OutputProcessorChain;
use crate::processor::{InputProcessor, OutputProcessor, Phase, ProcessorDescriptor, ProcessorKind};

/// Forwards every event untouched.
pub struct PassThroughProcessor {
    descriptor: ProcessorDescriptor,
}

impl PassThroughProcessor {
    pub fn new(phase: Phase) -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::PassThrough, phase),
        }
    }

    pub fn with_descriptor(descriptor: ProcessorDescriptor) -> Self {
        Self { descriptor }
    }
}

impl InputProcessor for PassThroughProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        chain.pull_event()
    }
}

impl OutputProcessor for PassThroughProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        chain.push_event(event)
    }
}
