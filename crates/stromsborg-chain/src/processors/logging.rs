#![forbid(unsafe_code)]

use stromsborg_core::Result;
use stromsborg_xml::XmlEvent;

use crate::input::InputProcessorChain;
use crate::output::OutputProcessorChain;
use crate::processor::{InputProcessor, OutputProcessor, Phase, ProcessorDescriptor, ProcessorKind};

/// Traces every event that passes, in either chain.
pub struct EventLoggingProcessor {
    descriptor: ProcessorDescriptor,
    label: &'static str,
    count: u64,
}

impl EventLoggingProcessor {
    pub fn new(label: &'static str) -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::EventLogger, Phase::PostProcessing),
            label,
            count: 0,
        }
    }

    /// Number of events logged so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    fn log(&mut self, event: &XmlEvent, depth: usize) {
        self.count += 1;
        match event {
            XmlEvent::StartElement(start) => {
                tracing::trace!(label = self.label, depth, name = %start.name, "start element");
            }
            XmlEvent::EndElement(end) => {
                tracing::trace!(label = self.label, depth, name = %end.name, "end element");
            }
            XmlEvent::Characters(chars) => {
                tracing::trace!(label = self.label, depth, bytes = chars.text.len(), "characters");
            }
            other => tracing::trace!(label = self.label, depth, event = ?other, "event"),
        }
    }
}

impl InputProcessor for EventLoggingProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        let event = chain.pull_header_event()?;
        self.log(&event, chain.document_context().depth);
        Ok(event)
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        let event = chain.pull_event()?;
        self.log(&event, chain.document_context().depth);
        Ok(event)
    }

    fn finish(&mut self, chain: &mut InputProcessorChain) -> Result<()> {
        tracing::debug!(label = self.label, events = self.count, "input stream finished");
        chain.finish()
    }
}

impl OutputProcessor for EventLoggingProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        self.log(&event, chain.document_context().depth);
        chain.push_event(event)
    }

    fn finish(&mut self, chain: &mut OutputProcessorChain) -> Result<()> {
        tracing::debug!(label = self.label, events = self.count, "output stream finished");
        chain.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use crate::processors::DocumentReaderProcessor;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_counts_pulled_events() {
        let logger = Arc::new(Mutex::new(EventLoggingProcessor::new("in")));
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        chain.insert(DocumentReaderProcessor::new(&b"<a>x</a>"[..])).unwrap();
        chain.insert_shared(logger.clone()).unwrap();
        while !chain.pull_event().unwrap().is_end_document() {}
        chain.finish().unwrap();
        // StartDocument, <a>, x, </a>, EndDocument
        assert_eq!(logger.lock().unwrap().count(), 5);
    }
}
