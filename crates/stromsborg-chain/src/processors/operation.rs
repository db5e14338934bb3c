#![forbid(unsafe_code)]

use stromsborg_core::{ns, Result};
use stromsborg_xml::{StartElement, XmlEvent};

use crate::event::SecurityEvent;
use crate::input::InputProcessorChain;
use crate::processor::{InputProcessor, Phase, ProcessorDescriptor, ProcessorKind};

/// Reports the first child of the SOAP body as the message operation, then
/// leaves the chain.
pub struct OperationInputProcessor {
    descriptor: ProcessorDescriptor,
    body_depth: Option<usize>,
}

impl Default for OperationInputProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationInputProcessor {
    pub fn new() -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::OperationObserver, Phase::PreProcessing),
            body_depth: None,
        }
    }
}

impl InputProcessor for OperationInputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        let event = chain.pull_event()?;
        let depth = chain.document_context().depth;
        match &event {
            XmlEvent::StartElement(start) => match self.body_depth {
                Some(body) if depth == body + 1 => {
                    tracing::debug!(operation = %start.name, "operation seen");
                    chain.security_context().register_event(SecurityEvent::OperationSeen {
                        operation: start.name.clone(),
                    });
                    chain.remove(self.descriptor.id);
                }
                None if is_body(start) => self.body_depth = Some(depth),
                _ => {}
            },
            XmlEvent::EndElement(_) if self.body_depth.is_some_and(|body| depth < body) => {
                // empty body
                chain.remove(self.descriptor.id);
            }
            _ => {}
        }
        Ok(event)
    }
}

fn is_body(start: &StartElement) -> bool {
    (start.name.namespace_uri == ns::SOAP11 || start.name.namespace_uri == ns::SOAP12)
        && start.name.local_name == ns::node::BODY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use crate::event::CollectingEventSink;
    use crate::processors::DocumentReaderProcessor;
    use std::sync::Arc;

    fn run(xml: &'static str) -> (Vec<SecurityEvent>, usize) {
        let sink = Arc::new(CollectingEventSink::new());
        let security = SecurityContext::default().with_event_sink(sink.clone());
        let mut chain = InputProcessorChain::new(Arc::new(security));
        chain.insert(DocumentReaderProcessor::new(xml.as_bytes())).unwrap();
        chain.insert(OperationInputProcessor::new()).unwrap();
        while !chain.pull_event().unwrap().is_end_document() {}
        (sink.take(), chain.len())
    }

    #[test]
    fn test_reports_first_body_child() {
        let (events, len) = run(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><m:getQuote xmlns:m="urn:q"><m:sym/></m:getQuote><other/></s:Body></s:Envelope>"#,
        );
        assert_eq!(events.len(), 1);
        match &events[0] {
            SecurityEvent::OperationSeen { operation } => {
                assert!(operation.is("urn:q", "getQuote"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(len, 1);
    }

    #[test]
    fn test_empty_body_reports_nothing() {
        let (events, len) = run(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body/></s:Envelope>"#,
        );
        assert!(events.is_empty());
        assert_eq!(len, 1);
    }
}
