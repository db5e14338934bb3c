#![forbid(unsafe_code)]

//! The event source at the end of every input chain.

use std::io::BufRead;

use stromsborg_core::{ns, Result};
use stromsborg_xml::{ElementId, ScopeTree, XmlEvent, XmlEventReader};

use crate::context::DocumentContext;
use crate::input::InputProcessorChain;
use crate::processor::{InputProcessor, Phase, ProcessorDescriptor, ProcessorKind};

/// Reads the wire document and keeps the chain's [`DocumentContext`] in
/// step with it.
///
/// After a start element the context depth is that element's depth; after
/// an end element it is the parent's.
pub struct DocumentReaderProcessor {
    descriptor: ProcessorDescriptor,
    reader: XmlEventReader<Box<dyn BufRead + Send>>,
    ended: bool,
}

impl DocumentReaderProcessor {
    pub fn new<R: BufRead + Send + 'static>(source: R) -> Self {
        Self::with_scope(source, ScopeTree::new())
    }

    pub fn with_scope<R: BufRead + Send + 'static>(source: R, tree: ScopeTree) -> Self {
        let boxed: Box<dyn BufRead + Send> = Box::new(source);
        Self::from_reader(XmlEventReader::with_scope(boxed, tree))
    }

    /// Reads a wrapped fragment whose elements become children of `parent`
    /// in `tree`. See [`XmlEventReader::nested`].
    pub fn nested<R: BufRead + Send + 'static>(
        source: R,
        tree: ScopeTree,
        parent: Option<ElementId>,
    ) -> Self {
        let boxed: Box<dyn BufRead + Send> = Box::new(source);
        Self::from_reader(XmlEventReader::nested(boxed, tree, parent))
    }

    fn from_reader(reader: XmlEventReader<Box<dyn BufRead + Send>>) -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(
                ProcessorKind::DocumentReader,
                Phase::PostProcessing,
            ),
            reader,
            ended: false,
        }
    }

    pub fn with_text_chunk_size(mut self, size: usize) -> Self {
        self.reader = self.reader.with_text_chunk_size(size);
        self
    }

    pub fn scope(&self) -> &ScopeTree {
        self.reader.scope()
    }

    fn read(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        if self.ended {
            return Ok(XmlEvent::EndDocument);
        }
        let event = match self.reader.next_event()? {
            Some(event) => event,
            None => XmlEvent::EndDocument,
        };
        if event.is_end_document() {
            self.ended = true;
        }
        track(chain.document_context_mut(), &event);
        Ok(event)
    }
}

fn is_soap(uri: &str) -> bool {
    uri == ns::SOAP11 || uri == ns::SOAP12
}

fn track(doc: &mut DocumentContext, event: &XmlEvent) {
    match event {
        XmlEvent::StartDocument {
            version, encoding, ..
        } => {
            doc.version = Some(version.clone());
            doc.encoding = encoding.clone();
        }
        XmlEvent::StartElement(start) => {
            doc.depth += 1;
            let name = &start.name;
            if doc.depth == 2 && is_soap(&name.namespace_uri) && name.local_name == ns::node::BODY {
                doc.header_complete = true;
            }
            if doc.depth == 3 && !doc.header_complete && name.is(ns::WSSE, ns::node::SECURITY) {
                doc.in_security_header = true;
            }
        }
        XmlEvent::EndElement(end) => {
            let name = &end.name;
            if doc.depth == 3 && name.is(ns::WSSE, ns::node::SECURITY) {
                doc.in_security_header = false;
            }
            if doc.depth == 2 && is_soap(&name.namespace_uri) && name.local_name == ns::node::HEADER {
                doc.header_complete = true;
            }
            if doc.depth == 1 {
                doc.header_complete = true;
            }
            doc.depth = doc.depth.saturating_sub(1);
        }
        XmlEvent::EndDocument => doc.header_complete = true,
        _ => {}
    }
}

impl InputProcessor for DocumentReaderProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.read(chain)
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.read(chain)
    }

    fn finish(&mut self, _chain: &mut InputProcessorChain) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use std::sync::Arc;

    const SOAP: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Header><wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"><t/></wsse:Security></s:Header><s:Body><op/></s:Body></s:Envelope>"#;

    fn chain(xml: &'static str) -> InputProcessorChain {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        chain.insert(DocumentReaderProcessor::new(xml.as_bytes())).unwrap();
        chain
    }

    #[test]
    fn test_header_tracking() {
        let mut chain = chain(SOAP);
        let mut security_flags = Vec::new();
        while !chain.document_context().header_complete {
            let event = chain.pull_header_event().unwrap();
            if let Some(start) = event.as_start() {
                security_flags.push((
                    start.name.local_name.clone(),
                    chain.document_context().in_security_header,
                ));
            }
        }
        assert_eq!(
            security_flags,
            [
                ("Envelope".to_owned(), false),
                ("Header".to_owned(), false),
                ("Security".to_owned(), true),
                ("t".to_owned(), true),
            ]
        );
        // the header end was the last header event
        assert_eq!(chain.document_context().depth, 1);
        assert!(chain.pull_event().unwrap().is_start_of(ns::SOAP11, "Body"));
    }

    #[test]
    fn test_plain_document_and_repeated_end() {
        let mut chain = chain(r#"<?xml version="1.0" encoding="UTF-8"?><a><b/></a>"#);
        let mut events = 0;
        while !chain.pull_event().unwrap().is_end_document() {
            events += 1;
        }
        // StartDocument, <a>, <b>, </b>, </a>
        assert_eq!(events, 5);
        assert_eq!(chain.document_context().encoding.as_deref(), Some("UTF-8"));
        assert!(chain.document_context().header_complete);
        assert!(chain.pull_event().unwrap().is_end_document());
    }

    #[test]
    fn test_nested_fragment_has_no_document_events() {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        let fragment = r#"<w:wrap xmlns:w="urn:w"><a/></w:wrap>"#.as_bytes();
        chain
            .insert(DocumentReaderProcessor::nested(fragment, ScopeTree::new(), None))
            .unwrap();
        let mut depths = Vec::new();
        loop {
            let event = chain.pull_event().unwrap();
            if event.is_end_document() {
                break;
            }
            assert!(!matches!(event, XmlEvent::StartDocument { .. }));
            depths.push(chain.document_context().depth);
        }
        assert_eq!(depths, [1, 2, 1, 0]);
    }

    #[test]
    fn test_malformed_input_aborts() {
        let mut chain = chain("<a><b></a>");
        let mut result = Ok(XmlEvent::EndDocument);
        for _ in 0..5 {
            result = chain.pull_event();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(stromsborg_core::Error::MalformedInput(_))));
    }
}
