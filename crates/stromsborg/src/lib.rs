#![forbid(unsafe_code)]

//! Stromsborg: a streaming XML security engine.
//!
//! [`InboundSecurity`] wraps a document source in an input processor chain
//! and hands out the secured (decrypted, verified) events one at a time.
//! [`OutboundSecurity`] wraps a sink in an output processor chain that
//! signs and encrypts events as the application writes them.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

pub use stromsborg_c14n as c14n;
pub use stromsborg_chain as chain;
pub use stromsborg_core as core;
pub use stromsborg_crypto as crypto;
pub use stromsborg_dsig as dsig;
pub use stromsborg_enc as enc;
pub use stromsborg_xml as xml;

use stromsborg_chain::processors::{
    DocumentReaderProcessor, DocumentWriterProcessor, OperationInputProcessor,
};
use stromsborg_chain::{
    DocumentContext, InputProcessorChain, OutputProcessorChain, SecurityContext,
    SharedInputProcessor, SharedOutputProcessor,
};
use stromsborg_core::{ns, Error, Result, SecurityProperties};
use stromsborg_dsig::{SignatureAccumulator, SignatureOutputProcessor, SignatureReferenceOutputProcessor};
use stromsborg_xml::{QName, ScopeTracker, ScopeTree, StartElement, XmlEvent, XmlEventReader};

/// Entry point for reading secured documents.
#[derive(Debug, Clone)]
pub struct InboundSecurity {
    security: Arc<SecurityContext>,
}

impl InboundSecurity {
    /// Validate `properties` and bind them to `security`.
    pub fn new(properties: SecurityProperties, security: SecurityContext) -> Result<Self> {
        properties.validate()?;
        Ok(Self {
            security: Arc::new(security.with_properties(properties)),
        })
    }

    pub fn security_context(&self) -> &Arc<SecurityContext> {
        &self.security
    }

    /// Build an input chain over `reader` with `processors` on top of the
    /// document reader and the operation observer.
    pub fn process_reader<R: BufRead + Send + 'static>(
        &self,
        reader: R,
        processors: Vec<SharedInputProcessor>,
    ) -> Result<SecureEventReader> {
        let mut chain = InputProcessorChain::new(Arc::clone(&self.security));
        let text_chunk_size = self.security.properties().text_chunk_size;
        chain.insert(DocumentReaderProcessor::new(reader).with_text_chunk_size(text_chunk_size))?;
        chain.insert(OperationInputProcessor::new())?;
        for processor in processors {
            chain.insert_shared(processor)?;
        }
        tracing::debug!(processors = chain.len(), "inbound chain ready");
        Ok(SecureEventReader {
            chain,
            soap: None,
            done: false,
        })
    }
}

/// Pulls secured events out of an input chain.
///
/// Runs the chain's end-of-stream checks when the document ends; an error
/// from those checks is returned in place of `EndDocument`.
pub struct SecureEventReader {
    chain: InputProcessorChain,
    /// Whether the document element is a SOAP envelope, once known.
    soap: Option<bool>,
    done: bool,
}

impl SecureEventReader {
    /// The next event, or `None` after `EndDocument` was returned.
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        if self.done {
            return Ok(None);
        }
        let header = self.soap != Some(false) && !self.chain.document_context().header_complete;
        let event = if header {
            self.chain.pull_header_event()
        } else {
            self.chain.pull_event()
        };
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                self.done = true;
                return Err(err);
            }
        };
        match &event {
            XmlEvent::StartElement(start) if self.soap.is_none() => {
                let uri = start.name.namespace_uri.as_str();
                self.soap = Some(
                    start.name.local_name == ns::node::ENVELOPE && (uri == ns::SOAP11 || uri == ns::SOAP12),
                );
            }
            XmlEvent::EndDocument => {
                self.done = true;
                self.chain.finish()?;
            }
            _ => {}
        }
        Ok(Some(event))
    }

    pub fn document_context(&self) -> &DocumentContext {
        self.chain.document_context()
    }

    pub fn security_context(&self) -> &Arc<SecurityContext> {
        self.chain.security_context()
    }
}

impl Iterator for SecureEventReader {
    type Item = Result<XmlEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// Entry point for writing secured documents.
#[derive(Debug, Clone)]
pub struct OutboundSecurity {
    security: Arc<SecurityContext>,
}

impl OutboundSecurity {
    /// Validate `properties` and bind them to `security`.
    pub fn new(properties: SecurityProperties, security: SecurityContext) -> Result<Self> {
        properties.validate()?;
        Ok(Self {
            security: Arc::new(security.with_properties(properties)),
        })
    }

    pub fn security_context(&self) -> &Arc<SecurityContext> {
        &self.security
    }

    /// Build an output chain ending in `writer`.
    pub fn process_writer<W: Write + Send + 'static>(
        &self,
        writer: W,
        processors: Vec<SharedOutputProcessor>,
    ) -> Result<SecureEventWriter<W>> {
        let mut chain = OutputProcessorChain::new(Arc::clone(&self.security));
        let sink = Arc::new(Mutex::new(DocumentWriterProcessor::new(writer)));
        chain.insert_shared(sink.clone())?;
        for processor in processors {
            chain.insert_shared(processor)?;
        }
        tracing::debug!(processors = chain.len(), "outbound chain ready");
        Ok(SecureEventWriter {
            chain,
            sink,
            scope: ScopeTracker::new(ScopeTree::new()),
            open: Vec::new(),
            ended: false,
        })
    }

    /// Stream an existing document through a fresh output chain and return
    /// the secured serialization.
    pub fn transform_document(&self, xml: &str, processors: Vec<SharedOutputProcessor>) -> Result<String> {
        let mut writer = self.process_writer(Vec::new(), processors)?;
        let mut reader = XmlEventReader::new(xml.as_bytes())
            .with_text_chunk_size(self.security.properties().text_chunk_size);
        while let Some(event) = reader.next_event()? {
            writer.write_event(event)?;
        }
        let bytes = writer.finish()?;
        String::from_utf8(bytes).map_err(|e| Error::MalformedInput(format!("output is not UTF-8: {e}")))
    }
}

/// Pushes application events into an output chain.
///
/// Start elements that are not yet linked to a scope get linked here, so
/// processors can resolve in-scope namespaces of application-built events.
pub struct SecureEventWriter<W: Write + Send + 'static> {
    chain: OutputProcessorChain,
    sink: Arc<Mutex<DocumentWriterProcessor<W>>>,
    scope: ScopeTracker,
    /// Open elements, and whether this writer linked them.
    open: Vec<(QName, bool)>,
    ended: bool,
}

impl<W: Write + Send + 'static> SecureEventWriter<W> {
    pub fn write_event(&mut self, mut event: XmlEvent) -> Result<()> {
        match &mut event {
            XmlEvent::StartElement(start) => {
                let linked = start.scope().is_none();
                if linked {
                    self.scope.enter(start);
                }
                self.open.push((start.name.clone(), linked));
                self.chain.push_event(event)
            }
            XmlEvent::EndElement(end) => {
                let (open, linked) = self.open.pop().ok_or_else(|| {
                    Error::MalformedInput(format!("unexpected end element {}", end.name))
                })?;
                if open != end.name {
                    return Err(Error::MalformedInput(format!(
                        "end element {} does not match {open}",
                        end.name
                    )));
                }
                self.chain.push_event(event)?;
                if linked {
                    self.scope.leave();
                }
                Ok(())
            }
            XmlEvent::EndDocument => {
                self.ended = true;
                self.chain.push_event(event)
            }
            _ => self.chain.push_event(event),
        }
    }

    pub fn write_start_element(&mut self, start: StartElement) -> Result<()> {
        self.write_event(XmlEvent::StartElement(start))
    }

    pub fn write_characters(&mut self, text: &str) -> Result<()> {
        self.write_event(XmlEvent::text(text))
    }

    /// Close the innermost open element.
    pub fn write_end_element(&mut self) -> Result<()> {
        let name = self
            .open
            .last()
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Error::MalformedInput("no open element to close".into()))?;
        self.write_event(XmlEvent::end(name))
    }

    pub fn document_context(&self) -> &DocumentContext {
        self.chain.document_context()
    }

    /// End the document, run every processor's end-of-stream checks and
    /// hand back the sink.
    pub fn finish(mut self) -> Result<W> {
        if let Some((name, _)) = self.open.last() {
            return Err(Error::MalformedInput(format!("element {name} was never closed")));
        }
        if !self.ended {
            self.chain.push_event(XmlEvent::EndDocument)?;
        }
        self.chain.finish()?;
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| Error::InternalFailure("document writer lock poisoned".into()))?;
        sink.take_sink()
    }
}

/// The two processors that sign `parts`: the digesting one and the one that
/// emits `ds:Signature`.
pub fn signature_processors(
    parts: Vec<QName>,
    properties: &SecurityProperties,
    signature_method: &str,
    token_id: &str,
) -> Result<Vec<SharedOutputProcessor>> {
    let accumulator = SignatureAccumulator::new();
    let signature = SignatureOutputProcessor::new(
        accumulator.clone(),
        parts.clone(),
        &properties.default_c14n,
        signature_method,
        token_id,
    )?;
    let references = SignatureReferenceOutputProcessor::new(
        parts,
        &properties.default_c14n,
        &properties.default_digest,
        accumulator,
    )?;
    Ok(vec![
        Arc::new(Mutex::new(signature)),
        Arc::new(Mutex::new(references)),
    ])
}
