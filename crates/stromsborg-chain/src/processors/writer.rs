#![forbid(unsafe_code)]

//! The sink at the end of every output chain.

use std::io::Write;

use stromsborg_core::{Error, Result};
use stromsborg_xml::{XmlEvent, XmlEventWriter};

use crate::output::OutputProcessorChain;
use crate::processor::{OutputProcessor, Phase, ProcessorDescriptor, ProcessorKind};

/// Serializes whatever reaches the end of the chain.
pub struct DocumentWriterProcessor<W: Write + Send> {
    descriptor: ProcessorDescriptor,
    writer: Option<XmlEventWriter<W>>,
}

impl<W: Write + Send> DocumentWriterProcessor<W> {
    pub fn new(sink: W) -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(
                ProcessorKind::DocumentWriter,
                Phase::PostProcessing,
            ),
            writer: Some(XmlEventWriter::new(sink)),
        }
    }

    /// Close the writer and hand back the sink. Fails on unclosed elements.
    pub fn take_sink(&mut self) -> Result<W> {
        self.writer
            .take()
            .ok_or_else(|| Error::InternalFailure("document writer already closed".into()))?
            .into_inner()
    }

    fn writer(&mut self) -> Result<&mut XmlEventWriter<W>> {
        self.writer
            .as_mut()
            .ok_or_else(|| Error::InternalFailure("document writer already closed".into()))
    }
}

impl<W: Write + Send> OutputProcessor for DocumentWriterProcessor<W> {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, event: XmlEvent, _chain: &mut OutputProcessorChain) -> Result<()> {
        self.writer()?.write_event(&event)
    }

    fn finish(&mut self, _chain: &mut OutputProcessorChain) -> Result<()> {
        match self.writer.as_ref().map(XmlEventWriter::depth) {
            Some(0) | None => Ok(()),
            Some(depth) => Err(Error::MalformedInput(format!(
                "document ended with {depth} open element(s)"
            ))),
        }
    }
}
