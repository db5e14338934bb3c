#![forbid(unsafe_code)]

//! Push-driven chain for outbound messages.

use std::sync::{Arc, Mutex};

use stromsborg_core::{Error, Result};
use stromsborg_xml::XmlEvent;

use crate::context::{lock, DocumentContext, SecurityContext};
use crate::list::ProcessorList;
use crate::processor::{OutputProcessor, ProcessorDescriptor, ProcessorId};

pub type SharedOutputProcessor = Arc<Mutex<dyn OutputProcessor>>;

/// Outbound chain. Events enter at index 0 and flow towards the document
/// writer at the end of the list.
pub struct OutputProcessorChain {
    list: ProcessorList<dyn OutputProcessor>,
    document: DocumentContext,
    security: Arc<SecurityContext>,
    aborted: bool,
}

impl OutputProcessorChain {
    pub fn new(security: Arc<SecurityContext>) -> Self {
        Self::with_document(security, DocumentContext::new())
    }

    pub fn with_document(security: Arc<SecurityContext>, document: DocumentContext) -> Self {
        Self {
            list: ProcessorList::new(),
            document,
            security,
            aborted: false,
        }
    }

    pub fn insert<P: OutputProcessor + 'static>(&mut self, processor: P) -> Result<ProcessorId> {
        self.insert_shared(Arc::new(Mutex::new(processor)))
    }

    pub fn insert_shared(&mut self, processor: SharedOutputProcessor) -> Result<ProcessorId> {
        let descriptor = lock(&processor).descriptor().clone();
        self.list.insert(descriptor, processor)
    }

    pub fn remove(&mut self, id: ProcessorId) -> bool {
        self.list.remove(id)
    }

    /// A sub-chain whose events enter right after `at`.
    pub fn fork(&self, at: ProcessorId) -> Result<OutputProcessorChain> {
        tracing::debug!(fork_point = %at, "forking output chain");
        Ok(Self {
            list: self.list.fork(at)?,
            document: self.document.clone(),
            security: Arc::clone(&self.security),
            aborted: false,
        })
    }

    pub fn descriptors(&self) -> Vec<ProcessorDescriptor> {
        self.list.descriptors()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn document_context(&self) -> &DocumentContext {
        &self.document
    }

    pub fn document_context_mut(&mut self) -> &mut DocumentContext {
        &mut self.document
    }

    pub fn security_context(&self) -> &Arc<SecurityContext> {
        &self.security
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Hand `event` to the next processor. Called by the driver for every
    /// document event and by processors to forward.
    pub fn push_event(&mut self, event: XmlEvent) -> Result<()> {
        self.guard()?;
        let top_level = !self.list.is_active();
        if top_level {
            if let XmlEvent::StartElement(_) = event {
                self.document.depth += 1;
            }
        }
        let closes = top_level && matches!(event, XmlEvent::EndElement(_));

        let index = self.list.next_index();
        let Some(processor) = self.list.enter(index) else {
            self.aborted = true;
            return Err(Error::InternalFailure(
                "output chain has no document writer".into(),
            ));
        };
        tracing::trace!(?event, index, "pushed");
        let result = lock(&processor).handle_event(event, self);
        self.list.leave();
        self.settle(&result);
        if closes && result.is_ok() {
            self.document.depth = self.document.depth.saturating_sub(1);
        }
        result
    }

    /// Run every processor's end-of-stream checks in list order.
    pub fn finish(&mut self) -> Result<()> {
        self.guard()?;
        let index = self.list.next_index();
        let Some(processor) = self.list.enter(index) else {
            return Ok(());
        };
        let result = lock(&processor).finish(self);
        self.list.leave();
        self.settle(&result);
        result
    }

    fn guard(&mut self) -> Result<()> {
        if self.aborted {
            return Err(Error::InternalFailure("chain aborted".into()));
        }
        if let Err(err) = self.security.cancellation().check() {
            self.aborted = true;
            return Err(err);
        }
        Ok(())
    }

    fn settle(&mut self, result: &Result<()>) {
        if let Err(err) = result {
            if !self.aborted {
                tracing::debug!(error = %err, "output chain aborted");
            }
            self.aborted = true;
        }
    }
}
