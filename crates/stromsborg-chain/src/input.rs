#![forbid(unsafe_code)]

//! Pull-driven chain for inbound messages.

use std::sync::{Arc, Mutex};

use stromsborg_core::{Error, Result};
use stromsborg_xml::XmlEvent;

use crate::context::{lock, DocumentContext, SecurityContext};
use crate::list::ProcessorList;
use crate::processor::{InputProcessor, ProcessorDescriptor, ProcessorId};

/// Shared handle to an input processor.
pub type SharedInputProcessor = Arc<Mutex<dyn InputProcessor>>;

/// Inbound chain. Index 0 is invoked first (closest to the consumer); the
/// document reader at the end of the list is the event source.
pub struct InputProcessorChain {
    list: ProcessorList<dyn InputProcessor>,
    document: DocumentContext,
    security: Arc<SecurityContext>,
    aborted: bool,
}

#[derive(Clone, Copy)]
enum Call {
    Header,
    Body,
    Finish,
}

impl InputProcessorChain {
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

    pub fn insert<P: InputProcessor + 'static>(&mut self, processor: P) -> Result<ProcessorId> {
        self.insert_shared(Arc::new(Mutex::new(processor)))
    }

    pub fn insert_shared(&mut self, processor: SharedInputProcessor) -> Result<ProcessorId> {
        let descriptor: ProcessorDescriptor = lock(&processor).descriptor().clone();
        self.list.insert(descriptor, processor)
    }

    pub fn remove(&mut self, id: ProcessorId) -> bool {
        self.list.remove(id)
    }

    /// A sub-chain that continues right after `at`, sharing processors and
    /// the security context but with its own cursor and document context.
    pub fn fork(&self, at: ProcessorId) -> Result<InputProcessorChain> {
        tracing::debug!(fork_point = %at, "forking input chain");
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

    pub fn into_document_context(self) -> DocumentContext {
        self.document
    }

    pub fn security_context(&self) -> &Arc<SecurityContext> {
        &self.security
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn pull_header_event(&mut self) -> Result<XmlEvent> {
        self.call(Call::Header).map(|event| event.unwrap_or(XmlEvent::EndDocument))
    }

    pub fn pull_event(&mut self) -> Result<XmlEvent> {
        self.call(Call::Body).map(|event| event.unwrap_or(XmlEvent::EndDocument))
    }

    /// Run every processor's end-of-stream checks in list order.
    pub fn finish(&mut self) -> Result<()> {
        self.call(Call::Finish).map(|_| ())
    }

    fn call(&mut self, call: Call) -> Result<Option<XmlEvent>> {
        if self.aborted {
            return Err(Error::InternalFailure("chain aborted".into()));
        }
        if let Err(err) = self.security.cancellation().check() {
            self.aborted = true;
            return Err(err);
        }
        let index = self.list.next_index();
        let Some(processor) = self.list.enter(index) else {
            return match call {
                Call::Finish => Ok(None),
                Call::Header | Call::Body => {
                    self.aborted = true;
                    Err(Error::InternalFailure(
                        "input chain has no event source".into(),
                    ))
                }
            };
        };
        let result = {
            let mut processor = lock(&processor);
            match call {
                Call::Header => processor.handle_header_event(self).map(Some),
                Call::Body => processor.handle_event(self).map(Some),
                Call::Finish => processor.finish(self).map(|_| None),
            }
        };
        self.list.leave();
        if let Err(err) = &result {
            if !self.aborted {
                tracing::debug!(error = %err, "input chain aborted");
            }
            self.aborted = true;
        }
        if let Ok(Some(event)) = &result {
            tracing::trace!(?event, index, "pulled");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Phase, ProcessorKind};
    use std::collections::VecDeque;

    /// Event source for tests.
    struct Source {
        descriptor: ProcessorDescriptor,
        events: VecDeque<XmlEvent>,
    }

    impl Source {
        fn new(names: &[&str]) -> Self {
            Self {
                descriptor: ProcessorDescriptor::new(
                    ProcessorKind::DocumentReader,
                    Phase::PostProcessing,
                ),
                events: names.iter().map(|n| XmlEvent::text(n)).collect(),
            }
        }
    }

    impl InputProcessor for Source {
        fn descriptor(&self) -> &ProcessorDescriptor {
            &self.descriptor
        }

        fn handle_event(&mut self, _chain: &mut InputProcessorChain) -> Result<XmlEvent> {
            Ok(self.events.pop_front().unwrap_or(XmlEvent::EndDocument))
        }
    }

    /// Uppercases text, removing itself after `limit` events.
    struct Upper {
        descriptor: ProcessorDescriptor,
        limit: usize,
        seen: usize,
    }

    impl Upper {
        fn new(limit: usize) -> Self {
            Self {
                descriptor: ProcessorDescriptor::new(ProcessorKind::Rewrite, Phase::Processing),
                limit,
                seen: 0,
            }
        }
    }

    impl InputProcessor for Upper {
        fn descriptor(&self) -> &ProcessorDescriptor {
            &self.descriptor
        }

        fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
            let event = chain.pull_event()?;
            self.seen += 1;
            if self.seen == self.limit {
                chain.remove(self.descriptor.id);
            }
            Ok(match event.as_characters() {
                Some(c) => XmlEvent::text(&c.text.to_uppercase()),
                None => event,
            })
        }
    }

    /// Fails every call.
    struct Failing(ProcessorDescriptor);

    impl InputProcessor for Failing {
        fn descriptor(&self) -> &ProcessorDescriptor {
            &self.0
        }

        fn handle_event(&mut self, _chain: &mut InputProcessorChain) -> Result<XmlEvent> {
            Err(Error::FailedCheck("boom".into()))
        }
    }

    fn texts(chain: &mut InputProcessorChain, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| match chain.pull_event().unwrap() {
                XmlEvent::Characters(c) => c.text,
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_pull_through_processors() {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        chain.insert(Source::new(&["a", "b"])).unwrap();
        chain.insert(Upper::new(usize::MAX)).unwrap();
        assert_eq!(texts(&mut chain, 2), ["A", "B"]);
        assert!(chain.pull_event().unwrap().is_end_document());
        chain.finish().unwrap();
    }

    #[test]
    fn test_self_removal_mid_iteration_never_skips_or_repeats() {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        chain.insert(Source::new(&["a", "b", "c", "d"])).unwrap();
        chain.insert(Upper::new(2)).unwrap();
        assert_eq!(texts(&mut chain, 4), ["A", "B", "c", "d"]);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_fork_continues_after_fork_point() {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        chain.insert(Source::new(&["a", "b"])).unwrap();
        let upper = chain.insert(Upper::new(usize::MAX)).unwrap();
        let mut sub = chain.fork(upper).unwrap();
        // the sub-chain bypasses the upper-casing processor
        assert_eq!(texts(&mut sub, 1), ["a"]);
        assert_eq!(texts(&mut chain, 1), ["B"]);
    }

    #[test]
    fn test_error_aborts_chain() {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        chain.insert(Source::new(&["a"])).unwrap();
        chain
            .insert(Failing(ProcessorDescriptor::new(
                ProcessorKind::PassThrough,
                Phase::Processing,
            )))
            .unwrap();
        assert!(matches!(chain.pull_event(), Err(Error::FailedCheck(_))));
        assert!(chain.is_aborted());
        assert!(matches!(chain.pull_event(), Err(Error::InternalFailure(_))));
    }

    #[test]
    fn test_cancellation_is_checked_on_pull() {
        let security = Arc::new(SecurityContext::default());
        let mut chain = InputProcessorChain::new(Arc::clone(&security));
        chain.insert(Source::new(&["a"])).unwrap();
        security.cancellation().cancel();
        assert!(matches!(chain.pull_event(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_empty_chain_has_no_source() {
        let mut chain = InputProcessorChain::new(Arc::new(SecurityContext::default()));
        assert!(chain.pull_event().is_err());
    }
}
