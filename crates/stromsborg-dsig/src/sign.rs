#![forbid(unsafe_code)]

//! Outbound signing.
//!
//! [`SignatureReferenceOutputProcessor`] canonicalizes and digests each
//! secure part while it streams by. [`SignatureOutputProcessor`] sits
//! after it, holds back the content of the document element and, when the
//! document element closes, emits `ds:Signature` ahead of the held-back
//! content so that verifiers meet the signature before the signed parts.

use std::collections::VecDeque;

use stromsborg_c14n::{C14nMode, Canonicalizer};
use stromsborg_chain::{
    AlgorithmUsage, KeyUsage, OutputProcessor, OutputProcessorChain, Phase, ProcessorDescriptor,
    ProcessorKind, SecurityEvent,
};
use stromsborg_core::{ns, Error, Result};
use stromsborg_crypto::DigestWriter;
use stromsborg_xml::{Attribute, Namespace, QName, XmlEvent};

use crate::signed_info::{
    canonicalize_signed_info, signature_events, signature_scope, signed_info_events,
    SignatureAccumulator, SignedReference,
};

struct ActiveDigest {
    id: String,
    element: QName,
    canonicalizer: Canonicalizer,
    digest: DigestWriter,
}

/// Digests every configured element as it passes.
pub struct SignatureReferenceOutputProcessor {
    descriptor: ProcessorDescriptor,
    parts: Vec<QName>,
    c14n: C14nMode,
    digest_method: String,
    accumulator: SignatureAccumulator,
    active: Vec<ActiveDigest>,
}

impl SignatureReferenceOutputProcessor {
    pub fn new(
        parts: Vec<QName>,
        c14n: &str,
        digest_method: &str,
        accumulator: SignatureAccumulator,
    ) -> Result<Self> {
        Ok(Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::SignatureReference, Phase::Processing),
            parts,
            c14n: C14nMode::require(c14n)?,
            digest_method: digest_method.to_owned(),
            accumulator,
            active: Vec::new(),
        })
    }

    fn begin(&mut self, event: &mut XmlEvent, chain: &OutputProcessorChain) -> Result<()> {
        let Some(start) = event.as_start_mut() else {
            return Ok(());
        };
        if !self.parts.contains(&start.name) {
            return Ok(());
        }
        let id = match start.id_attribute() {
            Some(id) => id.to_owned(),
            None => {
                let id = format!(
                    "id-{}",
                    hex::encode(chain.security_context().crypto().random_key(8))
                );
                if start.resolve_prefix("wsu").as_deref() != Some(ns::WSU) {
                    start.namespaces.push(Namespace::new("wsu", ns::WSU));
                }
                start.set_attribute(Attribute::new(
                    QName::with_prefix(ns::WSU, ns::attr::ID, "wsu"),
                    &id,
                ));
                id
            }
        };
        let digest = DigestWriter::new(chain.security_context().crypto().digest(&self.digest_method)?);
        tracing::debug!(element = %start.name, id = %id, "digesting signed part");
        self.active.push(ActiveDigest {
            id,
            element: start.name.clone(),
            canonicalizer: Canonicalizer::new(self.c14n, &[]),
            digest,
        });
        Ok(())
    }

    /// Feed `event` to every open digest, recording those that complete.
    fn digest(&mut self, event: &XmlEvent, chain: &OutputProcessorChain) -> Result<()> {
        for active in &mut self.active {
            active.canonicalizer.transform(event, &mut active.digest)?;
        }
        let (complete, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|a| a.canonicalizer.is_complete());
        self.active = open;
        for done in complete {
            let written = done.digest.written();
            let reference = SignedReference {
                id: done.id,
                element: done.element,
                c14n: self.c14n.uri().to_owned(),
                digest_method: self.digest_method.clone(),
                digest_value: done.digest.finalize(),
            };
            tracing::debug!(id = %reference.id, bytes = written, "signed part digested");
            chain.security_context().register_event(SecurityEvent::AlgorithmUsed {
                algorithm: self.digest_method.clone(),
                usage: AlgorithmUsage::Digest,
            });
            self.accumulator.push(reference);
        }
        Ok(())
    }
}

impl OutputProcessor for SignatureReferenceOutputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, mut event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        self.begin(&mut event, chain)?;
        if !self.active.is_empty() {
            self.digest(&event, chain)?;
        }
        chain.push_event(event)
    }

    fn finish(&mut self, chain: &mut OutputProcessorChain) -> Result<()> {
        if let Some(open) = self.active.first() {
            return Err(Error::MalformedInput(format!(
                "signed element {} was never closed",
                open.element
            )));
        }
        chain.finish()
    }
}

/// Emits `ds:Signature` over the references collected by
/// [`SignatureReferenceOutputProcessor`].
///
/// The signature is placed as the first child of `wsse:Security` when the
/// document has one, otherwise as the first child of the document element.
/// Everything between that point and the end of the document element is
/// held in memory until the signature can be computed.
pub struct SignatureOutputProcessor {
    descriptor: ProcessorDescriptor,
    accumulator: SignatureAccumulator,
    expected: Vec<QName>,
    c14n: C14nMode,
    signature_method: String,
    token_id: String,
    held: VecDeque<XmlEvent>,
    /// Index into `held` where the signature goes, with the namespaces in
    /// scope there.
    placement: Option<(usize, Vec<Namespace>)>,
    holding: bool,
    signed: bool,
}

impl SignatureOutputProcessor {
    pub fn new(
        accumulator: SignatureAccumulator,
        expected: Vec<QName>,
        c14n: &str,
        signature_method: &str,
        token_id: &str,
    ) -> Result<Self> {
        Ok(Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::Signature, Phase::Processing)
                .after(ProcessorKind::SignatureReference),
            accumulator,
            expected,
            c14n: C14nMode::require(c14n)?,
            signature_method: signature_method.to_owned(),
            token_id: token_id.to_owned(),
            held: VecDeque::new(),
            placement: None,
            holding: false,
            signed: false,
        })
    }

    fn sign(&mut self, chain: &mut OutputProcessorChain) -> Result<Vec<XmlEvent>> {
        let references = self.accumulator.references();
        for expected in &self.expected {
            if !references.iter().any(|r| &r.element == expected) {
                return Err(Error::FailedCheck(format!(
                    "signed part {expected} not found in document"
                )));
            }
        }
        if references.is_empty() {
            return Err(Error::FailedCheck("nothing to sign".into()));
        }

        let security = std::sync::Arc::clone(chain.security_context());
        let algorithm = security.crypto().signature(&self.signature_method)?;
        let key = security.signing_key(&self.token_id, &self.signature_method, KeyUsage::Signature)?;

        let signed_info = signed_info_events(self.c14n.uri(), &self.signature_method, &references);
        let outer = self.placement.as_ref().map(|(_, scope)| scope.as_slice()).unwrap_or(&[]);
        let canonical = canonicalize_signed_info(&signed_info, &signature_scope(outer), self.c14n, &[])?;
        let value = algorithm.sign(&key, &canonical)?;

        security.register_event(SecurityEvent::AlgorithmUsed {
            algorithm: self.c14n.uri().to_owned(),
            usage: AlgorithmUsage::Canonicalization,
        });
        security.register_event(SecurityEvent::AlgorithmUsed {
            algorithm: self.signature_method.clone(),
            usage: AlgorithmUsage::Signature,
        });
        for reference in &references {
            security.register_event(SecurityEvent::ElementSigned {
                element: reference.element.clone(),
                reference: reference.id.clone(),
            });
        }
        let id = format!("SIG-{}", hex::encode(security.crypto().random_key(8)));
        tracing::debug!(id = %id, references = references.len(), "signature computed");
        Ok(signature_events(&id, signed_info, &value, &self.token_id))
    }
}

impl OutputProcessor for SignatureOutputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        let depth = chain.document_context().depth;
        if !self.holding {
            if let (XmlEvent::StartElement(start), 1, false) = (&event, depth, self.signed) {
                self.placement = Some((0, start.namespaces_in_scope()));
                self.holding = true;
            }
            return chain.push_event(event);
        }

        match &event {
            XmlEvent::StartElement(start) if start.name.is(ns::WSSE, ns::node::SECURITY) => {
                let index = self.held.len() + 1;
                self.placement = Some((index, start.namespaces_in_scope()));
            }
            XmlEvent::EndElement(_) if depth == 1 => {
                let signature = self.sign(chain)?;
                let index = self.placement.as_ref().map_or(0, |(index, _)| *index);
                let tail = self.held.split_off(index.min(self.held.len()));
                for held in self.held.drain(..) {
                    chain.push_event(held)?;
                }
                for part in signature {
                    chain.push_event(part)?;
                }
                for held in tail {
                    chain.push_event(held)?;
                }
                self.holding = false;
                self.signed = true;
                return chain.push_event(event);
            }
            _ => {}
        }
        self.held.push_back(event);
        Ok(())
    }

    fn finish(&mut self, chain: &mut OutputProcessorChain) -> Result<()> {
        if !self.signed {
            return Err(Error::FailedCheck("document ended before it was signed".into()));
        }
        chain.finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use stromsborg_chain::processors::DocumentWriterProcessor;
    use stromsborg_chain::{CollectingEventSink, SecurityContext, SymmetricKeyToken};
    use stromsborg_core::algorithm;
    use stromsborg_xml::XmlEventReader;

    pub(crate) fn sign_document(xml: &str, parts: Vec<QName>, ctx: Arc<SecurityContext>) -> Result<String> {
        let accumulator = SignatureAccumulator::new();
        let writer = Arc::new(Mutex::new(DocumentWriterProcessor::new(Vec::new())));
        let mut chain = OutputProcessorChain::new(ctx);
        chain.insert_shared(writer.clone())?;
        chain.insert(SignatureOutputProcessor::new(
            accumulator.clone(),
            parts.clone(),
            algorithm::EXC_C14N,
            algorithm::HMAC_SHA256,
            "hmac",
        )?)?;
        chain.insert(SignatureReferenceOutputProcessor::new(
            parts,
            algorithm::EXC_C14N,
            algorithm::SHA256,
            accumulator,
        )?)?;
        let mut reader = XmlEventReader::new(xml.as_bytes());
        while let Some(event) = reader.next_event()? {
            chain.push_event(event)?;
        }
        chain.finish()?;
        let bytes = writer.lock().unwrap().take_sink()?;
        Ok(String::from_utf8(bytes).unwrap())
    }

    fn context(sink: Arc<CollectingEventSink>) -> Arc<SecurityContext> {
        let ctx = SecurityContext::default().with_event_sink(sink);
        ctx.register_token(Arc::new(SymmetricKeyToken::new("hmac", b"secret key".to_vec())))
            .unwrap();
        Arc::new(ctx)
    }

    #[test]
    fn test_signature_precedes_signed_body() {
        let sink = Arc::new(CollectingEventSink::new());
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Header><wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"><t/></wsse:Security></s:Header><s:Body><op/></s:Body></s:Envelope>"#;
        let out = sign_document(xml, vec![QName::new(ns::SOAP11, "Body")], context(sink.clone())).unwrap();

        let security = out.find("<wsse:Security").unwrap();
        let signature = out.find("<ds:Signature").unwrap();
        let token = out.find("<t>").unwrap();
        let body = out.find("<s:Body").unwrap();
        assert!(security < signature && signature < token && token < body, "{out}");
        assert!(out.contains(r#"<s:Body xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" wsu:Id="id-"#));
        assert!(sink
            .take()
            .iter()
            .any(|e| matches!(e, SecurityEvent::ElementSigned { .. })));
    }

    #[test]
    fn test_plain_document_keeps_existing_id() {
        let sink = Arc::new(CollectingEventSink::new());
        let out = sign_document(
            r#"<root><data Id="d1">x</data></root>"#,
            vec![QName::local("data")],
            context(sink),
        )
        .unwrap();
        assert!(out.starts_with(r#"<?xml version="1.0"?><root><ds:Signature"#), "{out}");
        assert!(out.contains(r##"URI="#d1""##));
        assert!(out.ends_with(r#"<data Id="d1">x</data></root>"#));
    }

    #[test]
    fn test_missing_part_is_failed_check() {
        let sink = Arc::new(CollectingEventSink::new());
        let err = sign_document("<root><a/></root>", vec![QName::local("b")], context(sink)).unwrap_err();
        assert!(matches!(err, Error::FailedCheck(_)));
    }
}
