#![forbid(unsafe_code)]

//! Inbound signature verification.
//!
//! [`SignatureInputProcessor`] reads a `ds:Signature` as it streams by,
//! checks the `SignatureValue` over the canonical `SignedInfo` and hands
//! the references to a [`ReferenceVerificationInputProcessor`] it inserts
//! into the chain. That processor digests each referenced element when it
//! arrives and compares against the signed `DigestValue`. A signature has
//! to precede the elements it covers.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use stromsborg_c14n::{C14nMode, Canonicalizer};
use stromsborg_chain::{
    AlgorithmUsage, InputProcessor, InputProcessorChain, KeyUsage, Phase, ProcessorDescriptor,
    ProcessorKind, SecurityEvent,
};
use stromsborg_core::{algorithm, ns, Error, Result};
use stromsborg_crypto::DigestWriter;
use stromsborg_xml::{Namespace, QName, XmlEvent};

use crate::signed_info::canonicalize_signed_info;

/// One `ds:Reference` of a verified `SignedInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpec {
    /// Referenced id, without `#`.
    pub id: String,
    pub c14n: String,
    pub inclusive_prefixes: Vec<String>,
    pub digest_method: String,
    pub digest_value: Vec<u8>,
}

/// Everything read out of a `ds:Signature`.
#[derive(Debug, Default)]
struct ParsedSignature {
    signed_info: Vec<XmlEvent>,
    signed_info_scope: Vec<Namespace>,
    c14n: Option<String>,
    c14n_prefixes: Vec<String>,
    signature_method: Option<String>,
    references: Vec<PendingReference>,
    signature_value: Option<String>,
    token_reference: Option<String>,
    key_name: Option<String>,
}

#[derive(Debug, Default)]
struct PendingReference {
    uri: Option<String>,
    transforms: Vec<String>,
    prefixes: Vec<String>,
    digest_method: Option<String>,
    digest_value: Option<String>,
}

/// Where the parser is inside `ds:Signature`.
#[derive(Debug, Default)]
struct SignatureParser {
    parsed: ParsedSignature,
    in_signed_info: bool,
    in_c14n_method: bool,
    in_transform: bool,
    text: String,
}

impl SignatureParser {
    fn event(&mut self, event: &XmlEvent) {
        if self.in_signed_info {
            self.parsed.signed_info.push(event.clone());
        }
        match event {
            XmlEvent::StartElement(start) => {
                self.text.clear();
                let name = &start.name;
                let algorithm = start.attribute("", ns::attr::ALGORITHM).map(str::to_owned);
                if name.is(ns::DSIG, ns::node::SIGNED_INFO) {
                    self.in_signed_info = true;
                    self.parsed.signed_info_scope = start.namespaces_in_scope();
                    self.parsed.signed_info = vec![event.clone()];
                } else if name.is(ns::DSIG, ns::node::CANONICALIZATION_METHOD) {
                    self.in_c14n_method = true;
                    self.parsed.c14n = algorithm;
                } else if name.is(ns::DSIG, ns::node::SIGNATURE_METHOD) {
                    self.parsed.signature_method = algorithm;
                } else if name.is(ns::DSIG, ns::node::REFERENCE) {
                    self.parsed.references.push(PendingReference {
                        uri: start.attribute("", ns::attr::URI).map(str::to_owned),
                        ..PendingReference::default()
                    });
                } else if name.is(ns::DSIG, ns::node::TRANSFORM) {
                    self.in_transform = true;
                    if let (Some(reference), Some(algorithm)) =
                        (self.parsed.references.last_mut(), algorithm)
                    {
                        reference.transforms.push(algorithm);
                    }
                } else if name.is(ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES) {
                    let prefixes: Vec<String> = start
                        .attribute("", ns::attr::PREFIX_LIST)
                        .unwrap_or_default()
                        .split_whitespace()
                        .map(str::to_owned)
                        .collect();
                    if self.in_c14n_method {
                        self.parsed.c14n_prefixes = prefixes;
                    } else if let (true, Some(reference)) =
                        (self.in_transform, self.parsed.references.last_mut())
                    {
                        reference.prefixes = prefixes;
                    }
                } else if name.is(ns::DSIG, ns::node::DIGEST_METHOD) {
                    if let Some(reference) = self.parsed.references.last_mut() {
                        reference.digest_method = algorithm;
                    }
                } else if name.is(ns::WSSE, ns::node::WSSE_REFERENCE) {
                    self.parsed.token_reference =
                        start.attribute("", ns::attr::URI).map(str::to_owned);
                }
            }
            XmlEvent::Characters(chars) => self.text.push_str(&chars.text),
            XmlEvent::EndElement(end) => {
                let name = &end.name;
                let text = std::mem::take(&mut self.text);
                if name.is(ns::DSIG, ns::node::SIGNED_INFO) {
                    self.in_signed_info = false;
                } else if name.is(ns::DSIG, ns::node::CANONICALIZATION_METHOD) {
                    self.in_c14n_method = false;
                } else if name.is(ns::DSIG, ns::node::TRANSFORM) {
                    self.in_transform = false;
                } else if name.is(ns::DSIG, ns::node::DIGEST_VALUE) {
                    if let Some(reference) = self.parsed.references.last_mut() {
                        reference.digest_value = Some(text);
                    }
                } else if name.is(ns::DSIG, ns::node::SIGNATURE_VALUE) {
                    self.parsed.signature_value = Some(text);
                } else if name.is(ns::DSIG, ns::node::KEY_NAME) {
                    self.parsed.key_name = Some(text.trim().to_owned());
                }
            }
            _ => {}
        }
    }
}

fn decode(text: &str, what: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

fn resolve_reference(reference: PendingReference) -> Result<ReferenceSpec> {
    let uri = reference
        .uri
        .ok_or_else(|| Error::InvalidSecurity("Reference without URI".into()))?;
    let id = uri
        .strip_prefix('#')
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidSecurity(format!("unsupported reference URI {uri:?}")))?
        .to_owned();
    let mut c14n = None;
    for transform in &reference.transforms {
        if C14nMode::from_uri(transform).is_none() {
            return Err(Error::UnsupportedAlgorithm(format!("transform: {transform}")));
        }
        c14n = Some(transform.clone());
    }
    let digest_method = reference
        .digest_method
        .ok_or_else(|| Error::InvalidSecurity(format!("reference {id} has no DigestMethod")))?;
    let digest_value = reference
        .digest_value
        .ok_or_else(|| Error::InvalidSecurity(format!("reference {id} has no DigestValue")))?;
    Ok(ReferenceSpec {
        digest_value: decode(&digest_value, "DigestValue")?,
        id,
        c14n: c14n.unwrap_or_else(|| algorithm::C14N.to_owned()),
        inclusive_prefixes: reference.prefixes,
        digest_method,
    })
}

fn pull(chain: &mut InputProcessorChain, header: bool) -> Result<XmlEvent> {
    if header {
        chain.pull_header_event()
    } else {
        chain.pull_event()
    }
}

/// Verifies every `ds:Signature` in the stream.
pub struct SignatureInputProcessor {
    descriptor: ProcessorDescriptor,
    default_token: Option<String>,
    replay: VecDeque<XmlEvent>,
    verified: usize,
}

impl Default for SignatureInputProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureInputProcessor {
    pub fn new() -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(
                ProcessorKind::SignatureVerification,
                Phase::Processing,
            ),
            default_token: None,
            replay: VecDeque::new(),
            verified: 0,
        }
    }

    /// Token used when a signature carries no `KeyInfo`.
    pub fn with_default_token(mut self, token_id: &str) -> Self {
        self.default_token = Some(token_id.to_owned());
        self
    }

    /// Signatures verified so far.
    pub fn verified(&self) -> usize {
        self.verified
    }

    fn next(&mut self, chain: &mut InputProcessorChain, header: bool) -> Result<XmlEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Ok(event);
        }
        let event = pull(chain, header)?;
        if !event.is_start_of(ns::DSIG, ns::node::SIGNATURE) {
            return Ok(event);
        }

        let mut parser = SignatureParser::default();
        let mut open = 0usize;
        let mut next = event;
        loop {
            match &next {
                XmlEvent::StartElement(_) => open += 1,
                XmlEvent::EndElement(_) => open -= 1,
                XmlEvent::EndDocument => {
                    return Err(Error::MalformedInput("document ended inside ds:Signature".into()))
                }
                _ => {}
            }
            parser.event(&next);
            self.replay.push_back(next);
            if open == 0 {
                break;
            }
            next = pull(chain, header)?;
        }

        self.verify(parser.parsed, chain)?;
        self.replay
            .pop_front()
            .ok_or_else(|| Error::InternalFailure("signature replay is empty".into()))
    }

    fn verify(&mut self, parsed: ParsedSignature, chain: &mut InputProcessorChain) -> Result<()> {
        let security = Arc::clone(chain.security_context());
        if parsed.signed_info.is_empty() {
            return Err(Error::InvalidSecurity("ds:Signature without SignedInfo".into()));
        }
        let c14n_uri = parsed
            .c14n
            .ok_or_else(|| Error::InvalidSecurity("SignedInfo has no CanonicalizationMethod".into()))?;
        let c14n = C14nMode::require(&c14n_uri)?;
        let signature_method = parsed
            .signature_method
            .ok_or_else(|| Error::InvalidSecurity("SignedInfo has no SignatureMethod".into()))?;
        let value = parsed
            .signature_value
            .ok_or_else(|| Error::InvalidSecurity("ds:Signature has no SignatureValue".into()))?;
        let value = decode(&value, "SignatureValue")?;
        let references = parsed
            .references
            .into_iter()
            .map(resolve_reference)
            .collect::<Result<Vec<_>>>()?;
        if references.is_empty() {
            return Err(Error::InvalidSecurity("SignedInfo has no Reference".into()));
        }
        let token_id = parsed
            .token_reference
            .map(|uri| uri.trim_start_matches('#').to_owned())
            .or(parsed.key_name)
            .or_else(|| self.default_token.clone())
            .ok_or_else(|| Error::InvalidSecurity("no key information for signature".into()))?;

        let algorithm = security.crypto().signature(&signature_method)?;
        let key = security.signing_key(&token_id, &signature_method, KeyUsage::Verification)?;
        let canonical = canonicalize_signed_info(
            &parsed.signed_info,
            &parsed.signed_info_scope,
            c14n,
            &parsed.c14n_prefixes,
        )?;
        if !algorithm.verify(&key, &canonical, &value)? {
            return Err(Error::FailedCheck("signature value does not verify".into()));
        }

        security.register_event(SecurityEvent::AlgorithmUsed {
            algorithm: c14n_uri,
            usage: AlgorithmUsage::Canonicalization,
        });
        security.register_event(SecurityEvent::AlgorithmUsed {
            algorithm: signature_method.clone(),
            usage: AlgorithmUsage::Signature,
        });
        security.register_event(SecurityEvent::SignatureVerified {
            signature_method,
            token: token_id,
        });
        self.verified += 1;
        tracing::debug!(references = references.len(), "signature value verified");

        chain.insert(ReferenceVerificationInputProcessor::new(references))?;
        Ok(())
    }
}

impl InputProcessor for SignatureInputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.next(chain, true)
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.next(chain, false)
    }
}

struct ActiveDigest {
    index: usize,
    element: QName,
    canonicalizer: Canonicalizer,
    digest: DigestWriter,
}

/// Digests the elements one verified `SignedInfo` refers to.
///
/// Sits in front of decryption so that it sees plaintext. Stays in the
/// chain to the end of the document: a second element carrying a signed id
/// is a failed check.
pub struct ReferenceVerificationInputProcessor {
    descriptor: ProcessorDescriptor,
    references: Vec<ReferenceSpec>,
    seen: Vec<bool>,
    active: Vec<ActiveDigest>,
}

impl ReferenceVerificationInputProcessor {
    pub fn new(references: Vec<ReferenceSpec>) -> Self {
        let seen = vec![false; references.len()];
        Self {
            descriptor: ProcessorDescriptor::new(
                ProcessorKind::ReferenceVerification,
                Phase::Processing,
            )
            .before(ProcessorKind::Decryption),
            references,
            seen,
            active: Vec::new(),
        }
    }

    pub fn unverified(&self) -> Vec<&str> {
        self.references
            .iter()
            .zip(&self.seen)
            .filter(|(_, seen)| !**seen)
            .map(|(r, _)| r.id.as_str())
            .collect()
    }

    fn begin(&mut self, event: &XmlEvent, chain: &InputProcessorChain) -> Result<()> {
        let Some(start) = event.as_start() else {
            return Ok(());
        };
        let Some(id) = start.id_attribute() else {
            return Ok(());
        };
        let Some(index) = self.references.iter().position(|r| r.id == id) else {
            return Ok(());
        };
        if self.seen[index] {
            return Err(Error::FailedCheck(format!("signed id {id} occurs more than once")));
        }
        self.seen[index] = true;
        let reference = &self.references[index];
        let mode = C14nMode::require(&reference.c14n)?;
        let digest = DigestWriter::new(chain.security_context().crypto().digest(&reference.digest_method)?);
        tracing::debug!(element = %start.name, id = %id, "digesting referenced element");
        self.active.push(ActiveDigest {
            index,
            element: start.name.clone(),
            canonicalizer: Canonicalizer::new(mode, &reference.inclusive_prefixes),
            digest,
        });
        Ok(())
    }

    fn digest(&mut self, event: &XmlEvent, chain: &InputProcessorChain) -> Result<()> {
        for active in &mut self.active {
            active.canonicalizer.transform(event, &mut active.digest)?;
        }
        let (complete, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|a| a.canonicalizer.is_complete());
        self.active = open;
        let security = chain.security_context();
        for done in complete {
            let reference = &self.references[done.index];
            if done.digest.finalize() != reference.digest_value {
                return Err(Error::FailedCheck(format!(
                    "digest of {} ({}) does not match",
                    reference.id, done.element
                )));
            }
            security.register_event(SecurityEvent::AlgorithmUsed {
                algorithm: reference.digest_method.clone(),
                usage: AlgorithmUsage::Digest,
            });
            security.register_event(SecurityEvent::ElementSigned {
                element: done.element,
                reference: reference.id.clone(),
            });
            tracing::debug!(id = %reference.id, "reference verified");
        }
        Ok(())
    }

    fn next(&mut self, chain: &mut InputProcessorChain, header: bool) -> Result<XmlEvent> {
        let event = pull(chain, header)?;
        self.begin(&event, chain)?;
        if !self.active.is_empty() {
            self.digest(&event, chain)?;
        }
        Ok(event)
    }
}

impl InputProcessor for ReferenceVerificationInputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.next(chain, true)
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.next(chain, false)
    }

    fn finish(&mut self, chain: &mut InputProcessorChain) -> Result<()> {
        if let Some(open) = self.active.first() {
            return Err(Error::MalformedInput(format!(
                "signed element {} was never closed",
                open.element
            )));
        }
        let missing = self.unverified();
        if !missing.is_empty() {
            return Err(Error::FailedCheck(format!(
                "signed elements not found: {}",
                missing.join(", ")
            )));
        }
        chain.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use stromsborg_chain::processors::DocumentReaderProcessor;
    use stromsborg_chain::{CollectingEventSink, SecurityContext, SymmetricKeyToken};
    use stromsborg_xml::writer::events_to_string;

    use crate::sign::tests::sign_document;

    const SOAP: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Header><wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"/></s:Header><s:Body><op>value</op></s:Body></s:Envelope>"#;

    fn context(sink: Arc<CollectingEventSink>) -> Arc<SecurityContext> {
        let ctx = SecurityContext::default().with_event_sink(sink);
        ctx.register_token(Arc::new(SymmetricKeyToken::new("hmac", b"secret key".to_vec())))
            .unwrap();
        Arc::new(ctx)
    }

    fn body() -> Vec<QName> {
        vec![QName::new(ns::SOAP11, "Body")]
    }

    fn verify(xml: String, ctx: Arc<SecurityContext>) -> Result<String> {
        let mut chain = InputProcessorChain::new(ctx);
        chain.insert(DocumentReaderProcessor::new(io::Cursor::new(xml.into_bytes())))?;
        chain.insert(SignatureInputProcessor::new())?;
        let mut events = Vec::new();
        loop {
            let event = chain.pull_event()?;
            let end = event.is_end_document();
            events.push(event);
            if end {
                break;
            }
        }
        chain.finish()?;
        events_to_string(&events)
    }

    #[test]
    fn test_signed_document_verifies() {
        let signed = sign_document(SOAP, body(), context(Arc::new(CollectingEventSink::new()))).unwrap();
        let sink = Arc::new(CollectingEventSink::new());
        let out = verify(signed.clone(), context(sink.clone())).unwrap();
        assert!(out.contains("<op>value</op>"));
        let events = sink.take();
        assert!(events
            .iter()
            .any(|e| matches!(e, SecurityEvent::SignatureVerified { token, .. } if token == "hmac")));
        assert!(events
            .iter()
            .any(|e| matches!(e, SecurityEvent::ElementSigned { element, .. } if element.is(ns::SOAP11, "Body"))));
    }

    #[test]
    fn test_tampered_body_fails_digest() {
        let signed = sign_document(SOAP, body(), context(Arc::new(CollectingEventSink::new()))).unwrap();
        let tampered = signed.replace("<op>value</op>", "<op>other</op>");
        let err = verify(tampered, context(Arc::new(CollectingEventSink::new()))).unwrap_err();
        assert!(matches!(err, Error::FailedCheck(_)), "{err:?}");
    }

    #[test]
    fn test_tampered_signed_info_fails_signature() {
        let signed = sign_document(SOAP, body(), context(Arc::new(CollectingEventSink::new()))).unwrap();
        let tampered = signed.replace(algorithm::SHA256, algorithm::SHA1);
        assert_ne!(tampered, signed);
        let err = verify(tampered, context(Arc::new(CollectingEventSink::new()))).unwrap_err();
        assert!(matches!(err, Error::FailedCheck(_)), "{err:?}");
    }

    #[test]
    fn test_wrong_key_fails() {
        let signed = sign_document(SOAP, body(), context(Arc::new(CollectingEventSink::new()))).unwrap();
        let ctx = SecurityContext::default();
        ctx.register_token(Arc::new(SymmetricKeyToken::new("hmac", b"another key".to_vec())))
            .unwrap();
        let err = verify(signed, Arc::new(ctx)).unwrap_err();
        assert!(matches!(err, Error::FailedCheck(_)));
    }

    #[test]
    fn test_removed_signed_element_fails_finish() {
        let signed = sign_document(SOAP, body(), context(Arc::new(CollectingEventSink::new()))).unwrap();
        let start = signed.find("<s:Body").unwrap();
        let end = signed.find("</s:Body>").unwrap() + "</s:Body>".len();
        let mut stripped = signed.clone();
        stripped.replace_range(start..end, "");
        let err = verify(stripped, context(Arc::new(CollectingEventSink::new()))).unwrap_err();
        assert!(matches!(err, Error::FailedCheck(_)));
    }

    #[test]
    fn test_duplicate_signed_id_fails() {
        let signed = sign_document(
            r#"<root><data Id="d1">x</data></root>"#,
            vec![QName::local("data")],
            context(Arc::new(CollectingEventSink::new())),
        )
        .unwrap();
        let doubled = signed.replace("</root>", r#"<data Id="d1">x</data></root>"#);
        let err = verify(doubled, context(Arc::new(CollectingEventSink::new()))).unwrap_err();
        assert!(matches!(err, Error::FailedCheck(_)));
    }

    #[test]
    fn test_non_fragment_uri_is_rejected() {
        let reference = PendingReference {
            uri: Some("http://example.com/doc".into()),
            digest_method: Some(algorithm::SHA256.into()),
            digest_value: Some("AQID".into()),
            ..PendingReference::default()
        };
        assert!(matches!(resolve_reference(reference), Err(Error::InvalidSecurity(_))));
    }

    #[test]
    fn test_non_c14n_transform_is_unsupported() {
        let reference = PendingReference {
            uri: Some("#a".into()),
            transforms: vec!["http://www.w3.org/TR/1999/REC-xslt-19991116".into()],
            digest_method: Some(algorithm::SHA256.into()),
            digest_value: Some("AQID".into()),
            ..PendingReference::default()
        };
        assert!(matches!(resolve_reference(reference), Err(Error::UnsupportedAlgorithm(_))));
    }
}
