#![forbid(unsafe_code)]

//! `ds:SignedInfo` construction and canonicalization, shared by the
//! signing and verifying sides.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use stromsborg_c14n::{C14nMode, Canonicalizer};
use stromsborg_core::{ns, Error, Result};
use stromsborg_xml::{Attribute, Namespace, QName, StartElement, XmlEvent};

/// One digested element, ready to be listed in `SignedInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedReference {
    /// Value of the element's id attribute, without `#`.
    pub id: String,
    pub element: QName,
    /// Canonicalization applied as the reference's only transform.
    pub c14n: String,
    pub digest_method: String,
    pub digest_value: Vec<u8>,
}

/// References collected by the digesting processor for the signing
/// processor further down the same chain.
#[derive(Debug, Clone, Default)]
pub struct SignatureAccumulator(Arc<Mutex<Vec<SignedReference>>>);

impl SignatureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reference: SignedReference) {
        self.lock().push(reference);
    }

    pub fn references(&self) -> Vec<SignedReference> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SignedReference>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) fn ds(local: &str) -> QName {
    QName::with_prefix(ns::DSIG, local, "ds")
}

pub(crate) fn wsse(local: &str) -> QName {
    QName::with_prefix(ns::WSSE, local, "wsse")
}

fn algorithm_element(out: &mut Vec<XmlEvent>, local: &str, algorithm: &str) {
    out.push(XmlEvent::start(
        StartElement::new(ds(local)).with_attribute(Attribute::local(ns::attr::ALGORITHM, algorithm)),
    ));
    out.push(XmlEvent::end(ds(local)));
}

fn text_element(out: &mut Vec<XmlEvent>, name: QName, text: &str) {
    out.push(XmlEvent::start(StartElement::new(name.clone())));
    out.push(XmlEvent::text(text));
    out.push(XmlEvent::end(name));
}

/// Events of a `ds:SignedInfo` element listing `references`.
pub fn signed_info_events(
    c14n: &str,
    signature_method: &str,
    references: &[SignedReference],
) -> Vec<XmlEvent> {
    let mut out = vec![XmlEvent::start(StartElement::new(ds(ns::node::SIGNED_INFO)))];
    algorithm_element(&mut out, ns::node::CANONICALIZATION_METHOD, c14n);
    algorithm_element(&mut out, ns::node::SIGNATURE_METHOD, signature_method);
    for reference in references {
        out.push(XmlEvent::start(
            StartElement::new(ds(ns::node::REFERENCE))
                .with_attribute(Attribute::local(ns::attr::URI, &format!("#{}", reference.id))),
        ));
        out.push(XmlEvent::start(StartElement::new(ds(ns::node::TRANSFORMS))));
        algorithm_element(&mut out, ns::node::TRANSFORM, &reference.c14n);
        out.push(XmlEvent::end(ds(ns::node::TRANSFORMS)));
        algorithm_element(&mut out, ns::node::DIGEST_METHOD, &reference.digest_method);
        text_element(
            &mut out,
            ds(ns::node::DIGEST_VALUE),
            &STANDARD.encode(&reference.digest_value),
        );
        out.push(XmlEvent::end(ds(ns::node::REFERENCE)));
    }
    out.push(XmlEvent::end(ds(ns::node::SIGNED_INFO)));
    out
}

/// A complete `ds:Signature` element around `signed_info`.
pub fn signature_events(
    id: &str,
    signed_info: Vec<XmlEvent>,
    signature_value: &[u8],
    token_id: &str,
) -> Vec<XmlEvent> {
    let mut out = vec![XmlEvent::start(
        StartElement::new(ds(ns::node::SIGNATURE))
            .with_namespace("ds", ns::DSIG)
            .with_attribute(Attribute::local(ns::attr::ID, id)),
    )];
    out.extend(signed_info);
    text_element(&mut out, ds(ns::node::SIGNATURE_VALUE), &STANDARD.encode(signature_value));
    out.push(XmlEvent::start(StartElement::new(ds(ns::node::KEY_INFO))));
    out.push(XmlEvent::start(
        StartElement::new(wsse(ns::node::SECURITY_TOKEN_REFERENCE)).with_namespace("wsse", ns::WSSE),
    ));
    out.push(XmlEvent::start(
        StartElement::new(wsse(ns::node::WSSE_REFERENCE))
            .with_attribute(Attribute::local(ns::attr::URI, &format!("#{token_id}"))),
    ));
    out.push(XmlEvent::end(wsse(ns::node::WSSE_REFERENCE)));
    out.push(XmlEvent::end(wsse(ns::node::SECURITY_TOKEN_REFERENCE)));
    out.push(XmlEvent::end(ds(ns::node::KEY_INFO)));
    out.push(XmlEvent::end(ds(ns::node::SIGNATURE)));
    out
}

/// Canonicalize a `SignedInfo` subtree whose apex saw `in_scope`
/// namespaces.
///
/// The events need not be linked to a live scope: the apex is replaced by a
/// copy that declares everything it had in scope.
pub fn canonicalize_signed_info(
    events: &[XmlEvent],
    in_scope: &[Namespace],
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let (first, rest) = events
        .split_first()
        .ok_or_else(|| Error::InvalidSecurity("empty SignedInfo".into()))?;
    let apex = first
        .as_start()
        .ok_or_else(|| Error::InvalidSecurity("SignedInfo must start with an element".into()))?;
    let mut detached = StartElement::new(apex.name.clone());
    detached.attributes = apex.attributes.clone();
    detached.namespaces = in_scope.to_vec();

    let mut c14n = Canonicalizer::new(mode, inclusive_prefixes);
    let mut out = Vec::new();
    c14n.transform(&XmlEvent::start(detached), &mut out)?;
    for event in rest {
        c14n.transform(event, &mut out)?;
    }
    Ok(out)
}

/// Namespaces in scope inside a `ds:Signature` placed under an element
/// with `outer` in scope.
pub fn signature_scope(outer: &[Namespace]) -> Vec<Namespace> {
    let mut scope = vec![Namespace::new("ds", ns::DSIG)];
    scope.extend(outer.iter().filter(|n| n.prefix != "ds").cloned());
    scope
}
