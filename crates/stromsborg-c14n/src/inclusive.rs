#![forbid(unsafe_code)]

//! Inclusive Canonical XML 1.0 and 1.1 rules.
//!
//! Algorithm URIs: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315` and
//! `http://www.w3.org/2006/12/xml-c14n11` (plus `#WithComments` variants).
//!
//! The apex element renders its whole visible namespace scope; descendants
//! render their own declarations unless an output ancestor already rendered
//! the same binding. The variants differ only in which `xml:*` attributes
//! of the apex's ancestors are carried onto the apex.

use stromsborg_core::ns;
use stromsborg_xml::{Attribute, Namespace, StartElement};

use crate::context::C14nContext;
use crate::render::NsDecl;
use crate::C14nMode;

/// Declarations to render at the element whose candidate set is `candidates`.
pub fn namespaces_to_render(candidates: &[Namespace], ctx: &C14nContext) -> Vec<NsDecl> {
    let mut out = Vec::new();
    for ns in candidates {
        if ns.prefix == "xml" {
            continue;
        }
        if ns.prefix.is_empty() && ns.uri.is_empty() {
            if ctx.needs_default_undeclaration() {
                out.push(NsDecl::from(ns));
            }
            continue;
        }
        if ctx.rendered(&ns.prefix) == Some(ns.uri.as_str()) {
            continue;
        }
        out.push(NsDecl::from(ns));
    }
    out
}

/// `xml:*` attributes of the apex's ancestors that the apex does not
/// itself carry, filtered by the variant's inheritance rule.
pub fn inherited_xml_attributes(start: &StartElement, mode: C14nMode) -> Vec<Attribute> {
    start
        .attributes_in_scope()
        .into_iter()
        .skip(start.attributes.len())
        .filter(|attr| attr.name.namespace_uri == ns::XML)
        .filter(|attr| mode.inherits_xml_attribute(&attr.name.local_name))
        .collect()
}
