#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N) rules.
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//! With comments: `http://www.w3.org/2001/10/xml-exc-c14n#WithComments`
//!
//! Only "visibly utilized" namespace declarations are output. A namespace is
//! visibly utilized if:
//! 1. Its prefix is used by the element's tag name, OR
//! 2. Its prefix is used by one of the element's attributes, OR
//! 3. The prefix appears in the InclusiveNamespaces PrefixList
//!    (`#default` standing for the default namespace).
//!
//! `xml:*` attributes are never inherited.

use stromsborg_xml::{Namespace, StartElement};

use crate::context::C14nContext;
use crate::render::NsDecl;

/// Normalize an InclusiveNamespaces PrefixList token (`#default` → "").
pub fn prefix_list_entry(token: &str) -> &str {
    if token == "#default" {
        ""
    } else {
        token
    }
}

/// Declarations to render at `start`. The element's own frame must already
/// be on `ctx` so PrefixList entries resolve against its declarations.
pub fn namespaces_to_render(
    start: &StartElement,
    ctx: &C14nContext,
    inclusive_prefixes: &[String],
) -> Vec<NsDecl> {
    let mut utilized: Vec<Namespace> = Vec::new();
    let mut note = |prefix: &str, uri: &str| {
        if !utilized.iter().any(|ns| ns.prefix == prefix) {
            utilized.push(Namespace::new(prefix, uri));
        }
    };

    note(&start.name.prefix, &start.name.namespace_uri);
    for attr in &start.attributes {
        if !attr.name.prefix.is_empty() && attr.name.prefix != "xml" {
            note(&attr.name.prefix, &attr.name.namespace_uri);
        }
    }
    for token in inclusive_prefixes {
        let prefix = prefix_list_entry(token);
        if prefix == "xml" {
            continue;
        }
        match ctx.visible(prefix) {
            Some(uri) => note(prefix, uri),
            None if prefix.is_empty() => note("", ""),
            None => {}
        }
    }

    let mut out = Vec::new();
    for ns in &utilized {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Frame;
    use stromsborg_xml::{Attribute, QName};

    fn ctx_with(declared: Vec<Namespace>) -> C14nContext {
        let mut ctx = C14nContext::new();
        ctx.push(Frame {
            declared,
            rendered: Vec::new(),
        });
        ctx
    }

    #[test]
    fn test_only_utilized_prefixes() {
        let start = StartElement::new(QName::with_prefix("urn:a", "e", "a")).with_attribute(
            Attribute::new(QName::with_prefix("urn:b", "x", "b"), "1"),
        );
        let ctx = ctx_with(vec![
            Namespace::new("a", "urn:a"),
            Namespace::new("b", "urn:b"),
            Namespace::new("unused", "urn:u"),
        ]);
        let decls = namespaces_to_render(&start, &ctx, &[]);
        let prefixes: Vec<_> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, ["a", "b"]);
    }

    #[test]
    fn test_prefix_list_forces_declaration() {
        let start = StartElement::new(QName::local("e"));
        let ctx = ctx_with(vec![
            Namespace::new("unused", "urn:u"),
            Namespace::new("", "urn:d"),
        ]);
        let decls = namespaces_to_render(
            &start,
            &ctx,
            &["unused".to_string(), "#default".to_string(), "missing".to_string()],
        );
        // the element's own empty default binding is noted first and nothing
        // rendered one above it, so no xmlns="" is needed
        let pairs: Vec<_> = decls.iter().map(|d| (d.prefix.as_str(), d.uri.as_str())).collect();
        assert_eq!(pairs, [("unused", "urn:u")]);
    }

    #[test]
    fn test_default_namespace_of_element() {
        let start = StartElement::new(QName::new("urn:d", "e"));
        let ctx = ctx_with(vec![Namespace::new("", "urn:d")]);
        let decls = namespaces_to_render(&start, &ctx, &[]);
        assert_eq!(decls, vec![NsDecl { prefix: String::new(), uri: "urn:d".into() }]);
    }
}
