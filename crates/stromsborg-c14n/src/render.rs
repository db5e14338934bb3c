#![forbid(unsafe_code)]

//! Ordering and rendering of namespace declarations and attributes.

use std::cmp::Ordering;
use std::io::{self, Write};

use stromsborg_xml::{Attribute, Namespace};

use crate::escape;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI.
    pub uri: String,
}

impl NsDecl {
    pub fn render<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        if self.prefix.is_empty() {
            sink.write_all(b" xmlns=\"")?;
        } else {
            write!(sink, " xmlns:{}=\"", self.prefix)?;
        }
        escape::write_attr(sink, &self.uri)?;
        sink.write_all(b"\"")
    }
}

impl From<&Namespace> for NsDecl {
    fn from(ns: &Namespace) -> Self {
        Self {
            prefix: ns.prefix.clone(),
            uri: ns.uri.clone(),
        }
    }
}

impl From<NsDecl> for Namespace {
    fn from(decl: NsDecl) -> Self {
        Namespace {
            prefix: decl.prefix,
            uri: decl.uri,
        }
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> Ordering {
        // The default namespace sorts first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// The namespace URI of the attribute ("" for no namespace).
    pub ns_uri: String,
    pub local_name: String,
    /// The qualified name (prefix:local or just local).
    pub qualified_name: String,
    pub value: String,
}

impl Attr {
    pub fn render<W: Write + ?Sized>(&self, sink: &mut W) -> io::Result<()> {
        write!(sink, " {}=\"", self.qualified_name)?;
        escape::write_attr(sink, &self.value)?;
        sink.write_all(b"\"")
    }
}

impl From<&Attribute> for Attr {
    fn from(attr: &Attribute) -> Self {
        Self {
            ns_uri: attr.name.namespace_uri.clone(),
            local_name: attr.name.local_name.clone(),
            qualified_name: attr.name.qualified(),
            value: attr.value.clone(),
        }
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> Ordering {
        // No-namespace attributes first, sorted by local name; the rest by
        // (namespace URI, local name).
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then(self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stromsborg_xml::QName;

    #[test]
    fn test_namespace_order() {
        let mut decls = vec![
            NsDecl::from(&Namespace::new("b", "urn:b")),
            NsDecl::from(&Namespace::new("", "urn:d")),
            NsDecl::from(&Namespace::new("a", "urn:a")),
        ];
        decls.sort();
        let prefixes: Vec<_> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, ["", "a", "b"]);
    }

    #[test]
    fn test_attribute_order_ignores_prefix() {
        let mut attrs = vec![
            Attr::from(&Attribute::new(QName::with_prefix("urn:z", "a", "p"), "1")),
            Attr::from(&Attribute::new(QName::with_prefix("urn:a", "b", "z"), "2")),
            Attr::from(&Attribute::local("c", "3")),
        ];
        attrs.sort();
        let names: Vec<_> = attrs.iter().map(|a| a.qualified_name.as_str()).collect();
        assert_eq!(names, ["c", "z:b", "p:a"]);
    }
}
