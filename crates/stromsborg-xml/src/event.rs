#![forbid(unsafe_code)]

//! XML events.

use crate::name::{Attribute, Namespace, QName};
use crate::scope::{push_unseen_attributes, push_unseen_namespaces, ElementId, ScopeLink};
use stromsborg_core::ns;

/// One step of an XML document.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    StartDocument {
        version: String,
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    StartElement(StartElement),
    EndElement(EndElement),
    Characters(Characters),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    Dtd(String),
    EndDocument,
}

impl XmlEvent {
    pub fn start(start: StartElement) -> Self {
        XmlEvent::StartElement(start)
    }

    pub fn end(name: QName) -> Self {
        XmlEvent::EndElement(EndElement { name })
    }

    pub fn text(text: &str) -> Self {
        XmlEvent::Characters(Characters::new(text))
    }

    pub fn as_start(&self) -> Option<&StartElement> {
        match self {
            XmlEvent::StartElement(start) => Some(start),
            _ => None,
        }
    }

    pub fn as_start_mut(&mut self) -> Option<&mut StartElement> {
        match self {
            XmlEvent::StartElement(start) => Some(start),
            _ => None,
        }
    }

    pub fn as_end(&self) -> Option<&EndElement> {
        match self {
            XmlEvent::EndElement(end) => Some(end),
            _ => None,
        }
    }

    pub fn as_characters(&self) -> Option<&Characters> {
        match self {
            XmlEvent::Characters(chars) => Some(chars),
            _ => None,
        }
    }

    pub fn is_start_of(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.as_start().is_some_and(|s| s.name.is(namespace_uri, local_name))
    }

    pub fn is_end_of(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.as_end().is_some_and(|e| e.name.is(namespace_uri, local_name))
    }

    pub fn is_end_document(&self) -> bool {
        matches!(self, XmlEvent::EndDocument)
    }
}

/// A start element with its own attributes and namespace declarations.
///
/// Events built by application code start out unlinked; readers and the
/// outbound writer link them into a [`crate::ScopeTree`] so that
/// [`StartElement::namespaces_in_scope`] can see the ancestors.
#[derive(Debug, Clone)]
pub struct StartElement {
    pub name: QName,
    /// Attributes in document order. Namespace declarations are not listed here.
    pub attributes: Vec<Attribute>,
    /// Declarations made at this element, in document order.
    pub namespaces: Vec<Namespace>,
    scope: Option<ScopeLink>,
}

impl StartElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            scope: None,
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push(Namespace::new(prefix, uri));
        self
    }

    /// Value of the attribute `{namespace_uri}local_name`.
    pub fn attribute(&self, namespace_uri: &str, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace_uri, local_name))
            .map(|a| a.value.as_str())
    }

    /// Set (or replace) an attribute.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => existing.value = attribute.value,
            None => self.attributes.push(attribute),
        }
    }

    /// The element's identifier: `Id`, `wsu:Id` or `xml:id`, in that order.
    pub fn id_attribute(&self) -> Option<&str> {
        self.attribute("", "Id")
            .or_else(|| self.attribute(ns::WSU, "Id"))
            .or_else(|| self.attribute(ns::XML, "id"))
    }

    pub(crate) fn link(&mut self, link: ScopeLink) {
        self.scope = Some(link);
    }

    pub fn scope(&self) -> Option<&ScopeLink> {
        self.scope.as_ref()
    }

    pub fn element_id(&self) -> Option<ElementId> {
        self.scope.as_ref().map(|l| l.id)
    }

    /// The nearest enclosing start element, if linked.
    pub fn parent(&self) -> Option<ElementId> {
        self.scope.as_ref().and_then(|l| l.parent)
    }

    /// Namespace declarations visible at this element, nearest first, one
    /// per prefix.
    pub fn namespaces_in_scope(&self) -> Vec<Namespace> {
        let mut out = Vec::new();
        push_unseen_namespaces(&mut out, &self.namespaces);
        if let Some(link) = &self.scope {
            push_unseen_namespaces(&mut out, &link.tree.namespaces_in_scope(link.parent));
        }
        out
    }

    /// Attributes visible at this element, nearest first, one per name.
    pub fn attributes_in_scope(&self) -> Vec<Attribute> {
        let mut out = Vec::new();
        push_unseen_attributes(&mut out, &self.attributes);
        if let Some(link) = &self.scope {
            push_unseen_attributes(&mut out, &link.tree.attributes_in_scope(link.parent));
        }
        out
    }

    /// Resolve a prefix against this element and its ancestors.
    pub fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(ns::XML.to_owned());
        }
        if let Some(ns) = self.namespaces.iter().find(|ns| ns.prefix == prefix) {
            return Some(ns.uri.clone());
        }
        let link = self.scope.as_ref()?;
        link.tree.resolve_prefix(link.parent, prefix)
    }
}

impl PartialEq for StartElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.name.prefix == other.name.prefix
            && self.attributes == other.attributes
            && self.namespaces == other.namespaces
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndElement {
    pub name: QName,
}

/// How a run of character data appeared in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Text,
    CData,
    /// Only whitespace.
    Whitespace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Characters {
    pub text: String,
    pub kind: TextKind,
}

impl Characters {
    pub fn new(text: &str) -> Self {
        let kind = if text.chars().all(char::is_whitespace) {
            TextKind::Whitespace
        } else {
            TextKind::Text
        };
        Self {
            text: text.to_owned(),
            kind,
        }
    }

    pub fn is_whitespace(&self) -> bool {
        self.kind == TextKind::Whitespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{ScopeTracker, ScopeTree};

    #[test]
    fn test_unlinked_element_sees_own_declarations_only() {
        let start = StartElement::new(QName::with_prefix("urn:a", "x", "a"))
            .with_namespace("a", "urn:a");
        assert_eq!(start.namespaces_in_scope(), vec![Namespace::new("a", "urn:a")]);
        assert_eq!(start.resolve_prefix("b"), None);
        assert_eq!(start.resolve_prefix("xml").as_deref(), Some(ns::XML));
    }

    #[test]
    fn test_attributes_in_scope_nearest_wins() {
        let mut tracker = ScopeTracker::new(ScopeTree::new());
        let lang = QName::with_prefix(ns::XML, "lang", "xml");
        let mut outer = StartElement::new(QName::local("outer"))
            .with_attribute(Attribute::new(lang.clone(), "en"))
            .with_attribute(Attribute::local("a", "1"));
        tracker.enter(&mut outer);
        let mut inner = StartElement::new(QName::local("inner"))
            .with_attribute(Attribute::new(lang.clone(), "sv"));
        tracker.enter(&mut inner);

        let attrs = inner.attributes_in_scope();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0], Attribute::new(lang, "sv"));
        assert_eq!(attrs[1], Attribute::local("a", "1"));
    }

    #[test]
    fn test_id_attribute_lookup_order() {
        let start = StartElement::new(QName::local("x"))
            .with_attribute(Attribute::new(QName::with_prefix(ns::WSU, "Id", "wsu"), "w"));
        assert_eq!(start.id_attribute(), Some("w"));
        let start = start.with_attribute(Attribute::local("Id", "plain"));
        assert_eq!(start.id_attribute(), Some("plain"));
    }

    #[test]
    fn test_characters_kind() {
        assert!(Characters::new(" \n\t").is_whitespace());
        assert_eq!(Characters::new("a b").kind, TextKind::Text);
    }
}
