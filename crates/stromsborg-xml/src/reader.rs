#![forbid(unsafe_code)]

//! Streaming reader producing [`XmlEvent`]s on top of `quick-xml`.
//!
//! Namespace resolution is done here rather than by `quick-xml`, through the
//! reader's own stack of open elements and, for nested fragments, through
//! the shared [`ScopeTree`] of the enclosing document.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use stromsborg_core::{ns, Error, Result};

use crate::event::{Characters, EndElement, StartElement, TextKind, XmlEvent};
use crate::name::{Attribute, Namespace, QName};
use crate::scope::{ElementId, ScopeTracker, ScopeTree};

const DEFAULT_TEXT_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct OpenElement {
    name: QName,
    namespaces: Vec<Namespace>,
    /// Synthetic fragment root: reported, but not linked into the scope tree.
    transparent: bool,
}

/// Pull reader over any buffered byte source.
pub struct XmlEventReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    tracker: ScopeTracker,
    base: Option<ElementId>,
    open: Vec<OpenElement>,
    pending: VecDeque<XmlEvent>,
    text_chunk_size: usize,
    fragment: bool,
    root_seen: bool,
    started: bool,
    finished: bool,
}

impl<R: BufRead> XmlEventReader<R> {
    /// Read a complete document with a fresh scope tree.
    pub fn new(source: R) -> Self {
        Self::with_scope(source, ScopeTree::new())
    }

    /// Read a complete document, registering elements in `tree`.
    pub fn with_scope(source: R, tree: ScopeTree) -> Self {
        Self::build(source, ScopeTracker::new(tree), None, false)
    }

    /// Read a fragment whose root element is a synthetic wrapper.
    ///
    /// The wrapper's events are reported but the wrapper is not linked into
    /// `tree`; its children become children of `parent`. The wrapper's
    /// namespace declarations still take part in prefix resolution. No
    /// `StartDocument`/`EndDocument` events are produced.
    pub fn nested(source: R, tree: ScopeTree, parent: Option<ElementId>) -> Self {
        Self::build(source, ScopeTracker::nested(tree, parent), parent, true)
    }

    fn build(source: R, tracker: ScopeTracker, base: Option<ElementId>, fragment: bool) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.expand_empty_elements(true);
        reader.trim_text(false);
        Self {
            reader,
            buf: Vec::new(),
            tracker,
            base,
            open: Vec::new(),
            pending: VecDeque::new(),
            text_chunk_size: DEFAULT_TEXT_CHUNK,
            fragment,
            root_seen: false,
            started: false,
            finished: false,
        }
    }

    /// Split text nodes into character events of at most `size` bytes.
    pub fn with_text_chunk_size(mut self, size: usize) -> Self {
        self.text_chunk_size = size.max(4);
        self
    }

    pub fn scope(&self) -> &ScopeTree {
        self.tracker.tree()
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Next event, or `None` once the input is exhausted.
    pub fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            if let Err(err) = self.read_more() {
                tracing::debug!(error = %err, depth = self.open.len(), "xml reader stopped");
                self.finished = true;
                self.pending.clear();
                return Err(err);
            }
        }
    }

    fn read_more(&mut self) -> Result<()> {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        let outcome = match self.reader.read_event_into(&mut buf) {
            Ok(event) => self.translate(event),
            Err(quick_xml::Error::Io(err)) => {
                let io = std::sync::Arc::try_unwrap(err)
                    .unwrap_or_else(|shared| std::io::Error::new(shared.kind(), shared.to_string()));
                Err(Error::from_io(io))
            }
            Err(err) => Err(Error::MalformedInput(format!(
                "{err} at byte {}",
                self.reader.buffer_position()
            ))),
        };
        self.buf = buf;
        outcome
    }

    fn translate(&mut self, event: Event<'_>) -> Result<()> {
        if !self.started {
            self.started = true;
            if !self.fragment {
                if let Event::Decl(decl) = &event {
                    let version = decl
                        .version()
                        .map_err(|e| Error::MalformedInput(e.to_string()))?;
                    let encoding = match decl.encoding() {
                        Some(enc) => Some(utf8(&enc.map_err(|e| Error::MalformedInput(e.to_string()))?)?.to_owned()),
                        None => None,
                    };
                    let standalone = match decl.standalone() {
                        Some(value) => {
                            let value = value.map_err(|e| Error::MalformedInput(e.to_string()))?;
                            Some(utf8(&value)? == "yes")
                        }
                        None => None,
                    };
                    self.pending.push_back(XmlEvent::StartDocument {
                        version: utf8(&version)?.to_owned(),
                        encoding,
                        standalone,
                    });
                    return Ok(());
                }
                self.pending.push_back(XmlEvent::StartDocument {
                    version: "1.0".into(),
                    encoding: None,
                    standalone: None,
                });
            }
        }

        match event {
            Event::Decl(_) => Err(Error::MalformedInput(
                "XML declaration is only allowed at the start of a document".into(),
            )),
            Event::Start(e) => self.start_element(&e),
            Event::Empty(e) => {
                self.start_element(&e)?;
                self.end_element(e.name().as_ref())
            }
            Event::End(e) => self.end_element(e.name().as_ref()),
            Event::Text(e) => {
                let raw = utf8(&e)?;
                let text = unescape(&normalize_newlines(raw))?.into_owned();
                self.push_text(&text, false);
                Ok(())
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = normalize_newlines(utf8(&raw)?).into_owned();
                self.push_text(&text, true);
                Ok(())
            }
            Event::Comment(e) => {
                let text = normalize_newlines(utf8(&e)?).into_owned();
                self.pending.push_back(XmlEvent::Comment(text));
                Ok(())
            }
            Event::PI(e) => {
                let raw = normalize_newlines(utf8(&e)?).into_owned();
                let (target, data) = match raw.find(|c: char| c.is_ascii_whitespace()) {
                    Some(pos) => (raw[..pos].to_owned(), raw[pos..].trim_start().to_owned()),
                    None => (raw, String::new()),
                };
                self.pending
                    .push_back(XmlEvent::ProcessingInstruction { target, data });
                Ok(())
            }
            Event::DocType(e) => {
                self.pending.push_back(XmlEvent::Dtd(utf8(&e)?.trim().to_owned()));
                Ok(())
            }
            Event::Eof => {
                if let Some(open) = self.open.last() {
                    return Err(Error::MalformedInput(format!(
                        "document ended inside <{}>",
                        open.name.qualified()
                    )));
                }
                if !self.fragment {
                    if !self.root_seen {
                        return Err(Error::MalformedInput("document has no root element".into()));
                    }
                    self.pending.push_back(XmlEvent::EndDocument);
                }
                self.finished = true;
                Ok(())
            }
        }
    }

    fn start_element(&mut self, e: &BytesStart<'_>) -> Result<()> {
        if self.open.is_empty() && self.root_seen && !self.fragment {
            return Err(Error::MalformedInput("document has more than one root element".into()));
        }
        let raw_name = utf8(e.name().as_ref())?.to_owned();
        let (prefix, local) = split_qname(&raw_name);

        let mut namespaces = Vec::new();
        let mut raw_attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Error::MalformedInput(err.to_string()))?;
            let key = utf8(attr.key.as_ref())?.to_owned();
            let value = attribute_value(&attr.value)?;
            if key == "xmlns" {
                namespaces.push(Namespace::new("", &value));
            } else if let Some(declared) = key.strip_prefix("xmlns:") {
                if value.is_empty() {
                    return Err(Error::MalformedInput(format!(
                        "prefix '{declared}' cannot be undeclared"
                    )));
                }
                namespaces.push(Namespace::new(declared, &value));
            } else {
                raw_attrs.push((key, value));
            }
        }

        let name = QName::with_prefix(&self.resolve(prefix, &namespaces)?, local, prefix);
        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (key, value) in raw_attrs {
            let (attr_prefix, attr_local) = split_qname(&key);
            let uri = if attr_prefix.is_empty() {
                String::new()
            } else {
                self.resolve(attr_prefix, &namespaces)?
            };
            attributes.push(Attribute {
                name: QName::with_prefix(&uri, attr_local, attr_prefix),
                value,
            });
        }

        let mut start = StartElement::new(name);
        start.attributes = attributes;
        start.namespaces = namespaces;

        let transparent = self.fragment && self.open.is_empty() && !self.root_seen;
        self.root_seen = true;
        if !transparent {
            self.tracker.enter(&mut start);
        }
        self.open.push(OpenElement {
            name: start.name.clone(),
            namespaces: start.namespaces.clone(),
            transparent,
        });
        self.pending.push_back(XmlEvent::StartElement(start));
        Ok(())
    }

    fn end_element(&mut self, raw_name: &[u8]) -> Result<()> {
        let raw_name = utf8(raw_name)?;
        let open = self
            .open
            .pop()
            .ok_or_else(|| Error::MalformedInput(format!("unexpected end element </{raw_name}>")))?;
        if open.name.qualified() != raw_name {
            return Err(Error::MalformedInput(format!(
                "end element </{raw_name}> does not match <{}>",
                open.name.qualified()
            )));
        }
        if !open.transparent {
            self.tracker.leave();
        }
        self.pending
            .push_back(XmlEvent::EndElement(EndElement { name: open.name }));
        Ok(())
    }

    fn resolve(&self, prefix: &str, own: &[Namespace]) -> Result<String> {
        match prefix {
            "xml" => return Ok(ns::XML.to_owned()),
            "xmlns" => {
                return Err(Error::MalformedInput("the xmlns prefix is reserved".into()));
            }
            _ => {}
        }
        if let Some(decl) = own.iter().find(|d| d.prefix == prefix) {
            return Ok(decl.uri.clone());
        }
        for open in self.open.iter().rev() {
            if let Some(decl) = open.namespaces.iter().find(|d| d.prefix == prefix) {
                return Ok(decl.uri.clone());
            }
        }
        if let Some(uri) = self.tracker.tree().resolve_prefix(self.base, prefix) {
            return Ok(uri);
        }
        if prefix.is_empty() {
            Ok(String::new())
        } else {
            Err(Error::MalformedInput(format!("unbound namespace prefix '{prefix}'")))
        }
    }

    fn push_text(&mut self, text: &str, cdata: bool) {
        let mut rest = text;
        while !rest.is_empty() {
            let mut cut = rest.len().min(self.text_chunk_size);
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            let (head, tail) = rest.split_at(cut);
            let mut chars = Characters::new(head);
            if cdata {
                chars.kind = TextKind::CData;
            }
            self.pending.push_back(XmlEvent::Characters(chars));
            rest = tail;
        }
    }
}

impl<R: BufRead> Iterator for XmlEventReader<R> {
    type Item = Result<XmlEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::MalformedInput(format!("invalid UTF-8: {e}")))
}

fn split_qname(raw: &str) -> (&str, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (prefix, local),
        None => ("", raw),
    }
}

fn unescape(raw: &str) -> Result<Cow<'_, str>> {
    quick_xml::escape::unescape(raw).map_err(|e| Error::MalformedInput(e.to_string()))
}

/// Line-end normalization: CRLF and lone CR become LF.
fn normalize_newlines(raw: &str) -> Cow<'_, str> {
    if raw.contains('\r') {
        Cow::Owned(raw.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Attribute-value normalization: literal whitespace becomes a space,
/// character references are kept.
fn attribute_value(raw: &[u8]) -> Result<String> {
    let normalized = normalize_newlines(utf8(raw)?).replace(['\t', '\n'], " ");
    Ok(unescape(&normalized)?.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_events;

    #[test]
    fn test_resolves_prefixes_and_default_namespace() {
        let events = parse_events(
            r#"<a:root xmlns:a="urn:a" xmlns="urn:d"><child a:attr="1" plain="2"/></a:root>"#,
        )
        .unwrap();
        let child = events[2].as_start().unwrap();
        assert!(child.name.is("urn:d", "child"));
        assert_eq!(child.attribute("urn:a", "attr"), Some("1"));
        assert_eq!(child.attribute("", "plain"), Some("2"));
        assert!(events[3].is_end_of("urn:d", "child"));
    }

    #[test]
    fn test_start_document_synthesized() {
        let events = parse_events("<r/>").unwrap();
        assert!(matches!(events[0], XmlEvent::StartDocument { .. }));
        assert!(events.last().unwrap().is_end_document());
    }

    #[test]
    fn test_declaration_is_reported() {
        let events = parse_events(r#"<?xml version="1.0" encoding="UTF-8"?><r/>"#).unwrap();
        match &events[0] {
            XmlEvent::StartDocument { version, encoding, .. } => {
                assert_eq!(version, "1.0");
                assert_eq!(encoding.as_deref(), Some("UTF-8"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unbound_prefix_is_malformed() {
        let err = parse_events("<p:r/>").unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_unclosed_document_is_malformed() {
        let err = parse_events("<r><a></a>").unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_parent_links_and_release() {
        let mut reader = XmlEventReader::new(&b"<a xmlns:p=\"urn:p\"><b/></a>"[..]);
        let tree = reader.scope().clone();
        let mut starts = Vec::new();
        while let Some(event) = reader.next_event().unwrap() {
            if let XmlEvent::StartElement(start) = &event {
                assert_eq!(tree.live_count(), starts.len() + 1);
                if starts.len() == 1 {
                    assert_eq!(start.namespaces_in_scope(), vec![Namespace::new("p", "urn:p")]);
                }
                starts.push(start.clone());
            }
        }
        assert_eq!(starts[1].parent(), starts[0].element_id());
        assert_eq!(tree.live_count(), 0);
    }

    #[test]
    fn test_text_is_chunked_on_char_boundaries() {
        let xml = format!("<r>{}</r>", "é".repeat(10));
        let mut reader = XmlEventReader::new(xml.as_bytes()).with_text_chunk_size(5);
        let mut text = String::new();
        let mut chunks = 0;
        while let Some(event) = reader.next_event().unwrap() {
            if let XmlEvent::Characters(chars) = event {
                assert!(chars.text.len() <= 6);
                text.push_str(&chars.text);
                chunks += 1;
            }
        }
        assert_eq!(text, "é".repeat(10));
        assert!(chunks > 1);
    }

    #[test]
    fn test_newlines_and_attribute_normalization() {
        let events = parse_events("<r a=\"x\ty&#xA;z\">l1\r\nl2</r>").unwrap();
        assert_eq!(events[1].as_start().unwrap().attribute("", "a"), Some("x y\nz"));
        assert_eq!(events[2].as_characters().unwrap().text, "l1\nl2");
    }

    #[test]
    fn test_nested_fragment_links_to_parent_scope() {
        let mut outer = XmlEventReader::new(&b"<env xmlns:s=\"urn:s\"><body>"[..]);
        let mut body = None;
        for _ in 0..3 {
            if let Some(XmlEvent::StartElement(start)) = outer.next_event().unwrap() {
                if start.name.local_name == "body" {
                    body = Some(start);
                }
            }
        }
        let body = body.unwrap();
        let fragment = b"<w:wrap xmlns:w=\"urn:w\" xmlns:s=\"urn:s\"><s:item/></w:wrap>";
        let mut nested = XmlEventReader::nested(&fragment[..], outer.scope().clone(), body.element_id());
        let wrapper = nested.next_event().unwrap().unwrap();
        assert!(wrapper.is_start_of("urn:w", "wrap"));
        let item = nested.next_event().unwrap().unwrap();
        let item = item.as_start().unwrap();
        assert!(item.name.is("urn:s", "item"));
        assert_eq!(item.parent(), body.element_id());
        assert_eq!(item.namespaces_in_scope(), vec![Namespace::new("s", "urn:s")]);
        assert!(nested.next_event().unwrap().unwrap().is_end_of("urn:s", "item"));
        assert!(nested.next_event().unwrap().unwrap().is_end_of("urn:w", "wrap"));
        assert!(nested.next_event().unwrap().is_none());
    }
}
