#![forbid(unsafe_code)]

//! Event-at-a-time canonicalizer.

use std::io::Write;

use stromsborg_core::Result;
use stromsborg_xml::{Attribute, StartElement, XmlEvent};

use crate::context::{C14nContext, Frame};
use crate::render::Attr;
use crate::{escape, exclusive, inclusive, C14nMode};

/// Where the canonicalizer stands relative to the document element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Before,
    Inside,
    After,
}

/// Streaming canonicalizer for one document or subtree.
///
/// Feed it the events of the subtree in order; output is written
/// immediately and nothing is buffered beyond the open-element stack.
#[derive(Debug)]
pub struct Canonicalizer {
    mode: C14nMode,
    inclusive_prefixes: Vec<String>,
    context: C14nContext,
    position: Position,
}

impl Canonicalizer {
    pub fn new(mode: C14nMode, inclusive_prefixes: &[String]) -> Self {
        Self {
            mode,
            inclusive_prefixes: inclusive_prefixes
                .iter()
                .map(|p| exclusive::prefix_list_entry(p).to_owned())
                .collect(),
            context: C14nContext::new(),
            position: Position::Before,
        }
    }

    pub fn mode(&self) -> C14nMode {
        self.mode
    }

    /// Number of currently open elements of the subtree.
    pub fn depth(&self) -> usize {
        self.context.depth()
    }

    /// Whether a complete subtree has been written.
    pub fn is_complete(&self) -> bool {
        self.position == Position::After
    }

    /// Canonicalize one event into `sink`.
    pub fn transform<W: Write + ?Sized>(&mut self, event: &XmlEvent, sink: &mut W) -> Result<()> {
        match event {
            XmlEvent::StartElement(start) => self.start_element(start, sink),
            XmlEvent::EndElement(end) => {
                self.context.pop()?;
                write!(sink, "</{}>", end.name.qualified())?;
                if self.context.is_empty() {
                    self.position = Position::After;
                }
                Ok(())
            }
            XmlEvent::Characters(chars) => {
                if self.position == Position::Inside {
                    escape::write_text(sink, &chars.text)?;
                }
                Ok(())
            }
            XmlEvent::Comment(text) => {
                if self.mode.with_comments() {
                    self.write_outside_markup(sink, |sink| {
                        write!(sink, "<!--{text}-->")
                    })?;
                }
                Ok(())
            }
            XmlEvent::ProcessingInstruction { target, data } => {
                self.write_outside_markup(sink, |sink| {
                    write!(sink, "<?{target}")?;
                    if !data.is_empty() {
                        sink.write_all(b" ")?;
                        escape::write_pi(sink, data)?;
                    }
                    sink.write_all(b"?>")
                })?;
                Ok(())
            }
            XmlEvent::StartDocument { .. } | XmlEvent::Dtd(_) | XmlEvent::EndDocument => Ok(()),
        }
    }

    // Comments and PIs outside the document element are separated from it
    // by a single line feed.
    fn write_outside_markup<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        body: impl FnOnce(&mut W) -> std::io::Result<()>,
    ) -> std::io::Result<()> {
        match self.position {
            Position::Before => {
                body(sink)?;
                sink.write_all(b"\n")
            }
            Position::Inside => body(sink),
            Position::After => {
                sink.write_all(b"\n")?;
                body(sink)
            }
        }
    }

    fn start_element<W: Write + ?Sized>(
        &mut self,
        start: &StartElement,
        sink: &mut W,
    ) -> Result<()> {
        let apex = self.context.is_empty();
        self.position = Position::Inside;

        let declared = if apex {
            start.namespaces_in_scope()
        } else {
            start.namespaces.clone()
        };

        let mut decls = if self.mode.is_exclusive() {
            self.context.push(Frame {
                declared,
                rendered: Vec::new(),
            });
            exclusive::namespaces_to_render(start, &self.context, &self.inclusive_prefixes)
        } else {
            let decls = inclusive::namespaces_to_render(&declared, &self.context);
            self.context.push(Frame {
                declared,
                rendered: Vec::new(),
            });
            decls
        };
        decls.sort();
        if let Some(frame) = self.context.current_mut() {
            frame.rendered = decls.iter().cloned().map(Into::into).collect();
        }

        let mut attrs: Vec<Attr> = start.attributes.iter().map(Attr::from).collect();
        if apex {
            let inherited: Vec<Attribute> = inclusive::inherited_xml_attributes(start, self.mode);
            attrs.extend(inherited.iter().map(Attr::from));
        }
        attrs.sort();

        write!(sink, "<{}", start.name.qualified())?;
        for decl in &decls {
            decl.render(sink)?;
        }
        for attr in &attrs {
            attr.render(sink)?;
        }
        sink.write_all(b">")?;
        Ok(())
    }
}

/// Canonicalize an already-collected event sequence.
pub fn canonicalize_events(
    events: &[XmlEvent],
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let mut c14n = Canonicalizer::new(mode, inclusive_prefixes);
    let mut out = Vec::new();
    for event in events {
        c14n.transform(event, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize;
    use stromsborg_core::Error;
    use stromsborg_xml::XmlEventReader;

    fn c14n(xml: &str, mode: C14nMode) -> String {
        String::from_utf8(canonicalize(xml, mode, &[]).unwrap()).unwrap()
    }

    /// Canonicalize only the first element named `local` in `xml`, feeding
    /// events while the reader still holds the ancestors' scope.
    fn c14n_subtree(xml: &str, local: &str, mode: C14nMode, prefixes: &[String]) -> String {
        let mut reader = XmlEventReader::new(xml.as_bytes());
        let mut c14n = Canonicalizer::new(mode, prefixes);
        let mut out = Vec::new();
        let mut inside = false;
        while let Some(event) = reader.next_event().unwrap() {
            if !inside {
                inside = event.as_start().is_some_and(|s| s.name.local_name == local);
            }
            if inside {
                c14n.transform(&event, &mut out).unwrap();
                if c14n.is_complete() {
                    break;
                }
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_empty_elements_expanded_and_attrs_sorted() {
        let out = c14n(r#"<r b="2" a="1"><e/></r>"#, C14nMode::Inclusive);
        assert_eq!(out, r#"<r a="1" b="2"><e></e></r>"#);
    }

    #[test]
    fn test_declaration_and_doctype_dropped() {
        let out = c14n(
            "<?xml version=\"1.0\"?>\n<!DOCTYPE r>\n<r>x</r>",
            C14nMode::Inclusive,
        );
        assert_eq!(out, "<r>x</r>");
    }

    #[test]
    fn test_comments_outside_root() {
        let xml = "<!--a--><r><!--b--></r><!--c-->";
        assert_eq!(
            c14n(xml, C14nMode::InclusiveWithComments),
            "<!--a-->\n<r><!--b--></r>\n<!--c-->"
        );
        assert_eq!(c14n(xml, C14nMode::Inclusive), "<r></r>");
    }

    #[test]
    fn test_pi_outside_root() {
        let out = c14n("<?p d?><r/><?q?>", C14nMode::Exclusive);
        assert_eq!(out, "<?p d?>\n<r></r>\n<?q?>");
    }

    #[test]
    fn test_text_escaping() {
        let out = c14n("<r a=\"&quot;&#9;\">a&amp;b&lt;&gt;&#13;</r>", C14nMode::Inclusive);
        assert_eq!(out, "<r a=\"&quot;&#x9;\">a&amp;b&lt;&gt;&#xD;</r>");
    }

    #[test]
    fn test_redundant_namespace_removed() {
        let out = c14n(
            r#"<a:r xmlns:a="urn:a"><a:e xmlns:a="urn:a"/></a:r>"#,
            C14nMode::Inclusive,
        );
        assert_eq!(out, r#"<a:r xmlns:a="urn:a"><a:e></a:e></a:r>"#);
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let out = c14n(
            r#"<r xmlns="urn:d"><e xmlns=""/></r>"#,
            C14nMode::Inclusive,
        );
        assert_eq!(out, r#"<r xmlns="urn:d"><e xmlns=""></e></r>"#);
    }

    #[test]
    fn test_subtree_inclusive_vs_exclusive() {
        let xml = r#"<root xmlns:a="urn:a" xmlns:b="urn:b"><a:child b:x="1"><c/></a:child></root>"#;
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Inclusive, &[]),
            r#"<a:child xmlns:a="urn:a" xmlns:b="urn:b" b:x="1"><c></c></a:child>"#
        );
        let xml = r#"<root xmlns:a="urn:a" xmlns:u="urn:u"><a:child><c/></a:child></root>"#;
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Exclusive, &[]),
            r#"<a:child xmlns:a="urn:a"><c></c></a:child>"#
        );
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Exclusive, &["u".to_string()]),
            r#"<a:child xmlns:a="urn:a" xmlns:u="urn:u"><c></c></a:child>"#
        );
    }

    #[test]
    fn test_exclusive_declares_at_first_use() {
        let xml = r#"<root xmlns:p="urn:p"><mid><p:leaf/></mid></root>"#;
        assert_eq!(
            c14n_subtree(xml, "mid", C14nMode::Exclusive, &[]),
            r#"<mid><p:leaf xmlns:p="urn:p"></p:leaf></mid>"#
        );
    }

    #[test]
    fn test_subtree_inherits_xml_attributes() {
        let xml = r#"<root xml:lang="en" xml:id="r"><child/></root>"#;
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Inclusive, &[]),
            r#"<child xml:id="r" xml:lang="en"></child>"#
        );
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Inclusive11, &[]),
            r#"<child xml:lang="en"></child>"#
        );
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Exclusive, &[]),
            "<child></child>"
        );
    }

    #[test]
    fn test_unbalanced_end_is_malformed() {
        let mut c14n = Canonicalizer::new(C14nMode::Inclusive, &[]);
        let mut out = Vec::new();
        let err = c14n
            .transform(&XmlEvent::end(stromsborg_xml::QName::local("x")), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }
}
