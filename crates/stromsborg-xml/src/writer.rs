#![forbid(unsafe_code)]

//! Serializes [`XmlEvent`]s to any `io::Write` sink.

use std::io::Write;

use stromsborg_core::{Error, Result};

use crate::escape::{escape_attr, escape_text};
use crate::event::{StartElement, TextKind, XmlEvent};
use crate::name::QName;

/// Event serializer that checks element balance as it goes.
pub struct XmlEventWriter<W: Write> {
    sink: W,
    open: Vec<QName>,
    /// Start tag written but not yet closed with `>`, so that an immediately
    /// following end element can be collapsed into `<a/>`.
    pending_close: bool,
    collapse_empty: bool,
}

impl<W: Write> XmlEventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            open: Vec::new(),
            pending_close: false,
            collapse_empty: false,
        }
    }

    /// Write `<a/>` for elements without content.
    pub fn collapse_empty_elements(mut self, collapse: bool) -> Self {
        self.collapse_empty = collapse;
        self
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// The sink. Bytes already handed to it may be taken out between events.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Finish writing and return the sink.
    pub fn into_inner(mut self) -> Result<W> {
        if let Some(open) = self.open.last() {
            return Err(Error::MalformedInput(format!(
                "element <{}> was never closed",
                open.qualified()
            )));
        }
        self.sink.flush()?;
        Ok(self.sink)
    }

    pub fn write_event(&mut self, event: &XmlEvent) -> Result<()> {
        if !matches!(event, XmlEvent::EndElement(_)) {
            self.close_start_tag()?;
        }
        match event {
            XmlEvent::StartDocument {
                version,
                encoding,
                standalone,
            } => {
                write!(self.sink, "<?xml version=\"{version}\"")?;
                if let Some(encoding) = encoding {
                    write!(self.sink, " encoding=\"{encoding}\"")?;
                }
                if let Some(standalone) = standalone {
                    let value = if *standalone { "yes" } else { "no" };
                    write!(self.sink, " standalone=\"{value}\"")?;
                }
                self.sink.write_all(b"?>")?;
            }
            XmlEvent::StartElement(start) => self.write_start(start)?,
            XmlEvent::EndElement(end) => {
                let open = self.open.pop().ok_or_else(|| {
                    Error::MalformedInput(format!("unexpected end element {}", end.name))
                })?;
                if open != end.name {
                    return Err(Error::MalformedInput(format!(
                        "end element {} does not match {}",
                        end.name, open
                    )));
                }
                if self.pending_close {
                    self.pending_close = false;
                    self.sink.write_all(b"/>")?;
                } else {
                    write!(self.sink, "</{}>", open.qualified())?;
                }
            }
            XmlEvent::Characters(chars) => match chars.kind {
                TextKind::CData if !chars.text.contains("]]>") => {
                    write!(self.sink, "<![CDATA[{}]]>", chars.text)?;
                }
                _ => self.sink.write_all(escape_text(&chars.text).as_bytes())?,
            },
            XmlEvent::Comment(text) => write!(self.sink, "<!--{text}-->")?,
            XmlEvent::ProcessingInstruction { target, data } => {
                if data.is_empty() {
                    write!(self.sink, "<?{target}?>")?;
                } else {
                    write!(self.sink, "<?{target} {data}?>")?;
                }
            }
            XmlEvent::Dtd(text) => write!(self.sink, "<!DOCTYPE {text}>")?,
            XmlEvent::EndDocument => self.sink.flush()?,
        }
        Ok(())
    }

    fn write_start(&mut self, start: &StartElement) -> Result<()> {
        write!(self.sink, "<{}", start.name.qualified())?;
        for ns in &start.namespaces {
            if ns.prefix.is_empty() {
                write!(self.sink, " xmlns=\"{}\"", escape_attr(&ns.uri))?;
            } else {
                write!(self.sink, " xmlns:{}=\"{}\"", ns.prefix, escape_attr(&ns.uri))?;
            }
        }
        for attr in &start.attributes {
            write!(
                self.sink,
                " {}=\"{}\"",
                attr.name.qualified(),
                escape_attr(&attr.value)
            )?;
        }
        self.open.push(start.name.clone());
        if self.collapse_empty {
            self.pending_close = true;
        } else {
            self.sink.write_all(b">")?;
        }
        Ok(())
    }

    fn close_start_tag(&mut self) -> Result<()> {
        if self.pending_close {
            self.pending_close = false;
            self.sink.write_all(b">")?;
        }
        Ok(())
    }
}

/// Serialize a list of events to a string.
pub fn events_to_string(events: &[XmlEvent]) -> Result<String> {
    let mut writer = XmlEventWriter::new(Vec::new());
    for event in events {
        writer.write_event(event)?;
    }
    let bytes = writer.into_inner()?;
    String::from_utf8(bytes).map_err(|e| Error::InternalFailure(e.to_string()))
}
