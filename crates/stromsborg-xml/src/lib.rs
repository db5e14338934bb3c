#![forbid(unsafe_code)]

//! XML event model for the Stromsborg streaming pipeline.
//!
//! Events are produced by [`XmlEventReader`] (on top of `quick-xml`) or by
//! application code, and serialized by [`XmlEventWriter`]. Start elements
//! carry a non-owning link into a shared [`ScopeTree`], an arena of the
//! currently open elements, from which in-scope namespaces and attributes
//! are derived on demand.

pub mod escape;
pub mod event;
pub mod name;
pub mod reader;
pub mod scope;
pub mod writer;

pub use event::{Characters, EndElement, StartElement, TextKind, XmlEvent};
pub use name::{Attribute, Namespace, QName};
pub use reader::XmlEventReader;
pub use scope::{ElementId, ElementNode, ScopeLink, ScopeTracker, ScopeTree};
pub use writer::XmlEventWriter;

/// Parse a complete document into an owned event list.
///
/// Intended for small inputs and tests; the pipeline itself never
/// collects a whole document.
pub fn parse_events(xml: &str) -> stromsborg_core::Result<Vec<XmlEvent>> {
    let mut reader = XmlEventReader::new(xml.as_bytes());
    let mut events = Vec::new();
    while let Some(event) = reader.next_event()? {
        events.push(event);
    }
    Ok(events)
}
