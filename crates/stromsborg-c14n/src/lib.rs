#![forbid(unsafe_code)]

//! Streaming XML Canonicalization (C14N) over Stromsborg events.
//!
//! Implements all six W3C canonicalization variants:
//! - Canonical XML 1.0 (with and without comments)
//! - Canonical XML 1.1 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! A [`Canonicalizer`] is fed one event at a time and writes canonical bytes
//! to any `io::Write` sink. The first start element it sees is the apex of
//! the canonicalized fragment; inherited namespaces and `xml:*` attributes
//! are taken from the apex's ancestors through its scope link.

pub mod canonicalizer;
pub mod context;
pub mod escape;
pub mod exclusive;
pub mod inclusive;
pub mod render;

pub use canonicalizer::{canonicalize_events, Canonicalizer};
pub use context::{C14nContext, Frame};

use stromsborg_core::{algorithm, Error};
use stromsborg_xml::XmlEventReader;

/// Which canonicalization variant to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum C14nMode {
    Inclusive,
    InclusiveWithComments,
    /// Canonical XML 1.1: `xml:id` and `xml:base` are not inherited.
    Inclusive11,
    Inclusive11WithComments,
    Exclusive,
    ExclusiveWithComments,
}

const MODES: [(C14nMode, &str); 6] = [
    (C14nMode::Inclusive, algorithm::C14N),
    (C14nMode::InclusiveWithComments, algorithm::C14N_WITH_COMMENTS),
    (C14nMode::Inclusive11, algorithm::C14N11),
    (C14nMode::Inclusive11WithComments, algorithm::C14N11_WITH_COMMENTS),
    (C14nMode::Exclusive, algorithm::EXC_C14N),
    (C14nMode::ExclusiveWithComments, algorithm::EXC_C14N_WITH_COMMENTS),
];

impl C14nMode {
    pub fn uri(&self) -> &'static str {
        MODES
            .iter()
            .find(|(mode, _)| mode == self)
            .map_or(algorithm::C14N, |(_, uri)| *uri)
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        MODES.iter().find(|(_, known)| *known == uri).map(|(mode, _)| *mode)
    }

    /// Like [`C14nMode::from_uri`], failing with `UnsupportedAlgorithm`.
    pub fn require(uri: &str) -> Result<Self, Error> {
        Self::from_uri(uri)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("canonicalization: {uri}")))
    }

    pub fn with_comments(&self) -> bool {
        matches!(
            self,
            Self::InclusiveWithComments
                | Self::Inclusive11WithComments
                | Self::ExclusiveWithComments
        )
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }

    /// Whether an ancestor's `xml:{local_name}` attribute is carried onto
    /// the apex element.
    pub fn inherits_xml_attribute(&self, local_name: &str) -> bool {
        match self {
            Self::Inclusive | Self::InclusiveWithComments => true,
            Self::Inclusive11 | Self::Inclusive11WithComments => {
                !matches!(local_name, "id" | "base")
            }
            Self::Exclusive | Self::ExclusiveWithComments => false,
        }
    }
}

/// Canonicalize a complete XML document.
///
/// - `xml`: the raw XML text
/// - `mode`: which C14N variant to use
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let mut reader = XmlEventReader::new(xml.as_bytes());
    let mut c14n = Canonicalizer::new(mode, inclusive_prefixes);
    let mut out = Vec::new();
    while let Some(event) = reader.next_event()? {
        c14n.transform(&event, &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_roundtrip() {
        for (mode, _) in MODES {
            assert_eq!(C14nMode::from_uri(mode.uri()), Some(mode));
        }
        assert!(C14nMode::require("urn:nope").is_err());
    }

    #[test]
    fn test_xml_attribute_inheritance_rules() {
        assert!(C14nMode::Inclusive.inherits_xml_attribute("base"));
        assert!(C14nMode::Inclusive11.inherits_xml_attribute("lang"));
        assert!(!C14nMode::Inclusive11.inherits_xml_attribute("id"));
        assert!(!C14nMode::Inclusive11.inherits_xml_attribute("base"));
        assert!(!C14nMode::Exclusive.inherits_xml_attribute("lang"));
    }
}
