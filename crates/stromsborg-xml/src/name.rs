#![forbid(unsafe_code)]

//! Qualified names, namespace declarations and attributes.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A namespace-qualified name.
///
/// Equality and hashing only look at the namespace URI and local name; the
/// prefix is a serialization detail.
#[derive(Debug, Clone, Default)]
pub struct QName {
    /// Namespace URI ("" for no namespace).
    pub namespace_uri: String,
    pub local_name: String,
    /// Prefix used on the wire ("" for unprefixed).
    pub prefix: String,
}

impl QName {
    /// An unprefixed name in the given namespace.
    pub fn new(namespace_uri: &str, local_name: &str) -> Self {
        Self {
            namespace_uri: namespace_uri.to_owned(),
            local_name: local_name.to_owned(),
            prefix: String::new(),
        }
    }

    pub fn with_prefix(namespace_uri: &str, local_name: &str, prefix: &str) -> Self {
        Self {
            namespace_uri: namespace_uri.to_owned(),
            local_name: local_name.to_owned(),
            prefix: prefix.to_owned(),
        }
    }

    /// A name in no namespace.
    pub fn local(local_name: &str) -> Self {
        Self::new("", local_name)
    }

    pub fn is(&self, namespace_uri: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace_uri == namespace_uri
    }

    /// The name as written on the wire (`prefix:local` or `local`).
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{}:{}", self.prefix, self.local_name)
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name && self.namespace_uri == other.namespace_uri
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace_uri.hash(state);
        self.local_name.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_uri.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace_uri, self.local_name)
        }
    }
}

/// A namespace declaration made at an element.
///
/// The default namespace has an empty prefix; `xmlns=""` is represented by
/// an empty prefix and an empty URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.prefix.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: &str) -> Self {
        Self {
            name,
            value: value.to_owned(),
        }
    }

    /// An attribute in no namespace.
    pub fn local(local_name: &str, value: &str) -> Self {
        Self::new(QName::local(local_name), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_does_not_affect_equality() {
        let a = QName::with_prefix("urn:a", "x", "p");
        let b = QName::with_prefix("urn:a", "x", "q");
        assert_eq!(a, b);
        assert_ne!(a, QName::new("urn:b", "x"));
    }

    #[test]
    fn test_qualified_and_display() {
        let q = QName::with_prefix("urn:a", "x", "p");
        assert_eq!(q.qualified(), "p:x");
        assert_eq!(q.to_string(), "{urn:a}x");
        assert_eq!(QName::local("y").to_string(), "y");
    }
}
