#![forbid(unsafe_code)]

//! The canonicalizer's stack of open elements.

use stromsborg_core::{Error, Result};
use stromsborg_xml::Namespace;

/// Namespace state of one open element.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Declarations visible through this element. For the apex this is its
    /// whole in-scope set, for descendants only their own declarations.
    pub declared: Vec<Namespace>,
    /// Declarations written to the output at this element.
    pub rendered: Vec<Namespace>,
}

/// One frame per open element; pushed at a start element and popped exactly
/// once at the matching end element.
#[derive(Debug, Default)]
pub struct C14nContext {
    frames: Vec<Frame>,
}

impl C14nContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Result<Frame> {
        self.frames
            .pop()
            .ok_or_else(|| Error::MalformedInput("end element without matching start".into()))
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// URI most recently rendered for `prefix` by an open element.
    pub fn rendered(&self, prefix: &str) -> Option<&str> {
        self.frames.iter().rev().find_map(|frame| {
            frame
                .rendered
                .iter()
                .find(|ns| ns.prefix == prefix)
                .map(|ns| ns.uri.as_str())
        })
    }

    /// URI `prefix` is bound to at the innermost open element.
    pub fn visible(&self, prefix: &str) -> Option<&str> {
        self.frames.iter().rev().find_map(|frame| {
            frame
                .declared
                .iter()
                .find(|ns| ns.prefix == prefix)
                .map(|ns| ns.uri.as_str())
        })
    }

    /// Whether `xmlns=""` is needed to undo a rendered default namespace.
    pub fn needs_default_undeclaration(&self) -> bool {
        self.rendered("").is_some_and(|uri| !uri.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rendered_lookup_nearest_first() {
        let mut ctx = C14nContext::new();
        ctx.push(Frame {
            declared: vec![Namespace::new("a", "urn:1")],
            rendered: vec![Namespace::new("a", "urn:1")],
        });
        ctx.push(Frame {
            declared: vec![Namespace::new("a", "urn:2")],
            rendered: Vec::new(),
        });
        assert_eq!(ctx.rendered("a"), Some("urn:1"));
        assert_eq!(ctx.visible("a"), Some("urn:2"));
        assert_eq!(ctx.depth(), 2);
    }

    #[test]
    fn test_pop_empty_is_malformed() {
        let mut ctx = C14nContext::new();
        assert!(matches!(ctx.pop(), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_default_undeclaration() {
        let mut ctx = C14nContext::new();
        assert!(!ctx.needs_default_undeclaration());
        ctx.push(Frame {
            declared: vec![Namespace::new("", "urn:d")],
            rendered: vec![Namespace::new("", "urn:d")],
        });
        assert!(ctx.needs_default_undeclaration());
    }
}
