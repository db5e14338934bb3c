#![forbid(unsafe_code)]

//! Escaping for plain (non-canonical) serialization.
//!
//! Carriage returns and attribute whitespace are written as character
//! references so a parser reads back exactly the value that was written.

use std::borrow::Cow;

pub fn escape_text(s: &str) -> Cow<'_, str> {
    escape_with(s, |ch| match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '\r' => Some("&#xD;"),
        _ => None,
    })
}

pub fn escape_attr(s: &str) -> Cow<'_, str> {
    escape_with(s, |ch| match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        '\t' => Some("&#x9;"),
        '\n' => Some("&#xA;"),
        '\r' => Some("&#xD;"),
        _ => None,
    })
}

fn escape_with(s: &str, map: impl Fn(char) -> Option<&'static str>) -> Cow<'_, str> {
    if !s.chars().any(|ch| map(ch).is_some()) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match map(ch) {
            Some(entity) => out.push_str(entity),
            None => out.push(ch),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrowed_when_clean() {
        assert!(matches!(escape_text("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(escape_text("a<b&c>\r"), "a&lt;b&amp;c&gt;&#xD;");
        assert_eq!(escape_attr("\"x\"\n"), "&quot;x&quot;&#xA;");
    }
}
