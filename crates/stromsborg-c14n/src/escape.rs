#![forbid(unsafe_code)]

//! Entity escaping for C14N output.
//!
//! - Text nodes: `&` → `&amp;`, `<` → `&lt;`, `>` → `&gt;`, `\r` → `&#xD;`
//! - Attribute values: `&`, `<`, `"`, and `\t`, `\n`, `\r` as character references
//! - PI data: `\r` → `&#xD;`
//! - Comments: verbatim

use std::io::{self, Write};

/// Write text node content per C14N rules.
pub fn write_text<W: Write + ?Sized>(sink: &mut W, s: &str) -> io::Result<()> {
    write_escaped(sink, s, |ch| match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '\r' => Some("&#xD;"),
        _ => None,
    })
}

/// Write an attribute value per C14N rules.
pub fn write_attr<W: Write + ?Sized>(sink: &mut W, s: &str) -> io::Result<()> {
    write_escaped(sink, s, |ch| match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '"' => Some("&quot;"),
        '\t' => Some("&#x9;"),
        '\n' => Some("&#xA;"),
        '\r' => Some("&#xD;"),
        _ => None,
    })
}

/// Write processing instruction data.
pub fn write_pi<W: Write + ?Sized>(sink: &mut W, s: &str) -> io::Result<()> {
    write_escaped(sink, s, |ch| (ch == '\r').then_some("&#xD;"))
}

fn write_escaped<W: Write + ?Sized>(
    sink: &mut W,
    s: &str,
    entity: impl Fn(char) -> Option<&'static str>,
) -> io::Result<()> {
    let mut start = 0;
    for (idx, ch) in s.char_indices() {
        if let Some(replacement) = entity(ch) {
            sink.write_all(s[start..idx].as_bytes())?;
            sink.write_all(replacement.as_bytes())?;
            start = idx + ch.len_utf8();
        }
    }
    sink.write_all(s[start..].as_bytes())
}
