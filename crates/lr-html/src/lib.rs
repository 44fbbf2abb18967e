//! Script insertion into HTML documents.
//!
//! [`insert_script`] appends a `<script>` element as the last child of the
//! document's `<head>`, synthesizing whatever document structure is missing:
//!
//! ```
//! let html = lr_html::insert_script(b"<p>hi</p>", &[], "run()").unwrap();
//! assert_eq!(
//!     html,
//!     b"<!DOCTYPE html><html><head><script>run()</script></head><body><p>hi</p></body></html>"
//! );
//! ```
//!
//! The patcher is lexical: it locates the doctype and the `html`, `head`
//! and `body` tags and copies everything else byte-for-byte. Inside the
//! head it skips comments, quoted attribute values and the text of
//! `<script>`, `<style>` and `<title>`, so markup-like text in them is
//! never mistaken for the end of the head. Like an HTML parser it accepts
//! truncated input: an unterminated comment, doctype or tag runs to the end
//! of input, and the script goes in front of it.

mod scan;

use scan::{
    HeadEnd, after_gt, comment_end, find_start_tag, head_end, is_start_tag, skip_whitespace,
    start_tag_end, starts_with_ci,
};

/// Document type emitted when the input has none.
const DEFAULT_DOCTYPE: &[u8] = b"<!DOCTYPE html>";

/// Error patching a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// The input holds a NUL byte, so it is binary data rather than markup.
    #[error("not markup: NUL byte at offset {0}")]
    Binary(usize),
}

/// Insert `<script attrs>script</script>` at the end of the document head.
///
/// Attribute values are escaped; names and the script body are written as
/// given. Existing doctype, `html` and `head` tags keep their attributes.
/// Content outside `<html>` becomes the body.
///
/// # Errors
///
/// Returns [`PatchError::Binary`] if the input is not text.
pub fn insert_script(
    input: &[u8],
    attrs: &[(&str, &str)],
    script: &str,
) -> Result<Vec<u8>, PatchError> {
    if let Some(offset) = input.iter().position(|&byte| byte == 0) {
        return Err(PatchError::Binary(offset));
    }

    let element = script_element(attrs, script);
    let mut out = Vec::with_capacity(input.len() + element.len() + 64);

    let (prelude_end, has_doctype) = skip_prelude(input);
    if !has_doctype {
        out.extend_from_slice(DEFAULT_DOCTYPE);
    }
    out.extend_from_slice(&input[..prelude_end]);
    let mut pos = prelude_end;

    let html_end = start_tag(input, pos, b"html");
    let has_html = html_end.is_some();
    match html_end {
        Some(end) => {
            out.extend_from_slice(&input[pos..end]);
            pos = end;
        }
        None => out.extend_from_slice(b"<html>"),
    }

    let trivia_end = skip_comments(input, pos);
    out.extend_from_slice(&input[pos..trivia_end]);
    pos = trivia_end;

    match start_tag(input, pos, b"head") {
        Some(open_end) => match head_end(input, open_end) {
            HeadEnd::Closed(close) => {
                out.extend_from_slice(&input[pos..close]);
                out.extend_from_slice(&element);
                let close_end = after_gt(input, close).unwrap_or(input.len());
                out.extend_from_slice(&input[close..close_end]);
                pos = close_end;
            }
            HeadEnd::Open(at) => {
                out.extend_from_slice(&input[pos..at]);
                out.extend_from_slice(&element);
                out.extend_from_slice(b"</head>");
                pos = at;
            }
        },
        None => {
            out.extend_from_slice(b"<head>");
            out.extend_from_slice(&element);
            out.extend_from_slice(b"</head>");
        }
    }

    let rest = &input[pos..];
    if has_html {
        out.extend_from_slice(rest);
    } else if find_start_tag(rest, 0, b"body").is_some() {
        out.extend_from_slice(rest);
        out.extend_from_slice(b"</html>");
    } else {
        out.extend_from_slice(b"<body>");
        out.extend_from_slice(rest);
        out.extend_from_slice(b"</body></html>");
    }
    Ok(out)
}

/// End of the `<name ...>` start tag at `pos`, if there is a complete one.
fn start_tag(input: &[u8], pos: usize, name: &[u8]) -> Option<usize> {
    if is_start_tag(input, pos, name) {
        start_tag_end(input, pos)
    } else {
        None
    }
}

fn script_element(attrs: &[(&str, &str)], script: &str) -> Vec<u8> {
    let mut element = Vec::with_capacity(script.len() + 32);
    element.extend_from_slice(b"<script");
    for (name, value) in attrs {
        element.push(b' ');
        element.extend_from_slice(name.as_bytes());
        element.extend_from_slice(b"=\"");
        escape_attr(&mut element, value);
        element.push(b'"');
    }
    element.push(b'>');
    element.extend_from_slice(script.as_bytes());
    element.extend_from_slice(b"</script>");
    element
}

fn escape_attr(out: &mut Vec<u8>, value: &str) {
    for byte in value.bytes() {
        match byte {
            b'&' => out.extend_from_slice(b"&amp;"),
            b'"' => out.extend_from_slice(b"&quot;"),
            _ => out.push(byte),
        }
    }
}

/// Skip leading whitespace, comments, processing instructions and the
/// doctype. Returns the end offset and whether a doctype was seen.
///
/// Stops in front of an unterminated construct.
fn skip_prelude(input: &[u8]) -> (usize, bool) {
    let mut pos = 0;
    let mut has_doctype = false;
    loop {
        pos = skip_whitespace(input, pos);
        let (end, doctype) = if starts_with_ci(input, pos, b"<!--") {
            (comment_end(input, pos), false)
        } else if starts_with_ci(input, pos, b"<!doctype") {
            (after_gt(input, pos), true)
        } else if starts_with_ci(input, pos, b"<?") {
            (after_gt(input, pos), false)
        } else {
            return (pos, has_doctype);
        };
        let Some(end) = end else {
            return (pos, has_doctype);
        };
        pos = end;
        has_doctype |= doctype;
    }
}

/// Skip whitespace and comments between the `html` and `head` tags.
fn skip_comments(input: &[u8], mut pos: usize) -> usize {
    loop {
        pos = skip_whitespace(input, pos);
        if !starts_with_ci(input, pos, b"<!--") {
            return pos;
        }
        match comment_end(input, pos) {
            Some(end) => pos = end,
            None => return pos,
        }
    }
}
