//! Byte-level scanning helpers.
//!
//! Matching is ASCII case-insensitive; no tree is built.

/// Whether `input[pos..]` starts with `prefix`, ignoring ASCII case.
pub(crate) fn starts_with_ci(input: &[u8], pos: usize, prefix: &[u8]) -> bool {
    input
        .get(pos..pos + prefix.len())
        .is_some_and(|window| window.eq_ignore_ascii_case(prefix))
}

/// Index of the first occurrence of `needle` at or after `from`.
pub(crate) fn find(input: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    input
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

/// Index just past the first `>` at or after `from`.
pub(crate) fn after_gt(input: &[u8], from: usize) -> Option<usize> {
    find(input, from, b">").map(|gt| gt + 1)
}

/// Skip ASCII whitespace.
pub(crate) fn skip_whitespace(input: &[u8], mut pos: usize) -> usize {
    while input.get(pos).is_some_and(u8::is_ascii_whitespace) {
        pos += 1;
    }
    pos
}

/// Whether a tag name ends at `pos` (`<name` followed by this byte).
fn ends_name(input: &[u8], pos: usize) -> bool {
    input
        .get(pos)
        .is_none_or(|&byte| byte.is_ascii_whitespace() || byte == b'>' || byte == b'/')
}

/// Whether a `<name ...>` start tag begins at `pos`.
pub(crate) fn is_start_tag(input: &[u8], pos: usize, name: &[u8]) -> bool {
    input.get(pos) == Some(&b'<')
        && starts_with_ci(input, pos + 1, name)
        && ends_name(input, pos + 1 + name.len())
}

/// Whether a `</name` end tag begins at `pos`.
pub(crate) fn is_end_tag(input: &[u8], pos: usize, name: &[u8]) -> bool {
    starts_with_ci(input, pos, b"</")
        && starts_with_ci(input, pos + 2, name)
        && ends_name(input, pos + 2 + name.len())
}

/// Index of the first `<name` start tag at or after `from`.
pub(crate) fn find_start_tag(input: &[u8], from: usize, name: &[u8]) -> Option<usize> {
    (from..input.len()).find(|&pos| is_start_tag(input, pos, name))
}

/// Index of the first `</name` end tag at or after `from`.
pub(crate) fn find_end_tag(input: &[u8], from: usize, name: &[u8]) -> Option<usize> {
    (from..input.len()).find(|&pos| is_end_tag(input, pos, name))
}

/// Index just past the `>` closing the start tag at `pos`.
///
/// Quoted attribute values may contain `>`.
pub(crate) fn start_tag_end(input: &[u8], pos: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, &byte) in input.get(pos + 1..)?.iter().enumerate() {
        match (quote, byte) {
            (Some(open), _) if byte == open => quote = None,
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some(pos + offset + 2),
            _ => {}
        }
    }
    None
}

/// Index just past the comment starting at `pos`.
///
/// `<!-->` and `<!--->` are complete, empty comments.
pub(crate) fn comment_end(input: &[u8], pos: usize) -> Option<usize> {
    let body = pos + 4;
    if input.get(body) == Some(&b'>') {
        return Some(body + 1);
    }
    if starts_with_ci(input, body, b"->") {
        return Some(body + 2);
    }
    find(input, body, b"-->").map(|end| end + 3)
}

/// Elements that may appear inside `<head>`.
const HEAD_ELEMENTS: [&[u8]; 11] = [
    b"base",
    b"basefont",
    b"bgsound",
    b"link",
    b"meta",
    b"noframes",
    b"noscript",
    b"script",
    b"style",
    b"template",
    b"title",
];

/// Head elements whose content is text up to the matching end tag.
const RAW_TEXT: [&[u8]; 6] = [
    b"noframes",
    b"noscript",
    b"script",
    b"style",
    b"template",
    b"title",
];

/// End tags that close the head when met inside it.
const HEAD_CLOSERS: [&[u8]; 3] = [b"body", b"br", b"html"];

/// Where the content of a `<head>` element stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HeadEnd {
    /// Offset of the `</head` end tag.
    Closed(usize),
    /// Offset of the first byte that is not head content: body content, an
    /// unterminated construct or the end of input.
    Open(usize),
}

/// Find the end of the head content starting at `from`, just past the
/// `<head>` start tag.
///
/// Comments, quoted attribute values and the text of raw-text elements are
/// skipped, so a `</head>` inside them does not count. Anything that cannot
/// be head content ends the head where it starts.
pub(crate) fn head_end(input: &[u8], from: usize) -> HeadEnd {
    let mut pos = from;
    loop {
        pos = skip_whitespace(input, pos);
        if input.get(pos) != Some(&b'<') {
            return HeadEnd::Open(pos);
        }

        let next = if starts_with_ci(input, pos, b"<!--") {
            comment_end(input, pos)
        } else if is_end_tag(input, pos, b"head") {
            return HeadEnd::Closed(pos);
        } else if HEAD_CLOSERS.iter().any(|name| is_end_tag(input, pos, name)) {
            return HeadEnd::Open(pos);
        } else if starts_with_ci(input, pos, b"</")
            || starts_with_ci(input, pos, b"<!")
            || starts_with_ci(input, pos, b"<?")
        {
            // Stray end tags and bogus comments are dropped by browsers.
            after_gt(input, pos)
        } else if let Some(name) = HEAD_ELEMENTS
            .into_iter()
            .find(|name| is_start_tag(input, pos, name))
        {
            start_tag_end(input, pos).and_then(|end| {
                if RAW_TEXT.contains(&name) {
                    find_end_tag(input, end, name).and_then(|close| after_gt(input, close))
                } else {
                    Some(end)
                }
            })
        } else {
            return HeadEnd::Open(pos);
        };

        // An unterminated construct runs to the end of input and would
        // swallow anything inserted after it.
        match next {
            Some(next) => pos = next,
            None => return HeadEnd::Open(pos),
        }
    }
}
