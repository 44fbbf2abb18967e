//! Client-side reload script and CSP nonce handling.

use std::fmt::Write as _;

use axum::http::HeaderMap;
use axum::http::header::CONTENT_SECURITY_POLICY;

/// Script reloading the page when the event stream delivers `reload`.
///
/// `event_path` is embedded as a JavaScript string literal.
pub(crate) fn client_script(event_path: &str) -> String {
    format!(
        r#"
(new EventSource("{}")).onmessage = function(msg) {{
	if (msg && msg.data === "reload") {{
		window.location.reload()
	}}
}}
"#,
        js_escape(event_path)
    )
}

/// Escape text for use inside a quoted JavaScript string.
///
/// Characters that could end the string or the surrounding `<script>`
/// element are written as escapes.
fn js_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '<' | '>' | '&' | '=' => {
                let _ = write!(escaped, "\\u{:04X}", u32::from(ch));
            }
            ch if ch.is_control() => {
                let _ = write!(escaped, "\\u{:04X}", u32::from(ch));
            }
            ch => escaped.push(ch),
        }
    }
    escaped
}

/// The `script-src` nonce from a `Content-Security-Policy` header, if any.
///
/// Scripts without a matching `nonce` attribute are blocked by such a policy.
pub(crate) fn csp_nonce(headers: &HeaderMap) -> Option<String> {
    let policy = headers.get(CONTENT_SECURITY_POLICY)?.to_str().ok()?;
    policy.split(';').find_map(|directive| {
        let mut fields = directive.split_ascii_whitespace();
        if fields.next()? != "script-src" {
            return None;
        }
        fields.find_map(|source| {
            let source = source.trim_start_matches('\'').trim_end_matches('\'');
            source.strip_prefix("nonce-").map(str::to_owned)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use pretty_assertions::assert_eq;

    fn policy(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_script_embeds_event_path() {
        let script = client_script("/livereloadevents");
        assert!(script.contains(r#"new EventSource("/livereloadevents")"#));
        assert!(script.contains(r#"msg.data === "reload""#));
        assert!(script.contains("window.location.reload()"));
    }

    #[test]
    fn test_event_path_is_escaped() {
        assert_eq!(
            js_escape(r#"/a"b\c</script>"#),
            r#"/a\"b\\c\u003C/script\u003E"#
        );
        assert_eq!(js_escape("/x?a=1&b\n"), r"/x?a\u003D1\u0026b\u000A");
        assert_eq!(js_escape("/livereloadevents"), "/livereloadevents");
    }

    #[test]
    fn test_csp_nonce_found() {
        let headers = policy("default-src 'self'; script-src 'self' 'nonce-r4nd0m'");
        assert_eq!(csp_nonce(&headers), Some("r4nd0m".to_owned()));
    }

    #[test]
    fn test_csp_nonce_only_from_script_src() {
        assert_eq!(csp_nonce(&policy("style-src 'nonce-abc'")), None);
        assert_eq!(csp_nonce(&policy("script-src 'self'")), None);
        assert_eq!(csp_nonce(&policy(";;")), None);
        assert_eq!(csp_nonce(&HeaderMap::new()), None);
    }
}
