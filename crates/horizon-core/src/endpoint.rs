//! WebSocket endpoint construction.
//!
//! Servers are configured by their HTTP(S) origin. The streaming endpoints
//! live on the same host, so the origin is rewritten mechanically
//! (`https` → `wss`, `http` → `ws`) before the per-endpoint path and query
//! are appended.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{Error, Result};

/// Characters escaped inside a query value.
const QUERY_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'%');

/// Rewrite an HTTP(S) origin into its WS(S) equivalent.
///
/// Any `https://` or `http://` prefix is stripped and replaced; a trailing
/// slash is dropped so paths can be appended verbatim. Origins that already
/// use a WebSocket scheme keep it, and a bare host gets `ws://`.
///
/// ```
/// use horizon_core::endpoint::websocket_origin;
///
/// assert_eq!(websocket_origin("https://example.com"), "wss://example.com");
/// assert_eq!(websocket_origin("http://localhost:8000/"), "ws://localhost:8000");
/// ```
pub fn websocket_origin(base: &str) -> String {
    let base = base.trim();
    let (scheme, host) = if let Some(rest) = base.strip_prefix("https://") {
        ("wss", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = base.strip_prefix("wss://") {
        ("wss", rest)
    } else if let Some(rest) = base.strip_prefix("ws://") {
        ("ws", rest)
    } else {
        ("ws", base)
    };
    format!("{scheme}://{}", host.trim_end_matches('/'))
}

/// Build a full WebSocket URL from an HTTP(S) origin, a path and query pairs.
///
/// Query values are percent-encoded. The result is validated so callers get
/// [`Error::InvalidEndpoint`] up front rather than a transport failure later.
pub fn websocket_url(base: &str, path: &str, query: &[(&str, &str)]) -> Result<String> {
    let mut url = websocket_origin(base);
    if url.split_once("://").map_or(true, |(_, host)| host.is_empty()) {
        return Err(Error::invalid_endpoint(base));
    }
    if !path.is_empty() && !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);

    for (i, (key, value)) in query.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(key);
        url.push('=');
        url.extend(utf8_percent_encode(value, QUERY_VALUE));
    }

    match url::Url::parse(&url) {
        Ok(_) => Ok(url),
        Err(_) => Err(Error::invalid_endpoint(url)),
    }
}

/// Join an HTTP(S) origin and a path for plain REST calls.
pub fn http_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}
