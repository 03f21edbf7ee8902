//! Header rewriting for relayed traffic.

use axum::http::header::{self, HeaderMap, HeaderName};

/// Headers that describe a single connection and must not cross the relay.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove every header in `names` from `headers`.
///
/// Names are compared case-insensitively, so `X-Frame-Options`,
/// `x-frame-options` and `X-FRAME-OPTIONS` are all dropped. Names that are
/// not valid header names, or are not present, are ignored. Returns the
/// number of header values removed.
pub fn strip_framing_headers<S: AsRef<str>>(headers: &mut HeaderMap, names: &[S]) -> usize {
    let mut removed = 0;
    for name in names {
        let Ok(name) = HeaderName::from_bytes(name.as_ref().trim().to_ascii_lowercase().as_bytes())
        else {
            continue;
        };
        if let header::Entry::Occupied(entry) = headers.entry(name) {
            let (_, values) = entry.remove_entry_mult();
            removed += values.count();
        }
    }
    removed
}

/// Drop hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
