//! Header handling for requests forwarded upstream.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

/// Hop-by-hop headers that must not be forwarded, plus `Host` (reqwest sets
/// its own) and lengths/encodings that no longer match the forwarded body.
const STRIPPED: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_stripped(name: &HeaderName) -> bool {
    STRIPPED.contains(&name.as_str())
}

/// Copy client headers for an upstream request, dropping hop-by-hop headers.
/// When `api_key` is configured it replaces any client `Authorization`.
pub fn upstream_headers(client_headers: &HeaderMap, api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in client_headers {
        if is_stripped(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Some(key) = api_key {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
            headers.insert(header::AUTHORIZATION, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers_stripped() {
        let mut client = HeaderMap::new();
        client.insert("host", HeaderValue::from_static("proxy.local"));
        client.insert("connection", HeaderValue::from_static("keep-alive"));
        client.insert("content-length", HeaderValue::from_static("42"));
        client.insert("x-request-id", HeaderValue::from_static("abc"));

        let headers = upstream_headers(&client, None);
        assert!(headers.get("host").is_none());
        assert!(headers.get("connection").is_none());
        assert!(headers.get("content-length").is_none());
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_configured_key_replaces_client_authorization() {
        let mut client = HeaderMap::new();
        client.insert("authorization", HeaderValue::from_static("Bearer client"));

        let headers = upstream_headers(&client, Some("proxy-key"));
        assert_eq!(headers.get("authorization").unwrap(), "Bearer proxy-key");
    }

    #[test]
    fn test_client_authorization_forwarded_without_configured_key() {
        let mut client = HeaderMap::new();
        client.insert("authorization", HeaderValue::from_static("Bearer client"));

        let headers = upstream_headers(&client, None);
        assert_eq!(headers.get("authorization").unwrap(), "Bearer client");
    }
}
