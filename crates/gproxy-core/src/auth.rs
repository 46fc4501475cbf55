//! Caller authentication: a single shared secret, presented in any of
//! four conventional places. There is no per-user key model — matching
//! spec's explicit "does not persist conversation history" stance, this
//! gateway also carries no notion of "who" beyond "holds the key".

use axum::http::HeaderMap;

use crate::error::ProxyError;

/// Pulls the caller-presented key out of `Authorization: Bearer <k>`,
/// `x-goog-api-key`, `x-api-key`, or the `key` query parameter, in that
/// priority order.
pub fn extract_presented_key(headers: &HeaderMap, query: &str) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    if let Some(value) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("key=") {
            return Some(urldecode(value));
        }
    }
    None
}

fn urldecode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Compares the presented key against `expected` in constant time and
/// never echoes `expected` back on mismatch.
pub fn authenticate(expected: &str, headers: &HeaderMap, query: &str) -> Result<(), ProxyError> {
    match extract_presented_key(headers, query) {
        Some(presented) if constant_time_eq(presented.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => Err(ProxyError::Unauthorized),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        let headers = headers_with("authorization", "Bearer secret-key");
        assert_eq!(extract_presented_key(&headers, ""), Some("secret-key".to_string()));
    }

    #[test]
    fn extracts_query_key_and_decodes_it() {
        assert_eq!(
            extract_presented_key(&HeaderMap::new(), "key=a%2Bb"),
            Some("a+b".to_string())
        );
    }

    #[test]
    fn rejects_mismatched_key() {
        let headers = headers_with("x-api-key", "wrong");
        assert!(authenticate("right", &headers, "").is_err());
    }

    #[test]
    fn rejects_missing_key() {
        assert!(authenticate("right", &HeaderMap::new(), "").is_err());
    }

    #[test]
    fn accepts_matching_goog_header() {
        let headers = headers_with("x-goog-api-key", "right");
        assert!(authenticate("right", &headers, "").is_ok());
    }
}
