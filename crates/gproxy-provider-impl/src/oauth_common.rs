//! Shared pieces of the interactive OAuth2 authorization-code flow used by
//! the Gemini-CLI adapter. Kiro never runs this flow — its credentials
//! come from the AWS SSO cache or an explicit file, never a loopback
//! browser round trip.

use std::io::{IsTerminal, Read, Write};
use std::net::TcpListener;

use gproxy_provider_core::{ProviderError, ProviderResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Bails out with `ConfigError` rather than blocking on a loopback
/// `accept()` nobody can answer when stdin isn't a real terminal (a
/// headless/cron invocation with no cached credential file).
pub fn ensure_interactive_available() -> ProviderResult<()> {
    if std::io::stdin().is_terminal() {
        Ok(())
    } else {
        Err(ProviderError::InvalidConfig(
            "no cached OAuth credentials and no interactive terminal available".to_string(),
        ))
    }
}

/// Runs a one-shot loopback HTTP server on `port`, printing `consent_url`
/// for the user to open, and returns the `code` query parameter from the
/// redirect GET request. Blocks the calling (blocking-pool) thread until
/// a request arrives; callers run this via `tokio::task::spawn_blocking`.
pub fn run_loopback_consent(port: u16, consent_url: &str) -> ProviderResult<String> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .map_err(|err| ProviderError::Other(format!("failed to bind loopback port {port}: {err}")))?;

    println!("Open this URL to authorize gproxy:\n{consent_url}");

    let (mut stream, _) = listener
        .accept()
        .map_err(|err| ProviderError::Other(format!("loopback accept failed: {err}")))?;

    let mut buf = [0u8; 4096];
    let n = stream
        .read(&mut buf)
        .map_err(|err| ProviderError::Other(format!("loopback read failed: {err}")))?;
    let request_line = String::from_utf8_lossy(&buf[..n]);
    let first_line = request_line.lines().next().unwrap_or_default();

    let code = extract_query_param(first_line, "code").ok_or_else(|| {
        ProviderError::Other("loopback redirect carried no `code` parameter".to_string())
    })?;

    let body = "Authorization complete. You may close this tab.";
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());

    Ok(code)
}

/// Parses `GET /callback?code=...&state=... HTTP/1.1` for a query param.
fn extract_query_param(request_line: &str, key: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let (_, query) = path.split_once('?')?;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=')?;
        if k == key {
            return Some(urldecode(v));
        }
    }
    None
}

fn urldecode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => {
                let hi = chars.next();
                let lo = chars.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                        out.push(byte as char);
                        continue;
                    }
                }
            }
            '+' => {
                out.push(' ');
                continue;
            }
            _ => {}
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_query_param_finds_code() {
        let line = "GET /callback?code=abc123&state=xyz HTTP/1.1";
        assert_eq!(extract_query_param(line, "code"), Some("abc123".to_string()));
        assert_eq!(extract_query_param(line, "state"), Some("xyz".to_string()));
        assert_eq!(extract_query_param(line, "missing"), None);
    }

    #[test]
    fn urldecode_handles_percent_and_plus() {
        assert_eq!(urldecode("a%20b+c"), "a b c");
    }
}
