//! Revocation List
//!
//! Fetches the attestation revocation status list and answers membership
//! queries by certificate serial number.
//!
//! The service answers with a JSON object whose `entries` field holds the
//! revoked serials, either as object keys (the live format) or as an array
//! of strings:
//!
//! ```json
//! { "entries": { "a1b2c3": { "status": "REVOKED", "reason": "KEY_COMPROMISE" } } }
//! { "entries": ["a1b2c3"] }
//! ```
//!
//! Serials are normalized on both sides (see
//! [`normalize_serial`](crate::certificate_chain::normalize_serial)) so case
//! and zero padding never cause a false negative.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info};
use serde_json::Value;

use crate::certificate_chain::normalize_serial;
use crate::error::{KeyboxError, Result};

pub const DEFAULT_REVOCATION_URL: &str = "https://android.googleapis.com/attestation/status";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationList {
    entries: HashSet<String>,
}

impl RevocationList {
    pub fn new<I, S>(serials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: serials
                .into_iter()
                .map(|serial| normalize_serial(serial.as_ref()))
                .collect(),
        }
    }

    /// Parse a revocation list response body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let document: Value = serde_json::from_slice(body)
            .map_err(|e| KeyboxError::RevocationListMalformed(e.to_string()))?;

        let entries = document.get("entries").ok_or_else(|| {
            KeyboxError::RevocationListMalformed("response has no 'entries' field".to_string())
        })?;

        match entries {
            Value::Object(map) => Ok(Self::new(map.keys())),
            Value::Array(items) => {
                let serials = items
                    .iter()
                    .map(|item| {
                        item.as_str().ok_or_else(|| {
                            KeyboxError::RevocationListMalformed(format!(
                                "non-string entry {}",
                                item
                            ))
                        })
                    })
                    .collect::<Result<Vec<&str>>>()?;
                Ok(Self::new(serials))
            }
            other => Err(KeyboxError::RevocationListMalformed(format!(
                "'entries' must be an object or array, got {}",
                json_type_name(other)
            ))),
        }
    }

    /// Fetch the list with a single blocking request.
    ///
    /// Transport failures, timeouts and non-2xx statuses are
    /// [`KeyboxError::Network`]; a successful response with an unusable body
    /// is [`KeyboxError::RevocationListMalformed`].
    pub fn fetch(url: &str, timeout: Duration) -> Result<Self> {
        info!("Fetching revocation list from {}", url);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyboxError::Network(e.to_string()))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| KeyboxError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyboxError::Network(format!(
                "server answered with HTTP {}",
                status
            )));
        }

        let body = response
            .bytes()
            .map_err(|e| KeyboxError::Network(e.to_string()))?;
        debug!("Revocation list response is {} bytes", body.len());

        let list = Self::from_json(&body)?;
        info!("Revocation list holds {} entries", list.len());
        Ok(list)
    }

    pub fn is_revoked(&self, serial: &str) -> bool {
        self.entries.contains(&normalize_serial(serial))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one HTTP response on an ephemeral local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{}/attestation/status", addr)
    }

    #[test]
    fn test_exact_match_is_revoked() {
        let list = RevocationList::from_json(br#"{"entries": ["a1b2c3"]}"#).unwrap();
        assert!(list.is_revoked("a1b2c3"));
        assert!(!list.is_revoked("ffffff"));
    }

    #[test]
    fn test_padding_and_case_are_normalized() {
        let list = RevocationList::from_json(br#"{"entries": ["00A1B2C3"]}"#).unwrap();
        assert!(list.is_revoked("a1b2c3"));
        assert!(list.is_revoked("0a1b2c3"));
        assert!(list.is_revoked("A1B2C3"));
    }

    #[test]
    fn test_object_entries_use_keys() {
        let body = br#"{"entries": {"a1b2c3": {"status": "REVOKED", "reason": "KEY_COMPROMISE"}}}"#;
        let list = RevocationList::from_json(body).unwrap();
        assert_eq!(list.len(), 1);
        assert!(list.is_revoked("a1b2c3"));
    }

    #[test]
    fn test_missing_entries_is_malformed() {
        let err = RevocationList::from_json(br#"{"revoked": []}"#).unwrap_err();
        assert!(matches!(err, KeyboxError::RevocationListMalformed(_)));

        let err = RevocationList::from_json(b"<html>").unwrap_err();
        assert!(matches!(err, KeyboxError::RevocationListMalformed(_)));

        let err = RevocationList::from_json(br#"{"entries": 3}"#).unwrap_err();
        assert!(matches!(err, KeyboxError::RevocationListMalformed(_)));

        let err = RevocationList::from_json(br#"{"entries": [1, 2]}"#).unwrap_err();
        assert!(matches!(err, KeyboxError::RevocationListMalformed(_)));
    }

    #[test]
    fn test_fetch_parses_successful_response() {
        let url = serve_once("200 OK", r#"{"entries": {"a1b2c3": {}}}"#);
        let list = RevocationList::fetch(&url, Duration::from_secs(5)).unwrap();
        assert!(list.is_revoked("a1b2c3"));
    }

    #[test]
    fn test_fetch_non_success_status_is_network_error() {
        let url = serve_once("503 Service Unavailable", "{}");
        let err = RevocationList::fetch(&url, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, KeyboxError::Network(_)));
    }

    #[test]
    fn test_fetch_garbage_body_is_malformed() {
        let url = serve_once("200 OK", r#"{"status": "ok"}"#);
        let err = RevocationList::fetch(&url, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, KeyboxError::RevocationListMalformed(_)));
    }

    #[test]
    fn test_fetch_unreachable_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{}/", addr);
        let err = RevocationList::fetch(&url, Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, KeyboxError::Network(_)));
    }

    #[test]
    fn test_fetch_timeout_is_network_error() {
        // accepts the connection but never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(5));
        });

        let url = format!("http://{}/attestation/status", addr);
        let started = std::time::Instant::now();
        let err = RevocationList::fetch(&url, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, KeyboxError::Network(_)), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
