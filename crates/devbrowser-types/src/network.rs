//! Network entry type, canonical ordering, and the binary-body heuristic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One captured network request/response pair.
///
/// `ok` holds iff `200 <= status < 400` and `error` is empty. Headers use a
/// `BTreeMap` so serialized reports have a stable key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub started_ms: i64,
    pub finished_ms: i64,

    pub status: i64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body_encoding: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl NetworkEntry {
    /// Recompute `ok` from `status` and `error`.
    pub fn compute_ok(&mut self) {
        self.ok = (200..400).contains(&self.status) && self.error.trim().is_empty();
    }

    /// A request counts as failed when it is not ok or carries an error text.
    pub fn failed(&self) -> bool {
        !self.ok || !self.error.trim().is_empty()
    }
}

/// Sort entries by `(started_ms, url, method)`.
pub fn sort_network_entries(entries: &mut [NetworkEntry]) {
    entries.sort_by(|a, b| {
        (a.started_ms, &a.url, &a.method).cmp(&(b.started_ms, &b.url, &b.method))
    });
}

/// Heuristic used to decide body encoding: a NUL byte or more than 20%
/// control bytes means base64.
pub fn looks_binary(b: &[u8]) -> bool {
    if b.is_empty() {
        return false;
    }
    let mut ctrl = 0usize;
    for &c in b {
        if c == 0 {
            return true;
        }
        if c < 9 || (c > 13 && c < 32) {
            ctrl += 1;
        }
    }
    (ctrl as f64) / (b.len() as f64) > 0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(started: i64, url: &str, method: &str) -> NetworkEntry {
        NetworkEntry {
            url: url.into(),
            method: method.into(),
            started_ms: started,
            ..Default::default()
        }
    }

    #[test]
    fn ok_iff_2xx_3xx_and_no_error() {
        let mut e = entry(0, "u", "GET");
        e.status = 200;
        e.compute_ok();
        assert!(e.ok);
        e.status = 304;
        e.compute_ok();
        assert!(e.ok);
        e.status = 404;
        e.compute_ok();
        assert!(!e.ok);
        e.status = 200;
        e.error = "net::ERR_ABORTED".into();
        e.compute_ok();
        assert!(!e.ok);
        e.status = 0;
        e.error = String::new();
        e.compute_ok();
        assert!(!e.ok);
    }

    #[test]
    fn sort_is_started_url_method() {
        let mut entries = vec![
            entry(10, "b", "GET"),
            entry(10, "a", "POST"),
            entry(10, "a", "GET"),
            entry(5, "z", "GET"),
        ];
        sort_network_entries(&mut entries);
        let keys: Vec<(i64, String, String)> = entries
            .iter()
            .map(|e| (e.started_ms, e.url.clone(), e.method.clone()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (5, "z".into(), "GET".into()),
                (10, "a".into(), "GET".into()),
                (10, "a".into(), "POST".into()),
                (10, "b".into(), "GET".into()),
            ]
        );
    }

    #[test]
    fn binary_heuristic() {
        assert!(looks_binary(b"\x00abc"));
        assert!(looks_binary(b"\x01\x02\x03\x04ab"));
        assert!(!looks_binary(b"plain text\nwith lines\t"));
        assert!(!looks_binary(b""));
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let mut e = entry(0, "u", "GET");
        e.status = 200;
        e.compute_ok();
        let v = serde_json::to_value(&e).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("request_body").is_none());
        assert!(v.get("truncated").is_none());
        assert!(v.get("request_headers").is_none());
    }
}
