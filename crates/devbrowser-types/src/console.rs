//! Console entry type and canonical ordering.

use serde::{Deserialize, Serialize};

/// One captured console method invocation on a page.
///
/// `time_ms` is milliseconds since the page was attached to the daemon;
/// `id` is a per-page monotonic counter, so `(time_ms, id)` is a total order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub id: u64,
    #[serde(rename = "timeMs")]
    pub time_ms: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
}

/// Sort entries by `(time_ms, id)`.
pub fn sort_console_entries(entries: &mut [ConsoleEntry]) {
    entries.sort_by(|a, b| (a.time_ms, a.id).cmp(&(b.time_ms, b.id)));
}

/// Bucket a console type into the `error`/`warning`/`info` count levels.
pub fn console_level_for_type(kind: &str) -> &'static str {
    match kind.trim().to_lowercase().as_str() {
        "error" => "error",
        "warning" | "warn" => "warning",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time_ms: i64, id: u64) -> ConsoleEntry {
        ConsoleEntry {
            id,
            time_ms,
            kind: "log".into(),
            text: format!("t{time_ms}-{id}"),
            ..Default::default()
        }
    }

    #[test]
    fn sorts_by_time_then_id() {
        let mut entries = vec![entry(100, 3), entry(50, 9), entry(100, 1)];
        sort_console_entries(&mut entries);
        let order: Vec<(i64, u64)> = entries.iter().map(|e| (e.time_ms, e.id)).collect();
        assert_eq!(order, vec![(50, 9), (100, 1), (100, 3)]);
    }

    #[test]
    fn level_buckets() {
        assert_eq!(console_level_for_type("error"), "error");
        assert_eq!(console_level_for_type("WARN"), "warning");
        assert_eq!(console_level_for_type("warning"), "warning");
        assert_eq!(console_level_for_type("log"), "info");
        assert_eq!(console_level_for_type("debug"), "info");
        assert_eq!(console_level_for_type("trace"), "info");
    }

    #[test]
    fn json_field_names() {
        let e = entry(5, 1);
        let v = serde_json::to_value(&e).unwrap();
        assert!(v.get("timeMs").is_some());
        assert!(v.get("type").is_some());
        assert!(v.get("time_ms").is_none());
    }
}
