//! The merged diagnostic timeline.
//!
//! Every captured console entry, network entry, harness error, and overlay
//! is folded into one list of [`DiagnoseEvent`]s with a stable total order:
//! `(time_ms, kind, content key)`. Events are a tagged sum, so canonical
//! JSON encoding falls out of the struct definitions.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

use devbrowser_types::{ConsoleEntry, NetworkEntry};

/// Event source, ordered lexicographically by its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Console,
    #[serde(rename = "errorhook")]
    ErrorHook,
    Network,
    Overlay,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::ErrorHook => "errorhook",
            Self::Network => "network",
            Self::Overlay => "overlay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleEventData {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub url: String,
    pub line: i64,
    pub col: i64,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEventData {
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub status: i64,
    pub ok: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorHookEventData {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub stack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayEventData {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Event payload, one variant per source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Console(ConsoleEventData),
    Network(NetworkEventData),
    ErrorHook(ErrorHookEventData),
    Overlay(OverlayEventData),
}

/// One entry in the merged timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnoseEvent {
    pub kind: EventKind,
    pub time_ms: i64,
    pub data: EventData,
}

impl DiagnoseEvent {
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.time_ms
            .cmp(&other.time_ms)
            .then_with(|| self.kind.as_str().cmp(other.kind.as_str()))
            .then_with(|| content_cmp(&self.data, &other.data))
    }
}

/// Per-kind tie breaker: console `(id, text)`, network
/// `(url, method, status)`, errorhook `(type, message, stack)`,
/// overlay `(text)`.
fn content_cmp(a: &EventData, b: &EventData) -> Ordering {
    match (a, b) {
        (EventData::Console(x), EventData::Console(y)) => {
            x.id.cmp(&y.id).then_with(|| x.text.cmp(&y.text))
        }
        (EventData::Network(x), EventData::Network(y)) => x
            .url
            .cmp(&y.url)
            .then_with(|| x.method.cmp(&y.method))
            .then_with(|| x.status.cmp(&y.status)),
        (EventData::ErrorHook(x), EventData::ErrorHook(y)) => x
            .kind
            .cmp(&y.kind)
            .then_with(|| x.message.cmp(&y.message))
            .then_with(|| x.stack.cmp(&y.stack)),
        (EventData::Overlay(x), EventData::Overlay(y)) => x.text.cmp(&y.text),
        _ => Ordering::Equal,
    }
}

fn str_field(m: &Value, key: &str) -> String {
    m.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

/// A harness `time_ms` is usable only when finite and strictly positive.
/// Anything else would distort the timeline, so the entry is dropped.
fn harness_time_ms(m: &Value) -> Option<i64> {
    let t = m.get("time_ms")?.as_f64()?;
    if !t.is_finite() || t <= 0.0 {
        return None;
    }
    Some(t as i64)
}

/// Merge all captured inputs into the sorted timeline.
pub fn build_diagnose_events(
    console: &[ConsoleEntry],
    network: &[NetworkEntry],
    harness: Option<&Value>,
) -> Vec<DiagnoseEvent> {
    let mut events = Vec::with_capacity(console.len() + network.len());

    for c in console {
        events.push(DiagnoseEvent {
            kind: EventKind::Console,
            time_ms: c.time_ms,
            data: EventData::Console(ConsoleEventData {
                kind: c.kind.clone(),
                text: c.text.clone(),
                url: c.url.clone(),
                line: c.line,
                col: c.column,
                id: c.id,
            }),
        });
    }

    for n in network {
        events.push(DiagnoseEvent {
            kind: EventKind::Network,
            time_ms: n.started_ms,
            data: EventData::Network(NetworkEventData {
                url: n.url.clone(),
                method: n.method.clone(),
                resource_type: n.resource_type.clone(),
                status: n.status,
                ok: n.ok,
                error: n.error.clone(),
            }),
        });
    }

    if let Some(state) = harness {
        if let Some(errors) = state.get("errors").and_then(|v| v.as_array()) {
            for m in errors {
                let Some(time_ms) = harness_time_ms(m) else {
                    continue;
                };
                events.push(DiagnoseEvent {
                    kind: EventKind::ErrorHook,
                    time_ms,
                    data: EventData::ErrorHook(ErrorHookEventData {
                        kind: str_field(m, "type"),
                        message: str_field(m, "message"),
                        stack: str_field(m, "stack"),
                    }),
                });
            }
        }
        if let Some(overlays) = state.get("overlays").and_then(|v| v.as_array()) {
            for m in overlays {
                let Some(time_ms) = harness_time_ms(m) else {
                    continue;
                };
                events.push(DiagnoseEvent {
                    kind: EventKind::Overlay,
                    time_ms,
                    data: EventData::Overlay(OverlayEventData {
                        kind: str_field(m, "type"),
                        text: str_field(m, "text"),
                    }),
                });
            }
        }
    }

    events.sort_by(DiagnoseEvent::sort_cmp);
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console(time_ms: i64, id: u64, text: &str) -> ConsoleEntry {
        ConsoleEntry {
            id,
            time_ms,
            kind: "log".into(),
            text: text.into(),
            ..Default::default()
        }
    }

    fn network(started: i64, url: &str) -> NetworkEntry {
        NetworkEntry {
            url: url.into(),
            method: "GET".into(),
            started_ms: started,
            status: 200,
            ok: true,
            ..Default::default()
        }
    }

    #[test]
    fn merge_order_is_time_kind_content() {
        // Three consoles at t=100 with ids 3,1,2 and identical text; two
        // networks at t=100 with urls a,b; one harness error at t=100.
        let console_entries = vec![
            console(100, 3, "same"),
            console(100, 1, "same"),
            console(100, 2, "same"),
        ];
        let network_entries = vec![network(100, "b"), network(100, "a")];
        let harness = serde_json::json!({
            "errors": [{ "time_ms": 100.0, "type": "error", "message": "boom", "stack": "" }],
            "overlays": [],
        });

        let events = build_diagnose_events(&console_entries, &network_entries, Some(&harness));
        let summary: Vec<String> = events
            .iter()
            .map(|e| match &e.data {
                EventData::Console(c) => format!("console:{}(id={})", e.time_ms, c.id),
                EventData::Network(n) => format!("network:{}({})", e.time_ms, n.url),
                EventData::ErrorHook(_) => format!("errorhook:{}", e.time_ms),
                EventData::Overlay(_) => format!("overlay:{}", e.time_ms),
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                "console:100(id=1)",
                "console:100(id=2)",
                "console:100(id=3)",
                "errorhook:100",
                "network:100(a)",
                "network:100(b)",
            ]
        );
    }

    #[test]
    fn harness_entries_without_time_are_dropped() {
        let harness = serde_json::json!({
            "errors": [
                { "type": "error", "message": "no time" },
                { "time_ms": "soon", "type": "error", "message": "bad type" },
                { "time_ms": 0.0, "type": "error", "message": "zero" },
                { "time_ms": -5.0, "type": "error", "message": "negative" },
                { "time_ms": 12.0, "type": "error", "message": "kept" },
            ],
            "overlays": [
                { "type": "vite", "text": "overlay without time" },
            ],
        });
        let events = build_diagnose_events(&[], &[], Some(&harness));
        assert_eq!(events.len(), 1);
        match &events[0].data {
            EventData::ErrorHook(e) => assert_eq!(e.message, "kept"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn serialized_shape_is_canonical() {
        let events = build_diagnose_events(&[console(5, 1, "hi")], &[], None);
        let v = serde_json::to_value(&events).unwrap();
        assert_eq!(v[0]["kind"], "console");
        assert_eq!(v[0]["time_ms"], 5);
        assert_eq!(v[0]["data"]["text"], "hi");
        assert_eq!(v[0]["data"]["id"], 1);
    }

    #[test]
    fn identical_inputs_give_identical_bytes() {
        let console_entries = vec![console(3, 2, "x"), console(1, 1, "y")];
        let network_entries = vec![network(2, "u")];
        let a = serde_json::to_string(&build_diagnose_events(
            &console_entries,
            &network_entries,
            None,
        ))
        .unwrap();
        let b = serde_json::to_string(&build_diagnose_events(
            &console_entries,
            &network_entries,
            None,
        ))
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn network_ties_break_on_method_then_status() {
        let mut n1 = network(10, "u");
        n1.method = "POST".into();
        let mut n2 = network(10, "u");
        n2.method = "GET".into();
        let events = build_diagnose_events(&[], &[n1, n2], None);
        match (&events[0].data, &events[1].data) {
            (EventData::Network(a), EventData::Network(b)) => {
                assert_eq!(a.method, "GET");
                assert_eq!(b.method, "POST");
            }
            _ => panic!("expected network events"),
        }
    }
}
