//! Page catalogue and per-page console ring.
//!
//! The catalogue is a name-keyed map behind one RwLock, held only for
//! create/find/close. Each page owns a bounded console ring (writer: the
//! page's event pump; readers copy under a short lock) and a call mutex that
//! serializes browser-side operations on that page.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use devbrowser_types::{console_level_for_type, ConsoleEntry};

/// Fixed console ring capacity per page.
pub const CONSOLE_RING_CAPACITY: usize = 2000;

/// Append-only bounded buffer of console entries for one page.
pub struct ConsoleRing {
    entries: VecDeque<ConsoleEntry>,
    next_id: u64,
    attached: Instant,
}

impl Default for ConsoleRing {
    fn default() -> Self {
        Self {
            entries: VecDeque::with_capacity(64),
            next_id: 1,
            attached: Instant::now(),
        }
    }
}

impl ConsoleRing {
    /// Milliseconds since the page was attached.
    pub fn elapsed_ms(&self) -> i64 {
        self.attached.elapsed().as_millis() as i64
    }

    /// Append an entry, assigning its monotonic id and timestamp.
    pub fn push(&mut self, kind: String, text: String, url: String, line: i64, column: i64) {
        let entry = ConsoleEntry {
            id: self.next_id,
            time_ms: self.elapsed_ms(),
            kind,
            text,
            url,
            line,
            column,
        };
        self.next_id += 1;
        if self.entries.len() >= CONSOLE_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most-recent-first snapshot, bounded by `limit`, optionally filtered to
    /// the given count levels (`error`/`warning`/`info`).
    pub fn snapshot(&self, limit: usize, levels: Option<&[String]>) -> Vec<ConsoleEntry> {
        let wants = |entry: &ConsoleEntry| match levels {
            None => true,
            Some(levels) => {
                let level = console_level_for_type(&entry.kind);
                levels.iter().any(|l| l == level || l == "all")
            }
        };
        self.entries
            .iter()
            .rev()
            .filter(|e| wants(e))
            .take(limit.max(1))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One named page owned by the daemon.
pub struct PageHandle {
    pub name: String,
    pub target_id: String,
    pub console: Mutex<ConsoleRing>,
    /// Serializes browser-side calls touching this page.
    pub call_lock: Mutex<()>,
    /// Event pump task; aborted when the page is closed.
    pump: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PageHandle {
    pub fn new(name: String, target_id: String) -> Arc<Self> {
        Arc::new(Self {
            name,
            target_id,
            console: Mutex::new(ConsoleRing::default()),
            call_lock: Mutex::new(()),
            pump: std::sync::Mutex::new(None),
        })
    }

    pub fn set_pump(&self, handle: tokio::task::JoinHandle<()>) {
        let mut pump = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = pump.replace(handle) {
            old.abort();
        }
    }

    pub fn stop_pump(&self) {
        let mut pump = self.pump.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pump.take() {
            handle.abort();
        }
    }
}

/// Name-keyed page catalogue.
#[derive(Default)]
pub struct Pages {
    map: RwLock<HashMap<String, Arc<PageHandle>>>,
}

impl Pages {
    pub async fn get(&self, name: &str) -> Option<Arc<PageHandle>> {
        self.map.read().await.get(name).cloned()
    }

    pub async fn insert(&self, page: Arc<PageHandle>) {
        self.map.write().await.insert(page.name.clone(), page);
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<PageHandle>> {
        self.map.write().await.remove(name)
    }

    pub async fn list(&self) -> Vec<Arc<PageHandle>> {
        let mut pages: Vec<_> = self.map.read().await.values().cloned().collect();
        pages.sort_by(|a, b| a.name.cmp(&b.name));
        pages
    }

    pub async fn drain(&self) -> Vec<Arc<PageHandle>> {
        self.map.write().await.drain().map(|(_, p)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_n(ring: &mut ConsoleRing, n: usize, kind: &str) {
        for i in 0..n {
            ring.push(kind.into(), format!("msg {i}"), String::new(), 0, 0);
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let mut ring = ConsoleRing::default();
        push_n(&mut ring, 3, "log");
        let snapshot = ring.snapshot(10, None);
        let ids: Vec<u64> = snapshot.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = ConsoleRing::default();
        push_n(&mut ring, CONSOLE_RING_CAPACITY + 50, "log");
        assert_eq!(ring.len(), CONSOLE_RING_CAPACITY);
        // Oldest entries were evicted; the newest id survives.
        let snapshot = ring.snapshot(1, None);
        assert_eq!(snapshot[0].id, (CONSOLE_RING_CAPACITY + 50) as u64);
    }

    #[test]
    fn snapshot_is_most_recent_first_and_bounded() {
        let mut ring = ConsoleRing::default();
        push_n(&mut ring, 10, "log");
        let snapshot = ring.snapshot(3, None);
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot[0].id > snapshot[1].id);
    }

    #[test]
    fn level_filter_applies() {
        let mut ring = ConsoleRing::default();
        push_n(&mut ring, 2, "error");
        push_n(&mut ring, 3, "log");
        push_n(&mut ring, 1, "warning");

        let errors = ring.snapshot(10, Some(&["error".to_string()]));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == "error"));

        let all = ring.snapshot(10, Some(&["all".to_string()]));
        assert_eq!(all.len(), 6);
    }

    #[tokio::test]
    async fn catalogue_create_find_remove() {
        let pages = Pages::default();
        pages.insert(PageHandle::new("main".into(), "T1".into())).await;
        pages.insert(PageHandle::new("aux".into(), "T2".into())).await;

        assert!(pages.get("main").await.is_some());
        let listed = pages.list().await;
        assert_eq!(
            listed.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["aux", "main"]
        );

        assert!(pages.remove("aux").await.is_some());
        assert!(pages.get("aux").await.is_none());
        assert!(pages.remove("aux").await.is_none());
    }
}
