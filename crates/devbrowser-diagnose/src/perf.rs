//! In-page performance probe.
//!
//! Collects navigation/paint timing, best-effort core web vitals via
//! `PerformanceObserver`, an rAF frame-rate sample, and a resource-timing
//! summary with the top-N slowest resources.

use serde_json::Value;

use devbrowser_cdp::{CdpError, PageDriver};

#[derive(Debug, Clone, Copy)]
pub struct PerfOptions {
    pub sample_ms: u64,
    pub top_n: usize,
}

impl Default for PerfOptions {
    fn default() -> Self {
        Self {
            sample_ms: 1200,
            top_n: 20,
        }
    }
}

const PERF_JS: &str = r#"async (opts) => {
  const sampleMs = Math.max(200, Number(opts.sampleMs || 1200));
  const topN = Math.max(0, Number(opts.topN || 20));

  function navTiming() {
    const nav = performance.getEntriesByType('navigation');
    if (!nav || !nav.length) return null;
    return nav[0].toJSON ? nav[0].toJSON() : nav[0];
  }

  function paint() {
    const paints = performance.getEntriesByType('paint') || [];
    const out = {};
    for (const p of paints) out[p.name] = p.startTime;
    return out;
  }

  let cls = 0;
  let lcp = null;

  const observers = [];
  function tryObs(type, handler) {
    try {
      const po = new PerformanceObserver((list) => handler(list.getEntries()));
      po.observe({ type, buffered: true });
      observers.push(po);
    } catch {}
  }

  tryObs('layout-shift', (entries) => {
    for (const e of entries) {
      if (e && !e.hadRecentInput) cls += e.value || 0;
    }
  });

  tryObs('largest-contentful-paint', (entries) => {
    for (const e of entries) {
      if (!e) continue;
      const v = e.startTime || 0;
      if (lcp === null || v > lcp) lcp = v;
    }
  });

  let frames = 0;
  const rafStart = performance.now();
  await new Promise((resolve) => {
    function tick(now) {
      frames++;
      if (now - rafStart >= sampleMs) return resolve();
      requestAnimationFrame(tick);
    }
    requestAnimationFrame(tick);
  });
  const rafEnd = performance.now();
  const fps = frames / ((rafEnd - rafStart) / 1000);

  for (const o of observers) { try { o.disconnect(); } catch {} }

  const res = performance.getEntriesByType('resource') || [];
  const byType = {};
  const top = [];
  for (const r of res) {
    const t = String(r.initiatorType || 'other');
    const dur = Number(r.duration || 0);
    byType[t] = byType[t] || { count: 0, totalDuration: 0 };
    byType[t].count++;
    byType[t].totalDuration += dur;

    if (topN > 0) top.push({ name: r.name, initiatorType: t, duration: dur, transferSize: r.transferSize || 0 });
  }
  if (topN > 0) top.sort((a, b) => b.duration - a.duration);

  return {
    url: location.href,
    timing: {
      navigation: navTiming(),
      paint: paint(),
    },
    cwv: { cls, lcp },
    fps: { sampleMs, frames, fps },
    resources: {
      total: res.length,
      byType,
      top: topN > 0 ? top.slice(0, topN) : [],
    },
  };
}"#;

/// Run the perf probe on the page.
pub async fn collect_perf(driver: &PageDriver, opts: PerfOptions) -> Result<Value, CdpError> {
    let arg = serde_json::json!({
        "sampleMs": opts.sample_ms.max(1),
        "topN": opts.top_n,
    });
    let result = driver.call_function(PERF_JS, &arg).await?;
    if result.is_object() {
        Ok(result)
    } else {
        Err(CdpError::Transport {
            detail: "unexpected perf metrics result".to_string(),
        })
    }
}

/// Walk a nested JSON path, returning the float at its end if present.
pub fn extract_float(perf: &Value, keys: &[&str]) -> Option<f64> {
    let mut cur = perf;
    for k in keys {
        cur = cur.get(k)?;
    }
    cur.as_f64()
}

/// The stable subset of perf metrics attached to assert context.
pub fn perf_summary(perf: &Value) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(lcp) = extract_float(perf, &["cwv", "lcp"]) {
        out.insert("lcpMs".into(), lcp.into());
    }
    if let Some(cls) = extract_float(perf, &["cwv", "cls"]) {
        out.insert("cls".into(), cls.into());
    }
    if let Some(fps) = extract_float(perf, &["fps", "fps"]) {
        out.insert("fps".into(), fps.into());
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_float_walks_paths() {
        let perf = serde_json::json!({"cwv": {"lcp": 1234.5, "cls": 0.02}});
        assert_eq!(extract_float(&perf, &["cwv", "lcp"]), Some(1234.5));
        assert_eq!(extract_float(&perf, &["cwv", "cls"]), Some(0.02));
        assert_eq!(extract_float(&perf, &["cwv", "inp"]), None);
        assert_eq!(extract_float(&perf, &["fps", "fps"]), None);
    }

    #[test]
    fn summary_keeps_stable_fields_only() {
        let perf = serde_json::json!({
            "cwv": {"lcp": 900.0, "cls": 0.1},
            "fps": {"fps": 59.8, "frames": 72},
            "resources": {"total": 10},
        });
        let summary = perf_summary(&perf);
        assert_eq!(summary["lcpMs"], 900.0);
        assert_eq!(summary["cls"], 0.1);
        assert_eq!(summary["fps"], 59.8);
        assert!(summary.get("resources").is_none());
    }

    #[test]
    fn null_lcp_is_absent() {
        let perf = serde_json::json!({"cwv": {"lcp": null, "cls": 0.0}});
        assert_eq!(extract_float(&perf, &["cwv", "lcp"]), None);
    }
}
