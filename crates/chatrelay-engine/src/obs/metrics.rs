//! Relay metrics registry.
//!
//! Counters, gauges and one latency histogram with dynamic labels, backed by
//! `DashMap` and atomics. Label sets are sorted into a key vector so rendering
//! order is deterministic. Histogram buckets are integer microseconds.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn series(name: &str, labels: &str) -> String {
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{labels}}}")
    }
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{} {val}", series(name, &render_labels(r.key())));
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .store(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} gauge");
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{} {val}", series(name, &render_labels(r.key())));
        }
    }
}

// 10us .. 100ms; a tick drain should sit at the low end.
const BUCKETS_MICROS: [u64; 7] = [10, 50, 100, 500, 1_000, 10_000, 100_000];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; BUCKETS_MICROS.len()],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self
            .map
            .entry(label_key(labels))
            .or_insert_with(AtomicHistogram::default);
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (bucket, &le) in hist.buckets.iter().zip(BUCKETS_MICROS.iter()) {
            if micros <= le {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} histogram");
        for r in self.map.iter() {
            let labels = render_labels(r.key());
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{labels},")
            };
            let hist = r.value();
            for (bucket, le) in hist.buckets.iter().zip(BUCKETS_MICROS.iter()) {
                let n = bucket.load(Ordering::Relaxed);
                let _ = writeln!(out, "{name}_bucket{{{prefix}le=\"{le}\"}} {n}");
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}_bucket{{{prefix}le=\"+Inf\"}} {count}");
            let sum = hist.sum.load(Ordering::Relaxed);
            let _ = writeln!(out, "{} {sum}", series(&format!("{name}_sum"), &labels));
            let _ = writeln!(out, "{} {count}", series(&format!("{name}_count"), &labels));
        }
    }
}

#[derive(Default)]
pub struct RelayMetrics {
    pub envelopes_sent: CounterVec,
    pub send_failures: CounterVec,
    pub decode_errors: CounterVec,
    pub loopback_drops: CounterVec,
    pub late_drops: CounterVec,
    pub applied: CounterVec,
    pub apply_errors: CounterVec,
    pub queue_depth: GaugeVec,
    pub drain_duration: HistogramVec,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prometheus text exposition, plus caller-provided extra lines.
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.envelopes_sent.render("chatrelay_envelopes_sent_total", &mut out);
        self.send_failures.render("chatrelay_send_failures_total", &mut out);
        self.decode_errors.render("chatrelay_decode_errors_total", &mut out);
        self.loopback_drops.render("chatrelay_loopback_drops_total", &mut out);
        self.late_drops.render("chatrelay_late_drops_total", &mut out);
        self.applied.render("chatrelay_applied_total", &mut out);
        self.apply_errors.render("chatrelay_apply_errors_total", &mut out);
        self.queue_depth.render("chatrelay_queue_depth", &mut out);
        self.drain_duration.render("chatrelay_drain_duration_micros", &mut out);
        for (k, v) in extra {
            let _ = writeln!(out, "{k} {v}");
        }
        out
    }
}
