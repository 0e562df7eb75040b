use crate::models::MetricsEntry;
use crate::store::MetricsStore;
use dashmap::DashMap;
use portico_errors::{ControlError, Result};
use portico_memory::{Memory, METRICS_DB};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct Counters {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    dirty: AtomicBool,
}

fn saturating_add(counter: &AtomicU64, delta: u64) {
    if delta == 0 {
        return;
    }
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_add(delta)));
}

/// Per-path byte counters.
///
/// The map is only touched to find or create an entry; increments go to the
/// entry's atomics, so concurrent recorders never lose an update.
pub struct MetricsAggregator {
    entries: DashMap<String, Arc<Counters>>,
    memory: Arc<Memory>,
}

impl MetricsAggregator {
    pub fn new(memory: Arc<Memory>) -> Self {
        Self { entries: DashMap::new(), memory }
    }

    pub fn load(memory: Arc<Memory>) -> Result<Self> {
        let aggregator = Self::new(memory);
        let rows: Vec<(String, MetricsEntry)> =
            aggregator.memory.entries(METRICS_DB).map_err(ControlError::storage)?;
        for (path, entry) in rows {
            let counters = Counters::default();
            counters.bytes_in.store(entry.bytes_in, Ordering::Relaxed);
            counters.bytes_out.store(entry.bytes_out, Ordering::Relaxed);
            aggregator.entries.insert(path, Arc::new(counters));
        }
        info!("loaded metrics for {} paths", aggregator.entries.len());
        Ok(aggregator)
    }

    fn counters(&self, path: &str) -> Arc<Counters> {
        if let Some(c) = self.entries.get(path) {
            return c.value().clone();
        }
        self.entries.entry(path.to_string()).or_default().value().clone()
    }
}

impl MetricsStore for MetricsAggregator {
    fn record(&self, path: &str, bytes_in: u64, bytes_out: u64) {
        let counters = self.counters(path);
        saturating_add(&counters.bytes_in, bytes_in);
        saturating_add(&counters.bytes_out, bytes_out);
        counters.dirty.store(true, Ordering::Release);
    }

    fn snapshot(&self) -> BTreeMap<String, MetricsEntry> {
        self.entries
            .iter()
            .map(|e| {
                let c = e.value();
                (
                    e.key().clone(),
                    MetricsEntry {
                        bytes_in: c.bytes_in.load(Ordering::Relaxed),
                        bytes_out: c.bytes_out.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }

    fn reset(&self) {
        for e in self.entries.iter() {
            e.value().bytes_in.store(0, Ordering::Relaxed);
            e.value().bytes_out.store(0, Ordering::Relaxed);
            e.value().dirty.store(true, Ordering::Release);
        }
        info!("metrics reset for {} paths", self.entries.len());
    }

    fn flush(&self) -> Result<usize> {
        let dirty: Vec<(String, Arc<Counters>)> = self
            .entries
            .iter()
            .filter(|e| e.value().dirty.swap(false, Ordering::AcqRel))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        if dirty.is_empty() {
            return Ok(0);
        }
        let rows: Vec<(String, MetricsEntry)> = dirty
            .iter()
            .map(|(path, c)| {
                (
                    path.clone(),
                    MetricsEntry {
                        bytes_in: c.bytes_in.load(Ordering::Relaxed),
                        bytes_out: c.bytes_out.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        if let Err(e) = self.memory.put_many(METRICS_DB, rows) {
            for (_, c) in &dirty {
                c.dirty.store(true, Ordering::Release);
            }
            return Err(ControlError::storage(e));
        }
        debug!("flushed metrics for {} paths", dirty.len());
        Ok(dirty.len())
    }
}
