use crate::models::{MetricsEntry, NewRoute, ProxyRecord, Route, RoutePatch};
use portico_errors::Result;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Route table with the round-robin selection primitive.
pub trait RouteStore: Send + Sync {
    fn create(&self, new: NewRoute) -> Result<Route>;
    /// All routes in registration order.
    fn list(&self) -> Vec<Route>;
    fn get(&self, id: &str) -> Result<Route>;
    fn update(&self, id: &str, patch: RoutePatch) -> Result<Route>;
    fn delete(&self, id: &str) -> Result<()>;
    /// Returns the target under the cursor and advances it, atomically per route.
    fn select_target(&self, id: &str) -> Result<String>;
    /// Persists cursor movement not yet written. Returns the number of routes written.
    fn flush(&self) -> Result<usize>;
}

/// Per-path traffic counters fed by the proxying data path.
pub trait MetricsStore: Send + Sync {
    fn record(&self, path: &str, bytes_in: u64, bytes_out: u64);
    fn snapshot(&self) -> BTreeMap<String, MetricsEntry>;
    fn reset(&self);
    fn flush(&self) -> Result<usize>;
}

/// Managed proxy table keyed by `(ip, port)`.
pub trait ProxyStore: Send + Sync {
    /// Fails with a conflict if the address is already registered.
    fn insert(&self, record: ProxyRecord) -> Result<()>;
    fn get(&self, key: &SocketAddr) -> Option<ProxyRecord>;
    fn list(&self) -> Vec<ProxyRecord>;
    fn remove(&self, key: &SocketAddr) -> Result<Option<ProxyRecord>>;
    /// Runs `f` on the record in place, exclusive with every other access to
    /// that key. When `f` returns true the change is persisted. Returns the
    /// record as left by `f`, or `None` if the key is not registered.
    fn modify(
        &self,
        key: &SocketAddr,
        f: &mut dyn FnMut(&mut ProxyRecord) -> bool,
    ) -> Result<Option<ProxyRecord>>;
}
