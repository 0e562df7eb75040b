use crate::health::HealthProbe;
use crate::provisioner::Provisioner;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use portico_core::{
    proxy_key, Credential, ManagedProxy, ProxyDetail, ProxyRecord, ProxyStatus, ProxyStore,
};
use portico_errors::{ControlError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const INTERRUPTED_BY_RESTART: &str = "provisioning interrupted by restart";

#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub provision_timeout: Duration,
    /// Consecutive failed probes before an active proxy is demoted.
    pub max_misses: u32,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self { provision_timeout: Duration::from_secs(600), max_misses: 3 }
    }
}

/// Outcome of one health reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub probed: usize,
    pub healthy: usize,
    pub demoted: usize,
}

/// Managed proxy fleet: deployment state machine, provisioning supervisor and
/// health reconciliation.
///
/// Provisioning runs on background tasks keyed by `(ip, port)`. Each attempt
/// has a number stored on the record; an outcome is applied only while the
/// record still exists, is deploying, and carries that number, so a removed
/// proxy is never brought back by a late completion.
pub struct Fleet {
    store: Arc<dyn ProxyStore>,
    provisioner: Arc<dyn Provisioner>,
    probe: Arc<dyn HealthProbe>,
    settings: FleetSettings,
    attempts: DashMap<SocketAddr, (u64, AbortHandle)>,
    next_attempt: AtomicU64,
}

impl Fleet {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn HealthProbe>,
        settings: FleetSettings,
    ) -> Arc<Self> {
        let last = store.list().iter().map(|r| r.attempt).max().unwrap_or(0);
        Arc::new(Self {
            store,
            provisioner,
            probe,
            settings,
            attempts: DashMap::new(),
            next_attempt: AtomicU64::new(last + 1),
        })
    }

    fn not_found(key: SocketAddr) -> ControlError {
        ControlError::not_found(format!("proxy {key} is not registered"))
    }

    pub fn list(&self) -> Vec<ManagedProxy> {
        let mut proxies: Vec<ManagedProxy> = self.store.list().into_iter().map(|r| r.proxy).collect();
        proxies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        proxies
    }

    pub fn get(&self, ip: &str, port: u16) -> Result<ProxyDetail> {
        let key = proxy_key(ip, port)?;
        self.store.get(&key).map(ProxyDetail::from).ok_or_else(|| Self::not_found(key))
    }

    /// Registers a host in `deploying` and starts provisioning it in the background.
    pub fn add(
        self: &Arc<Self>,
        ip: &str,
        port: u16,
        username: &str,
        credential: Credential,
    ) -> Result<ManagedProxy> {
        let key = proxy_key(ip, port)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(ControlError::validation("username is required"));
        }
        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
        let record = ProxyRecord {
            proxy: ManagedProxy {
                id: Uuid::new_v4().to_string(),
                ip: key.ip(),
                port: key.port(),
                status: ProxyStatus::Deploying,
                created_at: Utc::now(),
                last_seen: None,
            },
            last_error: None,
            misses: 0,
            attempt,
        };
        self.store.insert(record.clone())?;
        info!(proxy = %key, id = %record.proxy.id, credential = credential.kind(), "proxy registered, provisioning");
        self.spawn_provisioning(key, attempt, username.to_string(), credential);
        Ok(record.proxy)
    }

    /// Manual redeploy of a proxy in `error`.
    pub fn retry(
        self: &Arc<Self>,
        ip: &str,
        port: u16,
        username: &str,
        credential: Credential,
    ) -> Result<ManagedProxy> {
        let key = proxy_key(ip, port)?;
        let username = username.trim();
        if username.is_empty() {
            return Err(ControlError::validation("username is required"));
        }
        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
        let mut rejected = None;
        let record = self
            .store
            .modify(&key, &mut |rec| match rec.transition(ProxyStatus::Deploying) {
                Ok(()) => {
                    rec.attempt = attempt;
                    rec.misses = 0;
                    rec.last_error = None;
                    true
                }
                Err(e) => {
                    rejected = Some(e);
                    false
                }
            })?
            .ok_or_else(|| Self::not_found(key))?;
        if let Some(e) = rejected {
            return Err(e);
        }
        info!(proxy = %key, attempt, "retrying provisioning");
        self.spawn_provisioning(key, attempt, username.to_string(), credential);
        Ok(record.proxy)
    }

    /// Forgets a proxy immediately and asks the provisioning service to tear
    /// it down in the background. Teardown failures are only logged.
    pub fn remove(&self, ip: &str, port: u16) -> Result<()> {
        let key = proxy_key(ip, port)?;
        let removed = self.store.remove(&key)?.ok_or_else(|| Self::not_found(key))?;
        if let Some((_, (attempt, handle))) = self.attempts.remove(&key) {
            handle.abort();
            debug!(proxy = %key, attempt, "cancelled in-flight provisioning");
        }
        info!(proxy = %key, id = %removed.proxy.id, status = %removed.proxy.status, "proxy removed");

        let provisioner = self.provisioner.clone();
        tokio::spawn(async move {
            match provisioner.deprovision(key).await {
                Ok(()) => info!(proxy = %key, "proxy deprovisioned"),
                Err(e) => warn!(proxy = %key, "deprovisioning failed, ignoring: {e}"),
            }
        });
        Ok(())
    }

    fn spawn_provisioning(
        self: &Arc<Self>,
        key: SocketAddr,
        attempt: u64,
        username: String,
        credential: Credential,
    ) {
        let fleet = self.clone();
        // Hold the shard while spawning so the task's own cleanup always
        // runs after its handle is registered.
        let entry = self.attempts.entry(key);
        let task = tokio::spawn(async move {
            let outcome = match timeout(
                fleet.settings.provision_timeout,
                fleet.provisioner.provision(key, &username, &credential),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ControlError::upstream(format!(
                    "provisioning timed out after {:?}",
                    fleet.settings.provision_timeout
                ))),
            };
            fleet.complete_provisioning(key, attempt, outcome);
        });
        entry.insert((attempt, task.abort_handle()));
    }

    /// Applies a provisioning outcome. Returns whether it was applied; stale
    /// attempts and outcomes for removed proxies are dropped.
    pub fn complete_provisioning(&self, key: SocketAddr, attempt: u64, outcome: Result<()>) -> bool {
        self.attempts.remove_if(&key, |_, (a, _)| *a == attempt);
        let next = if outcome.is_ok() { ProxyStatus::Active } else { ProxyStatus::Error };
        let mut applied = false;
        let res = self.store.modify(&key, &mut |rec| {
            if rec.attempt != attempt || rec.proxy.status != ProxyStatus::Deploying {
                return false;
            }
            if rec.transition(next).is_err() {
                return false;
            }
            match &outcome {
                Ok(()) => {
                    rec.proxy.last_seen = Some(Utc::now());
                    rec.misses = 0;
                    rec.last_error = None;
                }
                Err(e) => rec.last_error = Some(e.to_string()),
            }
            applied = true;
            true
        });
        match res {
            Err(e) => {
                error!(proxy = %key, attempt, "could not record provisioning outcome: {e}");
                false
            }
            Ok(_) if !applied => {
                debug!(proxy = %key, attempt, "dropping stale provisioning outcome");
                false
            }
            Ok(_) => {
                match &outcome {
                    Ok(()) => info!(proxy = %key, attempt, "proxy active"),
                    Err(e) => warn!(proxy = %key, attempt, "provisioning failed: {e}"),
                }
                true
            }
        }
    }

    /// Marks records left in `deploying` by a previous process as failed.
    pub fn recover_interrupted(&self) -> usize {
        let mut recovered = 0;
        for rec in self.store.list() {
            if rec.proxy.status != ProxyStatus::Deploying {
                continue;
            }
            let key = rec.key();
            let res = self.store.modify(&key, &mut |r| {
                if r.proxy.status != ProxyStatus::Deploying || r.transition(ProxyStatus::Error).is_err() {
                    return false;
                }
                r.last_error = Some(INTERRUPTED_BY_RESTART.to_string());
                true
            });
            match res {
                Ok(Some(r)) if r.proxy.status == ProxyStatus::Error => {
                    warn!(proxy = %key, "{INTERRUPTED_BY_RESTART}");
                    recovered += 1;
                }
                Ok(_) => {}
                Err(e) => error!(proxy = %key, "could not mark interrupted proxy: {e}"),
            }
        }
        recovered
    }

    /// Probes every active proxy once, concurrently.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let active: Vec<SocketAddr> = self
            .store
            .list()
            .into_iter()
            .filter(|r| r.proxy.status == ProxyStatus::Active)
            .map(|r| r.key())
            .collect();

        let results = join_all(active.into_iter().map(|key| {
            let probe = self.probe.clone();
            async move { (key, probe.check(key).await) }
        }))
        .await;

        let mut report = ReconcileReport { probed: results.len(), ..Default::default() };
        for (key, result) in results {
            if result.is_ok() {
                report.healthy += 1;
            }
            if self.apply_probe(key, result) {
                report.demoted += 1;
            }
        }
        report
    }

    /// Returns true when the probe demoted the proxy.
    fn apply_probe(&self, key: SocketAddr, result: Result<()>) -> bool {
        let max_misses = self.settings.max_misses;
        let mut demoted = false;
        let res = self.store.modify(&key, &mut |rec| {
            if rec.proxy.status != ProxyStatus::Active {
                return false;
            }
            match &result {
                Ok(()) => {
                    rec.proxy.last_seen = Some(Utc::now());
                    rec.misses = 0;
                }
                Err(e) => {
                    rec.misses += 1;
                    if rec.misses >= max_misses && rec.transition(ProxyStatus::Error).is_ok() {
                        rec.last_error = Some(format!("{} consecutive health checks failed: {e}", rec.misses));
                        demoted = true;
                    }
                }
            }
            true
        });
        match (&result, res) {
            (_, Err(e)) => {
                error!(proxy = %key, "could not record health result: {e}");
                false
            }
            (Err(e), Ok(Some(rec))) if demoted => {
                warn!(proxy = %key, misses = rec.misses, "proxy demoted to error: {e}");
                true
            }
            (Err(e), Ok(Some(rec))) if rec.proxy.status == ProxyStatus::Active => {
                debug!(proxy = %key, misses = rec.misses, "health check missed: {e}");
                false
            }
            _ => false,
        }
    }

    /// Health reconciliation loop; runs until the task is aborted.
    pub async fn run_health_checks(self: Arc<Self>, every: Duration) {
        info!("health reconciliation every {:?}", every);
        loop {
            sleep(every).await;
            let report = self.reconcile_once().await;
            if report.probed > 0 {
                debug!(
                    probed = report.probed,
                    healthy = report.healthy,
                    demoted = report.demoted,
                    "health reconciliation pass"
                );
            }
        }
    }

    /// Number of provisioning attempts currently tracked.
    pub fn in_flight(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ProxyTable;
    use async_trait::async_trait;
    use portico_memory::Memory;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Provisioner that blocks until released and records teardown calls.
    struct GatedProvisioner {
        gate: Semaphore,
        fail_provision: AtomicBool,
        fail_deprovision: bool,
        deprovisioned: Mutex<Vec<SocketAddr>>,
    }

    impl GatedProvisioner {
        fn new(fail_deprovision: bool) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                fail_provision: AtomicBool::new(false),
                fail_deprovision,
                deprovisioned: Mutex::new(Vec::new()),
            })
        }

        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    #[async_trait]
    impl Provisioner for GatedProvisioner {
        async fn provision(&self, _target: SocketAddr, _username: &str, _credential: &Credential) -> Result<()> {
            let permit = self.gate.acquire().await.map_err(|e| ControlError::upstream(e.to_string()))?;
            permit.forget();
            if self.fail_provision.load(Ordering::SeqCst) {
                Err(ControlError::upstream("ssh: connection refused"))
            } else {
                Ok(())
            }
        }

        async fn deprovision(&self, target: SocketAddr) -> Result<()> {
            self.deprovisioned.lock().unwrap().push(target);
            if self.fail_deprovision {
                Err(ControlError::upstream("agent unreachable"))
            } else {
                Ok(())
            }
        }
    }

    struct SwitchProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for SwitchProbe {
        async fn check(&self, _target: SocketAddr) -> Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ControlError::upstream("connection refused"))
            }
        }
    }

    struct Harness {
        fleet: Arc<Fleet>,
        provisioner: Arc<GatedProvisioner>,
        probe: Arc<SwitchProbe>,
        table: Arc<ProxyTable>,
    }

    fn harness(fail_deprovision: bool) -> Harness {
        let table = Arc::new(ProxyTable::new(Arc::new(Memory::memory())));
        let provisioner = GatedProvisioner::new(fail_deprovision);
        let probe = Arc::new(SwitchProbe { healthy: AtomicBool::new(true) });
        let fleet = Fleet::new(
            table.clone(),
            provisioner.clone(),
            probe.clone(),
            FleetSettings { provision_timeout: Duration::from_secs(5), max_misses: 3 },
        );
        Harness { fleet, provisioner, probe, table }
    }

    fn password() -> Credential {
        Credential::Password("hunter2".into())
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn status(h: &Harness, ip: &str, port: u16) -> Option<ProxyStatus> {
        h.fleet.get(ip, port).ok().map(|d| d.proxy.status)
    }

    #[tokio::test]
    async fn add_deploys_then_activates() {
        let h = harness(false);
        let proxy = h.fleet.add("10.0.0.1", 3000, "root", password()).unwrap();
        assert_eq!(proxy.status, ProxyStatus::Deploying);
        assert!(proxy.last_seen.is_none());
        assert_eq!(status(&h, "10.0.0.1", 3000), Some(ProxyStatus::Deploying));

        h.provisioner.release(1);
        eventually(|| status(&h, "10.0.0.1", 3000) == Some(ProxyStatus::Active)).await;
        let detail = h.fleet.get("10.0.0.1", 3000).unwrap();
        assert!(detail.proxy.last_seen.is_some());
        assert!(detail.last_error.is_none());
        eventually(|| h.fleet.in_flight() == 0).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn instant_completions_leave_nothing_in_flight() {
        let h = harness(false);
        h.provisioner.release(64);
        for port in 1..=64 {
            h.fleet.add("10.0.0.5", port, "root", password()).unwrap();
        }
        eventually(|| h.fleet.list().iter().all(|p| p.status == ProxyStatus::Active)).await;
        eventually(|| h.fleet.in_flight() == 0).await;
    }

    #[tokio::test]
    async fn failed_provisioning_records_error() {
        let h = harness(false);
        h.provisioner.fail_provision.store(true, Ordering::SeqCst);
        h.fleet.add("10.0.0.2", 3000, "root", password()).unwrap();
        h.provisioner.release(1);
        eventually(|| status(&h, "10.0.0.2", 3000) == Some(ProxyStatus::Error)).await;
        let detail = h.fleet.get("10.0.0.2", 3000).unwrap();
        assert!(detail.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn add_rejects_bad_input_and_duplicates() {
        let h = harness(false);
        assert!(matches!(h.fleet.add("not-an-ip", 3000, "root", password()), Err(ControlError::Validation(_))));
        assert!(matches!(h.fleet.add("10.0.0.1", 3000, "  ", password()), Err(ControlError::Validation(_))));
        assert!(matches!(h.fleet.add("10.0.0.1", 0, "root", password()), Err(ControlError::Validation(_))));

        h.fleet.add("10.0.0.1", 3000, "root", password()).unwrap();
        assert!(matches!(h.fleet.add("10.0.0.1", 3000, "root", password()), Err(ControlError::Conflict(_))));
        h.fleet.add("10.0.0.1", 3001, "root", password()).unwrap();
        assert_eq!(h.fleet.list().len(), 2);
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let h = harness(false);
        h.fleet.add("10.0.0.3", 3000, "root", password()).unwrap();
        sleep(Duration::from_millis(5)).await;
        h.fleet.add("10.0.0.1", 3000, "root", password()).unwrap();
        sleep(Duration::from_millis(5)).await;
        h.fleet.add("10.0.0.2", 3000, "root", password()).unwrap();
        let ips: Vec<String> = h.fleet.list().iter().map(|p| p.ip.to_string()).collect();
        assert_eq!(ips, ["10.0.0.3", "10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let h = harness(false);
        assert!(matches!(h.fleet.remove("10.0.0.9", 3000), Err(ControlError::NotFound(_))));
        assert!(matches!(h.fleet.get("10.0.0.9", 3000), Err(ControlError::NotFound(_))));
    }

    #[tokio::test]
    async fn remove_during_deploy_is_final() {
        let h = harness(true);
        h.fleet.add("10.0.0.4", 3000, "root", password()).unwrap();
        assert_eq!(h.fleet.in_flight(), 1);

        h.fleet.remove("10.0.0.4", 3000).unwrap();
        assert!(h.fleet.get("10.0.0.4", 3000).is_err());
        assert_eq!(h.fleet.in_flight(), 0);

        // a late release must not bring the record back
        h.provisioner.release(1);
        let key: SocketAddr = "10.0.0.4:3000".parse().unwrap();
        eventually(|| h.provisioner.deprovisioned.lock().unwrap().contains(&key)).await;
        sleep(Duration::from_millis(50)).await;
        assert!(h.fleet.list().is_empty());
        assert!(h.table.get(&key).is_none());
    }

    #[tokio::test]
    async fn stale_outcome_is_dropped() {
        let h = harness(false);
        h.fleet.add("10.0.0.5", 3000, "root", password()).unwrap();
        let key: SocketAddr = "10.0.0.5:3000".parse().unwrap();
        let current = h.table.get(&key).unwrap().attempt;

        assert!(!h.fleet.complete_provisioning(key, current + 100, Ok(())));
        assert_eq!(status(&h, "10.0.0.5", 3000), Some(ProxyStatus::Deploying));

        assert!(h.fleet.complete_provisioning(key, current, Ok(())));
        assert_eq!(status(&h, "10.0.0.5", 3000), Some(ProxyStatus::Active));
        // already applied
        assert!(!h.fleet.complete_provisioning(key, current, Err(ControlError::upstream("late"))));
        assert_eq!(status(&h, "10.0.0.5", 3000), Some(ProxyStatus::Active));

        let missing: SocketAddr = "10.9.9.9:1".parse().unwrap();
        assert!(!h.fleet.complete_provisioning(missing, 1, Ok(())));
        assert!(h.fleet.get("10.9.9.9", 1).is_err());
    }

    #[tokio::test]
    async fn repeated_misses_demote_active_proxy() {
        let h = harness(false);
        h.fleet.add("10.0.0.6", 3000, "root", password()).unwrap();
        h.provisioner.release(1);
        eventually(|| status(&h, "10.0.0.6", 3000) == Some(ProxyStatus::Active)).await;

        h.probe.healthy.store(false, Ordering::SeqCst);
        let report = h.fleet.reconcile_once().await;
        assert_eq!(report, ReconcileReport { probed: 1, healthy: 0, demoted: 0 });
        h.fleet.reconcile_once().await;
        assert_eq!(h.fleet.get("10.0.0.6", 3000).unwrap().consecutive_misses, 2);

        // a success in between resets the streak
        h.probe.healthy.store(true, Ordering::SeqCst);
        let report = h.fleet.reconcile_once().await;
        assert_eq!(report.healthy, 1);
        assert_eq!(h.fleet.get("10.0.0.6", 3000).unwrap().consecutive_misses, 0);

        h.probe.healthy.store(false, Ordering::SeqCst);
        h.fleet.reconcile_once().await;
        h.fleet.reconcile_once().await;
        let report = h.fleet.reconcile_once().await;
        assert_eq!(report.demoted, 1);
        let detail = h.fleet.get("10.0.0.6", 3000).unwrap();
        assert_eq!(detail.proxy.status, ProxyStatus::Error);
        assert!(detail.last_error.unwrap().contains("consecutive health checks failed"));

        // error proxies are no longer probed
        assert_eq!(h.fleet.reconcile_once().await.probed, 0);
    }

    #[tokio::test]
    async fn retry_only_from_error() {
        let h = harness(false);
        h.provisioner.fail_provision.store(true, Ordering::SeqCst);
        h.fleet.add("10.0.0.7", 3000, "root", password()).unwrap();
        assert!(matches!(
            h.fleet.retry("10.0.0.7", 3000, "root", password()),
            Err(ControlError::Conflict(_))
        ));
        h.provisioner.release(1);
        eventually(|| status(&h, "10.0.0.7", 3000) == Some(ProxyStatus::Error)).await;

        h.provisioner.fail_provision.store(false, Ordering::SeqCst);
        let proxy = h
            .fleet
            .retry("10.0.0.7", 3000, "root", Credential::PrivateKey("KEY".into()))
            .unwrap();
        assert_eq!(proxy.status, ProxyStatus::Deploying);
        assert!(h.fleet.get("10.0.0.7", 3000).unwrap().last_error.is_none());
        h.provisioner.release(1);
        eventually(|| status(&h, "10.0.0.7", 3000) == Some(ProxyStatus::Active)).await;

        assert!(matches!(
            h.fleet.retry("10.0.0.7", 3000, "root", password()),
            Err(ControlError::Conflict(_))
        ));
        assert!(matches!(
            h.fleet.retry("10.0.0.8", 3000, "root", password()),
            Err(ControlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn interrupted_deploys_are_marked_failed() {
        let memory = Arc::new(Memory::memory());
        let table = ProxyTable::new(memory.clone());
        let mut rec = ProxyRecord {
            proxy: ManagedProxy {
                id: "a".into(),
                ip: "10.0.0.1".parse().unwrap(),
                port: 3000,
                status: ProxyStatus::Deploying,
                created_at: Utc::now(),
                last_seen: None,
            },
            last_error: None,
            misses: 0,
            attempt: 41,
        };
        table.insert(rec.clone()).unwrap();
        rec.proxy.id = "b".into();
        rec.proxy.port = 3001;
        rec.proxy.status = ProxyStatus::Active;
        table.insert(rec).unwrap();

        let table = Arc::new(ProxyTable::load(memory).unwrap());
        let fleet = Fleet::new(
            table,
            GatedProvisioner::new(false),
            Arc::new(SwitchProbe { healthy: AtomicBool::new(true) }),
            FleetSettings::default(),
        );
        assert_eq!(fleet.recover_interrupted(), 1);
        let detail = fleet.get("10.0.0.1", 3000).unwrap();
        assert_eq!(detail.proxy.status, ProxyStatus::Error);
        assert_eq!(detail.last_error.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert_eq!(fleet.get("10.0.0.1", 3001).unwrap().proxy.status, ProxyStatus::Active);
        assert_eq!(fleet.recover_interrupted(), 0);

        // attempt numbering continues past what was stored
        let proxy = fleet.add("10.0.0.2", 3000, "root", password()).unwrap();
        assert!(fleet.get(&proxy.ip.to_string(), 3000).is_ok());
        assert_eq!(fleet.next_attempt.load(Ordering::SeqCst), 43);
    }
}
