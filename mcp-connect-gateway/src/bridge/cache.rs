//! Connection cache for the bridge path.
//!
//! Keyed by a fingerprint of (server path, args, env). Each fingerprint owns
//! a slot guarded by an async mutex: checkout (probe, recreate, create) runs
//! under the slot lock, so two concurrent requests for the same backend never
//! spawn two clients. The request itself runs outside the lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use mcp_connect_core::GatewayError;
use mcp_connect_core::config::defaults::sweep_interval;
use mcp_connect_core::metrics::GatewayMetrics;
use mcp_connect_core::transport::env::mask_env;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::client::{BridgeClient, BridgeConnector, BridgeTarget};

struct CacheEntry {
    client: Arc<dyn BridgeClient>,
    last_used: Instant,
    in_flight: Arc<AtomicUsize>,
    env: Option<BTreeMap<String, String>>,
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Decrements the in-flight count of an entry when a request finishes.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fingerprint → pooled bridge client.
pub struct BridgeCache {
    slots: DashMap<String, Slot>,
    connector: Arc<dyn BridgeConnector>,
    ttl: Duration,
    metrics: GatewayMetrics,
}

/// Deterministic cache key: SHA-256 hex of `[serverPath, args, env]`.
///
/// `env` is a sorted map, so key order in the request does not matter.
pub fn fingerprint(target: &BridgeTarget) -> String {
    let canonical = serde_json::to_vec(&(&target.server_path, &target.args, &target.env))
        .unwrap_or_else(|_| target.server_path.as_bytes().to_vec());
    let digest = Sha256::digest(&canonical);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl BridgeCache {
    pub fn new(connector: Arc<dyn BridgeConnector>, ttl: Duration, metrics: GatewayMetrics) -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            connector,
            ttl,
            metrics,
        })
    }

    /// Number of fingerprints with a live client.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().try_lock().map_or(true, |guard| guard.is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one bridge round trip against the pooled client for `target`.
    ///
    /// # Errors
    ///
    /// Connection failures and backend errors, unchanged.
    pub async fn execute(
        &self,
        target: &BridgeTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, GatewayError> {
        let key = fingerprint(target);
        let (client, in_flight) = self.checkout(&key, target).await?;
        let result = client.request(method, params).await;
        drop(in_flight);

        if let Some(slot) = self.slots.get(&key).map(|s| Arc::clone(s.value())) {
            let mut guard = slot.lock().await;
            if let Some(entry) = guard.as_mut().filter(|e| Arc::ptr_eq(&e.client, &client)) {
                entry.last_used = Instant::now();
            }
        }
        result
    }

    /// Probe-or-create the client for `key`, under the slot lock.
    async fn checkout(
        &self,
        key: &str,
        target: &BridgeTarget,
    ) -> Result<(Arc<dyn BridgeClient>, InFlight), GatewayError> {
        let slot = Arc::clone(self.slots.entry(key.to_string()).or_default().value());
        let mut guard = slot.lock().await;

        let probe = match guard.as_ref() {
            Some(entry) => Some(entry.client.ping().await),
            None => None,
        };
        match probe {
            Some(Ok(())) => {
                if let Some(entry) = guard.as_mut() {
                    self.metrics.bridge_cache_hits.inc();
                    entry.last_used = Instant::now();
                    entry.in_flight.fetch_add(1, Ordering::AcqRel);
                    tracing::debug!(fingerprint = %key, client_id = %entry.client.id(), "reusing bridge client");
                    return Ok((Arc::clone(&entry.client), InFlight(Arc::clone(&entry.in_flight))));
                }
            }
            Some(Err(e)) => {
                if let Some(stale) = guard.take() {
                    tracing::warn!(
                        fingerprint = %key,
                        client_id = %stale.client.id(),
                        error = %e,
                        "bridge client failed liveness probe, recreating"
                    );
                    self.evict(key, stale).await;
                }
            }
            None => {}
        }

        self.metrics.bridge_cache_misses.inc();
        tracing::info!(
            fingerprint = %key,
            command = %target.server_path,
            args = ?target.args,
            env = ?target.env.as_ref().map(mask_env),
            "creating bridge client"
        );
        let client = self.connector.connect(target).await?;
        let in_flight = Arc::new(AtomicUsize::new(1));
        *guard = Some(CacheEntry {
            client: Arc::clone(&client),
            last_used: Instant::now(),
            in_flight: Arc::clone(&in_flight),
            env: target.env.clone(),
        });
        self.metrics.bridge_cache_entries.inc();
        Ok((client, InFlight(in_flight)))
    }

    async fn evict(&self, key: &str, entry: CacheEntry) {
        self.metrics.bridge_cache_entries.dec();
        self.metrics.bridge_cache_evictions.inc();
        if let Err(e) = entry.client.close().await {
            tracing::warn!(
                fingerprint = %key,
                client_id = %entry.client.id(),
                env_vars = entry.env.as_ref().map_or(0, BTreeMap::len),
                error = %e,
                "failed to close bridge client"
            );
        }
    }

    /// Drop the slot for `key` if it is still `slot` and empty.
    fn remove_empty_slot(&self, key: &str, slot: &Slot) {
        self.slots.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot) && current.try_lock().is_ok_and(|guard| guard.is_none())
        });
    }

    /// Close clients idle beyond the TTL.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now()).await
    }

    /// Close clients idle beyond the TTL as of `now`.
    ///
    /// Busy slots and entries with requests in flight are skipped. A failure
    /// closing one client is logged and does not stop the sweep.
    pub async fn sweep_expired_at(&self, now: Instant) -> usize {
        let slots: Vec<(String, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (key, slot) in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = guard.as_ref().is_some_and(|entry| {
                entry.in_flight.load(Ordering::Acquire) == 0
                    && now.saturating_duration_since(entry.last_used) > self.ttl
            });
            let stale = if expired { guard.take() } else { None };
            let empty = guard.is_none();
            drop(guard);

            if let Some(entry) = stale {
                tracing::info!(fingerprint = %key, client_id = %entry.client.id(), "evicting idle bridge client");
                self.evict(&key, entry).await;
                evicted += 1;
            }
            if empty {
                self.remove_empty_slot(&key, &slot);
            }
        }
        evicted
    }

    /// Run `sweep_expired` every TTL/3 until `shutdown` is cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = sweep_interval(self.ttl);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("bridge cache sweeper stopping due to shutdown");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        let evicted = cache.sweep_expired().await;
                        if evicted > 0 {
                            tracing::debug!(evicted, "bridge cache sweep complete");
                        }
                    }
                }
            }
        })
    }

    /// Close every cached client. Failures are logged; the rest still close.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        self.slots.clear();

        for (key, slot) in slots {
            let entry = slot.lock().await.take();
            if let Some(entry) = entry {
                self.metrics.bridge_cache_entries.dec();
                if let Err(e) = entry.client.close().await {
                    tracing::warn!(fingerprint = %key, error = %e, "failed to close bridge client during shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcp_connect_core::TransportError;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeClient {
        id: String,
        alive: AtomicBool,
        closed: AtomicBool,
        fail_close: bool,
    }

    #[async_trait]
    impl BridgeClient for FakeClient {
        fn id(&self) -> &str {
            &self.id
        }

        async fn request(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
            if !self.alive.load(Ordering::SeqCst) {
                return Err(TransportError::SessionClosed.into());
            }
            Ok(json!({"client": self.id, "method": method, "params": params}))
        }

        async fn close(&self) -> Result<(), GatewayError> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(TransportError::BrokenPipe.into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        created: parking_lot::Mutex<Vec<Arc<FakeClient>>>,
        fail_close: bool,
    }

    #[async_trait]
    impl BridgeConnector for FakeConnector {
        async fn connect(&self, _target: &BridgeTarget) -> Result<Arc<dyn BridgeClient>, GatewayError> {
            let mut created = self.created.lock();
            let client = Arc::new(FakeClient {
                id: format!("fake-{}", created.len() + 1),
                alive: AtomicBool::new(true),
                fail_close: self.fail_close,
                ..FakeClient::default()
            });
            created.push(Arc::clone(&client));
            Ok(client)
        }
    }

    fn target(path: &str) -> BridgeTarget {
        BridgeTarget {
            server_path: path.to_string(),
            args: Some(vec!["--stdio".to_string()]),
            env: None,
        }
    }

    fn cache(connector: &Arc<FakeConnector>, ttl: Duration) -> Arc<BridgeCache> {
        BridgeCache::new(
            Arc::clone(connector) as Arc<dyn BridgeConnector>,
            ttl,
            GatewayMetrics::unregistered(),
        )
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_env_order_free() {
        let mut a = target("/bin/server");
        a.env = Some(BTreeMap::from([
            ("B".to_string(), "2".to_string()),
            ("A".to_string(), "1".to_string()),
        ]));
        let mut b = target("/bin/server");
        b.env = Some(BTreeMap::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]));
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);

        b.args = None;
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn test_identical_targets_reuse_client() {
        let connector = Arc::new(FakeConnector::default());
        let cache = cache(&connector, Duration::from_secs(60));

        let first = cache.execute(&target("/bin/s"), "tools/list", json!({})).await.unwrap();
        let second = cache.execute(&target("/bin/s"), "tools/list", json!({})).await.unwrap();

        assert_eq!(first["client"], "fake-1");
        assert_eq!(second["client"], "fake-1");
        assert_eq!(connector.created.lock().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_targets_get_distinct_clients() {
        let connector = Arc::new(FakeConnector::default());
        let cache = cache(&connector, Duration::from_secs(60));

        cache.execute(&target("/bin/a"), "ping", json!({})).await.unwrap();
        cache.execute(&target("/bin/b"), "ping", json!({})).await.unwrap();
        assert_eq!(connector.created.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_probe_recreates_exactly_once() {
        let connector = Arc::new(FakeConnector::default());
        let cache = cache(&connector, Duration::from_secs(60));

        cache.execute(&target("/bin/s"), "ping", json!({})).await.unwrap();
        let stale = Arc::clone(&connector.created.lock()[0]);
        stale.alive.store(false, Ordering::SeqCst);

        let result = cache.execute(&target("/bin/s"), "tools/list", json!({})).await.unwrap();
        assert_eq!(result["client"], "fake-2");
        assert!(stale.closed.load(Ordering::SeqCst));
        assert_eq!(connector.created.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_requests_create_one_client() {
        let connector = Arc::new(FakeConnector::default());
        let cache = cache(&connector, Duration::from_secs(60));

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.execute(&target("/bin/s"), "ping", json!({})).await })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }
        assert_eq!(connector.created.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_idle_entries() {
        let connector = Arc::new(FakeConnector::default());
        let ttl = Duration::from_secs(30);
        let cache = cache(&connector, ttl);
        cache.execute(&target("/bin/s"), "ping", json!({})).await.unwrap();

        assert_eq!(cache.sweep_expired_at(Instant::now()).await, 0);
        assert_eq!(cache.len(), 1);

        let later = Instant::now() + ttl + Duration::from_secs(1);
        assert_eq!(cache.sweep_expired_at(later).await, 1);
        assert!(cache.is_empty());
        assert!(connector.created.lock()[0].closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_failures_do_not_stop_sweep_or_shutdown() {
        let connector = Arc::new(FakeConnector {
            fail_close: true,
            ..FakeConnector::default()
        });
        let cache = cache(&connector, Duration::from_secs(1));
        cache.execute(&target("/bin/a"), "ping", json!({})).await.unwrap();
        cache.execute(&target("/bin/b"), "ping", json!({})).await.unwrap();

        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(cache.sweep_expired_at(later).await, 2);

        cache.execute(&target("/bin/c"), "ping", json!({})).await.unwrap();
        cache.execute(&target("/bin/d"), "ping", json!({})).await.unwrap();
        cache.close_all().await;
        assert!(cache.is_empty());
        assert!(connector.created.lock().iter().all(|c| c.closed.load(Ordering::SeqCst)));
    }
}
