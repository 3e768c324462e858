//! Server registry with staleness-based expiry
//!
//! This module owns the live view of reported game servers: a mapping from
//! server address to the time it last announced itself. Entries that stop
//! reporting go stale and are evicted by a periodic sweep; statically
//! configured official servers are always part of the active snapshot.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" for registration timestamps and staleness decisions.
///
/// Production code uses [`SystemClock`]; tests substitute a manually advanced
/// clock so staleness boundaries can be exercised without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Server Registry
// ============================================================================

/// Registry of reported game servers.
///
/// Shared by every request handler and the background sweep task; all access
/// to the underlying mapping goes through the lock, so a snapshot never
/// observes a partially applied report.
pub struct ServerRegistry {
    /// Reported servers, address -> last report time.
    entries: RwLock<HashMap<String, DateTime<Utc>>>,

    /// Statically configured addresses, always included in the snapshot.
    official: Vec<String>,

    /// Age beyond which a reported entry is no longer considered active.
    stale_timeout: Duration,

    /// Time source.
    clock: Arc<dyn Clock>,
}

impl ServerRegistry {
    /// Create a registry backed by the system clock.
    pub fn new(stale_timeout: std::time::Duration, official: Vec<String>) -> Self {
        Self::with_clock(stale_timeout, official, Arc::new(SystemClock))
    }

    /// Create a registry with an explicit time source.
    pub fn with_clock(
        stale_timeout: std::time::Duration,
        official: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            official,
            stale_timeout: Duration::from_std(stale_timeout).unwrap_or(Duration::MAX),
            clock,
        }
    }

    /// Record a report for `address`, overwriting any previous timestamp.
    ///
    /// The address is expected to be validated at the boundary (IP literal
    /// host, port in range); the registry stores whatever it is given.
    pub async fn report(&self, address: impl Into<String>) {
        let now = self.clock.now();
        self.entries.write().await.insert(address.into(), now);
    }

    /// Oldest report time still considered active.
    ///
    /// Both [`snapshot`](Self::snapshot) and [`sweep_once`](Self::sweep_once)
    /// derive staleness from this one formula; the sweep deletes exactly the
    /// entries a snapshot would filter out.
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.stale_timeout
    }

    /// Point-in-time view of the active server set.
    ///
    /// Returns the union of non-stale reported entries and the official list,
    /// deduplicated and sorted lexicographically, so identical registry state
    /// always renders identically.
    pub async fn snapshot(&self) -> Vec<String> {
        let cutoff = self.cutoff(self.clock.now());
        let entries = self.entries.read().await;

        let mut active: BTreeSet<&str> = entries
            .iter()
            .filter(|(_, ts)| **ts >= cutoff)
            .map(|(addr, _)| addr.as_str())
            .collect();

        for addr in &self.official {
            active.insert(addr);
        }

        active.into_iter().map(str::to_owned).collect()
    }

    /// Delete stale entries, returning how many were removed.
    ///
    /// This is the only path that removes registrations. Running it twice
    /// with no intervening reports removes nothing on the second pass.
    pub async fn sweep_once(&self) -> usize {
        let cutoff = self.cutoff(self.clock.now());
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|addr, ts| {
            let keep = *ts >= cutoff;
            if !keep {
                tracing::info!(address = %addr, last_seen = %ts, "removing stale server");
            }
            keep
        });
        before - entries.len()
    }

    /// Registry counters for the health endpoint.
    pub async fn stats(&self) -> RegistryStats {
        let cutoff = self.cutoff(self.clock.now());
        let entries = self.entries.read().await;

        let mut active: BTreeSet<&str> = entries
            .iter()
            .filter(|(_, ts)| **ts >= cutoff)
            .map(|(addr, _)| addr.as_str())
            .collect();
        for addr in &self.official {
            active.insert(addr);
        }

        RegistryStats {
            tracked: entries.len(),
            active: active.len(),
            official: self.official.len(),
        }
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Reported entries currently held, stale or not.
    pub tracked: usize,

    /// Size of the active snapshot (non-stale union official).
    pub active: usize,

    /// Configured official servers.
    pub official: usize,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    /// Manually advanced clock for deterministic staleness tests.
    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn starting_at_epoch() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(DateTime::UNIX_EPOCH),
            })
        }

        fn advance(&self, secs: i64) {
            let mut now = self.now.lock().unwrap();
            *now = *now + Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn registry_with_clock(
        timeout_secs: u64,
        official: &[&str],
    ) -> (ServerRegistry, Arc<ManualClock>) {
        let clock = ManualClock::starting_at_epoch();
        let registry = ServerRegistry::with_clock(
            StdDuration::from_secs(timeout_secs),
            official.iter().map(|s| s.to_string()).collect(),
            clock.clone(),
        );
        (registry, clock)
    }

    #[tokio::test]
    async fn test_report_then_snapshot_contains_address() {
        let (registry, _clock) = registry_with_clock(60, &[]);

        registry.report("127.0.0.1:2301").await;

        let active = registry.snapshot().await;
        assert_eq!(active, vec!["127.0.0.1:2301"]);
    }

    #[tokio::test]
    async fn test_report_overwrites_previous_timestamp() {
        let (registry, clock) = registry_with_clock(60, &[]);

        registry.report("127.0.0.1:2301").await;
        clock.advance(30);
        registry.report("127.0.0.1:2301").await;

        // 70s after the first report, 40s after the second. Only the
        // refreshed timestamp keeps the entry alive.
        clock.advance(40);
        let active = registry.snapshot().await;
        assert_eq!(active, vec!["127.0.0.1:2301"]);

        let stats = registry.stats().await;
        assert_eq!(stats.tracked, 1);
    }

    #[tokio::test]
    async fn test_stale_entries_filtered_from_snapshot() {
        let (registry, clock) = registry_with_clock(60, &[]);

        registry.report("127.0.0.1:2301").await;

        clock.advance(59);
        assert_eq!(registry.snapshot().await.len(), 1);

        // Past the timeout the entry disappears from snapshots immediately,
        // whether or not a sweep has run yet.
        clock.advance(2);
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_official_servers_survive_staleness() {
        let (registry, clock) = registry_with_clock(60, &["192.168.1.100:1234"]);

        registry.report("192.168.1.100:1234").await;
        clock.advance(3600);

        let active = registry.snapshot().await;
        assert_eq!(active, vec!["192.168.1.100:1234"]);
    }

    #[tokio::test]
    async fn test_reported_and_official_deduplicated() {
        let (registry, _clock) = registry_with_clock(60, &["10.0.0.1:9000"]);

        registry.report("10.0.0.1:9000").await;

        let active = registry.snapshot().await;
        assert_eq!(active, vec!["10.0.0.1:9000"]);
    }

    #[tokio::test]
    async fn test_snapshot_sorted_lexicographically() {
        let (registry, _clock) = registry_with_clock(60, &["10.0.0.1:9000"]);

        registry.report("9.9.9.9:2000").await;
        registry.report("1.2.3.4:2301").await;

        let active = registry.snapshot().await;
        assert_eq!(active, vec!["1.2.3.4:2301", "10.0.0.1:9000", "9.9.9.9:2000"]);
    }

    #[tokio::test]
    async fn test_snapshot_determinism() {
        let (registry, _clock) = registry_with_clock(60, &["10.0.0.1:9000"]);

        registry.report("5.6.7.8:3000").await;
        registry.report("5.6.7.8:3001").await;

        let first = registry.snapshot().await;
        let second = registry.snapshot().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale() {
        let (registry, clock) = registry_with_clock(60, &[]);

        registry.report("1.1.1.1:2000").await;
        clock.advance(120);
        registry.report("2.2.2.2:3000").await;

        let removed = registry.sweep_once().await;
        assert_eq!(removed, 1);

        let stats = registry.stats().await;
        assert_eq!(stats.tracked, 1);
        assert_eq!(registry.snapshot().await, vec!["2.2.2.2:3000"]);
    }

    #[tokio::test]
    async fn test_sweep_idempotent() {
        let (registry, clock) = registry_with_clock(60, &[]);

        registry.report("1.1.1.1:2000").await;
        clock.advance(120);

        assert_eq!(registry.sweep_once().await, 1);
        assert_eq!(registry.sweep_once().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_unchanged_by_sweep() {
        let (registry, clock) = registry_with_clock(60, &["10.0.0.1:9000"]);

        registry.report("1.1.1.1:2000").await;
        clock.advance(120);
        registry.report("2.2.2.2:3000").await;

        // The snapshot already filters stale entries, so physically deleting
        // them must not change what readers see.
        let before = registry.snapshot().await;
        registry.sweep_once().await;
        let after = registry.snapshot().await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let (registry, clock) = registry_with_clock(60, &["10.0.0.1:9000"]);

        registry.report("1.1.1.1:2000").await;
        clock.advance(120);
        registry.report("2.2.2.2:3000").await;

        let stats = registry.stats().await;
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.active, 2); // fresh entry + official
        assert_eq!(stats.official, 1);
    }
}
