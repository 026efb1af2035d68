//! Transaction finalization monitor - bounded-retry status polling
//!
//! One state record per tracked transaction hash: `Pending` until the
//! backend reports a terminal status, or until the poll ceiling is reached
//! and the monitor synthesizes `TimedOut` ("we gave up waiting", distinct
//! from a chain-reported failure). Terminal transitions remove the record
//! and publish exactly one finalization notification; confirmations also
//! publish refresh hints for balances and, for liquidity operations,
//! positions.

use crate::error::EngineResult;
use crate::events::{EngineEvent, EventBus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Kind of user operation behind a tracked transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Swap,
    AddLiquidity,
    RemoveLiquidity,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Swap => "swap",
            TxKind::AddLiquidity => "add_liquidity",
            TxKind::RemoveLiquidity => "remove_liquidity",
        }
    }

    /// Whether a confirmation should trigger a positions refresh
    pub fn touches_positions(&self) -> bool {
        matches!(self, TxKind::AddLiquidity | TxKind::RemoveLiquidity)
    }
}

/// Tracked-transaction status; the three right-hand states are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    TimedOut,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::TimedOut => "timed_out",
        }
    }
}

/// Status as reported by the backend for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteTxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Upstream status-check seam
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxStatusFetcher: Send + Sync {
    async fn status(&self, chain_uid: &str, tx_hash: &str) -> EngineResult<RemoteTxStatus>;
}

/// State for one tracked transaction
#[derive(Debug, Clone, Serialize)]
pub struct TrackedTransaction {
    pub tx_hash: String,
    pub chain_uid: String,
    pub kind: TxKind,
    pub poll_count: u32,
    pub status: TxStatus,
    pub tracked_at: DateTime<Utc>,
}

/// Observability snapshot of the tracked set
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingStats {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_chain: HashMap<String, usize>,
}

/// Bounded-retry transaction finalization monitor
pub struct TxMonitor {
    fetcher: Arc<dyn TxStatusFetcher>,
    bus: EventBus,
    /// Checks before a still-pending transaction is synthesized `TimedOut`
    max_polls: u32,
    tracked: RwLock<HashMap<String, TrackedTransaction>>,
}

impl TxMonitor {
    pub fn new(fetcher: Arc<dyn TxStatusFetcher>, bus: EventBus, max_polls: u32) -> Self {
        Self {
            fetcher,
            bus,
            max_polls,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a transaction and perform one immediate status check,
    /// not deferred to the shared ticker. Re-tracking a known hash is
    /// idempotent and keeps its poll count, so a duplicate call cannot
    /// extend the timeout ceiling.
    pub async fn track_transaction(&self, tx_hash: &str, chain_uid: &str, kind: TxKind) {
        {
            let mut tracked = self.tracked.write().await;
            if tracked.contains_key(tx_hash) {
                debug!("Transaction {} already tracked", tx_hash);
                return;
            }
            tracked.insert(
                tx_hash.to_string(),
                TrackedTransaction {
                    tx_hash: tx_hash.to_string(),
                    chain_uid: chain_uid.to_string(),
                    kind,
                    poll_count: 0,
                    status: TxStatus::Pending,
                    tracked_at: Utc::now(),
                },
            );
            crate::metrics::record_tx_tracked(tracked.len());
        }

        info!("Tracking {} transaction {} on {}", kind.as_str(), tx_hash, chain_uid);
        self.bus.publish(EngineEvent::TxSubmitted {
            tx_hash: tx_hash.to_string(),
            chain_uid: chain_uid.to_string(),
            kind,
        });

        self.check(tx_hash).await;
    }

    /// Stop tracking without publishing any finalization notification
    /// (explicit cancellation). Unknown hashes are a silent no-op.
    pub async fn stop_tracking(&self, tx_hash: &str) {
        let mut tracked = self.tracked.write().await;
        if tracked.remove(tx_hash).is_some() {
            info!("Stopped tracking transaction {}", tx_hash);
        }
        crate::metrics::record_tx_tracked(tracked.len());
    }

    /// One shared-ticker pass: check every pending transaction. Checks
    /// settle independently; one transaction's failure never cancels the
    /// batch or the ticker.
    pub async fn tick(&self) -> EngineResult<()> {
        let hashes: Vec<String> = self.tracked.read().await.keys().cloned().collect();
        if hashes.is_empty() {
            return Ok(());
        }

        debug!("Checking {} pending transactions", hashes.len());
        join_all(hashes.iter().map(|hash| self.check(hash))).await;
        Ok(())
    }

    /// One status check for one transaction
    async fn check(&self, tx_hash: &str) {
        let Some((chain_uid, kind)) = self
            .tracked
            .read()
            .await
            .get(tx_hash)
            .map(|tx| (tx.chain_uid.clone(), tx.kind))
        else {
            return;
        };

        let result = self.fetcher.status(&chain_uid, tx_hash).await;

        let mut tracked = self.tracked.write().await;
        // stop_tracking may have raced the fetch; a late result against a
        // dead registration is discarded
        let Some(tx) = tracked.get_mut(tx_hash) else {
            return;
        };
        tx.poll_count += 1;

        match &result {
            Ok(RemoteTxStatus::Confirmed) => {
                tracked.remove(tx_hash);
                crate::metrics::record_tx_tracked(tracked.len());
                crate::metrics::record_tx_finalized(TxStatus::Confirmed.as_str());
                info!("Transaction {} confirmed on {}", tx_hash, chain_uid);

                self.bus.publish(EngineEvent::TxFinalized {
                    tx_hash: tx_hash.to_string(),
                    chain_uid: chain_uid.clone(),
                    kind,
                    status: TxStatus::Confirmed,
                });
                self.bus.publish(EngineEvent::BalancesRefresh {
                    chain_uid: chain_uid.clone(),
                });
                if kind.touches_positions() {
                    self.bus.publish(EngineEvent::PositionsRefresh);
                }
            }
            Ok(RemoteTxStatus::Failed) => {
                tracked.remove(tx_hash);
                crate::metrics::record_tx_tracked(tracked.len());
                crate::metrics::record_tx_finalized(TxStatus::Failed.as_str());
                warn!("Transaction {} failed on {}", tx_hash, chain_uid);

                self.bus.publish(EngineEvent::TxFinalized {
                    tx_hash: tx_hash.to_string(),
                    chain_uid: chain_uid.clone(),
                    kind,
                    status: TxStatus::Failed,
                });
            }
            Ok(RemoteTxStatus::Pending) | Err(_) => {
                if let Err(e) = &result {
                    warn!("Status check for {} failed: {}", tx_hash, e);
                }

                if tx.poll_count >= self.max_polls {
                    tracked.remove(tx_hash);
                    crate::metrics::record_tx_tracked(tracked.len());
                    crate::metrics::record_tx_finalized(TxStatus::TimedOut.as_str());
                    warn!(
                        "Gave up waiting for transaction {} after {} checks",
                        tx_hash, self.max_polls
                    );

                    self.bus.publish(EngineEvent::TxTimedOut {
                        tx_hash: tx_hash.to_string(),
                        chain_uid: chain_uid.clone(),
                        kind,
                    });
                }
            }
        }
    }

    /// Whether a hash is currently tracked
    pub async fn is_tracked(&self, tx_hash: &str) -> bool {
        self.tracked.read().await.contains_key(tx_hash)
    }

    /// Number of currently tracked transactions
    pub async fn tracked_count(&self) -> usize {
        self.tracked.read().await.len()
    }

    /// Counts of tracked transactions grouped by kind and chain; read-only
    pub async fn get_stats(&self) -> TrackingStats {
        let tracked = self.tracked.read().await;
        let mut stats = TrackingStats {
            total: tracked.len(),
            ..Default::default()
        };
        for tx in tracked.values() {
            *stats.by_kind.entry(tx.kind.as_str().to_string()).or_insert(0) += 1;
            *stats.by_chain.entry(tx.chain_uid.clone()).or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    /// Scripted per-hash status sequences; repeats the last entry when the
    /// script runs out
    struct ScriptedFetcher {
        scripts: HashMap<String, Vec<EngineResult<RemoteTxStatus>>>,
        calls: AtomicUsize,
        positions: tokio::sync::Mutex<HashMap<String, usize>>,
    }

    impl ScriptedFetcher {
        fn new(scripts: Vec<(&str, Vec<EngineResult<RemoteTxStatus>>)>) -> Self {
            Self {
                scripts: scripts
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                calls: AtomicUsize::new(0),
                positions: tokio::sync::Mutex::new(HashMap::new()),
            }
        }

        fn pending_forever() -> Self {
            Self::new(vec![])
        }
    }

    #[async_trait]
    impl TxStatusFetcher for ScriptedFetcher {
        async fn status(&self, _chain_uid: &str, tx_hash: &str) -> EngineResult<RemoteTxStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let Some(script) = self.scripts.get(tx_hash) else {
                return Ok(RemoteTxStatus::Pending);
            };
            let mut positions = self.positions.lock().await;
            let position = positions.entry(tx_hash.to_string()).or_insert(0);
            let index = (*position).min(script.len().saturating_sub(1));
            *position += 1;
            script[index].clone()
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_removes_publishes_and_hints_balances() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![(
            "0xabc",
            vec![
                Ok(RemoteTxStatus::Pending),
                Ok(RemoteTxStatus::Pending),
                Ok(RemoteTxStatus::Confirmed),
            ],
        )]));
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xabc", "osmosis-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await; // immediate check = #1
        assert!(monitor.is_tracked("0xabc").await);

        monitor.tick().await.unwrap(); // #2, still pending
        assert!(monitor.is_tracked("0xabc").await);

        monitor.tick().await.unwrap(); // #3, confirmed
        assert!(!monitor.is_tracked("0xabc").await);

        let events = drain(&mut rx);
        let finalized: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::TxFinalized { .. }))
            .collect();
        assert_eq!(finalized.len(), 1);
        match finalized[0] {
            EngineEvent::TxFinalized {
                tx_hash,
                chain_uid,
                status,
                ..
            } => {
                assert_eq!(tx_hash, "0xabc");
                assert_eq!(chain_uid, "osmosis-1");
                assert_eq!(*status, TxStatus::Confirmed);
            }
            _ => unreachable!(),
        }

        let balance_hints = events
            .iter()
            .filter(|e| {
                matches!(e, EngineEvent::BalancesRefresh { chain_uid } if chain_uid == "osmosis-1")
            })
            .count();
        assert_eq!(balance_hints, 1);

        // A swap confirmation does not touch positions
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::PositionsRefresh)));
    }

    #[tokio::test(start_paused = true)]
    async fn tracking_performs_an_immediate_check() {
        let mut fetcher = MockTxStatusFetcher::new();
        fetcher
            .expect_status()
            .times(1)
            .returning(|_, _| Ok(RemoteTxStatus::Confirmed));
        let bus = EventBus::new(16);
        let monitor = TxMonitor::new(Arc::new(fetcher), bus, 120);

        // No ticker involved: the confirmation lands on the track call itself
        monitor
            .track_transaction("0xfast", "osmosis-1", TxKind::Swap)
            .await;
        assert!(!monitor.is_tracked("0xfast").await);
    }

    #[tokio::test(start_paused = true)]
    async fn liquidity_confirmation_also_hints_positions() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![(
            "0xdef",
            vec![Ok(RemoteTxStatus::Confirmed)],
        )]));
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xdef", "nibiru-1", TxKind::AddLiquidity)
            .await;
        sleep(Duration::from_millis(1)).await;

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::PositionsRefresh)));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_failure_publishes_failed_without_refresh_hints() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![(
            "0xbad",
            vec![Ok(RemoteTxStatus::Failed)],
        )]));
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xbad", "osmosis-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await;

        assert!(!monitor.is_tracked("0xbad").await);
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::TxFinalized {
                status: TxStatus::Failed,
                ..
            }
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::BalancesRefresh { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_ceiling_synthesizes_exactly_one_timeout() {
        let fetcher = Arc::new(ScriptedFetcher::pending_forever());
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xslow", "osmosis-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await; // check #1

        for _ in 0..118 {
            monitor.tick().await.unwrap();
        }
        assert!(monitor.is_tracked("0xslow").await);

        monitor.tick().await.unwrap(); // check #120
        assert!(!monitor.is_tracked("0xslow").await);

        // Further ticks must not duplicate the notification
        monitor.tick().await.unwrap();
        monitor.tick().await.unwrap();

        let events = drain(&mut rx);
        let timeouts = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::TxTimedOut { .. }))
            .count();
        assert_eq!(timeouts, 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::TxFinalized { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_check_does_not_affect_others() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            (
                "0xerr",
                vec![Err(EngineError::Backend("indexer down".to_string()))],
            ),
            ("0xok", vec![Ok(RemoteTxStatus::Pending), Ok(RemoteTxStatus::Confirmed)]),
        ]));
        let bus = EventBus::new(64);
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xerr", "osmosis-1", TxKind::Swap)
            .await;
        monitor
            .track_transaction("0xok", "nibiru-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await;

        monitor.tick().await.unwrap();

        assert!(monitor.is_tracked("0xerr").await);
        assert!(!monitor.is_tracked("0xok").await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tracking_is_silent_and_idempotent() {
        let fetcher = Arc::new(ScriptedFetcher::pending_forever());
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xgone", "osmosis-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await;
        drain(&mut rx);

        monitor.stop_tracking("0xgone").await;
        assert!(!monitor.is_tracked("0xgone").await);
        monitor.stop_tracking("0xgone").await;
        monitor.stop_tracking("0xnever").await;

        monitor.tick().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retracking_keeps_the_existing_poll_count() {
        let fetcher = Arc::new(ScriptedFetcher::pending_forever());
        let bus = EventBus::new(64);
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0xdup", "osmosis-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await;
        monitor.tick().await.unwrap();

        monitor
            .track_transaction("0xdup", "osmosis-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await;

        let tracked = monitor.tracked.read().await;
        assert_eq!(tracked.get("0xdup").unwrap().poll_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_group_by_kind_and_chain() {
        let fetcher = Arc::new(ScriptedFetcher::pending_forever());
        let bus = EventBus::new(64);
        let monitor = Arc::new(TxMonitor::new(fetcher, bus, 120));

        monitor
            .track_transaction("0x1", "osmosis-1", TxKind::Swap)
            .await;
        monitor
            .track_transaction("0x2", "osmosis-1", TxKind::AddLiquidity)
            .await;
        monitor
            .track_transaction("0x3", "nibiru-1", TxKind::Swap)
            .await;
        sleep(Duration::from_millis(1)).await;

        let stats = monitor.get_stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind["swap"], 2);
        assert_eq!(stats.by_kind["add_liquidity"], 1);
        assert_eq!(stats.by_chain["osmosis-1"], 2);
        assert_eq!(stats.by_chain["nibiru-1"], 1);

        // Stats are read-only
        assert_eq!(monitor.tracked_count().await, 3);
    }
}
