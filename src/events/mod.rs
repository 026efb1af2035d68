//! Engine event types and the in-process notification bus
//!
//! Everything the engine tells the outside world goes through [`EventBus`]:
//! market-data updates per topic, transaction lifecycle transitions, and
//! refresh hints for downstream stores (balances, liquidity positions).

use crate::monitor::{TxKind, TxStatus};
use crate::topics::Topic;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events published by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// A topic's market data was refetched and the snapshot store updated
    MarketDataUpdated { topic: Topic },

    /// A transaction entered tracking
    TxSubmitted {
        tx_hash: String,
        chain_uid: String,
        kind: TxKind,
    },

    /// A tracked transaction reached a remote-reported terminal status
    TxFinalized {
        tx_hash: String,
        chain_uid: String,
        kind: TxKind,
        status: TxStatus,
    },

    /// The monitor gave up waiting (poll ceiling reached, still pending)
    TxTimedOut {
        tx_hash: String,
        chain_uid: String,
        kind: TxKind,
    },

    /// Wallet balances for a chain should be refetched
    BalancesRefresh { chain_uid: String },

    /// Liquidity positions should be refetched
    PositionsRefresh,
}

impl EngineEvent {
    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::MarketDataUpdated { .. } => "market_data_updated",
            EngineEvent::TxSubmitted { .. } => "tx_submitted",
            EngineEvent::TxFinalized { .. } => "tx_finalized",
            EngineEvent::TxTimedOut { .. } => "tx_timed_out",
            EngineEvent::BalancesRefresh { .. } => "balances_refresh",
            EngineEvent::PositionsRefresh => "positions_refresh",
        }
    }
}

/// Broadcast channel wrapper for engine events
///
/// Publishing with zero live receivers is not an error; events are simply
/// dropped, matching fire-and-forget notification semantics.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: EngineEvent) {
        crate::metrics::record_event(&event);
        debug!("Publishing event: {}", event.name());
        let _ = self.tx.send(event);
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
