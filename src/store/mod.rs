//! Latest-snapshot store for polled market data
//!
//! The engine's outbound data boundary: each successful topic fetch lands
//! here, and API consumers read the most recent snapshot without touching
//! the pollers.

use crate::topics::{MarketData, Topic};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Most recent payload for one topic
#[derive(Debug, Clone, Serialize)]
pub struct TopicSnapshot {
    pub data: MarketData,
    pub fetched_at: DateTime<Utc>,
}

/// Read-mostly store of the latest snapshot per topic
#[derive(Default)]
pub struct MarketStore {
    snapshots: DashMap<Topic, TopicSnapshot>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, data: MarketData) {
        self.snapshots.insert(
            data.topic(),
            TopicSnapshot {
                data,
                fetched_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, topic: Topic) -> Option<TopicSnapshot> {
        self.snapshots.get(&topic).map(|s| s.clone())
    }
}
