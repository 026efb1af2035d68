//! Topic subscription registry - reference-counted polling per market topic
//!
//! Components subscribe to a [`Topic`]; the first subscriber starts that
//! topic's polling task (plus one immediate out-of-band fetch so nobody
//! waits a full interval) and the last unsubscriber stops it. Chains is
//! reference data: it is fetched once and then treated as permanently
//! fresh, so no recurring poller ever runs for it.

use crate::cache::RequestCache;
use crate::config::TopicPollConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::sched::{IntervalScheduler, TaskConfig};
use crate::store::MarketStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Closed set of polled market-data categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Chains,
    Tokens,
    Pools,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Chains => "chains",
            Topic::Tokens => "tokens",
            Topic::Pools => "pools",
        }
    }

    /// Scheduler task name for this topic's poller
    pub fn task_name(&self) -> String {
        format!("poll-{}", self.as_str())
    }

    /// Request-cache key for this topic's fetch
    pub fn cache_key(&self) -> &'static str {
        match self {
            Topic::Chains => "market:chains",
            Topic::Tokens => "market:tokens",
            Topic::Pools => "market:pools",
        }
    }

    pub fn all() -> [Topic; 3] {
        [Topic::Chains, Topic::Tokens, Topic::Pools]
    }
}

impl FromStr for Topic {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chains" => Ok(Topic::Chains),
            "tokens" => Ok(Topic::Tokens),
            "pools" => Ok(Topic::Pools),
            other => Err(EngineError::UnknownTopic(other.to_string())),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain reference data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_uid: String,
    pub chain_id: String,
    pub display_name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Token listing with optional USD price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub symbol: String,
    pub chain_uid: String,
    pub decimals: u32,
    #[serde(default)]
    pub price_usd: Option<f64>,
}

/// Liquidity pool listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_id: String,
    pub chain_uid: String,
    pub base: String,
    pub quote: String,
    #[serde(default)]
    pub tvl_usd: Option<f64>,
    #[serde(default)]
    pub apr: Option<f64>,
}

/// Payload of one topic fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", content = "items", rename_all = "lowercase")]
pub enum MarketData {
    Chains(Vec<ChainInfo>),
    Tokens(Vec<TokenInfo>),
    Pools(Vec<PoolInfo>),
}

impl MarketData {
    pub fn topic(&self) -> Topic {
        match self {
            MarketData::Chains(_) => Topic::Chains,
            MarketData::Tokens(_) => Topic::Tokens,
            MarketData::Pools(_) => Topic::Pools,
        }
    }
}

/// Upstream fetch seam; the registry is agnostic to the transport behind it
#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    async fn fetch(&self, topic: Topic) -> EngineResult<MarketData>;
}

/// One component's claim on a topic
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: String,
    pub component_id: String,
    pub topic: Topic,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    subscriptions: HashMap<String, Subscription>,
    counts: HashMap<Topic, usize>,
}

/// The fetch side of the registry, shared with spawned poll invocations:
/// cache-through fetch, snapshot store update, update announcement. It also
/// owns the subscription state so a settling poll can check whether its
/// topic is still wanted.
struct TopicPoller {
    cache: Arc<RequestCache<MarketData>>,
    fetcher: Arc<dyn MarketDataFetcher>,
    store: Arc<MarketStore>,
    bus: EventBus,
    cadences: HashMap<Topic, TopicPollConfig>,
    state: Mutex<RegistryState>,
    /// Set on the first successful Chains fetch; from then on the topic is
    /// permanently fresh regardless of subscribe churn
    chains_fresh: AtomicBool,
}

impl TopicPoller {
    fn cadence(&self, topic: Topic) -> TopicPollConfig {
        self.cadences.get(&topic).cloned().unwrap_or_default()
    }

    async fn subscribed(&self, topic: Topic) -> bool {
        self.state.lock().await.counts.get(&topic).copied().unwrap_or(0) > 0
    }

    /// Cache-through fetch for one topic
    async fn fetch_through(&self, topic: Topic) -> EngineResult<MarketData> {
        let fetcher = Arc::clone(&self.fetcher);
        let ttl = Duration::from_millis(self.cadence(topic).ttl_ms);
        let data = self
            .cache
            .request(
                topic.cache_key(),
                move || async move { fetcher.fetch(topic).await },
                ttl,
            )
            .await?;

        if topic == Topic::Chains {
            self.chains_fresh.store(true, Ordering::SeqCst);
        }
        Ok(data)
    }

    fn commit(&self, data: MarketData) {
        let topic = data.topic();
        self.store.update(data);
        self.bus.publish(EngineEvent::MarketDataUpdated { topic });
    }

    /// One poller firing: fetch, then commit only if the topic still has
    /// subscribers. A result landing after the last unsubscribe refreshed
    /// the cache entry but is otherwise discarded. Chains commits
    /// unconditionally: fetch-once data stays useful across churn.
    async fn poll(&self, topic: Topic) -> EngineResult<()> {
        let data = self.fetch_through(topic).await?;
        if topic != Topic::Chains && !self.subscribed(topic).await {
            debug!("Discarding {} poll result: no subscribers left", topic);
            return Ok(());
        }
        self.commit(data);
        Ok(())
    }
}

/// Reference-counted topic registry over the scheduler and request cache
pub struct TopicRegistry {
    scheduler: Arc<IntervalScheduler>,
    poller: Arc<TopicPoller>,
}

impl TopicRegistry {
    pub fn new(
        scheduler: Arc<IntervalScheduler>,
        cache: Arc<RequestCache<MarketData>>,
        fetcher: Arc<dyn MarketDataFetcher>,
        store: Arc<MarketStore>,
        bus: EventBus,
        cadences: HashMap<Topic, TopicPollConfig>,
    ) -> Self {
        Self {
            scheduler,
            poller: Arc::new(TopicPoller {
                cache,
                fetcher,
                store,
                bus,
                cadences,
                state: Mutex::new(RegistryState::default()),
                chains_fresh: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe a component to a topic, returning the subscription id.
    /// A 0→1 subscriber transition starts the topic's poller and kicks off
    /// one immediate fetch; duplicate near-simultaneous fetches collapse in
    /// the request cache.
    ///
    /// Poller start/stop is enacted while the registry lock is held, so
    /// concurrent subscribe/unsubscribe churn cannot reorder a register past
    /// the unregister that logically preceded it. The scheduler never takes
    /// this lock.
    pub async fn subscribe(&self, component_id: &str, topic: Topic) -> String {
        let id = Uuid::new_v4().to_string();
        let mut state = self.poller.state.lock().await;
        state.subscriptions.insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                component_id: component_id.to_string(),
                topic,
                created_at: Utc::now(),
            },
        );
        let count = state.counts.entry(topic).or_insert(0);
        *count += 1;
        crate::metrics::record_subscriptions(topic.as_str(), *count);
        let first = *count == 1;

        debug!("Component {} subscribed to {} ({})", component_id, topic, id);

        if first {
            self.start_polling(topic).await;
        }

        id
    }

    async fn start_polling(&self, topic: Topic) {
        if topic == Topic::Chains {
            // Fetch-once reference data: no recurring poller, and nothing to
            // do at all once a fetch has succeeded.
            if !self.poller.chains_fresh.load(Ordering::SeqCst) {
                self.spawn_fetch(topic);
            }
            return;
        }

        let cadence = self.poller.cadence(topic);
        let poller = Arc::clone(&self.poller);
        let task = Arc::new(move || {
            let poller = Arc::clone(&poller);
            async move { poller.poll(topic).await }.boxed()
        });

        info!("First subscriber for {}, starting poller", topic);
        self.scheduler
            .register(
                &topic.task_name(),
                task,
                TaskConfig {
                    active_interval: Duration::from_millis(cadence.active_interval_ms),
                    background_interval: Duration::from_millis(cadence.background_interval_ms),
                    pause_on_hidden: cadence.pause_on_hidden,
                },
            )
            .await;

        self.spawn_fetch(topic);
    }

    fn spawn_fetch(&self, topic: Topic) {
        let poller = Arc::clone(&self.poller);
        tokio::spawn(async move {
            if let Err(e) = poller.poll(topic).await {
                tracing::warn!("Immediate fetch for {} failed: {}", topic, e);
            }
        });
    }

    /// Remove one subscription; the topic's poller stops when the last
    /// subscriber leaves. Unknown ids are a silent no-op.
    pub async fn unsubscribe(&self, id: &str) {
        let mut state = self.poller.state.lock().await;
        let Some(sub) = state.subscriptions.remove(id) else {
            return;
        };
        let count = state.counts.entry(sub.topic).or_insert(1);
        *count = count.saturating_sub(1);
        crate::metrics::record_subscriptions(sub.topic.as_str(), *count);

        if *count == 0 {
            self.stop_polling(sub.topic).await;
        }
    }

    /// Remove every subscription owned by a component (teardown path)
    pub async fn unsubscribe_component(&self, component_id: &str) {
        let mut state = self.poller.state.lock().await;
        let ids: Vec<String> = state
            .subscriptions
            .values()
            .filter(|s| s.component_id == component_id)
            .map(|s| s.id.clone())
            .collect();

        for id in ids {
            if let Some(sub) = state.subscriptions.remove(&id) {
                let count = state.counts.entry(sub.topic).or_insert(1);
                *count = count.saturating_sub(1);
                crate::metrics::record_subscriptions(sub.topic.as_str(), *count);
                if *count == 0 {
                    self.stop_polling(sub.topic).await;
                }
            }
        }
    }

    async fn stop_polling(&self, topic: Topic) {
        if topic == Topic::Chains {
            return;
        }
        info!("Last subscriber left {}, stopping poller", topic);
        self.scheduler.unregister(&topic.task_name()).await;
    }

    /// Manual refresh: bypass the TTL but still join an in-flight fetch.
    /// The result is committed even with zero subscribers; refresh is an
    /// explicit request for fresh data, not poller output.
    pub async fn refresh(&self, topic: Topic) -> EngineResult<()> {
        self.poller.cache.invalidate(topic.cache_key()).await;
        let data = self.poller.fetch_through(topic).await?;
        self.poller.commit(data);
        Ok(())
    }

    /// Current subscriber count for a topic
    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.poller
            .state
            .lock()
            .await
            .counts
            .get(&topic)
            .copied()
            .unwrap_or(0)
    }

    /// Total live subscriptions across topics
    pub async fn subscription_count(&self) -> usize {
        self.poller.state.lock().await.subscriptions.len()
    }

    /// Whether a recurring poller is live for the topic
    pub async fn is_polling(&self, topic: Topic) -> bool {
        self.scheduler.is_registered(&topic.task_name()).await
    }
}
