//! REST client for the DEX indexer backend
//!
//! Concrete implementation of the engine's fetcher seams. The engine never
//! depends on this directly; it sees `MarketDataFetcher` / `TxStatusFetcher`
//! trait objects, so tests substitute scripted fetchers.

use crate::config::BackendConfig;
use crate::error::{EngineError, EngineResult};
use crate::monitor::{RemoteTxStatus, TxStatusFetcher};
use crate::topics::{ChainInfo, MarketData, MarketDataFetcher, PoolInfo, TokenInfo, Topic};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP client against the indexer's REST surface
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| EngineError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> EngineResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            return Err(EngineError::Backend(format!(
                "{} returned {}",
                path, status
            )));
        }

        Ok(response.json().await?)
    }
}

#[derive(Debug, Deserialize)]
struct TxStatusResponse {
    status: RemoteTxStatus,
}

#[async_trait]
impl MarketDataFetcher for BackendClient {
    async fn fetch(&self, topic: Topic) -> EngineResult<MarketData> {
        match topic {
            Topic::Chains => {
                let chains: Vec<ChainInfo> = self.get_json("/v1/chains").await?;
                Ok(MarketData::Chains(chains))
            }
            Topic::Tokens => {
                let tokens: Vec<TokenInfo> = self.get_json("/v1/tokens").await?;
                Ok(MarketData::Tokens(tokens))
            }
            Topic::Pools => {
                let pools: Vec<PoolInfo> = self.get_json("/v1/pools").await?;
                Ok(MarketData::Pools(pools))
            }
        }
    }
}

#[async_trait]
impl TxStatusFetcher for BackendClient {
    async fn status(&self, chain_uid: &str, tx_hash: &str) -> EngineResult<RemoteTxStatus> {
        let url = format!("{}/v1/txs/{}/{}/status", self.base_url, chain_uid, tx_hash);
        debug!("GET {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();

        // A just-submitted hash may not be indexed yet; treat that as still
        // pending rather than a failed check
        if status == StatusCode::NOT_FOUND {
            return Ok(RemoteTxStatus::Pending);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EngineError::RateLimited);
        }
        if !status.is_success() {
            return Err(EngineError::Backend(format!(
                "tx status for {} returned {}",
                tx_hash, status
            )));
        }

        let body: TxStatusResponse = response.json().await?;
        Ok(body.status)
    }
}
