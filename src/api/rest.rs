use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::api::provider::{DataSourceStatus, PositionSource};
use crate::api::{validate_address, PositionsQuery};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::{PositionsResponse, PositionsSummary};

const POSITIONS_PATH: &str = "/api/v1/positions";
const SUMMARY_PATH: &str = "/api/v1/positions/summary";
const RETRY_DELAY: Duration = Duration::from_millis(500);

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

pub struct RestClient {
    client: Client,
    base_url: String,
    cache_ttl: Duration,
    max_retries: u32,
    retry_delay: Duration,
    positions: RwLock<HashMap<String, Cached<PositionsResponse>>>,
    summaries: RwLock<HashMap<String, Cached<PositionsSummary>>>,
    last_error: RwLock<Option<String>>,
}

impl RestClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            cache_ttl: Duration::from_millis(config.cache_ttl_ms),
            max_retries: config.max_retries,
            retry_delay: RETRY_DELAY,
            positions: RwLock::new(HashMap::new()),
            summaries: RwLock::new(HashMap::new()),
            last_error: RwLock::new(None),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn get_once<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("📡 GET {} {:?}", url, params);

        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();

        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Validation(format!("{} rejected the request: {}", path, body.trim())));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Network(format!("{} returned {}: {}", path, status, body.trim())));
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::Decode(format!("unexpected {} response: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> AppResult<T> {
        let mut attempt = 0;
        loop {
            match self.get_once(path, params).await {
                Ok(value) => {
                    *self.last_error.write().await = None;
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!("⚠️ {} (retry {}/{})", e, attempt, self.max_retries);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!("❌ Request to {} failed: {}", path, e);
                    *self.last_error.write().await = Some(e.to_string());
                    return Err(e);
                }
            }
        }
    }
}

fn log_warnings(source: &str, warnings: &[String]) {
    for warning in warnings {
        warn!("⚠️ {}: {}", source, warning);
    }
}

#[async_trait]
impl PositionSource for RestClient {
    async fn fetch_positions(&self, query: &PositionsQuery) -> AppResult<PositionsResponse> {
        validate_address(&query.address)?;
        let key = query.cache_key();

        if let Some(hit) = self.positions.read().await.get(&key) {
            if hit.fetched_at.elapsed() < self.cache_ttl {
                debug!("💾 Positions cache hit for {}", query.address);
                return Ok(hit.value.clone());
            }
        }

        let fresh: PositionsResponse = self.get(POSITIONS_PATH, &query.to_params()).await?;
        log_warnings("positions", &fresh.warnings);

        let mut cache = self.positions.write().await;
        if let Some(held) = cache.get_mut(&key) {
            if fresh.last_updated < held.value.last_updated {
                debug!(
                    "🕰️ Discarding positions from {} older than cached {}",
                    fresh.last_updated, held.value.last_updated
                );
                held.fetched_at = Instant::now();
                return Ok(held.value.clone());
            }
        }

        info!("📊 Loaded {} positions for {}", fresh.total_count, query.address);
        cache.insert(
            key,
            Cached {
                value: fresh.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(fresh)
    }

    async fn fetch_summary(&self, address: &str) -> AppResult<PositionsSummary> {
        validate_address(address)?;
        let key = address.trim().to_lowercase();

        if let Some(hit) = self.summaries.read().await.get(&key) {
            if hit.fetched_at.elapsed() < self.cache_ttl {
                return Ok(hit.value.clone());
            }
        }

        let params = [("address", address.trim().to_string())];
        let fresh: PositionsSummary = self.get(SUMMARY_PATH, &params).await?;
        log_warnings("summary", &fresh.warnings);

        let mut cache = self.summaries.write().await;
        if let Some(held) = cache.get_mut(&key) {
            if let (Some(new), Some(old)) = (fresh.last_updated, held.value.last_updated) {
                if new < old {
                    held.fetched_at = Instant::now();
                    return Ok(held.value.clone());
                }
            }
        }
        cache.insert(
            key,
            Cached {
                value: fresh.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(fresh)
    }

    async fn status(&self) -> DataSourceStatus {
        match self.last_error.read().await.as_ref() {
            Some(e) => DataSourceStatus::Error(e.clone()),
            None if self.positions.read().await.is_empty() => DataSourceStatus::Disconnected,
            None => DataSourceStatus::Connected,
        }
    }

    async fn invalidate(&self) {
        self.positions.write().await.clear();
        self.summaries.write().await.clear();
        debug!("🗑️ REST cache cleared");
    }

    fn name(&self) -> &'static str {
        "backend"
    }
}
