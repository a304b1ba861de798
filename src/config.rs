use anyhow::Result;
use figment::{Figment, providers::{Env, Format, Serialized, Toml}};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::api;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub operating_mode: OperatingMode,
    pub api_base_url: String,
    pub ws_url: String,
    pub user_address: Option<String>,
    pub demo_address: String,
    pub protocols: Vec<String>,
    pub chains: Vec<u64>,
    pub include_metrics: bool,
    pub enable_websocket: bool,
    pub poll_interval_ms: u64,
    pub cache_ttl_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub feed: FeedSettings,
    pub risk_weights: RiskWeights,
    pub features: FeatureFlags,
    pub ui_settings: UiSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    Live,
    Demo,
}

/// Live feed connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// 0 = unlimited
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub idle_timeout_ms: u64,
    pub event_buffer: usize,
}

/// Weights for the client-side composite risk score. Should sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskWeights {
    pub liquidity: f64,
    pub volatility: f64,
    pub protocol: f64,
    pub mev: f64,
    pub cross_chain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Premium tier: per-token market data streams.
    pub market_data: bool,
    /// Premium tier: MEV and cross-chain columns.
    pub advanced_risk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiSettings {
    pub refresh_rate_ms: u64,
    pub max_alerts_displayed: usize,
    pub show_debug_info: bool,
    pub diagnostics_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operating_mode: OperatingMode::Live,
            api_base_url: "http://localhost:8080".to_string(),
            ws_url: "ws://localhost:8080/ws/stream".to_string(),
            user_address: None,
            demo_address: "0xd8da6bf26964af9d7eed9e03e53415d37aa96045".to_string(),
            protocols: vec![
                "uniswap_v3".to_string(),
                "aave_v3".to_string(),
                "compound_v3".to_string(),
                "curve".to_string(),
                "lido".to_string(),
            ],
            chains: vec![1],
            include_metrics: true,
            enable_websocket: true,
            poll_interval_ms: 30_000,
            cache_ttl_ms: 15_000,
            request_timeout_ms: 10_000,
            max_retries: 2,
            feed: FeedSettings::default(),
            risk_weights: RiskWeights::default(),
            features: FeatureFlags::default(),
            ui_settings: UiSettings::default(),
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 3_000,
            max_reconnect_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            max_reconnect_attempts: 0,
            heartbeat_interval_ms: 30_000,
            idle_timeout_ms: 300_000,
            event_buffer: 1000,
        }
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.25,
            volatility: 0.20,
            protocol: 0.20,
            mev: 0.20,
            cross_chain: 0.15,
        }
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            market_data: false,
            advanced_risk: false,
        }
    }
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 250,
            max_alerts_displayed: 50,
            show_debug_info: false,
            diagnostics_dir: ".".to_string(),
        }
    }
}

impl FeedSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Capped exponential delay before reconnect attempt `attempt` (0-based), without jitter.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let delay = self.reconnect_delay_ms as f64 * self.backoff_multiplier.powi(attempt.min(31) as i32);
        let capped = delay.min(self.max_reconnect_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_reconnect_attempts == 0 || attempt < self.max_reconnect_attempts
    }
}

impl Config {
    /// Address to load: explicit override, then configured wallet, then the demo fallback.
    pub fn resolve_address(&self, cli_override: Option<&str>) -> String {
        cli_override
            .map(str::to_string)
            .or_else(|| self.user_address.clone())
            .unwrap_or_else(|| self.demo_address.clone())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config_file = config_path.unwrap_or("config.toml");

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("SENTINEL_").split("__"))
        .extract()?;

    validate_config(&config)?;

    Ok(config)
}

pub fn generate_sample_config() -> Result<()> {
    let config = Config::default();
    let toml_content = toml::to_string_pretty(&config)?;

    fs::write("config.toml", toml_content)?;

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<()> {
    let api_url = url::Url::parse(&config.api_base_url)
        .map_err(|e| anyhow::anyhow!("api_base_url is not a valid URL: {}", e))?;
    if !matches!(api_url.scheme(), "http" | "https") {
        return Err(anyhow::anyhow!("api_base_url must use http or https"));
    }

    let ws_url = url::Url::parse(&config.ws_url)
        .map_err(|e| anyhow::anyhow!("ws_url is not a valid URL: {}", e))?;
    if !matches!(ws_url.scheme(), "ws" | "wss") {
        return Err(anyhow::anyhow!("ws_url must use ws or wss"));
    }

    if let Some(address) = &config.user_address {
        api::validate_address(address)?;
    }
    api::validate_address(&config.demo_address)?;

    if config.poll_interval_ms < 1000 {
        return Err(anyhow::anyhow!("poll_interval_ms must be at least 1000ms"));
    }

    if config.feed.connect_timeout_ms == 0 {
        return Err(anyhow::anyhow!("feed.connect_timeout_ms must be positive"));
    }

    if config.feed.heartbeat_interval_ms == 0 {
        return Err(anyhow::anyhow!("feed.heartbeat_interval_ms must be positive"));
    }

    if config.feed.reconnect_delay_ms == 0 {
        return Err(anyhow::anyhow!("feed.reconnect_delay_ms must be positive"));
    }

    if config.feed.max_reconnect_delay_ms < config.feed.reconnect_delay_ms {
        return Err(anyhow::anyhow!("feed.max_reconnect_delay_ms must not be below feed.reconnect_delay_ms"));
    }

    if config.feed.backoff_multiplier < 1.0 {
        return Err(anyhow::anyhow!("feed.backoff_multiplier must be at least 1.0"));
    }

    if config.feed.idle_timeout_ms <= config.feed.heartbeat_interval_ms {
        return Err(anyhow::anyhow!("feed.idle_timeout_ms must exceed feed.heartbeat_interval_ms"));
    }

    if config.ui_settings.refresh_rate_ms < 50 {
        return Err(anyhow::anyhow!("UI refresh_rate_ms must be at least 50ms"));
    }

    Ok(())
}

pub fn save_config_to_file(config: &Config, path: &str) -> Result<()> {
    let toml_content = toml::to_string_pretty(config)?;
    fs::write(path, toml_content)?;
    Ok(())
}
