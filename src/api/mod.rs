pub mod provider;
pub mod rest;

use crate::error::{AppError, AppResult};

pub use provider::{DataSourceStatus, PositionSource};
pub use rest::RestClient;

/// Accepts a `0x`-prefixed 40 hex digit address or an ENS name ending in `.eth`.
pub fn validate_address(input: &str) -> AppResult<()> {
    let address = input.trim();

    if address.is_empty() {
        return Err(AppError::Validation("address or ENS name cannot be empty".to_string()));
    }

    if let Some(hex) = address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        if hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(());
        }
        return Err(AppError::Validation(format!(
            "invalid Ethereum address {}: expected 0x followed by 40 hex digits",
            address
        )));
    }

    if let Some(label) = address.strip_suffix(".eth") {
        let valid = !label.is_empty()
            && label.split('.').all(|part| {
                !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            });
        if valid {
            return Ok(());
        }
    }

    Err(AppError::Validation(format!(
        "{} is neither an Ethereum address nor an ENS name",
        address
    )))
}

/// Query for `GET /api/v1/positions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionsQuery {
    pub address: String,
    pub protocols: Vec<String>,
    pub chains: Vec<u64>,
    pub include_metrics: bool,
}

impl PositionsQuery {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocols: Vec::new(),
            chains: Vec::new(),
            include_metrics: false,
        }
    }

    pub fn from_config(config: &crate::config::Config, address: &str) -> Self {
        Self {
            address: address.to_string(),
            protocols: config.protocols.clone(),
            chains: config.chains.clone(),
            include_metrics: config.include_metrics,
        }
    }

    /// Protocols are trimmed, lowercased and comma-joined; empty lists are left out.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("address", self.address.trim().to_string())];

        let protocols: Vec<String> = self
            .protocols
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        if !protocols.is_empty() {
            params.push(("protocols", protocols.join(",")));
        }

        if !self.chains.is_empty() {
            let chains: Vec<String> = self.chains.iter().map(|c| c.to_string()).collect();
            params.push(("chains", chains.join(",")));
        }

        params.push(("include_metrics", self.include_metrics.to_string()));
        params
    }

    pub fn cache_key(&self) -> String {
        self.to_params()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.to_lowercase()))
            .collect::<Vec<_>>()
            .join("&")
    }
}
