use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::PositionsQuery;
use crate::error::AppResult;
use crate::model::{PositionsResponse, PositionsSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataSourceStatus {
    Connected,
    Disconnected,
    Error(String),
}

/// Where positions come from: the backend REST API or the demo fixtures.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch_positions(&self, query: &PositionsQuery) -> AppResult<PositionsResponse>;
    async fn fetch_summary(&self, address: &str) -> AppResult<PositionsSummary>;
    async fn status(&self) -> DataSourceStatus;

    /// Forget cached responses so the next fetch goes to the source.
    async fn invalidate(&self) {}

    /// Whether a repeated fetch can return data newer than what the live
    /// feed has already applied. Sources that replay fixed data return false.
    fn reloads(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}
