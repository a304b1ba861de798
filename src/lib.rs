//! Terminal dashboard for DeFi liquidity positions: REST snapshots, a live
//! WebSocket feed for risk and alerts, and a ratatui view over both.

pub mod alert;
pub mod api;
pub mod config;
pub mod demo;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod model;
pub mod session;
pub mod ui;
