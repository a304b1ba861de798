use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Cell, List, ListItem, Paragraph, Row, Table, Wrap},
    Frame,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::api::DataSourceStatus;
use crate::config::{Config, OperatingMode};
use crate::error::{AppError, AppResult};
use crate::feed::{ConnectionState, PortfolioState};
use crate::metrics::{self, PortfolioSummary, PositionRow, RiskLevel};
use crate::model::{short_address, Alert, AlertSeverity, MarketSnapshot, PositionsSummary, SystemStatusInfo};

/// Everything one frame needs, copied out of the shared state so drawing never holds a lock.
#[derive(Debug, Clone)]
pub struct ViewModel {
    pub mode: OperatingMode,
    pub address: String,
    pub connection: ConnectionState,
    pub live_feed: bool,
    pub summary: PortfolioSummary,
    pub rows: Vec<PositionRow>,
    /// position id -> (mev, cross-chain), only when advanced risk is on
    pub advanced: Option<HashMap<String, (f64, f64)>>,
    pub alerts: Vec<Alert>,
    pub markets: Vec<(String, MarketSnapshot)>,
    pub system_status: Option<SystemStatusInfo>,
    pub session_id: Option<String>,
    pub backend_summary: Option<PositionsSummary>,
    pub source: Option<(&'static str, DataSourceStatus)>,
    pub last_error: Option<String>,
    pub last_loaded_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub show_debug_info: bool,
}

impl ViewModel {
    pub fn new(
        state: &PortfolioState,
        config: &Config,
        address: &str,
        connection: ConnectionState,
        live_feed: bool,
    ) -> Self {
        let weights = &config.risk_weights;

        let advanced: Option<HashMap<String, (f64, f64)>> = config.features.advanced_risk.then(|| {
            state
                .positions()
                .iter()
                .filter_map(|p| state.risk_for(&p.id).map(|m| (p.id.clone(), (m.mev_risk, m.cross_chain_risk))))
                .collect()
        });

        let symbols: HashMap<String, String> = state
            .positions()
            .iter()
            .flat_map(|p| {
                [
                    (p.token0_address.to_lowercase(), p.token0_symbol.clone()),
                    (p.token1_address.to_lowercase(), p.token1_symbol.clone()),
                ]
            })
            .filter_map(|(addr, symbol)| symbol.map(|s| (addr, s)))
            .collect();

        let mut markets: Vec<(String, MarketSnapshot)> = state
            .markets()
            .map(|m| {
                let label = symbols
                    .get(&m.token_address.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| short_address(&m.token_address));
                (label, m.clone())
            })
            .collect();
        markets.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            mode: config.operating_mode,
            address: address.to_string(),
            connection,
            live_feed,
            summary: metrics::summarize(state, weights),
            rows: metrics::position_rows(state, weights),
            advanced,
            alerts: state
                .alerts()
                .iter()
                .take(config.ui_settings.max_alerts_displayed)
                .cloned()
                .collect(),
            markets,
            system_status: state.system_status().cloned(),
            session_id: state.session_id().map(str::to_string),
            backend_summary: None,
            source: None,
            last_error: None,
            last_loaded_at: state.last_loaded_at(),
            last_event_at: state.last_event_at(),
            show_debug_info: config.ui_settings.show_debug_info,
        }
    }

    pub fn with_backend_summary(mut self, summary: Option<PositionsSummary>) -> Self {
        self.backend_summary = summary;
        self
    }

    pub fn with_source(mut self, name: &'static str, status: DataSourceStatus) -> Self {
        self.source = Some((name, status));
        self
    }

    pub fn with_last_error(mut self, error: Option<String>) -> Self {
        self.last_error = error;
        self
    }
}

/// Draws the dashboard. A panel that fails to build is swapped for an error
/// panel; the failures are returned so the caller can keep them for diagnostics.
pub fn draw(f: &mut Frame<'_>, view: &ViewModel) -> Vec<AppError> {
    let mut errors = Vec::new();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(8), Constraint::Length(3)])
        .split(f.size());

    let body = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[1]);

    let lower = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(body[1]);

    match header_panel(view) {
        Ok(w) => f.render_widget(w, chunks[0]),
        Err(e) => render_failed(f, chunks[0], "Header", e, &mut errors),
    }
    match positions_panel(view) {
        Ok(w) => f.render_widget(w, body[0]),
        Err(e) => render_failed(f, body[0], "Positions", e, &mut errors),
    }
    match alerts_panel(view) {
        Ok(w) => f.render_widget(w, lower[0]),
        Err(e) => render_failed(f, lower[0], "Alerts", e, &mut errors),
    }
    match markets_panel(view) {
        Ok(w) => f.render_widget(w, lower[1]),
        Err(e) => render_failed(f, lower[1], "Markets", e, &mut errors),
    }

    f.render_widget(footer(view, errors.len()), chunks[2]);

    errors
}

fn render_failed(f: &mut Frame<'_>, area: Rect, title: &str, error: AppError, errors: &mut Vec<AppError>) {
    f.render_widget(error_panel(title, &error), area);
    errors.push(error);
}

pub fn error_panel(title: &str, error: &AppError) -> Paragraph<'static> {
    Paragraph::new(vec![
        Line::from(Span::styled(
            "This panel could not be drawn",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(error.to_string()),
        Line::from(""),
        Line::from(Span::styled(
            "Press r to retry, d to save a diagnostic report",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .title(format!(" {} unavailable ", title))
            .borders(Borders::ALL)
            .border_type(BorderType::Double)
            .border_style(Style::default().fg(Color::Red)),
    )
}

fn connection_indicator(view: &ViewModel) -> Span<'static> {
    if view.mode == OperatingMode::Demo {
        return Span::styled("● DEMO", Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD));
    }
    if !view.live_feed {
        return Span::styled("○ POLLING", Style::default().fg(Color::Blue));
    }
    match view.connection {
        ConnectionState::Connected => {
            Span::styled("● LIVE", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
        }
        ConnectionState::Connecting => Span::styled("◐ CONNECTING", Style::default().fg(Color::Yellow)),
        ConnectionState::Reconnecting => Span::styled(
            "◐ RECONNECTING",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ),
        ConnectionState::Disconnected => Span::styled(
            "○ DISCONNECTED",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
    }
}

fn level_color(level: RiskLevel) -> Color {
    match level {
        RiskLevel::Low => Color::Green,
        RiskLevel::Medium => Color::Yellow,
        RiskLevel::High => Color::LightRed,
        RiskLevel::Critical => Color::Red,
    }
}

fn severity_color(severity: AlertSeverity) -> Color {
    match severity {
        AlertSeverity::Low => Color::Blue,
        AlertSeverity::Medium => Color::Yellow,
        AlertSeverity::High => Color::LightRed,
        AlertSeverity::Critical => Color::Red,
    }
}

fn signed_color(value: Decimal) -> Color {
    if value.is_sign_negative() && !value.is_zero() {
        Color::Red
    } else {
        Color::Green
    }
}

fn usd(value: Decimal) -> String {
    format!("${:.2}", value.round_dp(2))
}

fn header_panel(view: &ViewModel) -> AppResult<Paragraph<'static>> {
    let s = &view.summary;
    if !s.weighted_risk.is_finite() {
        return Err(AppError::render("header", "portfolio risk score is not a finite number"));
    }

    let updated = view
        .last_loaded_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    let alert_counts: Vec<Span<'static>> = s
        .unresolved_alerts
        .iter()
        .rev()
        .flat_map(|(severity, count)| {
            [
                Span::styled(format!("{} {}", count, severity), Style::default().fg(severity_color(*severity))),
                Span::raw("  "),
            ]
        })
        .collect();

    let mut second = vec![
        Span::raw(format!(
            "{} positions · {} protocols · {} chains · top protocol {:.0}%   ",
            s.position_count,
            s.protocol_count,
            s.chain_count,
            s.largest_protocol_share * 100.0
        )),
    ];
    if alert_counts.is_empty() {
        second.push(Span::styled("no open alerts", Style::default().fg(Color::DarkGray)));
    } else {
        second.extend(alert_counts);
    }

    let lines = vec![
        Line::from(vec![
            connection_indicator(view),
            Span::raw("  "),
            Span::styled(short_address(&view.address), Style::default().fg(Color::Yellow)),
            Span::raw("  Value "),
            Span::styled(usd(s.total_value_usd), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw("  PnL "),
            Span::styled(usd(s.total_pnl_usd), Style::default().fg(signed_color(s.total_pnl_usd))),
            Span::raw("  Risk "),
            Span::styled(
                format!("{:.2} {}", s.weighted_risk, s.risk_level),
                Style::default().fg(level_color(s.risk_level)).add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!("  Updated {}", updated)),
        ]),
        Line::from(second),
    ];

    Ok(Paragraph::new(lines).block(
        Block::default()
            .title(" LP Sentinel ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    ))
}

fn positions_panel(view: &ViewModel) -> AppResult<Table<'static>> {
    let advanced = view.advanced.as_ref();

    let mut header = vec!["Protocol", "Chain", "Pair", "Value", "PnL", "IL %", "Risk", "Level"];
    if advanced.is_some() {
        header.extend(["MEV", "X-Chain"]);
    }

    let mut rows = Vec::with_capacity(view.rows.len());
    for row in &view.rows {
        if let Some(score) = row.score {
            if !score.is_finite() {
                return Err(AppError::render(
                    "positions",
                    format!("risk score for {} is not a finite number", row.position_id),
                ));
            }
        }

        let pnl = match row.pnl_usd {
            Some(p) => Cell::from(usd(p)).style(Style::default().fg(signed_color(p))),
            None => Cell::from("-"),
        };
        let il = row
            .impermanent_loss_pct
            .map(|il| format!("{:.2}", il.round_dp(2)))
            .unwrap_or_else(|| "-".to_string());
        let (score, level) = match (row.score, row.level) {
            (Some(score), Some(level)) => (
                Cell::from(format!("{:.2}", score)),
                Cell::from(level.to_string()).style(Style::default().fg(level_color(level))),
            ),
            _ => (Cell::from("-"), Cell::from("-")),
        };

        let mut cells = vec![
            Cell::from(row.protocol.clone()),
            Cell::from(row.chain_id.to_string()),
            Cell::from(row.pair.clone()),
            Cell::from(usd(row.value_usd)),
            pnl,
            Cell::from(il),
            score,
            level,
        ];
        if let Some(advanced) = advanced {
            match advanced.get(&row.position_id) {
                Some((mev, cross_chain)) => {
                    cells.push(Cell::from(format!("{:.2}", mev)));
                    cells.push(Cell::from(format!("{:.2}", cross_chain)));
                }
                None => cells.extend([Cell::from("-"), Cell::from("-")]),
            }
        }
        rows.push(Row::new(cells));
    }

    let mut widths = vec![
        Constraint::Length(12),
        Constraint::Length(6),
        Constraint::Min(12),
        Constraint::Length(14),
        Constraint::Length(12),
        Constraint::Length(7),
        Constraint::Length(6),
        Constraint::Length(9),
    ];
    if advanced.is_some() {
        widths.extend([Constraint::Length(6), Constraint::Length(8)]);
    }

    let title = if view.rows.is_empty() {
        " Positions (none) ".to_string()
    } else {
        format!(" Positions ({}) ", view.rows.len())
    };

    Ok(Table::new(rows, widths)
        .header(Row::new(header).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)))
        .block(Block::default().title(title).borders(Borders::ALL)))
}

fn alerts_panel(view: &ViewModel) -> AppResult<List<'static>> {
    let mut items = Vec::with_capacity(view.alerts.len());
    for alert in &view.alerts {
        if alert.title.trim().is_empty() && alert.message.trim().is_empty() {
            return Err(AppError::render("alerts", format!("alert {} has no text", alert.id)));
        }

        let dim = alert.is_resolved;
        let text_style = if dim {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        let severity_style = if dim {
            text_style
        } else {
            Style::default().fg(severity_color(alert.severity)).add_modifier(Modifier::BOLD)
        };

        let text = match (alert.title.trim().is_empty(), alert.message.trim().is_empty()) {
            (false, false) => format!("{}: {}", alert.title, alert.message),
            (true, _) => alert.message.clone(),
            (_, true) => alert.title.clone(),
        };

        items.push(ListItem::new(Line::from(vec![
            Span::styled(alert.created_at.format("%H:%M:%S ").to_string(), text_style),
            Span::styled(format!("{:<8}", alert.severity.to_string()), severity_style),
            Span::styled(if dim { "✓ " } else { "  " }, text_style),
            Span::styled(text, text_style),
        ])));
    }

    let open = view.alerts.iter().filter(|a| !a.is_resolved).count();
    Ok(List::new(items).block(
        Block::default()
            .title(format!(" Alerts ({} open) ", open))
            .borders(Borders::ALL),
    ))
}

fn markets_panel(view: &ViewModel) -> AppResult<Paragraph<'static>> {
    let heading = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let mut lines = Vec::new();

    lines.push(Line::from(Span::styled("SYSTEM", heading)));
    match &view.system_status {
        Some(status) => {
            let color = if status.status.eq_ignore_ascii_case("operational") {
                Color::Green
            } else {
                Color::Yellow
            };
            let mut spans = vec![Span::styled(status.status.clone(), Style::default().fg(color))];
            if !status.message.is_empty() {
                spans.push(Span::raw(format!(" - {}", status.message)));
            }
            lines.push(Line::from(spans));
        }
        None => lines.push(Line::from(Span::styled("no status yet", Style::default().fg(Color::DarkGray)))),
    }

    if let Some((name, status)) = &view.source {
        let (text, color) = match status {
            DataSourceStatus::Connected => ("connected".to_string(), Color::Green),
            DataSourceStatus::Disconnected => ("no data yet".to_string(), Color::DarkGray),
            DataSourceStatus::Error(e) => (e.clone(), Color::Red),
        };
        lines.push(Line::from(vec![
            Span::raw(format!("Source {}: ", name)),
            Span::styled(text, Style::default().fg(color)),
        ]));
    }

    if let Some(summary) = &view.backend_summary {
        lines.push(Line::from(format!(
            "Backend total {} in {} groups",
            usd(summary.total_value_usd),
            summary.rows.len()
        )));
        for warning in &summary.warnings {
            lines.push(Line::from(Span::styled(format!("! {}", warning), Style::default().fg(Color::Yellow))));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("MARKETS", heading)));
    if view.markets.is_empty() {
        lines.push(Line::from(Span::styled("no market data", Style::default().fg(Color::DarkGray))));
    }
    for (label, market) in &view.markets {
        if market.price_usd.is_sign_negative() && !market.price_usd.is_zero() {
            return Err(AppError::render(
                "markets",
                format!("negative price for {}", market.token_address),
            ));
        }
        lines.push(Line::from(vec![
            Span::styled(format!("{:<7}", label), Style::default().fg(Color::Cyan)),
            Span::raw(format!("{:>12} ", usd(market.price_usd))),
            Span::styled(
                format!(
                    "{}{:.2}%",
                    if market.price_change_24h.is_sign_negative() { "" } else { "+" },
                    market.price_change_24h.round_dp(2)
                ),
                Style::default().fg(signed_color(market.price_change_24h)),
            ),
        ]));
    }

    if view.show_debug_info {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("DEBUG", heading)));
        lines.push(Line::from(format!(
            "session {}",
            view.session_id.as_deref().unwrap_or("-")
        )));
        lines.push(Line::from(format!(
            "last event {}",
            view.last_event_at
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_else(|| "-".to_string())
        )));
    }

    Ok(Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title(" Markets & System ").borders(Borders::ALL)))
}

fn footer(view: &ViewModel, failed_panels: usize) -> Paragraph<'static> {
    let mut spans = vec![Span::styled(
        "q quit  r refresh  a ack alert  d diagnostics  s save config  h help",
        Style::default().fg(Color::DarkGray),
    )];
    if let Some(error) = &view.last_error {
        spans.push(Span::styled(format!("   ✗ {}", error), Style::default().fg(Color::Red)));
    }
    if failed_panels > 0 {
        spans.push(Span::styled(
            format!("   {} panel(s) failed", failed_panels),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    Paragraph::new(Line::from(spans))
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::ALL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::feed::codec::{RiskUpdate, ServerEvent};
    use crate::model::RiskMetrics;
    use ratatui::{backend::TestBackend, Terminal};

    const OWNER: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

    fn loaded_state() -> PortfolioState {
        let mut state = PortfolioState::new();
        state.load_positions(OWNER, demo::fixture_positions(OWNER), Utc::now());
        state
    }

    fn render(view: &ViewModel) -> (String, Vec<AppError>) {
        let mut terminal = Terminal::new(TestBackend::new(140, 40)).unwrap();
        let mut errors = Vec::new();
        terminal.draw(|f| errors = draw(f, view)).unwrap();
        let text = terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect::<String>();
        (text, errors)
    }

    #[test]
    fn draws_all_panels() {
        let mut state = loaded_state();
        state.apply(&ServerEvent::SystemStatus(SystemStatusInfo {
            status: "operational".to_string(),
            message: "all good".to_string(),
            timestamp: None,
        }));
        let view = ViewModel::new(&state, &Config::default(), OWNER, ConnectionState::Connected, true)
            .with_source("backend", DataSourceStatus::Connected);

        let (text, errors) = render(&view);
        assert!(errors.is_empty());
        assert!(text.contains("Source backend: connected"));
        assert!(text.contains("LP Sentinel"));
        assert!(text.contains("LIVE"));
        assert!(text.contains("Positions (5)"));
        assert!(text.contains("USDC/WETH"));
        assert!(text.contains("Alerts (0 open)"));
        assert!(text.contains("operational"));
    }

    #[test]
    fn shows_reconnecting_indicator() {
        let view = ViewModel::new(&loaded_state(), &Config::default(), OWNER, ConnectionState::Reconnecting, true);
        let (text, _) = render(&view);
        assert!(text.contains("RECONNECTING"));

        let view = ViewModel::new(&loaded_state(), &Config::default(), OWNER, ConnectionState::Disconnected, false);
        let (text, _) = render(&view);
        assert!(text.contains("POLLING"));
    }

    #[test]
    fn failing_panel_is_contained() {
        let mut state = loaded_state();
        state.apply(&ServerEvent::RiskUpdate(RiskUpdate {
            position_id: "demo-aave-usdc".to_string(),
            risk_metrics: RiskMetrics {
                overall_risk_score: 0.3,
                ..RiskMetrics::default()
            },
            timestamp: None,
        }));
        let mut view = ViewModel::new(&state, &Config::default(), OWNER, ConnectionState::Connected, true);
        view.rows[0].score = Some(f64::NAN);

        let (text, errors) = render(&view);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], AppError::Render { panel, .. } if panel == "positions"));
        assert!(text.contains("Positions unavailable"));
        assert!(text.contains("Press r to retry"));
        // the rest of the dashboard still draws
        assert!(text.contains("Alerts (0 open)"));
        assert!(text.contains("Markets & System"));
        assert!(text.contains("1 panel(s) failed"));
    }

    #[test]
    fn alerts_are_capped_and_resolved_ones_marked() {
        let mut state = loaded_state();
        for i in 0..5 {
            state.apply(&ServerEvent::AlertNotification {
                alert: Alert {
                    id: format!("A{}", i),
                    position_id: None,
                    alert_type: "risk_threshold".to_string(),
                    severity: AlertSeverity::High,
                    title: format!("Alert {}", i),
                    message: "risk rising".to_string(),
                    is_resolved: false,
                    created_at: Utc::now(),
                },
                timestamp: None,
            });
        }
        state.acknowledge("A4");

        let mut config = Config::default();
        config.ui_settings.max_alerts_displayed = 3;
        let view = ViewModel::new(&state, &config, OWNER, ConnectionState::Connected, true);
        assert_eq!(view.alerts.len(), 3);
        assert_eq!(view.alerts[0].id, "A4");

        let (text, errors) = render(&view);
        assert!(errors.is_empty());
        assert!(text.contains("Alerts (2 open)"));
        assert!(text.contains("✓"));
        assert!(!text.contains("Alert 1"));
    }

    #[test]
    fn advanced_columns_follow_feature_flag() {
        let mut config = Config::default();
        let view = ViewModel::new(&loaded_state(), &config, OWNER, ConnectionState::Connected, true);
        assert!(view.advanced.is_none());

        config.features.advanced_risk = true;
        let view = ViewModel::new(&loaded_state(), &config, OWNER, ConnectionState::Connected, true);
        let (text, _) = render(&view);
        assert!(text.contains("X-Chain"));
    }

    #[test]
    fn footer_shows_last_error() {
        let view = ViewModel::new(&PortfolioState::new(), &Config::default(), OWNER, ConnectionState::Disconnected, true)
            .with_last_error(Some("network error: connection refused".to_string()));
        let (text, errors) = render(&view);
        assert!(errors.is_empty());
        assert!(text.contains("Positions (none)"));
        assert!(text.contains("connection refused"));
    }
}
