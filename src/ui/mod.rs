pub mod dashboard;
pub mod diagnostics;

pub use dashboard::{draw, ViewModel};
pub use diagnostics::{DiagnosticLog, DiagnosticReport};

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::config::{Config, OperatingMode};
use crate::model::short_address;

fn mode_label(mode: OperatingMode) -> (&'static str, Color) {
    match mode {
        OperatingMode::Demo => ("DEMO MODE - Simulated Data", Color::Yellow),
        OperatingMode::Live => ("LIVE MODE - Backend Data", Color::Green),
    }
}

pub fn draw_loading(f: &mut Frame<'_>, config: &Config, address: &str) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Length(12),
            Constraint::Min(0),
        ])
        .split(f.size());

    let title = Paragraph::new(vec![
        Line::from(""),
        Line::from(Span::styled(
            "LP SENTINEL",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Liquidity position risk monitor",
            Style::default().fg(Color::White),
        )),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));

    let (mode_text, mode_color) = mode_label(config.operating_mode);
    let feed = match (config.operating_mode, config.enable_websocket) {
        (OperatingMode::Demo, _) => "simulated".to_string(),
        (OperatingMode::Live, true) => config.ws_url.clone(),
        (OperatingMode::Live, false) => "disabled (polling only)".to_string(),
    };

    let loading = Paragraph::new(vec![
        Line::from(Span::styled(
            mode_text,
            Style::default().fg(mode_color).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![
            Span::raw("API Endpoint: "),
            Span::styled(config.api_base_url.clone(), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Live Feed: "),
            Span::styled(feed, Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Address: "),
            Span::styled(short_address(address), Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Poll Interval: "),
            Span::styled(format!("{}ms", config.poll_interval_ms), Style::default().fg(Color::Green)),
        ]),
        Line::from(""),
        Line::from("Loading positions..."),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().title("Initializing").borders(Borders::ALL));

    f.render_widget(title, chunks[0]);
    f.render_widget(loading, chunks[1]);
}

pub fn draw_help(f: &mut Frame<'_>, config: &Config, debug_mode: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    let (mode_text, _) = mode_label(config.operating_mode);
    let heading = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let title = Paragraph::new(format!("Help - LP Sentinel ({})", mode_text))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));

    let help_text = Paragraph::new(vec![
        Line::from(Span::styled("CONTROLS", heading)),
        Line::from("Q or Esc            - Quit"),
        Line::from("R                   - Refresh positions (and restart the live feed)"),
        Line::from("A                   - Acknowledge the newest open alert"),
        Line::from("D                   - Write a diagnostic report"),
        Line::from("S                   - Save configuration"),
        Line::from("H                   - Show this help"),
        Line::from(""),
        Line::from(Span::styled("CONNECTION", heading)),
        Line::from(vec![
            Span::styled("● LIVE", Style::default().fg(Color::Green)),
            Span::raw("              - Streaming updates"),
        ]),
        Line::from(vec![
            Span::styled("◐ RECONNECTING", Style::default().fg(Color::Yellow)),
            Span::raw("      - Feed dropped, retrying with backoff"),
        ]),
        Line::from(vec![
            Span::styled("○ DISCONNECTED", Style::default().fg(Color::Red)),
            Span::raw("      - Retries exhausted, press R"),
        ]),
        Line::from(vec![
            Span::styled("○ POLLING", Style::default().fg(Color::Blue)),
            Span::raw("           - Live feed disabled"),
        ]),
        Line::from(""),
        Line::from(Span::styled("RISK LEVELS", heading)),
        Line::from("LOW < 0.4 <= MEDIUM < 0.6 <= HIGH < 0.8 <= CRITICAL"),
        Line::from(""),
        Line::from(Span::styled("CURRENT SESSION", heading)),
        Line::from(format!("Mode: {}", mode_text)),
        Line::from(format!("Debug: {}", if debug_mode { "ENABLED" } else { "DISABLED" })),
        Line::from(format!("Diagnostics dir: {}", config.ui_settings.diagnostics_dir)),
        Line::from(""),
        Line::from("Press any key to return to dashboard..."),
    ])
    .block(Block::default().borders(Borders::ALL));

    let footer = Paragraph::new("Positions via REST, risk and alerts via the live feed")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));

    f.render_widget(title, chunks[0]);
    f.render_widget(help_text, chunks[1]);
    f.render_widget(footer, chunks[2]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::{backend::TestBackend, Terminal};

    fn screen(draw_fn: impl FnOnce(&mut Frame<'_>)) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();
        terminal.draw(draw_fn).unwrap();
        terminal.backend().buffer().content.iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn loading_screen_names_mode_and_endpoint() {
        let config = Config {
            operating_mode: OperatingMode::Demo,
            ..Config::default()
        };
        let text = screen(|f| draw_loading(f, &config, &config.demo_address));
        assert!(text.contains("DEMO MODE"));
        assert!(text.contains("simulated"));
        assert!(text.contains("http://localhost:8080"));
    }

    #[test]
    fn help_screen_lists_keys() {
        let text = screen(|f| draw_help(f, &Config::default(), true));
        assert!(text.contains("Acknowledge"));
        assert!(text.contains("diagnostic report"));
        assert!(text.contains("ENABLED"));
    }
}
