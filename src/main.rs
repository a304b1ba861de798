use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{debug, error, info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, path::Path, time::Duration};

use lp_sentinel::alert::check_critical_alerts;
use lp_sentinel::api::DataSourceStatus;
use lp_sentinel::config::{self, OperatingMode};
use lp_sentinel::metrics;
use lp_sentinel::session::Session;
use lp_sentinel::ui::{self, DiagnosticLog, DiagnosticReport, ViewModel};

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

#[derive(Parser)]
#[command(name = "lp-sentinel")]
#[command(about = "Terminal dashboard for DeFi liquidity positions and live risk alerts")]
struct Args {
    #[arg(long)]
    generate_config: bool,

    #[arg(short, long)]
    config: Option<String>,

    /// Run against simulated positions and events
    #[arg(long)]
    demo: bool,

    /// Wallet address or ENS name, overrides the configured one
    #[arg(short, long)]
    address: Option<String>,

    /// Log portfolio summaries instead of drawing the dashboard
    #[arg(long)]
    headless: bool,

    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug || args.headless {
        let level = if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::from_default_env().filter_level(level).init();
    } else {
        tui_logger::init_logger(log::LevelFilter::Debug)
            .map_err(|e| anyhow::anyhow!("failed to start logger: {:?}", e))?;
        tui_logger::set_default_level(log::LevelFilter::Debug);
    }

    print_startup_banner();

    if args.generate_config {
        config::generate_sample_config()?;
        println!("✅ Sample configuration generated at config.toml");
        return Ok(());
    }

    let mut config = config::load_config(args.config.as_deref())?;
    if args.demo {
        config.operating_mode = OperatingMode::Demo;
    }

    let address = config.resolve_address(args.address.as_deref());
    info!("🚀 Starting {:?} mode for {}", config.operating_mode, address);

    let session = Session::start(config, address)?;

    let result = if args.headless {
        run_headless(&session).await
    } else {
        run_tui(&session, args.debug).await
    };

    session.shutdown().await;
    result
}

pub fn print_startup_banner() {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         LP SENTINEL                          ║");
    println!("║                                                              ║");
    println!("║          Liquidity position risk and alert monitor           ║");
    println!("║                                                              ║");
    println!("║   Risk: Liquidity | Volatility | Protocol | MEV | Chain      ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

async fn run_headless(session: &Session) -> Result<()> {
    let mut interval = tokio::time::interval(session.config().poll_interval());
    let mut last_critical = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("📟 Running headless, Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("👋 Interrupted");
                break;
            }
            _ = interval.tick() => {}
        }

        let state = session.snapshot().await;
        let summary = metrics::summarize(&state, &session.config().risk_weights);

        info!(
            "📊 {} positions | value ${:.2} | pnl ${:.2} | risk {:.2} ({}) | feed {}",
            summary.position_count,
            summary.total_value_usd,
            summary.total_pnl_usd,
            summary.weighted_risk,
            summary.risk_level,
            session.connection_state()
        );
        for (severity, count) in summary.unresolved_alerts.iter().rev() {
            info!("🔔 {} open {} alert(s)", count, severity);
        }
        if let Some(e) = session.last_error().await {
            warn!("⚠️ Last refresh failed: {}", e);
        }
        if let DataSourceStatus::Error(e) = session.source_status().await {
            debug!("📉 Source {} degraded: {}", session.source_name(), e);
        }

        check_critical_alerts(state.alerts(), &mut last_critical);
    }

    Ok(())
}

async fn run_tui(session: &Session, debug_mode: bool) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = ui_loop(&mut terminal, session, debug_mode).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn ui_loop(terminal: &mut Tui, session: &Session, debug_mode: bool) -> Result<()> {
    let config = session.config();
    let mut diagnostics = DiagnosticLog::new();
    let mut last_alert_count = 0;
    let mut update_counter: u64 = 0;

    terminal.draw(|f| ui::draw_loading(f, config, session.address()))?;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    info!("🎨 Starting UI loop (debug: {})", debug_mode);

    loop {
        update_counter += 1;

        let state = session.snapshot().await;
        let view = ViewModel::new(
            &state,
            config,
            session.address(),
            session.connection_state(),
            session.live_feed_enabled(),
        )
        .with_backend_summary(session.summary().await)
        .with_source(session.source_name(), session.source_status().await)
        .with_last_error(session.last_error().await);

        if debug_mode && update_counter % 100 == 0 {
            debug!(
                "📊 UI Update #{} - {} positions, {} alerts, feed {}",
                update_counter,
                view.rows.len(),
                view.alerts.len(),
                view.connection
            );
        }

        check_critical_alerts(state.alerts(), &mut last_alert_count);

        let mut render_errors = Vec::new();
        terminal.draw(|f| render_errors = ui::draw(f, &view))?;
        if !render_errors.is_empty() {
            let known = diagnostics.len();
            diagnostics.record_all(&render_errors);
            if diagnostics.len() > known {
                warn!("🧱 {} panel(s) failed to draw", render_errors.len());
            }
        }

        if event::poll(Duration::from_millis(config.ui_settings.refresh_rate_ms))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => {
                        if key.modifiers.contains(KeyModifiers::CONTROL) || key.modifiers.is_empty() {
                            info!("👋 User requested quit");
                            break;
                        }
                    }
                    KeyCode::Esc => {
                        info!("👋 User pressed escape");
                        break;
                    }
                    KeyCode::Char('r') | KeyCode::Char('R') | KeyCode::F(5) => {
                        info!("🔄 User requested refresh");
                        session.refresh().await;
                    }
                    KeyCode::Char('a') | KeyCode::Char('A') => {
                        if session.acknowledge_newest().await.is_none() {
                            info!("✅ No open alerts to acknowledge");
                        }
                    }
                    KeyCode::Char('d') | KeyCode::Char('D') => {
                        let report = DiagnosticReport::new(
                            &diagnostics,
                            &format!("{:?}", config.operating_mode),
                            session.address(),
                            &session.connection_state().to_string(),
                            state.positions().len(),
                            state.alerts().len(),
                            session.last_error().await,
                        );
                        match report.write_to(Path::new(&config.ui_settings.diagnostics_dir)) {
                            Ok(path) => info!("🩺 Diagnostic report written to {}", path.display()),
                            Err(e) => error!("❌ Failed to write diagnostic report: {}", e),
                        }
                    }
                    KeyCode::Char('h') | KeyCode::Char('H') => {
                        info!("❓ Showing help screen");
                        show_help_screen(terminal, session, debug_mode)?;
                    }
                    KeyCode::Char('s') | KeyCode::Char('S') => {
                        info!("💾 Saving configuration");
                        if let Err(e) = config::save_config_to_file(config, "config.toml") {
                            error!("❌ Failed to save configuration: {}", e);
                        } else {
                            info!("✅ Configuration saved to config.toml");
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn show_help_screen(terminal: &mut Tui, session: &Session, debug_mode: bool) -> Result<()> {
    terminal.draw(|f| ui::draw_help(f, session.config(), debug_mode))?;

    loop {
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(_) = event::read()? {
                break;
            }
        }
    }

    Ok(())
}
