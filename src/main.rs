use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use cryptosim_dash::config::DEFAULT_API_BASE;
use cryptosim_dash::history::DEFAULT_CAPACITY;
use cryptosim_dash::retry::{retry_with_condition, RetryPolicy};
use cryptosim_dash::ui::{self, KeyAction, ViewOptions};
use cryptosim_dash::{
    Dashboard, DashConfig, DashboardHandle, DisplayState, FetchError, HttpWorkerClient,
};
use ratatui::{backend::Backend, backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal dashboard for the CryptoSim mining worker", long_about = None)]
struct Args {
    /// Worker API base URL (http://<host>/api when going through the proxy)
    #[arg(long, env = "CRYPTOSIM_API_BASE", default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Refresh interval in milliseconds
    #[arg(long, env = "CRYPTOSIM_REFRESH_MS", default_value_t = 1000)]
    refresh_ms: u64,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "CRYPTOSIM_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    /// Number of samples kept for the rate chart
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    history: usize,

    /// Log each update instead of drawing the terminal UI
    #[arg(long)]
    plain: bool,

    /// Health probe attempts before polling starts (0 skips the probe)
    #[arg(long, default_value_t = 5)]
    probe_attempts: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; the UI owns stdout. Keep the UI quiet unless asked.
    let default_filter = if args.plain {
        "cryptosim_dash=info"
    } else {
        "cryptosim_dash=error"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = DashConfig {
        api_base: args.api_base.clone(),
        tick_interval: Duration::from_millis(args.refresh_ms),
        request_timeout: Duration::from_millis(args.timeout_ms),
        history_capacity: args.history,
        ..Default::default()
    }
    .validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let client = HttpWorkerClient::new(&config)?;

    if args.probe_attempts > 0 {
        runtime.block_on(probe_worker(&client, args.probe_attempts));
    }

    let _guard = runtime.enter();
    let handle = DashboardHandle::spawn(
        Dashboard::new(client, config.history_capacity),
        config.tick_interval,
    );

    let result = if args.plain {
        runtime.block_on(run_plain(&handle))
    } else {
        let view = ViewOptions {
            api_base: config.api_base.clone(),
            chart_headroom: config.chart_headroom,
        };
        run_tui(&handle, &view)
    };

    runtime.block_on(handle.shutdown());
    result
}

async fn probe_worker(client: &HttpWorkerClient, attempts: u32) {
    let policy = RetryPolicy::worker_probe(attempts);
    match retry_with_condition(&policy, || client.probe_health(), FetchError::is_transient).await
    {
        Ok(()) => info!("Worker at {} is up", client.endpoints().health),
        Err(e) => warn!("Worker not responding ({}), starting anyway", e),
    }
}

/// Headless mode: one log line per change until Ctrl-C.
async fn run_plain(handle: &DashboardHandle) -> Result<()> {
    let mut updates = handle.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_logged: Option<(u64, Option<String>)> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = updates.borrow_and_update().clone();
                if state.pending() {
                    continue;
                }
                let key = (
                    state.update_count,
                    state.last_error.as_ref().map(|e| e.to_string()),
                );
                if last_logged.as_ref() != Some(&key) {
                    log_state(&state);
                    last_logged = Some(key);
                }
            }
        }
    }
}

fn log_state(state: &DisplayState) {
    match &state.last_error {
        Some(error) => warn!(
            "{} (showing last known: {} blocks, {})",
            error,
            state.current.total_blocks,
            ui::format_rate(state.current.mining_rate)
        ),
        None => info!(
            "blocks={} rate={} mining={}",
            state.current.total_blocks,
            ui::format_rate(state.current.mining_rate),
            state.current.is_mining
        ),
    }
}

fn run_tui(handle: &DashboardHandle, view: &ViewOptions) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = ui_loop(&mut terminal, handle, view);

    // Restore the terminal even when the loop failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn ui_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    handle: &DashboardHandle,
    view: &ViewOptions,
) -> Result<()> {
    let updates = handle.subscribe();
    let redraw_rate = Duration::from_millis(100);

    loop {
        let state = updates.borrow().clone();
        terminal.draw(|f| ui::draw(f, &state, view))?;

        if !event::poll(redraw_rate)? {
            continue;
        }
        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match ui::key_action(key.code) {
                KeyAction::Quit => return Ok(()),
                KeyAction::Toggle => {
                    if let Err(e) = handle.request_toggle() {
                        debug!("Toggle ignored: {}", e);
                    }
                }
                KeyAction::Ignore => {}
            }
        }
    }
}
