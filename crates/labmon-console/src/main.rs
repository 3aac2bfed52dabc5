mod log_stream;
mod plots;
mod state;
mod surface;
mod theme;
mod transport;
mod ui;

use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use labmon_core::DEFAULT_LOG_CAPACITY;
use ratatui::{backend::CrosstermBackend, Terminal};
use state::{App, COMMAND_QUEUE_CAPACITY};
use std::{error::Error, io, sync::Arc, time::Duration};
use surface::TuiSurface;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use transport::Transport;
use url::Url;

const UI_TICK: Duration = Duration::from_millis(250);
const EVENT_QUEUE_CAPACITY: usize = 256;
const TEMPLATE_QUEUE_CAPACITY: usize = 64;

/// Terminal dashboard for a monitor daemon: polls its status endpoint,
/// renders per-client widgets and streams the daemon log.
#[derive(Debug, Parser)]
#[command(name = "labmon", version)]
struct Args {
    /// Daemon HTTP address.
    #[arg(long, default_value = "http://127.0.0.1:8888")]
    url: Url,

    /// Base path of the monitor endpoints.
    #[arg(long, default_value = "/monitor")]
    base: String,

    /// Path of the websocket log channel.
    #[arg(long, default_value = "/ws/")]
    ws_path: String,

    /// Dashboard title.
    #[arg(long, default_value = "MONITOR")]
    title: String,

    /// Initial status poll delay in milliseconds.
    #[arg(long, default_value_t = 2000)]
    refresh_ms: u64,

    /// Log ring buffer capacity.
    #[arg(long, default_value_t = DEFAULT_LOG_CAPACITY)]
    log_capacity: usize,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("LABMON_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    // The TUI owns the terminal; logs go nowhere unless asked for.
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

fn websocket_url(http: &Url, ws_path: &str) -> Result<Url, Box<dyn Error>> {
    let mut url = http.join(ws_path)?;
    let scheme = match url.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot derive websocket scheme from {http}"))?;
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging();

    let transport = Arc::new(Transport::new(args.url.clone(), args.base.clone()));
    let poll_interval = Duration::from_millis(args.refresh_ms.max(250));

    let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let (template_tx, template_rx) = mpsc::channel(TEMPLATE_QUEUE_CAPACITY);
    let (interval_tx, interval_rx) = watch::channel(poll_interval);

    tokio::spawn(transport::poll_loop(
        transport.clone(),
        interval_rx,
        events_tx.clone(),
    ));
    tokio::spawn(transport::command_loop(
        transport.clone(),
        command_rx,
        events_tx.clone(),
    ));
    tokio::spawn(transport::template_loop(
        transport.clone(),
        template_rx,
        events_tx.clone(),
    ));
    tokio::spawn(log_stream::log_stream_loop(
        websocket_url(&args.url, &args.ws_path)?,
        events_tx.clone(),
    ));

    let surface = TuiSurface::new(transport, events_tx, template_tx);
    let mut app = App::new(
        args.title,
        poll_interval,
        args.log_capacity,
        surface,
        interval_tx,
        command_tx,
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut input = EventStream::new();
    let mut ticker = tokio::time::interval(UI_TICK);

    loop {
        terminal.draw(|frame| ui::render(frame, &app))?;
        tokio::select! {
            Some(event) = events_rx.recv() => {
                app.apply_event(event);
            }
            maybe_event = input.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if app.handle_key(key) {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!("input_error: {err}");
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                app.tick();
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_swaps_scheme_and_keeps_host() {
        let http = Url::parse("http://lab-mon:8888").expect("http url");
        let ws = websocket_url(&http, "/ws/").expect("ws url");
        assert_eq!(ws.as_str(), "ws://lab-mon:8888/ws/");

        let https = Url::parse("https://lab-mon").expect("https url");
        let wss = websocket_url(&https, "/ws/").expect("wss url");
        assert_eq!(wss.scheme(), "wss");
    }
}
