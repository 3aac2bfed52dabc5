use crate::surface::TuiSurface;
use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use labmon_core::{ConnectionState, LogBuffer, LogEvent, Reconciler, Snapshot};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub const REFRESH_PRESETS_MS: [u64; 4] = [1000, 2000, 5000, 10000];

pub const COMMAND_QUEUE_CAPACITY: usize = 64;

// UI ticks (250 ms each) the log pulse and toast stay visible.
const PULSE_TICKS: u8 = 3;
const TOAST_TICKS: u8 = 12;

#[derive(Debug)]
pub enum FeedEvent {
    Poll {
        seq: u64,
        result: Result<Snapshot, String>,
    },
    Log(LogEvent),
    LogOpened,
    LogClosed,
    Template {
        name: String,
        body: Option<String>,
    },
    PlotRefreshed {
        client: String,
        plot: String,
        bytes: usize,
    },
    CommandFailed {
        text: String,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    Clients,
    Command,
}

pub struct App {
    pub title: String,
    pub reconciler: Reconciler,
    pub surface: TuiSurface,
    pub global: ConnectionState,
    pub log: LogBuffer,
    pub log_stream_up: bool,
    pub focus: FocusMode,
    pub selected: usize,
    pub command_line: String,
    pub poll_interval: Duration,
    pub poll_count: u64,
    pub pulse_ticks: u8,
    toast: Option<(String, u8)>,
    last_applied_seq: u64,
    interval_tx: watch::Sender<Duration>,
    command_tx: mpsc::Sender<String>,
}

impl App {
    pub fn new(
        title: String,
        poll_interval: Duration,
        log_capacity: usize,
        surface: TuiSurface,
        interval_tx: watch::Sender<Duration>,
        command_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            title,
            reconciler: Reconciler::new(),
            surface,
            global: ConnectionState::Disconnected,
            log: LogBuffer::new(log_capacity),
            log_stream_up: false,
            focus: FocusMode::Clients,
            selected: 0,
            command_line: String::new(),
            poll_interval,
            poll_count: 0,
            pulse_ticks: 0,
            toast: None,
            last_applied_seq: 0,
            interval_tx,
            command_tx,
        }
    }

    // Interactive controls are live only while the daemon answers.
    pub fn commands_enabled(&self) -> bool {
        self.global == ConnectionState::Connected
    }

    pub fn toast(&self) -> Option<&str> {
        self.toast.as_ref().map(|(text, _)| text.as_str())
    }

    pub fn apply_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Poll { seq, result } => self.apply_poll(seq, result),
            FeedEvent::Log(event) => {
                self.log.push(event.clone(), Utc::now());
                self.pulse_ticks = PULSE_TICKS;
                self.toast = Some((clip(&event.msg, 60), TOAST_TICKS));
            }
            FeedEvent::LogOpened => {
                info!("log_stream_connected");
                self.log_stream_up = true;
            }
            FeedEvent::LogClosed => {
                self.log_stream_up = false;
            }
            FeedEvent::Template { name, body } => {
                self.surface.install_template(name, body);
            }
            FeedEvent::PlotRefreshed {
                client,
                plot,
                bytes,
            } => {
                self.surface.record_plot(&client, &plot, bytes);
            }
            FeedEvent::CommandFailed { text, error } => {
                self.toast = Some((clip(&format!("command failed: {text}"), 60), TOAST_TICKS));
                warn!("command_failed: text={text} error={error}");
            }
        }
    }

    fn apply_poll(&mut self, seq: u64, result: Result<Snapshot, String>) {
        if seq <= self.last_applied_seq {
            // A slow response arriving after a newer one; applying it
            // would rewind the rendered state.
            debug!("stale_poll_dropped: seq={seq} applied={}", self.last_applied_seq);
            return;
        }
        self.last_applied_seq = seq;
        self.poll_count += 1;

        match result {
            Ok(snapshot) => {
                self.global = ConnectionState::Connected;
                self.reconciler.reconcile(&snapshot, &mut self.surface);
                if self.selected >= self.surface.widget_count() {
                    self.selected = self.surface.widget_count().saturating_sub(1);
                }
            }
            Err(_) => {
                // Hold the last rendered state; only the global badge
                // and the controls react.
                self.global = ConnectionState::Disconnected;
            }
        }
    }

    pub fn tick(&mut self) {
        self.pulse_ticks = self.pulse_ticks.saturating_sub(1);
        if let Some((_, ticks)) = self.toast.as_mut() {
            *ticks = ticks.saturating_sub(1);
            if *ticks == 0 {
                self.toast = None;
            }
        }
    }

    // Returns true when the dashboard should exit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }
        match self.focus {
            FocusMode::Clients => self.handle_clients_key(key),
            FocusMode::Command => {
                self.handle_command_key(key);
                false
            }
        }
    }

    fn handle_clients_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Tab | KeyCode::Char('i') | KeyCode::Char(':') => {
                self.focus = FocusMode::Command;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.surface.widget_count() {
                    self.selected += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Char(' ') => {
                self.surface.toggle_visible(self.selected);
            }
            KeyCode::Char('1') => self.set_refresh_ms(1000),
            KeyCode::Char('2') => self.set_refresh_ms(2000),
            KeyCode::Char('5') => self.set_refresh_ms(5000),
            KeyCode::Char('0') => self.set_refresh_ms(10000),
            KeyCode::PageUp => self.log.scroll_up(5),
            KeyCode::PageDown => self.log.scroll_down(5),
            KeyCode::End => self.log.jump_to_bottom(),
            _ => {}
        }
        false
    }

    fn handle_command_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Tab => {
                self.focus = FocusMode::Clients;
            }
            KeyCode::Enter => self.submit_command(),
            KeyCode::Backspace => {
                self.command_line.pop();
            }
            KeyCode::Char(c) => {
                self.command_line.push(c);
            }
            _ => {}
        }
    }

    fn submit_command(&mut self) {
        if !self.commands_enabled() {
            return;
        }
        let text = self.command_line.trim().to_string();
        if text.is_empty() {
            return;
        }
        match self.command_tx.try_send(text) {
            Ok(()) => {
                self.command_line.clear();
            }
            Err(err) => {
                warn!("command_queue_full: {err}");
                self.toast = Some(("command queue full".to_string(), TOAST_TICKS));
            }
        }
    }

    pub fn set_refresh_ms(&mut self, ms: u64) {
        self.poll_interval = Duration::from_millis(ms);
        // Replaces the poll task's pending timer.
        let _ = self.interval_tx.send(self.poll_interval);
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use crossterm::event::KeyEvent;
    use labmon_core::{ClientStatus, LogLevel, StatusBlock, StatusValue};
    use std::sync::Arc;
    use url::Url;

    fn app() -> (App, mpsc::Receiver<String>, watch::Receiver<Duration>) {
        let transport = Arc::new(Transport::new(
            Url::parse("http://127.0.0.1:8888").expect("host url"),
            "/monitor",
        ));
        let (events_tx, _events_rx) = mpsc::channel(8);
        let (template_tx, _template_rx) = mpsc::channel(8);
        let surface = TuiSurface::new(transport, events_tx, template_tx);
        let (interval_tx, interval_rx) = watch::channel(Duration::from_millis(2000));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        (
            App::new(
                "MONITOR".to_string(),
                Duration::from_millis(2000),
                100,
                surface,
                interval_tx,
                command_tx,
            ),
            command_rx,
            interval_rx,
        )
    }

    fn snapshot(clients: &[&str]) -> Snapshot {
        let mut status = StatusBlock::default();
        for name in clients {
            let mut fields = labmon_core::StatusMap::new();
            fields.insert("mode".to_string(), StatusValue::Text("idle".to_string()));
            status.insert(*name, ClientStatus::Online(fields));
        }
        Snapshot {
            status,
            clients: clients
                .iter()
                .map(|name| labmon_core::ClientDescriptor {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn poll_failure_disconnects_and_disables_commands() {
        let (mut app, mut command_rx, _interval) = app();
        app.apply_event(FeedEvent::Poll {
            seq: 1,
            result: Ok(snapshot(&["cryo"])),
        });
        assert!(app.commands_enabled());

        app.apply_event(FeedEvent::Poll {
            seq: 2,
            result: Err("timeout".to_string()),
        });
        assert!(!app.commands_enabled());
        assert_eq!(app.surface.widget_count(), 1, "last rendered state retained");

        app.focus = FocusMode::Command;
        app.command_line = "broadcast stop".to_string();
        app.handle_key(key(KeyCode::Enter));
        assert!(command_rx.try_recv().is_err(), "input disabled while down");

        app.apply_event(FeedEvent::Poll {
            seq: 3,
            result: Ok(snapshot(&["cryo"])),
        });
        assert!(app.commands_enabled());
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(command_rx.try_recv().ok().as_deref(), Some("broadcast stop"));
        assert!(app.command_line.is_empty());
    }

    #[test]
    fn stale_poll_response_is_dropped() {
        let (mut app, _commands, _interval) = app();
        app.apply_event(FeedEvent::Poll {
            seq: 2,
            result: Ok(snapshot(&["newer"])),
        });
        app.apply_event(FeedEvent::Poll {
            seq: 1,
            result: Ok(snapshot(&["older", "stale"])),
        });

        let names: Vec<&str> = app
            .reconciler
            .registry()
            .iter()
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["newer"]);
    }

    #[test]
    fn late_failure_does_not_override_newer_success() {
        let (mut app, _commands, _interval) = app();
        app.apply_event(FeedEvent::Poll {
            seq: 5,
            result: Ok(snapshot(&["cryo"])),
        });
        app.apply_event(FeedEvent::Poll {
            seq: 4,
            result: Err("timeout".to_string()),
        });
        assert!(app.commands_enabled());
    }

    #[test]
    fn refresh_preset_keys_replace_the_poll_timer() {
        let (mut app, _commands, interval) = app();
        app.handle_key(key(KeyCode::Char('5')));
        assert_eq!(app.poll_interval, Duration::from_millis(5000));
        assert_eq!(*interval.borrow(), Duration::from_millis(5000));

        app.handle_key(key(KeyCode::Char('0')));
        assert_eq!(*interval.borrow(), Duration::from_millis(10000));
    }

    #[test]
    fn log_event_raises_pulse_and_toast_then_decays() {
        let (mut app, _commands, _interval) = app();
        app.apply_event(FeedEvent::Log(LogEvent {
            msg: "pump restarted".to_string(),
            time: None,
            level: LogLevel::Info,
        }));
        assert_eq!(app.log.len(), 1);
        assert!(app.pulse_ticks > 0);
        assert_eq!(app.toast(), Some("pump restarted"));

        for _ in 0..TOAST_TICKS {
            app.tick();
        }
        assert_eq!(app.pulse_ticks, 0);
        assert_eq!(app.toast(), None);
    }

    #[test]
    fn quit_keys_only_apply_in_clients_focus() {
        let (mut app, _commands, _interval) = app();
        assert!(app.handle_key(key(KeyCode::Char('q'))));

        app.focus = FocusMode::Command;
        assert!(!app.handle_key(key(KeyCode::Char('q'))));
        assert_eq!(app.command_line, "q");

        assert!(app.handle_key(KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL
        )));
    }
}
