use labmon_core::{ConnectionState, LogLevel};
use ratatui::style::{Color, Modifier, Style};

pub const TITLE_STYLE: Style = Style::new()
    .fg(Color::Rgb(191, 219, 254))
    .add_modifier(Modifier::BOLD);
pub const MUTED: Color = Color::Rgb(148, 163, 184);
pub const TEXT: Color = Color::Rgb(226, 232, 240);
pub const BORDER: Color = Color::Rgb(71, 85, 105);
pub const OK: Color = Color::Rgb(34, 197, 94);
pub const WARN: Color = Color::Rgb(245, 158, 11);
pub const CRITICAL: Color = Color::Rgb(239, 68, 68);
pub const INFO: Color = Color::Rgb(59, 130, 246);
pub const ACCENT: Color = Color::Rgb(56, 189, 248);

pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(30, 41, 59))
    .add_modifier(Modifier::BOLD);

pub fn connection_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => OK,
        ConnectionState::Disconnected => CRITICAL,
    }
}

// Per-client badge: success while the client answers, warning while it
// does not.
pub fn badge_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => OK,
        ConnectionState::Disconnected => WARN,
    }
}

pub fn level_color(level: LogLevel) -> Color {
    match level {
        LogLevel::Message => TEXT,
        LogLevel::Info => INFO,
        LogLevel::Warning => WARN,
        LogLevel::Error => CRITICAL,
        LogLevel::Success => OK,
    }
}

pub mod icons {
    pub const CONNECTED: &str = "●";
    pub const DISCONNECTED: &str = "○";
    pub const EXPANDED: &str = "v";
    pub const COLLAPSED: &str = ">";
    pub const PULSE: &str = "◉";
    pub const THROBBER: [&str; 4] = ["|", "/", "-", "\\"];
}
