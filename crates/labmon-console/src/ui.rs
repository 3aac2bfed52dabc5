use crate::state::{App, FocusMode, REFRESH_PRESETS_MS};
use crate::surface::{render_template, ClientWidget, TemplateState};
use crate::theme::{self, icons};
use chrono::{DateTime, Utc};
use labmon_core::ConnectionState;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

const LOG_PANE_HEIGHT: u16 = 9;

pub fn render(frame: &mut Frame, app: &App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(0),
            Constraint::Length(LOG_PANE_HEIGHT),
            Constraint::Length(3),
        ])
        .split(frame.size());

    render_header(frame, app, layout[0]);
    render_clients(frame, app, layout[1]);
    render_log(frame, app, layout[2]);
    render_command(frame, app, layout[3]);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let throbber = icons::THROBBER[(app.poll_count as usize) % icons::THROBBER.len()];
    let refresh_secs = app.poll_interval.as_millis() as f64 / 1000.0;

    let status_line = vec![
        Span::styled(app.title.clone(), theme::TITLE_STYLE),
        Span::raw("  "),
        Span::styled(
            match app.global {
                ConnectionState::Connected => "Connected",
                ConnectionState::Disconnected => "Disconnected",
            },
            Style::default().fg(theme::connection_color(app.global)),
        ),
        Span::raw("  "),
        Span::styled(
            format!("refresh {refresh_secs}s"),
            Style::default().fg(theme::MUTED),
        ),
        Span::raw("  "),
        Span::styled(throbber, Style::default().fg(theme::ACCENT)),
        Span::raw("  "),
        Span::styled(
            if app.log_stream_up { "log: live" } else { "log: down" },
            Style::default().fg(if app.log_stream_up {
                theme::OK
            } else {
                theme::MUTED
            }),
        ),
        Span::styled(
            match app.reconciler.last_status().connection_count() {
                Some(count) => format!("  connections: {count}"),
                None => String::new(),
            },
            Style::default().fg(theme::MUTED),
        ),
    ];

    let mut summary = vec![Span::styled("Clients: ", Style::default().fg(theme::MUTED))];
    for widget in app.surface.widgets_in_order() {
        summary.push(Span::styled(
            format!(" {} ", widget.name),
            Style::default()
                .fg(theme::badge_color(widget.connection))
                .add_modifier(Modifier::BOLD),
        ));
    }
    if app.surface.widget_count() == 0 {
        summary.push(Span::styled("(none)", Style::default().fg(theme::MUTED)));
    }

    let bottom_line = match app.toast() {
        Some(toast) => Line::from(Span::styled(
            toast.to_string(),
            Style::default().fg(theme::WARN),
        )),
        None => Line::from(Span::styled(
            format!(
                "Tab command, Space collapse, {} refresh presets, q quit",
                REFRESH_PRESETS_MS
                    .iter()
                    .map(|ms| format!("{}", ms / 1000))
                    .collect::<Vec<_>>()
                    .join("/")
            ),
            Style::default().fg(theme::MUTED),
        )),
    };

    let paragraph = Paragraph::new(vec![
        Line::from(status_line),
        Line::from(summary),
        bottom_line,
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme::BORDER))
            .title(Span::styled("Status", theme::TITLE_STYLE)),
    );
    frame.render_widget(paragraph, area);
}

fn render_clients(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines = Vec::new();
    for (index, widget) in app.surface.widgets_in_order().enumerate() {
        let selected = index == app.selected;
        lines.push(client_header_line(widget, selected));
        if widget.is_visible() && widget.connection == ConnectionState::Connected {
            for line in client_body_lines(app, widget) {
                lines.push(line);
            }
        }
    }
    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "no clients reported yet",
            Style::default().fg(theme::MUTED),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme::BORDER))
                .title(Span::styled("Clients", theme::TITLE_STYLE)),
        );
    frame.render_widget(paragraph, area);
}

fn client_header_line(widget: &ClientWidget, selected: bool) -> Line<'static> {
    let mut spans = vec![
        if selected {
            Span::styled("▸ ", theme::SELECTED_STYLE)
        } else {
            Span::raw("  ")
        },
        Span::raw(if widget.is_visible() {
            icons::EXPANDED
        } else {
            icons::COLLAPSED
        }),
        Span::raw(" "),
        Span::styled(
            match widget.connection {
                ConnectionState::Connected => icons::CONNECTED,
                ConnectionState::Disconnected => icons::DISCONNECTED,
            },
            Style::default().fg(theme::badge_color(widget.connection)),
        ),
        Span::raw(" "),
        Span::styled(
            widget.name.clone(),
            Style::default()
                .fg(theme::TEXT)
                .add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(description) = widget.description.as_deref() {
        spans.push(Span::styled(
            format!("  {description}"),
            Style::default().fg(theme::MUTED),
        ));
    }
    if let Some(hw) = widget.hw {
        spans.push(Span::styled(
            if hw { "  [hw up]" } else { "  [hw down]" },
            Style::default().fg(if hw { theme::OK } else { theme::CRITICAL }),
        ));
    }
    if let Some(percent) = widget.progress {
        spans.push(Span::styled(
            format!("  {}", progress_bar(percent, 12)),
            Style::default().fg(theme::ACCENT),
        ));
    }

    Line::from(spans)
}

fn client_body_lines(app: &App, widget: &ClientWidget) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    match app.surface.template(&widget.template) {
        Some(TemplateState::Loaded(text)) => {
            for rendered in render_template(text, &widget.status) {
                lines.push(Line::from(Span::styled(
                    format!("    {rendered}"),
                    Style::default().fg(theme::TEXT),
                )));
            }
        }
        _ => {
            // Template missing or failed; fall back to key: value lines.
            for (key, value) in &widget.status {
                lines.push(Line::from(vec![
                    Span::styled(format!("    {key}: "), Style::default().fg(theme::MUTED)),
                    Span::styled(value.to_string(), Style::default().fg(theme::TEXT)),
                ]));
            }
        }
    }

    for panel in &widget.plots {
        let label = panel.title.as_deref().unwrap_or(panel.name.as_str());
        let freshness = match (panel.last_bytes, panel.refreshed_at) {
            (Some(bytes), Some(at)) => {
                format!("{} ({} ago)", size_label(bytes), age_label(at, Utc::now()))
            }
            _ => "not fetched yet".to_string(),
        };
        lines.push(Line::from(vec![
            Span::styled(
                format!("    plot {label}: "),
                Style::default().fg(theme::MUTED),
            ),
            Span::styled(freshness, Style::default().fg(theme::INFO)),
        ]));
    }

    lines
}

fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .log
        .visible(height)
        .map(|entry| {
            Line::from(vec![
                Span::styled(
                    format!("{} ", entry.timestamp()),
                    Style::default().fg(theme::MUTED),
                ),
                Span::styled(
                    entry.event.msg.clone(),
                    Style::default().fg(theme::level_color(entry.event.level)),
                ),
            ])
        })
        .collect();

    let mut title = String::from("Log");
    if !app.log.is_following() {
        title.push_str(" [scrolled]");
    }
    if app.pulse_ticks > 0 {
        title.push(' ');
        title.push_str(icons::PULSE);
    }

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme::BORDER))
            .title(Span::styled(title, theme::TITLE_STYLE)),
    );
    frame.render_widget(paragraph, area);
}

fn render_command(frame: &mut Frame, app: &App, area: Rect) {
    let enabled = app.commands_enabled();
    let focused = app.focus == FocusMode::Command;

    let mut spans = vec![Span::styled("> ", Style::default().fg(theme::MUTED))];
    spans.push(Span::styled(
        app.command_line.clone(),
        Style::default().fg(if enabled { theme::TEXT } else { theme::MUTED }),
    ));
    if focused && enabled {
        spans.push(Span::styled("█", Style::default().fg(theme::ACCENT)));
    }

    let title = if enabled {
        "Command"
    } else {
        "Command (disconnected)"
    };
    let paragraph = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if focused {
                theme::ACCENT
            } else {
                theme::BORDER
            }))
            .title(Span::styled(title.to_string(), theme::TITLE_STYLE)),
    );
    frame.render_widget(paragraph, area);
}

fn progress_bar(percent: u8, cells: usize) -> String {
    let percent = percent.min(100);
    let filled = (percent as usize * cells) / 100;
    let mut bar = String::with_capacity(cells + 8);
    bar.push('[');
    for index in 0..cells {
        bar.push(if index < filled { '#' } else { '-' });
    }
    bar.push(']');
    bar.push_str(&format!(" {percent}%"));
    bar
}

fn size_label(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn age_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}h", seconds / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_scales_to_cell_count() {
        assert_eq!(progress_bar(0, 4), "[----] 0%");
        assert_eq!(progress_bar(50, 4), "[##--] 50%");
        assert_eq!(progress_bar(100, 4), "[####] 100%");
        assert_eq!(progress_bar(255, 4), "[####] 100%");
    }

    #[test]
    fn size_label_picks_a_sensible_unit() {
        assert_eq!(size_label(512), "512 B");
        assert_eq!(size_label(2048), "2.0 KiB");
        assert_eq!(size_label(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn age_label_rounds_down() {
        let now = Utc::now();
        assert_eq!(age_label(now, now), "0s");
        assert_eq!(age_label(now - chrono::Duration::seconds(90), now), "1m");
        assert_eq!(age_label(now - chrono::Duration::seconds(7200), now), "2h");
    }
}
