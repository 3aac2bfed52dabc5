use crate::plots::PlotTask;
use crate::state::FeedEvent;
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use labmon_core::{
    ClientDescriptor, ConnectionState, FieldEdit, RenderSurface, StatusMap, WidgetId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateState {
    Requested,
    Loaded(String),
    Failed,
}

// The terminal shows plot age and size rather than the image itself.
pub struct PlotPanel {
    pub name: String,
    pub title: Option<String>,
    pub last_bytes: Option<usize>,
    pub refreshed_at: Option<DateTime<Utc>>,
    _task: Option<PlotTask>,
}

// `status` is the surface's view of the bound status object; the
// reconciler mutates it only through apply edits.
pub struct ClientWidget {
    pub name: String,
    pub description: Option<String>,
    pub template: String,
    pub status: StatusMap,
    pub connection: ConnectionState,
    pub progress: Option<u8>,
    pub hw: Option<bool>,
    pub plots: Vec<PlotPanel>,
    visible: Arc<AtomicBool>,
}

impl ClientWidget {
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }
}

// Widgets are plain state here; drawing happens each frame from
// ui::render, so keeping these models current is all the binding there
// is.
pub struct TuiSurface {
    transport: Arc<Transport>,
    events: mpsc::Sender<FeedEvent>,
    template_requests: mpsc::Sender<String>,
    runtime: Option<tokio::runtime::Handle>,
    widgets: HashMap<WidgetId, ClientWidget>,
    order: Vec<WidgetId>,
    templates: HashMap<String, TemplateState>,
    next_id: WidgetId,
}

impl TuiSurface {
    pub fn new(
        transport: Arc<Transport>,
        events: mpsc::Sender<FeedEvent>,
        template_requests: mpsc::Sender<String>,
    ) -> Self {
        Self {
            transport,
            events,
            template_requests,
            runtime: tokio::runtime::Handle::try_current().ok(),
            widgets: HashMap::new(),
            order: Vec::new(),
            templates: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn widget_count(&self) -> usize {
        self.order.len()
    }

    pub fn widgets_in_order(&self) -> impl Iterator<Item = &ClientWidget> {
        self.order.iter().filter_map(|id| self.widgets.get(id))
    }

    pub fn widget_at(&self, index: usize) -> Option<&ClientWidget> {
        self.order.get(index).and_then(|id| self.widgets.get(id))
    }

    // Collapsing also pauses the widget's plot refreshers through the
    // shared flag.
    pub fn toggle_visible(&mut self, index: usize) {
        if let Some(widget) = self.order.get(index).and_then(|id| self.widgets.get(id)) {
            widget
                .visible
                .store(!widget.visible.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    pub fn template(&self, name: &str) -> Option<&TemplateState> {
        self.templates.get(name)
    }

    pub fn install_template(&mut self, name: String, body: Option<String>) {
        let state = match body {
            Some(body) => TemplateState::Loaded(body),
            None => TemplateState::Failed,
        };
        self.templates.insert(name, state);
    }

    pub fn record_plot(&mut self, client: &str, plot: &str, bytes: usize) {
        for widget in self.widgets.values_mut() {
            if widget.name != client {
                continue;
            }
            if let Some(panel) = widget.plots.iter_mut().find(|panel| panel.name == plot) {
                panel.last_bytes = Some(bytes);
                panel.refreshed_at = Some(Utc::now());
            }
        }
    }

    fn request_template(&mut self, name: &str) {
        if name.is_empty() || self.templates.contains_key(name) {
            return;
        }
        self.templates
            .insert(name.to_string(), TemplateState::Requested);
        if self.template_requests.try_send(name.to_string()).is_err() {
            warn!("template_request_queue_full: name={name}");
            self.templates.insert(name.to_string(), TemplateState::Failed);
        }
    }

    fn build_widget(
        &mut self,
        descriptor: &ClientDescriptor,
        status: &StatusMap,
        visible: Arc<AtomicBool>,
    ) -> ClientWidget {
        self.request_template(&descriptor.template);

        let plots = descriptor
            .plots
            .iter()
            .map(|(name, config)| {
                let task = self.runtime.as_ref().map(|runtime| {
                    PlotTask::spawn(
                        runtime,
                        self.transport.clone(),
                        descriptor.name.clone(),
                        name.clone(),
                        config.src.clone(),
                        visible.clone(),
                        self.events.clone(),
                    )
                });
                PlotPanel {
                    name: name.clone(),
                    title: config.title.clone(),
                    last_bytes: None,
                    refreshed_at: None,
                    _task: task,
                }
            })
            .collect();

        ClientWidget {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            template: descriptor.template.clone(),
            status: status.clone(),
            connection: ConnectionState::Disconnected,
            progress: None,
            hw: None,
            plots,
            visible,
        }
    }
}

impl RenderSurface for TuiSurface {
    fn mount(&mut self, descriptor: &ClientDescriptor, status: &StatusMap) -> WidgetId {
        let widget = self.build_widget(descriptor, status, Arc::new(AtomicBool::new(true)));
        self.next_id += 1;
        self.widgets.insert(self.next_id, widget);
        self.order.push(self.next_id);
        self.next_id
    }

    fn remount(
        &mut self,
        widget: WidgetId,
        descriptor: &ClientDescriptor,
        status: &StatusMap,
    ) -> WidgetId {
        // Carry the collapse flag over so a re-render does not pop a
        // widget back open; the arc is shared with any plot tasks.
        let visible = self
            .widgets
            .remove(&widget)
            .map(|old| old.visible)
            .unwrap_or_else(|| Arc::new(AtomicBool::new(true)));
        let replacement = self.build_widget(descriptor, status, visible);
        self.next_id += 1;
        self.widgets.insert(self.next_id, replacement);
        match self.order.iter().position(|id| *id == widget) {
            Some(index) => self.order[index] = self.next_id,
            None => self.order.push(self.next_id),
        }
        self.next_id
    }

    fn clear(&mut self) {
        // Dropping the widgets aborts their plot tasks. Fetched
        // templates stay cached across rebuilds.
        self.widgets.clear();
        self.order.clear();
    }

    fn apply(&mut self, widget: WidgetId, edit: FieldEdit) {
        if let Some(target) = self.widgets.get_mut(&widget) {
            match edit {
                FieldEdit::Set(key, value) => {
                    target.status.insert(key, value);
                }
                FieldEdit::Remove(key) => {
                    target.status.remove(&key);
                }
            }
        }
    }

    fn set_connection(&mut self, widget: WidgetId, state: ConnectionState) {
        if let Some(target) = self.widgets.get_mut(&widget) {
            target.connection = state;
        }
    }

    fn set_progress(&mut self, widget: WidgetId, percent: Option<u8>) {
        if let Some(target) = self.widgets.get_mut(&widget) {
            target.progress = percent;
        }
    }

    fn set_hw_connected(&mut self, widget: WidgetId, connected: Option<bool>) {
        if let Some(target) = self.widgets.get_mut(&widget) {
            target.hw = connected;
        }
    }
}

// {field} placeholders are filled from the status map; a field not
// present yet renders as `-`, malformed braces pass through untouched.
pub fn render_template(text: &str, status: &StatusMap) -> Vec<String> {
    text.lines().map(|line| render_line(line, status)).collect()
}

fn render_line(line: &str, status: &StatusMap) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_field_name(&after[..close]) => {
                let field = &after[..close];
                match status.get(field) {
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push('-'),
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_field_name(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
