use crate::wire::{
    hw_connected, progress_percent, ClientDescriptor, ClientStatus, Snapshot, StatusBlock,
    StatusMap, StatusValue,
};
use std::collections::{HashMap, HashSet};

// Field-count delta above which a status shape change is treated as
// structural, forcing a widget re-mount instead of field patching.
pub const STRUCTURAL_DELTA_MAX: usize = 1;

pub type WidgetId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    Set(String, StatusValue),
    Remove(String),
}

// The reconciler owns all status mutation; surfaces only observe. A
// patch shows up as edits against an existing handle, a structural
// change as a remount returning a fresh handle.
pub trait RenderSurface {
    fn mount(&mut self, descriptor: &ClientDescriptor, status: &StatusMap) -> WidgetId;
    fn remount(
        &mut self,
        widget: WidgetId,
        descriptor: &ClientDescriptor,
        status: &StatusMap,
    ) -> WidgetId;
    fn clear(&mut self);
    fn apply(&mut self, widget: WidgetId, edit: FieldEdit);
    fn set_connection(&mut self, widget: WidgetId, state: ConnectionState);
    // None hides the indicator.
    fn set_progress(&mut self, widget: WidgetId, percent: Option<u8>);
    fn set_hw_connected(&mut self, widget: WidgetId, connected: Option<bool>);
}

#[derive(Debug)]
pub struct RegistryEntry {
    name: String,
    descriptor: ClientDescriptor,
    widget: WidgetId,
    live_status: StatusMap,
    connection: ConnectionState,
}

impl RegistryEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ClientDescriptor {
        &self.descriptor
    }

    pub fn widget(&self) -> WidgetId {
        self.widget
    }

    pub fn live_status(&self) -> &StatusMap {
        &self.live_status
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }
}

// Entries are created only by a full rebuild; order is the wire order
// of the rebuilding snapshot and stays stable until the next rebuild.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    // Compares key sets rather than counts; a client vanishing and
    // another appearing in the same tick would otherwise leave a stale
    // widget rendered under the wrong name.
    fn matches(&self, clients: &[ClientDescriptor]) -> bool {
        let incoming: HashSet<&str> = clients
            .iter()
            .filter(|descriptor| !descriptor.name.is_empty())
            .map(|descriptor| descriptor.name.as_str())
            .collect();
        incoming.len() == self.entries.len()
            && self
                .entries
                .iter()
                .all(|entry| incoming.contains(entry.name.as_str()))
    }
}

// A reconciliation pass never fails: malformed per-client payloads
// degrade to disconnected or empty at the wire layer.
#[derive(Debug, Default)]
pub struct Reconciler {
    registry: Registry,
    last_status: StatusBlock,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn last_status(&self) -> &StatusBlock {
        &self.last_status
    }

    pub fn reconcile(&mut self, snapshot: &Snapshot, surface: &mut dyn RenderSurface) {
        if !self.registry.matches(&snapshot.clients) {
            self.rebuild_all(&snapshot.clients, &snapshot.status, surface);
        } else {
            let descriptors: HashMap<&str, &ClientDescriptor> = snapshot
                .clients
                .iter()
                .map(|descriptor| (descriptor.name.as_str(), descriptor))
                .collect();
            // Registry order, not snapshot order.
            for entry in &mut self.registry.entries {
                if let Some(descriptor) = descriptors.get(entry.name.as_str()) {
                    entry.descriptor = (*descriptor).clone();
                }
                match snapshot.status.get(&entry.name) {
                    Some(ClientStatus::Online(fields)) => {
                        update_online_entry(entry, fields, surface);
                    }
                    _ => {
                        // Offline sentinel or missing key. Stale field
                        // values stay in the bound object, hidden, but
                        // the derived indicators must not outlive the
                        // connection.
                        entry.connection = ConnectionState::Disconnected;
                        surface.set_connection(entry.widget, ConnectionState::Disconnected);
                        surface.set_progress(entry.widget, None);
                        surface.set_hw_connected(entry.widget, None);
                    }
                }
            }
        }
        self.last_status = snapshot.status.clone();
    }

    // Mounts every client fresh, in wire order. Seed status comes from
    // `status` when the client is online there, else empty.
    pub fn rebuild_all(
        &mut self,
        clients: &[ClientDescriptor],
        status: &StatusBlock,
        surface: &mut dyn RenderSurface,
    ) {
        surface.clear();
        self.registry = Registry::default();

        let mut seen = HashSet::new();
        for descriptor in clients {
            if descriptor.name.is_empty() || !seen.insert(descriptor.name.clone()) {
                continue;
            }
            let live_status = status
                .get(&descriptor.name)
                .and_then(ClientStatus::fields)
                .cloned()
                .unwrap_or_default();
            let connection = match status.get(&descriptor.name) {
                Some(ClientStatus::Online(_)) => ConnectionState::Connected,
                _ => ConnectionState::Disconnected,
            };

            let widget = surface.mount(descriptor, &live_status);
            surface.set_connection(widget, connection);
            if connection == ConnectionState::Connected {
                surface.set_progress(widget, progress_percent(&live_status));
                surface.set_hw_connected(widget, hw_connected(&live_status));
            }

            self.registry.entries.push(RegistryEntry {
                name: descriptor.name.clone(),
                descriptor: descriptor.clone(),
                widget,
                live_status,
                connection,
            });
        }
    }
}

fn update_online_entry(
    entry: &mut RegistryEntry,
    incoming: &StatusMap,
    surface: &mut dyn RenderSurface,
) {
    let delta = entry.live_status.len().abs_diff(incoming.len());
    if delta > STRUCTURAL_DELTA_MAX {
        // Shape changed too much for field patching to keep the bound
        // view consistent; replace the object and re-render the widget.
        entry.live_status = incoming.clone();
        entry.widget = surface.remount(entry.widget, &entry.descriptor, &entry.live_status);
    } else {
        let stale: Vec<String> = entry
            .live_status
            .keys()
            .filter(|key| !incoming.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            entry.live_status.remove(&key);
            surface.apply(entry.widget, FieldEdit::Remove(key));
        }
        for (key, value) in incoming {
            if entry.live_status.get(key) != Some(value) {
                entry.live_status.insert(key.clone(), value.clone());
                surface.apply(entry.widget, FieldEdit::Set(key.clone(), value.clone()));
            }
        }
    }

    entry.connection = ConnectionState::Connected;
    surface.set_connection(entry.widget, ConnectionState::Connected);
    surface.set_progress(entry.widget, progress_percent(&entry.live_status));
    surface.set_hw_connected(entry.widget, hw_connected(&entry.live_status));
}
