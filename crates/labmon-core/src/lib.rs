pub mod log_feed;
pub mod reconcile;
pub mod wire;

pub use log_feed::{LogBuffer, LogEntry, DEFAULT_LOG_CAPACITY};
pub use reconcile::{
    ConnectionState, FieldEdit, Reconciler, Registry, RegistryEntry, RenderSurface, WidgetId,
    STRUCTURAL_DELTA_MAX,
};
pub use wire::{
    hw_connected, progress_percent, ClientDescriptor, ClientStatus, LogEvent, LogLevel,
    PlotConfig, Snapshot, StatusBlock, StatusMap, StatusValue, HW_CONNECTED_KEY, PROGRESS_KEY,
};
