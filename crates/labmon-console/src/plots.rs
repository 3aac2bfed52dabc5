use crate::state::FeedEvent;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// Plots refresh on their own long interval, independent of the status
// poll.
pub const PLOT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

// One refresher per plot, alive for as long as the owning widget. A
// collapsed widget keeps the task but skips fetches until it is
// visible again.
pub struct PlotTask {
    handle: JoinHandle<()>,
}

impl PlotTask {
    pub fn spawn(
        runtime: &tokio::runtime::Handle,
        transport: Arc<Transport>,
        client: String,
        plot: String,
        src: String,
        visible: Arc<AtomicBool>,
        tx: mpsc::Sender<FeedEvent>,
    ) -> Self {
        let handle = runtime.spawn(async move {
            loop {
                tokio::time::sleep(PLOT_REFRESH_INTERVAL).await;
                if !visible.load(Ordering::Relaxed) {
                    continue;
                }
                let shared = transport.clone();
                let source = src.clone();
                let fetched =
                    tokio::task::spawn_blocking(move || shared.fetch_plot(&source)).await;
                match fetched {
                    Ok(Ok(bytes)) => {
                        debug!("plot_refreshed: client={client} plot={plot} bytes={}", bytes.len());
                        if tx
                            .send(FeedEvent::PlotRefreshed {
                                client: client.clone(),
                                plot: plot.clone(),
                                bytes: bytes.len(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(Err(err)) => {
                        warn!("plot_fetch_error: client={client} plot={plot} {err}");
                    }
                    Err(err) => {
                        warn!("plot_fetch_join_error: {err}");
                        return;
                    }
                }
            }
        });
        Self { handle }
    }
}

impl Drop for PlotTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
