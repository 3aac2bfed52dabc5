use crate::state::FeedEvent;
use labmon_core::Snapshot;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::warn;
use url::Url;

// Status fetches that outlive this are treated as failed polls.
pub const STATUS_TIMEOUT: Duration = Duration::from_millis(1000);

// Plot responses larger than this are truncated.
const MAX_PLOT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(Box<ureq::Error>),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("payload read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        TransportError::Http(Box::new(err))
    }
}

// Blocking HTTP client for the monitor daemon, driven from
// spawn_blocking by the async loops below.
pub struct Transport {
    agent: ureq::Agent,
    host: Url,
    base: String,
}

impl Transport {
    pub fn new(host: Url, base: impl Into<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(STATUS_TIMEOUT).build(),
            host,
            base: base.into(),
        }
    }

    pub fn fetch_status(&self) -> Result<Snapshot, TransportError> {
        let mut url = self.host.clone();
        url.set_path(&format!("{}/status", self.base));
        let snapshot = self
            .agent
            .request_url("GET", &url)
            .call()?
            .into_json::<Snapshot>()?;
        Ok(snapshot)
    }

    // Fire and forget; the response body is ignored.
    pub fn send_command(&self, text: &str) -> Result<(), TransportError> {
        let mut url = self.host.clone();
        url.set_path(&format!("{}/command", self.base));
        url.query_pairs_mut().append_pair("string", text);
        self.agent.request_url("GET", &url).call()?;
        Ok(())
    }

    pub fn fetch_template(&self, name: &str) -> Result<String, TransportError> {
        let mut url = self.host.clone();
        url.set_path(&format!("/template/{name}"));
        let body = self.agent.request_url("GET", &url).call()?.into_string()?;
        Ok(body)
    }

    // The rnd query parameter keeps intermediate proxies from serving
    // a stale image.
    pub fn fetch_plot(&self, src: &str) -> Result<Vec<u8>, TransportError> {
        let mut url = self.host.join(src)?;
        url.query_pairs_mut().append_pair("rnd", &cache_buster());
        let response = self.agent.request_url("GET", &url).call()?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_PLOT_BYTES)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

fn cache_buster() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| format!("{}{:09}", since.as_secs(), since.subsec_nanos()))
        .unwrap_or_else(|_| "0".to_string())
}

// Each fetch carries a monotonic sequence number so the app can drop a
// response that arrives after a newer one. The retry delay is constant
// (no backoff); a delay change through the watch channel replaces the
// pending timer rather than stacking a second one.
pub async fn poll_loop(
    transport: Arc<Transport>,
    mut interval_rx: watch::Receiver<Duration>,
    tx: mpsc::Sender<FeedEvent>,
) {
    let mut seq = 0u64;
    loop {
        seq += 1;
        let shared = transport.clone();
        let fetched = tokio::task::spawn_blocking(move || shared.fetch_status()).await;
        let event = match fetched {
            Ok(Ok(snapshot)) => FeedEvent::Poll {
                seq,
                result: Ok(snapshot),
            },
            Ok(Err(err)) => {
                warn!("status_fetch_error: {err}");
                FeedEvent::Poll {
                    seq,
                    result: Err(err.to_string()),
                }
            }
            Err(err) => {
                warn!("status_fetch_join_error: {err}");
                FeedEvent::Poll {
                    seq,
                    result: Err(err.to_string()),
                }
            }
        };
        if tx.send(event).await.is_err() {
            return;
        }

        let mut delay = *interval_rx.borrow();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => break,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    delay = *interval_rx.borrow();
                }
            }
        }
    }
}

// Drains one submission at a time, which keeps commands on the wire in
// submission order. Failures are reported but never retried.
pub async fn command_loop(
    transport: Arc<Transport>,
    mut rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<FeedEvent>,
) {
    while let Some(text) = rx.recv().await {
        let shared = transport.clone();
        let line = text.clone();
        let sent = tokio::task::spawn_blocking(move || shared.send_command(&line)).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("command_send_error: {err}");
                let _ = tx
                    .send(FeedEvent::CommandFailed {
                        text,
                        error: err.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                warn!("command_send_join_error: {err}");
            }
        }
    }
}

// A failed template fetch is recoverable: the client keeps its generic
// body and the failure is logged.
pub async fn template_loop(
    transport: Arc<Transport>,
    mut rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<FeedEvent>,
) {
    while let Some(name) = rx.recv().await {
        let shared = transport.clone();
        let template = name.clone();
        let fetched =
            tokio::task::spawn_blocking(move || shared.fetch_template(&template)).await;
        let body = match fetched {
            Ok(Ok(body)) => Some(body),
            Ok(Err(err)) => {
                warn!("template_fetch_error: name={name} {err}");
                None
            }
            Err(err) => {
                warn!("template_fetch_join_error: {err}");
                None
            }
        };
        if tx.send(FeedEvent::Template { name, body }).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport::new(
            Url::parse("http://127.0.0.1:8888").expect("host url"),
            "/monitor",
        )
    }

    #[test]
    fn status_url_combines_base_and_endpoint() {
        let t = transport();
        let mut url = t.host.clone();
        url.set_path(&format!("{}/status", t.base));
        assert_eq!(url.as_str(), "http://127.0.0.1:8888/monitor/status");
    }

    #[test]
    fn command_text_is_query_encoded() {
        let t = transport();
        let mut url = t.host.clone();
        url.set_path(&format!("{}/command", t.base));
        url.query_pairs_mut()
            .append_pair("string", "send cryo set_temp 4.2");
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8888/monitor/command?string=send+cryo+set_temp+4.2"
        );
    }

    #[test]
    fn plot_sources_resolve_relative_and_absolute() {
        let t = transport();
        let relative = t.host.join("/keithley/current.png").expect("relative");
        assert_eq!(relative.as_str(), "http://127.0.0.1:8888/keithley/current.png");

        let absolute = t.host.join("http://plots.lab/current.png").expect("absolute");
        assert_eq!(absolute.as_str(), "http://plots.lab/current.png");
    }
}
