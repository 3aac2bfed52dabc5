use crate::state::FeedEvent;
use futures_util::StreamExt;
use labmon_core::LogEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;
use url::Url;

// Fixed reconnect delay on close or error. No backoff and no replay:
// events emitted while the channel is down are lost.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);

pub async fn log_stream_loop(ws_url: Url, tx: mpsc::Sender<FeedEvent>) {
    loop {
        match connect_async(ws_url.as_str()).await {
            Ok((mut ws, _)) => {
                if tx.send(FeedEvent::LogOpened).await.is_err() {
                    return;
                }
                while let Some(message) = ws.next().await {
                    match message {
                        Ok(Message::Text(text)) => match serde_json::from_str::<LogEvent>(&text) {
                            Ok(event) => {
                                if tx.send(FeedEvent::Log(event)).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!("log_decode_error: {err}");
                            }
                        },
                        Ok(_) => {}
                        Err(err) => {
                            warn!("log_stream_error: {err}");
                            break;
                        }
                    }
                }
                if tx.send(FeedEvent::LogClosed).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!("log_connect_error: {err}");
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
