//! Realtime insert push over the platform's phoenix-channel websocket.

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use finvox_core::error::Result;
use finvox_core::session::TurnRecord;

use crate::TurnSubscription;

const HEARTBEAT_SECS: u64 = 30;

/// Open a realtime subscription to `messages` inserts for one session.
///
/// The channel task runs until the subscription is dropped or the socket
/// closes; the channel is not reconnected after a drop.
pub fn subscribe(base_url: &str, api_key: &str, session_id: &str) -> Result<TurnSubscription> {
    let url = websocket_url(base_url, api_key);
    let topic = channel_topic(session_id);
    let filter = format!("session_id=eq.{session_id}");

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        if let Err(e) = run_channel(&url, &topic, &filter, tx, task_cancel).await {
            warn!(%e, %topic, "Realtime channel ended");
        }
    });

    Ok(TurnSubscription::new(rx, cancel))
}

fn websocket_url(base_url: &str, api_key: &str) -> String {
    let host = base_url
        .trim_end_matches('/')
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    format!("wss://{host}/realtime/v1/websocket?apikey={api_key}&vsn=1.0.0")
}

fn channel_topic(session_id: &str) -> String {
    format!("realtime:messages:{session_id}")
}

/// One frame of the phoenix wire protocol.
#[derive(Debug, Deserialize)]
struct PhoenixFrame {
    #[serde(default)]
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Extract an inserted turn from a `postgres_changes` frame, if that is what
/// the frame carries.
fn decode_insert(frame: &PhoenixFrame) -> Option<TurnRecord> {
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = frame.payload.get("data")?;
    if data.get("type").and_then(|t| t.as_str()) != Some("INSERT") {
        return None;
    }
    serde_json::from_value(data.get("record")?.clone()).ok()
}

async fn run_channel(
    url: &str,
    topic: &str,
    filter: &str,
    tx: mpsc::UnboundedSender<TurnRecord>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (ws, _) = connect_async(url).await?;
    let (mut write, mut read) = ws.split();

    // Join the channel with an INSERT filter on the messages table.
    let join = json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "filter": filter,
                }],
            },
        },
        "ref": "1",
    });
    write.send(Message::text(join.to_string())).await?;
    debug!(topic, "Joined realtime channel");

    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_SECS));
    heartbeat.tick().await; // first tick fires immediately
    let mut heartbeat_ref: u64 = 1;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let leave = json!({
                    "topic": topic,
                    "event": "phx_leave",
                    "payload": {},
                    "ref": "leave",
                });
                let _ = write.send(Message::text(leave.to_string())).await;
                debug!(topic, "Left realtime channel");
                return Ok(());
            }
            _ = heartbeat.tick() => {
                heartbeat_ref += 1;
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": heartbeat_ref.to_string(),
                });
                write.send(Message::text(beat.to_string())).await?;
            }
            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => anyhow::bail!("websocket error: {e}"),
                    None => anyhow::bail!("websocket closed"),
                };
                let Message::Text(text) = msg else { continue };
                let frame: PhoenixFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        debug!(%e, "Skipping unparseable realtime frame");
                        continue;
                    }
                };
                if let Some(turn) = decode_insert(&frame) {
                    if tx.send(turn).is_err() {
                        // Receiver dropped; the Drop impl also cancels, but
                        // don't rely on ordering.
                        return Ok(());
                    }
                }
            }
        }
    }
}
