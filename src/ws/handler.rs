//! WebSocket upgrade handlers

use std::future::Future;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::timesync::{stream_time_sync, SampleSink, TimeSyncError, TimeSyncRequest, TimeSyncUpdate};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg, WorldDiff};

type WsSink = SplitSink<WebSocket, Message>;

/// World diff stream upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_world_socket(socket, state))
}

/// Handle an upgraded world diff connection
async fn handle_world_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    info!(client_id = %client_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        client_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(client_id = %client_id, error = %e, "Failed to send welcome");
        return;
    }

    let diff_rx = state.world.subscribe();
    run_session(client_id, ws_sink, ws_stream, diff_rx).await;

    info!(client_id = %client_id, "WebSocket connection closed");
}

/// Run the world diff session with read/write split
async fn run_session(
    client_id: Uuid,
    mut ws_sink: WsSink,
    mut ws_stream: SplitStream<WebSocket>,
    mut diff_rx: broadcast::Receiver<WorldDiff>,
) {
    // Replies from the reader loop share the writer's sink
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(16);

    // Spawn writer task: broadcast diffs and replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(msg) => msg,
                    None => break,
                },
                diff = diff_rx.recv() => match diff {
                    Ok(diff) => ServerMsg::WorldDiff(diff),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            client_id = %client_id,
                            lagged_count = n,
                            "Client lagged, skipping {} diffs", n
                        );
                        // Continue - don't disconnect for lag
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(client_id = %client_id, "Diff channel closed");
                        break;
                    }
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(client_id = %client_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> replies
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(ClientMsg::Ping { t }) => {
                    let pong = ServerMsg::Pong {
                        t,
                        server_time: unix_millis(),
                    };
                    if reply_tx.send(pong).await.is_err() {
                        debug!(client_id = %client_id, "Writer stopped");
                        break;
                    }
                }
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "Failed to parse client message");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(client_id = %client_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(client_id = %client_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Query parameters for a time sync connection
#[derive(Debug, Deserialize)]
pub struct TimeSyncQuery {
    pub client_id: Option<String>,
}

/// Time sync stream upgrade handler
pub async fn timesync_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TimeSyncQuery>,
    State(state): State<AppState>,
) -> Response {
    let request = TimeSyncRequest {
        client_id: query.client_id,
    };
    ws.on_upgrade(move |socket| handle_timesync_socket(socket, request, state))
}

/// Time sync samples written as JSON text frames
struct WsSampleSink {
    sink: WsSink,
}

impl SampleSink for WsSampleSink {
    fn send(&mut self, update: TimeSyncUpdate) -> impl Future<Output = Result<(), String>> + Send {
        async move { send_msg(&mut self.sink, &ServerMsg::TimeSync(update)).await }
    }
}

/// Handle an upgraded time sync connection
async fn handle_timesync_socket(socket: WebSocket, request: TimeSyncRequest, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let mut sink = WsSampleSink { sink: ws_sink };

    // The session is cancelled once the client goes away
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let reader_handle = tokio::spawn(async move {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = cancel_tx.send(());
    });
    let cancel = async move {
        let _ = cancel_rx.await;
    };

    let outcome = stream_time_sync(state.time_sync.as_deref(), request, &mut sink, cancel).await;
    reader_handle.abort();

    match outcome {
        Err(TimeSyncError::Cancelled) | Ok(()) => {}
        Err(TimeSyncError::Unavailable) => {
            warn!("Time sync requested but no clock is configured");
        }
        Err(e) => {
            debug!(error = %e, "Time sync session ended");
        }
    }

    let _ = sink.sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
