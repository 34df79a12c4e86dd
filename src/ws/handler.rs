//! WebSocket upgrade handler and per-connection session

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
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::SessionInput;
use crate::http::middleware::{verify_session_token, AuthError};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Signed session token; required only when a session secret is configured
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AuthError> {
    let identity = authenticate(state.config.session_secret.as_deref(), query.token.as_deref()).map_err(|e| {
        warn!(error = %e, "WebSocket auth failed");
        e
    })?;

    let connection = Uuid::new_v4();
    if !state.connections.try_register(identity, connection) {
        warn!(identity = %identity, "Identity already connected, upgrade refused");
        return Err(AuthError::AlreadyConnected);
    }

    info!(identity = %identity, connection_id = %connection, "WebSocket upgrade");
    let connections = state.connections.clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!(connection_id = %connection, error = %e, "WebSocket upgrade failed");
            connections.release(identity, connection);
        })
        .on_upgrade(move |socket| handle_socket(socket, identity, connection, state)))
}

/// Resolve the connecting identity. Anonymous when no secret is configured.
fn authenticate(secret: Option<&str>, token: Option<&str>) -> Result<Uuid, AuthError> {
    match (secret, token) {
        (Some(secret), Some(token)) => verify_session_token(token, secret).map(|claims| claims.sub),
        (Some(_), None) => Err(AuthError::MissingToken),
        (None, _) => Ok(Uuid::new_v4()),
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, identity: Uuid, connection: Uuid, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();
    let handle = state.match_handle.clone();

    // Subscribe before registering so the roster change is not missed
    let broadcast_rx = handle.subscribe();

    let Some(player_index) = handle.connect(connection).await else {
        error!(connection_id = %connection, "Match task unavailable");
        state.connections.release(identity, connection);
        return;
    };

    let welcome = ServerMsg::Welcome {
        connection_id: connection,
        player_index,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection_id = %connection, error = %e, "Failed to send welcome");
    } else {
        info!(connection_id = %connection, player_index = ?player_index, "Connection joined session");
        run_session(connection, ws_sink, ws_stream, handle.input_tx.clone(), broadcast_rx).await;
    }

    // Signal disconnect to match loop
    let _ = handle.input_tx.send(SessionInput::Disconnect { connection }).await;
    state.connections.release(identity, connection);

    info!(connection_id = %connection, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    connection: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    input_tx: mpsc::Sender<SessionInput>,
    mut broadcast_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    // Replies addressed to this connection only (pong, errors)
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(16);

    // Writer task: broadcast + direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = broadcast_rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(connection_id = %connection, lagged_count = n, "Client lagged, waiting for next snapshot");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(connection_id = %connection, "Broadcast channel closed");
                        break;
                    }
                },
                direct = direct_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> match queue
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    debug!(connection_id = %connection, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Ping { t }) => {
                        let _ = direct_tx.try_send(ServerMsg::Pong { t });
                    }
                    Ok(msg) => {
                        if input_tx.send(SessionInput::Client { connection, msg }).await.is_err() {
                            debug!(connection_id = %connection, "Input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(connection_id = %connection, error = %e, "Failed to parse client message");
                        let _ = direct_tx.try_send(ServerMsg::Error {
                            code: "bad_request".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(connection_id = %connection, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection, "Client initiated close");
                break;
            }
            Err(e) => {
                warn!(connection_id = %connection, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
