use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use tracing::debug;

use mediafabric_core::subscriptions::SocketAttachment;
use mediafabric_core::SubscriptionManager;

use crate::error::{parse_version, ApiError};
use crate::query::{parse_subscription_id, QueryState};

/// `GET /x-nmos/query/{version}/ws/?uid=<subscription-id>`: attach to the
/// subscription and stream its grains. The socket is registered before the
/// upgrade completes, so the sync grain is already queued ahead of any
/// increments.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(version): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<QueryState>,
) -> Result<Response, ApiError> {
    parse_version(&version)?;
    let uid = params.get("uid").ok_or_else(|| ApiError::BadRequest("uid parameter required".to_string()))?;
    let uid = parse_subscription_id(uid)?;

    let attachment = state.subscriptions.attach(uid).await?;
    let manager = state.subscriptions.clone();
    Ok(ws.on_upgrade(move |socket| serve_socket(socket, attachment, manager)))
}

/// Pump queued frames at the peer until either side lets go. Inbound
/// frames are ignored; the stream is server-push only.
async fn serve_socket(mut socket: WebSocket, attachment: SocketAttachment, manager: SubscriptionManager) {
    let SocketAttachment { subscription_id, socket_id, mut rx } = attachment;
    debug!(subscription = %subscription_id, "websocket open");

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // The subscription side dropped us (deletion or a forced
                // resync); close so the client reconnects.
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = socket.recv() => match inbound {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    manager.detach(subscription_id, socket_id);
    debug!(subscription = %subscription_id, "websocket closed");
}
