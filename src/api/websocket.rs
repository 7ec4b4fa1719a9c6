//! WebSocket handler for live agent state
//!
//! A client first receives a `snapshot` frame with every known agent, then one
//! frame per delivery from its subscription. The subscription is taken before
//! the snapshot is read, so an update racing the snapshot shows up at least
//! once in the stream instead of getting lost between the two.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{Sink, SinkExt, stream::StreamExt};
use tracing::{debug, info, warn};

use crate::api::{state::ApiState, types::StreamMessage};

/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let mut subscription = state.engine.subscribe();
    let subscriber_id = subscription.id();
    info!(subscriber_id, "WebSocket client connected");

    let agents = state.engine.snapshot().await;
    let (mut sender, mut receiver) = socket.split();

    if send_frame(&mut sender, &StreamMessage::Snapshot { agents })
        .await
        .is_err()
    {
        debug!(subscriber_id, "client left before the snapshot was sent");
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(delivery) = subscription.recv().await {
            let message = StreamMessage::from(delivery);
            if let StreamMessage::Coalesced { dropped } = &message {
                warn!(subscriber_id, dropped, "slow WebSocket client, events coalesced");
            }

            if send_frame(&mut sender, &message).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                return;
            }
        }

        // broadcaster closed, hub is shutting down
        let _ = sender.send(Message::Close(None)).await;
    });

    // Inbound frames carry no commands; only watch for the client leaving
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!(subscriber_id, "WebSocket client disconnected");
}

async fn send_frame<S>(sender: &mut S, message: &StreamMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode stream frame: {}", e);
            return Ok(());
        }
    };

    sender.send(Message::Text(text)).await.map_err(|_| ())
}
