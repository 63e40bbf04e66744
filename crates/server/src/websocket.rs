//! Media stream WebSocket
//!
//! One socket carries one call. The reader task parses carrier messages
//! into the controller's inbound channel; the writer task serializes
//! whatever the controller sends back.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

use intake_agent::CallController;
use intake_transport::{OutboundMessage, StreamMessage};

use crate::metrics::{record_call_rejected, record_request};
use crate::session::CallGuard;
use crate::state::AppState;

const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 256;
/// Time allowed to flush queued messages once the call has ended
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// `GET /ws` upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    record_request("ws");
    if *state.shutdown.borrow() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let remote = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let guard = state.sessions.register(remote).map_err(|e| {
        record_call_rejected();
        StatusCode::from(e)
    })?;

    Ok(ws.on_upgrade(move |socket| {
        let span = tracing::info_span!("media_stream", connection_id = %guard.id());
        handle_socket(socket, state, guard).instrument(span)
    }))
}

async fn handle_socket(socket: WebSocket, state: AppState, guard: CallGuard) {
    tracing::info!(active = state.sessions.count(), "Media stream connected");
    let (mut sink, mut stream) = socket.split();

    let (inbound_tx, inbound_rx) = mpsc::channel::<StreamMessage>(INBOUND_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_BUFFER);

    let reader = tokio::spawn(
        async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => {
                        tracing::debug!("Carrier closed the socket");
                        break;
                    }
                    Ok(Message::Binary(bytes)) => {
                        tracing::debug!(len = bytes.len(), "Ignoring binary message");
                        continue;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Media stream read failed");
                        break;
                    }
                };
                match StreamMessage::parse(&text) {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Ignoring unparseable carrier message");
                        metrics::counter!("intake_agent_errors_total", "kind" => "protocol").increment(1);
                    }
                }
            }
        }
        .in_current_span(),
    );

    let writer = tokio::spawn(
        async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not serialize outbound message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "Media stream write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        }
        .in_current_span(),
    );

    let summary = CallController::new(state.call_config.clone(), state.deps.clone())
        .with_shutdown(state.shutdown.clone())
        .run(inbound_rx, outbound_tx)
        .await;

    reader.abort();
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        tracing::debug!("Writer did not drain in time");
    }

    tracing::info!(
        call_id = %summary.call_id,
        reason = summary.end_reason.as_str(),
        completed = summary.completed,
        missing = ?summary.missing_fields,
        "Media stream closed"
    );
    drop(guard);
}
