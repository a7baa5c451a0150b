//! Server-Sent Events support

use crate::runtime::SessionEnded;
use crate::transport::OutboundMessage;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Events sent to gateway clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Outbound(OutboundMessage),
    SessionEnded(SessionEnded),
}

/// Merge outbound replies and session-ended events into one SSE stream
pub fn sse_stream(
    outbound_rx: broadcast::Receiver<OutboundMessage>,
    ended_rx: broadcast::Receiver<SessionEnded>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let combined = events(outbound_rx, ended_rx).map(|event| Ok(sse_event_to_axum(event)));

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn events(
    outbound_rx: broadcast::Receiver<OutboundMessage>,
    ended_rx: broadcast::Receiver<SessionEnded>,
) -> impl Stream<Item = SseEvent> {
    let outbound = BroadcastStream::new(outbound_rx)
        .filter_map(|result| received("outbound", result).map(SseEvent::Outbound));
    let ended = BroadcastStream::new(ended_rx)
        .filter_map(|result| received("session_ended", result).map(SseEvent::SessionEnded));
    outbound.merge(ended)
}

/// A slow subscriber loses what it lagged behind on; make that visible
fn received<T>(stream: &'static str, result: Result<T, BroadcastStreamRecvError>) -> Option<T> {
    match result {
        Ok(item) => Some(item),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(stream, skipped, "SSE subscriber lagged, events were dropped");
            None
        }
    }
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = match event {
        SseEvent::Outbound(message) => (
            "outbound",
            json!({
                "type": "outbound",
                "connection_id": message.connection_id,
                "text": message.text,
                "sent_at": message.sent_at,
            }),
        ),
        SseEvent::SessionEnded(ended) => (
            "session_ended",
            json!({
                "type": "session_ended",
                "session": ended.session,
                "canceled": ended.canceled,
                "reason": ended.reason,
                "message": ended.message,
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
