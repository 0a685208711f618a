//! `/api/triage/:runId/stream` transport.
//!
//! `triage_core::events` publishes `TriageEventFrame`s, whose JSON shape is
//! flattened (`{"type": ..., <event fields>, "timestamp": ...}`) — correct
//! for internal pub/sub, but the wire contract here nests the event's own
//! fields under a `data` key. This module only reshapes frames for transport;
//! it never reaches back into the orchestrator.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use triage_core::{TriageEvent, TriageEventFrame};

use crate::ServiceState;

fn frame_to_event(frame: &TriageEventFrame) -> Result<Event, Infallible> {
    let mut event_value = serde_json::to_value(&frame.event).unwrap_or(Value::Null);
    let event_type = event_value
        .get("type")
        .cloned()
        .unwrap_or_else(|| Value::String("unknown".to_string()));
    if let Value::Object(map) = &mut event_value {
        map.remove("type");
    }

    let envelope = json!({
        "type": event_type,
        "data": event_value,
        "timestamp": frame.timestamp,
    });

    Ok(Event::default().data(envelope.to_string()))
}

pub async fn stream_triage(
    State(state): State<ServiceState>,
    Path(run_id): Path<Uuid>,
) -> Response {
    let connected = TriageEventFrame::new(TriageEvent::Connected { run_id });
    let opening = stream::once(async move { frame_to_event(&connected) });

    let body: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        match state.registry.get(run_id) {
            None => {
                let frame = TriageEventFrame::new(TriageEvent::Error {
                    message: "run not found".to_string(),
                });
                Box::pin(stream::once(async move { frame_to_event(&frame) }))
            }
            Some(handle) => {
                if let Some(terminal) = handle.terminal_frame() {
                    Box::pin(stream::once(async move { frame_to_event(&terminal) }))
                } else {
                    let receiver = handle.sink.subscribe();
                    let events =
                        BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
                    Box::pin(stream::unfold((events, false), |(mut events, done)| async move {
                        if done {
                            return None;
                        }
                        let frame = events.next().await?;
                        let terminal = frame.event.is_terminal();
                        Some((frame_to_event(&frame), (events, terminal)))
                    }))
                }
            }
        };

    let sse = Sse::new(opening.chain(body)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    let mut response = sse.into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
    response.headers_mut().insert(
        "x-accel-buffering",
        HeaderValue::from_static("no"),
    );
    response
}
