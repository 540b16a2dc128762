//! NDJSON response bodies.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api::models::stream::StreamEvent;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Sending half of an event stream. Send failures mean the client went away and are ignored.
#[derive(Debug, Clone)]
pub struct EventSink(mpsc::UnboundedSender<StreamEvent>);

impl EventSink {
    pub fn send(&self, event: StreamEvent) {
        let _ = self.0.send(event);
    }
}

/// Create an event channel and the streaming response that drains it.
pub fn ndjson_channel() -> (EventSink, Response) {
    let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(Bytes::from(event.to_ndjson())));
    let response = ([(CONTENT_TYPE, NDJSON_CONTENT_TYPE)], Body::from_stream(stream)).into_response();
    (EventSink(tx), response)
}
