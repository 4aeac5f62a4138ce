//! Application-layer events delivered by the HTTP/3 engine.

use bytes::Bytes;

/// Per-connection identifier of one request/response exchange.
pub type StreamId = u64;

/// Header name/value pairs as raw bytes, in wire order.
pub type HeaderList = Vec<(Bytes, Bytes)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H3Event {
    HeadersReceived {
        stream_id: StreamId,
        headers: HeaderList,
        stream_ended: bool,
    },
    DataReceived {
        stream_id: StreamId,
        data: Bytes,
        stream_ended: bool,
    },
    /// The peer aborted the stream.
    StreamReset { stream_id: StreamId, code: u64 },
}

impl H3Event {
    /// Build a headers event from text pairs.
    pub fn headers(stream_id: StreamId, headers: &[(&str, &str)], stream_ended: bool) -> Self {
        H3Event::HeadersReceived {
            stream_id,
            headers: headers
                .iter()
                .map(|(n, v)| {
                    (
                        Bytes::copy_from_slice(n.as_bytes()),
                        Bytes::copy_from_slice(v.as_bytes()),
                    )
                })
                .collect(),
            stream_ended,
        }
    }

    pub fn data(stream_id: StreamId, data: &[u8], stream_ended: bool) -> Self {
        H3Event::DataReceived {
            stream_id,
            data: Bytes::copy_from_slice(data),
            stream_ended,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        match self {
            H3Event::HeadersReceived { stream_id, .. }
            | H3Event::DataReceived { stream_id, .. }
            | H3Event::StreamReset { stream_id, .. } => *stream_id,
        }
    }

    /// Whether this is the last event the stream will produce.
    pub fn stream_ended(&self) -> bool {
        match self {
            H3Event::HeadersReceived { stream_ended, .. }
            | H3Event::DataReceived { stream_ended, .. } => *stream_ended,
            H3Event::StreamReset { .. } => true,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            H3Event::HeadersReceived { .. } => "headers",
            H3Event::DataReceived { .. } => "data",
            H3Event::StreamReset { .. } => "reset",
        }
    }
}
