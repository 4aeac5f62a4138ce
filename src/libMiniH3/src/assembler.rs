//! Response assembly from a completed stream's events.

use crate::event::H3Event;
use bytes::{Bytes, BytesMut};
use log::warn;
use std::borrow::Cow;

pub const STATUS_PSEUDO_HEADER: &[u8] = b":status";
pub const DEFAULT_STATUS: u16 = 200;

/// Header added by [`Response::into_proxy_parts`].
pub const PROXY_MARKER_HEADER: (&str, &str) = ("HTTP3", "Loaded-over-HTTP3");

/// Header mapping with last-write-wins per name.
///
/// Names and values are opaque bytes; a name keeps the position where it was
/// first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    entries: Vec<(Bytes, Bytes)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: Bytes, value: Bytes) -> Option<Bytes> {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &[u8]) -> Option<Bytes> {
        let pos = self.entries.iter().position(|(n, _)| n.as_ref() == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.entries.iter().map(|(n, v)| (n, v))
    }

    /// Headers decoded as text, replacing invalid UTF-8.
    pub fn iter_lossy(&self) -> impl Iterator<Item = (Cow<'_, str>, Cow<'_, str>)> {
        self.entries
            .iter()
            .map(|(n, v)| (String::from_utf8_lossy(n), String::from_utf8_lossy(v)))
    }
}

impl FromIterator<(Bytes, Bytes)> for ResponseHeaders {
    fn from_iter<T: IntoIterator<Item = (Bytes, Bytes)>>(iter: T) -> Self {
        let mut headers = ResponseHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Headers and body of one response, built up event by event.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    headers: ResponseHeaders,
    body: BytesMut,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = H3Event>,
    {
        let mut acc = Self::new();
        for event in events {
            acc.absorb(event);
        }
        acc
    }

    pub fn absorb(&mut self, event: H3Event) {
        match event {
            H3Event::HeadersReceived { headers, .. } => {
                for (name, value) in headers {
                    self.headers.insert(name, value);
                }
            }
            H3Event::DataReceived { data, .. } => self.body.extend_from_slice(&data),
            H3Event::StreamReset { .. } => {}
        }
    }

    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: ResponseHeaders,
    body: Bytes,
    timed_out: bool,
}

impl Response {
    /// The empty result handed back when a request times out.
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..finalize(ResponseAccumulator::new())
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers without the `:status` pseudo-header.
    pub fn headers(&self) -> &ResponseHeaders {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn into_parts(self) -> (Bytes, ResponseHeaders) {
        (self.body, self.headers)
    }

    /// Status, headers and body for replaying the response through an
    /// intercepting proxy, tagged as loaded over HTTP/3.
    pub fn into_proxy_parts(self) -> (u16, ResponseHeaders, Bytes) {
        let mut headers = self.headers;
        let (name, value) = PROXY_MARKER_HEADER;
        headers.insert(Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes()));
        (self.status, headers, self.body)
    }
}

/// Produce the final response, pulling `:status` out of the header set.
pub fn finalize(accumulator: ResponseAccumulator) -> Response {
    let ResponseAccumulator { mut headers, body } = accumulator;
    let status = match headers.remove(STATUS_PSEUDO_HEADER) {
        Some(value) => parse_status(&value).unwrap_or_else(|| {
            warn!(
                "unparseable :status {:?}, assuming {}",
                String::from_utf8_lossy(&value),
                DEFAULT_STATUS
            );
            DEFAULT_STATUS
        }),
        None => DEFAULT_STATUS,
    };
    Response {
        status,
        headers,
        body: body.freeze(),
        timed_out: false,
    }
}

fn parse_status(value: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(value).ok()?;
    text.trim().trim_start_matches(':').parse().ok()
}
