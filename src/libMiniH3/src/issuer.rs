//! Request issuing: pseudo-headers, body framing and flushing.

use crate::error::H3Result;
use crate::event::{HeaderList, StreamId};
use crate::lifecycle::CompletionHandle;
use crate::router::StreamRouter;
use bytes::Bytes;
use log::debug;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Default headers for a form-encoded POST body.
pub fn form_headers(body_len: usize) -> Vec<(String, String)> {
    vec![
        ("content-length".to_string(), body_len.to_string()),
        ("content-type".to_string(), FORM_CONTENT_TYPE.to_string()),
    ]
}

/// Outgoing side of the HTTP/3 engine.
pub trait RequestSink {
    /// Open a new request stream and queue its header frame.
    ///
    /// The engine allocates the stream id; it is never reused on the connection.
    fn send_headers(&mut self, headers: &[(Bytes, Bytes)], end_stream: bool)
    -> H3Result<StreamId>;

    /// Queue a data frame on an open request stream.
    fn send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> H3Result<()>;

    /// Push queued frames towards the wire.
    fn flush(&mut self) -> H3Result<()>;
}

/// One request to issue on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub authority: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        authority: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            authority: authority.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>, authority: impl Into<String>) -> Self {
        Self::new("GET", path, authority)
    }

    /// A form POST carrying `content-length` and `content-type` headers.
    pub fn post(path: impl Into<String>, authority: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new("POST", path, authority);
        request.headers = form_headers(body.len());
        request.body(body)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Wire header list: `:method`, `:scheme`, `:authority`, `:path`, then
    /// caller headers in the order given.
    pub fn header_list(&self) -> HeaderList {
        let pseudo = [
            (":method", self.method.as_str()),
            (":scheme", "https"),
            (":authority", self.authority.as_str()),
            (":path", self.path.as_str()),
        ];
        pseudo
            .into_iter()
            .chain(self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())))
            .map(|(n, v)| {
                (
                    Bytes::copy_from_slice(n.as_bytes()),
                    Bytes::copy_from_slice(v.as_bytes()),
                )
            })
            .collect()
    }
}

/// Issue `request` on `sink` and register it with `router`.
///
/// The pending entry exists before this returns, so no response event can
/// reach the router ahead of it.
pub fn send<S>(sink: &mut S, router: &mut StreamRouter, request: &Request) -> H3Result<CompletionHandle>
where
    S: RequestSink + ?Sized,
{
    let headers = request.header_list();
    let stream_id = sink.send_headers(&headers, request.body.is_none())?;
    let handle = router.begin(stream_id)?;
    debug!(
        "{} {} issued on stream {}",
        request.method, request.path, stream_id
    );

    if let Err(e) = send_body(sink, stream_id, request.body.as_ref()) {
        router.pending_mut().abandon(stream_id);
        return Err(e);
    }
    Ok(handle)
}

fn send_body<S>(sink: &mut S, stream_id: StreamId, body: Option<&Bytes>) -> H3Result<()>
where
    S: RequestSink + ?Sized,
{
    sink.flush()?;
    if let Some(body) = body {
        sink.send_data(stream_id, body.clone(), true)?;
        sink.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::H3Error;
    use crate::testing::{RecordingSink, SentFrame};

    fn text(list: &HeaderList) -> Vec<(String, String)> {
        list.iter()
            .map(|(n, v)| {
                (
                    String::from_utf8_lossy(n).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )
            })
            .collect()
    }

    #[test]
    fn get_sends_single_terminating_header_frame() {
        let mut sink = RecordingSink::new();
        let mut router = StreamRouter::new();
        let handle = send(&mut sink, &mut router, &Request::get("/", "example.com")).unwrap();

        assert_eq!(sink.frames.len(), 1);
        match &sink.frames[0] {
            SentFrame::Headers {
                stream_id,
                headers,
                end_stream,
            } => {
                assert_eq!(*stream_id, handle.stream_id());
                assert!(*end_stream);
                assert_eq!(
                    text(headers),
                    vec![
                        (":method".to_string(), "GET".to_string()),
                        (":scheme".to_string(), "https".to_string()),
                        (":authority".to_string(), "example.com".to_string()),
                        (":path".to_string(), "/".to_string()),
                    ]
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(sink.flushes, 1);
        assert!(router.pending().is_pending(handle.stream_id()));
    }

    #[test]
    fn post_sends_headers_then_terminating_data() {
        let mut sink = RecordingSink::new();
        let mut router = StreamRouter::new();
        let request = Request::post("/submit", "example.com", Bytes::from_static(b"x=1"));
        let handle = send(&mut sink, &mut router, &request).unwrap();

        assert_eq!(sink.frames.len(), 2);
        match &sink.frames[0] {
            SentFrame::Headers {
                headers,
                end_stream,
                ..
            } => {
                assert!(!*end_stream);
                let headers = text(headers);
                assert_eq!(headers[0], (":method".to_string(), "POST".to_string()));
                assert_eq!(
                    &headers[4..],
                    &[
                        ("content-length".to_string(), "3".to_string()),
                        ("content-type".to_string(), FORM_CONTENT_TYPE.to_string()),
                    ]
                );
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(
            sink.frames[1],
            SentFrame::Data {
                stream_id: handle.stream_id(),
                data: Bytes::from_static(b"x=1"),
                end_stream: true,
            }
        );
        assert_eq!(sink.flushes, 2);
    }

    #[test]
    fn empty_body_still_flushes_a_terminating_data_frame() {
        let mut sink = RecordingSink::new();
        let mut router = StreamRouter::new();
        let request = Request::new("PUT", "/empty", "example.com").body(Bytes::new());
        send(&mut sink, &mut router, &request).unwrap();

        assert!(matches!(
            sink.frames[1],
            SentFrame::Data {
                end_stream: true,
                ..
            }
        ));
        assert_eq!(sink.flushes, 2);
    }

    #[test]
    fn caller_headers_follow_pseudo_headers_in_order() {
        let request = Request::get("/a?b=c", "example.com")
            .header("accept", "*/*")
            .header("user-agent", "minih3");
        let headers = text(&request.header_list());
        assert_eq!(headers[3], (":path".to_string(), "/a?b=c".to_string()));
        assert_eq!(headers[4].0, "accept");
        assert_eq!(headers[5].0, "user-agent");
    }

    #[test]
    fn stream_ids_are_fresh_per_request() {
        let mut sink = RecordingSink::new();
        let mut router = StreamRouter::new();
        let first = send(&mut sink, &mut router, &Request::get("/", "a")).unwrap();
        let second = send(&mut sink, &mut router, &Request::get("/", "a")).unwrap();
        assert_ne!(first.stream_id(), second.stream_id());
        assert_eq!(router.pending().len(), 2);
    }

    #[test]
    fn failed_body_send_leaves_no_pending_entry() {
        let mut sink = RecordingSink::new();
        sink.fail_data = true;
        let mut router = StreamRouter::new();
        let request = Request::post("/", "example.com", Bytes::from_static(b"x=1"));
        assert!(matches!(
            send(&mut sink, &mut router, &request),
            Err(H3Error::Transport(_))
        ));
        assert!(router.pending().is_empty());
    }
}
