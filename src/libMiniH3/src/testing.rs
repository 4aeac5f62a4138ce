//! In-memory stand-ins for the HTTP/3 engine and the connection driver.

use crate::driver::{ClientController, DriverCommand};
use crate::error::{H3Error, H3Result};
use crate::event::{H3Event, HeaderList, StreamId};
use crate::issuer::{self, Request, RequestSink};
use crate::router::StreamRouter;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SentFrame {
    Headers {
        stream_id: StreamId,
        headers: HeaderList,
        end_stream: bool,
    },
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
}

/// Records frames instead of sending them. Allocates client bidi stream ids.
pub(crate) struct RecordingSink {
    next_stream_id: StreamId,
    pub frames: Vec<SentFrame>,
    pub flushes: usize,
    pub fail_data: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            next_stream_id: 0,
            frames: Vec::new(),
            flushes: 0,
            fail_data: false,
        }
    }
}

impl RequestSink for RecordingSink {
    fn send_headers(&mut self, headers: &[(Bytes, Bytes)], end_stream: bool) -> H3Result<StreamId> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 4;
        self.frames.push(SentFrame::Headers {
            stream_id,
            headers: headers.to_vec(),
            end_stream,
        });
        Ok(stream_id)
    }

    fn send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> H3Result<()> {
        if self.fail_data {
            return Err(H3Error::Transport("stream blocked".into()));
        }
        self.frames.push(SentFrame::Data {
            stream_id,
            data,
            end_stream,
        });
        Ok(())
    }

    fn flush(&mut self) -> H3Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Spawn a driver that answers each request with the events `respond` returns,
/// routed through a real [`StreamRouter`].
///
/// The returned watch channel reports the number of pending entries after
/// every command.
pub(crate) fn spawn_loopback<F>(mut respond: F) -> (ClientController, watch::Receiver<usize>)
where
    F: FnMut(StreamId, &Request) -> Vec<H3Event> + Send + 'static,
{
    let (command_sender, mut command_receiver) = mpsc::unbounded_channel();
    let (pending_tx, pending_rx) = watch::channel(0);
    tokio::spawn(async move {
        let mut sink = RecordingSink::new();
        let mut router = StreamRouter::new();
        while let Some(command) = command_receiver.recv().await {
            match command {
                DriverCommand::Request { request, reply } => {
                    let result = issuer::send(&mut sink, &mut router, &request);
                    let stream_id = result.as_ref().ok().map(|h| h.stream_id());
                    let _ = reply.send(result);
                    if let Some(stream_id) = stream_id {
                        router.on_transport_event(respond(stream_id, &request));
                    }
                }
                DriverCommand::Abandon(stream_id) => {
                    router.pending_mut().abandon(stream_id);
                }
                DriverCommand::Close => break,
            }
            router.pending_mut().sweep();
            let _ = pending_tx.send(router.pending().len());
        }
    });
    (ClientController::new(command_sender), pending_rx)
}
