use crate::error::{H3Error, H3Result};
use crate::event::{H3Event, StreamId};
use crate::issuer::{self, Request, RequestSink};
use crate::lifecycle::CompletionHandle;
use crate::router::StreamRouter;
use bytes::{Bytes, BytesMut};
use log::{debug, error, info, trace, warn};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tokio_quiche::quic::{HandshakeInfo, QuicheConnection};
use tokio_quiche::quiche;
use tokio_quiche::quiche::h3::{self, NameValue};
use tokio_quiche::{ApplicationOverQuic, QuicResult};

const RECV_BUFFER_SIZE: usize = 65535;
// H3_NO_ERROR
const GRACEFUL_CLOSE_CODE: u64 = 0x100;

pub(crate) enum DriverCommand {
    Request {
        request: Request,
        reply: oneshot::Sender<H3Result<CompletionHandle>>,
    },
    /// The caller stopped waiting for this stream.
    Abandon(StreamId),
    Close,
}

/// Caller side of a running [`ClientDriver`].
pub struct ClientController {
    command_sender: mpsc::UnboundedSender<DriverCommand>,
}

impl ClientController {
    pub(crate) fn new(command_sender: mpsc::UnboundedSender<DriverCommand>) -> Self {
        Self { command_sender }
    }

    pub(crate) fn send(&self, command: DriverCommand) -> H3Result<()> {
        self.command_sender
            .send(command)
            .map_err(|_| H3Error::Closed)
    }

    /// Resolves once the driver is gone and its connection worker has exited.
    pub(crate) async fn closed(&self) {
        self.command_sender.closed().await
    }
}

struct PendingBody {
    data: Bytes,
    fin: bool,
}

/// Request bodies waiting for stream capacity.
#[derive(Default)]
struct OutboundBodies {
    streams: BTreeMap<StreamId, VecDeque<PendingBody>>,
}

impl OutboundBodies {
    fn push(&mut self, stream_id: StreamId, data: Bytes, fin: bool) {
        self.streams
            .entry(stream_id)
            .or_default()
            .push_back(PendingBody { data, fin });
    }

    /// Write queued bodies as far as `write` accepts them. A stream whose
    /// write fails loses its queue and is reported in `failures`.
    fn flush<W>(&mut self, trace_id: &str, mut write: W, failures: &mut Vec<(StreamId, H3Error)>)
    where
        W: FnMut(StreamId, &[u8], bool) -> Result<usize, h3::Error>,
    {
        self.streams.retain(|&stream_id, frames| {
            while let Some(frame) = frames.front_mut() {
                match write(stream_id, &frame.data, frame.fin) {
                    Ok(written) if written == frame.data.len() => {
                        debug!("{} sent {} body bytes on stream {}", trace_id, written, stream_id);
                        frames.pop_front();
                    }
                    Ok(written) => {
                        trace!(
                            "{} partial body write on stream {}: {}/{}",
                            trace_id,
                            stream_id,
                            written,
                            frame.data.len()
                        );
                        frame.data = frame.data.slice(written..);
                        break;
                    }
                    Err(h3::Error::Done) | Err(h3::Error::StreamBlocked) => break,
                    Err(e) => {
                        error!("{} send body error on stream {}: {}", trace_id, stream_id, e);
                        failures.push((stream_id, e.into()));
                        return false;
                    }
                }
            }
            !frames.is_empty()
        });
    }
}

/// quiche-backed request sink. Body frames are queued per stream and written
/// on flush as far as flow control allows.
struct QuicheSink<'a> {
    qconn: &'a mut QuicheConnection,
    h3conn: &'a mut h3::Connection,
    outbound: &'a mut OutboundBodies,
    failures: &'a mut Vec<(StreamId, H3Error)>,
}

impl QuicheSink<'_> {
    fn flush_all(&mut self) {
        let trace_id = self.qconn.trace_id().to_string();
        let Self {
            qconn,
            h3conn,
            outbound,
            failures,
        } = self;
        outbound.flush(
            &trace_id,
            |stream_id, data, fin| h3conn.send_body(&mut **qconn, stream_id, data, fin),
            failures,
        );
    }
}

impl RequestSink for QuicheSink<'_> {
    fn send_headers(&mut self, headers: &[(Bytes, Bytes)], end_stream: bool) -> H3Result<StreamId> {
        let list: Vec<h3::Header> = headers
            .iter()
            .map(|(name, value)| h3::Header::new(name, value))
            .collect();
        let stream_id = self.h3conn.send_request(self.qconn, &list, end_stream)?;
        debug!(
            "{} send headers on stream {} (fin: {})",
            self.qconn.trace_id(),
            stream_id,
            end_stream
        );
        Ok(stream_id)
    }

    fn send_data(&mut self, stream_id: StreamId, data: Bytes, end_stream: bool) -> H3Result<()> {
        self.outbound.push(stream_id, data, end_stream);
        Ok(())
    }

    fn flush(&mut self) -> H3Result<()> {
        self.flush_all();
        Ok(())
    }
}

/// What one polled `h3::Event` means for the router.
#[derive(Debug, PartialEq)]
enum Translated {
    Event(H3Event),
    /// Body bytes are readable with `recv_body`.
    Body,
    GoAway,
    Ignored,
}

fn translate_event(stream_id: StreamId, event: h3::Event) -> Translated {
    match event {
        h3::Event::Headers { list, more_frames } => Translated::Event(H3Event::HeadersReceived {
            stream_id,
            headers: list
                .iter()
                .map(|h| {
                    (
                        Bytes::copy_from_slice(h.name()),
                        Bytes::copy_from_slice(h.value()),
                    )
                })
                .collect(),
            stream_ended: !more_frames,
        }),
        h3::Event::Data => Translated::Body,
        h3::Event::Finished => Translated::Event(H3Event::DataReceived {
            stream_id,
            data: Bytes::new(),
            stream_ended: true,
        }),
        h3::Event::Reset(code) => Translated::Event(H3Event::StreamReset { stream_id, code }),
        h3::Event::GoAway => Translated::GoAway,
        _ => Translated::Ignored,
    }
}

/// Read everything `read` has buffered for one stream.
fn drain_body<R>(buf: &mut [u8], mut read: R) -> Result<Bytes, h3::Error>
where
    R: FnMut(&mut [u8]) -> Result<usize, h3::Error>,
{
    let mut body = BytesMut::new();
    loop {
        match read(&mut *buf) {
            Ok(0) | Err(h3::Error::Done) => return Ok(body.freeze()),
            Ok(n) => body.extend_from_slice(&buf[..n]),
            Err(e) => return Err(e),
        }
    }
}

/// Client-side application driven by tokio-quiche's I/O loop.
///
/// Commands from the [`ClientController`] are picked up in `wait_for_data`
/// and executed in `process_writes`; HTTP/3 events are translated and routed
/// in `process_reads`. Both run on the connection's single I/O task.
pub struct ClientDriver {
    h3conn: Option<h3::Connection>,
    h3config: h3::Config,
    command_receiver: mpsc::UnboundedReceiver<DriverCommand>,
    queued_commands: VecDeque<DriverCommand>,
    router: StreamRouter,
    outbound: OutboundBodies,
    /// Streams that failed locally, resolved on the next read or write pass.
    failures: Vec<(StreamId, H3Error)>,
    recv_buf: Vec<u8>,
    closing: bool,
}

impl ClientDriver {
    pub fn new() -> H3Result<(Self, ClientController)> {
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let h3config = h3::Config::new()?;
        Ok((
            Self {
                h3conn: None,
                h3config,
                command_receiver,
                queued_commands: VecDeque::new(),
                router: StreamRouter::new(),
                outbound: OutboundBodies::default(),
                failures: Vec::new(),
                recv_buf: vec![0; RECV_BUFFER_SIZE],
                closing: false,
            },
            ClientController::new(command_sender),
        ))
    }

    /// Drain the HTTP/3 engine into application events.
    fn poll_h3_events(&mut self, qconn: &mut QuicheConnection) -> QuicResult<Vec<H3Event>> {
        let mut events = Vec::new();
        let Some(h3conn) = self.h3conn.as_mut() else {
            return Ok(events);
        };
        loop {
            let (stream_id, event) = match h3conn.poll(qconn) {
                Ok(polled) => polled,
                Err(h3::Error::Done) => break,
                Err(e) => {
                    error!("{} HTTP/3 poll error: {}", qconn.trace_id(), e);
                    return Err(e.into());
                }
            };
            match translate_event(stream_id, event) {
                Translated::Event(event) => {
                    debug!(
                        "{} {} on stream {}",
                        qconn.trace_id(),
                        event.kind(),
                        stream_id
                    );
                    events.push(event);
                }
                Translated::Body => {
                    let drained = drain_body(&mut self.recv_buf, |buf| {
                        h3conn.recv_body(qconn, stream_id, buf)
                    });
                    match drained {
                        Ok(data) => {
                            debug!(
                                "{} {} body bytes on stream {}",
                                qconn.trace_id(),
                                data.len(),
                                stream_id
                            );
                            events.push(H3Event::DataReceived {
                                stream_id,
                                data,
                                stream_ended: false,
                            });
                        }
                        Err(e) => {
                            warn!(
                                "{} recv body error on stream {}: {}",
                                qconn.trace_id(),
                                stream_id,
                                e
                            );
                            self.failures.push((stream_id, e.into()));
                        }
                    }
                }
                Translated::GoAway => {
                    info!("{} peer sent GOAWAY ({})", qconn.trace_id(), stream_id);
                }
                Translated::Ignored => {
                    debug!("{} ignoring event on stream {}", qconn.trace_id(), stream_id);
                }
            }
        }
        Ok(events)
    }

    /// Resolve failed streams first so their later events are dropped.
    fn route_reads(&mut self, events: Vec<H3Event>) -> usize {
        self.fail_stalled();
        self.router.on_transport_event(events);
        self.router.pending_mut().sweep()
    }

    fn handle_command(&mut self, qconn: &mut QuicheConnection, command: DriverCommand) {
        match command {
            DriverCommand::Request { request, reply } => {
                let result = match self.h3conn.as_mut() {
                    Some(h3conn) => {
                        let mut sink = QuicheSink {
                            qconn: &mut *qconn,
                            h3conn,
                            outbound: &mut self.outbound,
                            failures: &mut self.failures,
                        };
                        issuer::send(&mut sink, &mut self.router, &request)
                    }
                    None => Err(H3Error::Connection(
                        "HTTP/3 connection not established".into(),
                    )),
                };
                if let Err(e) = &result {
                    warn!(
                        "{} {} {} not issued: {}",
                        qconn.trace_id(),
                        request.method,
                        request.path,
                        e
                    );
                }
                if reply.send(result).is_err() {
                    debug!("{} request issued after its caller left", qconn.trace_id());
                }
            }
            DriverCommand::Abandon(stream_id) => {
                if self.router.pending_mut().abandon(stream_id) {
                    debug!("{} stream {} abandoned", qconn.trace_id(), stream_id);
                }
            }
            DriverCommand::Close => {
                self.closing = true;
                match qconn.close(true, GRACEFUL_CLOSE_CODE, b"") {
                    Ok(()) | Err(quiche::Error::Done) => {
                        info!("{} closing connection", qconn.trace_id());
                    }
                    Err(e) => warn!("{} close failed: {}", qconn.trace_id(), e),
                }
            }
        }
    }

    fn flush_outbound(&mut self, qconn: &mut QuicheConnection) {
        if let Some(h3conn) = self.h3conn.as_mut() {
            let mut sink = QuicheSink {
                qconn,
                h3conn,
                outbound: &mut self.outbound,
                failures: &mut self.failures,
            };
            sink.flush_all();
        }
    }

    /// Resolve requests whose stream failed on our side.
    fn fail_stalled(&mut self) {
        for (stream_id, e) in self.failures.drain(..) {
            warn!("request on stream {} failed: {}", stream_id, e);
            self.router.pending_mut().fail(stream_id, e);
        }
    }
}

impl ApplicationOverQuic for ClientDriver {
    fn on_conn_established(
        &mut self,
        qconn: &mut QuicheConnection,
        _handshake_info: &HandshakeInfo,
    ) -> QuicResult<()> {
        if self.h3conn.is_some() {
            error!("{} h3conn already created", qconn.trace_id());
            return Err("HTTP/3 connection already created".into());
        }
        info!("{} handshake complete, create h3conn", qconn.trace_id());
        self.h3conn = match h3::Connection::with_transport(qconn, &self.h3config) {
            Ok(v) => Some(v),
            Err(e) => {
                error!("failed to create HTTP/3 connection: {}", e);
                return Err(Box::new(e));
            }
        };
        Ok(())
    }

    fn should_act(&self) -> bool {
        self.h3conn.is_some()
    }

    fn wait_for_data(
        &mut self,
        _qconn: &mut QuicheConnection,
    ) -> impl Future<Output = QuicResult<()>> + Send {
        async move {
            match self.command_receiver.recv().await {
                Some(command) => {
                    self.queued_commands.push_back(command);
                    while let Ok(command) = self.command_receiver.try_recv() {
                        self.queued_commands.push_back(command);
                    }
                }
                // every controller is gone: close once, then stay idle
                None if !self.closing => self.queued_commands.push_back(DriverCommand::Close),
                None => std::future::pending::<()>().await,
            }
            Ok(())
        }
    }

    fn process_reads(&mut self, qconn: &mut QuicheConnection) -> QuicResult<()> {
        let events = self.poll_h3_events(qconn)?;
        let swept = self.route_reads(events);
        if swept > 0 {
            debug!("{} swept {} abandoned requests", qconn.trace_id(), swept);
        }
        Ok(())
    }

    fn process_writes(&mut self, qconn: &mut QuicheConnection) -> QuicResult<()> {
        while let Some(command) = self.queued_commands.pop_front() {
            self.handle_command(qconn, command);
        }
        self.flush_outbound(qconn);
        self.fail_stalled();
        Ok(())
    }
}
