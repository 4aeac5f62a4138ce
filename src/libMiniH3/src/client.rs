//! Client session: opens the connection, issues requests and waits for them.

use crate::assembler::{Response, ResponseAccumulator, finalize};
use crate::config::{ClientConfig, Role};
use crate::driver::{ClientController, ClientDriver, DriverCommand};
use crate::error::{H3Error, H3Result};
use crate::event::StreamId;
use crate::issuer::{Request, form_headers};
use crate::lifecycle::{Completion, CompletionHandle};
use bytes::Bytes;
use log::{debug, info, warn};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_quiche::quic::connect_with_config;
use tokio_quiche::settings::ConnectionParams;
use tokio_quiche::socket::Socket;
use url::{Host, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    RequestInFlight,
    Completed,
    TimedOut,
    Failed,
}

/// Where a URL points: connect host, port, `:authority` and `:path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub authority: String,
    pub path: String,
}

impl Target {
    /// Parse an `https` URL. `http` URLs are accepted too and fetched over
    /// HTTP/3 all the same, since requests always carry `:scheme https`.
    pub fn parse(url: &str, default_port: u16) -> H3Result<Self> {
        let parsed = Url::parse(url).map_err(|e| H3Error::InvalidUrl(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "https" => {}
            "http" => debug!("fetching {} over HTTP/3 as https", url),
            scheme => {
                return Err(H3Error::InvalidUrl(format!(
                    "{url}: unsupported scheme {scheme}"
                )));
            }
        }
        let (host, authority) = match parsed.host() {
            Some(Host::Domain(domain)) => (domain.to_string(), domain.to_string()),
            Some(Host::Ipv4(addr)) => (addr.to_string(), addr.to_string()),
            Some(Host::Ipv6(addr)) => (addr.to_string(), format!("[{addr}]")),
            None => return Err(H3Error::InvalidUrl(format!("{url}: missing host"))),
        };
        Ok(Self {
            host,
            port: parsed.port().or_else(|| written_port(url)).unwrap_or(default_port),
            authority,
            path: request_path(&parsed),
        })
    }
}

/// `Url` drops a port equal to the scheme default; recover it from the input.
fn written_port(input: &str) -> Option<u16> {
    let (_, rest) = input.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let (_, port) = host_port.rsplit_once(':')?;
    // a bracketed IPv6 literal without a port
    if port.ends_with(']') {
        return None;
    }
    port.parse().ok()
}

fn request_path(url: &Url) -> String {
    let path = match url.path() {
        "" => "/",
        p => p,
    };
    match url.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

/// How long `close` waits for the connection to finish closing.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One HTTP/3 connection and the requests issued on it.
pub struct H3Client {
    controller: ClientController,
    authority: String,
    config: ClientConfig,
    state: SessionState,
}

impl H3Client {
    /// Connect to the origin of `url`.
    pub async fn connect(url: &str, config: ClientConfig) -> H3Result<Self> {
        let target = Target::parse(url, config.default_port())?;
        Self::connect_to(&target.host, target.port, &target.authority, config).await
    }

    pub async fn connect_to(
        host: &str,
        port: u16,
        authority: &str,
        config: ClientConfig,
    ) -> H3Result<Self> {
        if config.transport().role() != Role::Client {
            return Err(H3Error::Config(
                "client sessions need a client-role transport config".into(),
            ));
        }
        debug!("session {:?} -> {:?}", SessionState::Disconnected, SessionState::Connecting);

        let peer = lookup_host((host, port))
            .await
            .map_err(|e| H3Error::Connection(format!("failed to resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| H3Error::Connection(format!("no address for {host}:{port}")))?;
        let local: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        let socket = Socket::try_from(socket)
            .map_err(|e| H3Error::Connection(format!("unusable UDP socket: {e}")))?;

        let (driver, controller) = ClientDriver::new()?;
        let params = ConnectionParams::new_client(
            config.to_quic_settings(),
            None,
            Default::default(),
        );
        connect_with_config(socket, Some(host), &params, driver)
            .await
            .map_err(|e| H3Error::Connection(format!("QUIC connection to {peer} failed: {e}")))?;
        info!("connected to {} ({})", authority, peer);

        Ok(Self::with_controller(controller, authority, config))
    }

    pub(crate) fn with_controller(
        controller: ClientController,
        authority: &str,
        config: ClientConfig,
    ) -> Self {
        Self {
            controller,
            authority: authority.to_string(),
            config,
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Issue a request for `url` (absolute, or a path on this connection).
    pub async fn request(
        &mut self,
        url: &str,
        method: &str,
        headers: Vec<(String, String)>,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> H3Result<Response> {
        let path = if url.starts_with('/') {
            url.to_string()
        } else {
            Target::parse(url, self.config.default_port())?.path
        };
        let mut request = Request::new(method, path, self.authority.as_str());
        request.headers = headers;
        request.body = body;
        self.send(request, timeout).await
    }

    pub async fn get(&mut self, url: &str) -> H3Result<Response> {
        let timeout = self.config.timeout();
        self.request(url, "GET", Vec::new(), None, timeout).await
    }

    pub async fn post(&mut self, url: &str, body: Bytes) -> H3Result<Response> {
        let timeout = self.config.timeout();
        let headers = form_headers(body.len());
        self.request(url, "POST", headers, Some(body), timeout).await
    }

    /// Send `request` and wait up to `timeout` for the complete response.
    ///
    /// A timeout is not an error: it yields [`Response::timed_out`] and the
    /// connection stays usable.
    pub async fn send(&mut self, request: Request, timeout: Duration) -> H3Result<Response> {
        match self.state {
            SessionState::Failed | SessionState::Disconnected => return Err(H3Error::Closed),
            _ => {}
        }
        self.transition(SessionState::RequestInFlight);

        let (reply, issued) = oneshot::channel();
        if let Err(e) = self.controller.send(DriverCommand::Request { request, reply }) {
            self.transition(SessionState::Failed);
            return Err(e);
        }

        let mut stream_id = None;
        let outcome = tokio::time::timeout(timeout, await_response(issued, &mut stream_id)).await;
        match outcome {
            Ok(Ok(events)) => {
                self.transition(SessionState::Completed);
                Ok(finalize(ResponseAccumulator::from_events(events)))
            }
            Ok(Err(e)) => {
                self.transition(if e.is_fatal() {
                    SessionState::Failed
                } else {
                    SessionState::Connected
                });
                Err(e)
            }
            Err(_) => {
                warn!("Timeout waiting for response after {:?}", timeout);
                if let Some(stream_id) = stream_id {
                    let _ = self.controller.send(DriverCommand::Abandon(stream_id));
                }
                self.transition(SessionState::TimedOut);
                Ok(Response::timed_out())
            }
        }
    }

    /// Close the connection gracefully and wait for the driver to stop.
    pub async fn close(mut self) {
        if self.controller.send(DriverCommand::Close).is_err() {
            debug!("driver already gone");
        } else if tokio::time::timeout(CLOSE_GRACE, self.controller.closed())
            .await
            .is_err()
        {
            warn!(
                "connection to {} still closing after {:?}",
                self.authority, CLOSE_GRACE
            );
        }
        self.transition(SessionState::Disconnected);
    }
}

async fn await_response(
    issued: oneshot::Receiver<H3Result<CompletionHandle>>,
    stream_id: &mut Option<StreamId>,
) -> Completion {
    let handle = issued.await.map_err(|_| H3Error::Closed)??;
    *stream_id = Some(handle.stream_id());
    handle.await
}

/// Connect, issue one request, wait for it, and close.
///
/// The configured timeout covers the handshake and the request together.
pub async fn send_request(
    url: &str,
    method: &str,
    body: Option<Bytes>,
    headers: Vec<(String, String)>,
    config: ClientConfig,
) -> H3Result<Response> {
    let timeout = config.timeout();
    let deadline = Instant::now() + timeout;
    let mut client = match tokio::time::timeout_at(deadline, H3Client::connect(url, config)).await
    {
        Ok(Ok(client)) => client,
        // the handshake timer runs on the same budget
        Ok(Err(H3Error::Connection(reason))) if Instant::now() >= deadline => {
            warn!("Timeout waiting for connection to {}: {}", url, reason);
            return Ok(Response::timed_out());
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            warn!("Timeout waiting for connection to {} after {:?}", url, timeout);
            return Ok(Response::timed_out());
        }
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    let result = client.request(url, method, headers, body, remaining).await;
    client.close().await;
    result
}

pub async fn get(url: &str, config: ClientConfig) -> H3Result<Response> {
    send_request(url, "GET", None, Vec::new(), config).await
}

/// POST a form-encoded body.
pub async fn post(url: &str, body: Bytes, config: ClientConfig) -> H3Result<Response> {
    let headers = form_headers(body.len());
    send_request(url, "POST", Some(body), headers, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::H3Event;
    use crate::testing::spawn_loopback;
    use tokio::sync::mpsc;

    fn ok_response(stream_id: u64, _request: &Request) -> Vec<H3Event> {
        vec![
            H3Event::headers(stream_id, &[(":status", "200"), ("content-type", "text/plain")], false),
            H3Event::data(stream_id, b"hello ", false),
            H3Event::data(stream_id, b"world", false),
            H3Event::data(stream_id, b"", true),
        ]
    }

    #[test]
    fn target_parsing() {
        let target = Target::parse("https://example.com/a/b?c=d", 443).unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 443);
        assert_eq!(target.authority, "example.com");
        assert_eq!(target.path, "/a/b?c=d");

        let target = Target::parse("https://[::1]:8443", 443).unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.authority, "[::1]");
        assert_eq!(target.port, 8443);
        assert_eq!(target.path, "/");

        assert!(matches!(
            Target::parse("ftp://example.com/", 443),
            Err(H3Error::InvalidUrl(_))
        ));
        assert!(matches!(Target::parse("not a url", 443), Err(H3Error::InvalidUrl(_))));
    }

    #[test]
    fn http_urls_are_fetched_over_h3() {
        let target = Target::parse("http://example.com/page", 443).unwrap();
        assert_eq!(target.port, 443);
        assert_eq!(target.path, "/page");

        let request = Request::new("GET", target.path, target.authority.as_str());
        assert!(
            request
                .header_list()
                .contains(&(Bytes::from_static(b":scheme"), Bytes::from_static(b"https")))
        );
    }

    #[test]
    fn written_default_ports_are_kept() {
        let target = Target::parse("https://example.com:443/", 8443).unwrap();
        assert_eq!(target.port, 443);
        let target = Target::parse("https://user@[::1]:443/", 8443).unwrap();
        assert_eq!(target.port, 443);
        let target = Target::parse("http://example.com:80", 8443).unwrap();
        assert_eq!(target.port, 80);

        let target = Target::parse("https://example.com/", 8443).unwrap();
        assert_eq!(target.port, 8443);
        let target = Target::parse("https://[::1]/", 8443).unwrap();
        assert_eq!(target.port, 8443);
    }

    #[tokio::test]
    async fn get_assembles_the_response() {
        let (controller, _pending) = spawn_loopback(ok_response);
        let mut client = H3Client::with_controller(controller, "example.com", ClientConfig::default());

        let response = client.get("https://example.com/").await.unwrap();
        assert_eq!(client.state(), SessionState::Completed);
        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), b"hello world");
        assert_eq!(response.headers().len(), 1);
        assert!(!response.is_timed_out());
    }

    #[tokio::test]
    async fn post_sends_form_headers() {
        let (controller, _pending) = spawn_loopback(|stream_id, request| {
            assert_eq!(request.method, "POST");
            assert_eq!(request.body.as_deref(), Some(&b"x=1"[..]));
            assert!(request.headers.contains(&("content-length".into(), "3".into())));
            vec![H3Event::headers(stream_id, &[(":status", "201")], true)]
        });
        let mut client = H3Client::with_controller(controller, "example.com", ClientConfig::default());
        let response = client
            .post("/submit", Bytes::from_static(b"x=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        assert!(response.body().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_empty_response_and_cleans_up() {
        let (controller, mut pending) = spawn_loopback(|stream_id, _| {
            vec![H3Event::headers(stream_id, &[(":status", "200")], false)]
        });
        let mut client = H3Client::with_controller(controller, "example.com", ClientConfig::default());

        let response = client
            .request("/slow", "GET", Vec::new(), None, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(response.is_timed_out());
        assert!(response.body().is_empty());
        assert!(response.headers().is_empty());
        assert_eq!(client.state(), SessionState::TimedOut);

        pending.wait_for(|n| *n == 0).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn session_is_reusable_after_timeout() {
        let mut first = true;
        let (controller, _pending) = spawn_loopback(move |stream_id, request| {
            if std::mem::take(&mut first) {
                Vec::new()
            } else {
                ok_response(stream_id, request)
            }
        });
        let mut client = H3Client::with_controller(controller, "example.com", ClientConfig::default());

        let timed_out = client
            .request("/", "GET", Vec::new(), None, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(timed_out.is_timed_out());

        let response = client.get("/").await.unwrap();
        assert_eq!(response.body().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn reset_surfaces_without_failing_the_session() {
        let (controller, _pending) = spawn_loopback(|stream_id, _| {
            vec![H3Event::StreamReset {
                stream_id,
                code: 0x10c,
            }]
        });
        let mut client = H3Client::with_controller(controller, "example.com", ClientConfig::default());
        assert!(matches!(
            client.get("/").await,
            Err(H3Error::StreamReset { code: 0x10c, .. })
        ));
        assert_eq!(client.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn lost_driver_fails_the_session() {
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let mut client = H3Client::with_controller(
            ClientController::new(sender),
            "example.com",
            ClientConfig::default(),
        );
        assert!(matches!(client.get("/").await, Err(H3Error::Closed)));
        assert_eq!(client.state(), SessionState::Failed);
        assert!(matches!(client.get("/").await, Err(H3Error::Closed)));
    }

    #[tokio::test]
    async fn driver_closing_mid_request_is_reported() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            // take the request, then go away without answering
            let _ = receiver.recv().await;
        });
        let mut client = H3Client::with_controller(
            ClientController::new(sender),
            "example.com",
            ClientConfig::default(),
        );
        assert!(matches!(client.get("/").await, Err(H3Error::Closed)));
        assert_eq!(client.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn close_waits_for_the_driver_to_stop() {
        let (controller, pending) = spawn_loopback(ok_response);
        let mut client = H3Client::with_controller(controller, "example.com", ClientConfig::default());
        client.get("/").await.unwrap();

        client.close().await;
        // the loopback task has exited and dropped its side
        assert!(pending.has_changed().is_err());
    }

    #[tokio::test]
    async fn silent_peer_times_out_within_the_request_timeout() {
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let config = ClientConfig::builder()
            .timeout(Duration::from_millis(300))
            .build();

        let started = std::time::Instant::now();
        let response = get(&format!("https://127.0.0.1:{port}/"), config)
            .await
            .unwrap();
        assert!(response.is_timed_out());
        assert!(response.body().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
