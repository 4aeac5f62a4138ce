//! Configuration types for the HTTP/3 client.

use std::time::Duration;
use tokio_quiche::settings::QuicSettings;

pub const DEFAULT_PORT: u16 = 443;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// ALPN identifier for RFC 9114 HTTP/3.
pub const H3_ALPN: &[u8] = b"h3";
/// ALPN identifier for draft-29 HTTP/3, still advertised by some servers.
pub const H3_29_ALPN: &[u8] = b"h3-29";

/// How the peer certificate is checked during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Accept any certificate.
    #[default]
    None,
    /// Verify the peer certificate chain and hostname.
    Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

/// Immutable transport settings used to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    alpn: Vec<Vec<u8>>,
    verify_mode: VerifyMode,
    role: Role,
    keylog_file: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::builder().build()
    }
}

impl TransportConfig {
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    pub fn alpn(&self) -> &[Vec<u8>] {
        &self.alpn
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn keylog_file(&self) -> Option<&str> {
        self.keylog_file.as_deref()
    }

    /// Maps this configuration onto tokio-quiche connection settings.
    pub fn to_quic_settings(&self) -> QuicSettings {
        let mut settings = QuicSettings::default();
        settings.alpn = self.alpn.clone();
        settings.verify_peer = self.verify_mode == VerifyMode::Peer;
        settings.keylog_file = self.keylog_file.clone();
        settings
    }
}

#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    alpn: Vec<Vec<u8>>,
    verify_mode: VerifyMode,
    role: Role,
    keylog_file: Option<String>,
}

impl TransportConfigBuilder {
    /// Append an ALPN identifier. Order is preference order.
    pub fn alpn(mut self, proto: &[u8]) -> Self {
        if !self.alpn.iter().any(|p| p == proto) {
            self.alpn.push(proto.to_vec());
        }
        self
    }

    pub fn verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Write TLS secrets to this file in NSS key log format.
    pub fn keylog_file(mut self, path: impl Into<String>) -> Self {
        self.keylog_file = Some(path.into());
        self
    }

    /// Build the configuration. An empty ALPN list falls back to `h3`.
    pub fn build(self) -> TransportConfig {
        let alpn = if self.alpn.is_empty() {
            vec![H3_ALPN.to_vec()]
        } else {
            self.alpn
        };
        TransportConfig {
            alpn,
            verify_mode: self.verify_mode,
            role: self.role,
            keylog_file: self.keylog_file,
        }
    }
}

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    transport: TransportConfig,
    timeout: Duration,
    default_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            default_port: DEFAULT_PORT,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    /// How long a request waits for its response before giving up.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Port used when the URL does not carry one.
    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Transport settings with the handshake bounded by the request timeout.
    pub fn to_quic_settings(&self) -> QuicSettings {
        let mut settings = self.transport.to_quic_settings();
        settings.handshake_timeout = Some(self.timeout);
        settings
    }
}

#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn default_port(mut self, port: u16) -> Self {
        self.config.default_port = port;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
