//! Error types for the HTTP/3 client.

use std::io;
use thiserror::Error;
use tokio_quiche::quiche::h3;

/// Result type alias for client operations.
pub type H3Result<T> = Result<T, H3Error>;

#[derive(Debug, Error)]
pub enum H3Error {
    /// Opening the QUIC connection or completing its handshake failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A request was registered on a stream id that already has one pending.
    #[error("stream {0} already has a pending request")]
    DuplicateStream(u64),

    /// The peer aborted the response stream.
    #[error("stream {stream_id} reset by peer with code {code:#x}")]
    StreamReset { stream_id: u64, code: u64 },

    /// The HTTP/3 layer refused to queue a frame.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The connection driver went away before the request resolved.
    #[error("connection closed before the response completed")]
    Closed,

    /// The local UDP socket could not be set up.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<h3::Error> for H3Error {
    fn from(e: h3::Error) -> Self {
        H3Error::Transport(e.to_string())
    }
}

impl H3Error {
    /// Whether the session is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            H3Error::Connection(_) | H3Error::DuplicateStream(_) | H3Error::Closed | H3Error::Io(_)
        )
    }
}

/// Errors raised while reading an `Alt-Svc` alternative.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AltSvcError {
    #[error("alt-authority for {0} is not quoted")]
    MissingQuotes(String),

    #[error("alt-authority {0:?} has no port")]
    MissingPort(String),

    #[error("alt-authority {0:?} has an invalid port")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_is_not_fatal() {
        let reset = H3Error::StreamReset {
            stream_id: 0,
            code: 0x10c,
        };
        assert!(!reset.is_fatal());
        assert!(H3Error::Closed.is_fatal());
        assert!(H3Error::DuplicateStream(4).is_fatal());
    }

    #[test]
    fn h3_errors_become_transport_errors() {
        let err: H3Error = h3::Error::StreamBlocked.into();
        assert!(matches!(err, H3Error::Transport(_)));
    }

    #[test]
    fn socket_errors_are_fatal_io_errors() {
        fn bind() -> H3Result<()> {
            Err::<(), _>(io::Error::from(io::ErrorKind::AddrInUse))?;
            Ok(())
        }
        let err = bind().unwrap_err();
        assert!(matches!(&err, H3Error::Io(e) if e.kind() == io::ErrorKind::AddrInUse));
        assert!(err.is_fatal());
    }
}
