//! Minimal HTTP/3 client over quiche.
//!
//! Issues requests on a QUIC connection driven by tokio-quiche and rebuilds
//! each response from the HTTP/3 events delivered for its stream.
//!
//! ```rust,no_run
//! use lib_minih3::{ClientConfig, get};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let response = get("https://cloudflare-quic.com/", ClientConfig::default()).await?;
//!     println!("{} ({} bytes)", response.status(), response.body().len());
//!     Ok(())
//! }
//! ```

pub mod alt_svc;
pub mod assembler;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod issuer;
pub mod lifecycle;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use alt_svc::{AltSvcEndpoint, AltSvcRegistry, parse_alt_svc};
pub use assembler::{Response, ResponseAccumulator, ResponseHeaders, finalize};
pub use client::{H3Client, SessionState, Target, get, post, send_request};
pub use config::{ClientConfig, Role, TransportConfig, VerifyMode};
pub use driver::{ClientController, ClientDriver};
pub use error::{AltSvcError, H3Error, H3Result};
pub use event::{H3Event, StreamId};
pub use issuer::{Request, RequestSink};
pub use lifecycle::{CompletionHandle, PendingRequests};
pub use router::{RouteOutcome, StreamRouter};
