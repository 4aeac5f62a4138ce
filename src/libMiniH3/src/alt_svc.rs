//! HTTP/3 endpoint discovery from `Alt-Svc` response headers (RFC 7838).

use crate::assembler::ResponseHeaders;
use crate::error::AltSvcError;
use log::{debug, warn};

/// Protocol ids that advertise HTTP/3.
pub const H3_SIGNATURES: &[&str] = &["h3", "h3-29"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AltSvcEndpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

/// Extract the endpoints advertised for `signatures` by one `Alt-Svc` value.
///
/// An empty alt-authority host means `origin_host`. Malformed alternatives
/// are skipped; the rest of the value is still read.
///
/// ```
/// use lib_minih3::alt_svc::{parse_alt_svc, H3_SIGNATURES};
///
/// let found = parse_alt_svc("example.com", r#"h3=":443"; ma=86400, h2=":443""#, H3_SIGNATURES);
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0].host, "example.com");
/// assert_eq!(found[0].port, 443);
/// ```
pub fn parse_alt_svc(origin_host: &str, value: &str, signatures: &[&str]) -> Vec<AltSvcEndpoint> {
    let mut endpoints = Vec::new();
    for alternative in value.split(',') {
        match parse_alternative(origin_host, alternative, signatures) {
            Ok(Some(endpoint)) => endpoints.push(endpoint),
            Ok(None) => {}
            Err(e) => warn!(
                "skipping malformed alt-svc alternative {:?}: {}",
                alternative.trim(),
                e
            ),
        }
    }
    endpoints
}

fn parse_alternative(
    origin_host: &str,
    alternative: &str,
    signatures: &[&str],
) -> Result<Option<AltSvcEndpoint>, AltSvcError> {
    let main = alternative.split(';').next().unwrap_or_default().trim();
    let Some((protocol, authority)) = main.split_once('=') else {
        return Ok(None);
    };
    let protocol = protocol.trim();
    if !signatures.iter().any(|s| s.eq_ignore_ascii_case(protocol)) {
        return Ok(None);
    }

    let authority = authority
        .trim()
        .strip_prefix('"')
        .and_then(|a| a.strip_suffix('"'))
        .ok_or_else(|| AltSvcError::MissingQuotes(protocol.to_string()))?;
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| AltSvcError::MissingPort(authority.to_string()))?;
    let port = port
        .trim()
        .parse::<u16>()
        .map_err(|_| AltSvcError::InvalidPort(authority.to_string()))?;

    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { origin_host } else { host };
    Ok(Some(AltSvcEndpoint {
        protocol: protocol.to_ascii_lowercase(),
        host: host.to_string(),
        port,
    }))
}

/// An endpoint together with where it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub endpoint: AltSvcEndpoint,
    pub source: String,
    pub header: String,
}

/// Discovered HTTP/3 endpoints, de-duplicated on host and port.
#[derive(Debug, Default)]
pub struct AltSvcRegistry {
    discoveries: Vec<Discovery>,
}

impl AltSvcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the HTTP/3 endpoints in one `Alt-Svc` value seen on `origin_host`.
    /// Returns only the endpoints not seen before.
    pub fn observe(&mut self, origin_host: &str, value: &str) -> Vec<AltSvcEndpoint> {
        let mut added = Vec::new();
        for endpoint in parse_alt_svc(origin_host, value, H3_SIGNATURES) {
            if self.contains(&endpoint.host, endpoint.port) {
                continue;
            }
            debug!(
                "discovered {} endpoint {}:{} via {}",
                endpoint.protocol, endpoint.host, endpoint.port, origin_host
            );
            self.discoveries.push(Discovery {
                endpoint: endpoint.clone(),
                source: origin_host.to_string(),
                header: value.to_string(),
            });
            added.push(endpoint);
        }
        added
    }

    /// Scan a response's headers for `alt-svc`.
    pub fn observe_headers(
        &mut self,
        origin_host: &str,
        headers: &ResponseHeaders,
    ) -> Vec<AltSvcEndpoint> {
        let mut added = Vec::new();
        for (name, value) in headers.iter_lossy() {
            if name.trim().eq_ignore_ascii_case("alt-svc") {
                added.extend(self.observe(origin_host, &value));
            }
        }
        added
    }

    pub fn contains(&self, host: &str, port: u16) -> bool {
        self.discoveries
            .iter()
            .any(|d| d.endpoint.host == host && d.endpoint.port == port)
    }

    pub fn discoveries(&self) -> &[Discovery] {
        &self.discoveries
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &AltSvcEndpoint> {
        self.discoveries.iter().map(|d| &d.endpoint)
    }

    pub fn len(&self) -> usize {
        self.discoveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discoveries.is_empty()
    }

    pub fn clear(&mut self) {
        self.discoveries.clear();
    }
}
