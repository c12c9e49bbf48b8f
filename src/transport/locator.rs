//! Locator resolution.
//!
//! Turns a URL-like target into the protocol family and address to dial:
//!
//! | Locator                      | Family   | Address           | TLS |
//! |------------------------------|----------|-------------------|-----|
//! | `unix:///var/run/x.sock`     | `Local`  | `/var/run/x.sock` | no  |
//! | `http://host/path`           | `Stream` | `host:80`         | no  |
//! | `https://host/path`          | `Stream` | `host:443`        | yes |
//! | `tcp://127.0.0.1:9000/exec`  | `Stream` | `127.0.0.1:9000`  | no  |

use std::fmt;

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::error::{HijackError, Result};

/// Scheme selecting a local-domain-socket transport.
pub const UNIX_SCHEME: &str = "unix";

/// Default port for encrypted schemes.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default port for plain schemes.
pub const DEFAULT_PLAIN_PORT: u16 = 80;

/// Protocol family of a dialed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// TCP.
    Stream,
    /// Unix domain socket.
    Local,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Stream => f.write_str("tcp"),
            Family::Local => f.write_str("unix"),
        }
    }
}

/// A parsed dial target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    scheme: String,
    family: Family,
    address: String,
    server_name: Option<String>,
    authority: Option<String>,
    target: String,
}

impl Locator {
    /// Parse a locator string.
    ///
    /// A string that is not a URL at all is a validation error. A stream
    /// locator without a host cannot be dialed and is a transport error.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| HijackError::Validation(format!("invalid locator {:?}: {}", raw, e)))?;

        let scheme = url.scheme().to_string();
        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let target = if target.is_empty() { "/".to_string() } else { target };

        if scheme == UNIX_SCHEME {
            // The socket path is dialed decoded; the request target stays encoded.
            let path = percent_decode_str(url.path()).decode_utf8().map_err(|e| {
                HijackError::Validation(format!("invalid socket path in {:?}: {}", raw, e))
            })?;
            return Ok(Self {
                scheme,
                family: Family::Local,
                address: path.into_owned(),
                server_name: None,
                authority: None,
                target,
            });
        }

        let host = url.host().ok_or_else(|| {
            HijackError::transport(
                Family::Stream,
                String::new(),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("locator {:?} has no host", raw),
                ),
            )
        })?;

        let tls = is_encrypted_scheme(&scheme);
        let default_port = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PLAIN_PORT };
        let port = url.port().unwrap_or(default_port);

        // Bracketed form for IPv6, bare form for SNI.
        let (host_text, server_name) = match host {
            Host::Domain(domain) => (domain.to_string(), domain.to_string()),
            Host::Ipv4(ip) => (ip.to_string(), ip.to_string()),
            Host::Ipv6(ip) => (format!("[{}]", ip), ip.to_string()),
        };

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host_text, port),
            None => host_text.clone(),
        };

        Ok(Self {
            scheme,
            family: Family::Stream,
            address: format!("{}:{}", host_text, port),
            server_name: Some(server_name),
            authority: Some(authority),
            target,
        })
    }

    /// The locator scheme, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Protocol family to dial.
    pub fn family(&self) -> Family {
        self.family
    }

    /// Address to dial (`host:port` or a socket path).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the connection must be TLS-negotiated.
    pub fn is_tls(&self) -> bool {
        self.family == Family::Stream && is_encrypted_scheme(&self.scheme)
    }

    /// Host name presented for SNI and certificate verification.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Authority as written in the locator, used for the `Host` header.
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Origin-form request target (path and query).
    pub fn request_target(&self) -> &str {
        &self.target
    }
}

/// Whether a scheme denotes an encrypted transport.
pub fn is_encrypted_scheme(scheme: &str) -> bool {
    matches!(scheme, "https" | "tls")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_https_defaults_to_443() {
        let loc = Locator::parse("https://host/path").unwrap();
        assert_eq!(loc.family(), Family::Stream);
        assert_eq!(loc.address(), "host:443");
        assert!(loc.is_tls());
        assert_eq!(loc.server_name(), Some("host"));
        assert_eq!(loc.authority(), Some("host"));
        assert_eq!(loc.request_target(), "/path");
    }

    #[test]
    fn test_http_defaults_to_80() {
        let loc = Locator::parse("http://host/path").unwrap();
        assert_eq!(loc.address(), "host:80");
        assert!(!loc.is_tls());
    }

    #[test]
    fn test_unix_socket_path() {
        let loc = Locator::parse("unix:///var/run/x.sock").unwrap();
        assert_eq!(loc.family(), Family::Local);
        assert_eq!(loc.address(), "/var/run/x.sock");
        assert!(!loc.is_tls());
        assert_eq!(loc.authority(), None);
    }

    #[test]
    fn test_unix_socket_path_is_decoded() {
        let locator = Locator::parse("unix:///tmp/my sock.sock").unwrap();
        assert_eq!(locator.address(), "/tmp/my sock.sock");
        assert_eq!(locator.request_target(), "/tmp/my%20sock.sock");

        let locator = Locator::parse("unix:///run/exec%2Dd.sock").unwrap();
        assert_eq!(locator.address(), "/run/exec-d.sock");
    }

    #[test]
    fn test_undecodable_socket_path_is_validation_error() {
        let err = Locator::parse("unix:///tmp/%FF.sock").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_explicit_port_kept() {
        let loc = Locator::parse("tcp://127.0.0.1:9000/exec").unwrap();
        assert_eq!(loc.family(), Family::Stream);
        assert_eq!(loc.address(), "127.0.0.1:9000");
        assert_eq!(loc.authority(), Some("127.0.0.1:9000"));
        assert_eq!(loc.request_target(), "/exec");
    }

    #[test]
    fn test_unknown_scheme_without_port_is_plain() {
        let loc = Locator::parse("tcp://example.com/exec").unwrap();
        assert_eq!(loc.address(), "example.com:80");
        assert!(!loc.is_tls());
    }

    #[test]
    fn test_tls_scheme_defaults_to_443() {
        let loc = Locator::parse("tls://example.com/exec").unwrap();
        assert_eq!(loc.address(), "example.com:443");
        assert!(loc.is_tls());
    }

    #[test]
    fn test_ipv6_host() {
        let loc = Locator::parse("http://[::1]:8080/x").unwrap();
        assert_eq!(loc.address(), "[::1]:8080");
        assert_eq!(loc.server_name(), Some("::1"));
    }

    #[test]
    fn test_query_is_part_of_target() {
        let loc = Locator::parse("http://h/exec?stdin=1&stdout=1").unwrap();
        assert_eq!(loc.request_target(), "/exec?stdin=1&stdout=1");
    }

    #[test]
    fn test_not_a_url_is_validation_error() {
        let err = Locator::parse("not a locator").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_missing_host_is_transport_error() {
        let err = Locator::parse("tcp:/exec").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
