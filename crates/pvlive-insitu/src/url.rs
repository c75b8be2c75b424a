//! Connection URLs.
//!
//! `tcp://<host>:<port>?[listen=true&nonblocking=true&]handshake=paraview.insitu.<version>`

use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

/// Prefix of the handshake token; the build version follows it.
pub const HANDSHAKE_PREFIX: &str = "paraview.insitu.";

const SCHEME: &str = "tcp://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    pub host: String,
    pub port: u16,
    pub listen: bool,
    pub nonblocking: bool,
    /// Full handshake token, e.g. `paraview.insitu.5.12.0`.
    pub handshake: String,
}

impl ConnectionUrl {
    pub fn connect(host: &str, port: u16, version: &str) -> Self {
        ConnectionUrl {
            host: host.to_string(),
            port,
            listen: false,
            nonblocking: false,
            handshake: format!("{HANDSHAKE_PREFIX}{version}"),
        }
    }

    pub fn listen(port: u16, version: &str) -> Self {
        ConnectionUrl {
            host: "localhost".to_string(),
            port,
            listen: true,
            nonblocking: true,
            handshake: format!("{HANDSHAKE_PREFIX}{version}"),
        }
    }

    /// Version embedded in the handshake token.
    pub fn version(&self) -> Option<&str> {
        self.handshake.strip_prefix(HANDSHAKE_PREFIX)
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}:{}?", self.host, self.port)?;
        if self.listen {
            f.write_str("listen=true&")?;
        }
        if self.nonblocking {
            f.write_str("nonblocking=true&")?;
        }
        write!(f, "handshake={}", self.handshake)
    }
}

impl FromStr for ConnectionUrl {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| LinkError::InvalidUrl {
            url: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s.strip_prefix(SCHEME).ok_or_else(|| invalid("scheme must be tcp://"))?;
        let (authority, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse().map_err(|_| invalid("port is not a number"))?;

        let mut url = ConnectionUrl {
            host: host.to_string(),
            port,
            listen: false,
            nonblocking: false,
            handshake: String::new(),
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("query parameter without a value"))?;
            match key {
                "listen" => {
                    url.listen = parse_flag(value).ok_or_else(|| invalid("listen must be a flag"))?
                }
                "nonblocking" => {
                    url.nonblocking =
                        parse_flag(value).ok_or_else(|| invalid("nonblocking must be a flag"))?
                }
                "handshake" => url.handshake = value.to_string(),
                _ => return Err(invalid("unknown query parameter")),
            }
        }
        if url.version().is_none() {
            return Err(invalid("handshake must start with paraview.insitu."));
        }
        Ok(url)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_url_round_trips() {
        let url = ConnectionUrl::listen(22222, "5.12.0");
        let text = url.to_string();
        assert_eq!(
            text,
            "tcp://localhost:22222?listen=true&nonblocking=true&handshake=paraview.insitu.5.12.0"
        );
        assert_eq!(text.parse::<ConnectionUrl>().unwrap(), url);
    }

    #[test]
    fn connect_url_round_trips() {
        let url = ConnectionUrl::connect("node7", 4000, "5.12.0-RC1");
        assert_eq!(url.to_string().parse::<ConnectionUrl>().unwrap(), url);
        assert_eq!(url.version(), Some("5.12.0-RC1"));
    }

    #[test]
    fn malformed_urls_are_rejected() {
        for text in [
            "udp://localhost:1?handshake=paraview.insitu.1",
            "tcp://localhost?handshake=paraview.insitu.1",
            "tcp://localhost:port?handshake=paraview.insitu.1",
            "tcp://localhost:1",
            "tcp://localhost:1?handshake=other",
            "tcp://localhost:1?listen=maybe&handshake=paraview.insitu.1",
            "tcp://localhost:1?color=red&handshake=paraview.insitu.1",
        ] {
            assert!(
                matches!(text.parse::<ConnectionUrl>(), Err(LinkError::InvalidUrl { .. })),
                "{text} should be rejected"
            );
        }
    }
}
