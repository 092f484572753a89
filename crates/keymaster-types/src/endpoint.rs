//! Peer endpoint (`host:port`).

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote side of a peer: a hostname or IP literal plus a UDP port.
///
/// IPv6 literals must be bracketed (`[fd00::1]:51820`). Hostnames are kept
/// verbatim; resolution is left to the host tooling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ParseError> {
        let host = host.into();
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare.is_empty() || bare.chars().any(char::is_whitespace) {
            return Err(ParseError::InvalidEndpoint(format!("{}:{}", host, port)));
        }
        Ok(Self {
            host: bare.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ParseError::InvalidEndpoint(s.to_string());

        let (host, port_str) = if let Some(rest) = s.strip_prefix('[') {
            rest.split_once("]:").ok_or_else(invalid)?
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
            // an unbracketed IPv6 literal is ambiguous
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        let port: u16 = port_str.parse().map_err(|_| invalid())?;
        Endpoint::new(host, port).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
