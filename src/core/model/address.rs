// src/core/model/address.rs

//! The `host:port` endpoint type used for public and group addresses.

use crate::core::NomadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `host:port` pair. The host may be a hostname, an IPv4 address, or a
/// bracketed IPv6 address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = NomadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| NomadError::InvalidInput(format!("Invalid address '{s}': expected <host>:<port>")))?;
        let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        if host.is_empty() {
            return Err(NomadError::InvalidInput(format!(
                "Invalid address '{s}': empty host"
            )));
        }
        let port = port.parse::<u16>().map_err(|_| {
            NomadError::InvalidInput(format!("Invalid address '{s}': bad port '{port}'"))
        })?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl TryFrom<String> for Address {
    type Error = NomadError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}
