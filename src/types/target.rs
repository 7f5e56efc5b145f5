// ABOUTME: Connection target parsed from "[user@]host[:port]" strings.
// ABOUTME: Applies the default port and user when they are omitted.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use thiserror::Error;

/// Port used when the address does not name one.
pub const DEFAULT_PORT: u16 = 22;

/// User used when the address has no `user@` prefix.
pub const DEFAULT_USER: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed address: {0:?}")]
    Malformed(String),

    #[error("malformed address {addr:?}: invalid port")]
    InvalidPort {
        addr: String,
        #[source]
        source: ParseIntError,
    },

    #[error("malformed address {0:?}: port must be between 1 and 65535")]
    PortOutOfRange(String),
}

/// Where to connect and as whom.
///
/// Only constructed through parsing, so a value always carries a non-empty
/// host and user and a port in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    host: String,
    port: u16,
    user: String,
}

impl ConnectionTarget {
    /// Parse `[user@]host[:port]`.
    ///
    /// At most one `@` and at most one `:` are accepted, and every part that
    /// is present must be non-empty.
    pub fn parse(addr: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::Malformed(addr.to_string());

        let (user, rest) = match addr.split('@').collect::<Vec<_>>().as_slice() {
            [rest] => (DEFAULT_USER, *rest),
            [user, rest] => {
                if user.is_empty() || rest.is_empty() {
                    return Err(malformed());
                }
                (*user, *rest)
            }
            _ => return Err(malformed()),
        };

        let (host, port) = match rest.split(':').collect::<Vec<_>>().as_slice() {
            [host] => (*host, DEFAULT_PORT),
            [host, port] => {
                if port.is_empty() {
                    return Err(malformed());
                }
                let port = port.parse::<u16>().map_err(|source| ParseError::InvalidPort {
                    addr: addr.to_string(),
                    source,
                })?;
                if port == 0 {
                    return Err(ParseError::PortOutOfRange(addr.to_string()));
                }
                (*host, port)
            }
            _ => return Err(malformed()),
        };

        if host.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl FromStr for ConnectionTarget {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Parse an address into its `(host, port, user)` parts.
pub fn parse_addr(addr: &str) -> Result<(String, u16, String), ParseError> {
    let target = ConnectionTarget::parse(addr)?;
    Ok((target.host, target.port, target.user))
}
