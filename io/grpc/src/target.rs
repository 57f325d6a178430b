//! Target address parsing: `[scheme://]host[:port]`.

use crate::Status;
use std::fmt;

/// A parsed channel target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
    secure: bool,
}

impl Target {
    /// Parse `target`.
    ///
    /// `http://` forces cleartext and `https://` forces TLS. Without a
    /// scheme, `secure_default` decides. Missing ports default to 80 or 443.
    /// IPv6 literals with a port must be bracketed (`[::1]:50051`).
    pub fn parse(target: &str, secure_default: bool) -> Result<Self, Status> {
        let target = target.trim();
        let (secure, rest) = match target.split_once("://") {
            Some(("http", rest)) => (false, rest),
            Some(("https", rest)) => (true, rest),
            Some((scheme, _)) => {
                return Err(Status::invalid_argument(format!(
                    "unsupported scheme '{scheme}' in target '{target}'"
                )));
            }
            None => (secure_default, target),
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let (host, port) = split_host_port(rest)
            .ok_or_else(|| Status::invalid_argument(format!("invalid target '{target}'")))?;
        if host.is_empty() {
            return Err(Status::invalid_argument(format!(
                "missing host in target '{target}'"
            )));
        }

        let port = match port {
            Some(port) => port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
                Status::invalid_argument(format!("invalid port '{port}' in target '{target}'"))
            })?,
            None if secure => 443,
            None => 80,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            secure,
        })
    }

    /// Host name or address, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.authority())
    }
}

fn split_host_port(s: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            _ => Some((host, Some(after.strip_prefix(':')?))),
        };
    }
    match s.matches(':').count() {
        0 => Some((s, None)),
        1 => s.split_once(':').map(|(h, p)| (h, Some(p))),
        // Bare IPv6 literal.
        _ => Some((s, None)),
    }
}
