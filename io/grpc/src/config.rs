//! Channel configuration loaded from TOML.
//!
//! ```toml
//! target = "https://api.example.com"
//! user_agent_prefix = "inventory-sync/2.3"
//!
//! [tls]
//! root_certs = "/etc/ssl/ca.pem"
//!
//! [session]
//! max_iterations = 3000
//! connect_timeout_ms = 2000
//!
//! [args]
//! "grpc.keepalive_time_ms" = 30000
//! ```

use crate::args::{self, ChannelArguments};
use crate::channel::Channel;
use crate::credentials::{ChannelCredentials, SslCredentialsOptions};
use http2::{Session, SessionOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level channel configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// `[scheme://]host[:port]`
    pub target: String,
    pub user_agent_prefix: Option<String>,
    /// TLS material. Presence of this section selects secure credentials.
    pub tls: Option<TlsConfig>,
    pub session: SessionConfig,
    /// Extra channel arguments, integer or string valued.
    pub args: HashMap<String, ArgSetting>,
}

/// Paths to PEM files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    pub root_certs: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub cert_chain: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub max_iterations: usize,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_concurrent_streams: u32,
    pub tcp_nodelay: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionOptions::default())
    }
}

impl From<&SessionOptions> for SessionConfig {
    fn from(options: &SessionOptions) -> Self {
        Self {
            max_iterations: options.max_iterations,
            poll_interval_ms: options.poll_interval.as_millis() as u64,
            connect_timeout_ms: options.connect_timeout.as_millis() as u64,
            max_concurrent_streams: options.max_concurrent_streams,
            tcp_nodelay: options.tcp_nodelay,
        }
    }
}

impl SessionConfig {
    pub fn options(&self) -> SessionOptions {
        SessionOptions {
            max_iterations: self.max_iterations,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_concurrent_streams: self.max_concurrent_streams,
            tcp_nodelay: self.tcp_nodelay,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ArgSetting {
    Int(i64),
    Str(String),
}

impl ChannelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::Invalid("target must be set".to_string()));
        }
        if self.session.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "session.max_iterations must be at least 1".to_string(),
            ));
        }
        if let Some(tls) = &self.tls
            && tls.private_key.is_some() != tls.cert_chain.is_some()
        {
            return Err(ConfigError::Invalid(
                "tls.private_key and tls.cert_chain must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials described by the `[tls]` section, reading any PEM files.
    pub fn credentials(&self) -> Result<ChannelCredentials, ConfigError> {
        let Some(tls) = &self.tls else {
            return Ok(ChannelCredentials::insecure());
        };
        Ok(ChannelCredentials::ssl(SslCredentialsOptions {
            pem_root_certs: read_pem(tls.root_certs.as_deref())?,
            pem_private_key: read_pem(tls.private_key.as_deref())?,
            pem_cert_chain: read_pem(tls.cert_chain.as_deref())?,
        }))
    }

    pub fn arguments(&self) -> ChannelArguments {
        let mut args = ChannelArguments::new();
        for (key, value) in &self.args {
            match value {
                ArgSetting::Int(v) => args.set_int(key.as_str(), *v),
                ArgSetting::Str(v) => args.set_string(key.as_str(), v.as_str()),
            }
        }
        if let Some(prefix) = &self.user_agent_prefix {
            args.set_string(args::PRIMARY_USER_AGENT, prefix.as_str());
        }
        args
    }

    /// Build a channel. Nothing connects until the first call.
    pub fn build(&self) -> Result<Channel, ConfigError> {
        self.validate()?;
        let credentials = self.credentials()?;
        let args = self.arguments();
        let options = args.session_options(self.session.options());
        Ok(Channel::with_driver(
            &self.target,
            credentials,
            args,
            Box::new(Session::new(options)),
        ))
    }
}

impl FromStr for ChannelConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ChannelConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn read_pem(path: Option<&Path>) -> Result<Option<String>, ConfigError> {
    path.map(|path| {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    })
    .transpose()
}
