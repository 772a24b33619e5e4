//! Client configuration
//!
//! `ClientConfig` is read from YAML with kebab-case keys. Every key is
//! optional; durations are given in milliseconds.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::pool::PoolConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Base URL that relative request URIs are resolved against
    #[serde(default)]
    pub base_url: Option<String>,

    /// Capacity of each endpoint partition
    #[serde(default = "default_max_connections_per_host")]
    pub max_connections_per_host: usize,

    /// Idle connections kept per endpoint
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Idle connection lifetime in milliseconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// TCP + TLS + handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Bound on waiting for a pool slot in milliseconds; unbounded when unset
    #[serde(default)]
    pub acquire_timeout: Option<u64>,

    /// Bound on each exchange up to the response head, in milliseconds
    #[serde(default)]
    pub io_timeout: Option<u64>,

    #[serde(default)]
    pub follow_redirects: OnOff,

    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: usize,

    /// Response body size limit in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_connections_per_host() -> usize {
    256
}

fn default_max_idle_per_host() -> usize {
    32
}

fn default_idle_timeout() -> u64 {
    90000
}

fn default_connect_timeout() -> u64 {
    10000
}

fn default_redirect_limit() -> usize {
    20
}

fn default_max_body_size() -> u64 {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("ferry/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_connections_per_host: default_max_connections_per_host(),
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout: default_idle_timeout(),
            connect_timeout: default_connect_timeout(),
            acquire_timeout: None,
            io_timeout: None,
            follow_redirects: OnOff::Off,
            redirect_limit: default_redirect_limit(),
            max_body_size: default_max_body_size(),
            user_agent: default_user_agent(),
        }
    }
}

/// ON/OFF toggle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnOff {
    On,
    #[default]
    Off,
}

impl<'de> Deserialize<'de> for OnOff {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // YAML turns bare `true` and `1` into non-strings
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i64),
            Str(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => return Ok(OnOff::from(b)),
            Raw::Int(i) => i.to_string(),
            Raw::Str(s) => s,
        };
        match s.to_uppercase().as_str() {
            "ON" | "TRUE" | "YES" | "1" => Ok(OnOff::On),
            "OFF" | "FALSE" | "NO" | "0" => Ok(OnOff::Off),
            _ => Err(serde::de::Error::custom(format!("invalid on/off value: {}", s))),
        }
    }
}

impl Serialize for OnOff {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            OnOff::On => serializer.serialize_str("ON"),
            OnOff::Off => serializer.serialize_str("OFF"),
        }
    }
}

impl From<bool> for OnOff {
    fn from(on: bool) -> Self {
        if on {
            OnOff::On
        } else {
            OnOff::Off
        }
    }
}

impl OnOff {
    pub fn is_on(&self) -> bool {
        matches!(self, OnOff::On)
    }
}

impl ClientConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections_per_host == 0 {
            anyhow::bail!("max-connections-per-host must be at least 1");
        }
        if self.connect_timeout == 0 {
            anyhow::bail!("connect-timeout must be positive");
        }
        if let Some(base) = &self.base_url {
            let url = Url::parse(base)
                .map_err(|e| anyhow::anyhow!("invalid base-url {}: {}", base, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("base-url must be http or https: {}", base);
            }
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections_per_host: self.max_connections_per_host,
            max_idle_per_host: self.max_idle_per_host,
            idle_timeout: Duration::from_millis(self.idle_timeout),
            acquire_timeout: self.acquire_timeout.map(Duration::from_millis),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout.map(Duration::from_millis)
    }
}
