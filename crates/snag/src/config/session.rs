use crate::matcher::ResourceTypeMatch;
use crate::request::PageUrl;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// URL of the page hosting the intercepted calls
    pub page_url: String,

    /// Resource types recorded and eligible for rules. Others pass through.
    #[serde(default)]
    pub resource_types: ResourceTypeMatch,

    /// Pass cross-domain calls through untracked.
    #[serde(default)]
    pub ignore_cross_domain: bool,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl SessionConfig {
    pub fn new(page_url: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            resource_types: ResourceTypeMatch::All,
            ignore_cross_domain: false,
            transport: TransportConfig::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        PageUrl::parse(&self.page_url)?;

        if let ResourceTypeMatch::Only(types) = &self.resource_types {
            if types.is_empty() {
                anyhow::bail!("'resource_types' must name at least one type, or be 'all'");
            }
        }

        if self.transport.connect_timeout_secs == 0 {
            anyhow::bail!("'transport.connect_timeout_secs' must be greater than zero");
        }
        Ok(())
    }

    pub fn page(&self) -> Result<PageUrl, anyhow::Error> {
        Ok(PageUrl::parse(&self.page_url)?)
    }
}

/// Connection pool settings for the HTTP transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    16
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5
}
