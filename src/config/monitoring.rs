use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Prometheus scrape endpoint of the controller binary
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub prometheus_enabled: bool,

    /// Address the `/metrics` listener binds to
    #[serde(default = "default_prometheus_bind")]
    pub prometheus_bind: IpAddr,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: false,
            prometheus_bind: default_prometheus_bind(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.prometheus_bind, self.prometheus_port)
    }

    /// Rejects an enabled endpoint on port 0 or on a port below 1024.
    /// A disabled endpoint is never checked, only noted when it was tuned.
    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            if self.prometheus_port != default_prometheus_port() {
                warn!(
                    port = self.prometheus_port,
                    "metrics port configured but monitoring is disabled"
                );
            }
            return Ok(());
        }

        match self.prometheus_port {
            0 => Err(Error::InvalidConfig("monitoring.prometheus_port must be set when enabled".into())),
            p if p < 1024 => Err(Error::InvalidConfig(format!(
                "monitoring.prometheus_port {p} needs root; pick a port >= 1024"
            ))),
            _ => Ok(()),
        }
    }
}

fn default_prometheus_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_prometheus_port() -> u16 {
    9095
}
