//! Service specification

use crate::probe::ReadinessProtocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default time a service is given to exit after SIGTERM
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Immutable declaration of a launchable service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique service name
    pub name: String,
    /// Container image (used by the docker runtime)
    pub image: Option<String>,
    /// Command to run
    pub command: Vec<String>,
    /// Environment variables
    pub environment: HashMap<String, String>,
    /// Exposed ports
    pub ports: Vec<PortMapping>,
    /// Named volume mounts
    pub volumes: Vec<VolumeMount>,
    /// Services that must be started before this one
    pub depends_on: Vec<String>,
    /// Declared readiness check
    pub readiness: Option<ReadinessProtocol>,
    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace_period: Duration,
}

impl ServiceSpec {
    /// Create a new service specification
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            command: Vec::new(),
            environment: HashMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            depends_on: Vec::new(),
            readiness: None,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }

    /// Set image
    pub fn image(mut self, image: &str) -> Self {
        self.image = Some(image.to_string());
        self
    }

    /// Set command to run
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    /// Expose a port (same number on host and in the service)
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(PortMapping {
            host_port: port,
            container_port: port,
            protocol: Protocol::Tcp,
        });
        self
    }

    /// Mount a named volume
    pub fn volume(mut self, source: &str, target: &str) -> Self {
        self.volumes.push(VolumeMount {
            source: source.to_string(),
            target: target.to_string(),
            read_only: false,
        });
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, service: &str) -> Self {
        self.depends_on.push(service.to_string());
        self
    }

    /// Set readiness check
    pub fn readiness(mut self, readiness: ReadinessProtocol) -> Self {
        self.readiness = Some(readiness);
        self
    }

    /// Set stop grace period
    pub fn stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }

    /// Readiness check to use for this service.
    ///
    /// Falls back to a TCP connect on the first exposed TCP port when nothing
    /// is declared. `None` means the service is ready as soon as it runs.
    pub fn effective_readiness(&self) -> Option<ReadinessProtocol> {
        if let Some(ref readiness) = self.readiness {
            return Some(readiness.clone());
        }

        self.ports
            .iter()
            .find(|p| p.protocol == Protocol::Tcp)
            .map(|p| ReadinessProtocol::Tcp {
                address: format!("127.0.0.1:{}", p.host_port),
            })
    }
}

/// Port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Parse `8080`, `8080:80` or `8080:80/udp`
    pub fn parse(s: &str) -> Option<Self> {
        let (ports, protocol) = match s.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some(_) => return None,
            None => (s, Protocol::Tcp),
        };

        let (host_port, container_port) = match ports.split_once(':') {
            Some((host, container)) => (host.parse().ok()?, container.parse().ok()?),
            None => {
                let port = ports.parse().ok()?;
                (port, port)
            }
        };

        Some(Self {
            host_port,
            container_port,
            protocol,
        })
    }
}

/// Network protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Named volume mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Volume name
    pub source: String,
    /// Mount path inside the service
    pub target: String,
    pub read_only: bool,
}

impl VolumeMount {
    /// Parse `name:/path` or `name:/path:ro`
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(3, ':');
        let source = parts.next().filter(|p| !p.is_empty())?;
        let target = parts.next().filter(|p| !p.is_empty())?;
        let read_only = match parts.next() {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(_) => return None,
        };

        Some(Self {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        })
    }
}
