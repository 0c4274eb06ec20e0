//! Compose file configuration types

use crate::error::{Result, SigilError};
use crate::probe::ReadinessProtocol;
use crate::service::{PortMapping, ServiceSpec, VolumeMount};
use crate::workflow::WorkflowStep;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Compose file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Project name
    #[serde(default)]
    pub name: Option<String>,
    /// Engine settings
    #[serde(default)]
    pub settings: Settings,
    /// Services, in file order
    #[serde(
        default,
        deserialize_with = "ordered::deserialize",
        serialize_with = "ordered::serialize"
    )]
    pub services: Vec<(String, ServiceConfig)>,
    /// Named workflows
    #[serde(default)]
    pub workflows: BTreeMap<String, Vec<WorkflowStep>>,
}

impl ComposeFile {
    /// Look up a service by name
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, service)| service)
    }

    /// Look up a workflow; a `workflow_` prefix is accepted
    pub fn workflow(&self, name: &str) -> Result<&[WorkflowStep]> {
        let key = name.strip_prefix("workflow_").unwrap_or(name);
        self.workflows
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| SigilError::UnknownWorkflow(name.to_string()))
    }
}

/// Runtime used to launch services
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Local child processes
    #[default]
    Process,
    /// Containers through the docker CLI
    Docker,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Process => write!(f, "process"),
            RuntimeKind::Docker => write!(f, "docker"),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Runtime used to launch services
    pub runtime: RuntimeKind,
    /// Docker binary, for the docker runtime
    pub docker_binary: String,
    /// Deadline for each readiness wait
    #[serde(with = "duration")]
    pub readiness_timeout: Duration,
    /// Delay between readiness attempts
    #[serde(with = "duration")]
    pub probe_interval: Duration,
    /// Grace period for services that declare none
    #[serde(with = "duration")]
    pub stop_grace_period: Duration,
    /// Directory for volumes and logs
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Process,
            docker_binary: "docker".to_string(),
            readiness_timeout: Duration::from_secs(60),
            probe_interval: crate::probe::DEFAULT_PROBE_INTERVAL,
            stop_grace_period: crate::service::spec::DEFAULT_STOP_GRACE_PERIOD,
            data_dir: None,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandConfig>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentConfig>,
    /// Exposed ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortConfig>,
    /// Volume mounts, `name:/path[:ro]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Service dependencies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOnConfig>,
    /// Readiness check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessConfig>,
    /// Stop grace period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_period: Option<String>,
}

impl ServiceConfig {
    /// Names of the services this one depends on
    pub fn dependencies(&self) -> Vec<String> {
        match &self.depends_on {
            Some(DependsOnConfig::Array(arr)) => arr.clone(),
            Some(DependsOnConfig::Map(map)) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Build the service declaration
    pub fn to_spec(&self, name: &str, settings: &Settings) -> Result<ServiceSpec> {
        let mut spec = ServiceSpec::new(name).stop_grace_period(settings.stop_grace_period);

        if let Some(image) = &self.image {
            spec = spec.image(image);
        }

        match &self.command {
            Some(CommandConfig::Shell(cmd)) => spec = spec.command(["/bin/sh", "-c", cmd.as_str()]),
            Some(CommandConfig::Exec(args)) => spec = spec.command(args),
            None => {}
        }

        match &self.environment {
            Some(EnvironmentConfig::Array(arr)) => {
                for item in arr {
                    match item.split_once('=') {
                        Some((key, value)) => spec = spec.env(key, value),
                        None => {
                            if let Ok(value) = std::env::var(item) {
                                spec = spec.env(item, &value);
                            }
                        }
                    }
                }
            }
            Some(EnvironmentConfig::Map(map)) => {
                for (key, value) in map {
                    match value {
                        Some(value) => spec = spec.env(key, &value.to_string()),
                        None => {
                            if let Ok(value) = std::env::var(key) {
                                spec = spec.env(key, &value);
                            }
                        }
                    }
                }
            }
            None => {}
        }

        for port in &self.ports {
            let mapping = port.to_mapping().ok_or_else(|| {
                SigilError::ComposeParse(format!(
                    "Service '{}' has invalid port '{}'",
                    name, port
                ))
            })?;
            spec.ports.push(mapping);
        }

        for volume in &self.volumes {
            let mount = VolumeMount::parse(volume).ok_or_else(|| {
                SigilError::ComposeParse(format!(
                    "Service '{}' has invalid volume '{}'",
                    name, volume
                ))
            })?;
            spec.volumes.push(mount);
        }

        for dep in self.dependencies() {
            spec = spec.depends_on(&dep);
        }

        if let Some(readiness) = &self.readiness {
            spec = spec.readiness(readiness.to_protocol(name)?);
        }

        if let Some(grace) = &self.stop_grace_period {
            spec = spec.stop_grace_period(parse_duration(grace)?);
        }

        Ok(spec)
    }
}

/// Command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandConfig {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    /// Array of KEY=value strings
    Array(Vec<String>),
    /// Map of key to value; a missing value is taken from the process environment
    Map(BTreeMap<String, Option<EnvValue>>),
}

/// Environment value as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Number(serde_yaml::Number),
    Bool(bool),
}

impl std::fmt::Display for EnvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvValue::String(s) => write!(f, "{}", s),
            EnvValue::Number(n) => write!(f, "{}", n),
            EnvValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortConfig {
    /// Bare port number
    Number(u16),
    /// Short syntax: "8080:80/tcp"
    Short(String),
}

impl PortConfig {
    fn to_mapping(&self) -> Option<PortMapping> {
        match self {
            PortConfig::Number(port) => PortMapping::parse(&port.to_string()),
            PortConfig::Short(s) => PortMapping::parse(s),
        }
    }
}

impl std::fmt::Display for PortConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortConfig::Number(port) => write!(f, "{}", port),
            PortConfig::Short(s) => write!(f, "{}", s),
        }
    }
}

/// Depends on configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOnConfig {
    /// Array of service names
    Array(Vec<String>),
    /// Map of service to condition
    Map(BTreeMap<String, DependsOnCondition>),
}

/// Depends on condition; only ordering is honored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependsOnCondition {
    /// Condition to wait for
    #[serde(default)]
    pub condition: Option<String>,
}

/// Readiness configuration, exactly one of `tcp` or `http`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// `host:port` that must accept a connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    /// URL that must answer a GET
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    /// Expected HTTP status, default 200
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ReadinessConfig {
    /// Convert to a readiness protocol
    pub fn to_protocol(&self, service: &str) -> Result<ReadinessProtocol> {
        match (&self.tcp, &self.http) {
            (Some(address), None) if self.status.is_none() => Ok(ReadinessProtocol::Tcp {
                address: address.clone(),
            }),
            (None, Some(url)) => Ok(ReadinessProtocol::Http {
                url: url.clone(),
                status: self.status.unwrap_or(200),
            }),
            (Some(_), None) => Err(SigilError::ComposeParse(format!(
                "Service '{}' readiness 'status' requires 'http'",
                service
            ))),
            _ => Err(SigilError::ComposeParse(format!(
                "Service '{}' readiness must specify exactly one of 'tcp' or 'http'",
                service
            ))),
        }
    }
}

/// Parse a duration such as `500ms`, `30s`, `2m` or `1h`; a bare number is seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || SigilError::InvalidConfig(format!("Invalid duration: '{}'", s));

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Format a duration the way `parse_duration` reads it
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}

mod duration {
    use super::{format_duration, parse_duration, EnvValue};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = EnvValue::deserialize(deserializer)?;
        parse_duration(&value.to_string()).map_err(serde::de::Error::custom)
    }
}

mod ordered {
    use super::*;

    pub fn serialize<S: Serializer>(
        services: &[(String, ServiceConfig)],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(services.len()))?;
        for (name, service) in services {
            map.serialize_entry(name, service)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<(String, ServiceConfig)>, D::Error> {
        use serde::de::Error;

        let mapping = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();
        let mut services = Vec::with_capacity(mapping.len());
        let mut seen = HashSet::new();

        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| D::Error::custom("service names must be strings"))?
                .to_string();
            if !seen.insert(name.clone()) {
                return Err(D::Error::custom(format!("duplicate service '{}'", name)));
            }

            let service = if value.is_null() {
                ServiceConfig::default()
            } else {
                serde_yaml::from_value(value)
                    .map_err(|e| D::Error::custom(format!("service '{}': {}", name, e)))?
            };
            services.push((name, service));
        }

        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        assert!(parse_duration("10000000000000000h").is_err());
        assert!(parse_duration("18446744073709551615m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s").unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(60)), "60s");
    }

    #[test]
    fn test_services_keep_file_order() {
        let yaml = r#"
services:
  zeta: { command: [sleep, "30"] }
  alpha: { command: [sleep, "30"] }
  mid:
"#;

        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<&str> = file.services.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert!(file.service("mid").is_some());
    }

    #[test]
    fn test_settings() {
        let yaml = r#"
settings:
  runtime: docker
  readiness_timeout: 2m
  probe_interval: 250ms
"#;

        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.settings.runtime, RuntimeKind::Docker);
        assert_eq!(file.settings.readiness_timeout, Duration::from_secs(120));
        assert_eq!(file.settings.probe_interval, Duration::from_millis(250));
        assert_eq!(file.settings.docker_binary, "docker");

        let defaults: ComposeFile = serde_yaml::from_str("services: {}").unwrap();
        assert_eq!(defaults.settings.runtime, RuntimeKind::Process);
        assert_eq!(defaults.settings.readiness_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_to_spec() {
        let yaml = r#"
image: grafana/loki:2.4.1
command: "loki -config.file=/etc/loki.yaml"
environment:
  LOG_LEVEL: debug
  RETRIES: 3
ports: [3100, "9096:9095"]
volumes: ["logdata:/loki"]
depends_on: [minio]
stop_grace_period: 2s
"#;

        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        let spec = config.to_spec("log", &Settings::default()).unwrap();

        assert_eq!(spec.image.as_deref(), Some("grafana/loki:2.4.1"));
        assert_eq!(
            spec.command,
            vec!["/bin/sh", "-c", "loki -config.file=/etc/loki.yaml"]
        );
        assert_eq!(spec.environment.get("RETRIES").map(String::as_str), Some("3"));
        assert_eq!(spec.ports.len(), 2);
        assert_eq!(spec.ports[0].host_port, 3100);
        assert_eq!(spec.ports[1].host_port, 9096);
        assert_eq!(spec.volumes[0].source, "logdata");
        assert_eq!(spec.depends_on, vec!["minio"]);
        assert_eq!(spec.stop_grace_period, Duration::from_secs(2));
        assert_eq!(
            spec.effective_readiness(),
            Some(ReadinessProtocol::Tcp {
                address: "127.0.0.1:3100".to_string()
            })
        );
    }

    #[test]
    fn test_readiness_config() {
        let http: ReadinessConfig = serde_yaml::from_str("http: http://localhost:3100/ready").unwrap();
        assert_eq!(
            http.to_protocol("log").unwrap(),
            ReadinessProtocol::Http {
                url: "http://localhost:3100/ready".to_string(),
                status: 200
            }
        );

        let both: ReadinessConfig =
            serde_yaml::from_str("{ tcp: \"127.0.0.1:1\", http: \"http://x\" }").unwrap();
        assert!(both.to_protocol("log").is_err());

        let neither = ReadinessConfig::default();
        assert!(neither.to_protocol("log").is_err());
    }

    #[test]
    fn test_invalid_port() {
        let config: ServiceConfig = serde_yaml::from_str("ports: [\"web\"]").unwrap();
        assert!(matches!(
            config.to_spec("log", &Settings::default()),
            Err(SigilError::ComposeParse(_))
        ));
    }

    #[test]
    fn test_workflow_lookup() {
        let yaml = r#"
workflows:
  default:
    - up: db
"#;

        let file: ComposeFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.workflow("default").unwrap().len(), 1);
        assert_eq!(file.workflow("workflow_default").unwrap().len(), 1);
        assert!(matches!(
            file.workflow("nightly"),
            Err(SigilError::UnknownWorkflow(_))
        ));
    }
}
