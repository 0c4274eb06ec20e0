//! Compose file parser

use super::config::{ComposeFile, RuntimeKind};
use crate::error::{Result, SigilError};
use crate::service::ServiceRegistry;
use regex::Regex;
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default compose file names
pub const DEFAULT_COMPOSE_FILES: &[&str] = &["sigil.yaml", "sigil.yml", "compose.yaml", "compose.yml"];

/// Compose file parser
pub struct ComposeParser;

impl ComposeParser {
    /// Find compose file in directory
    pub fn find_compose_file(dir: &Path) -> Option<PathBuf> {
        for name in DEFAULT_COMPOSE_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Parse compose file from path
    pub fn parse_file(path: &Path) -> Result<ComposeFile> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SigilError::ComposeParse(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_str(&content)
    }

    /// Parse compose file from string, interpolating the process environment
    pub fn parse_str(content: &str) -> Result<ComposeFile> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::parse_str_with_env(content, &env)
    }

    /// Parse compose file from string, interpolating `env`
    pub fn parse_str_with_env(content: &str, env: &HashMap<String, String>) -> Result<ComposeFile> {
        let mut value: Value = serde_yaml::from_str(content)
            .map_err(|e| SigilError::ComposeParse(format!("Failed to parse YAML: {}", e)))?;

        let pattern = interpolation_pattern()?;
        interpolate(&mut value, &pattern, env);

        serde_yaml::from_value(value)
            .map_err(|e| SigilError::ComposeParse(format!("Invalid compose file: {}", e)))
    }

    /// Validate compose configuration, returning warnings
    pub fn validate(config: &ComposeFile) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if config.services.is_empty() {
            warnings.push("No services defined".to_string());
        }

        for (name, service) in &config.services {
            let has_command = match &service.command {
                Some(super::config::CommandConfig::Shell(cmd)) => !cmd.trim().is_empty(),
                Some(super::config::CommandConfig::Exec(args)) => !args.is_empty(),
                None => false,
            };

            match config.settings.runtime {
                RuntimeKind::Process => {
                    if !has_command {
                        return Err(SigilError::ComposeParse(format!(
                            "Service '{}' must specify 'command' for the process runtime",
                            name
                        )));
                    }
                    if service.image.is_some() {
                        warnings.push(format!(
                            "Service '{}' image is ignored by the process runtime",
                            name
                        ));
                    }
                }
                RuntimeKind::Docker => {
                    if service.image.is_none() {
                        return Err(SigilError::ComposeParse(format!(
                            "Service '{}' must specify 'image' for the docker runtime",
                            name
                        )));
                    }
                }
            }

            for dep in service.dependencies() {
                if config.service(&dep).is_none() {
                    return Err(SigilError::ComposeParse(format!(
                        "Service '{}' depends on unknown service '{}'",
                        name, dep
                    )));
                }
            }
        }

        let registry = Self::build_registry(config)?;
        registry.start_order(registry.names())?;

        if config.workflows.is_empty() {
            warnings.push("No workflows defined".to_string());
        }

        for (workflow, steps) in &config.workflows {
            if steps.is_empty() {
                warnings.push(format!("Workflow '{}' has no steps", workflow));
            }

            for (index, step) in steps.iter().enumerate() {
                for service in step.services() {
                    if !registry.contains(service) {
                        return Err(SigilError::ComposeParse(format!(
                            "Workflow '{}' step {} ({}) references unknown service '{}'",
                            workflow,
                            index + 1,
                            step,
                            service
                        )));
                    }
                }
            }
        }

        Ok(warnings)
    }

    /// Build the service registry, in file order
    pub fn build_registry(config: &ComposeFile) -> Result<ServiceRegistry> {
        let specs = config
            .services
            .iter()
            .map(|(name, service)| service.to_spec(name, &config.settings))
            .collect::<Result<Vec<_>>>()?;

        ServiceRegistry::from_specs(specs)
    }

    /// Project name: the file's `name`, else its directory name
    pub fn project_name(config: &ComposeFile, path: &Path) -> String {
        if let Some(name) = &config.name {
            return name.clone();
        }

        path.canonicalize()
            .ok()
            .and_then(|p| p.parent().and_then(|d| d.file_name()).map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "default".to_string())
    }
}

fn interpolation_pattern() -> Result<Regex> {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| SigilError::ComposeParse(format!("Invalid interpolation pattern: {}", e)))
}

/// Interpolate environment variables in every string of a YAML tree
fn interpolate(value: &mut Value, pattern: &Regex, env: &HashMap<String, String>) {
    match value {
        Value::String(s) => *s = interpolate_string(s, pattern, env),
        Value::Sequence(seq) => {
            for item in seq {
                interpolate(item, pattern, env);
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate(item, pattern, env);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Replace `${VAR}` and `${VAR:-default}`; an unset variable without default is empty
fn interpolate_string(s: &str, pattern: &Regex, env: &HashMap<String, String>) -> String {
    pattern
        .replace_all(s, |caps: &regex::Captures| {
            let var = &caps[1];
            match (env.get(var), caps.get(2)) {
                (Some(value), Some(_)) if value.is_empty() => caps[2].to_string(),
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => {
                    tracing::warn!("Variable {} is not set, substituting an empty string", var);
                    String::new()
                }
            }
        })
        .to_string()
}
