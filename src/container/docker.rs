//! Docker CLI launcher

use super::runtime::{exit_code, LaunchRequest, Launcher, ProcessHandle};
use crate::error::{Result, SigilError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Label carrying the composition project name
pub const PROJECT_LABEL: &str = "io.sigil.project";
/// Label carrying the service name
pub const SERVICE_LABEL: &str = "io.sigil.service";

/// Runs services as containers through the docker CLI
pub struct DockerLauncher {
    /// docker-compatible binary (`docker`, `podman`)
    binary: String,
    /// Project name written to container labels
    project: String,
}

impl DockerLauncher {
    /// Create a new docker launcher
    pub fn new(binary: &str, project: &str) -> Self {
        Self {
            binary: binary.to_string(),
            project: project.to_string(),
        }
    }

    /// `run` arguments shared by detached and one-off containers
    pub fn run_args(&self, request: &LaunchRequest) -> Result<Vec<String>> {
        let service = &request.service;
        let image = service.image.as_ref().ok_or_else(|| {
            SigilError::InvalidConfig(format!(
                "Service '{}' has no image to run",
                service.name
            ))
        })?;

        let mut args = vec![
            "--label".to_string(),
            format!("{}={}", PROJECT_LABEL, self.project),
            "--label".to_string(),
            format!("{}={}", SERVICE_LABEL, service.name),
        ];

        let mut env: Vec<_> = service.environment.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        for port in &service.ports {
            args.push("-p".to_string());
            args.push(format!(
                "{}:{}/{}",
                port.host_port, port.container_port, port.protocol
            ));
        }

        for mount in &request.mounts {
            args.push("-v".to_string());
            let mut spec = format!("{}:{}", mount.host_path.display(), mount.target);
            if mount.read_only {
                spec.push_str(":ro");
            }
            args.push(spec);
        }

        args.push(image.clone());
        args.extend(request.argv());
        Ok(args)
    }

    async fn docker(&self, args: &[String]) -> Result<String> {
        tracing::debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SigilError::Runtime(format!(
                "{} {} exited with {}: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                exit_code(output.status),
                stderr.trim()
            )));
        }

        Ok(stdout)
    }

    fn container_id(handle: &ProcessHandle) -> Result<&str> {
        handle.container_id().ok_or_else(|| {
            SigilError::Runtime("docker launcher cannot manage a local process".to_string())
        })
    }

    async fn inspect_exit_code(&self, id: &str) -> Result<i32> {
        let out = self
            .docker(&[
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.ExitCode}}".to_string(),
                id.to_string(),
            ])
            .await?;

        out.parse()
            .map_err(|_| SigilError::Runtime(format!("unexpected exit code '{}' for {}", out, id)))
    }
}

#[async_trait]
impl Launcher for DockerLauncher {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        // A container left over from an earlier run would block the name
        match self
            .docker(&["rm".to_string(), "-f".to_string(), request.name.clone()])
            .await
        {
            Ok(_) => {}
            Err(e) if is_missing_container(&e) => {}
            Err(e) => tracing::warn!("Could not remove stale container {}: {}", request.name, e),
        }

        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            request.name.clone(),
        ];
        args.extend(self.run_args(request)?);

        let id = self.docker(&args).await?;
        tracing::debug!("Started container {} ({})", request.name, id);
        Ok(ProcessHandle::Container { id })
    }

    async fn exit_status(&self, handle: &mut ProcessHandle) -> Result<Option<i32>> {
        let id = Self::container_id(handle)?;
        let out = self
            .docker(&[
                "inspect".to_string(),
                "-f".to_string(),
                "{{.State.Running}} {{.State.ExitCode}}".to_string(),
                id.to_string(),
            ])
            .await?;

        parse_state(id, &out)
    }

    async fn terminate(&self, handle: &mut ProcessHandle, grace: Duration) -> Result<i32> {
        let id = Self::container_id(handle)?.to_string();

        self.docker(&[
            "stop".to_string(),
            "-t".to_string(),
            stop_timeout(grace),
            id.clone(),
        ])
        .await?;

        let code = self.inspect_exit_code(&id).await?;
        self.docker(&["rm".to_string(), "-f".to_string(), id]).await?;
        Ok(code)
    }

    async fn run(&self, request: &LaunchRequest) -> Result<i32> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        args.extend(self.run_args(request)?);

        tracing::debug!("{} {}", self.binary, args.join(" "));
        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await?;

        Ok(exit_code(status))
    }
}

/// Parse `{{.State.Running}} {{.State.ExitCode}}`; `None` while running
fn parse_state(id: &str, out: &str) -> Result<Option<i32>> {
    let unexpected =
        || SigilError::Runtime(format!("unexpected inspect output for {}: {}", id, out));

    match out.split_once(' ') {
        Some(("true", _)) => Ok(None),
        Some(("false", code)) => code.trim().parse().map(Some).map_err(|_| unexpected()),
        _ => Err(unexpected()),
    }
}

/// Whole seconds for `docker stop -t`, rounded up so a short grace is not zero
fn stop_timeout(grace: Duration) -> String {
    grace.as_millis().div_ceil(1000).to_string()
}

fn is_missing_container(e: &SigilError) -> bool {
    let message = e.to_string().to_lowercase();
    message.contains("no such container") || message.contains("no container with name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::runtime::ResolvedMount;
    use crate::service::ServiceSpec;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_run_args() {
        let spec = ServiceSpec::new("db")
            .image("materialize/materialized:latest")
            .command(["--workers", "1"])
            .env("MZ_LOG", "info")
            .port(6875);
        let request = LaunchRequest {
            name: "loki-db-1".to_string(),
            service: Arc::new(spec),
            mounts: vec![ResolvedMount {
                source: "mzdata".to_string(),
                target: "/mzdata".to_string(),
                host_path: PathBuf::from("/var/lib/sigil/volumes/mzdata"),
                read_only: false,
            }],
            args: Vec::new(),
        };

        let launcher = DockerLauncher::new("docker", "loki");
        let args = launcher.run_args(&request).unwrap();

        assert!(args.contains(&"io.sigil.project=loki".to_string()));
        assert!(args.contains(&"MZ_LOG=info".to_string()));
        assert!(args.contains(&"6875:6875/tcp".to_string()));
        assert!(args.contains(&"/var/lib/sigil/volumes/mzdata:/mzdata".to_string()));

        let image_pos = args
            .iter()
            .position(|a| a == "materialize/materialized:latest")
            .unwrap();
        assert_eq!(&args[image_pos + 1..], &["--workers", "1"]);
    }

    #[test]
    fn test_run_args_require_image() {
        let request = LaunchRequest {
            name: "loki-driver-1".to_string(),
            service: Arc::new(ServiceSpec::new("driver").command(["testdrive"])),
            mounts: Vec::new(),
            args: Vec::new(),
        };

        let launcher = DockerLauncher::new("docker", "loki");
        assert!(matches!(
            launcher.run_args(&request),
            Err(SigilError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("c1", "true 0").unwrap(), None);
        assert_eq!(parse_state("c1", "false 0").unwrap(), Some(0));
        assert_eq!(parse_state("c1", "false 137").unwrap(), Some(137));
        assert!(parse_state("c1", "false x").is_err());
        assert!(parse_state("c1", "false ").is_err());
        assert!(parse_state("c1", "<no value>").is_err());
    }

    #[test]
    fn test_stop_timeout_rounds_up() {
        assert_eq!(stop_timeout(Duration::ZERO), "0");
        assert_eq!(stop_timeout(Duration::from_millis(500)), "1");
        assert_eq!(stop_timeout(Duration::from_millis(1500)), "2");
        assert_eq!(stop_timeout(Duration::from_secs(10)), "10");
    }

    #[test]
    fn test_missing_container_errors() {
        let missing = SigilError::Runtime(
            "docker rm exited with 1: Error: No such container: loki-db-1".to_string(),
        );
        let podman = SigilError::Runtime(
            "podman rm exited with 1: Error: no container with name or ID \"loki-db-1\" found"
                .to_string(),
        );
        let daemon = SigilError::Runtime(
            "docker rm exited with 1: Cannot connect to the Docker daemon".to_string(),
        );

        assert!(is_missing_container(&missing));
        assert!(is_missing_container(&podman));
        assert!(!is_missing_container(&daemon));
    }

    #[tokio::test]
    async fn test_launch_continues_when_stale_removal_fails() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let calls = temp.path().join("calls");
        let binary = temp.path().join("fake-docker");
        std::fs::write(
            &binary,
            format!(
                "#!/bin/sh\necho \"$@\" >> {}\ncase \"$1\" in\n  rm) echo 'Cannot connect to the Docker daemon' >&2; exit 1 ;;\n  run) echo c0ffee ;;\nesac\n",
                calls.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let request = LaunchRequest {
            name: "loki-db-1".to_string(),
            service: Arc::new(ServiceSpec::new("db").image("materialize/materialized:latest")),
            mounts: Vec::new(),
            args: Vec::new(),
        };

        let launcher = DockerLauncher::new(binary.to_str().unwrap(), "loki");
        let handle = launcher.launch(&request).await.unwrap();
        assert_eq!(handle.container_id(), Some("c0ffee"));

        let log = std::fs::read_to_string(&calls).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines[0], "rm -f loki-db-1");
        assert!(lines[1].starts_with("run -d --name loki-db-1"));
    }
}
