//! Instance launchers
//!
//! A [`Launcher`] turns a [`ServiceSpec`] into a running process or container
//! and knows how to observe and terminate it. [`ProcessLauncher`] runs services
//! as local child processes; the docker launcher lives in `docker.rs`.

use crate::error::{Result, SigilError};
use crate::service::ServiceSpec;
use async_trait::async_trait;
use std::fs::File;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

/// A volume mount resolved to its host directory
#[derive(Debug, Clone)]
pub struct ResolvedMount {
    /// Volume name
    pub source: String,
    /// Mount path inside the service
    pub target: String,
    /// Host directory backing the volume
    pub host_path: PathBuf,
    pub read_only: bool,
}

/// Everything a launcher needs to start one instance
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Instance name (`<project>-<service>-1`)
    pub name: String,
    /// Service being launched
    pub service: Arc<ServiceSpec>,
    /// Resolved volume mounts
    pub mounts: Vec<ResolvedMount>,
    /// Extra arguments appended to the service command
    pub args: Vec<String>,
}

impl LaunchRequest {
    /// Service command followed by the extra arguments
    pub fn argv(&self) -> Vec<String> {
        self.service
            .command
            .iter()
            .chain(self.args.iter())
            .cloned()
            .collect()
    }
}

/// Handle to a launched instance
#[derive(Debug)]
pub enum ProcessHandle {
    /// Local child process
    Local(Child),
    /// Detached container
    Container { id: String },
}

impl ProcessHandle {
    /// Process ID, if this is a live local process
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessHandle::Local(child) => child.id(),
            ProcessHandle::Container { .. } => None,
        }
    }

    /// Container ID, if this is a container
    pub fn container_id(&self) -> Option<&str> {
        match self {
            ProcessHandle::Local(_) => None,
            ProcessHandle::Container { id } => Some(id),
        }
    }
}

/// Launches, observes and terminates service instances
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Runtime name, for logs
    fn name(&self) -> &'static str;

    /// Start a detached instance
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle>;

    /// Exit code if the instance has exited on its own, `None` while running
    async fn exit_status(&self, handle: &mut ProcessHandle) -> Result<Option<i32>>;

    /// Stop an instance, escalating to a kill after `grace`. Returns the exit code.
    async fn terminate(&self, handle: &mut ProcessHandle, grace: Duration) -> Result<i32>;

    /// Run a one-off instance to completion and return its exit code
    async fn run(&self, request: &LaunchRequest) -> Result<i32>;
}

/// Convert an exit status to a shell-style exit code
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// Environment variable that exposes a volume directory to a local process
pub fn volume_env_key(volume: &str) -> String {
    let name: String = volume
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SIGIL_VOLUME_{}", name)
}

/// Runs services as local child processes
pub struct ProcessLauncher {
    /// Directory receiving `<instance>.log` output files
    log_dir: PathBuf,
}

impl ProcessLauncher {
    /// Create a new process launcher
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self { log_dir })
    }

    /// Log file for an instance
    pub fn log_path(&self, instance: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", instance))
    }

    fn command(request: &LaunchRequest) -> Result<Command> {
        let argv = request.argv();
        let (program, args) = argv.split_first().ok_or_else(|| {
            SigilError::InvalidConfig(format!(
                "Service '{}' has no command to run",
                request.service.name
            ))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&request.service.environment)
            .stdin(Stdio::null());

        for mount in &request.mounts {
            cmd.env(volume_env_key(&mount.source), &mount.host_path);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let mut cmd = Self::command(request)?;

        let log = File::create(self.log_path(&request.name))?;
        cmd.stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        tracing::debug!(
            "Spawned {} as pid {:?}: {:?}",
            request.name,
            child.id(),
            request.argv()
        );

        Ok(ProcessHandle::Local(child))
    }

    async fn exit_status(&self, handle: &mut ProcessHandle) -> Result<Option<i32>> {
        match handle {
            ProcessHandle::Local(child) => Ok(child.try_wait()?.map(exit_code)),
            ProcessHandle::Container { id } => Err(SigilError::Runtime(format!(
                "process launcher cannot inspect container {}",
                id
            ))),
        }
    }

    async fn terminate(&self, handle: &mut ProcessHandle, grace: Duration) -> Result<i32> {
        let child = match handle {
            ProcessHandle::Local(child) => child,
            ProcessHandle::Container { id } => {
                return Err(SigilError::Runtime(format!(
                    "process launcher cannot stop container {}",
                    id
                )))
            }
        };

        if let Some(status) = child.try_wait()? {
            return Ok(exit_code(status));
        }

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: kill(2) with a pid we spawned and have not reaped
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc != 0 {
                    tracing::debug!(
                        "SIGTERM to pid {} failed: {}",
                        pid,
                        std::io::Error::last_os_error()
                    );
                }
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => Ok(exit_code(status?)),
            Err(_) => {
                tracing::warn!(
                    "Process {:?} ignored SIGTERM for {}ms, killing",
                    child.id(),
                    grace.as_millis()
                );
                child.kill().await?;
                Ok(exit_code(child.wait().await?))
            }
        }
    }

    async fn run(&self, request: &LaunchRequest) -> Result<i32> {
        let mut cmd = Self::command(request)?;
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        tracing::debug!("Running {}: {:?}", request.name, request.argv());
        let status = cmd.status().await?;
        Ok(exit_code(status))
    }
}
