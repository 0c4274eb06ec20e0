//! Composition orchestrator

use super::config::{ComposeFile, RuntimeKind};
use super::context::CompositionContext;
use super::parser::ComposeParser;
use crate::container::{DockerLauncher, InstanceInfo, Launcher, ProcessLauncher};
use crate::error::{Result, SigilError};
use crate::probe::ReadinessProbe;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Orchestration operations over one composition
pub struct Composition {
    /// Tracked instances and volumes
    context: CompositionContext,
    /// Readiness poller
    probe: ReadinessProbe,
    /// Deadline for each readiness wait
    readiness_timeout: Duration,
    /// Serializes one-off tasks
    tasks: Mutex<()>,
}

impl Composition {
    /// Create a new composition
    pub fn new(context: CompositionContext, probe: ReadinessProbe, readiness_timeout: Duration) -> Self {
        Self {
            context,
            probe,
            readiness_timeout,
            tasks: Mutex::new(()),
        }
    }

    /// Build a composition from a parsed compose file
    pub fn from_compose(project: &str, compose: &ComposeFile, data_dir: &Path) -> Result<Self> {
        let settings = &compose.settings;
        let registry = Arc::new(ComposeParser::build_registry(compose)?);

        let launcher: Arc<dyn Launcher> = match settings.runtime {
            RuntimeKind::Process => Arc::new(ProcessLauncher::new(data_dir.join("logs"))?),
            RuntimeKind::Docker => Arc::new(DockerLauncher::new(&settings.docker_binary, project)),
        };

        tracing::info!(
            "Project {} with {} service(s), runtime {}, data in {}",
            project,
            registry.len(),
            settings.runtime,
            data_dir.display()
        );

        let context = CompositionContext::new(project, registry, launcher, data_dir)?;
        let probe = ReadinessProbe::new(settings.probe_interval)?;

        Ok(Self::new(context, probe, settings.readiness_timeout))
    }

    pub fn context(&self) -> &CompositionContext {
        &self.context
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    /// Start services concurrently, then wait for all of them to become ready.
    ///
    /// Fails with the error of the first name, in the given order, that
    /// failed to start or to become ready. Instances that did come up are
    /// left running.
    pub async fn start_and_wait(&self, names: &[String]) -> Result<Vec<InstanceInfo>> {
        let controller = self.context.controller();

        let started = join_all(names.iter().map(|name| controller.start(name))).await;
        started.into_iter().collect::<Result<Vec<_>>>()?;

        let ready = join_all(names.iter().map(|name| self.wait_for_ready(name))).await;
        ready.into_iter().collect()
    }

    /// Start a service after its dependencies, without waiting for readiness
    pub async fn up(&self, name: &str) -> Result<InstanceInfo> {
        self.start_dependencies(name).await?;
        self.context.controller().start(name).await
    }

    /// Wait for a started service to become ready
    pub async fn wait_for_ready(&self, name: &str) -> Result<InstanceInfo> {
        let spec = self.context.registry().resolve(name)?;
        let protocol = spec.effective_readiness();

        self.probe
            .wait_until_ready(
                self.context.controller(),
                name,
                protocol.as_ref(),
                self.readiness_timeout,
            )
            .await
    }

    /// Run a one-off task to completion, requiring a zero exit code
    pub async fn run(&self, target: &str, args: &[String]) -> Result<()> {
        self.context.registry().resolve(target)?;
        self.start_dependencies(target).await?;

        let _task = self.tasks.lock().await;
        let exit_code = self.context.controller().run_once(target, args).await?;

        if exit_code != 0 {
            tracing::error!("Task {} exited with code {}", target, exit_code);
            return Err(SigilError::TaskFailed {
                target: target.to_string(),
                exit_code,
            });
        }

        tracing::info!("Task {} completed", target);
        Ok(())
    }

    /// Remove services, attempting every one and aggregating failures
    pub async fn rm(&self, names: &[String], destroy_volumes: bool) -> Result<()> {
        let mut errors = Vec::new();

        for name in names {
            if let Err(e) = self.context.controller().remove(name, destroy_volumes).await {
                tracing::warn!("Failed to remove {}: {}", name, e);
                errors.push(e);
            }
        }

        SigilError::aggregate(errors)
    }

    /// Snapshots of all tracked instances
    pub async fn ps(&self) -> Result<Vec<InstanceInfo>> {
        self.context.instances().await
    }

    /// Stop everything still tracked; returns secondary failures
    pub async fn down(&self) -> Vec<SigilError> {
        self.context.shutdown().await
    }

    async fn start_dependencies(&self, name: &str) -> Result<()> {
        let order = self
            .context
            .registry()
            .start_order(std::slice::from_ref(&name.to_string()))?;

        for dep in order.iter().filter(|dep| dep.as_str() != name) {
            tracing::debug!("Starting {} as a dependency of {}", dep, name);
            self.context.controller().start(dep).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::InstanceStatus;
    use crate::probe::ReadinessProtocol;
    use crate::service::{ServiceRegistry, ServiceSpec};
    use tempfile::{tempdir, TempDir};
    use tokio::net::TcpListener;

    fn sleeper(name: &str) -> ServiceSpec {
        ServiceSpec::new(name)
            .command(["sleep", "30"])
            .stop_grace_period(Duration::from_secs(2))
    }

    fn composition(specs: Vec<ServiceSpec>, timeout: Duration) -> (TempDir, Composition) {
        let temp = tempdir().unwrap();
        let registry = Arc::new(ServiceRegistry::from_specs(specs).unwrap());
        let launcher = Arc::new(ProcessLauncher::new(temp.path().join("logs")).unwrap());
        let context = CompositionContext::new("test", registry, launcher, temp.path()).unwrap();
        let probe = ReadinessProbe::new(Duration::from_millis(50)).unwrap();
        (temp, Composition::new(context, probe, timeout))
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_start_and_wait_any_order() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let specs = vec![
            sleeper("a").readiness(ReadinessProtocol::Tcp {
                address: a.local_addr().unwrap().to_string(),
            }),
            sleeper("b").readiness(ReadinessProtocol::Tcp {
                address: b.local_addr().unwrap().to_string(),
            }),
        ];

        for order in [["a", "b"], ["b", "a"]] {
            let (_temp, composition) = composition(specs.clone(), Duration::from_secs(5));
            let ready = composition.start_and_wait(&names(&order)).await.unwrap();

            assert_eq!(ready.len(), 2);
            assert!(ready.iter().all(|i| i.status == InstanceStatus::Ready));
            assert!(composition.down().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_up_starts_dependencies() {
        let (_temp, composition) = composition(
            vec![sleeper("log"), sleeper("db").depends_on("log")],
            Duration::from_secs(5),
        );

        let info = composition.up("db").await.unwrap();
        assert_eq!(info.status, InstanceStatus::Running);

        let tracked = composition.context().controller().tracked().unwrap();
        assert_eq!(tracked, vec!["db", "log"]);
        assert!(composition.down().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_task_exit_codes() {
        let (_temp, composition) = composition(
            vec![
                ServiceSpec::new("ok").command(["sh", "-c", "exit 0"]),
                ServiceSpec::new("broken").command(["sh", "-c", "exit 3"]),
            ],
            Duration::from_secs(5),
        );

        composition.run("ok", &names(&["script.td"])).await.unwrap();

        let err = composition.run("broken", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            SigilError::TaskFailed { ref target, exit_code: 3 } if target == "broken"
        ));

        // one-off tasks are never tracked
        assert!(composition.ps().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rm_aggregates() {
        let (_temp, composition) = composition(vec![sleeper("log")], Duration::from_secs(5));

        let single = composition.rm(&names(&["nonexistent"]), false).await;
        assert!(matches!(single, Err(SigilError::NotFound(ref n)) if n == "nonexistent"));

        composition.up("log").await.unwrap();
        let several = composition
            .rm(&names(&["log", "missing-a", "missing-b"]), false)
            .await;
        match several {
            Err(SigilError::AggregatedTeardownFailure(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }

        // the existing instance was still removed
        assert!(composition.ps().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_ready_not_started() {
        let (_temp, composition) = composition(vec![sleeper("db")], Duration::from_secs(1));
        assert!(matches!(
            composition.wait_for_ready("db").await,
            Err(SigilError::NotStarted(_))
        ));
        assert!(matches!(
            composition.wait_for_ready("cache").await,
            Err(SigilError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn test_from_compose() {
        let temp = tempdir().unwrap();
        let compose = ComposeParser::parse_str_with_env(
            r#"
settings: { probe_interval: 100ms, readiness_timeout: 5s }
services:
  log: { command: [sleep, "30"], stop_grace_period: 1s }
"#,
            &Default::default(),
        )
        .unwrap();

        let composition = Composition::from_compose("loki", &compose, temp.path()).unwrap();
        assert_eq!(composition.readiness_timeout(), Duration::from_secs(5));
        assert_eq!(composition.context().project(), "loki");

        let ready = composition.start_and_wait(&names(&["log"])).await.unwrap();
        assert_eq!(ready[0].status, InstanceStatus::Ready);
        assert!(temp.path().join("logs").join("loki-log-1.log").exists());
        assert!(composition.down().await.is_empty());
    }
}
