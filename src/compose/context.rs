//! Composition context

use crate::container::{InstanceInfo, Launcher, ProcessController};
use crate::error::{Result, SigilError};
use crate::service::ServiceRegistry;
use crate::storage::VolumeManager;
use std::path::Path;
use std::sync::Arc;

/// Tracks the instances and volumes of one composition run
pub struct CompositionContext {
    /// Project name
    project: String,
    /// Service declarations
    registry: Arc<ServiceRegistry>,
    /// Named volumes
    volumes: Arc<VolumeManager>,
    /// Instance lifecycle
    controller: Arc<ProcessController>,
}

impl CompositionContext {
    /// Create a context whose volumes live under `data_dir`
    pub fn new(
        project: &str,
        registry: Arc<ServiceRegistry>,
        launcher: Arc<dyn Launcher>,
        data_dir: &Path,
    ) -> Result<Self> {
        let volumes = Arc::new(VolumeManager::new(data_dir.join("volumes"))?);
        let controller = Arc::new(ProcessController::new(
            project,
            registry.clone(),
            launcher,
            volumes.clone(),
        ));

        Ok(Self {
            project: project.to_string(),
            registry,
            volumes,
            controller,
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn volumes(&self) -> &Arc<VolumeManager> {
        &self.volumes
    }

    pub fn controller(&self) -> &Arc<ProcessController> {
        &self.controller
    }

    /// Snapshots of all tracked instances
    pub async fn instances(&self) -> Result<Vec<InstanceInfo>> {
        self.controller.list().await
    }

    /// Stop and forget every tracked instance, in reverse declaration order.
    ///
    /// Never fails: each error is logged and returned to the caller.
    pub async fn shutdown(&self) -> Vec<SigilError> {
        let tracked = match self.controller.tracked() {
            Ok(tracked) => tracked,
            Err(e) => {
                tracing::warn!("Shutdown could not list instances: {}", e);
                return vec![e];
            }
        };

        if tracked.is_empty() {
            return Vec::new();
        }

        tracing::info!(
            "Shutting down {} instance(s) of project {}",
            tracked.len(),
            self.project
        );

        let mut order: Vec<&String> = self
            .registry
            .names()
            .iter()
            .rev()
            .filter(|name| tracked.contains(name))
            .collect();
        order.extend(tracked.iter().filter(|name| !self.registry.contains(name)));

        let mut errors = Vec::new();
        for name in order {
            match self.controller.remove(name, false).await {
                Ok(info) => tracing::debug!("Shut down {} ({})", name, info.id),
                Err(SigilError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!("Failed to shut down {}: {}", name, e);
                    errors.push(e);
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{InstanceStatus, ProcessLauncher};
    use crate::service::ServiceSpec;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn context() -> (TempDir, CompositionContext) {
        let temp = tempdir().unwrap();
        let specs = ["log", "db", "driver"].map(|name| {
            ServiceSpec::new(name)
                .command(["sleep", "30"])
                .volume(&format!("{}-data", name), "/data")
                .stop_grace_period(Duration::from_secs(2))
        });
        let registry = Arc::new(ServiceRegistry::from_specs(specs).unwrap());
        let launcher = Arc::new(ProcessLauncher::new(temp.path().join("logs")).unwrap());
        let context = CompositionContext::new("test", registry, launcher, temp.path()).unwrap();
        (temp, context)
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let (_temp, context) = context();
        context.controller().start("log").await.unwrap();
        context.controller().start("db").await.unwrap();

        let instances = context.instances().await.unwrap();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| i.status == InstanceStatus::Running));

        let errors = context.shutdown().await;
        assert!(errors.is_empty());
        assert!(context.instances().await.unwrap().is_empty());

        // volumes survive a plain shutdown
        assert_eq!(context.volumes().list().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_skips_removed() {
        let (_temp, context) = context();
        context.controller().start("log").await.unwrap();
        context.controller().remove("log", true).await.unwrap();

        assert!(context.shutdown().await.is_empty());
        assert!(context.volumes().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_empty() {
        let (_temp, context) = context();
        assert!(context.shutdown().await.is_empty());
        assert_eq!(context.project(), "test");
    }
}
