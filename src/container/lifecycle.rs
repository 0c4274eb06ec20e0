//! Instance lifecycle management

use super::config::{InstanceInfo, InstanceStatus};
use super::runtime::{LaunchRequest, Launcher, ProcessHandle, ResolvedMount};
use crate::error::{Result, SigilError};
use crate::service::{ServiceRegistry, ServiceSpec};
use crate::storage::VolumeManager;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// A running realization of a service
#[derive(Debug)]
pub struct ServiceInstance {
    /// Instance ID
    pub id: String,
    /// Service specification
    pub service: Arc<ServiceSpec>,
    /// Current status
    pub status: InstanceStatus,
    /// Process or container handle
    pub handle: Option<ProcessHandle>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Stop time
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code
    pub exit_code: Option<i32>,
    /// Attached volume names
    pub volumes: Vec<String>,
}

impl ServiceInstance {
    fn new(service: Arc<ServiceSpec>) -> Self {
        Self {
            id: Uuid::new_v4().to_string().replace('-', "")[..12].to_string(),
            service,
            status: InstanceStatus::Pending,
            handle: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
            volumes: Vec::new(),
        }
    }

    /// Snapshot of this instance
    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id.clone(),
            service: self.service.name.clone(),
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            exit_code: self.exit_code,
            pid: self.handle.as_ref().and_then(ProcessHandle::pid),
            container_id: self
                .handle
                .as_ref()
                .and_then(|h| h.container_id().map(str::to_string)),
            volumes: self.volumes.clone(),
        }
    }

    fn finish(&mut self, status: InstanceStatus, exit_code: Option<i32>) {
        self.status = status;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        self.handle = None;
    }
}

/// Per-name instance slot; its lock serializes start/stop for one name
type Slot = Arc<Mutex<Option<ServiceInstance>>>;

/// Launches, monitors and terminates service instances
pub struct ProcessController {
    /// Project name, prefix of instance names
    project: String,
    /// Service declarations
    registry: Arc<ServiceRegistry>,
    /// Runtime used to launch instances
    launcher: Arc<dyn Launcher>,
    /// Named volumes
    volumes: Arc<VolumeManager>,
    /// Instance slots indexed by service name
    instances: RwLock<HashMap<String, Slot>>,
}

impl ProcessController {
    /// Create a new controller
    pub fn new(
        project: &str,
        registry: Arc<ServiceRegistry>,
        launcher: Arc<dyn Launcher>,
        volumes: Arc<VolumeManager>,
    ) -> Self {
        Self {
            project: project.to_string(),
            registry,
            launcher,
            volumes,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Service registry
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Name given to the process or container of a service
    pub fn instance_name(&self, service: &str) -> String {
        format!("{}-{}-1", self.project, service)
    }

    /// Start a service, or return its instance if it is already running
    pub async fn start(&self, name: &str) -> Result<InstanceInfo> {
        let spec = self.registry.resolve(name)?;
        let mut guard = self.lock_slot(name).await?;

        if let Some(instance) = guard.as_mut() {
            if instance.status.is_live() && self.refresh(instance).await.is_live() {
                tracing::debug!("Service {} already {}", name, instance.status);
                return Ok(instance.info());
            }
        }

        let instance = guard.insert(ServiceInstance::new(spec.clone()));
        instance.status = InstanceStatus::Starting;
        tracing::info!(
            "Starting service {} ({}) with {} runtime",
            name,
            instance.id,
            self.launcher.name()
        );

        let mounts = match self.attach_volumes(&spec) {
            Ok(mounts) => mounts,
            Err(e) => {
                instance.finish(InstanceStatus::Failed, None);
                return Err(SigilError::StartFailed {
                    service: name.to_string(),
                    cause: e.to_string(),
                });
            }
        };
        instance.volumes = mounts.iter().map(|m| m.source.clone()).collect();

        let request = LaunchRequest {
            name: self.instance_name(name),
            service: spec.clone(),
            mounts,
            args: Vec::new(),
        };

        match self.launcher.launch(&request).await {
            Ok(handle) => {
                instance.handle = Some(handle);
                instance.status = InstanceStatus::Running;
                instance.started_at = Some(Utc::now());
                tracing::info!("Service {} running ({})", name, instance.id);
                Ok(instance.info())
            }
            Err(e) => {
                tracing::error!("Failed to launch service {}: {}", name, e);
                instance.finish(InstanceStatus::Failed, None);
                for volume in &instance.volumes {
                    if let Err(err) = self.volumes.detach(volume, name) {
                        tracing::warn!("Failed to detach volume {}: {}", volume, err);
                    }
                }
                Err(SigilError::StartFailed {
                    service: name.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Stop a service instance, keeping its record
    pub async fn stop(&self, name: &str, destroy_volumes: bool) -> Result<InstanceInfo> {
        let slot = self
            .existing_slot(name)?
            .ok_or_else(|| SigilError::NotFound(name.to_string()))?;
        let mut guard = slot.lock().await;
        let instance = guard
            .as_mut()
            .ok_or_else(|| SigilError::NotFound(name.to_string()))?;

        self.stop_instance(instance, destroy_volumes).await?;
        Ok(instance.info())
    }

    /// Stop a service instance and forget it
    pub async fn remove(&self, name: &str, destroy_volumes: bool) -> Result<InstanceInfo> {
        let slot = self
            .existing_slot(name)?
            .ok_or_else(|| SigilError::NotFound(name.to_string()))?;
        let mut guard = slot.lock().await;
        let instance = guard
            .as_mut()
            .ok_or_else(|| SigilError::NotFound(name.to_string()))?;

        self.stop_instance(instance, destroy_volumes).await?;
        let info = instance.info();
        *guard = None;

        let mut instances = self
            .instances
            .write()
            .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;
        if instances.get(name).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            instances.remove(name);
        }

        tracing::info!("Removed service {} ({})", name, info.id);
        Ok(info)
    }

    /// Promote a running instance to Ready
    pub async fn mark_ready(&self, name: &str) -> Result<InstanceInfo> {
        let slot = self
            .existing_slot(name)?
            .ok_or_else(|| SigilError::NotStarted(name.to_string()))?;
        let mut guard = slot.lock().await;
        let instance = guard
            .as_mut()
            .ok_or_else(|| SigilError::NotStarted(name.to_string()))?;

        match self.refresh(instance).await {
            InstanceStatus::Running => {
                instance.status = InstanceStatus::Ready;
                tracing::info!("Service {} is ready", name);
                Ok(instance.info())
            }
            InstanceStatus::Ready => Ok(instance.info()),
            InstanceStatus::Stopped | InstanceStatus::Failed => match instance.exit_code {
                Some(code) => Err(SigilError::StartFailed {
                    service: name.to_string(),
                    cause: format!("exited with code {} before becoming ready", code),
                }),
                None => Err(SigilError::NotStarted(name.to_string())),
            },
            _ => Err(SigilError::NotStarted(name.to_string())),
        }
    }

    /// Snapshot of one instance, refreshing its liveness
    pub async fn get(&self, name: &str) -> Result<Option<InstanceInfo>> {
        let Some(slot) = self.existing_slot(name)? else {
            return Ok(None);
        };

        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(instance) => {
                self.refresh(instance).await;
                Ok(Some(instance.info()))
            }
            None => Ok(None),
        }
    }

    /// Snapshots of all tracked instances, sorted by service name
    pub async fn list(&self) -> Result<Vec<InstanceInfo>> {
        let mut result = Vec::new();
        for name in self.tracked()? {
            if let Some(info) = self.get(&name).await? {
                result.push(info);
            }
        }
        Ok(result)
    }

    /// Names of all tracked instances, sorted
    pub fn tracked(&self) -> Result<Vec<String>> {
        let instances = self
            .instances
            .read()
            .map_err(|_| SigilError::Lock("Failed to acquire read lock".to_string()))?;

        let mut names: Vec<String> = instances.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Run a service once with extra arguments and return its exit code
    pub async fn run_once(&self, name: &str, args: &[String]) -> Result<i32> {
        let spec = self.registry.resolve(name)?;

        let mut mounts = Vec::new();
        for mount in &spec.volumes {
            let volume = self.volumes.ensure(&mount.source)?;
            mounts.push(ResolvedMount {
                source: mount.source.clone(),
                target: mount.target.clone(),
                host_path: volume.mountpoint,
                read_only: mount.read_only,
            });
        }

        let request = LaunchRequest {
            name: format!("{}-{}-run", self.project, name),
            service: spec,
            mounts,
            args: args.to_vec(),
        };

        tracing::info!("Running {} {:?}", name, args);
        self.launcher.run(&request).await
    }

    /// Mark an instance whose process exited on its own
    async fn refresh(&self, instance: &mut ServiceInstance) -> InstanceStatus {
        if !instance.status.is_live() {
            return instance.status;
        }
        let Some(handle) = instance.handle.as_mut() else {
            return instance.status;
        };

        match self.launcher.exit_status(handle).await {
            Ok(Some(code)) => {
                let status = if code == 0 {
                    InstanceStatus::Stopped
                } else {
                    InstanceStatus::Failed
                };
                tracing::warn!(
                    "Service {} exited on its own with code {}",
                    instance.service.name,
                    code
                );
                instance.finish(status, Some(code));
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(
                "Could not check service {}: {}",
                instance.service.name,
                e
            ),
        }

        instance.status
    }

    async fn stop_instance(
        &self,
        instance: &mut ServiceInstance,
        destroy_volumes: bool,
    ) -> Result<()> {
        let name = instance.service.name.clone();

        match instance.handle.take() {
            Some(mut handle) if instance.status.is_live() => {
                instance.status = InstanceStatus::Stopping;
                tracing::info!("Stopping service {} ({})", name, instance.id);

                match self
                    .launcher
                    .terminate(&mut handle, instance.service.stop_grace_period)
                    .await
                {
                    Ok(code) => instance.finish(InstanceStatus::Stopped, Some(code)),
                    Err(e) => {
                        instance.finish(InstanceStatus::Failed, None);
                        return Err(SigilError::Runtime(format!(
                            "failed to stop service {}: {}",
                            name, e
                        )));
                    }
                }
            }
            Some(handle) => instance.handle = Some(handle),
            None => tracing::debug!("Service {} already {}", name, instance.status),
        }

        for volume in &instance.volumes {
            if destroy_volumes {
                self.volumes.release(volume, &name)?;
            } else {
                match self.volumes.detach(volume, &name) {
                    Ok(()) | Err(SigilError::VolumeNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    /// Attach every volume of `spec`, or none of them
    fn attach_volumes(&self, spec: &ServiceSpec) -> Result<Vec<ResolvedMount>> {
        let mut mounts: Vec<ResolvedMount> = Vec::new();
        for mount in &spec.volumes {
            let attached = self
                .volumes
                .ensure(&mount.source)
                .and_then(|volume| {
                    self.volumes.attach(&mount.source, &spec.name)?;
                    Ok(volume)
                });

            match attached {
                Ok(volume) => mounts.push(ResolvedMount {
                    source: mount.source.clone(),
                    target: mount.target.clone(),
                    host_path: volume.mountpoint,
                    read_only: mount.read_only,
                }),
                Err(e) => {
                    for done in &mounts {
                        if let Err(detach_err) = self.volumes.detach(&done.source, &spec.name) {
                            tracing::warn!(
                                "Failed to detach volume {} from {}: {}",
                                done.source,
                                spec.name,
                                detach_err
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(mounts)
    }

    fn existing_slot(&self, name: &str) -> Result<Option<Slot>> {
        let instances = self
            .instances
            .read()
            .map_err(|_| SigilError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(instances.get(name).cloned())
    }

    /// Lock the slot for `name`, creating it on first use. Retries if the slot
    /// was removed while waiting, so a start never lands in an untracked slot.
    async fn lock_slot(&self, name: &str) -> Result<OwnedMutexGuard<Option<ServiceInstance>>> {
        loop {
            let slot = {
                let mut instances = self
                    .instances
                    .write()
                    .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;
                instances.entry(name.to_string()).or_default().clone()
            };

            let guard = slot.clone().lock_owned().await;

            if self
                .existing_slot(name)?
                .is_some_and(|current| Arc::ptr_eq(&current, &slot))
            {
                return Ok(guard);
            }
        }
    }
}
