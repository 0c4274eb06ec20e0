//! Volume management

use crate::error::{Result, SigilError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Named persistent storage directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Directory on the host
    pub mountpoint: PathBuf,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Services currently attached to this volume
    pub owners: BTreeSet<String>,
}

impl Volume {
    /// Create a new volume
    pub fn new(name: &str, base_path: &Path) -> Self {
        Self {
            name: name.to_string(),
            mountpoint: base_path.join(name),
            created_at: Utc::now(),
            owners: BTreeSet::new(),
        }
    }

    /// Whether no service but `owner` is attached
    pub fn is_exclusive_to(&self, owner: &str) -> bool {
        self.owners.iter().all(|o| o == owner)
    }

    /// Get size in bytes
    pub fn size(&self) -> Result<u64> {
        if !self.mountpoint.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(&self.mountpoint)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    total += metadata.len();
                }
            }
        }

        Ok(total)
    }
}

/// Volume manager
pub struct VolumeManager {
    /// Volumes indexed by name
    volumes: Arc<RwLock<HashMap<String, Volume>>>,
    /// Base path for volume storage
    base_path: PathBuf,
}

impl VolumeManager {
    /// Create a new volume manager, picking up volumes left by earlier runs
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;

        let mut volumes = HashMap::new();
        for entry in std::fs::read_dir(&base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let mut volume = Volume::new(&name, &base_path);
            if let Ok(created) = entry.metadata().and_then(|m| m.created()) {
                volume.created_at = created.into();
            }
            volumes.insert(name, volume);
        }

        Ok(Self {
            volumes: Arc::new(RwLock::new(volumes)),
            base_path,
        })
    }

    /// Base directory holding all volumes
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create a new volume
    pub fn create(&self, name: &str) -> Result<Volume> {
        validate_name(name)?;

        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;

        if volumes.contains_key(name) {
            return Err(SigilError::Volume(format!("Volume {} already exists", name)));
        }

        let volume = Volume::new(name, &self.base_path);
        std::fs::create_dir_all(&volume.mountpoint)?;
        tracing::debug!("Created volume {} at {}", name, volume.mountpoint.display());

        volumes.insert(name.to_string(), volume.clone());
        Ok(volume)
    }

    /// Get a volume, creating it if it does not exist yet
    pub fn ensure(&self, name: &str) -> Result<Volume> {
        match self.get(name) {
            Ok(volume) => Ok(volume),
            Err(SigilError::VolumeNotFound(_)) => self.create(name),
            Err(e) => Err(e),
        }
    }

    /// Get a volume by name
    pub fn get(&self, name: &str) -> Result<Volume> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| SigilError::Lock("Failed to acquire read lock".to_string()))?;

        volumes
            .get(name)
            .cloned()
            .ok_or_else(|| SigilError::VolumeNotFound(name.to_string()))
    }

    /// List all volumes, sorted by name
    pub fn list(&self) -> Result<Vec<Volume>> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| SigilError::Lock("Failed to acquire read lock".to_string()))?;

        let mut list: Vec<Volume> = volumes.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// Attach a service to a volume
    pub fn attach(&self, name: &str, owner: &str) -> Result<()> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;

        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| SigilError::VolumeNotFound(name.to_string()))?;

        volume.owners.insert(owner.to_string());
        Ok(())
    }

    /// Detach a service from a volume
    pub fn detach(&self, name: &str, owner: &str) -> Result<()> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;

        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| SigilError::VolumeNotFound(name.to_string()))?;

        volume.owners.remove(owner);
        Ok(())
    }

    /// Detach `owner` and destroy the volume if nothing else uses it.
    ///
    /// Returns whether the volume was destroyed. A volume that is already gone
    /// counts as released.
    pub fn release(&self, name: &str, owner: &str) -> Result<bool> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;

        let Some(volume) = volumes.get_mut(name) else {
            return Ok(false);
        };

        if !volume.is_exclusive_to(owner) {
            volume.owners.remove(owner);
            tracing::info!(
                "Keeping volume {} (still used by {:?})",
                name,
                volume.owners
            );
            return Ok(false);
        }

        if volume.mountpoint.exists() {
            std::fs::remove_dir_all(&volume.mountpoint)?;
        }
        volumes.remove(name);
        tracing::info!("Destroyed volume {}", name);

        Ok(true)
    }

    /// Remove a volume
    pub fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| SigilError::Lock("Failed to acquire write lock".to_string()))?;

        let volume = volumes
            .get(name)
            .ok_or_else(|| SigilError::VolumeNotFound(name.to_string()))?;

        if !volume.owners.is_empty() && !force {
            return Err(SigilError::Volume(format!(
                "Volume {} is in use by {} service(s)",
                name,
                volume.owners.len()
            )));
        }

        if volume.mountpoint.exists() {
            std::fs::remove_dir_all(&volume.mountpoint)?;
        }

        volumes.remove(name);

        Ok(())
    }

    /// Remove every volume no service is attached to
    pub fn prune(&self) -> Result<Vec<String>> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| SigilError::Lock("Failed to acquire read lock".to_string()))?;

        let to_remove: Vec<String> = volumes
            .iter()
            .filter(|(_, v)| v.owners.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        drop(volumes);

        for name in &to_remove {
            self.remove(name, false)?;
        }

        Ok(to_remove)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(SigilError::Volume(format!("Invalid volume name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_volume() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.create("mzdata").unwrap();
        assert_eq!(volume.name, "mzdata");
        assert!(volume.mountpoint.exists());
        assert!(manager.create("mzdata").is_err());
    }

    #[test]
    fn test_invalid_volume_name() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        assert!(manager.create("../escape").is_err());
        assert!(manager.create("").is_err());
    }

    #[test]
    fn test_existing_volumes_are_loaded() {
        let temp = tempdir().unwrap();
        {
            let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
            manager.create("pgdata").unwrap();
        }

        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
        assert!(manager.get("pgdata").is_ok());
    }

    #[test]
    fn test_remove_volume_in_use() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        manager.create("mzdata").unwrap();
        manager.attach("mzdata", "db").unwrap();

        assert!(manager.remove("mzdata", false).is_err());
        manager.remove("mzdata", true).unwrap();
        assert!(matches!(
            manager.get("mzdata"),
            Err(SigilError::VolumeNotFound(_))
        ));
    }

    #[test]
    fn test_release_exclusive_volume() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.create("logdata").unwrap();
        manager.attach("logdata", "log").unwrap();

        assert!(manager.release("logdata", "log").unwrap());
        assert!(!volume.mountpoint.exists());
        assert!(manager.get("logdata").is_err());
    }

    #[test]
    fn test_release_shared_volume_only_detaches() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        manager.create("shared").unwrap();
        manager.attach("shared", "log").unwrap();
        manager.attach("shared", "db").unwrap();

        assert!(!manager.release("shared", "log").unwrap());
        let volume = manager.get("shared").unwrap();
        assert_eq!(volume.owners.len(), 1);
        assert!(volume.owners.contains("db"));
    }

    #[test]
    fn test_prune_keeps_attached_volumes() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        manager.create("used").unwrap();
        manager.create("unused").unwrap();
        manager.attach("used", "db").unwrap();

        assert_eq!(manager.prune().unwrap(), vec!["unused".to_string()]);
        assert!(manager.get("used").is_ok());
    }

    #[test]
    fn test_volume_size() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.create("data").unwrap();
        std::fs::write(volume.mountpoint.join("a.bin"), [0u8; 100]).unwrap();
        assert_eq!(volume.size().unwrap(), 100);
    }
}
