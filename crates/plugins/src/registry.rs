//! Installed-plugin registry persistence.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use strato_types::InstalledPlugin;

use crate::config::write_atomically;
use crate::error::{PluginError, PluginResult};

/// The persisted set of installed plugins, keyed case-insensitively by
/// name. Implementations are responsible for their own durability; every
/// mutation must be on disk before the process exits normally.
pub trait PluginRegistry: Send + Sync {
    /// Look up a plugin by name, case-insensitively.
    fn lookup(&self, name: &str) -> PluginResult<Option<InstalledPlugin>>;

    /// All installed plugins, in registration order.
    fn all(&self) -> PluginResult<Vec<InstalledPlugin>>;

    /// Insert or replace the record with the same (case-insensitive) name.
    fn put(&self, record: InstalledPlugin) -> PluginResult<()>;

    /// Remove the record with this name, case-insensitively.
    fn remove(&self, name: &str) -> PluginResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    plugins: Vec<InstalledPlugin>,
}

/// [`PluginRegistry`] persisted as a JSON file, written atomically
/// (temp name then rename) immediately after each mutation.
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    entries: Mutex<Vec<InstalledPlugin>>,
}

impl JsonFileRegistry {
    /// Load from disk; a missing file is an empty registry.
    pub fn load(path: impl Into<PathBuf>) -> PluginResult<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: RegistryFile =
                    serde_json::from_slice(&bytes).map_err(|e| PluginError::Registry {
                        path: path.clone(),
                        detail: e.to_string(),
                    })?;
                file.plugins
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    fn save(&self, entries: &[InstalledPlugin]) -> PluginResult<()> {
        let file = RegistryFile { plugins: entries.to_vec() };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| PluginError::Registry {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomically(&self.path, &bytes)?;
        Ok(())
    }
}

impl PluginRegistry for JsonFileRegistry {
    fn lookup(&self, name: &str) -> PluginResult<Option<InstalledPlugin>> {
        let entries = self.entries.lock().expect("registry lock");
        Ok(entries.iter().find(|p| p.name.eq_ignore_ascii_case(name)).cloned())
    }

    fn all(&self) -> PluginResult<Vec<InstalledPlugin>> {
        let entries = self.entries.lock().expect("registry lock");
        Ok(entries.clone())
    }

    fn put(&self, record: InstalledPlugin) -> PluginResult<()> {
        let mut entries = self.entries.lock().expect("registry lock");
        entries.retain(|p| !p.name.eq_ignore_ascii_case(&record.name));
        entries.push(record);
        self.save(&entries)
    }

    fn remove(&self, name: &str) -> PluginResult<()> {
        let mut entries = self.entries.lock().expect("registry lock");
        entries.retain(|p| !p.name.eq_ignore_ascii_case(name));
        self.save(&entries)
    }
}
