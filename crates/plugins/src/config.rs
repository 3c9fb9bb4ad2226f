//! Home directory layout and registered plugin repositories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};

/// A registered plugin repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRepository {
    /// Display name, compared case-insensitively.
    pub name: String,
    /// Base URL; the listing lives at `{url}/list`.
    pub url: String,
}

/// Resolved Strato home directory (`$STRATO_HOME` or `~/.strato`).
#[derive(Debug, Clone)]
pub struct StratoHome {
    root: PathBuf,
}

impl StratoHome {
    /// Resolve the home directory from the environment.
    pub fn from_env() -> PluginResult<Self> {
        if let Ok(root) = std::env::var("STRATO_HOME") {
            return Ok(Self { root: PathBuf::from(root) });
        }
        let home = dirs_next::home_dir().ok_or_else(|| {
            PluginError::Io(std::io::Error::other("could not determine home directory"))
        })?;
        Ok(Self { root: home.join(".strato") })
    }

    /// Use an explicit root; tests point this at a temp directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory installed plugin executables live in.
    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join("plugins")
    }

    /// Path of the installed-plugin registry file.
    pub fn registry_path(&self) -> PathBuf {
        self.plugins_dir().join("config.json")
    }

    /// Path of the registered-repositories file.
    pub fn repositories_path(&self) -> PathBuf {
        self.root.join("repositories.json")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepositoriesFile {
    #[serde(default)]
    repositories: Vec<PluginRepository>,
}

/// The set of registered plugin repositories, persisted as JSON.
#[derive(Debug, Default)]
pub struct Repositories {
    path: PathBuf,
    entries: Vec<PluginRepository>,
}

impl Repositories {
    /// Load from disk; a missing file is an empty set.
    pub fn load(path: impl Into<PathBuf>) -> PluginResult<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: RepositoriesFile =
                    serde_json::from_slice(&bytes).map_err(|e| PluginError::Registry {
                        path: path.clone(),
                        detail: e.to_string(),
                    })?;
                file.repositories
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries })
    }

    /// All registered repositories, in registration order.
    pub fn all(&self) -> &[PluginRepository] {
        &self.entries
    }

    /// Find a repository by name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&PluginRepository> {
        self.entries.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Register a repository and persist immediately.
    pub fn add(&mut self, repository: PluginRepository) -> PluginResult<()> {
        if self.find(&repository.name).is_some() {
            return Err(PluginError::Registry {
                path: self.path.clone(),
                detail: format!("repository '{}' is already registered", repository.name),
            });
        }
        self.entries.push(repository);
        self.save()
    }

    fn save(&self) -> PluginResult<()> {
        let file = RepositoriesFile { repositories: self.entries.clone() };
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

/// Write a file via a temp name in the same directory, then rename into
/// place, so readers never observe a half-written file.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut temp, bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repositories::load(dir.path().join("repositories.json")).unwrap();
        assert!(repos.all().is_empty());
    }

    #[test]
    fn add_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repositories.json");
        let mut repos = Repositories::load(&path).unwrap();
        repos
            .add(PluginRepository { name: "Community".into(), url: "https://plugins.example.com".into() })
            .unwrap();

        let reloaded = Repositories::load(&path).unwrap();
        assert_eq!(reloaded.all().len(), 1);
        assert!(reloaded.find("community").is_some(), "lookup is case-insensitive");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut repos = Repositories::load(dir.path().join("repositories.json")).unwrap();
        repos
            .add(PluginRepository { name: "repo".into(), url: "https://a.example.com".into() })
            .unwrap();
        let err = repos
            .add(PluginRepository { name: "REPO".into(), url: "https://b.example.com".into() })
            .unwrap_err();
        assert!(matches!(err, PluginError::Registry { .. }));
    }

    #[test]
    fn home_layout_paths() {
        let home = StratoHome::at("/tmp/strato-home");
        assert_eq!(home.plugins_dir(), PathBuf::from("/tmp/strato-home/plugins"));
        assert_eq!(home.registry_path(), PathBuf::from("/tmp/strato-home/plugins/config.json"));
    }
}
