//! Install / uninstall orchestration.
//!
//! One install is one sequential pass:
//!
//! ```text
//! LOCATE -> (confirm unless -f) -> DOWNLOAD -> EXTRACT_METADATA -> CHECK_CONFLICTS
//!    -> [already registered] CONFIRM_REPLACE -> UNINSTALL_OLD -> PLACE -> REGISTER
//!    -> [else]                                                   PLACE -> REGISTER
//! ```
//!
//! The registry is mutated last, so a crash anywhere earlier leaves the
//! pre-install state intact (the replacement path performs two registry
//! mutations; a crash between them can leave neither version registered —
//! an accepted gap). Downloaded temp files are owned by the located
//! candidate and removed when it drops, on success and on every failure
//! path alike.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use strato_types::InstalledPlugin;

use crate::config::PluginRepository;
use crate::conflicts::check_conflicts;
use crate::error::{PluginError, PluginResult};
use crate::executor::PluginExecutor;
use crate::locator::{LocatedBinary, PluginLocator};
use crate::registry::PluginRegistry;
use crate::repository::RepositoryClient;

/// Answers yes/no questions on behalf of the user.
///
/// `Ok(false)` is an explicit "no"; `Err` means the prompt was
/// interrupted (EOF or signal) and maps to [`PluginError::Cancelled`].
pub trait Prompter {
    fn confirm(&mut self, prompt: &str) -> PluginResult<bool>;
}

/// Flags accepted by the install flow.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Skip confirmation prompts and allow same-name replacement.
    pub force: bool,
    /// Restrict repository lookups to this registered repository.
    pub repository: Option<String>,
}

/// How an install attempt ended.
#[derive(Debug)]
pub enum InstallOutcome {
    /// The plugin was placed and registered.
    Installed {
        plugin: InstalledPlugin,
        /// The previously installed same-name plugin, when replaced.
        replaced: Option<InstalledPlugin>,
        /// Set when the replaced plugin's uninstall hook failed; the
        /// install still completed, but the process must exit non-zero.
        uninstall_hook_warning: Option<String>,
        /// Bytes downloaded, for remote sources.
        downloaded_bytes: Option<u64>,
    },
    /// The user answered "no" at a confirmation prompt; nothing changed.
    Declined,
}

/// How an uninstall ended.
#[derive(Debug)]
pub struct UninstallOutcome {
    pub plugin: InstalledPlugin,
    /// Set when the uninstall hook failed; removal still completed.
    pub hook_warning: Option<String>,
}

/// Sequences plugin installation against injected collaborators.
pub struct PluginInstaller<'a> {
    registry: &'a dyn PluginRegistry,
    executor: &'a dyn PluginExecutor,
    client: &'a dyn RepositoryClient,
    repositories: &'a [PluginRepository],
    builtins: &'a [String],
    plugins_dir: PathBuf,
    platform: String,
}

impl<'a> PluginInstaller<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a dyn PluginRegistry,
        executor: &'a dyn PluginExecutor,
        client: &'a dyn RepositoryClient,
        repositories: &'a [PluginRepository],
        builtins: &'a [String],
        plugins_dir: impl Into<PathBuf>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            executor,
            client,
            repositories,
            builtins,
            plugins_dir: plugins_dir.into(),
            platform: platform.into(),
        }
    }

    /// Run the full install state machine for `reference`.
    pub async fn install(
        &self,
        reference: &str,
        options: &InstallOptions,
        prompter: &mut dyn Prompter,
    ) -> PluginResult<InstallOutcome> {
        if !options.force
            && !prompter.confirm(&format!(
                "Do you want to install the plugin {reference}? [yN]: "
            ))?
        {
            return Ok(InstallOutcome::Declined);
        }

        let locator = PluginLocator::new(
            self.client,
            self.repositories,
            self.platform.clone(),
            self.plugins_dir.join("tmp"),
        );
        let located = locator.locate(reference, options.repository.as_deref()).await?;

        let metadata = self.executor.extract_metadata(located.path()).await?;
        if metadata.commands.is_empty() {
            debug!(path = %located.path().display(), "plugin declares no commands");
            return Err(PluginError::InvalidBinary { path: located.path().to_path_buf() });
        }

        let existing = self.registry.lookup(&metadata.name)?;
        if let Some(old) = &existing {
            if !options.force
                && !prompter.confirm(&format!(
                    "Plugin {} {} is already installed. Uninstall it and install {} {}? [yN]: ",
                    old.name,
                    old.display_version(),
                    metadata.name,
                    metadata.display_version(),
                ))?
            {
                return Ok(InstallOutcome::Declined);
            }
        }

        let conflicts = check_conflicts(
            &metadata,
            self.builtins,
            &self.registry.all()?,
            existing.as_ref().map(|p| p.name.as_str()),
        );
        if !conflicts.is_empty() {
            return Err(PluginError::Conflict(conflicts));
        }

        let destination = self.plugins_dir.join(executable_name(&metadata.name));
        if existing.is_none() && destination.exists() {
            return Err(PluginError::AlreadyExists {
                name: executable_name(&metadata.name),
            });
        }

        let mut uninstall_hook_warning = None;
        if let Some(old) = &existing {
            uninstall_hook_warning = self.remove_installed(old).await;
        }

        self.place_binary(&located, &destination)?;

        let plugin = InstalledPlugin {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            location: destination,
            commands: metadata.commands.clone(),
        };
        // Registering is the last mutation; everything before this line
        // is recoverable by re-running the install.
        self.registry.put(plugin.clone())?;

        Ok(InstallOutcome::Installed {
            plugin,
            replaced: existing,
            uninstall_hook_warning,
            downloaded_bytes: located.size,
        })
    }

    /// Remove an installed plugin by name, case-insensitively.
    pub async fn uninstall(&self, name: &str) -> PluginResult<UninstallOutcome> {
        let plugin = self
            .registry
            .lookup(name)?
            .ok_or_else(|| PluginError::NotInstalled { name: name.to_string() })?;

        let hook_warning = self.remove_installed(&plugin).await;
        Ok(UninstallOutcome { plugin, hook_warning })
    }

    /// Invoke the uninstall hook, delete the binary, drop the registry
    /// entry. Hook failure is advisory: reported, never blocking.
    async fn remove_installed(&self, plugin: &InstalledPlugin) -> Option<String> {
        let hook_warning = match self.executor.invoke_uninstall_hook(&plugin.location).await {
            Ok(()) => None,
            Err(e) => {
                warn!(plugin = %plugin.name, error = %e, "uninstall hook failed");
                Some(e.to_string())
            }
        };

        if let Err(e) = std::fs::remove_file(&plugin.location) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(plugin = %plugin.name, error = %e, "could not remove old binary");
            }
        }

        if let Err(e) = self.registry.remove(&plugin.name) {
            warn!(plugin = %plugin.name, error = %e, "could not remove registry entry");
        }

        hook_warning
    }

    /// Copy the candidate into the plugins directory under a staging
    /// name, mark it executable, then rename into place so a concurrent
    /// listing never observes a half-written executable.
    fn place_binary(&self, located: &LocatedBinary, destination: &Path) -> PluginResult<()> {
        std::fs::create_dir_all(&self.plugins_dir)?;
        let staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempfile_in(&self.plugins_dir)?;
        std::fs::copy(located.path(), staged.path())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(staged.path(), std::fs::Permissions::from_mode(0o755))?;
        }

        staged.persist(destination).map_err(|e| PluginError::Io(e.error))?;
        Ok(())
    }
}

/// File name an installed plugin executable gets, with the platform's
/// executable suffix where one exists.
pub fn executable_name(plugin_name: &str) -> String {
    format!("{plugin_name}{}", std::env::consts::EXE_SUFFIX)
}
