//! Plugin subsystem error types.

use std::path::PathBuf;

use crate::conflicts::ConflictSet;

/// Errors from plugin operations.
///
/// Lower layers return these without printing anything; only the CLI
/// turns them into user-facing text and an exit code.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// An explicitly named repository is not registered.
    #[error("plugin repository '{name}' is not registered")]
    RepositoryNotFound {
        /// The repository name the user asked for.
        name: String,
    },

    /// A repository could not be listed (network or decode failure).
    #[error("Could not get plugin repository '{name}': {detail}")]
    RepositoryUnreachable {
        /// The repository that failed.
        name: String,
        /// Underlying failure description.
        detail: String,
    },

    /// No registered repository lists a plugin with this name.
    #[error("plugin '{name}' was not found in any registered repository")]
    PluginNotFound {
        /// The plugin name the user asked for.
        name: String,
    },

    /// The plugin exists but publishes no binary for this platform.
    #[error("plugin '{name}' has no binary available for platform '{platform}'")]
    PluginNotFoundForPlatform {
        /// The plugin name.
        name: String,
        /// The platform tag that had no matching binary.
        platform: String,
    },

    /// The named plugin is not installed.
    #[error("plugin '{name}' is not installed")]
    NotInstalled {
        /// The plugin name the user asked for.
        name: String,
    },

    /// A file is already present at the install destination without a
    /// matching registry entry.
    #[error("the file {name} already exists under the plugin directory")]
    AlreadyExists {
        /// The executable file name.
        name: String,
    },

    /// The candidate binary is not a usable plugin (bad exit, timeout, or
    /// undecodable metadata output).
    #[error("{path} is not a valid plugin binary")]
    InvalidBinary {
        /// Path of the rejected binary.
        path: PathBuf,
    },

    /// The downloaded bytes do not match the repository's checksum.
    #[error("checksum mismatch for plugin '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The plugin whose download failed verification.
        name: String,
        /// Checksum published by the repository.
        expected: String,
        /// Checksum of the downloaded bytes.
        actual: String,
    },

    /// Candidate command names or aliases collide with existing ones.
    #[error("{0}")]
    Conflict(ConflictSet),

    /// A download failed.
    #[error("download from {url} failed: {detail}")]
    Download {
        /// The URL that failed.
        url: String,
        /// Underlying failure description.
        detail: String,
    },

    /// The old plugin's uninstall hook failed; advisory, not blocking.
    #[error("uninstall hook failed: {detail}")]
    UninstallHookFailed {
        /// Exit status or timeout description.
        detail: String,
    },

    /// The user interrupted a confirmation prompt (EOF or signal).
    #[error("installation cancelled")]
    Cancelled,

    /// Registry file could not be read or written.
    #[error("plugin registry error at {path}: {detail}")]
    Registry {
        /// Path of the registry file.
        path: PathBuf,
        /// Error description.
        detail: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
