//! Plugin metadata, registry records, and repository listing models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Version string a plugin reports when it declares no version.
pub const UNSET_VERSION: &str = "0.0.0";

/// One command contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommand {
    /// The command name as typed by the user (e.g. "scale-all").
    pub name: String,
    /// Optional short alias for the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// One-line help text shown in listings.
    #[serde(default)]
    pub help_text: String,
}

impl PluginCommand {
    /// The alias, if one is declared and non-empty.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref().filter(|a| !a.is_empty())
    }
}

/// Metadata a candidate plugin binary reports about itself.
///
/// Extracted fresh on every install attempt; never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin name; must be non-empty for the plugin to be installable.
    pub name: String,
    /// Semantic version, or [`UNSET_VERSION`] when the plugin declares none.
    #[serde(default = "unset_version")]
    pub version: String,
    /// Commands the plugin contributes, in declaration order.
    #[serde(default)]
    pub commands: Vec<PluginCommand>,
}

impl PluginMetadata {
    /// Version for display: "N/A" when the plugin declared none.
    pub fn display_version(&self) -> &str {
        if self.version.is_empty() || self.version == UNSET_VERSION {
            "N/A"
        } else {
            &self.version
        }
    }
}

fn unset_version() -> String {
    UNSET_VERSION.to_string()
}

/// A successfully installed plugin as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    /// Plugin name; registry lookups compare it case-insensitively.
    pub name: String,
    /// Version recorded at install time.
    pub version: String,
    /// Resolved path of the installed executable.
    pub location: PathBuf,
    /// Commands the plugin contributes, in declaration order.
    pub commands: Vec<PluginCommand>,
}

impl InstalledPlugin {
    /// Version for display: "N/A" when the plugin declared none.
    pub fn display_version(&self) -> &str {
        if self.version.is_empty() || self.version == UNSET_VERSION {
            "N/A"
        } else {
            &self.version
        }
    }
}

/// One downloadable artifact in a repository listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRelease {
    /// Platform tag the artifact was built for (e.g. "linux64").
    pub platform: String,
    /// Download URL.
    pub url: String,
    /// Hex-encoded SHA-1 of the artifact bytes.
    #[serde(default)]
    pub checksum: String,
}

/// One plugin entry in a repository listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPlugin {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub binaries: Vec<BinaryRelease>,
}

impl RepositoryPlugin {
    /// The binary release published for `platform`, if any.
    pub fn binary_for_platform(&self, platform: &str) -> Option<&BinaryRelease> {
        self.binaries.iter().find(|b| b.platform == platform)
    }
}

/// Top-level document served by a plugin repository's `/list` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryListing {
    #[serde(default)]
    pub plugins: Vec<RepositoryPlugin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_listing_decodes_wire_format() {
        let doc = r#"{
            "plugins": [
                {
                    "name": "echo",
                    "description": "echoes things",
                    "version": "1.2.3",
                    "binaries": [
                        {"platform": "linux64", "url": "https://example.com/echo", "checksum": "abc123"}
                    ]
                }
            ]
        }"#;
        let listing: RepositoryListing = serde_json::from_str(doc).unwrap();
        assert_eq!(listing.plugins.len(), 1);
        let plugin = &listing.plugins[0];
        assert_eq!(plugin.name, "echo");
        assert_eq!(plugin.binary_for_platform("linux64").unwrap().checksum, "abc123");
        assert!(plugin.binary_for_platform("win64").is_none());
    }

    #[test]
    fn metadata_defaults_missing_fields() {
        let metadata: PluginMetadata = serde_json::from_str(r#"{"name": "bare"}"#).unwrap();
        assert_eq!(metadata.version, UNSET_VERSION);
        assert!(metadata.commands.is_empty());
        assert_eq!(metadata.display_version(), "N/A");
    }

    #[test]
    fn display_version_passes_real_versions_through() {
        let metadata: PluginMetadata =
            serde_json::from_str(r#"{"name": "v", "version": "2.0.1"}"#).unwrap();
        assert_eq!(metadata.display_version(), "2.0.1");
    }

    #[test]
    fn empty_alias_reads_as_none() {
        let command = PluginCommand {
            name: "scale".into(),
            alias: Some(String::new()),
            help_text: String::new(),
        };
        assert!(command.alias().is_none());
    }
}
