//! Candidate plugin conflict checking.
//!
//! A candidate command may collide with built-in commands or with the
//! commands and aliases of already-installed plugins. Collisions are
//! partitioned three ways: name-only, alias-only, and commands whose name
//! AND alias both collide — the last bucket is reported once with a
//! combined message, never duplicated into the single-kind buckets.

use std::collections::HashSet;
use std::fmt;

use strato_types::{InstalledPlugin, PluginMetadata};

/// Result of checking one candidate plugin, empty when installable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    /// Candidate command names that collide.
    pub names: Vec<String>,
    /// Candidate aliases that collide.
    pub aliases: Vec<String>,
    /// (name, alias) pairs where both sides of one command collide.
    pub both: Vec<(String, String)>,
}

impl ConflictSet {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.aliases.is_empty() && self.both.is_empty()
    }
}

impl fmt::Display for ConflictSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        for name in &self.names {
            lines.push(format!(
                "Command `{name}` in the plugin being installed is a command or alias already in use."
            ));
        }
        for alias in &self.aliases {
            lines.push(format!(
                "Alias `{alias}` in the plugin being installed is a command or alias already in use."
            ));
        }
        for (name, alias) in &self.both {
            lines.push(format!(
                "Command `{name}` and alias `{alias}` in the plugin being installed are commands or aliases already in use."
            ));
        }
        write!(f, "{}", lines.join("\n"))
    }
}

/// Check a candidate's commands against built-ins and installed plugins.
///
/// All comparisons are case-insensitive. When `replacing` names an
/// installed plugin, that plugin's own commands are excluded from the
/// taken set so a same-name reinstall does not conflict with itself.
pub fn check_conflicts(
    candidate: &PluginMetadata,
    builtins: &[String],
    installed: &[InstalledPlugin],
    replacing: Option<&str>,
) -> ConflictSet {
    let mut taken: HashSet<String> = builtins.iter().map(|n| n.to_lowercase()).collect();
    for plugin in installed {
        if replacing.is_some_and(|name| plugin.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        for command in &plugin.commands {
            taken.insert(command.name.to_lowercase());
            if let Some(alias) = command.alias() {
                taken.insert(alias.to_lowercase());
            }
        }
    }

    let mut conflicts = ConflictSet::default();
    for command in &candidate.commands {
        let name_taken = taken.contains(&command.name.to_lowercase());
        let alias_taken = command
            .alias()
            .is_some_and(|alias| taken.contains(&alias.to_lowercase()));

        match (name_taken, alias_taken) {
            (true, true) => conflicts
                .both
                .push((command.name.clone(), command.alias().unwrap_or_default().to_string())),
            (true, false) => conflicts.names.push(command.name.clone()),
            (false, true) => conflicts
                .aliases
                .push(command.alias().unwrap_or_default().to_string()),
            (false, false) => {}
        }
    }
    conflicts
}
