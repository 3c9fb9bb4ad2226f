//! Shared type definitions for the Strato CLI.
//!
//! Two families of types live here:
//!
//! - plugin metadata and repository listing models ([`plugin`]), exchanged
//!   as JSON with plugin binaries and plugin repositories
//! - the event envelope union ([`events`]), the binary wire format carried
//!   by the platform's log/metric firehose

pub mod events;
pub mod plugin;

pub use events::{ContainerMetric, Envelope, EventType, LogMessage, LogMessageType};
pub use plugin::{
    BinaryRelease, InstalledPlugin, PluginCommand, PluginMetadata, RepositoryListing,
    RepositoryPlugin,
};
