//! Readers and writers for the stores that feed the registry.
//!
//! # Architecture
//!
//! - **locator**: finds the primary ssh config and the files its `Include` lines match
//! - **ssh_config**: parses each file into host records plus verbatim content
//! - **writer**: regroups records by file, rewrites atomically, rotates backups
//! - **cloud**: turns the YAML cloud descriptor into read-only records
//!
//! ```text
//! ~/.ssh/config ──locator──> [config, conf.d/work, conf.d/home]
//!                                 │
//!                            ssh_config ──> ConfigSnapshot ──writer──> files + backups
//!
//! cloud-servers.yaml ──cloud──> Vec<ServerRecord> (connection_type = cloud)
//! ```
//!
//! The metadata sidecar is handled by [`crate::metadata`]; merging all three
//! happens in [`crate::registry`].

pub mod cloud;
pub mod locator;
pub mod ssh_config;
pub mod writer;

pub use cloud::{CloudDescriptor, CloudError, load_cloud_records};
pub use locator::{ConfigFile, locate_config_files};
pub use ssh_config::{
    ConfigSnapshot, LoadedFile, ParsedFile, SshConfigError, Verbatim, load_structural,
    parse_config_file, parse_config_str,
};
pub use writer::{BackupManager, ConfigWriter, MAX_BACKUPS, WriteReport, render_file};
