//! Server records shared by every source.
//!
//! A [`ServerRecord`] is assembled from up to three places: the structural
//! fields come from the ssh config (or the cloud descriptor for cloud
//! targets), and the annotation fields (`tags`, `last_seen_at`, `pinned_at`,
//! `use_count`) are overlaid from the metadata sidecar by the registry.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Port assumed when a host block has no usable `Port` directive.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Provenance tag for records parsed from the ssh config.
pub const SOURCE_SSH_CONFIG: &str = "ssh_config";

/// Provenance tag for records produced by the cloud descriptor.
pub const SOURCE_CLOUD_DESCRIPTOR: &str = "cloud_descriptor";

/// How a record is connected to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Plain ssh, described by a host block in the ssh config.
    #[default]
    Ssh,
    /// Cloud session target, described by the cloud descriptor.
    Cloud,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh => write!(f, "ssh"),
            Self::Cloud => write!(f, "cloud"),
        }
    }
}

/// Cloud-session fields. Only present on [`ConnectionType::Cloud`] records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudTarget {
    pub profile: String,
    pub region: String,
    /// Serialized tag filter expression (`Name=tag:Role,Values=web,api ...`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_filter: Option<String>,
    pub session_document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_parameters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single entry of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Unique key within the merged set.
    pub alias: String,
    /// Further concrete patterns from the same `Host` line.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub connection_type: ConnectionType,
    pub source: String,
    /// Basename of the originating file; empty for the primary config.
    #[serde(default)]
    pub group: String,

    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    pub port: u16,
    #[serde(default)]
    pub identity_files: Vec<String>,
    /// Directives the registry does not model, kept verbatim for rewrites.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudTarget>,

    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub use_count: u64,
}

impl Default for ServerRecord {
    fn default() -> Self {
        Self {
            alias: String::new(),
            aliases: Vec::new(),
            connection_type: ConnectionType::Ssh,
            source: SOURCE_SSH_CONFIG.to_string(),
            group: String::new(),
            host: String::new(),
            user: String::new(),
            port: DEFAULT_SSH_PORT,
            identity_files: Vec::new(),
            options: Vec::new(),
            cloud: None,
            tags: Vec::new(),
            last_seen_at: None,
            pinned_at: None,
            use_count: 0,
        }
    }
}

impl ServerRecord {
    /// New ssh record in the primary config.
    pub fn ssh(alias: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.connection_type == ConnectionType::Cloud
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_at.is_some()
    }

    /// Compare only the fields that are written to the ssh config.
    pub fn same_structure(&self, other: &Self) -> bool {
        self.alias == other.alias
            && self.aliases == other.aliases
            && self.host == other.host
            && self.user == other.user
            && self.effective_port() == other.effective_port()
            && self.identity_files == other.identity_files
            && self.options == other.options
    }

    /// Port with `0` (unset) mapped to the ssh default.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.port
        }
    }

    /// Case-insensitive match against alias, host, user and tags.
    ///
    /// `needle` must already be lower-cased.
    pub fn matches_query(&self, needle: &str) -> bool {
        let contains = |field: &str| field.to_lowercase().contains(needle);
        contains(&self.alias)
            || self.aliases.iter().any(|a| contains(a))
            || contains(&self.host)
            || contains(&self.user)
            || self.tags.iter().any(|t| contains(t))
    }
}

/// Secondary ordering used after pinned records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Alias,
    LastSeen,
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alias => write!(f, "alias"),
            Self::LastSeen => write!(f, "last seen"),
        }
    }
}

/// Order records for presentation.
///
/// Pinned records always come first, most recently pinned on top. The rest
/// are ordered by `field`; `reverse` flips only that secondary ordering.
/// Records that were never seen sort after seen ones when ordering by
/// [`SortField::LastSeen`].
pub fn sort_for_display(records: &mut [ServerRecord], field: SortField, reverse: bool) {
    records.sort_by(|a, b| {
        match (a.pinned_at, b.pinned_at) {
            (Some(pa), Some(pb)) => return pb.cmp(&pa),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }

        let ordering = match field {
            SortField::Alias => a.alias.cmp(&b.alias),
            // Most recent first, never-seen last.
            SortField::LastSeen => match (a.last_seen_at, b.last_seen_at) {
                (Some(la), Some(lb)) => lb.cmp(&la),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.alias.cmp(&b.alias)),
        };

        if reverse { ordering.reverse() } else { ordering }
    });
}
