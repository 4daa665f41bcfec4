//! JSON sidecar of per-alias annotations.
//!
//! The ssh config has no room for tags, pin state or usage counters, so they
//! live in a flat JSON object keyed by alias:
//!
//! ```json
//! {
//!   "web1": { "tags": ["prod"], "last_seen": "2024-05-01T10:00:00.000Z", "ssh_count": 3 },
//!   "db1":  { "pinned_at": "2024-05-02T08:30:00.000Z" }
//! }
//! ```
//!
//! Empty and absent fields are omitted rather than written as `null`. Every
//! mutation is load, modify, save; entries are created on demand.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsutil::write_atomic;
use crate::model::ServerRecord;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("failed to read metadata {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write metadata {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("malformed metadata {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Annotations stored for one alias.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// RFC 3339 timestamp of the last recorded use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    /// RFC 3339 timestamp of when the alias was pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_at: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ssh_count: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl ServerMetadata {
    /// Copy the annotations onto `record`.
    ///
    /// Structural fields are never touched. A stored timestamp that does not
    /// parse is left absent.
    pub fn apply_to(&self, record: &mut ServerRecord) {
        record.tags = self.tags.clone();
        record.use_count = self.ssh_count;
        record.last_seen_at = parse_timestamp(&record.alias, "last_seen", self.last_seen.as_deref());
        record.pinned_at = parse_timestamp(&record.alias, "pinned_at", self.pinned_at.as_deref());
    }
}

pub type MetadataMap = BTreeMap<String, ServerMetadata>;

/// Canonical textual form for stored timestamps.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(alias: &str, field: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(err) => {
            tracing::warn!(alias, field, value, error = %err, "ignoring unparseable timestamp");
            None
        }
    }
}

/// Overlay annotations onto merged records.
///
/// Every record's `last_seen_at` is reset first so that only the sidecar
/// can supply it.
pub fn overlay(records: &mut [ServerRecord], metadata: &MetadataMap) {
    for record in records.iter_mut() {
        record.last_seen_at = None;
        if let Some(meta) = metadata.get(&record.alias) {
            meta.apply_to(record);
        }
    }
}

/// File-backed store for [`MetadataMap`].
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the sidecar. A missing or blank file is an empty map.
    pub fn load(&self) -> Result<MetadataMap, MetadataError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(MetadataMap::new()),
            Err(source) => {
                return Err(MetadataError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(MetadataMap::new());
        }
        serde_json::from_str(&content).map_err(|source| MetadataError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the sidecar with `map`.
    pub fn save(&self, map: &MetadataMap) -> Result<(), MetadataError> {
        let mut json = serde_json::to_string_pretty(map).map_err(|source| MetadataError::Parse {
            path: self.path.clone(),
            source,
        })?;
        json.push('\n');
        write_atomic(&self.path, json.as_bytes()).map_err(|source| MetadataError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), entries = map.len(), "metadata saved");
        Ok(())
    }

    fn modify<F>(&self, f: F) -> Result<(), MetadataError>
    where
        F: FnOnce(&mut MetadataMap),
    {
        let mut map = self.load()?;
        f(&mut map);
        self.save(&map)
    }

    /// Pin (now) or unpin `alias`.
    pub fn set_pinned(&self, alias: &str, pinned: bool) -> Result<(), MetadataError> {
        self.set_pinned_at(alias, pinned, Utc::now())
    }

    fn set_pinned_at(&self, alias: &str, pinned: bool, now: DateTime<Utc>) -> Result<(), MetadataError> {
        self.modify(|map| {
            let entry = map.entry(alias.to_string()).or_default();
            entry.pinned_at = pinned.then(|| format_timestamp(now));
        })
    }

    /// Stamp `alias` as used now and bump its counter.
    pub fn record_use(&self, alias: &str) -> Result<(), MetadataError> {
        self.record_use_at(alias, Utc::now())
    }

    fn record_use_at(&self, alias: &str, now: DateTime<Utc>) -> Result<(), MetadataError> {
        self.modify(|map| {
            let entry = map.entry(alias.to_string()).or_default();
            entry.last_seen = Some(format_timestamp(now));
            entry.ssh_count = entry.ssh_count.saturating_add(1);
        })
    }

    /// Store the tags and last-seen time carried by `record`.
    ///
    /// Pin state and the use counter of an existing entry are kept.
    pub fn upsert(&self, record: &ServerRecord) -> Result<(), MetadataError> {
        self.modify(|map| {
            let entry = map.entry(record.alias.clone()).or_default();
            entry.tags = record.tags.clone();
            entry.last_seen = record.last_seen_at.map(format_timestamp);
        })
    }

    /// Drop the entry for `alias`, if any.
    pub fn remove(&self, alias: &str) -> Result<(), MetadataError> {
        let mut map = self.load()?;
        if map.remove(alias).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }

    /// Move the entry for `from` to `to`, replacing whatever `to` had.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), MetadataError> {
        if from == to {
            return Ok(());
        }
        let mut map = self.load()?;
        if let Some(entry) = map.remove(from) {
            map.insert(to.to_string(), entry);
            self.save(&map)?;
        }
        Ok(())
    }
}
