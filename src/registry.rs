//! Merged view over the ssh config, the cloud descriptor and the metadata
//! sidecar.
//!
//! # Architecture
//!
//! ```text
//!            list(query)                      add / update / delete
//!                │                                    │
//!   load_structural ─┐                       load_structural (fresh)
//!   load_cloud_records ─┤ (if enabled,            │ apply change
//!                    │   failures degrade)        ▼
//!   concat, dedupe by alias                ConfigWriter::write_groups
//!   overlay metadata (failures degrade)          │
//!   filter by query                        MetadataStore (upsert/rename/remove)
//! ```
//!
//! Every operation reads the stores fresh; the only state kept between calls
//! is the [`ConfigSnapshot`] of the last load, which tells the writer where
//! each group lives and what verbatim content to reproduce. Cloud records are
//! never written back.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{ConfigError, Paths, Settings};
use crate::fsutil::write_atomic;
use crate::metadata::{self, MetadataError, MetadataMap, MetadataStore};
use crate::model::{ConnectionType, SOURCE_SSH_CONFIG, ServerRecord};
use crate::sources::cloud::{self, CloudError};
use crate::sources::ssh_config::{self, ConfigSnapshot, SshConfigError};
use crate::sources::writer::{BackupManager, ConfigWriter};
use crate::validate::{ValidationError, validate_new_group, validate_record};

/// Failures surfaced by registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("server '{0}' not found")]
    NotFound(String),

    #[error("server '{0}' already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Parse(String),
}

impl From<SshConfigError> for RegistryError {
    fn from(err: SshConfigError) -> Self {
        match err {
            SshConfigError::GroupShadowsPrimary { group, .. } => {
                Self::Validation(ValidationError::InvalidGroup {
                    group,
                    reason: "names the primary config",
                })
            }
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<MetadataError> for RegistryError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Parse { .. } => Self::Parse(err.to_string()),
            MetadataError::Read { .. } | MetadataError::Write { .. } => Self::Io(err.to_string()),
        }
    }
}

impl From<CloudError> for RegistryError {
    fn from(err: CloudError) -> Self {
        match err {
            CloudError::InvalidEntry { alias, reason } => {
                Self::Validation(ValidationError::CloudEntry { alias, reason })
            }
            other @ CloudError::Parse(_) => Self::Parse(other.to_string()),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<ConfigError> for RegistryError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Parse { .. } | ConfigError::Serialize(_) => Self::Parse(err.to_string()),
            ConfigError::Read { .. } | ConfigError::Write { .. } | ConfigError::NoHomeDir => {
                Self::Io(err.to_string())
            }
        }
    }
}

/// The server registry.
#[derive(Debug)]
pub struct Registry {
    paths: Paths,
    writer: ConfigWriter,
    metadata: MetadataStore,
    snapshot: ConfigSnapshot,
}

impl Registry {
    pub fn new(paths: Paths) -> Self {
        Self {
            writer: ConfigWriter::new(&paths.ssh_config),
            metadata: MetadataStore::new(&paths.metadata),
            snapshot: ConfigSnapshot::empty(&paths.ssh_config),
            paths,
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn backups(&self) -> &BackupManager {
        self.writer.backups()
    }

    /// Layout of the ssh config as of the last load.
    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    /// All records matching `query`, annotations applied.
    ///
    /// The query is a case-insensitive substring of alias, host, user or any
    /// tag; an empty query matches everything. Cloud and metadata failures
    /// are logged and the listing continues without them.
    pub fn list(&mut self, query: &str) -> Result<Vec<ServerRecord>, RegistryError> {
        let mut records = self.reload()?;

        let settings = self.settings();
        if settings.enable_cloud_source {
            records.extend(self.cloud_records(&settings));
        }

        let mut records = dedupe_by_alias(records);
        metadata::overlay(&mut records, &self.metadata_or_empty());

        let needle = query.trim().to_lowercase();
        if !needle.is_empty() {
            records.retain(|r| r.matches_query(&needle));
        }
        Ok(records)
    }

    /// Add a new ssh record to the file of its `group`.
    ///
    /// A group no loaded file carries gets a new file next to the primary;
    /// its name must be a plain file name that is not the primary's own.
    pub fn add(&mut self, record: ServerRecord) -> Result<(), RegistryError> {
        validate_record(&record)?;

        let mut records = self.reload()?;
        if records.iter().any(|r| r.alias == record.alias) {
            return Err(RegistryError::AlreadyExists(record.alias));
        }
        if !record.group.is_empty() && self.snapshot.file_for_group(&record.group).is_none() {
            validate_new_group(&record.group, &self.paths.ssh_config)?;
        }

        let record = as_structural(record);
        records.push(record.clone());
        self.persist(&records)?;

        self.metadata.upsert(&record)?;
        tracing::info!(alias = %record.alias, group = %record.group, "server added");
        Ok(())
    }

    /// Replace the record with `old`'s alias by `new`.
    ///
    /// The record stays in its group. Changing the alias is allowed when no
    /// other ssh record uses the new one; annotations follow the rename.
    pub fn update(&mut self, old: &ServerRecord, new: ServerRecord) -> Result<(), RegistryError> {
        if old.is_cloud() || new.is_cloud() {
            return Err(ValidationError::CloudRecord(old.alias.clone()).into());
        }
        validate_record(&new)?;

        let mut records = self.reload()?;
        let Some(index) = records.iter().position(|r| r.alias == old.alias) else {
            return Err(self.missing(&old.alias));
        };
        if new.alias != old.alias && records.iter().any(|r| r.alias == new.alias) {
            return Err(RegistryError::AlreadyExists(new.alias));
        }

        let mut updated = as_structural(new);
        updated.group = records[index].group.clone();
        records[index] = updated.clone();
        self.persist(&records)?;

        self.metadata.rename(&old.alias, &updated.alias)?;
        self.metadata.upsert(&updated)?;
        tracing::info!(alias = %old.alias, new_alias = %updated.alias, "server updated");
        Ok(())
    }

    /// Remove every ssh record with `record`'s alias and its annotations.
    pub fn delete(&mut self, record: &ServerRecord) -> Result<(), RegistryError> {
        if record.is_cloud() {
            return Err(ValidationError::CloudRecord(record.alias.clone()).into());
        }

        let mut records = self.reload()?;
        let before = records.len();
        records.retain(|r| r.alias != record.alias);
        if records.len() == before {
            return Err(self.missing(&record.alias));
        }

        self.persist(&records)?;
        self.metadata.remove(&record.alias)?;
        tracing::info!(alias = %record.alias, "server deleted");
        Ok(())
    }

    pub fn set_pinned(&self, alias: &str, pinned: bool) -> Result<(), RegistryError> {
        Ok(self.metadata.set_pinned(alias, pinned)?)
    }

    pub fn record_use(&self, alias: &str) -> Result<(), RegistryError> {
        Ok(self.metadata.record_use(alias)?)
    }

    pub fn cloud_source_enabled(&self) -> bool {
        self.settings().enable_cloud_source
    }

    pub fn set_cloud_source_enabled(&self, enabled: bool) -> Result<(), RegistryError> {
        self.modify_settings(|s| s.enable_cloud_source = enabled)
    }

    /// Descriptor location currently in effect.
    pub fn cloud_descriptor_path(&self) -> PathBuf {
        self.settings().cloud_descriptor_path(&self.paths)
    }

    pub fn set_cloud_descriptor_path(&self, path: &Path) -> Result<(), RegistryError> {
        let value = path.to_string_lossy().into_owned();
        self.modify_settings(|s| s.cloud_servers_path = Some(value))
    }

    pub fn cloud_descriptor_exists(&self) -> bool {
        self.cloud_descriptor_path().is_file()
    }

    /// Load the descriptor without the fallbacks `list` applies.
    pub fn cloud_servers(&self) -> Result<Vec<ServerRecord>, RegistryError> {
        Ok(cloud::load_cloud_records(&self.cloud_descriptor_path())?)
    }

    /// Write a commented sample descriptor unless one already exists.
    ///
    /// Returns whether a file was created.
    pub fn init_cloud_descriptor(&self) -> Result<bool, RegistryError> {
        let path = self.cloud_descriptor_path();
        if path.exists() {
            return Ok(false);
        }
        write_atomic(&path, cloud::SAMPLE_DESCRIPTOR.as_bytes()).map_err(|e| {
            RegistryError::Io(format!("failed to write {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "created sample cloud descriptor");
        Ok(true)
    }

    fn reload(&mut self) -> Result<Vec<ServerRecord>, RegistryError> {
        self.snapshot = ssh_config::load_structural(&self.paths.ssh_config)?;
        Ok(self.snapshot.records())
    }

    /// Write `records` and refresh the snapshot to match the disk.
    fn persist(&mut self, records: &[ServerRecord]) -> Result<(), RegistryError> {
        let report = self.writer.write_groups(&self.snapshot, records)?;
        if report.is_noop() {
            tracing::debug!("ssh config unchanged");
        }
        if let Some(backup) = &report.backup {
            tracing::debug!(backup = %backup.display(), "ssh config backed up");
        }
        self.reload()?;
        Ok(())
    }

    /// Error for an alias that is not an ssh record.
    fn missing(&self, alias: &str) -> RegistryError {
        let settings = self.settings();
        if settings.enable_cloud_source
            && self
                .cloud_records(&settings)
                .iter()
                .any(|r| r.alias == alias)
        {
            return ValidationError::CloudRecord(alias.to_string()).into();
        }
        RegistryError::NotFound(alias.to_string())
    }

    fn settings(&self) -> Settings {
        Settings::load_or_default(&self.paths.settings_file())
    }

    fn modify_settings<F>(&self, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Settings),
    {
        let file = self.paths.settings_file();
        let mut settings = Settings::load(&file)?;
        f(&mut settings);
        settings.save(&file)?;
        Ok(())
    }

    fn cloud_records(&self, settings: &Settings) -> Vec<ServerRecord> {
        let path = settings.cloud_descriptor_path(&self.paths);
        match cloud::load_cloud_records(&path) {
            Ok(records) => records,
            Err(CloudError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no cloud descriptor");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping cloud servers");
                Vec::new()
            }
        }
    }

    fn metadata_or_empty(&self) -> MetadataMap {
        self.metadata.load().unwrap_or_else(|err| {
            tracing::warn!(path = %self.metadata.path().display(), error = %err, "ignoring metadata");
            MetadataMap::new()
        })
    }
}

fn as_structural(mut record: ServerRecord) -> ServerRecord {
    record.connection_type = ConnectionType::Ssh;
    record.source = SOURCE_SSH_CONFIG.to_string();
    record.cloud = None;
    record
}

/// Keep the first record per alias.
fn dedupe_by_alias(records: Vec<ServerRecord>) -> Vec<ServerRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            let fresh = seen.insert(r.alias.clone());
            if !fresh {
                tracing::warn!(alias = %r.alias, source = %r.source, group = %r.group, "dropping duplicate alias");
            }
            fresh
        })
        .collect()
}
