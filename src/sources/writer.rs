//! Writing structural records back to the ssh config.
//!
//! Records are regrouped by the file they came from and each changed file is
//! replaced atomically (temp file, fsync, rename). The primary config is
//! copied to a timestamped backup before every replacement and only the most
//! recent [`MAX_BACKUPS`] backups are kept.
//!
//! Layout of a rendered file:
//!
//! ```text
//! Include conf.d/*            <- verbatim include lines
//! ServerAliveInterval 60      <- verbatim global directives
//!
//! # Managed by hostbook
//! Host web1
//!     HostName 10.0.0.1
//!     User ubuntu
//!     Port 2222
//!     IdentityFile ~/.ssh/id_ed25519
//!
//! Host *                      <- verbatim wildcard/Match blocks
//!     ForwardAgent no
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::ssh_config::{ConfigSnapshot, SshConfigError, Verbatim};
use crate::fsutil::{remove_if_exists, write_atomic};
use crate::model::{DEFAULT_SSH_PORT, ServerRecord};

/// Comment placed above every block the registry writes.
pub const MANAGED_BY_COMMENT: &str = "# Managed by hostbook";

/// Indentation of directives inside a host block.
pub const INDENT: &str = "    ";

/// Number of primary-config backups retained.
pub const MAX_BACKUPS: usize = 10;

/// Suffix shared by all backup file names.
pub const BACKUP_SUFFIX: &str = "hostbook.backup";

/// What a write touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub backup: Option<PathBuf>,
}

impl WriteReport {
    pub fn is_noop(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

/// Render one file's worth of records.
pub fn render_file(records: &[ServerRecord], verbatim: Option<&Verbatim>) -> String {
    let mut sections: Vec<String> = Vec::new();

    if let Some(verbatim) = verbatim {
        let head: Vec<&str> = verbatim
            .includes
            .iter()
            .chain(verbatim.globals.iter())
            .map(String::as_str)
            .collect();
        if !head.is_empty() {
            sections.push(lines_to_section(&head));
        }
    }

    sections.extend(records.iter().map(render_host_block));

    if let Some(verbatim) = verbatim {
        for block in &verbatim.unmanaged_blocks {
            let lines: Vec<&str> = block.iter().map(String::as_str).collect();
            sections.push(lines_to_section(&lines));
        }
    }

    sections.join("\n")
}

fn lines_to_section(lines: &[&str]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Render a single managed host block.
pub fn render_host_block(record: &ServerRecord) -> String {
    let mut out = String::new();
    out.push_str(MANAGED_BY_COMMENT);
    out.push('\n');

    out.push_str("Host ");
    out.push_str(&record.alias);
    for alias in &record.aliases {
        out.push(' ');
        out.push_str(alias);
    }
    out.push('\n');

    let mut field = |key: &str, value: &str| {
        out.push_str(INDENT);
        out.push_str(key);
        out.push(' ');
        out.push_str(value);
        out.push('\n');
    };

    if !record.host.is_empty() {
        field("HostName", &record.host);
    }
    if !record.user.is_empty() {
        field("User", &record.user);
    }
    if record.port != 0 && record.port != DEFAULT_SSH_PORT {
        field("Port", &record.port.to_string());
    }
    for identity in &record.identity_files {
        field("IdentityFile", identity);
    }

    for option in &record.options {
        out.push_str(INDENT);
        out.push_str(option);
        out.push('\n');
    }

    out
}

/// Regroups records by file and rewrites what changed.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    backups: BackupManager,
}

impl ConfigWriter {
    pub fn new(primary: &Path) -> Self {
        Self {
            backups: BackupManager::new(primary),
        }
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Write `records` against the layout captured in `snapshot`.
    ///
    /// Only groups whose records differ from the snapshot are rewritten. A
    /// non-primary group left without records and without verbatim content
    /// has its file removed. The primary file is never removed, and a
    /// non-primary group that resolves to the primary's path is an error.
    pub fn write_groups(
        &self,
        snapshot: &ConfigSnapshot,
        records: &[ServerRecord],
    ) -> Result<WriteReport, SshConfigError> {
        let mut report = WriteReport::default();
        let groups = group_in_order(snapshot, records);

        // Checked before any file is touched.
        for (group, _) in &groups {
            if !group.is_empty() && snapshot.path_for_group(group) == snapshot.primary {
                return Err(SshConfigError::GroupShadowsPrimary {
                    group: group.clone(),
                    path: snapshot.primary.clone(),
                });
            }
        }

        for (group, group_records) in groups {
            let previous = snapshot.file_for_group(&group);
            let unchanged = previous.is_some_and(|loaded| {
                loaded.records.len() == group_records.len()
                    && loaded
                        .records
                        .iter()
                        .zip(&group_records)
                        .all(|(old, new)| old.same_structure(new))
            });
            if unchanged {
                continue;
            }

            let path = snapshot.path_for_group(&group);
            let verbatim = snapshot.verbatim_for(&path);
            let has_verbatim = verbatim.is_some_and(|v| !v.is_empty());

            if group_records.is_empty() && !group.is_empty() && !has_verbatim {
                if previous.is_some() {
                    remove_if_exists(&path).map_err(|source| SshConfigError::Remove {
                        path: path.clone(),
                        source,
                    })?;
                    tracing::info!(path = %path.display(), group = %group, "removed empty ssh config group");
                    report.removed.push(path);
                }
                continue;
            }

            let content = render_file(&group_records, verbatim);

            if group.is_empty() {
                report.backup = self
                    .backups
                    .backup()
                    .map_err(|source| SshConfigError::Backup {
                        path: path.clone(),
                        source,
                    })?;
            }

            write_atomic(&path, content.as_bytes()).map_err(|source| SshConfigError::Write {
                path: path.clone(),
                source,
            })?;
            tracing::info!(
                path = %path.display(),
                hosts = group_records.len(),
                "ssh config updated"
            );
            report.written.push(path);
        }

        Ok(report)
    }
}

/// Partition records by group: primary first, then groups in snapshot order,
/// then groups the snapshot has not seen, in record order.
fn group_in_order(
    snapshot: &ConfigSnapshot,
    records: &[ServerRecord],
) -> Vec<(String, Vec<ServerRecord>)> {
    let mut groups: Vec<(String, Vec<ServerRecord>)> = vec![(String::new(), Vec::new())];
    for loaded in &snapshot.files {
        if !groups.iter().any(|(g, _)| *g == loaded.file.group) {
            groups.push((loaded.file.group.clone(), Vec::new()));
        }
    }

    for record in records {
        match groups.iter_mut().find(|(g, _)| *g == record.group) {
            Some((_, list)) => list.push(record.clone()),
            None => groups.push((record.group.clone(), vec![record.clone()])),
        }
    }

    groups
}

/// Timestamped copies of the primary config.
///
/// Backups live next to the primary and are named
/// `<primary>-<unix millis>-hostbook.backup`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    primary: PathBuf,
    max_backups: usize,
}

impl BackupManager {
    pub fn new(primary: &Path) -> Self {
        Self {
            primary: primary.to_path_buf(),
            max_backups: MAX_BACKUPS,
        }
    }

    /// Override the retention cap.
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }

    fn dir(&self) -> &Path {
        self.primary.parent().unwrap_or_else(|| Path::new("."))
    }

    fn file_prefix(&self) -> String {
        let name = self
            .primary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config".to_string());
        format!("{name}-")
    }

    fn is_backup_name(&self, name: &str) -> bool {
        name.starts_with(&self.file_prefix()) && name.ends_with(&format!("-{BACKUP_SUFFIX}"))
    }

    /// Copy the current primary to a new backup and prune old ones.
    ///
    /// Returns `None` when there is no primary to back up yet.
    pub fn backup(&self) -> io::Result<Option<PathBuf>> {
        match fs::metadata(&self.primary) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        }

        let mut millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let prefix = self.file_prefix();
        let mut path = self.dir().join(format!("{prefix}{millis}-{BACKUP_SUFFIX}"));
        // Two rewrites within one millisecond must not share a backup.
        while path.exists() {
            millis += 1;
            path = self.dir().join(format!("{prefix}{millis}-{BACKUP_SUFFIX}"));
        }

        fs::copy(&self.primary, &path)?;
        tracing::info!(backup = %path.display(), "created ssh config backup");

        self.prune()?;
        Ok(Some(path))
    }

    /// Backups of the primary, newest first.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();

        for entry in fs::read_dir(self.dir())? {
            let entry = entry?;
            let name = entry.file_name();
            if !self.is_backup_name(&name.to_string_lossy()) {
                continue;
            }
            match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => backups.push((modified, entry.path())),
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "skipping backup without mtime");
                }
            }
        }

        // Newest first; the embedded timestamp breaks mtime ties.
        backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(backups.into_iter().map(|(_, path)| path).collect())
    }

    /// Delete all but the newest `max_backups` backups. Returns what was removed.
    pub fn prune(&self) -> io::Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for path in self.list()?.into_iter().skip(self.max_backups) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(backup = %path.display(), "removed old ssh config backup");
                    removed.push(path);
                }
                Err(err) => {
                    tracing::warn!(backup = %path.display(), error = %err, "failed to remove old backup");
                }
            }
        }
        Ok(removed)
    }
}
