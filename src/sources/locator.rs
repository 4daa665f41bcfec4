//! Discovery of the files that make up the ssh configuration.
//!
//! The primary config is always the first entry (group `""`). Each
//! `Include` directive in the primary is expanded as a glob relative to the
//! primary's directory and every match becomes its own group, named after the
//! matched file's basename. Includes inside included files are not followed.
//! Group names are unique: a later match whose basename is already taken is
//! logged and left out, so it is never read or rewritten.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::ssh_config::{self, INCLUDE_DIRECTIVE};
use crate::fsutil::expand_tilde;

/// One file taking part in the ssh configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    /// Basename of `path` for included files, empty for the primary.
    pub group: String,
}

impl ConfigFile {
    pub fn primary(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            group: String::new(),
        }
    }

    pub fn is_primary(&self) -> bool {
        self.group.is_empty()
    }
}

/// List the primary config followed by every file its `Include` lines match.
///
/// A missing primary is not an error; it yields only the primary entry so a
/// first save can create it. Bad glob patterns and unreadable matches are
/// skipped.
pub fn locate_config_files(primary: &Path) -> io::Result<Vec<ConfigFile>> {
    let mut files = vec![ConfigFile::primary(primary)];

    let content = match fs::read_to_string(primary) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(files),
        Err(err) => return Err(err),
    };

    let base_dir = primary.parent().unwrap_or_else(|| Path::new("."));

    for line in content.lines() {
        let Some((key, value)) = ssh_config::split_directive(line) else {
            continue;
        };
        if key != INCLUDE_DIRECTIVE {
            continue;
        }

        // OpenSSH accepts several patterns on a single Include line.
        for pattern in value.split_whitespace() {
            for path in expand_include(base_dir, pattern) {
                if path == primary || files.iter().any(|f| f.path == path) {
                    continue;
                }
                let group = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if group.is_empty() {
                    continue;
                }
                if let Some(taken) = files.iter().find(|f| f.group == group) {
                    tracing::warn!(
                        path = %path.display(),
                        group = %group,
                        taken_by = %taken.path.display(),
                        "skipping included ssh config with a duplicate file name"
                    );
                    continue;
                }
                tracing::debug!(path = %path.display(), group = %group, "found included ssh config");
                files.push(ConfigFile { path, group });
            }
        }
    }

    Ok(files)
}

/// Expand one include pattern into the regular files it matches, in glob order.
fn expand_include(base_dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let expanded = expand_tilde(pattern);
    let full = if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    };

    let Some(full_str) = full.to_str() else {
        tracing::warn!(pattern = %pattern, "skipping non UTF-8 include pattern");
        return Vec::new();
    };

    let paths = match glob::glob(full_str) {
        Ok(paths) => paths,
        Err(err) => {
            tracing::warn!(pattern = %pattern, error = %err, "skipping invalid include pattern");
            return Vec::new();
        }
    };

    paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable include match");
                None
            }
        })
        .filter(|path| path.is_file())
        .collect()
}
