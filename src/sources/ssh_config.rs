//! Parser for OpenSSH client configuration files.
//!
//! Only concrete `Host` blocks become registry records. Everything the
//! registry cannot edit is still captured verbatim so that a rewrite
//! reproduces it:
//!
//! - `Include` lines, kept per file in their original form
//! - global directives that appear before the first `Host`
//! - wildcard `Host` blocks and `Match` blocks
//! - unknown directives inside editable blocks (kept on the record)
//!
//! Comments survive a rewrite only inside wildcard `Host` and `Match`
//! blocks. Comments before the first `Host` or inside editable blocks are
//! not kept, and the writer adds its own `# Managed by hostbook` header.
//!
//! ```text
//! Include conf.d/*            -> Verbatim::includes
//! ServerAliveInterval 60      -> Verbatim::globals
//! Host web1 web1.internal     -> ServerRecord { alias: "web1", aliases: ["web1.internal"] }
//!     HostName 10.0.0.1
//!     ProxyJump bastion       -> ServerRecord::options
//! Host *                      -> Verbatim::unmanaged_blocks
//!     ForwardAgent no
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::locator::{ConfigFile, locate_config_files};
use crate::model::{DEFAULT_SSH_PORT, ServerRecord, SOURCE_SSH_CONFIG};

pub const HOST_DIRECTIVE: &str = "host";
pub const MATCH_DIRECTIVE: &str = "match";
pub const INCLUDE_DIRECTIVE: &str = "include";

/// Characters that turn a host pattern into a wildcard.
const PATTERN_METACHARS: &[char] = &['*', '?', '!', '[', ']'];

/// Errors reading or writing ssh config files.
#[derive(Error, Debug)]
pub enum SshConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to back up {}: {source}", path.display())]
    Backup { path: PathBuf, source: io::Error },

    #[error("failed to remove {}: {source}", path.display())]
    Remove { path: PathBuf, source: io::Error },

    #[error("group '{group}' resolves to the primary config {}", path.display())]
    GroupShadowsPrimary { group: String, path: PathBuf },
}

/// Content of a file that is reproduced as-is on every rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verbatim {
    /// `Include` lines exactly as they appeared.
    pub includes: Vec<String>,
    /// Directives before the first `Host`/`Match` line.
    pub globals: Vec<String>,
    /// Wildcard `Host` and `Match` blocks, one entry per block.
    pub unmanaged_blocks: Vec<Vec<String>>,
}

impl Verbatim {
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.globals.is_empty() && self.unmanaged_blocks.is_empty()
    }
}

/// Result of parsing a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFile {
    pub records: Vec<ServerRecord>,
    pub verbatim: Verbatim,
}

/// A located file together with what was parsed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub file: ConfigFile,
    pub records: Vec<ServerRecord>,
    pub verbatim: Verbatim,
}

/// Everything read from the ssh configuration in one load.
///
/// The registry keeps the latest snapshot so the writer can put every group
/// back where it came from, with its include lines intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub primary: PathBuf,
    pub files: Vec<LoadedFile>,
}

impl ConfigSnapshot {
    /// Snapshot of a configuration with no files on disk yet.
    pub fn empty(primary: &Path) -> Self {
        Self {
            primary: primary.to_path_buf(),
            files: Vec::new(),
        }
    }

    /// All structural records in file-discovery order.
    pub fn records(&self) -> Vec<ServerRecord> {
        self.files
            .iter()
            .flat_map(|f| f.records.iter().cloned())
            .collect()
    }

    /// Loaded file for `group`, if it was part of this snapshot.
    pub fn file_for_group(&self, group: &str) -> Option<&LoadedFile> {
        self.files.iter().find(|f| f.file.group == group)
    }

    /// Verbatim content captured for `path`.
    pub fn verbatim_for(&self, path: &Path) -> Option<&Verbatim> {
        self.files
            .iter()
            .find(|f| f.file.path == path)
            .map(|f| &f.verbatim)
    }

    /// Path a group is written to.
    ///
    /// Groups seen in the last load go back to the file they came from; new
    /// groups land next to the primary config.
    pub fn path_for_group(&self, group: &str) -> PathBuf {
        if group.is_empty() {
            return self.primary.clone();
        }
        if let Some(loaded) = self.file_for_group(group) {
            return loaded.file.path.clone();
        }
        self.primary
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(group)
    }
}

/// Load the primary config and every file it includes.
///
/// A missing primary yields an empty snapshot. An included file that cannot
/// be read is logged and left out; a primary that cannot be read is an error.
pub fn load_structural(primary: &Path) -> Result<ConfigSnapshot, SshConfigError> {
    let located = locate_config_files(primary).map_err(|source| SshConfigError::Read {
        path: primary.to_path_buf(),
        source,
    })?;

    let mut snapshot = ConfigSnapshot::empty(primary);
    for file in located {
        match parse_config_file(&file.path, &file.group) {
            Ok(parsed) => snapshot.files.push(LoadedFile {
                file,
                records: parsed.records,
                verbatim: parsed.verbatim,
            }),
            Err(err) if file.is_primary() => return Err(err),
            Err(err) => {
                tracing::warn!(
                    path = %file.path.display(),
                    error = %err,
                    "skipping unreadable included ssh config"
                );
            }
        }
    }

    tracing::debug!(
        primary = %primary.display(),
        files = snapshot.files.len(),
        "loaded ssh config"
    );
    Ok(snapshot)
}

/// Parse one file. A file that does not exist parses as empty.
pub fn parse_config_file(path: &Path, group: &str) -> Result<ParsedFile, SshConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_config_str(&content, group)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ParsedFile::default()),
        Err(source) => Err(SshConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Block currently being collected.
enum Block {
    /// Before the first `Host`/`Match`.
    Globals,
    Managed(ServerRecord),
    Unmanaged(Vec<String>),
}

/// Parse the text of one file; records are tagged with `group`.
pub fn parse_config_str(content: &str, group: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let mut current = Block::Globals;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            // Comments inside an unmanaged block belong to it.
            if let Block::Unmanaged(lines) = &mut current {
                lines.push(line.to_string());
            }
            continue;
        }

        let Some((key, value)) = split_directive(trimmed) else {
            continue;
        };

        if key == INCLUDE_DIRECTIVE {
            parsed.verbatim.includes.push(line.to_string());
            continue;
        }

        if key == HOST_DIRECTIVE || key == MATCH_DIRECTIVE {
            finish_block(&mut parsed, std::mem::replace(&mut current, Block::Globals));
            current = if key == HOST_DIRECTIVE {
                start_host_block(line, &value, group)
            } else {
                Block::Unmanaged(vec![line.to_string()])
            };
            continue;
        }

        match &mut current {
            Block::Globals => parsed.verbatim.globals.push(line.to_string()),
            Block::Unmanaged(lines) => lines.push(line.to_string()),
            Block::Managed(record) => apply_directive(record, &key, &value, trimmed),
        }
    }

    finish_block(&mut parsed, current);
    parsed
}

fn start_host_block(line: &str, value: &str, group: &str) -> Block {
    let patterns: Vec<&str> = value.split_whitespace().collect();
    if patterns.is_empty() || patterns.iter().any(|p| is_wildcard_pattern(p)) {
        return Block::Unmanaged(vec![line.to_string()]);
    }

    Block::Managed(ServerRecord {
        alias: patterns[0].to_string(),
        aliases: patterns[1..].iter().map(|p| p.to_string()).collect(),
        source: SOURCE_SSH_CONFIG.to_string(),
        group: group.to_string(),
        port: DEFAULT_SSH_PORT,
        ..Default::default()
    })
}

fn finish_block(parsed: &mut ParsedFile, block: Block) {
    match block {
        Block::Globals => {}
        Block::Managed(record) => parsed.records.push(record),
        Block::Unmanaged(lines) => parsed.verbatim.unmanaged_blocks.push(lines),
    }
}

/// Whether a `Host` pattern is a glob rather than a concrete name.
pub fn is_wildcard_pattern(pattern: &str) -> bool {
    pattern.contains(PATTERN_METACHARS)
}

type FieldSetter = fn(&mut ServerRecord, &str);

/// Directives mapped onto record fields.
const FIELD_SETTERS: &[(&str, FieldSetter)] = &[
    ("hostname", set_host),
    ("user", set_user),
    ("port", set_port),
    ("identityfile", add_identity_file),
];

fn set_host(record: &mut ServerRecord, value: &str) {
    record.host = value.to_string();
}

fn set_user(record: &mut ServerRecord, value: &str) {
    record.user = value.to_string();
}

fn set_port(record: &mut ServerRecord, value: &str) {
    record.port = parse_port(value);
}

fn add_identity_file(record: &mut ServerRecord, value: &str) {
    record.identity_files.push(value.to_string());
}

fn apply_directive(record: &mut ServerRecord, key: &str, value: &str, trimmed: &str) {
    match FIELD_SETTERS.iter().find(|(name, _)| *name == key) {
        Some((_, setter)) => setter(record, value),
        None => record.options.push(trimmed.to_string()),
    }
}

/// Port from a directive value; anything unusable means the default.
pub fn parse_port(value: &str) -> u16 {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => DEFAULT_SSH_PORT,
        Ok(port) => port,
    }
}

/// Split a directive line into a lower-cased key and a whitespace-collapsed value.
///
/// Accepts both `Key value` and `Key=value`. Blank lines, comments and keys
/// without a value yield `None`.
pub fn split_directive(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let key_end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let (key, rest) = line.split_at(key_end);
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);

    let value = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key.to_ascii_lowercase(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_host() {
        let parsed = parse_config_str("Host web1\n    HostName 10.0.0.1\n    User ubuntu\n", "");
        assert_eq!(parsed.records.len(), 1);

        let record = &parsed.records[0];
        assert_eq!(record.alias, "web1");
        assert_eq!(record.host, "10.0.0.1");
        assert_eq!(record.user, "ubuntu");
        assert_eq!(record.port, 22);
        assert!(record.identity_files.is_empty());
        assert_eq!(record.source, SOURCE_SSH_CONFIG);
        assert!(parsed.verbatim.is_empty());
    }

    #[test]
    fn test_keys_are_case_insensitive_and_values_collapsed() {
        let parsed = parse_config_str("HOST db\n  hostNAME   db.example.com  \n  USER  admin\n", "");
        let record = &parsed.records[0];
        assert_eq!(record.host, "db.example.com");
        assert_eq!(record.user, "admin");
    }

    #[test]
    fn test_identity_files_accumulate_in_order() {
        let parsed = parse_config_str(
            "Host a\n  IdentityFile ~/.ssh/one\n  IdentityFile ~/.ssh/two\n  IdentityFile ~/.ssh/one\n",
            "",
        );
        assert_eq!(
            parsed.records[0].identity_files,
            ["~/.ssh/one", "~/.ssh/two", "~/.ssh/one"]
        );
    }

    #[test]
    fn test_invalid_port_falls_back_to_default() {
        assert_eq!(parse_port("2222"), 2222);
        assert_eq!(parse_port("ssh"), 22);
        assert_eq!(parse_port("70000"), 22);
        assert_eq!(parse_port("0"), 22);
        assert_eq!(parse_port("-1"), 22);
    }

    #[test]
    fn test_key_equals_value_syntax() {
        assert_eq!(
            split_directive("Port=2222"),
            Some(("port".to_string(), "2222".to_string()))
        );
        assert_eq!(
            split_directive("  User = deploy"),
            Some(("user".to_string(), "deploy".to_string()))
        );
        assert_eq!(split_directive("# comment"), None);
        assert_eq!(split_directive("Host"), None);
    }

    #[test]
    fn test_multiple_patterns_use_first_as_alias() {
        let parsed = parse_config_str("Host web1 web1.internal\n  HostName 10.0.0.1\n", "");
        assert_eq!(parsed.records[0].alias, "web1");
        assert_eq!(parsed.records[0].aliases, ["web1.internal"]);
    }

    #[test]
    fn test_wildcard_blocks_are_excluded_but_kept_verbatim() {
        let content = "Host *\n    ForwardAgent no\n    # keep me\n\nHost bastion\n    HostName 1.1.1.1\n\nHost web-* !web-9\n    User deploy\n";
        let parsed = parse_config_str(content, "");

        let aliases: Vec<_> = parsed.records.iter().map(|r| r.alias.as_str()).collect();
        assert_eq!(aliases, ["bastion"]);
        assert_eq!(
            parsed.verbatim.unmanaged_blocks,
            vec![
                vec![
                    "Host *".to_string(),
                    "    ForwardAgent no".to_string(),
                    "    # keep me".to_string()
                ],
                vec!["Host web-* !web-9".to_string(), "    User deploy".to_string()],
            ]
        );
    }

    #[test]
    fn test_match_blocks_are_unmanaged() {
        let parsed = parse_config_str("Match host x exec true\n  User y\nHost z\n  HostName z\n", "");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.verbatim.unmanaged_blocks.len(), 1);
    }

    #[test]
    fn test_includes_are_recorded_verbatim() {
        let content = "  Include   conf.d/*\nHost a\n  HostName a\n";
        let parsed = parse_config_str(content, "");
        assert_eq!(parsed.verbatim.includes, ["  Include   conf.d/*"]);
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_globals_and_unknown_options_are_preserved() {
        let content = "ServerAliveInterval 60\nHost a\n  HostName a\n  ProxyJump bastion\n  ForwardAgent yes\n";
        let parsed = parse_config_str(content, "");
        assert_eq!(parsed.verbatim.globals, ["ServerAliveInterval 60"]);
        assert_eq!(parsed.records[0].options, ["ProxyJump bastion", "ForwardAgent yes"]);
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let content = "# Managed by hostbook\n\nHost a\n  # note\n  HostName a\n";
        let parsed = parse_config_str(content, "");
        assert_eq!(parsed.records.len(), 1);
        assert!(parsed.records[0].options.is_empty());
        assert!(parsed.verbatim.is_empty());
    }

    #[test]
    fn test_only_unmanaged_block_comments_are_kept() {
        let content = "# top\nUser me\nHost a\n  # about a\n  HostName a\nHost *\n  # keep\n  ForwardAgent no\n";
        let parsed = parse_config_str(content, "");
        assert_eq!(parsed.verbatim.globals, ["User me"]);
        assert_eq!(
            parsed.verbatim.unmanaged_blocks,
            [vec!["Host *".to_string(), "  # keep".into(), "  ForwardAgent no".into()]]
        );
        assert!(parsed.records[0].options.is_empty());
    }

    #[test]
    fn test_group_is_tagged_on_records() {
        let parsed = parse_config_str("Host a\n  HostName a\n", "work");
        assert_eq!(parsed.records[0].group, "work");
    }

    #[test]
    fn test_missing_file_parses_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let parsed = parse_config_file(&tmp.path().join("absent"), "").unwrap();
        assert!(parsed.records.is_empty());
    }

    #[test]
    fn test_directory_as_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = parse_config_file(tmp.path(), "").unwrap_err();
        assert!(matches!(err, SshConfigError::Read { .. }));
    }

    #[test]
    fn test_load_structural_groups_records_by_file() {
        let tmp = tempfile::tempdir().unwrap();
        let conf_d = tmp.path().join("conf.d");
        fs::create_dir_all(&conf_d).unwrap();
        fs::write(conf_d.join("alpha"), "Host a1\n  HostName 10.0.1.1\n").unwrap();
        fs::write(conf_d.join("beta"), "Host b1\n  HostName 10.0.2.1\n").unwrap();

        let primary = tmp.path().join("config");
        fs::write(&primary, "Include conf.d/*\nHost main\n  HostName 10.0.0.1\n").unwrap();

        let snapshot = load_structural(&primary).unwrap();
        let pairs: Vec<_> = snapshot
            .records()
            .into_iter()
            .map(|r| (r.alias, r.group))
            .collect();
        assert_eq!(
            pairs,
            [
                ("main".to_string(), "".to_string()),
                ("a1".to_string(), "alpha".to_string()),
                ("b1".to_string(), "beta".to_string()),
            ]
        );
        assert_eq!(
            snapshot.verbatim_for(&primary).unwrap().includes,
            ["Include conf.d/*"]
        );
        assert_eq!(snapshot.path_for_group("beta"), conf_d.join("beta"));
        assert_eq!(snapshot.path_for_group("new"), tmp.path().join("new"));
        assert_eq!(snapshot.path_for_group(""), primary);
    }

    #[test]
    fn test_load_structural_missing_primary_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = load_structural(&tmp.path().join("config")).unwrap();
        assert!(snapshot.records().is_empty());
    }
}
