//! Field checks for records entering the ssh config.
//!
//! Every value the writer emits ends up on its own config line, so anything
//! that could start a new line is refused. Group names become file names next
//! to the primary config and are restricted to a single plain path component.

use std::net::IpAddr;
use std::path::Path;

use thiserror::Error;

use crate::fsutil::TEMP_FILE_PREFIX;
use crate::model::ServerRecord;
use crate::sources::writer::BACKUP_SUFFIX;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("alias is required")]
    EmptyAlias,

    #[error("alias '{0}' may only contain letters, digits, '.', '_' and '-'")]
    InvalidAlias(String),

    #[error("host is required")]
    EmptyHost,

    #[error("host '{0}' is not a valid hostname or IP address")]
    InvalidHost(String),

    #[error("invalid extra pattern '{0}' on the Host line")]
    InvalidPattern(String),

    #[error("cannot modify cloud server '{0}': edit the cloud descriptor file instead")]
    CloudRecord(String),

    #[error("invalid cloud server '{alias}': {reason}")]
    CloudEntry { alias: String, reason: String },

    #[error("invalid group '{group}': {reason}")]
    InvalidGroup { group: String, reason: &'static str },

    #[error("{field} must not contain line breaks or control characters")]
    ControlCharacter { field: &'static str },
}

/// Check the structural fields of an ssh record.
///
/// The port needs no check: `u16` already bounds it and `0` means default.
pub fn validate_record(record: &ServerRecord) -> Result<(), ValidationError> {
    if record.is_cloud() {
        return Err(ValidationError::CloudRecord(record.alias.clone()));
    }
    validate_alias(&record.alias)?;
    for extra in &record.aliases {
        if validate_alias(extra).is_err() {
            return Err(ValidationError::InvalidPattern(extra.clone()));
        }
    }
    check_line_safe("host", &record.host)?;
    validate_host(&record.host)?;
    validate_group_name(&record.group)?;

    check_line_safe("user", &record.user)?;
    for identity in &record.identity_files {
        check_line_safe("identity file", identity)?;
    }
    for option in &record.options {
        check_line_safe("option", option)?;
    }
    Ok(())
}

/// Refuse values that would split into several config lines.
///
/// Tabs are allowed; parsed directives may contain them.
fn check_line_safe(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.chars().any(|c| c.is_control() && c != '\t') {
        return Err(ValidationError::ControlCharacter { field });
    }
    Ok(())
}

/// Syntax of a group name: empty (the primary) or one plain file name.
pub fn validate_group_name(group: &str) -> Result<(), ValidationError> {
    if group.is_empty() {
        return Ok(());
    }
    let invalid = |reason| ValidationError::InvalidGroup {
        group: group.to_string(),
        reason,
    };

    if group.chars().any(char::is_control) {
        return Err(invalid("contains control characters"));
    }
    if group.contains(['/', '\\']) {
        return Err(invalid("must be a file name, not a path"));
    }
    if group == "." || group == ".." || group.trim() != group || group.trim().is_empty() {
        return Err(invalid("not a usable file name"));
    }
    if group.ends_with(BACKUP_SUFFIX) || group.starts_with(TEMP_FILE_PREFIX) {
        return Err(invalid("reserved for hostbook backups and temporary files"));
    }
    Ok(())
}

/// Checks for a group that will get a new file next to `primary`.
pub fn validate_new_group(group: &str, primary: &Path) -> Result<(), ValidationError> {
    validate_group_name(group)?;
    let Some(primary_name) = primary.file_name().map(|n| n.to_string_lossy()) else {
        return Ok(());
    };
    if group == primary_name {
        return Err(ValidationError::InvalidGroup {
            group: group.to_string(),
            reason: "names the primary config",
        });
    }
    if group.starts_with(&format!("{primary_name}-")) && group.contains(BACKUP_SUFFIX) {
        return Err(ValidationError::InvalidGroup {
            group: group.to_string(),
            reason: "reserved for hostbook backups and temporary files",
        });
    }
    Ok(())
}

pub fn validate_alias(alias: &str) -> Result<(), ValidationError> {
    if alias.trim().is_empty() {
        return Err(ValidationError::EmptyAlias);
    }
    let valid = alias
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(ValidationError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}

pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ValidationError::EmptyHost);
    }
    if host.parse::<IpAddr>().is_ok() || is_valid_hostname(host) {
        Ok(())
    } else {
        Err(ValidationError::InvalidHost(host.to_string()))
    }
}

fn is_valid_hostname(host: &str) -> bool {
    if host.starts_with('.') || host.ends_with('.') {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
