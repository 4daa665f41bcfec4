//! Cloud-session targets from the YAML descriptor.
//!
//! The descriptor is read-only to the registry: records are regenerated on
//! every load and never written back. Parsing is all-or-nothing; one invalid
//! entry rejects the whole file so a misconfigured target is never silently
//! dropped.
//!
//! ```yaml
//! cloud_servers:
//!   - alias: api-prod
//!     profile: prod
//!     region: eu-west-1
//!     connection_type: ssm
//!     target_selection:
//!       method: ec2_tag_filter
//!       filters:
//!         - name: "tag:Role"
//!           values: ["api"]
//!     session:
//!       document: AWS-StartPortForwardingSession
//!       local_port: 8080
//!       remote_port: 80
//! global_config:
//!   default_region: us-east-1
//!   default_session_document: AWS-StartSSHSession
//!   timeout: 30
//!   retry_attempts: 3
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CloudTarget, ConnectionType, SOURCE_CLOUD_DESCRIPTOR, ServerRecord};

/// Region used when neither the entry nor the global block names one.
pub const FALLBACK_REGION: &str = "us-east-1";

/// Session document used when neither the entry nor the global block names one.
pub const FALLBACK_SESSION_DOCUMENT: &str = "AWS-StartSSHSession";

/// Document that runs a command instead of a shell.
pub const INTERACTIVE_COMMAND_DOCUMENT: &str = "AWS-StartInteractiveCommand";

/// Parameters applied to [`INTERACTIVE_COMMAND_DOCUMENT`] without explicit ports.
pub const INTERACTIVE_COMMAND_PARAMETERS: &str = r#"command="sudo su - ubuntu""#;

/// Errors loading the cloud descriptor.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("failed to read cloud descriptor {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse cloud descriptor: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid cloud server '{alias}': {reason}")]
    InvalidEntry { alias: String, reason: String },
}

impl CloudError {
    fn invalid(alias: &str, reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            alias: alias.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level descriptor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudDescriptor {
    #[serde(default, alias = "aws_servers")]
    pub cloud_servers: Vec<CloudServerEntry>,
    #[serde(default, alias = "aws_config")]
    pub global_config: GlobalConfig,
}

/// Defaults shared by all entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub default_region: String,
    #[serde(default, alias = "default_ssm_document")]
    pub default_session_document: String,
    /// Session timeout in seconds.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudServerEntry {
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub connection_type: String,
    #[serde(default)]
    pub target_selection: TargetSelection,
    #[serde(default, alias = "ssm")]
    pub session: SessionConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSelection {
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<TagFilter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagFilter {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub document: String,
    #[serde(default)]
    pub local_port: u16,
    #[serde(default)]
    pub remote_port: u16,
    #[serde(default)]
    pub port_number: u16,
}

/// How a cloud entry picks its instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    InstanceId(String),
    TagFilter(String),
}

impl TargetSelection {
    fn resolve(&self, alias: &str) -> Result<Target, CloudError> {
        match self.method.as_str() {
            "instance_id" => {
                if self.instance_id.trim().is_empty() {
                    return Err(CloudError::invalid(
                        alias,
                        "instance_id is required when method is 'instance_id'",
                    ));
                }
                Ok(Target::InstanceId(self.instance_id.trim().to_string()))
            }
            "ec2_tag_filter" => {
                if self.filters.is_empty() {
                    return Err(CloudError::invalid(
                        alias,
                        "filters are required when method is 'ec2_tag_filter'",
                    ));
                }
                Ok(Target::TagFilter(build_filter_expression(&self.filters)))
            }
            other => Err(CloudError::invalid(
                alias,
                format!("unsupported target selection method '{other}'"),
            )),
        }
    }
}

/// Serialize filters as `Name=<name>,Values=<v1>,<v2>` joined by spaces.
/// Filters without values are left out.
pub fn build_filter_expression(filters: &[TagFilter]) -> String {
    filters
        .iter()
        .filter(|f| !f.values.is_empty())
        .map(|f| format!("Name={},Values={}", f.name, f.values.join(",")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl CloudDescriptor {
    /// Parse descriptor text.
    pub fn parse(content: &str) -> Result<Self, CloudError> {
        // An empty document deserializes to unit, not to an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, CloudError> {
        let content = fs::read_to_string(path).map_err(|source| CloudError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Convert every entry into a record; the first invalid entry fails the lot.
    pub fn records(&self) -> Result<Vec<ServerRecord>, CloudError> {
        self.cloud_servers
            .iter()
            .map(|entry| entry.to_record(&self.global_config))
            .collect()
    }
}

impl CloudServerEntry {
    fn to_record(&self, global: &GlobalConfig) -> Result<ServerRecord, CloudError> {
        if self.alias.trim().is_empty() {
            return Err(CloudError::invalid("<unnamed>", "alias is required"));
        }
        let alias = self.alias.trim();
        if self.profile.trim().is_empty() {
            return Err(CloudError::invalid(alias, "profile is required"));
        }

        let region = first_non_empty(&[&self.region, &global.default_region])
            .unwrap_or(FALLBACK_REGION)
            .to_string();
        let session_document =
            first_non_empty(&[&self.session.document, &global.default_session_document])
                .unwrap_or(FALLBACK_SESSION_DOCUMENT)
                .to_string();

        let (host, target_filter) = match self.target_selection.resolve(alias)? {
            Target::InstanceId(id) => (id, None),
            Target::TagFilter(expr) => (String::new(), Some(expr)),
        };

        let session_parameters = session_parameters(&self.session, &session_document);

        Ok(ServerRecord {
            alias: alias.to_string(),
            connection_type: ConnectionType::Cloud,
            source: SOURCE_CLOUD_DESCRIPTOR.to_string(),
            host,
            port: 0,
            cloud: Some(CloudTarget {
                profile: self.profile.trim().to_string(),
                region,
                target_filter,
                session_document,
                session_parameters,
                description: (!self.description.is_empty()).then(|| self.description.clone()),
            }),
            ..Default::default()
        })
    }
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

/// Parameters passed to the session document.
fn session_parameters(session: &SessionConfig, document: &str) -> Option<String> {
    if session.local_port > 0 && session.remote_port > 0 {
        Some(format!(
            "localPortNumber={},remotePortNumber={}",
            session.local_port, session.remote_port
        ))
    } else if session.port_number > 0 {
        Some(format!("portNumber={}", session.port_number))
    } else if document == INTERACTIVE_COMMAND_DOCUMENT {
        Some(INTERACTIVE_COMMAND_PARAMETERS.to_string())
    } else {
        None
    }
}

/// Load cloud records from `path`.
pub fn load_cloud_records(path: &Path) -> Result<Vec<ServerRecord>, CloudError> {
    let descriptor = CloudDescriptor::load(path)?;
    tracing::debug!(
        path = %path.display(),
        servers = descriptor.cloud_servers.len(),
        timeout = descriptor.global_config.timeout,
        retry_attempts = descriptor.global_config.retry_attempts,
        "loaded cloud descriptor"
    );
    descriptor.records()
}

/// Starter descriptor written by `init`.
pub const SAMPLE_DESCRIPTOR: &str = r#"# Cloud session targets for hostbook.
# Entries here are read-only in hostbook; edit this file to change them.

cloud_servers: []
  # - alias: my-server
  #   profile: my-profile
  #   region: us-east-1
  #   connection_type: ssm
  #   target_selection:
  #     method: ec2_tag_filter        # or: instance_id
  #     filters:
  #       - name: "tag:Name"
  #         values: ["my-server-name"]
  #   session:
  #     document: AWS-StartSSHSession
  #     port_number: 22
  #   description: "Description of the server"

global_config:
  default_region: us-east-1
  default_session_document: AWS-StartSSHSession
  timeout: 30
  retry_attempts: 3
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
cloud_servers:
  - alias: api-prod
    profile: prod
    region: eu-west-1
    connection_type: ssm
    target_selection:
      method: ec2_tag_filter
      filters:
        - name: "tag:Role"
          values: ["api", "web"]
        - name: "tag:Env"
          values: ["prod"]
    session:
      document: AWS-StartPortForwardingSession
      local_port: 8080
      remote_port: 80
    tags: ["prod"]
    description: "API fleet"
  - alias: bastion
    profile: shared
    target_selection:
      method: instance_id
      instance_id: i-0123456789abcdef0
    session:
      port_number: 22
global_config:
  default_region: ap-south-1
  default_session_document: Custom-Doc
  timeout: 30
  retry_attempts: 3
"#;

    #[test]
    fn test_parse_full_descriptor() {
        let records = CloudDescriptor::parse(FULL).unwrap().records().unwrap();
        assert_eq!(records.len(), 2);

        let api = &records[0];
        assert_eq!(api.alias, "api-prod");
        assert_eq!(api.connection_type, ConnectionType::Cloud);
        assert_eq!(api.source, SOURCE_CLOUD_DESCRIPTOR);
        assert!(api.tags.is_empty());
        let cloud = api.cloud.as_ref().unwrap();
        assert_eq!(cloud.profile, "prod");
        assert_eq!(cloud.region, "eu-west-1");
        assert_eq!(
            cloud.target_filter.as_deref(),
            Some("Name=tag:Role,Values=api,web Name=tag:Env,Values=prod")
        );
        assert_eq!(cloud.session_document, "AWS-StartPortForwardingSession");
        assert_eq!(
            cloud.session_parameters.as_deref(),
            Some("localPortNumber=8080,remotePortNumber=80")
        );
        assert_eq!(cloud.description.as_deref(), Some("API fleet"));

        let bastion = &records[1];
        assert_eq!(bastion.host, "i-0123456789abcdef0");
        let cloud = bastion.cloud.as_ref().unwrap();
        assert_eq!(cloud.region, "ap-south-1");
        assert_eq!(cloud.session_document, "Custom-Doc");
        assert_eq!(cloud.session_parameters.as_deref(), Some("portNumber=22"));
        assert!(cloud.target_filter.is_none());
    }

    #[test]
    fn test_fallback_constants_without_globals() {
        let yaml = r#"
cloud_servers:
  - alias: a
    profile: p
    target_selection:
      method: instance_id
      instance_id: i-1
"#;
        let records = CloudDescriptor::parse(yaml).unwrap().records().unwrap();
        let cloud = records[0].cloud.as_ref().unwrap();
        assert_eq!(cloud.region, FALLBACK_REGION);
        assert_eq!(cloud.session_document, FALLBACK_SESSION_DOCUMENT);
        assert!(cloud.session_parameters.is_none());
    }

    #[test]
    fn test_interactive_document_gets_default_parameters() {
        let yaml = r#"
cloud_servers:
  - alias: a
    profile: p
    target_selection: { method: instance_id, instance_id: i-1 }
    session: { document: AWS-StartInteractiveCommand }
"#;
        let records = CloudDescriptor::parse(yaml).unwrap().records().unwrap();
        assert_eq!(
            records[0].cloud.as_ref().unwrap().session_parameters.as_deref(),
            Some(INTERACTIVE_COMMAND_PARAMETERS)
        );
    }

    #[test]
    fn test_one_invalid_entry_fails_whole_file() {
        let yaml = r#"
cloud_servers:
  - alias: good
    profile: p
    target_selection: { method: instance_id, instance_id: i-1 }
  - alias: bad
    target_selection: { method: instance_id, instance_id: i-2 }
"#;
        let err = CloudDescriptor::parse(yaml).unwrap().records().unwrap_err();
        match err {
            CloudError::InvalidEntry { alias, reason } => {
                assert_eq!(alias, "bad");
                assert!(reason.contains("profile"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_alias_is_invalid() {
        let yaml = "cloud_servers:\n  - profile: p\n    target_selection: { method: instance_id, instance_id: i-1 }\n";
        let err = CloudDescriptor::parse(yaml).unwrap().records().unwrap_err();
        assert!(err.to_string().contains("alias is required"));
    }

    #[test]
    fn test_target_selection_errors() {
        let cases = [
            ("{ method: instance_id }", "instance_id is required"),
            ("{ method: ec2_tag_filter }", "filters are required"),
            ("{ method: hostname }", "unsupported target selection method 'hostname'"),
            ("{}", "unsupported target selection method ''"),
        ];
        for (selection, expected) in cases {
            let yaml = format!(
                "cloud_servers:\n  - alias: a\n    profile: p\n    target_selection: {selection}\n"
            );
            let err = CloudDescriptor::parse(&yaml).unwrap().records().unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "{selection}: got {err}"
            );
        }
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = CloudDescriptor::parse("cloud_servers: [unclosed").unwrap_err();
        assert!(matches!(err, CloudError::Parse(_)));
    }

    #[test]
    fn test_legacy_key_names_are_accepted() {
        let yaml = r#"
aws_servers:
  - alias: legacy
    profile: p
    target_selection: { method: instance_id, instance_id: i-9 }
    ssm: { document: Old-Doc }
aws_config:
  default_region: us-west-2
"#;
        let records = CloudDescriptor::parse(yaml).unwrap().records().unwrap();
        let cloud = records[0].cloud.as_ref().unwrap();
        assert_eq!(cloud.region, "us-west-2");
        assert_eq!(cloud.session_document, "Old-Doc");
    }

    #[test]
    fn test_empty_and_sample_descriptors_have_no_records() {
        assert!(CloudDescriptor::parse("").unwrap().records().unwrap().is_empty());
        let sample = CloudDescriptor::parse(SAMPLE_DESCRIPTOR).unwrap();
        assert!(sample.records().unwrap().is_empty());
        assert_eq!(sample.global_config.timeout, 30);
        assert_eq!(sample.global_config.retry_attempts, 3);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_cloud_records(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, CloudError::Io { .. }));
    }

    #[test]
    fn test_filter_expression_skips_empty_values() {
        let filters = vec![
            TagFilter {
                name: "tag:A".into(),
                values: vec![],
            },
            TagFilter {
                name: "tag:B".into(),
                values: vec!["x".into()],
            },
        ];
        assert_eq!(build_filter_expression(&filters), "Name=tag:B,Values=x");
    }
}
