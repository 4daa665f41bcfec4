//! Command-line front end over [`Registry`].

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use crate::config::Paths;
use crate::model::{ServerRecord, SortField, sort_for_display};
use crate::registry::Registry;

#[derive(Parser, Debug)]
#[command(name = "hostbook", version, about = "Manage ssh hosts and cloud session targets")]
pub struct Cli {
    /// Primary ssh client config
    #[arg(long, global = true, env = "HOSTBOOK_SSH_CONFIG", value_name = "PATH")]
    pub ssh_config: Option<PathBuf>,

    /// Metadata sidecar (tags, pins, usage)
    #[arg(long, global = true, env = "HOSTBOOK_METADATA", value_name = "PATH")]
    pub metadata: Option<PathBuf>,

    /// When to use colors
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum SortArg {
    Alias,
    LastSeen,
}

impl From<SortArg> for SortField {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Alias => SortField::Alias,
            SortArg::LastSeen => SortField::LastSeen,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List servers, optionally filtered
    List {
        /// Case-insensitive filter on alias, host, user and tags
        query: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        #[arg(long, value_enum, default_value_t = SortArg::Alias)]
        sort: SortArg,
        /// Reverse the sort order (pinned servers stay on top)
        #[arg(long)]
        reverse: bool,
    },

    /// Add an ssh host
    Add {
        alias: String,
        host: String,
        #[command(flatten)]
        fields: HostFields,
        /// Included file to put the host in (basename)
        #[arg(long)]
        group: Option<String>,
    },

    /// Change an ssh host
    Edit {
        alias: String,
        #[arg(long)]
        host: Option<String>,
        /// New alias
        #[arg(long)]
        rename: Option<String>,
        #[command(flatten)]
        fields: HostFields,
    },

    /// Remove an ssh host
    #[command(alias = "delete")]
    Rm { alias: String },

    /// Pin a server to the top of the list
    Pin { alias: String },

    /// Unpin a server
    Unpin { alias: String },

    /// Record a connection to a server
    Touch { alias: String },

    /// Cloud descriptor settings
    CloudSource {
        #[command(subcommand)]
        action: CloudAction,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct HostFields {
    #[arg(short, long)]
    pub user: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Identity file (repeatable)
    #[arg(short = 'i', long = "identity-file")]
    pub identity_files: Vec<String>,
    /// Tag (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,
}

impl HostFields {
    fn apply(self, record: &mut ServerRecord) {
        if let Some(user) = self.user {
            record.user = user;
        }
        if let Some(port) = self.port {
            record.port = port;
        }
        if !self.identity_files.is_empty() {
            record.identity_files = self.identity_files;
        }
        if !self.tags.is_empty() {
            record.tags = self.tags;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CloudAction {
    /// Include cloud servers in listings
    On,
    /// Hide cloud servers
    Off,
    /// Show the descriptor location and whether it loads
    Status,
    /// Write a sample descriptor
    Init,
    /// Use another descriptor file
    SetPath { path: PathBuf },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }

    let mut paths = Paths::resolve().context("resolving hostbook paths")?;
    if let Some(path) = cli.ssh_config {
        paths = paths.with_ssh_config(path);
    }
    if let Some(path) = cli.metadata {
        paths = paths.with_metadata(path);
    }
    let mut registry = Registry::new(paths);

    match cli.command {
        Command::List {
            query,
            json,
            sort,
            reverse,
        } => {
            let mut records = registry.list(query.as_deref().unwrap_or(""))?;
            sort_for_display(&mut records, sort.into(), reverse);
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
            }
        }
        Command::Add {
            alias,
            host,
            fields,
            group,
        } => {
            let mut record = ServerRecord::ssh(alias, host);
            record.group = group.unwrap_or_default();
            fields.apply(&mut record);
            registry.add(record.clone())?;
            println!("{} {}", "added".green(), record.alias.bold());
        }
        Command::Edit {
            alias,
            host,
            rename,
            fields,
        } => {
            let old = find_exact(&mut registry, &alias)?;
            let mut new = old.clone();
            if let Some(host) = host {
                new.host = host;
            }
            if let Some(rename) = rename {
                new.alias = rename;
            }
            fields.apply(&mut new);
            registry.update(&old, new.clone())?;
            println!("{} {}", "updated".green(), new.alias.bold());
        }
        Command::Rm { alias } => {
            registry.delete(&ServerRecord::ssh(alias.clone(), ""))?;
            println!("{} {}", "removed".yellow(), alias.bold());
        }
        Command::Pin { alias } => {
            registry.set_pinned(&alias, true)?;
            println!("{} {}", "pinned".cyan(), alias.bold());
        }
        Command::Unpin { alias } => {
            registry.set_pinned(&alias, false)?;
            println!("{} {}", "unpinned".cyan(), alias.bold());
        }
        Command::Touch { alias } => {
            registry.record_use(&alias)?;
        }
        Command::CloudSource { action } => run_cloud_action(&registry, action)?,
    }

    Ok(())
}

fn run_cloud_action(registry: &Registry, action: CloudAction) -> Result<()> {
    match action {
        CloudAction::On => {
            registry.set_cloud_source_enabled(true)?;
            println!("cloud source {}", "enabled".green());
        }
        CloudAction::Off => {
            registry.set_cloud_source_enabled(false)?;
            println!("cloud source {}", "disabled".yellow());
        }
        CloudAction::Status => {
            let state = if registry.cloud_source_enabled() {
                "enabled".green()
            } else {
                "disabled".yellow()
            };
            println!("cloud source {state}");
            println!("descriptor   {}", registry.cloud_descriptor_path().display());
            if !registry.cloud_descriptor_exists() {
                println!("servers      {}", "no descriptor".dimmed());
            } else {
                match registry.cloud_servers() {
                    Ok(records) => println!("servers      {}", records.len()),
                    Err(err) => println!("servers      {}", err.to_string().red()),
                }
            }
        }
        CloudAction::Init => {
            let path = registry.cloud_descriptor_path();
            if registry.init_cloud_descriptor()? {
                println!("{} {}", "created".green(), path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
        CloudAction::SetPath { path } => {
            registry.set_cloud_descriptor_path(&path)?;
            println!("descriptor {}", registry.cloud_descriptor_path().display());
        }
    }
    Ok(())
}

fn find_exact(registry: &mut Registry, alias: &str) -> Result<ServerRecord> {
    match registry.list("")?.into_iter().find(|r| r.alias == alias) {
        Some(record) => Ok(record),
        None => bail!("server '{alias}' not found"),
    }
}

fn print_table(records: &[ServerRecord]) {
    if records.is_empty() {
        println!("{}", "no servers".dimmed());
        return;
    }

    let width = records.iter().map(|r| r.alias.len()).max().unwrap_or(0);
    for record in records {
        let marker = if record.is_pinned() { "*" } else { " " };
        let target = if record.is_cloud() {
            record
                .cloud
                .as_ref()
                .map(|c| format!("{} ({}/{})", display_target(record), c.profile, c.region))
                .unwrap_or_default()
        } else if record.user.is_empty() {
            format!("{}:{}", record.host, record.effective_port())
        } else {
            format!("{}@{}:{}", record.user, record.host, record.effective_port())
        };
        let tags = if record.tags.is_empty() {
            String::new()
        } else {
            format!("[{}]", record.tags.join(", "))
        };
        println!(
            "{} {:<width$}  {:<5}  {}  {}",
            marker.yellow(),
            record.alias.bold(),
            record.connection_type.to_string(),
            target,
            tags.dimmed(),
            width = width,
        );
    }
}

fn display_target(record: &ServerRecord) -> String {
    match record.cloud.as_ref().and_then(|c| c.target_filter.clone()) {
        Some(filter) => filter,
        None => record.host.clone(),
    }
}
