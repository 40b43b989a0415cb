//! Command-line interface definitions for the `cnsvol` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, ValueEnum};

/// Top-level CLI for the `cnsvol` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cnsvol",
    about = "Create, query, and delete container volumes on a vSphere storage control plane",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a block volume on the configured datastore.
    #[command(name = "create", about = "Create a block volume")]
    Create(CreateCommand),
    /// Query a volume by identifier.
    #[command(name = "query", about = "Query a volume by identifier")]
    Query(QueryCommand),
    /// Delete a volume by identifier.
    #[command(name = "delete", about = "Delete a volume by identifier")]
    Delete(DeleteCommand),
    /// Run several operations in create, query, delete order.
    #[command(name = "run", about = "Run several operations in create, query, delete order")]
    Run(RunCommand),
}

/// Volume settings shared by commands that may create a volume.
#[derive(Debug, Args)]
pub(crate) struct VolumeArgs {
    /// Name of the new volume. Defaults to `volume_name` from configuration,
    /// or a generated `pvc-<uuid>` name.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Size of the new volume in megabytes.
    #[arg(long, value_name = "MB", allow_negative_numbers = true)]
    pub(crate) size_mb: Option<i64>,
}

/// Arguments for the `cnsvol create` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    #[command(flatten)]
    pub(crate) volume: VolumeArgs,
}

/// Arguments for the `cnsvol query` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct QueryCommand {
    /// Volume to query. Defaults to `volume_id` from configuration.
    #[arg(long, value_name = "ID")]
    pub(crate) volume_id: Option<String>,
}

/// Arguments for the `cnsvol delete` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteCommand {
    /// Volume to delete. Defaults to `volume_id` from configuration.
    #[arg(long, value_name = "ID")]
    pub(crate) volume_id: Option<String>,
    /// Keep the backing disk and only remove the volume registration.
    #[arg(long)]
    pub(crate) keep_disk: bool,
}

/// Arguments for the `cnsvol run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Operations to run, comma separated and case-insensitive. Duplicates
    /// are ignored and the order is always create, query, delete.
    #[arg(
        long = "action",
        value_enum,
        ignore_case = true,
        value_delimiter = ',',
        env = "CNS_ACTION",
        required = true
    )]
    pub(crate) actions: Vec<ActionArg>,
    #[command(flatten)]
    pub(crate) volume: VolumeArgs,
    /// Existing volume targeted when the plan does not create one.
    #[arg(long, value_name = "ID")]
    pub(crate) volume_id: Option<String>,
    /// Keep the backing disk when the plan deletes a volume.
    #[arg(long)]
    pub(crate) keep_disk: bool,
}

/// Operation names accepted by `--action`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum ActionArg {
    /// Create a volume.
    Create,
    /// Query the volume.
    Query,
    /// Delete the volume.
    Delete,
}
