//! Binary entry point for the `cnsvol` CLI.

mod cli;

use std::env;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use log::{debug, info};
use thiserror::Error;

use cli::{ActionArg, Cli};
use cnsvol::test_support::{InMemorySession, SessionFailure};
use cnsvol::volume::generated_volume_name;
use cnsvol::{
    CnsConfig, Completion, CreateVolumeParams, ErrorKind, HttpSession, HttpSessionError,
    LifecycleError, OperationFault, OperationKind, Plan, PlanReport, Session, VolumeId,
    VolumeOrchestrator,
};

/// Selects an in-memory session instead of connecting to the endpoint.
const FAKE_SESSION_ENV: &str = "CNSVOL_FAKE_SESSION";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{message}")]
    Lifecycle {
        kind: ErrorKind,
        retryable: bool,
        message: String,
    },
    #[error("failed to write report: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    fn lifecycle<E>(err: &LifecycleError<E>) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self::classified(err.kind(), err.is_retryable(), err)
    }

    fn connect(err: &HttpSessionError) -> Self {
        Self::classified(
            ErrorKind::Transport,
            err.is_retryable(),
            format!("failed to connect: {err}"),
        )
    }

    fn classified(kind: ErrorKind, retryable: bool, detail: impl std::fmt::Display) -> Self {
        let hint = if retryable { " (retryable)" } else { "" };
        Self::Lifecycle {
            kind,
            retryable,
            message: format!("{kind}: {detail}{hint}"),
        }
    }
}

impl From<ActionArg> for OperationKind {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Create => Self::Create,
            ActionArg::Query => Self::Query,
            ActionArg::Delete => Self::Delete,
        }
    }
}

/// Command-line selections, before configuration defaults are applied.
#[derive(Debug, Default)]
struct Invocation {
    kinds: Vec<OperationKind>,
    name: Option<String>,
    size_mb: Option<i64>,
    volume_id: Option<String>,
    keep_disk: bool,
}

impl From<Cli> for Invocation {
    fn from(cli: Cli) -> Self {
        match cli {
            Cli::Create(command) => Self {
                kinds: vec![OperationKind::Create],
                name: command.volume.name,
                size_mb: command.volume.size_mb,
                ..Self::default()
            },
            Cli::Query(command) => Self {
                kinds: vec![OperationKind::Query],
                volume_id: command.volume_id,
                ..Self::default()
            },
            Cli::Delete(command) => Self {
                kinds: vec![OperationKind::Delete],
                volume_id: command.volume_id,
                keep_disk: command.keep_disk,
                ..Self::default()
            },
            Cli::Run(command) => Self {
                kinds: command.actions.into_iter().map(OperationKind::from).collect(),
                name: command.volume.name,
                size_mb: command.volume.size_mb,
                volume_id: command.volume_id,
                keep_disk: command.keep_disk,
            },
        }
    }
}

impl Invocation {
    fn creates(&self) -> bool {
        self.kinds.contains(&OperationKind::Create)
    }

    fn volume_id(&self, config: &CnsConfig) -> Option<VolumeId> {
        self.volume_id
            .as_deref()
            .or(config.volume_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(VolumeId::from)
    }

    fn volume_name(&self, config: &CnsConfig) -> String {
        self.name
            .clone()
            .or_else(|| config.volume_name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(generated_volume_name)
    }

    fn plan(&self, config: &CnsConfig) -> Plan {
        Plan::new(self.kinds.iter().copied())
            .with_volume_id(self.volume_id(config))
            .with_delete_disk(config.delete_disk && !self.keep_disk)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(Invocation::from(cli)).await {
        Ok(report) => match write_report(io::stdout(), &report) {
            Ok(()) => 0,
            Err(err) => {
                report_error(&CliError::Output(err));
                1
            }
        },
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(invocation: Invocation) -> Result<PlanReport, CliError> {
    let config =
        CnsConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    init_logging(config.debug);
    let options = config
        .connect_options()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let owner = options.credentials.username.clone();

    if let Some(session) = fake_session_from_env() {
        info!("using in-memory session");
        return run_plan(session?, &config, &owner, &invocation).await;
    }

    let session = HttpSession::connect(&options)
        .await
        .map_err(|err| CliError::connect(&err))?;
    run_plan(session, &config, &owner, &invocation).await
}

async fn run_plan<S: Session>(
    session: S,
    config: &CnsConfig,
    owner: &str,
    invocation: &Invocation,
) -> Result<PlanReport, CliError> {
    let orchestrator = VolumeOrchestrator::new(session, config.orchestrator_config(owner));
    let mut plan = invocation.plan(config);

    if invocation.creates() {
        let datastore = orchestrator
            .locate_datastore(&config.datacenter, &config.datastore)
            .await
            .map_err(|err| CliError::lifecycle(&err))?;
        plan = plan.with_create(CreateVolumeParams {
            name: invocation.volume_name(config),
            size_mb: invocation.size_mb.unwrap_or(config.volume_size_mb),
            datastores: vec![datastore],
        });
    }

    orchestrator
        .execute_plan(&plan)
        .await
        .map_err(|err| CliError::lifecycle(&err))
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init()
        .ok();
}

fn fake_session_from_env() -> Option<Result<InMemorySession, CliError>> {
    let mode = env::var(FAKE_SESSION_ENV).ok()?;
    let session = InMemorySession::new();
    match mode.as_str() {
        "ok" => {}
        "fault" => session.inject_fault(OperationFault::new("CnsFault", "injected fault")),
        "empty" => session.fail(SessionFailure::EmptyResult),
        "transport" => session.fail(SessionFailure::Submit),
        other => {
            return Some(Err(CliError::Config(format!(
                "unknown {FAKE_SESSION_ENV} mode: {other}"
            ))));
        }
    }
    Some(Ok(session))
}

fn write_report(mut target: impl Write, report: &PlanReport) -> io::Result<()> {
    for step in &report.steps {
        match &step.completion {
            Completion::Created(id) => writeln!(target, "created volume {id}")?,
            Completion::Queried(records) => {
                writeln!(target, "found {} volume(s)", records.len())?;
                for record in records {
                    writeln!(
                        target,
                        "{}\t{}\t{} MB\t{}",
                        record.volume_id,
                        record.name,
                        record.capacity_mb,
                        record.datastore_url.as_deref().unwrap_or("-")
                    )?;
                }
            }
            Completion::Deleted(ids) => {
                for id in ids {
                    writeln!(target, "deleted volume {id}")?;
                }
            }
            Completion::Faulted { operation, fault } => {
                writeln!(target, "{operation} fault: {fault}")?;
            }
        }
    }
    for kind in &report.skipped {
        writeln!(target, "skipped {kind}: create did not complete")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    if let CliError::Lifecycle {
        kind, retryable, ..
    } = err
    {
        debug!("run failed with {kind} (retryable: {retryable})");
    }
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
