//! Argument parsing and command dispatch for `baknadoctl`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

use crate::commands::{catalogue, queue, repo, request, service};
use crate::context::{CliContext, CliResult};

/// Parses CLI arguments, executes the requested command and prints its output.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(text) => {
            if !text.is_empty() {
                println!("{text}");
            }
            0
        }
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

pub(crate) async fn execute(cli: Cli) -> CliResult<String> {
    let mut ctx = CliContext::load(cli.config.as_deref(), cli.proxy.as_deref(), cli.output)?;
    debug!(config = %ctx.config.path().display(), "configuration loaded");
    dispatch(&mut ctx, cli.command).await
}

pub(crate) async fn dispatch(ctx: &mut CliContext, command: Command) -> CliResult<String> {
    match command {
        Command::Repo(args) => repo::handle_repo(ctx, &args.name, args.command).await,
        Command::Service(args) => service::handle_service(ctx, &args.name, args.command).await,
        Command::Repos => catalogue::handle_repos(ctx),
        Command::Services => catalogue::handle_services(ctx),
        Command::Proxies => catalogue::handle_proxies(ctx),
        Command::Request(RequestCommand::New(args)) => request::handle_request_new(ctx, &args),
        Command::Queue(QueueCommand::Status) => queue::handle_queue_status(ctx),
        Command::Queue(QueueCommand::Reconcile) => queue::handle_queue_reconcile(ctx),
    }
}

#[derive(Parser)]
#[command(
    name = "baknadoctl",
    about = "Browse backup repositories and inspect the baknado pipeline"
)]
pub(crate) struct Cli {
    /// Configuration file (defaults to ~/.baknado/config.json).
    #[arg(long, global = true, env = "BAKNADO_CONFIG")]
    pub(crate) config: Option<PathBuf>,
    /// Proxy name from the configuration's `proxies` section.
    #[arg(long, global = true)]
    pub(crate) proxy: Option<String>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Work with the objects of one repository.
    Repo(RepoArgs),
    /// Manage the containers of one service.
    Service(ServiceArgs),
    /// List configured repositories.
    Repos,
    /// List configured services.
    Services,
    /// List configured proxies.
    Proxies,
    /// Create pipeline requests.
    #[command(subcommand)]
    Request(RequestCommand),
    /// Inspect and repair the pipeline queues.
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Args)]
pub(crate) struct RepoArgs {
    /// Repository name.
    pub(crate) name: String,
    #[command(subcommand)]
    pub(crate) command: RepoCommand,
}

#[derive(Subcommand)]
pub(crate) enum RepoCommand {
    /// List every object, or describe one.
    #[command(alias = "ls")]
    List { target: Option<String> },
    /// Print the stored digest of an object.
    Hash { target: String },
    /// Download an object.
    #[command(alias = "download")]
    Get { src: String, dest: Option<PathBuf> },
    /// Upload a local file.
    #[command(alias = "upload")]
    Put { src: PathBuf, dest: Option<String> },
    /// Delete an object.
    #[command(alias = "rm")]
    Delete { target: String },
}

#[derive(Args)]
pub(crate) struct ServiceArgs {
    /// Service name.
    pub(crate) name: String,
    #[command(subcommand)]
    pub(crate) command: ServiceCommand,
}

#[derive(Subcommand)]
pub(crate) enum ServiceCommand {
    /// List containers.
    #[command(alias = "ls")]
    List,
    /// Create a container and register it as a repository.
    Create { container: String },
    /// Delete a container.
    #[command(alias = "rm")]
    Delete { container: String },
}

#[derive(Subcommand)]
pub(crate) enum RequestCommand {
    /// Describe a backup file as a pipeline request.
    New(RequestNewArgs),
}

#[derive(Args)]
pub(crate) struct RequestNewArgs {
    /// Backup file to describe.
    pub(crate) path: PathBuf,
    /// Destination repository.
    #[arg(long)]
    pub(crate) repo: String,
    /// Drop the request into the ready queue instead of printing it.
    #[arg(long)]
    pub(crate) enqueue: bool,
}

#[derive(Subcommand)]
pub(crate) enum QueueCommand {
    /// Show how many requests each queue holds.
    Status,
    /// Remove requests left in two queues by an interrupted move.
    Reconcile,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}
