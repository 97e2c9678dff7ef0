//! handlemail - email-triggered tool-calling agent gateway.
//!
//! This binary composes the three long-running pieces of the service: the
//! HTTP ingress gateway (`serve`), the work-queue worker pool, and the
//! cron scheduler. They share nothing at the process level but a database,
//! so `serve` runs each as its own blocking call on its own OS thread,
//! matching `handlemail_server::worker`'s own module doc comment.

#![forbid(unsafe_code)]

use std::process::ExitCode;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Budget, Cx};
use clap::{Parser, Subcommand};
use handlemail_core::config::Config;
use handlemail_db::{DbError, DbPool, DbPoolConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "handlemail", version, about = "Email-triggered tool-calling agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log the resolved configuration at startup (secrets are never part of `Config`'s Debug output).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service. By default runs the gateway, worker pool, and
    /// scheduler together; pass one of the `--only` flags to run a single
    /// component (for splitting them across separate processes).
    Serve {
        /// Bind the HTTP gateway to this host instead of `HTTP_HOST`.
        #[arg(long)]
        host: Option<String>,

        /// Bind the HTTP gateway to this port instead of `HTTP_PORT`.
        #[arg(long)]
        port: Option<u16>,

        /// Run only the HTTP ingress gateway.
        #[arg(long, conflicts_with_all = ["worker_only", "scheduler_only"])]
        gateway_only: bool,

        /// Run only the work-queue worker pool.
        #[arg(long, conflicts_with_all = ["gateway_only", "scheduler_only"])]
        worker_only: bool,

        /// Run only the cron scheduler.
        #[arg(long, conflicts_with_all = ["gateway_only", "worker_only"])]
        scheduler_only: bool,
    },

    /// Force the database schema to be created, then exit. `DbPool`
    /// otherwise does this lazily on first connection acquire, which is
    /// fine for `serve` but leaves a fresh environment's first request
    /// paying the schema-creation cost; this command lets deploy tooling
    /// pay it up front instead.
    Migrate,

    /// Print the resolved configuration and exit.
    Config,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    if cli.verbose {
        tracing::info!(?config, "configuration loaded");
    }

    match cli.command.unwrap_or(Commands::Serve { host: None, port: None, gateway_only: false, worker_only: false, scheduler_only: false }) {
        Commands::Serve { host, port, gateway_only, worker_only, scheduler_only } => {
            if let Some(host) = host {
                config.http_host = host;
            }
            if let Some(port) = port {
                config.http_port = port;
            }
            run_serve(config, gateway_only, worker_only, scheduler_only)
        }
        Commands::Migrate => run_migrate(&config),
        Commands::Config => {
            println!("{config:#?}");
            ExitCode::SUCCESS
        }
    }
}

/// Spawns whichever of the gateway/worker/scheduler the flags select on
/// their own OS threads and blocks on all of them; each owns its own
/// `asupersync` runtime internally (see `run_http`/`run_worker`/`run_scheduler`).
/// Any one of them exiting (they don't, short of an unrecoverable bind/db
/// error) brings the process down, since none is useful without the others
/// in a single-process deployment.
fn run_serve(config: Config, gateway_only: bool, worker_only: bool, scheduler_only: bool) -> ExitCode {
    let run_gateway = gateway_only || !(worker_only || scheduler_only);
    let run_worker = worker_only || !(gateway_only || scheduler_only);
    let run_scheduler = scheduler_only || !(gateway_only || worker_only);

    let mut handles = Vec::new();

    if run_worker {
        let config = config.clone();
        handles.push(("worker", std::thread::spawn(move || handlemail_server::run_worker(config))));
    }
    if run_scheduler {
        let config = config.clone();
        handles.push(("scheduler", std::thread::spawn(move || handlemail_server::run_scheduler(config))));
    }

    if run_gateway {
        tracing::info!(host = %config.http_host, port = config.http_port, "starting HTTP ingress gateway");
        if let Err(e) = handlemail_server::run_http(config) {
            tracing::error!(error = %e, "HTTP gateway failed");
            return ExitCode::FAILURE;
        }
    }

    for (name, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(component = name, error = %e, "component exited with an error");
                return ExitCode::FAILURE;
            }
            Err(_) => {
                tracing::error!(component = name, "component thread panicked");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn run_migrate(config: &Config) -> ExitCode {
    let runtime = match RuntimeBuilder::new().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to build runtime for migrate");
            return ExitCode::FAILURE;
        }
    };

    let outcome: Result<(), DbError> = runtime.block_on(async move {
        let pool = DbPool::new(&DbPoolConfig::from_database_url(config.database_url()))
            .map_err(|e| DbError::Internal(format!("pool init failed: {e}")))?;
        let cx = Cx::for_request_with_budget(Budget::new().with_deadline(
            asupersync::time::wall_now() + std::time::Duration::from_secs(handlemail_core::config::TIMEOUT_DB_SECS * 4),
        ));
        match pool.acquire(&cx).await {
            asupersync::Outcome::Ok(_) => Ok(()),
            asupersync::Outcome::Err(e) => Err(DbError::Internal(e.to_string())),
            _ => Err(DbError::Internal("migrate acquire cancelled".into())),
        }
    });

    match outcome {
        Ok(()) => {
            tracing::info!("schema ready");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "migration failed");
            ExitCode::FAILURE
        }
    }
}
