//! loclm - command line front-end to the LocLM orchestration core
//!
//! Runs shell commands, drives the local model service and supervises the
//! backend without the desktop UI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loclm::core::{BackendEvent, Config, ExecEvent, ServiceEvent};
use loclm::process::{CommandExecutor, CommandInvocation, Termination};
use loclm::service::{PullProgress, ServiceController, ServiceStatus};
use loclm::{BackendSupervisor, OrchestratorError};

/// Process orchestration core of the LocLM desktop client
#[derive(Parser, Debug)]
#[command(name = "loclm")]
#[command(version)]
#[command(about = "Shell sessions, model service lifecycle and backend supervision")]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging to file
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one shell command, streaming its output
    Exec {
        /// Working directory (session default when omitted)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Timeout in seconds (session default when omitted)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command text
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Manage the local model service
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Manage the application backend
    Backend {
        #[command(subcommand)]
        action: BackendAction,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceAction {
    /// Show install and health status
    Status,
    /// Start the service and wait until it answers
    Start,
    /// Kill every running service instance
    Stop,
    /// List installed assets
    List,
    /// Download an asset with progress
    Pull { name: String },
    /// Print status changes until interrupted
    Watch,
}

#[derive(Subcommand, Debug)]
enum BackendAction {
    /// Start the backend and forward its output until interrupted
    Run,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the default config file location
    Path,
    /// Print the effective configuration as YAML
    Show,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;

    let config = Config::load(cli.config.clone())?;

    match cli.command {
        Commands::Exec {
            cwd,
            timeout,
            command,
        } => exec(&config, cwd, timeout, command.join(" ")).await,
        Commands::Service { action } => service(&config, action).await,
        Commands::Backend { action } => match action {
            BackendAction::Run => run_backend(&config).await,
        },
        Commands::Config { action } => {
            match action {
                ConfigAction::Path => println!("{}", Config::default_path().display()),
                ConfigAction::Show => print!("{}", serde_yaml::to_string(&config)?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(debug: bool) -> Result<()> {
    if debug {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loclm")
            .join("logs");
        std::fs::create_dir_all(&log_dir)?;

        let log_file = std::fs::File::create(log_dir.join("loclm.log"))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(EnvFilter::new("loclm=debug"))
            .init();
    } else {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loclm=info"));
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
    Ok(())
}

async fn exec(config: &Config, cwd: Option<PathBuf>, timeout: Option<u64>, command: String) -> Result<ExitCode> {
    let prefs = &config.terminal;
    let cwd = cwd.unwrap_or_else(|| prefs.initial_cwd());
    let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| prefs.default_timeout());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let executor = CommandExecutor::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let invocation = CommandInvocation::new(command, cwd, timeout).with_cancel(cancel);

    let printer = async {
        while let Some(event) = rx.recv().await {
            match event {
                ExecEvent::Output { line } => println!("{}", line),
                ExecEvent::Error { line } => eprintln!("{}", line),
            }
        }
    };
    let (result, ()) = tokio::join!(executor.execute(invocation, Some(tx)), printer);
    let result = result?;

    match result.termination {
        Termination::Exited => Ok(ExitCode::from(result.exit_code.clamp(0, 255) as u8)),
        Termination::TimedOut => {
            eprintln!("Command timed out after {}s", timeout.as_secs_f64());
            Ok(ExitCode::from(124))
        }
        Termination::Cancelled => {
            eprintln!("Command cancelled");
            Ok(ExitCode::from(130))
        }
    }
}

async fn service(config: &Config, action: ServiceAction) -> Result<ExitCode> {
    let controller = ServiceController::new(config.service.clone());

    let ok = match action {
        ServiceAction::Status => {
            let status = controller.refresh().await;
            println!("status:  {}", status);
            println!("url:     {}", controller.base_url());
            if let Some(binary) = controller.binary_path() {
                println!("binary:  {}", binary.display());
            }
            true
        }
        ServiceAction::Start => {
            if !controller.detect_install().await && !controller.is_healthy().await {
                return Err(OrchestratorError::NotInstalled(config.service.binary_name.clone()).into());
            }
            let started = controller.start().await;
            println!("{}", controller.status());
            if started {
                // Our child dies with us; wait so the service keeps serving
                println!("Service running at {} (Ctrl-C to stop)", controller.base_url());
                tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
                controller.shutdown().await;
            }
            started
        }
        ServiceAction::Stop => {
            let killed = controller.kill_stale_instances().await;
            println!("{}", if killed { "stopped" } else { "no running instances" });
            true
        }
        ServiceAction::List => {
            let assets = controller.try_list_assets().await?;
            for asset in assets {
                let modified = asset
                    .modified()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| asset.modified_at.clone());
                println!("{:<40} {:>10}  {}", asset.name, asset.size_label(), modified);
            }
            true
        }
        ServiceAction::Pull { name } => {
            let mut sub = controller.subscribe();
            let printer = tokio::spawn(async move {
                while let Some(event) = sub.recv().await {
                    if let ServiceEvent::PullProgress(progress) = event {
                        print_progress(&progress);
                    }
                }
            });
            let ok = controller.pull_asset(&name).await;
            printer.abort();
            println!("{}", if ok { "done" } else { "failed" });
            ok
        }
        ServiceAction::Watch => {
            let mut sub = controller.subscribe();
            controller.refresh().await;
            println!("{}", controller.status());
            controller.start_monitor(config.service.monitor_interval());
            loop {
                tokio::select! {
                    event = sub.recv() => match event {
                        Some(ServiceEvent::StatusChanged(status)) => println!("{}", status),
                        Some(ServiceEvent::PullProgress(_)) => {}
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            controller.stop_monitor().await;
            controller.status() != ServiceStatus::Error
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_progress(progress: &PullProgress) {
    if progress.total > 0 {
        println!("{:<30} {:>6.1}%", progress.status, progress.percent);
    } else {
        println!("{}", progress.status);
    }
}

async fn run_backend(config: &Config) -> Result<ExitCode> {
    let controller = ServiceController::new(config.service.clone());
    let supervisor = BackendSupervisor::new(config.backend.clone(), Some(controller));
    let mut sub = supervisor.subscribe();

    if !supervisor.start().await {
        while let Some(BackendEvent::Error { line }) = sub.try_recv() {
            eprintln!("{}", line);
        }
        return Ok(ExitCode::FAILURE);
    }

    let code = loop {
        tokio::select! {
            event = sub.recv() => match event {
                Some(BackendEvent::Log { line }) => println!("{}", line),
                Some(BackendEvent::Error { line }) => eprintln!("{}", line),
                Some(BackendEvent::Exited { exit_code }) => {
                    eprintln!("backend exited with {:?}", exit_code);
                    break ExitCode::FAILURE;
                }
                None => break ExitCode::FAILURE,
            },
            _ = tokio::signal::ctrl_c() => break ExitCode::SUCCESS,
        }
    };

    supervisor.stop().await;
    Ok(code)
}
