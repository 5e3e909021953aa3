use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use boquita::client::ApiClient;
use boquita::config::{resolve_listen_addr, BackendConfig, NodeConfig};
use boquita::node::Node;
use boquita::scheduler::job::{Execution, JobManifest};
use boquita::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "boquita")]
#[command(version)]
#[command(about = "A lightweight job orchestrator for remote compute backends")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator server
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    Unikraft,
    Docker,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port for the HTTP API
    #[arg(long, default_value = "3333")]
    port: u16,

    /// Work queue capacity
    #[arg(long, default_value = "100")]
    queue_capacity: usize,

    /// Maximum number of concurrently running observers (unbounded if unset)
    #[arg(long)]
    max_observers: Option<usize>,

    /// Compute backend that runs job instances
    #[arg(long, value_enum, default_value = "unikraft")]
    backend: BackendKind,

    /// Unikraft Cloud API token
    #[arg(long, env = "UKC_TOKEN", hide_env_values = true)]
    ukc_token: Option<String>,

    /// Unikraft Cloud metro (e.g. fra0)
    #[arg(long, env = "UKC_METRO")]
    ukc_metro: Option<String>,

    /// Override the Unikraft Cloud API base URL
    #[arg(long)]
    ukc_api: Option<String>,

    /// Docker binary used by the docker backend
    #[arg(long, default_value = "docker")]
    docker_bin: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:3333")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job manifest (YAML or JSON)
    Create {
        /// Path to the manifest file
        file: PathBuf,
    },
    /// Get status and execution history of a job
    Status {
        /// The job ID (UUID)
        job_id: String,
    },
    /// List jobs
    List,
    /// Stop a job's cron or schedule trigger
    Untrigger {
        /// The job ID (UUID)
        job_id: String,
    },
}

#[derive(Serialize)]
struct JobCreateOutput {
    job_id: String,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn init_logging(debug: bool, format: LogFormat) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(args.debug, args.log_format);

    let backend = match args.backend {
        BackendKind::Unikraft => {
            let mut backend = BackendConfig::unikraft(args.ukc_token, args.ukc_metro)?;
            if let BackendConfig::Unikraft { api_base, .. } = &mut backend {
                *api_base = args.ukc_api;
            }
            backend
        }
        BackendKind::Docker => BackendConfig::Docker {
            binary: args.docker_bin,
        },
    };

    let listen_addr = resolve_listen_addr(&args.host, args.port).await?;
    let mut config = NodeConfig::new(listen_addr, backend).with_queue_capacity(args.queue_capacity);
    if let Some(max) = args.max_observers {
        config = config.with_max_observers(max);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        backend = config.backend.name(),
        queue_capacity = config.queue_capacity,
        max_observers = ?config.max_observers,
        "Starting boquita"
    );

    let shutdown = install_shutdown_handler();
    let node = Node::new(config, shutdown)?;
    node.run().await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn execution_status(execution: Option<&Execution>) -> String {
    execution
        .map(|e| e.status.to_string())
        .unwrap_or_else(|| "PENDING".to_string())
}

async fn handle_job_create(
    client: &ApiClient,
    file: PathBuf,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = JobManifest::load(&file)?;
    let job_id = client.create_job(&manifest).await?;

    match output_format {
        OutputFormat::Json => {
            let output = JobCreateOutput {
                job_id: job_id.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job created successfully!");
            println!("Job ID: {}", job_id);
        }
    }
    Ok(())
}

async fn handle_job_status(
    client: &ApiClient,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let detail = client.get_job(&job_id).await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        OutputFormat::Table => {
            let job = &detail.job;
            println!("Job ID:     {}", job.id);
            println!("Name:       {}", job.name);
            println!("Image:      {}", job.manifest.image);
            println!("Trigger:    {}", job.manifest.trigger.kind());
            if let Some(expr) = job.manifest.trigger.expression() {
                println!("Expression: {}", expr);
            }
            println!("Status:     {}", execution_status(detail.last_execution.as_ref()));
            println!();

            if detail.executions.is_empty() {
                println!("No executions yet.");
            } else {
                println!(
                    "{:<38} {:<10} {:<6} {:<20} FINISHED",
                    "EXECUTION ID", "STATUS", "EXIT", "STARTED"
                );
                println!("{}", "-".repeat(96));
                for execution in &detail.executions {
                    let exit = execution
                        .exit_code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<38} {:<10} {:<6} {:<20} {}",
                        execution.id,
                        execution.status,
                        exit,
                        format_time(Some(execution.started_at)),
                        format_time(execution.finished_at)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_list(
    client: &ApiClient,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = client.list_jobs().await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<38} {:<10} {:<9} {:<20} IMAGE",
                "JOB ID", "STATUS", "TRIGGER", "NAME"
            );
            println!("{}", "-".repeat(96));
            for summary in &jobs {
                let job = &summary.job;
                let name = if job.name.len() > 20 {
                    format!("{}...", &job.name[..17])
                } else {
                    job.name.clone()
                };
                println!(
                    "{:<38} {:<10} {:<9} {:<20} {}",
                    job.id,
                    execution_status(summary.last_execution.as_ref()),
                    job.manifest.trigger.kind(),
                    name,
                    job.manifest.image
                );
            }
            println!();
            println!("Showing {} jobs", jobs.len());
        }
    }
    Ok(())
}

async fn handle_job_untrigger(
    client: &ApiClient,
    job_id: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    client.remove_trigger(&job_id).await?;
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "job_id": job_id, "trigger": "removed" }));
        }
        OutputFormat::Table => println!("Trigger removed for job {}", job_id),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
        Commands::Job { client, command } => {
            let api = ApiClient::new(&client.addr)?;
            match command {
                JobCommands::Create { file } => handle_job_create(&api, file, &client.output).await,
                JobCommands::Status { job_id } => {
                    handle_job_status(&api, job_id, &client.output).await
                }
                JobCommands::List => handle_job_list(&api, &client.output).await,
                JobCommands::Untrigger { job_id } => {
                    handle_job_untrigger(&api, job_id, &client.output).await
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
