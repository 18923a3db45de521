//! Corral - Docker Compose style project orchestration
//!
//! This is the main CLI entry point for Corral.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corral::compose::{validate, LogEvent, OpContext, Project, ProjectLoader};
use corral::container::{DockerRuntime, DynRuntime, LogOptions, MemoryRuntime, OutputStream};
use corral::Settings;
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Corral - Docker Compose style orchestration
#[derive(Parser)]
#[command(name = "corral")]
#[command(version)]
#[command(about = "Bring multi-container projects up and down", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the projects
    #[arg(long, global = true)]
    compose_root: Option<PathBuf>,

    /// Runtime endpoint (unix:// or tcp://)
    #[arg(long, global = true)]
    docker_host: Option<String>,

    /// Run against an in-memory runtime
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create networks and start services
    Up {
        /// Project name
        project: String,
        /// Start each dependency wave concurrently
        #[arg(long)]
        parallel: bool,
        /// Remove what was created if any step fails
        #[arg(long)]
        rollback: bool,
    },

    /// Stop and remove services and networks
    Down {
        /// Project name
        project: String,
    },

    /// Set the number of replicas of a service
    Scale {
        /// Project name
        project: String,
        /// Service name
        service: String,
        /// Desired replicas
        replicas: u32,
    },

    /// Show project status
    Ps {
        /// Project name
        project: String,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show project logs
    Logs {
        /// Project name
        project: String,
        /// Only this service
        service: Option<String>,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
        /// Number of lines to show
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },

    /// Validate and print a project's configuration
    Config {
        /// Project name
        project: String,
    },

    /// List projects under the compose root
    Projects,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(settings: &Settings, memory: bool) -> Result<DynRuntime> {
    if memory {
        tracing::info!("Using in-memory runtime");
        return Ok(Arc::new(MemoryRuntime::new()));
    }

    let runtime = DockerRuntime::from_host(settings.docker_host.as_deref())?;
    runtime
        .ping()
        .await
        .context("container runtime is not reachable")?;
    Ok(Arc::new(runtime))
}

/// Cancel the context on Ctrl-C
fn cancel_on_interrupt(ctx: &OpContext) {
    let token = ctx.token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(root) = cli.compose_root {
        settings.compose_root = root;
    }
    if let Some(host) = cli.docker_host {
        settings.docker_host = Some(host);
    }

    let loader = ProjectLoader::new(&settings.compose_root);

    match cli.command {
        Commands::Projects => {
            for project in loader.list_projects()? {
                println!("{}", project);
            }
        }

        Commands::Config { project } => {
            let config = loader.load(&project)?;
            let warnings = validate(&config)?;

            for warning in warnings {
                println!("Warning: {}", warning);
            }

            println!("{}", serde_yaml::to_string(&config)?);
        }

        Commands::Up {
            project,
            parallel,
            rollback,
        } => {
            let config = loader.load(&project)?;
            for warning in validate(&config)? {
                tracing::warn!("{}", warning);
            }

            let runtime = connect(&settings, cli.memory).await?;
            let mut options = settings.project_options();
            options.parallel_waves |= parallel;
            let handle = Project::new(&project, config, runtime).options(options);

            let ctx = settings.op_context();
            cancel_on_interrupt(&ctx);
            let deployment = if rollback {
                handle.up_or_rollback(&ctx).await?
            } else {
                handle.up(&ctx).await?
            };

            for container in &deployment.containers {
                println!("Created {}", container.name);
            }
            println!("Started project {}", project);
        }

        Commands::Down { project } => {
            let config = loader.load(&project)?;
            let runtime = connect(&settings, cli.memory).await?;
            let handle = Project::new(&project, config, runtime).options(settings.project_options());

            let ctx = settings.op_context();
            cancel_on_interrupt(&ctx);
            let report = handle.down(&ctx).await?;

            for name in &report.removed {
                println!("Removed {}", name);
            }
            for name in &report.networks {
                println!("Removed network {}", name);
            }
            for failure in &report.failures {
                eprintln!("Failed {}: {}", failure.target, failure.error);
            }
            if !report.is_clean() {
                anyhow::bail!(
                    "project {} was not fully removed ({} failures)",
                    project,
                    report.failures.len()
                );
            }
        }

        Commands::Scale {
            project,
            service,
            replicas,
        } => {
            let config = loader.load(&project)?;
            let runtime = connect(&settings, cli.memory).await?;
            let handle = Project::new(&project, config, runtime).options(settings.project_options());

            let ctx = settings.op_context();
            cancel_on_interrupt(&ctx);
            let outcome = handle.scale(&ctx, &service, replicas).await?;

            if outcome.is_noop() {
                println!("{} already has {} replicas", service, replicas);
            }
            for name in &outcome.created {
                println!("Created {}", name);
            }
            for name in &outcome.removed {
                println!("Removed {}", name);
            }
        }

        Commands::Ps { project, json } => {
            let config = loader.load(&project)?;
            let runtime = connect(&settings, cli.memory).await?;
            let handle = Project::new(&project, config, runtime);

            let status = handle.status(&settings.op_context()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("PROJECT {} ({})", status.name, status.status);
                println!("{:<20} {:<12} {:<10} CONTAINERS", "SERVICE", "STATUS", "REPLICAS");
                for service in status.services.values() {
                    let names: Vec<&str> = service.containers.iter().map(|c| c.name.as_str()).collect();
                    println!(
                        "{:<20} {:<12} {:<10} {}",
                        service.name,
                        service.status,
                        service.replicas,
                        names.join(",")
                    );
                }
            }
        }

        Commands::Logs {
            project,
            service,
            follow,
            tail,
        } => {
            let config = loader.load(&project)?;
            let runtime = connect(&settings, cli.memory).await?;
            let handle = Project::new(&project, config, runtime);

            // A followed stream outlives any operation deadline
            let ctx = OpContext::new().with_call_timeout(settings.container_timeout());
            cancel_on_interrupt(&ctx);
            let options = LogOptions {
                follow,
                tail,
                timestamps: false,
            };
            let mut stream = handle.logs(&ctx, service.as_deref(), options).await?;

            let mut stdout = std::io::stdout();
            let mut stderr = std::io::stderr();
            loop {
                let event = tokio::select! {
                    _ = ctx.token().cancelled() => break,
                    event = stream.next() => event,
                };
                let Some(event) = event else {
                    break;
                };
                match event? {
                    LogEvent::Section { service, container } => {
                        writeln!(stdout, "==> {} ({}) <==", container, service)?;
                    }
                    LogEvent::Output(chunk) => match chunk.stream {
                        OutputStream::Stderr => stderr.write_all(&chunk.data)?,
                        OutputStream::Stdout | OutputStream::Console => {
                            stdout.write_all(&chunk.data)?
                        }
                    },
                }
            }
            stdout.flush()?;
        }
    }

    Ok(())
}
