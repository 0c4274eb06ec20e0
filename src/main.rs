//! Sigil - service composition and readiness orchestration
//!
//! This is the main CLI entry point for Sigil.

use clap::{Parser, Subcommand};
use sigil::compose::config::parse_duration;
use sigil::compose::{ComposeFile, ComposeParser, Composition, RuntimeKind};
use sigil::error::{Result, SigilError};
use sigil::storage::VolumeManager;
use sigil::workflow::WorkflowRunner;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Sigil - service composition and readiness orchestration
#[derive(Parser)]
#[command(name = "sigil")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Start, health-check and tear down the services of a test workflow", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Project name
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Runtime used to launch services
    #[arg(long, global = true, value_enum)]
    runtime: Option<RuntimeKind>,

    /// Directory for volumes and logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Deadline for each readiness wait, e.g. 30s
    #[arg(long, global = true, value_parser = parse_duration)]
    readiness_timeout: Option<Duration>,

    /// Delay between readiness attempts, e.g. 500ms
    #[arg(long, global = true, value_parser = parse_duration)]
    probe_interval: Option<Duration>,

    /// Grace period for services that declare none, e.g. 10s
    #[arg(long, global = true, value_parser = parse_duration)]
    stop_grace_period: Option<Duration>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow
    Run {
        /// Workflow name; a `workflow_` prefix is accepted
        #[arg(default_value = "default")]
        workflow: String,
    },

    /// Validate and print the compose file
    Config {
        /// Print as JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// List workflows
    Workflows,

    /// List services
    Services,

    /// Manage volumes
    Volumes {
        #[command(subcommand)]
        command: VolumeCommands,
    },
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// List volumes
    #[command(name = "ls")]
    List,
    /// Remove a volume
    #[command(name = "rm")]
    Remove {
        /// Volume name
        volume: String,
        /// Force removal
        #[arg(short, long)]
        force: bool,
    },
    /// Remove unused volumes
    Prune,
}

/// A loaded compose file with its resolved settings
struct Project {
    name: String,
    compose: ComposeFile,
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let project = load_project(&cli)?;

    match cli.command {
        Commands::Run { workflow } => {
            let steps = project.compose.workflow(&workflow)?.to_vec();
            let composition =
                Composition::from_compose(&project.name, &project.compose, &project.data_dir)?;

            let mut runner = WorkflowRunner::new(&workflow, steps);
            let result = tokio::select! {
                result = runner.run(&composition) => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, shutting down");
                    Err(SigilError::Runtime("interrupted".to_string()))
                }
            };
            let teardown_errors = composition.down().await;
            let report = runner.into_report(result, teardown_errors);

            match &report.result {
                Ok(()) => println!(
                    "Workflow {} completed ({}/{} steps)",
                    report.workflow, report.steps_completed, report.total_steps
                ),
                Err(e) => eprintln!(
                    "Workflow {} failed at step {}/{}: {}",
                    report.workflow,
                    report.steps_completed + 1,
                    report.total_steps,
                    e
                ),
            }
            for e in &report.teardown_errors {
                eprintln!("Teardown error: {}", e);
            }

            Ok(ExitCode::from(report.exit_code().clamp(0, 255) as u8))
        }

        Commands::Config { json } => {
            let output = if json {
                serde_json::to_string_pretty(&project.compose)?
            } else {
                serde_yaml::to_string(&project.compose)
                    .map_err(|e| SigilError::ComposeParse(format!("Failed to render YAML: {}", e)))?
            };
            println!("{}", output.trim_end());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Workflows => {
            for (name, steps) in &project.compose.workflows {
                println!("{} ({} steps)", name, steps.len());
                for step in steps {
                    println!("  - {}", step);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Services => {
            let registry = ComposeParser::build_registry(&project.compose)?;

            println!(
                "{:<16} {:<32} {:<16} {:<16} READINESS",
                "NAME", "RUNS", "PORTS", "DEPENDS ON"
            );
            for spec in registry.specs() {
                let runs = match (&spec.image, project.compose.settings.runtime) {
                    (Some(image), RuntimeKind::Docker) => image.clone(),
                    _ => spec.command.join(" "),
                };
                let ports = spec
                    .ports
                    .iter()
                    .map(|p| p.host_port.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                let readiness = spec
                    .effective_readiness()
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "running".to_string());

                println!(
                    "{:<16} {:<32} {:<16} {:<16} {}",
                    spec.name,
                    truncate(&runs, 32),
                    ports,
                    spec.depends_on.join(","),
                    readiness
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Volumes { command } => {
            let volumes = VolumeManager::new(project.data_dir.join("volumes"))?;

            match command {
                VolumeCommands::List => {
                    println!("{:<24} {:<12} MOUNTPOINT", "VOLUME NAME", "SIZE");
                    for volume in volumes.list()? {
                        println!(
                            "{:<24} {:<12} {}",
                            volume.name,
                            volume.size()?,
                            volume.mountpoint.display()
                        );
                    }
                }
                VolumeCommands::Remove { volume, force } => {
                    volumes.remove(&volume, force)?;
                    println!("{}", volume);
                }
                VolumeCommands::Prune => {
                    for name in volumes.prune()? {
                        println!("Deleted: {}", name);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load the compose file and apply command line overrides
fn load_project(cli: &Cli) -> Result<Project> {
    let working_dir = std::env::current_dir()?;
    let path = match &cli.file {
        Some(file) => file.clone(),
        None => ComposeParser::find_compose_file(&working_dir).ok_or_else(|| {
            SigilError::ComposeParse(format!(
                "No compose file found in {}",
                working_dir.display()
            ))
        })?,
    };

    let mut compose = ComposeParser::parse_file(&path)?;
    let name = cli
        .project
        .clone()
        .unwrap_or_else(|| ComposeParser::project_name(&compose, &path));

    let settings = &mut compose.settings;
    if let Some(runtime) = cli.runtime {
        settings.runtime = runtime;
    }
    if let Some(timeout) = cli.readiness_timeout {
        settings.readiness_timeout = timeout;
    }
    if let Some(interval) = cli.probe_interval {
        settings.probe_interval = interval;
    }
    if let Some(grace) = cli.stop_grace_period {
        settings.stop_grace_period = grace;
    }

    let data_dir = match (&cli.data_dir, &settings.data_dir) {
        (Some(dir), _) => dir.clone(),
        (None, Some(dir)) => relative_to(&path, dir),
        (None, None) => dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("sigil")
            .join(&name),
    };

    for warning in ComposeParser::validate(&compose)? {
        tracing::warn!("{}", warning);
    }

    tracing::debug!("Loaded {} as project {}", path.display(), name);
    Ok(Project {
        name,
        compose,
        data_dir,
    })
}

/// Resolve `dir` against the directory of the compose file
fn relative_to(compose_path: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        return dir.to_path_buf();
    }
    compose_path
        .parent()
        .map(|parent| parent.join(dir))
        .unwrap_or_else(|| dir.to_path_buf())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}
