use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use devsync::{
    run_indexer, Backend, ComponentInfo, DevsyncConfig, DirectoryCatalog, IgnoreRules,
    Preferences, ProcessExecutor, RegistryClient, StackFilter, SyncCoordinator, SyncParameters,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devsync")]
#[command(version)]
#[command(about = "Push local sources into a running development container")]
struct Cli {
    /// Enable debug logging (overridden by DEVSYNC_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push changed files into the container
    Push {
        /// Local source directory (or single file)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Pod name (required for the kubectl backend)
        #[arg(long, default_value = "")]
        pod: String,

        /// Container name
        #[arg(short, long)]
        container: String,

        /// Kubernetes namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// kubectl, docker or podman (defaults to .devsync.toml)
        #[arg(short, long)]
        backend: Option<String>,

        /// Where sources are mounted in the container, if not the configured mount root
        #[arg(long)]
        source_mount: Option<String>,

        /// Push the whole tree
        #[arg(short, long)]
        force: bool,

        /// The container was just created; implies a full push
        #[arg(long)]
        new_component: bool,

        /// Extra ignore pattern (repeatable)
        #[arg(short, long = "ignore")]
        ignore: Vec<String>,
    },

    /// Run the indexer and persist the snapshot
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stacks offered by the configured registries
    Stacks {
        /// Only search this registry
        #[arg(long)]
        registry: Option<String>,

        /// Exact stack name
        #[arg(long)]
        stack: Option<String>,

        /// Substring of the name, description or architecture
        filter: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env("DEVSYNC_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Push {
            path,
            pod,
            container,
            namespace,
            backend,
            source_mount,
            force,
            new_component,
            ignore,
        } => {
            let config = DevsyncConfig::load(&project_dir(&path))
                .context("failed to load project configuration")?;
            let backend = match backend {
                Some(name) => name.parse::<Backend>()?,
                None => config.backend,
            };
            let mut executor = ProcessExecutor::new(backend);
            if let Some(ns) = namespace {
                executor = executor.namespace(ns);
            }

            let mut comp_info = ComponentInfo::new(pod, container);
            comp_info.source_mount = source_mount;
            executor.validate_target(&comp_info)?;

            let mut params = SyncParameters::new(&path, comp_info);
            params.force_build = force;
            params.component_exists = !new_component;
            params.ignored_files = config.ignore.iter().cloned().chain(ignore).collect();
            params.remote_file_map = config.remote_files.clone();

            push_command(SyncCoordinator::from_config(executor, &config), params).await?;
        }
        Commands::Index { path, json } => index_command(&path, json)?,
        Commands::Stacks {
            registry,
            stack,
            filter,
            json,
        } => {
            let filter = StackFilter {
                registry,
                stack,
                text: filter,
            };
            stacks_command(&filter, json).await?;
        }
    }

    Ok(())
}

/// Directory holding `.devsync.toml`: the path itself, or its parent for a file.
fn project_dir(path: &Path) -> PathBuf {
    if path.is_file() {
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        path.to_path_buf()
    }
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

async fn push_command(
    coordinator: SyncCoordinator<ProcessExecutor>,
    params: SyncParameters,
) -> Result<()> {
    let target = params.comp_info.container_name.clone();
    let pb = spinner("Syncing files to the component")?;
    let result = coordinator.sync_files(&params).await;
    pb.finish_and_clear();

    let pushed = result.with_context(|| format!("failed to sync to component {}", target))?;
    if pushed {
        println!("{} Synced files to {}", "✓".green().bold(), target.cyan());
    } else {
        println!(
            "{} No file changes detected, skipping push. Use {} to push everything",
            "•".yellow(),
            "--force".bold()
        );
    }
    Ok(())
}

fn index_command(path: &Path, json: bool) -> Result<()> {
    let config = DevsyncConfig::load(&project_dir(path))?;
    let rules = IgnoreRules::from_directory(project_dir(path))?.with_patterns(&config.ignore)?;
    let result = run_indexer(path, &rules)
        .with_context(|| format!("unable to run indexer on {}", path.display()))?;

    if json {
        let report = serde_json::json!({
            "filesChanged": result.files_changed,
            "filesDeleted": result.files_deleted,
            "indexPath": result.index_path,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for file in &result.files_changed {
        println!("{} {}", "M".green(), file.display());
    }
    for file in &result.files_deleted {
        println!("{} {}", "D".red(), file.display());
    }
    println!(
        "{} changed, {} deleted, {} tracked in {}",
        result.files_changed.len().to_string().bold(),
        result.files_deleted.len().to_string().bold(),
        result.new_file_map.len(),
        result.index_path.display().to_string().dimmed()
    );
    Ok(())
}

async fn stacks_command(filter: &StackFilter, json: bool) -> Result<()> {
    let prefs = Preferences::load().context("failed to read preferences")?;
    let registries = prefs.registries();
    if registries.is_empty() {
        println!("{} No registries configured", "•".yellow());
        return Ok(());
    }

    let pb = spinner("Fetching registry catalogs")?;
    let stacks = RegistryClient::new(DirectoryCatalog)
        .list_stacks(&registries, filter)
        .await;
    pb.finish_and_clear();
    let stacks = stacks?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stacks)?);
        return Ok(());
    }

    println!(
        "{:<24} {:<20} {}",
        "NAME".bold(),
        "REGISTRY".bold(),
        "DESCRIPTION".bold()
    );
    for stack in &stacks {
        println!(
            "{:<24} {:<20} {}",
            stack.name.cyan(),
            stack.registry.name,
            stack.description
        );
    }
    Ok(())
}
