//! projindex CLI - index project trees and look up files and symbols

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use projindex::{
    watch_loop, Coordinator, IndexHandle, IndexerConfig, ParserRegistry, SymbolNode,
    TaskOutcome, TerminalProgress,
};

#[derive(Parser)]
#[command(name = "projindex")]
#[command(about = "Project indexer with fuzzy file and symbol lookup")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/projindex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Index project roots, re-parsing only what changed
    Index {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Re-parse every file under the given roots
    Reindex {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Find files by name
    Files {
        /// Fuzzy name filter; lists everything when omitted
        query: Option<String>,

        /// Restrict to these project roots
        #[arg(short, long)]
        project: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Find symbols by name
    Symbols {
        /// Fuzzy name filter; lists everything when omitted
        query: Option<String>,

        /// Restrict to one file
        #[arg(long, conflicts_with = "project")]
        file: Option<PathBuf>,

        /// Restrict to these project roots
        #[arg(short, long)]
        project: Vec<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show the symbol tree of an indexed file
    Outline {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// List indexed projects
    Projects {
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Drop a project and everything indexed under it
    Remove { root: PathBuf },

    /// Empty the index
    Clear,

    /// Keep roots up to date by polling for changes
    Watch {
        #[arg(required = true)]
        roots: Vec<PathBuf>,

        /// Seconds between scans
        #[arg(short, long, default_value = "5")]
        interval: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = IndexerConfig::load_or_default(cli.config.as_deref())?.with_env_overrides();
    tracing::debug!(store = ?config.store_path(), "Loaded configuration");
    let coordinator = Coordinator::new(config, ParserRegistry::with_builtin());

    match cli.command {
        Commands::Index { roots } => {
            let progress = Arc::new(TerminalProgress::new());
            let handle = coordinator.start_indexing(&roots, progress.clone())?;
            report_passes(&handle, &progress);
        }

        Commands::Reindex { roots } => {
            let progress = Arc::new(TerminalProgress::new());
            let handle = coordinator.reindex(&roots, progress.clone())?;
            report_passes(&handle, &progress);
        }

        Commands::Files {
            query,
            project,
            format,
        } => {
            let files = coordinator.query_files(query.as_deref(), &project)?;
            if format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                for file in &files {
                    println!("{}  {}", file.name.bold(), file.path.display().to_string().dimmed());
                }
                if files.is_empty() {
                    println!("No matching files");
                }
            }
        }

        Commands::Symbols {
            query,
            file,
            project,
            format,
        } => {
            let hits = if project.is_empty() {
                coordinator.query_symbols(query.as_deref(), file.as_deref())?
            } else {
                coordinator.query_symbols_in_project(query.as_deref(), &project)?
            };
            if format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for (symbol, file) in &hits {
                    println!(
                        "{}  {}:{}:{}",
                        symbol.name.bold(),
                        file.path.display(),
                        symbol.line + 1,
                        symbol.column + 1
                    );
                }
                if hits.is_empty() {
                    println!("No matching symbols");
                }
            }
        }

        Commands::Outline { file, format } => {
            let outline = coordinator
                .outline(&file)
                .with_context(|| format!("No outline for {}", file.display()))?;
            if format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&outline)?);
            } else {
                print_outline(&outline, 0);
            }
        }

        Commands::Projects { format } => {
            let projects = coordinator.get_all_projects()?;
            if format == Format::Json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else {
                for project in &projects {
                    println!("{:>4}  {}  {}", project.id, project.name.bold(), project.path.display());
                }
            }
        }

        Commands::Remove { root } => {
            if coordinator.remove_project(&root)? {
                println!("{} {}", "Removed".green(), root.display());
            } else {
                println!("{} is not indexed", root.display());
            }
        }

        Commands::Clear => {
            coordinator.clear_all()?;
            println!("{} {}", "Cleared".green(), coordinator.store_path().display());
        }

        Commands::Watch { roots, interval } => {
            run_watch(&coordinator, &roots, Duration::from_secs(interval))?;
        }
    }

    Ok(())
}

fn report_passes(handle: &IndexHandle, progress: &TerminalProgress) {
    let outcomes = handle.wait();
    progress.finish();

    for (root, outcome) in outcomes {
        match outcome {
            TaskOutcome::Finished(stats) => {
                let status = if stats.cancelled {
                    "Cancelled".yellow()
                } else {
                    "Indexed".green()
                };
                println!("{} {}", status, root.display());
                println!("  Files seen:      {}", stats.files_seen);
                println!("  Files parsed:    {}", stats.files_parsed);
                println!("  Unchanged:       {}", stats.files_unchanged);
                println!("  Symbols:         {}", stats.symbols_inserted);
                println!("  Removed:         {}", stats.files_removed);
                println!("  Parse errors:    {}", stats.parse_errors);
                println!("  Walk errors:     {}", stats.walk_errors);
                println!("  File errors:     {}", stats.file_errors);
            }
            TaskOutcome::Failed(e) => {
                println!("{} {}: {}", "Failed".red(), root.display(), e);
            }
        }
    }
}

fn print_outline(nodes: &[SymbolNode], depth: usize) {
    for node in nodes {
        let kind = node
            .symbol
            .icon
            .as_ref()
            .map(|i| i.theme.trim_start_matches("code-").to_string())
            .unwrap_or_default();
        println!(
            "{}{} {} {}",
            "  ".repeat(depth),
            node.symbol.name.bold(),
            kind.dimmed(),
            format!("line {}", node.symbol.line + 1).dimmed()
        );
        print_outline(&node.children, depth + 1);
    }
}

fn run_watch(coordinator: &Coordinator, roots: &[PathBuf], interval: Duration) -> Result<()> {
    let progress = Arc::new(TerminalProgress::new());
    let handle = coordinator.start_indexing(roots, progress.clone())?;
    report_passes(&handle, &progress);

    println!("Watching {} root(s), press Ctrl-C to stop", roots.len());
    // Runs until the process is interrupted
    let stop = AtomicBool::new(false);
    watch_loop(
        coordinator,
        roots,
        interval,
        Arc::new(projindex::NullProgress),
        &stop,
    )?;
    Ok(())
}
