//! # docgen CLI
//!
//! The `docgen` binary runs the documentation server and offers local
//! tooling for inspecting what would be sent to the generation backend.
//!
//! ## Usage
//!
//! ```bash
//! docgen --config ./config/docgen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docgen serve` | Start the HTTP/WebSocket server |
//! | `docgen ingest <dir>` | Assemble the prompt for a local directory |
//! | `docgen check` | Validate configuration and credentials |
//!
//! ## Examples
//!
//! ```bash
//! # Preview the prompt for a checkout, with a smaller budget
//! docgen ingest ../my-service --ceiling 5000 --output prompt.txt
//!
//! # Start the server with debug logging
//! RUST_LOG=docgen=debug docgen serve
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

use docgen::config::{self, Config};
use docgen::generate::GeminiGenerator;
use docgen::progress::{NoProgress, ProgressReporter, StderrProgress};
use docgen::prompt::PromptDocument;
use docgen::server;
use docgen::session::SessionSettings;
use docgen::walker::ingest_tree;

/// docgen: generate documentation for a source repository.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Built-in defaults are used when the file does not exist.
#[derive(Parser)]
#[command(
    name = "docgen",
    about = "docgen: generate documentation for a source repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docgen.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server.
    ///
    /// Clients connect to `/generate`, send a repository URL, and receive
    /// progress frames until `Done`. Stored documentation is served from
    /// `/docs?repo=<name>.md`.
    Serve,

    /// Assemble the prompt for a local directory without calling any backend.
    Ingest {
        /// Directory to walk.
        dir: PathBuf,

        /// Override `[prompt].budget_ceiling`.
        #[arg(long)]
        ceiling: Option<usize>,

        /// Write the prompt to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Suppress per-file progress lines.
        #[arg(long, short)]
        quiet: bool,
    },

    /// Validate the configuration and report whether credentials are present.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest {
            dir,
            ceiling,
            output,
            quiet,
        } => {
            run_ingest(&cfg, dir, ceiling, output, quiet).await?;
        }
        Commands::Check => {
            run_check(&cfg)?;
        }
    }

    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    dir: PathBuf,
    ceiling: Option<usize>,
    output: Option<PathBuf>,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut settings = SessionSettings::from_config(cfg)?;
    if let Some(ceiling) = ceiling {
        if ceiling == 0 {
            bail!("--ceiling must be > 0");
        }
        settings.ceiling = ceiling;
    }

    let (doc, summary) = tokio::task::spawn_blocking(move || {
        let reporter: Box<dyn ProgressReporter> = if quiet {
            Box::new(NoProgress)
        } else {
            Box::new(StderrProgress)
        };
        let mut doc = PromptDocument::new(settings.ceiling);
        let summary = ingest_tree(
            &dir,
            &settings.filter,
            &settings.walk,
            &mut doc,
            reporter.as_ref(),
        )?;
        Ok::<_, docgen::error::PipelineError>((doc, summary))
    })
    .await??;

    match output {
        Some(path) => {
            std::fs::write(&path, doc.as_str())
                .with_context(|| format!("Failed to write prompt to {}", path.display()))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(doc.as_str().as_bytes())?;
            stdout.flush()?;
        }
    }

    eprintln!(
        "Included {} of {} files ({} skipped, {} unreadable), {} of {} words",
        summary.files_included,
        summary.files_seen,
        summary.files_skipped,
        summary.files_failed,
        doc.consumed(),
        doc.ceiling()
    );

    Ok(())
}

fn run_check(cfg: &Config) -> anyhow::Result<()> {
    println!("Configuration OK");
    println!("  bind:      {}", cfg.server.bind);
    println!("  workspace: {}", cfg.workspace.root.display());
    println!("  budget:    {} words", cfg.prompt.budget_ceiling);
    match cfg.storage.backend.as_str() {
        "s3" => println!(
            "  storage:   s3://{} ({})",
            cfg.storage.bucket.as_deref().unwrap_or_default(),
            cfg.storage.region
        ),
        "local" => println!("  storage:   local ({})", cfg.storage.dir.display()),
        other => println!("  storage:   {}", other),
    }
    println!("  model:     {}", cfg.generation.model);

    let generator = GeminiGenerator::from_config(&cfg.generation)?;
    if !generator.has_api_key() {
        bail!(
            "{} is not set; documentation requests will be refused",
            cfg.generation.api_key_env
        );
    }
    println!("  {}: set", cfg.generation.api_key_env);

    Ok(())
}
