//! streetlens CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use streetlens::{
    commands::{
        cmd_caption, cmd_embed, cmd_import, cmd_init, cmd_run, cmd_search, cmd_serve, cmd_status,
        cmd_upload, print_import_stats, print_init_report, print_search_results,
        print_stage_report, print_status, InitOptions,
    },
    config::Config,
    error::Result,
    meta::MetaDb,
    pipeline::StageReport,
    progress::LogWriterFactory,
};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "streetlens")]
#[command(
    version,
    about = "Caption, embed and search geo-tagged street imagery",
    long_about = None
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize streetlens configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Also create the Qdrant collection
        #[arg(long)]
        with_collection: bool,
    },

    /// Import image records from a JSON array
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Upload pending images to the captioning backend
    Upload,

    /// Generate descriptions for uploaded images
    Caption,

    /// Embed descriptions and rebuild the vector index
    Embed,

    /// Run upload, caption and embed in order
    Run,

    /// Search images by text
    Search {
        /// The search query
        query: String,
    },

    /// Start the HTTP search API
    Serve {
        /// Address to bind (overrides search.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    if let Commands::Init {
        force,
        with_collection,
    } = cli.command
    {
        let options = InitOptions {
            base_dir: init_base_dir(cli.config),
            force,
            create_collection: with_collection,
        };
        let report = cmd_init(options).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_init_report(&report);
        }
        return Ok(());
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "streetlens", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let db = MetaDb::connect(&config).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Import { file } => {
            let stats = cmd_import(&db, &file).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_import_stats(&stats);
            }
        }

        Commands::Upload => output_report(&cmd_upload(&config, &db).await?, cli.json)?,
        Commands::Caption => output_report(&cmd_caption(&config, &db).await?, cli.json)?,
        Commands::Embed => output_report(&cmd_embed(&config, &db).await?, cli.json)?,

        Commands::Run => {
            let reports = cmd_run(&config, &db).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                reports.iter().for_each(print_stage_report);
            }
        }

        Commands::Search { query } => {
            let response = cmd_search(&config, &db, &query).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search_results(&response);
            }
        }

        Commands::Serve { bind } => {
            cmd_serve(&config, &db, bind.as_deref()).await?;
        }

        Commands::Status => {
            let status = cmd_status(&config, &db).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn output_report(report: &StageReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_stage_report(report);
    }
    Ok(())
}

/// `--config` may name a `.toml` file or a directory
fn init_base_dir(config: Option<PathBuf>) -> PathBuf {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(dir) => dir,
        None => Config::default_base_dir(),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) if p.is_dir() => p.join("config.toml"),
        Some(p) => p.to_path_buf(),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'streetlens init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
