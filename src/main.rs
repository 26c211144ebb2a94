use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vulngate::{
    config::{Config, SourceMode},
    model::{Package, ScanResult},
    output::{print_result, OutputFormat},
    Aggregator,
};

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const FATAL_ADVISORY: u8 = 1;
    pub const ERROR: u8 = 2;
}

#[derive(Parser)]
#[command(name = "vulngate")]
#[command(
    author,
    version,
    about = "Check npm dependencies against OSV and the npm advisory database"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a list of packages for known vulnerabilities
    Scan {
        /// JSON file holding an array of {"name", "version"} objects
        #[arg(short, long)]
        packages: PathBuf,

        /// Config file to use instead of the default location
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured source mode
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = FormatArg::Table)]
        format: FormatArg,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Osv,
    Npm,
    Both,
}

impl From<ModeArg> for SourceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Osv => SourceMode::Osv,
            ModeArg::Npm => SourceMode::Npm,
            ModeArg::Both => SourceMode::Both,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Table,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Table => OutputFormat::Table,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            packages,
            config,
            mode,
            format,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            if let Some(mode) = mode {
                config.mode = mode.into();
            }
            run_scan(&packages, &config, format.into()).await
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
    }
}

async fn run_scan(packages_file: &Path, config: &Config, format: OutputFormat) -> Result<u8> {
    let packages = read_packages(packages_file)?;
    let aggregator = Aggregator::from_config(config)?;

    let progress = if format == OutputFormat::Table {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message(format!(
            "Checking {} packages against {}...",
            packages.len(),
            aggregator.source_names().join(", ")
        ));
        Some(pb)
    } else {
        None
    };

    let advisories = aggregator.scan(&packages).await;

    if let Some(pb) = progress {
        pb.finish_with_message(format!("Found {} advisories", advisories.len()));
    }

    let result = ScanResult::new(packages, advisories);
    print_result(&result, format)?;

    Ok(if result.has_fatal() {
        exit_codes::FATAL_ADVISORY
    } else {
        exit_codes::SUCCESS
    })
}

fn read_packages(path: &Path) -> Result<Vec<Package>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read package list {}", path.display()))?;
    let packages: Vec<Package> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of {{name, version}}", path.display()))?;
    Ok(packages)
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = Config::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        Config::default().save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'vulngate config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
