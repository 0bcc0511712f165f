// verigraph CLI - verify numeric claims in narrative text against source tables

mod assisted;
mod exit_codes;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use exit_codes::{EXIT_CONFIG, EXIT_RUNTIME, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "verigraph")]
#[command(about = "Verify numeric claims in narrative text against source tables")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Debug logging on stderr (overrides RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify one or more document directories
    #[command(after_help = "\
Each document directory holds narrative_claims.json and a tables/ folder
with one JSON file per table.

Examples:
  verigraph run docs/mpr_2023
  verigraph run docs/* --output reports/
  verigraph run docs/mpr_2023 --config strict.verify.toml --json
  VERIGRAPH_ASSIST_KEY=... verigraph run docs/mpr_2023 --config assist.toml --assisted

Exit codes:
  0  verified, no findings
  1  mismatches or cross-table inconsistencies found
  3  invalid config
  5  one or more documents malformed")]
    Run {
        /// Document directories to verify
        #[arg(required = true, value_name = "DOC_DIR")]
        documents: Vec<PathBuf>,

        /// Verification config (TOML)
        #[arg(long, short = 'c', env = "VERIGRAPH_CONFIG")]
        config: Option<PathBuf>,

        /// Resolve mentions through the assisted matcher ([assisted] in config)
        #[arg(long)]
        assisted: bool,

        /// Print {documents, failures} as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write <doc>.verification.json files into this directory
        #[arg(long, short = 'o', value_name = "DIR")]
        output: Option<PathBuf>,

        /// Suppress the per-document summary on stderr
        #[arg(long, short = 'q')]
        quiet: bool,
    },

    /// Check a config file without running
    #[command(after_help = "\
Examples:
  verigraph validate strict.verify.toml")]
    Validate {
        /// Config file to validate
        config: PathBuf,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  verigraph ", env!("CARGO_PKG_VERSION"),
    )
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("verigraph=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("verigraph=info"))
    };
    // stdout carries JSON only
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            documents,
            config,
            assisted,
            json,
            output,
            quiet,
        } => run::cmd_run(run::RunArgs {
            documents,
            config,
            assisted,
            json,
            output,
            quiet,
        }),
        Commands::Validate { config } => run::cmd_validate(&config).map(|()| EXIT_SUCCESS),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self { code: EXIT_RUNTIME, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
