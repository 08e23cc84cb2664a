//! gdrive CLI - Interact with Google Drive.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gdrive_cli::commands::{self, Context};
use gdrive_cli::config::{discover_adc, ConfigPaths};
use gdrive_cli::{DriveError, FileCredentialStore, OutputFormat};

/// CLI tool for interacting with Google Drive.
#[derive(Parser)]
#[command(name = "gdrive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Do not fall back to application default credentials.
    #[arg(long, global = true)]
    no_adc: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate and inspect credentials.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// List files in a folder.
    Ls {
        /// Folder URL or ID. Defaults to the root of My Drive.
        #[arg(long)]
        folder: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,

        /// Destination file for --output csv.
        #[arg(long)]
        csv_path: Option<PathBuf>,
    },

    /// Upload one local file.
    Upload {
        /// Local file to upload.
        path: PathBuf,

        /// Destination folder URL or ID. Defaults to the root of My Drive.
        #[arg(long)]
        folder: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Download one file.
    Download {
        /// File URL or ID to download.
        #[arg(long)]
        file: Option<String>,

        /// Local destination. Defaults to the remote name in the current directory.
        #[arg(long)]
        output_path: Option<PathBuf>,
    },

    /// Move a file to the trash.
    Trash {
        /// File URL or ID.
        #[arg(long)]
        file: Option<String>,
    },

    /// Check configuration, credentials and API connectivity.
    Doctor,
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Run the OAuth browser flow and save credentials locally.
    Login {
        /// Request readonly access only.
        #[arg(long)]
        readonly: bool,

        /// Path to the OAuth client secret JSON. Defaults to client_secret.json in the config directory.
        #[arg(long)]
        client_secret: Option<PathBuf>,

        /// Print the authorization URL without opening a browser.
        #[arg(long)]
        no_launch_browser: bool,
    },

    /// Show the authenticated account.
    Whoami {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

impl Commands {
    fn json_output(&self) -> bool {
        matches!(
            self,
            Commands::Ls {
                output: OutputFormat::Json,
                ..
            } | Commands::Upload {
                output: OutputFormat::Json,
                ..
            } | Commands::Auth {
                command: AuthCommands::Whoami {
                    output: OutputFormat::Json
                }
            }
        )
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let json_errors = cli.command.json_output();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => report_error(&err, json_errors),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let paths = ConfigPaths::from_env().context("Failed to resolve configuration paths")?;
    let adc_path = if cli.no_adc {
        None
    } else {
        discover_adc(|key| std::env::var_os(key))
    };

    let store = FileCredentialStore::new(paths.credentials_file.clone());
    let ctx = Context::new(Box::new(store)).with_adc_path(adc_path);

    let output = match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login {
                readonly,
                client_secret,
                no_launch_browser,
            } => {
                let client_secret = client_secret.unwrap_or_else(|| paths.client_secret_file());
                commands::login(&ctx, &client_secret, readonly, !no_launch_browser).await?
            }
            AuthCommands::Whoami { output } => commands::whoami(&ctx, output).await?,
        },

        Commands::Ls {
            folder,
            output,
            csv_path,
        } => commands::list(&ctx, folder.as_deref(), output, csv_path.as_deref()).await?,

        Commands::Upload {
            path,
            folder,
            output,
        } => commands::upload(&ctx, &path, folder.as_deref(), output).await?,

        Commands::Download { file, output_path } => {
            commands::download(&ctx, file.as_deref(), output_path.as_deref()).await?
        }

        Commands::Trash { file } => commands::trash(&ctx, file.as_deref()).await?,

        Commands::Doctor => {
            let report = commands::doctor(&ctx).await;
            println!("{}", report.render());
            return Ok(if report.failures() > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            });
        }
    };

    println!("{}", output);
    Ok(ExitCode::SUCCESS)
}

fn report_error(err: &anyhow::Error, json: bool) -> ExitCode {
    if json {
        eprintln!("{}", error_payload(err));
    } else {
        eprintln!("Error: {:#}", err);
    }

    ExitCode::from(exit_code(err))
}

/// Exit status for `err`, looking through any added context.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<DriveError>()
        .map_or(1, |e| e.kind().exit_code())
}

/// Structured error written to stderr in JSON output mode.
fn error_payload(err: &anyhow::Error) -> serde_json::Value {
    let kind = err
        .downcast_ref::<DriveError>()
        .map_or("error", |e| e.kind().as_str());
    serde_json::json!({
        "error": { "kind": kind, "message": format!("{:#}", err) }
    })
}
