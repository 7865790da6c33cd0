mod commands;
mod config;

use clap::{Args, Parser, Subcommand};
use myssh_core::{ClientConfig, ConnectionOverrides, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "myssh")]
#[command(about = "SSH client with saved profiles, interactive shells and SCP transfers", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value_os_t = ClientConfig::default_path())]
    config: PathBuf,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

/// Where to connect; each flag overrides the same field of `--profile`
#[derive(Args, Debug, Clone, Default)]
struct ConnectionArgs {
    /// Saved profile to connect with
    #[arg(long)]
    profile: Option<String>,

    /// Remote host name or address
    #[arg(long)]
    host: Option<String>,

    /// Remote SSH port
    #[arg(short, long)]
    port: Option<u16>,

    /// Remote user name
    #[arg(short, long)]
    user: Option<String>,

    /// Password for password authentication
    #[arg(long)]
    password: Option<String>,

    /// Private key file for public key authentication
    #[arg(short = 'i', long)]
    key: Option<PathBuf>,
}

impl ConnectionArgs {
    fn overrides(&self) -> ConnectionOverrides {
        ConnectionOverrides {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            key_path: self.key.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive shell on the remote host
    Connect {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Copy a single file with SCP
    #[command(subcommand)]
    Scp(ScpCommands),

    /// Manage saved connection profiles
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ScpCommands {
    /// Send a local file to the remote host
    Upload {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Local file to send
        #[arg(long)]
        local: PathBuf,

        /// Remote destination (a trailing `/` keeps the local file name)
        #[arg(long)]
        remote: String,
    },

    /// Fetch a remote file
    Download {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Remote file to fetch
        #[arg(long)]
        remote: String,

        /// Local destination file
        #[arg(long)]
        local: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Save a new profile
    Add {
        /// Profile name
        name: String,

        #[arg(long)]
        host: String,

        #[arg(short, long)]
        user: String,

        #[arg(short, long, default_value_t = myssh_core::DEFAULT_SSH_PORT)]
        port: u16,

        #[arg(long)]
        password: Option<String>,

        /// Private key file
        #[arg(short = 'i', long)]
        key: Option<PathBuf>,
    },

    /// Change fields of an existing profile
    Edit {
        /// Profile name
        name: String,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        password: Option<String>,

        /// Private key file
        #[arg(short = 'i', long)]
        key: Option<PathBuf>,
    },

    /// List saved profiles
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a profile
    Delete {
        /// Profile name
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a configuration file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(&cli.config).await?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    let log_guard = init_logging(&config.logging);

    let code = match cli.command {
        Commands::Connect { connection } => {
            let code = commands::connect::run(&config, &connection).await?;
            // Exit right away: the blocking stdin reader cannot be cancelled
            drop(log_guard);
            std::process::exit(code);
        }
        Commands::Scp(cmd) => commands::scp::handle(&config, cmd).await?,
        Commands::Profile(cmd) => {
            commands::profile::handle(&config, cmd).await?;
            0
        }
        Commands::Config(cmd) => {
            commands::config::handle(&cli.config, &config, cmd).await?;
            0
        }
    };

    if code != 0 {
        drop(log_guard);
        std::process::exit(code);
    }
    Ok(())
}

/// Initialize tracing. Logs go to stderr, or to a daily rolling file when one is configured.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("myssh={0},myssh_ssh={0},myssh_db={0},warn", logging.level)))
    };

    if let Some(log_file) = &logging.file {
        let directory = log_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));

        match (std::fs::create_dir_all(directory), log_file.file_name()) {
            (Ok(()), Some(file_name)) => {
                let file_appender = tracing_appender::rolling::daily(directory, file_name);
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                match logging.format {
                    LogFormat::Json => {
                        tracing_subscriber::fmt()
                            .json()
                            .with_env_filter(filter())
                            .with_writer(non_blocking)
                            .with_current_span(true)
                            .init();
                    }
                    LogFormat::Text => {
                        tracing_subscriber::fmt()
                            .with_env_filter(filter())
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .init();
                    }
                }

                return Some(guard);
            }
            (Err(e), _) => {
                eprintln!("Warning: Failed to create log directory: {}", e);
                eprintln!("Falling back to stderr logging");
            }
            (Ok(()), None) => {
                eprintln!("Warning: Log file path {} has no file name", log_file.display());
                eprintln!("Falling back to stderr logging");
            }
        }
    }

    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }

    None
}
