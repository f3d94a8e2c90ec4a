// CLI module - command-line entry point

use crate::config::ServerLaunchSpec;
use crate::error::{PtError, Result};
use crate::process::{AdapterConfig, LifecycleSupervisor, ManagedTransportAdapter};
use crate::signals::SignalBridge;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Run a pluggable transport as a standalone server
#[derive(Parser, Debug)]
#[command(name = "ptserver")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file
    config: PathBuf,

    /// Increase verbosity (once for info, twice for debug)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Suppress all log output
    #[arg(short, long)]
    quiet: bool,

    /// Validate the configuration, print the resolved launch spec and exit
    #[arg(long)]
    check: bool,

    /// Seconds the PT may take to report its transports
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    startup_timeout: u64,

    /// Seconds to wait for the PT to exit after each stop request
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    stop_timeout: u64,
}

impl Cli {
    /// Parse arguments, run, and map the result to an exit code
    pub async fn run() -> ExitCode {
        let cli = Cli::parse();
        cli.init_logging();

        match cli.execute().await {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                eprintln!("✗ Error: {}", e);
                ExitCode::from(e.exit_code())
            }
        }
    }

    /// Log filter derived from `-v` / `-q`
    fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "off";
        }

        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    /// Install the global tracing subscriber
    ///
    /// `RUST_LOG` takes precedence over `-v` unless `--quiet` is given.
    fn init_logging(&self) {
        let filter = if self.quiet {
            EnvFilter::new("off")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_filter()))
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            startup_timeout: Duration::from_secs(self.startup_timeout),
            stdin_close_grace: Duration::from_secs(self.stop_timeout),
            stop_timeout: Duration::from_secs(self.stop_timeout),
        }
    }

    /// Execute the parsed command, returning the exit code
    async fn execute(&self) -> Result<u8> {
        debug!("Arguments: {:?}", self);

        let spec = ServerLaunchSpec::from_file(&self.config)?;
        info!("Read config file {}", self.config.display());
        debug!("Transports: {:?}", spec.transports);

        if self.check {
            let rendered = serde_json::to_string_pretty(&spec).map_err(|e| {
                PtError::ConfigError(format!("Failed to render launch spec: {}", e))
            })?;
            println!("{}", rendered);
            return Ok(0);
        }

        let signals = SignalBridge::install()?;
        let shutdown = signals.token();

        let adapter = ManagedTransportAdapter::new(self.adapter_config());
        let mut supervisor = LifecycleSupervisor::new(adapter);

        let outcome = supervisor.run(&spec, &shutdown).await?;
        Ok(outcome.exit_code())
    }
}
