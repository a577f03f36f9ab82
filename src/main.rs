mod command;
mod config;
mod filesystem;
mod log_tail;
mod matchers;
mod qstar;
mod replica;
mod scheduler;
mod state;

use clap::Parser;
use config::AgentConfig;
use log_tail::LogConfig;
use scheduler::CheckKind;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Collector for QStar cache filesystems: periodically extracts filesystem,
/// replica and log metrics and writes them as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "qstar-agent", version, about)]
pub struct Cli {
    /// Run each check once, print its report and exit
    #[arg(long)]
    once: bool,

    /// Only run this check (default: all)
    #[arg(long, value_enum)]
    check: Option<CheckKind>,

    /// Log file to tail (overrides LOG_FILE_PATH)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Bytes to read from the end of the log (overrides LOG_BUF_SIZE)
    #[arg(long)]
    log_buf_size: Option<u64>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (commands run, omitted optional fields)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<AgentConfig, config::ConfigError> {
    let mut config = AgentConfig::from_env()?;
    if cli.log_file.is_some() || cli.log_buf_size.is_some() {
        let path = cli
            .log_file
            .clone()
            .unwrap_or_else(|| config.log.path().to_path_buf());
        let window = cli.log_buf_size.unwrap_or(config.log.window());
        config.log = LogConfig::new(config.log.layout(), path, window)?;
    }
    Ok(config)
}

fn print_config(config: &AgentConfig) {
    println!("qstar-agent v{}", env!("CARGO_PKG_VERSION"));
    println!("  qstar interval: {}s", config.qstar_interval.as_secs());
    println!("  log interval:   {}s", config.log_interval.as_secs());
    println!("  log file:       {}", config.log.path().display());
    println!("  log window:     {} bytes", config.log.window());
    println!(
        "  log layout:     {} ({} byte prefix)",
        config.log.layout(),
        config.log.prefix_len()
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    tracing::info!("starting qstar-agent v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        print_config(&config);
        return ExitCode::SUCCESS;
    }

    let checks: Vec<CheckKind> = match cli.check {
        Some(kind) => vec![kind],
        None => CheckKind::ALL.to_vec(),
    };

    if cli.once {
        let config = Arc::new(config);
        let mut failed = false;
        for kind in checks {
            let config = Arc::clone(&config);
            let joined = tokio::task::spawn_blocking(move || {
                scheduler::run_check(kind, &config, &command::SystemRunner)
            })
            .await;
            match joined {
                Ok(report) => {
                    failed |= !report.is_ok();
                    scheduler::emit(&report);
                }
                Err(e) => {
                    tracing::error!(check = kind.key(), error = %e, "check task panicked");
                    failed = true;
                }
            }
        }
        return if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    scheduler::run_forever(Arc::new(config), checks).await;
    ExitCode::SUCCESS
}
