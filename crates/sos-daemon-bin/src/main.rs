//! SOS outbox daemon: queues rider safety actions offline and syncs them.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sos_config_and_utils::{init_logging, Config, Paths, SyncLock};
use sos_database::Severity;

/// SOS outbox command-line interface.
#[derive(Parser)]
#[command(name = "sos-outboxd")]
#[command(about = "Offline outbox and sync engine for rider safety sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (database, logs, config). Defaults to ~/.sos-outbox
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync loop until interrupted
    Run,
    /// Drain the queue once and exit
    SyncOnce,
    /// Queue a new session
    StartSession {
        /// Free-form note attached to the session
        #[arg(default_value = "")]
        note: String,
    },
    /// Queue closing the active session
    EndSession,
    /// Queue a location sample for the active session
    Sample {
        #[arg(allow_negative_numbers = true)]
        latitude: f64,
        #[arg(allow_negative_numbers = true)]
        longitude: f64,
    },
    /// Queue a hazard report
    Report {
        category: String,
        /// low, medium or high
        #[arg(short, long, default_value = "medium", value_parser = parse_severity)]
        severity: Severity,
        #[arg(short, long)]
        description: String,
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
    },
    /// Show queue and session status
    Status,
    /// List records that exhausted their delivery attempts
    DeadLetters,
    /// Drop every queued record
    Clear,
}

fn parse_severity(value: &str) -> Result<Severity, String> {
    Severity::parse(value).ok_or_else(|| format!("unknown severity: {value}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(config.log_level.as_str());
    init_logging(level, Some(paths.log_file()));

    let mut engine = app::Engine::open(&config, &paths).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let lock = SyncLock::acquire(&paths.lock_file())?;
            engine.claim_sync(lock).await?;
            app::run_daemon(&engine).await?
        }
        Commands::SyncOnce => app::sync_once(&mut engine, &paths).await?,
        Commands::StartSession { note } => app::start_session(&engine, note).await?,
        Commands::EndSession => app::end_session(&engine).await?,
        Commands::Sample {
            latitude,
            longitude,
        } => app::add_sample(&engine, latitude, longitude).await?,
        Commands::Report {
            category,
            severity,
            description,
            latitude,
            longitude,
        } => {
            app::submit_report(&engine, category, severity, description, latitude, longitude)
                .await?
        }
        Commands::Status => app::print_status(&engine).await?,
        Commands::DeadLetters => app::print_dead_letters(&engine).await?,
        Commands::Clear => app::clear(&engine).await?,
    }

    engine.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_negative_coordinates() {
        let cli = Cli::try_parse_from(["sos-outboxd", "sample", "-33.9", "-70.6"]).unwrap();
        match cli.command {
            Some(Commands::Sample {
                latitude,
                longitude,
            }) => assert_eq!((latitude, longitude), (-33.9, -70.6)),
            _ => panic!("expected sample command"),
        }
    }

    #[test]
    fn report_severity_is_validated() {
        assert!(Cli::try_parse_from([
            "sos-outboxd",
            "report",
            "pothole",
            "--severity",
            "extreme",
            "--description",
            "x",
            "--latitude",
            "1",
            "--longitude",
            "2",
        ])
        .is_err());
    }

    #[test]
    fn no_command_defaults_to_run() {
        let cli = Cli::try_parse_from(["sos-outboxd", "--log-level", "debug"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
