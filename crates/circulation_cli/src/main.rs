//! Operator entry point for the circulation core.
//!
//! # Responsibility
//! - Load configuration and bootstrap logging and the store.
//! - Run background sweeps once or on their schedule.
//! - Report crate and schema versions.

use circulation_core::db::migrations::{current_user_version, latest_version};
use circulation_core::db::DbError;
use circulation_core::{
    init_logging, CancellationToken, CirculationConfig, CirculationResult, CirculationServices,
    Store, SweepReport, SweepScheduler, SystemClock,
};
use clap::{Parser, Subcommand};
use log::info;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Library circulation maintenance tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; built-in defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every sweep once and print a report line per sweep
    Sweep,
    /// Run the sweep scheduler until stdin is closed
    Run,
    /// Print crate and schema versions
    Status,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let config = match &args.config {
        Some(path) => CirculationConfig::load(path).map_err(|err| err.to_string())?,
        None => CirculationConfig::default(),
    };
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }

    let store = Arc::new(Store::open(&config.database_path).map_err(|err| err.to_string())?);

    match args.command {
        Command::Status => print_status(&store),
        Command::Sweep => {
            let (lines, all_ok) = run_sweeps(store, &config);
            for line in &lines {
                println!("{line}");
            }
            if !all_ok {
                return Err("one or more sweeps failed".to_string());
            }
            Ok(())
        }
        Command::Run => {
            let services =
                CirculationServices::new(Arc::clone(&store), Arc::new(SystemClock), config.policy);
            let handle =
                SweepScheduler::standard(services.notifier, services.reservations, &config.scheduler)
                    .start(CancellationToken::new())
                    .map_err(|err| err.to_string())?;
            println!("scheduler running; close stdin to stop");

            let mut sink = Vec::new();
            let waited = std::io::stdin().read_to_end(&mut sink);
            handle.shutdown();
            info!("event=cli_run module=cli status=stopped");
            waited.map(|_| ()).map_err(|err| err.to_string())
        }
    }
}

fn print_status(store: &Store) -> Result<(), String> {
    for line in status_lines(store).map_err(|err| err.to_string())? {
        println!("{line}");
    }
    Ok(())
}

/// Runs every standard sweep once; the flag is `false` when any sweep failed.
fn run_sweeps(store: Arc<Store>, config: &CirculationConfig) -> (Vec<String>, bool) {
    let services = CirculationServices::new(store, Arc::new(SystemClock), config.policy);
    let scheduler =
        SweepScheduler::standard(services.notifier, services.reservations, &config.scheduler);
    let results = scheduler.run_all_once();
    let all_ok = results.iter().all(|(_, result)| result.is_ok());
    let lines = results
        .iter()
        .map(|(name, result)| format_sweep_line(name, result))
        .collect();
    (lines, all_ok)
}

fn format_sweep_line(name: &str, result: &CirculationResult<SweepReport>) -> String {
    match result {
        Ok(report) => format!(
            "sweep={name} examined={} applied={} failed={}",
            report.examined, report.applied, report.failed
        ),
        Err(err) => format!("sweep={name} error={err}"),
    }
}

fn status_lines(store: &Store) -> Result<Vec<String>, DbError> {
    let schema_version = store.with_connection(|conn| current_user_version(conn))?;
    let database = match store.path() {
        Some(path) => path.display().to_string(),
        None => ":memory:".to_string(),
    };
    Ok(vec![
        format!("circulation_core version={}", circulation_core::core_version()),
        format!("schema version={schema_version} latest={}", latest_version()),
        format!("database={database}"),
    ])
}

#[cfg(test)]
mod tests {
    use super::{format_sweep_line, run_sweeps, status_lines, Args, Command};
    use circulation_core::db::migrations::latest_version;
    use circulation_core::repo::RepoError;
    use circulation_core::{CirculationConfig, CirculationError, Store, SweepReport};
    use clap::Parser;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn parses_subcommands_and_config_flag() {
        let args = Args::try_parse_from(["circulation_cli", "--config", "lib.json", "sweep"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("lib.json")));
        assert!(matches!(args.command, Command::Sweep));

        let args = Args::try_parse_from(["circulation_cli", "status"]).unwrap();
        assert!(args.config.is_none());
        assert!(matches!(args.command, Command::Status));

        let args = Args::try_parse_from(["circulation_cli", "-c", "lib.json", "run"]).unwrap();
        assert!(matches!(args.command, Command::Run));

        assert!(Args::try_parse_from(["circulation_cli"]).is_err());
        assert!(Args::try_parse_from(["circulation_cli", "purge"]).is_err());
    }

    #[test]
    fn sweep_line_reports_counts_or_error() {
        let report = SweepReport {
            examined: 4,
            applied: 3,
            failed: 1,
        };
        assert_eq!(
            format_sweep_line("overdue", &Ok(report)),
            "sweep=overdue examined=4 applied=3 failed=1"
        );

        let err = CirculationError::TransientStoreFailure(RepoError::InvalidData(
            "bad row".to_string(),
        ));
        assert_eq!(
            format_sweep_line("due_soon", &Err(err)),
            "sweep=due_soon error=store failure: invalid persisted data: bad row"
        );
    }

    #[test]
    fn sweeps_on_empty_store_report_every_job_in_order() {
        let store = Arc::new(Store::in_memory().unwrap());
        let (lines, all_ok) = run_sweeps(store, &CirculationConfig::default());

        assert!(all_ok);
        let names: Vec<_> = lines
            .iter()
            .map(|line| line.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "sweep=overdue",
                "sweep=due_soon",
                "sweep=reservation_expiry",
                "sweep=reservation_availability",
            ]
        );
        assert!(lines
            .iter()
            .all(|line| line.ends_with("examined=0 applied=0 failed=0")));
    }

    #[test]
    fn status_reports_schema_and_in_memory_database() {
        let store = Store::in_memory().unwrap();
        let lines = status_lines(&store).unwrap();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("circulation_core version="));
        assert_eq!(
            lines[1],
            format!("schema version={} latest={}", latest_version(), latest_version())
        );
        assert_eq!(lines[2], "database=:memory:");
    }
}
