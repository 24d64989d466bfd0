use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use shm_cleaner::{
    parse_time_spec, CleanerConfig, CleanupError, DaemonConfig, DaemonScheduler,
    ReconciliationEngine, TimeUnit,
};
use shm_logging::LogConfig;

/// Cleanup /dev/shm
///
/// Removes first-level entries under /dev/shm that are older than the age
/// threshold and not open by any process.
#[derive(Parser, Debug)]
#[command(name = "shm-cleanup", version, about)]
struct Cli {
    /// Increase level of verbosity.
    #[arg(short, long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease level of verbosity.
    #[arg(short, long = "quiet", action = clap::ArgAction::Count)]
    quiet: u8,

    /// Do not remove any files, just display what would be done; this option
    /// sets the base verbosity level to INFO (as in -vv).
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Display timestamps on all messages logged by this program.
    #[arg(short = 't', long)]
    show_log_timestamps: bool,

    /// Only items older than this will be removed; integer or floating-point
    /// values are acceptable with optional unit of s/m/h/d (default: d).
    #[arg(short, long = "age", value_name = "age-threshold", default_value = "1")]
    age_threshold: String,

    /// Do not treat PSM2 and vader segment files any differently than other files.
    #[arg(long)]
    no_special_treatment: bool,

    /// Send all logging to this file instead of to stderr; timestamps are
    /// always enabled when logging to a file.
    #[arg(short, long, value_name = "filename")]
    log_file: Option<PathBuf>,

    /// Run as a daemon, periodically waking to re-check.
    #[arg(long)]
    daemon: bool,

    /// Wake to re-check on the given period; integer or floating-point values
    /// are acceptable with optional unit of s/m/h/d (default: s).
    #[arg(long, value_name = "period", default_value = "86400")]
    daemon_period: String,

    /// In daemon mode, write our pid to this file.
    #[arg(long, value_name = "filename", default_value = "/var/run/shm-cleanup.pid")]
    pid_file: PathBuf,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    dump_config: bool,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        let level = shm_logging::verbosity_level(self.dry_run, self.verbose, self.quiet);
        LogConfig {
            level: level.to_string().to_lowercase(),
            log_file: self.log_file.clone(),
            show_timestamps: self.show_log_timestamps,
            json_format: false,
        }
    }

    fn cleaner_config(&self) -> Result<CleanerConfig, CleanupError> {
        let age = parse_time_spec(&self.age_threshold, TimeUnit::Days, "age threshold")?;
        let mut config = CleanerConfig {
            age_threshold_secs: age.as_secs_f64(),
            special_treatment: !self.no_special_treatment,
            dry_run: self.dry_run,
            daemon: DaemonConfig {
                enabled: self.daemon,
                pid_file: self.pid_file.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        if self.daemon {
            let period = parse_time_spec(&self.daemon_period, TimeUnit::Seconds, "daemon period")?;
            config.daemon.period_secs = period.as_secs_f64();
        }
        config.validate()?;
        Ok(config)
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.cleaner_config()?;

    if cli.dump_config {
        let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
        print!("{rendered}");
        return Ok(());
    }

    if !config.special_treatment {
        shm_logging::info!("no special treatment of PSM2 and vader segment files");
    }
    shm_logging::info!(
        "age threshold of {} second(s)",
        config.age_threshold()?.as_secs_f64()
    );

    let engine = ReconciliationEngine::from_config(&config)?;

    if config.daemon.enabled {
        let scheduler = DaemonScheduler::new(
            config.daemon.period()?,
            config.daemon.pid_file().map(PathBuf::from),
        );
        scheduler.run_until_signal(|| engine.run_once()).await?;
    } else {
        engine.run_once()?;
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match shm_logging::init_logging(&cli.log_config()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("shm-cleanup: {e}");
            return ExitCode::from(shm_cleaner::error::EXIT_CONFIG);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::from(shm_cleaner::error::EXIT_OK),
        Err(e) => match e.downcast_ref::<CleanupError>() {
            Some(cleanup) => {
                shm_logging::error!("{}", cleanup);
                ExitCode::from(cleanup.exit_code())
            }
            None => {
                shm_logging::error!("{:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("shm-cleanup").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        let config = cli.cleaner_config().unwrap();
        assert_eq!(config.age_threshold_secs, 86400.0);
        assert!(config.special_treatment);
        assert!(!config.dry_run);
        assert!(!config.daemon.enabled);
        assert_eq!(cli.log_config().level, "error");
    }

    #[test]
    fn test_dry_run_raises_verbosity() {
        let cli = parse(&["-n"]);
        assert_eq!(cli.log_config().level, "info");
        let cli = parse(&["-n", "-v"]);
        assert_eq!(cli.log_config().level, "debug");
        let cli = parse(&["-qq"]);
        assert_eq!(cli.log_config().level, "error");
    }

    #[test]
    fn test_age_units() {
        let config = parse(&["--age", "12h"]).cleaner_config().unwrap();
        assert_eq!(config.age_threshold_secs, 43200.0);
        let config = parse(&["-a", "2"]).cleaner_config().unwrap();
        assert_eq!(config.age_threshold_secs, 172800.0);
    }

    #[test]
    fn test_invalid_age_exits_2() {
        let err = parse(&["--age", "yesterday"]).cleaner_config().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_daemon_options() {
        let config = parse(&["--daemon", "--daemon-period", "5m", "--pid-file", "/run/x.pid"])
            .cleaner_config()
            .unwrap();
        assert!(config.daemon.enabled);
        assert_eq!(config.daemon.period_secs, 300.0);
        assert_eq!(config.daemon.pid_file(), Some(std::path::Path::new("/run/x.pid")));
    }

    #[test]
    fn test_relative_pid_file_exits_2() {
        let err = parse(&["--daemon", "--pid-file", "x.pid"])
            .cleaner_config()
            .unwrap_err();
        assert!(matches!(err, CleanupError::PidFileNotAbsolute(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_period_only_checked_in_daemon_mode() {
        assert!(parse(&["--daemon-period", "never"]).cleaner_config().is_ok());
        let err = parse(&["--daemon", "--daemon-period", "never"])
            .cleaner_config()
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_no_special_treatment() {
        let config = parse(&["--no-special-treatment"]).cleaner_config().unwrap();
        assert!(!config.special_treatment);
    }
}
