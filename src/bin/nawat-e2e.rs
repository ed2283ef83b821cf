//! Command-line runner for the Nawat end-to-end scenarios.
//!
//! Each scenario gets its own browser session, logged in first unless it is
//! the login matrix itself. The summary is printed at the end and the process
//! exits non-zero when any scenario failed.
//!
//! Usage examples:
//!   $ NAWAT_USERNAME=ecole.e2a NAWAT_PASSWORD=... cargo run -- login
//!   $ cargo run -- --headless -v export

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use nawat_e2e::config::{SuiteConfig, SuiteConfigOverrides, UserData};
use nawat_e2e::logging::{SuiteLogger, Verbosity};
use nawat_e2e::preflight;
use nawat_e2e::scenario::{Scenario, ScenarioReport, SuiteSummary, run_scenario};
use nawat_e2e::session::Session;

#[derive(Parser)]
#[command(
    name = "nawat-e2e",
    author,
    version,
    about = "End-to-end UI scenarios for the Nawat school ERP"
)]
struct Cli {
    /// Configuration file (defaults to NAWAT_CONFIG or data/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Users fixture (defaults to NAWAT_USERS or data/users.json).
    #[arg(long, global = true)]
    users: Option<PathBuf>,

    /// Run the browser without a window.
    #[arg(long, global = true)]
    headless: bool,

    /// Skip the HTTP reachability check before launching the browser.
    #[arg(long, global = true)]
    skip_preflight: bool,

    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Language switching, rejected and accepted logins.
    Login,
    /// Open every top-level module.
    Modules,
    /// Click each class in the sidebar and check its students.
    ClassFilters,
    /// Apply each status filter.
    StudentFilters,
    /// Walk the roster pages counting enrolled students.
    Roster,
    /// Search a student by name.
    Search,
    /// Export all students as XLSX and CSV.
    Export,
    /// Run every scenario in order.
    All,
}

impl Command {
    fn scenarios(self) -> Vec<Scenario> {
        match self {
            Command::Login => vec![Scenario::Login],
            Command::Modules => vec![Scenario::Modules],
            Command::ClassFilters => vec![Scenario::ClassFilters],
            Command::StudentFilters => vec![Scenario::StudentFilters],
            Command::Roster => vec![Scenario::Roster],
            Command::Search => vec![Scenario::Search],
            Command::Export => vec![Scenario::Export],
            Command::All => Scenario::ALL.to_vec(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_env_logger(cli.verbose);

    match run(cli).await {
        Ok(summary) => {
            println!("{}", summary.render());
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<SuiteSummary> {
    let config = load_config(&cli)?;
    info!("configuration: {config:?}");
    let users = match &cli.users {
        Some(path) => UserData::load(path),
        None => UserData::from_env(),
    };

    if !cli.skip_preflight {
        let status = preflight::check_login_page(&config, Duration::from_secs(15))
            .await
            .context("login page unreachable")?;
        info!("preflight: login page answered {status}");
    }

    let verbosity = Verbosity::from_occurrences(cli.verbose);
    let mut summary = SuiteSummary::default();
    for scenario in cli.command.scenarios() {
        let reports = run_in_session(scenario, &config, &users, verbosity)
            .await
            .unwrap_or_else(|err| {
                error!("{scenario}: {err:#}");
                vec![ScenarioReport::new(scenario.name()).fail(format!("{err:#}"))]
            });
        summary.extend(reports);
    }
    Ok(summary)
}

async fn run_in_session(
    scenario: Scenario,
    config: &SuiteConfig,
    users: &UserData,
    verbosity: Verbosity,
) -> Result<Vec<ScenarioReport>> {
    let session = Session::launch(config.clone(), SuiteLogger::new(verbosity))
        .await
        .context("failed to launch the browser")?;

    let reports = if scenario.needs_login() {
        match session.logged_in(None).await {
            Ok(()) => run_scenario(scenario, session.page(), users).await,
            Err(err) => vec![ScenarioReport::new(scenario.name()).fail(format!("setup: {err}"))],
        }
    } else {
        run_scenario(scenario, session.page(), users).await
    };

    if let Err(err) = session.close().await {
        warn!("failed to close the browser: {err}");
    }
    Ok(reports)
}

fn load_config(cli: &Cli) -> Result<SuiteConfig> {
    let config = match &cli.config {
        Some(path) => SuiteConfig::from_env_at(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SuiteConfig::from_env().context("failed to load configuration")?,
    };
    if cli.headless {
        return Ok(config.with_overrides(SuiteConfigOverrides::default().headless(true)));
    }
    Ok(config)
}

fn init_env_logger(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .try_init();
    if env::var("RUST_LOG").is_ok() && verbose > 0 {
        warn!("RUST_LOG is set, -v has no effect on the log filter");
    }
}
