//! Command-line front end for suite binaries.
//!
//! A suite binary builds its [`Runner`], then hands it to [`Args::execute`]:
//!
//! ```rust,ignore
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     parley::cli::init_tracing();
//!     let args = parley::cli::Args::parse();
//!     let runner = Runner::new("chat-window", ctx).scenario(/* ... */);
//!     std::process::exit(args.execute(runner).await);
//! }
//! ```
//!
//! Verbosity follows `RUST_LOG` (default `warn`).

use std::time::Duration;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{Config, Report, Runner};

#[derive(Debug, Clone, Default, Parser)]
#[command(about = "Run a parley scenario suite", version)]
pub struct Args {
    #[arg(
        long,
        env = "PARLEY_FILTER",
        help = "Only run scenarios whose label contains this substring"
    )]
    pub filter: Option<String>,

    #[arg(
        long,
        env = "PARLEY_STRICT",
        help = "Report messages on topics nobody handles as errors"
    )]
    pub strict: bool,

    #[arg(
        long = "timeout-ms",
        env = "PARLEY_TIMEOUT_MS",
        help = "Per-scenario timeout in milliseconds"
    )]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Print the report as JSON instead of the text summary")]
    pub json: bool,

    #[arg(long, help = "List the scenarios that would run and exit")]
    pub list: bool,
}

impl Args {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Apply the flags on top of a runner's configuration.
    pub fn apply(&self, config: Config) -> Config {
        let mut config = config;
        if self.strict {
            config = config.with_strict_topics(true);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_scenario_timeout(Duration::from_millis(ms));
        }
        config
    }

    /// Configure the runner from the flags.
    pub fn configure<C: Clone + 'static>(&self, runner: Runner<C>) -> Runner<C> {
        let config = self.apply(runner.config().clone());
        let runner = runner.with_config(config);
        match &self.filter {
            Some(pattern) => runner.filter(pattern.clone()),
            None => runner,
        }
    }

    /// Run the suite, print the outcome and return the process exit code.
    pub async fn execute<C: Clone + 'static>(&self, runner: Runner<C>) -> i32 {
        let runner = self.configure(runner);
        if self.list {
            for label in runner.scenario_labels() {
                println!("{label}");
            }
            return 0;
        }
        let report = runner.run().await;
        self.print(&report);
        report.exit_code()
    }

    fn print(&self, report: &Report) {
        if !self.json {
            println!("{report}");
            return;
        }
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => {
                tracing::error!(error = %e, "could not serialize report");
                println!("{report}");
            }
        }
    }
}

/// Install a compact `tracing` subscriber filtered by `RUST_LOG`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = Args::try_parse_from(["suite", "--strict", "--timeout-ms", "250"]).unwrap();
        let config = args.apply(Config::default());
        assert!(config.strict_topics());
        assert_eq!(config.scenario_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn defaults_leave_config_alone() {
        let args = Args::try_parse_from(["suite"]).unwrap();
        let config = args.apply(Config::default().with_strict_topics(false));
        assert!(!config.strict_topics());
        assert_eq!(config.scenario_timeout(), Config::default().scenario_timeout());
        assert!(!args.json && !args.list);
    }

    #[tokio::test]
    async fn list_prints_filtered_labels_without_running() {
        use std::{cell::Cell, rc::Rc};

        use crate::Scenario;

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let runner = Runner::new("suite", ())
            .scenario(Scenario::new("open chat", move |case| {
                let flag = flag.clone();
                async move {
                    flag.set(true);
                    case.done()
                }
            }))
            .scenario(Scenario::new("logout", |case| async move { case.done() }));

        let args = Args::try_parse_from(["suite", "--list", "--filter", "open"]).unwrap();
        let runner = args.configure(runner);
        assert_eq!(runner.scenario_labels(), ["open chat"]);

        assert_eq!(args.execute(runner).await, 0);
        assert!(!ran.get());
    }
}
