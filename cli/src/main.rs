//! gatekeep CLI - replay navigation scenarios against the guard.
//!
//! ```text
//! gatekeep simulate <scenario.toml> [--config <path>]
//! gatekeep check-config [--config <path>]
//! ```
//!
//! `simulate` prints one JSON object per line on stdout for every deferral,
//! decision, redirect and session change. Logs go to stderr, filtered by
//! `RUST_LOG`, then `[logging].filter` from the config, then `info`.

mod scenario;

use std::env;
use std::io::{Write, stdout};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use gatekeep_config::{ConfigWarning, GatekeepConfig};

use crate::scenario::Scenario;

const USAGE: &str = "\
usage:
  gatekeep simulate <scenario.toml> [--config <path>]
  gatekeep check-config [--config <path>]";

fn init_tracing(config_filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::try_new("info").expect("info filter is valid"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Simulate {
        scenario: PathBuf,
        config: Option<PathBuf>,
    },
    CheckConfig {
        config: Option<PathBuf>,
    },
    Help,
}

fn parse_args<I>(args: I) -> Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let Some(command) = args.next() else {
        return Ok(Command::Help);
    };

    let mut positional = Vec::new();
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') => bail!("unknown flag: {flag}"),
            _ => positional.push(arg),
        }
    }

    match command.as_str() {
        "simulate" => {
            let mut positional = positional.into_iter();
            let scenario = positional.next().context("simulate needs a scenario file")?;
            if let Some(extra) = positional.next() {
                bail!("unexpected argument: {extra}");
            }
            Ok(Command::Simulate {
                scenario: PathBuf::from(scenario),
                config,
            })
        }
        "check-config" => {
            if let Some(extra) = positional.first() {
                bail!("unexpected argument: {extra}");
            }
            Ok(Command::CheckConfig { config })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => bail!("unknown command: {other}"),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<GatekeepConfig> {
    match path {
        Some(path) => Ok(GatekeepConfig::load_from(path)?),
        None => GatekeepConfig::load()?.with_context(|| {
            let location = GatekeepConfig::path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "~/.gatekeep/config.toml".to_string());
            format!("no config found at {location}; pass --config <path>")
        }),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let command = match parse_args(env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("error: {err}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_ref())?;
            init_tracing(config.log_filter());
            let warnings = config.report_warnings();
            if warnings.is_empty() {
                println!("config ok");
            } else {
                for warning in &warnings {
                    println!("warning: {warning}");
                }
            }
            Ok(())
        }
        Command::Simulate { scenario, config } => {
            let config = load_config(config.as_ref())?;
            init_tracing(config.log_filter());
            // The guard reports the missing post-auth path itself at install.
            for warning in config
                .validate()
                .into_iter()
                .filter(|warning| *warning != ConfigWarning::MissingPostAuthPath)
            {
                tracing::warn!("{warning}");
            }
            let scenario = Scenario::load(&scenario)?;

            let stdout = stdout();
            scenario::run(&config, scenario, |record| {
                let line = serde_json::to_string(record)?;
                writeln!(stdout.lock(), "{line}")?;
                Ok(())
            })
            .await
        }
    }
}
