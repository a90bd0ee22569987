mod bucket;
mod capabilities;
mod cli;
mod config;
mod engine;
mod error;
mod manifest;
mod merger;
mod reaper;
mod shell;
#[cfg(test)]
mod testing;
mod types;
mod util;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bucket::Granularity;
use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::engine::{Decision, Engine, monthly_decision, yearly_decision};
use crate::error::{ConsolidateError, Result};
use crate::manifest::ManifestStore;
use crate::shell::{require_tools, shell_backends};
use crate::types::Retired;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Label { raw, granularity } = &cli.command {
        let settings = Settings::from_env()?;
        let label = settings.anchor.label(raw, *granularity)?;
        return emit(cli.json, &LabelOutput { raw, granularity: *granularity, label: &label }, &label);
    }

    let mut settings = Settings::from_env()?;
    if let Some(manifest) = cli.manifest {
        settings.manifest = manifest;
    }
    if let Some(work_dir) = cli.work_dir {
        settings.work_dir = work_dir;
    }
    // Tools run with the work dir as cwd, so paths handed to them must be absolute.
    settings.work_dir = settings.work_dir.canonicalize().map_err(|_| {
        ConsolidateError::PreconditionMissing {
            what: "work directory",
            path: settings.work_dir.clone(),
        }
    })?;

    let store = ManifestStore::new(settings.manifest.clone());
    if !store.exists() {
        return Err(ConsolidateError::ManifestMissing(settings.manifest.clone()));
    }
    if cli.command.needs_tools() {
        require_tools(&settings)?;
    }

    let now = Utc::now().naive_utc();
    match cli.command {
        Command::Status => {
            let status = status(&settings, &store, now)?;
            let text = status.to_string();
            emit(cli.json, &status, &text)
        }
        Command::Run => {
            let engine = Engine::new(settings.clone(), shell_backends(&settings));
            let report = engine.run(now)?;
            info!("archive rollup finished");
            let text = format!(
                "daily: {}\nmonthly: {}\nyearly: {}",
                report.daily, report.monthly.outcome, report.yearly.outcome
            );
            emit(cli.json, &report, &text)
        }
        Command::Publish => {
            let engine = Engine::new(settings.clone(), shell_backends(&settings));
            let outcome = engine.publish_daily()?;
            let text = outcome.to_string();
            emit(cli.json, &outcome, &text)
        }
        Command::Monthly => {
            let engine = Engine::new(settings.clone(), shell_backends(&settings));
            let report = engine.consolidate_monthly()?;
            let text = report.outcome.to_string();
            emit(cli.json, &report, &text)
        }
        Command::Yearly => {
            let engine = Engine::new(settings.clone(), shell_backends(&settings));
            let report = engine.consolidate_yearly(now)?;
            let text = report.outcome.to_string();
            emit(cli.json, &report, &text)
        }
        Command::Label { .. } => Ok(()),
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: &str) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)
            .map_err(|e| ConsolidateError::Config(format!("cannot encode output: {e}")))?;
        println!("{out}");
    } else {
        println!("{text}");
    }
    Ok(())
}

#[derive(Serialize)]
struct LabelOutput<'a> {
    raw: &'a str,
    granularity: Granularity,
    label: &'a str,
}

#[derive(Debug, Serialize)]
struct TierStatus {
    count: usize,
    newest: Option<String>,
    label: Option<String>,
    next: String,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    daily: TierStatus,
    monthly: TierStatus,
    yearly: usize,
    #[serde(skip_serializing_if = "Retired::is_empty")]
    retired: Retired,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (tier, status) in [("daily", &self.daily), ("monthly", &self.monthly)] {
            write!(f, "{tier:<8} {:>3}", status.count)?;
            if let (Some(newest), Some(label)) = (&status.newest, &status.label) {
                write!(f, "  newest {newest} ({label})")?;
            }
            writeln!(f, "  next: {}", status.next)?;
        }
        write!(f, "{:<8} {:>3}", "yearly", self.yearly)?;
        if !self.retired.is_empty() {
            write!(
                f,
                "\npending cleanup: {} daily, {} monthly",
                self.retired.daily.len(),
                self.retired.monthly.len()
            )?;
        }
        Ok(())
    }
}

fn describe(decision: Decision) -> String {
    match decision {
        Decision::Idle => "not due".to_string(),
        Decision::Waiting { until } => format!("due after {}", until.format("%Y-%m-%d %H:%M:%S")),
        Decision::Promote { reason, .. } => format!("due ({reason})"),
    }
}

fn status(settings: &Settings, store: &ManifestStore, now: chrono::NaiveDateTime) -> Result<StatusReport> {
    let manifest = store.load()?;
    let daily = manifest.daily_descriptors()?;
    let monthly = manifest.monthly_descriptors()?;
    let anchor = &settings.anchor;

    let daily_status = TierStatus {
        count: daily.len(),
        newest: daily.last().map(|d| d.name()),
        label: daily.last().map(|d| anchor.label_at(d.end_timestamp, Granularity::Day)),
        next: describe(monthly_decision(anchor, settings.monthly_threshold, &daily)),
    };
    let monthly_status = TierStatus {
        count: monthly.len(),
        newest: monthly.last().map(|d| d.name()),
        label: monthly.last().map(|d| anchor.label_at(d.end_timestamp, Granularity::Month)),
        next: describe(yearly_decision(
            anchor,
            settings.yearly_threshold,
            settings.grace_days,
            &monthly,
            now,
        )),
    };
    Ok(StatusReport {
        daily: daily_status,
        monthly: monthly_status,
        yearly: manifest.yearly.len(),
        retired: manifest.retired,
    })
}
