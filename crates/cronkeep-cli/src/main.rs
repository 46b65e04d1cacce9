use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use cronkeep_core::config::CronkeepConfig;
use cronkeep_engine::{from_config, CronEntry, CrontabBackend, IdentityTag, Reconciler};

mod manifest;

use manifest::Manifest;

/// Keep per-user crontabs in line with a declared set of jobs.
#[derive(Debug, Parser)]
#[command(
    name = "cronkeep",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CRONKEEP_GIT_SHA"), ")"),
    about
)]
struct Cli {
    /// Configuration file (defaults to $CRONKEEP_CONFIG, then ~/.cronkeep/cronkeep.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the jobs in a user's crontab
    List {
        #[arg(short, long)]
        user: String,

        /// Emit JSON instead of crontab lines
        #[arg(long)]
        json: bool,
    },
    /// Reconcile every job declared in a TOML manifest
    Apply {
        manifest: PathBuf,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

type Backend = Box<dyn CrontabBackend>;

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cronkeep=info,cronkeep_engine=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CronkeepConfig::load(cli.config.as_deref())?;
    info!(backend = ?config.backend.kind, label = %config.tag.label, "configuration loaded");

    let reconciler = Reconciler::new(from_config(&config.backend))
        .with_tag(IdentityTag::new(&config.tag.label));

    match cli.command {
        Command::List { user, json } => list(&reconciler, &user, json),
        Command::Apply { manifest, dry_run } => {
            let manifest = Manifest::load(&manifest)?;
            Ok(apply_manifest(&reconciler, &manifest, dry_run))
        }
    }
}

#[derive(Serialize)]
struct ListedJob<'a> {
    name: Option<&'a str>,
    user: &'a str,
    schedule: String,
    command: &'a str,
    environment: &'a [String],
}

fn list(reconciler: &Reconciler<Backend>, user: &str, json: bool) -> anyhow::Result<ExitCode> {
    let entries = reconciler.instances(user)?;

    if json {
        let listed: Vec<ListedJob<'_>> = entries
            .iter()
            .map(|e| ListedJob {
                name: e.name().map(|n| n.as_str()),
                user: e.user(),
                schedule: e.schedule().to_string(),
                command: e.command(),
                environment: e.environment(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(ExitCode::SUCCESS);
    }

    for entry in &entries {
        if let Some(name) = entry.name() {
            println!("{}", reconciler.tag().render(name.as_str()));
        }
        for line in entry.environment() {
            println!("{line}");
        }
        println!("{}", entry.to_line());
    }
    Ok(ExitCode::SUCCESS)
}

fn apply_manifest(
    reconciler: &Reconciler<Backend>,
    manifest: &Manifest,
    dry_run: bool,
) -> ExitCode {
    let mut failed = false;
    let mut by_user: BTreeMap<&str, Vec<(&str, CronEntry)>> = BTreeMap::new();

    for spec in &manifest.jobs {
        match spec.to_entry() {
            Ok(entry) => by_user
                .entry(spec.user.as_str())
                .or_default()
                .push((spec.label(), entry)),
            Err(e) => {
                error!(job = spec.label(), code = e.code(), "{e}");
                failed = true;
            }
        }
    }

    for (user, jobs) in &by_user {
        let (labels, entries): (Vec<&str>, Vec<CronEntry>) = jobs.iter().cloned().unzip();
        let result = if dry_run {
            reconciler
                .plan(user, &entries)
                .map(|(_, changes)| changes)
        } else {
            reconciler.sync_all(user, &entries)
        };

        match result {
            Ok(changes) => {
                for (label, change) in labels.iter().zip(&changes) {
                    println!("{user}\t{label}\t{change}");
                }
            }
            Err(e) => {
                error!(%user, code = e.code(), "{e}");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
