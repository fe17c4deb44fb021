use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spillcheck::config::AppConfig;
use spillcheck::quality::{
    count_rows_for_bad_spills, delete_rows_for_bad_spills, AnalysisTable, BadSpillCache,
    BadSpillSet, DataSource, EvaluationReport, Evaluator, FailurePolicy, SpillStore,
    ThresholdConfig,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Classify spills of a production dataset and manage the bad-spill set.
#[derive(Parser, Debug)]
#[command(name = "spillcheck", version, about)]
struct Cli {
    /// Config file (default: platform config dir / config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate every quality rule and print the bad-spill summary
    Evaluate {
        #[command(flatten)]
        target: Target,
        /// Persist the set into the dataset's bad_spills table
        #[arg(long)]
        store: bool,
        /// With --store, add to the existing table instead of replacing it
        #[arg(long, requires = "store")]
        append: bool,
        /// Keep going when a rule fails (the result is then not stored)
        #[arg(long)]
        partial: bool,
        /// Rules evaluated concurrently
        #[arg(long)]
        workers: Option<usize>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the bad-spill set stored in the dataset
    Cached {
        #[command(flatten)]
        target: Target,
    },
    /// Delete rows of an analysis table that belong to bad spills
    Cleanup {
        #[command(flatten)]
        target: Target,
        /// Analysis table to clean (must have a spillID column)
        #[arg(long)]
        table: String,
        /// Use the stored bad-spill set instead of re-evaluating
        #[arg(long)]
        from_cache: bool,
        /// Actually delete; without it only the affected row count is shown
        #[arg(long)]
        confirm: bool,
    },
    /// Show which roadset profile a dataset resolves to
    Roadset {
        /// Dataset (schema) name
        #[arg(long)]
        schema: String,
    },
    /// Create an empty dataset with the spill tables
    Init {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Dataset (schema) name
    #[arg(long)]
    schema: String,
    /// Data directory holding dataset files (overrides config)
    #[arg(long)]
    server: Option<String>,
}

impl Target {
    fn source(&self, config: &AppConfig) -> DataSource {
        let server = self.server.clone().unwrap_or_else(|| config.server.clone());
        DataSource::new(server, self.schema.clone())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let thresholds = config.threshold_config()?;

    match cli.command {
        Command::Evaluate {
            target,
            store,
            append,
            partial,
            workers,
            json,
        } => {
            let source = target.source(&config);
            let policy = if partial {
                FailurePolicy::Partial
            } else {
                config.failure_policy
            };
            let conn = if store {
                SpillStore::open(&source)?
            } else {
                SpillStore::open_read_only(&source)?
            };
            let report = evaluator(&thresholds, &source)
                .with_policy(policy)
                .with_workers(workers.unwrap_or(config.workers))
                .evaluate(&conn)?;

            print_report(&report, json)?;

            if store {
                if !report.is_complete() {
                    bail!(
                        "not storing an incomplete bad spill set (failed rules: {})",
                        report.failed_rule_ids().join(", ")
                    );
                }
                BadSpillCache::new(&conn)
                    .write(&report.bad_spills, !append)
                    .context("storing bad spill set")?;
            }
        }
        Command::Cached { target } => {
            let source = target.source(&config);
            let conn = SpillStore::open_read_only(&source)?;
            let set = BadSpillCache::new(&conn).read()?;
            println!("{}", serde_json::to_string(&set)?);
        }
        Command::Cleanup {
            target,
            table,
            from_cache,
            confirm,
        } => {
            let source = target.source(&config);
            let conn = SpillStore::open(&source)?;
            let table = AnalysisTable::resolve(&conn, &table)?;
            let bad: BadSpillSet = if from_cache {
                BadSpillCache::new(&conn).read()?
            } else {
                evaluator(&thresholds, &source)
                    .with_policy(FailurePolicy::FailFast)
                    .with_workers(config.workers)
                    .evaluate(&conn)?
                    .bad_spills
            };

            if confirm {
                let deleted = delete_rows_for_bad_spills(&conn, &table, &bad)?;
                println!("deleted {deleted} rows from {}", table.name());
            } else {
                let affected = count_rows_for_bad_spills(&conn, &table, &bad)?;
                println!(
                    "{affected} rows of {} belong to {} bad spills; rerun with --confirm to delete",
                    table.name(),
                    bad.len()
                );
            }
        }
        Command::Roadset { schema } => {
            let resolution = thresholds.resolve(&schema);
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Command::Init { target } => {
            let source = target.source(&config);
            SpillStore::create(&source)?;
            println!("{}", source.db_path().display());
        }
    }

    Ok(())
}

fn evaluator(thresholds: &ThresholdConfig, source: &DataSource) -> Evaluator {
    Evaluator::from_resolution(thresholds.resolve(&source.schema))
}

fn print_report(report: &EvaluationReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{} on {} (roadset {})",
        report.schema, report.server, report.roadset
    );
    for outcome in &report.outcomes {
        println!("  {:<20} {:>8}", outcome.rule.id(), outcome.violators);
    }
    for failure in &report.failed_rules {
        println!("  {:<20} FAILED: {}", failure.rule.id(), failure.error);
    }
    println!("{} bad spills", report.bad_spills.len());
    Ok(())
}
