//! Command-line front end: bootstrap a store, run configured jobs, inspect results.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use geoharmonize::{GpkgStore, JobReport, Pipeline, PipelineConfig, bootstrap};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "geoharmonize",
    version,
    about = "Normalize geospatial layers and load them into partitioned GeoPackages"
)]
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create namespaces in the store. Without --namespace, creates the reference set.
    Bootstrap {
        /// Directory holding one GeoPackage per namespace.
        #[arg(long, value_name = "DIR")]
        store: PathBuf,

        #[arg(long = "namespace", value_name = "NAME")]
        namespaces: Vec<String>,
    },

    /// Run the jobs of a pipeline config.
    Run {
        /// JSON pipeline config.
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        #[arg(long, value_name = "DIR")]
        store: PathBuf,

        /// Run only this job.
        #[arg(long, value_name = "NAME")]
        job: Option<String>,
    },

    /// List the tables of a namespace with row counts and CRS.
    Inspect {
        #[arg(long, value_name = "DIR")]
        store: PathBuf,

        #[arg(long, value_name = "NAME")]
        namespace: String,

        /// Show only this table.
        #[arg(long, value_name = "NAME")]
        table: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("geoharmonize: cannot install logger: {err}");
    }

    let result = match cli.command {
        Commands::Bootstrap { store, namespaces } => handle_bootstrap(&store, &namespaces),
        Commands::Run { config, store, job } => handle_run(&config, &store, job.as_deref()),
        Commands::Inspect {
            store,
            namespace,
            table,
        } => handle_inspect(&store, &namespace, table.as_deref()),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("geoharmonize failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn handle_bootstrap(root: &Path, namespaces: &[String]) -> Result<bool> {
    let mut store = GpkgStore::open(root)
        .with_context(|| format!("cannot open store at {}", root.display()))?;
    let created = bootstrap(&mut store, namespaces)?;
    for namespace in store.namespaces() {
        let status = if created.iter().any(|c| c == namespace) {
            "created"
        } else {
            "exists"
        };
        println!("{namespace}\t{status}");
    }
    Ok(true)
}

/// Returns `Ok(false)` when a job or a partition failed.
fn handle_run(config_path: &Path, root: &Path, job: Option<&str>) -> Result<bool> {
    let config = PipelineConfig::from_path(config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    let mut store = GpkgStore::open(root)
        .with_context(|| format!("cannot open store at {}", root.display()))?;
    let pipeline = Pipeline::new(config);

    let outcomes = match job {
        Some(name) => {
            if pipeline.config().job(name).is_none() {
                return Err(anyhow!("job '{name}' is not defined in the config"));
            }
            vec![(name.to_string(), pipeline.run_named(name, &mut store))]
        }
        None => pipeline
            .run(&mut store)
            .jobs
            .into_iter()
            .map(|outcome| (outcome.job, outcome.result))
            .collect(),
    };

    let mut success = true;
    for (name, result) in outcomes {
        match result {
            Ok(report) => success &= print_job(&report),
            Err(err) => {
                success = false;
                println!("{name}\tFAILED\t{err}");
            }
        }
    }
    info!(success, "run finished");
    Ok(success)
}

fn print_job(report: &JobReport) -> bool {
    println!(
        "{}\t{}\t{} rows into {}",
        report.job,
        if report.is_complete() { "ok" } else { "PARTIAL" },
        report.load.rows_written(),
        report.load.namespace
    );
    for outcome in &report.load.outcomes {
        match &outcome.result {
            Ok(rows) => println!("  {}\t{rows}", outcome.table_name),
            Err(err) => {
                warn!(table = %outcome.table_name, "partition failed");
                println!("  {}\tFAILED\t{err}", outcome.table_name);
            }
        }
    }
    report.is_complete()
}

fn handle_inspect(root: &Path, namespace: &str, table: Option<&str>) -> Result<bool> {
    let store = GpkgStore::open(root)
        .with_context(|| format!("cannot open store at {}", root.display()))?;
    let summaries = store.summaries(namespace)?;
    let mut found = false;
    for summary in summaries
        .iter()
        .filter(|s| table.is_none_or(|name| s.name == name))
    {
        found = true;
        let crs = summary
            .crs
            .map_or_else(|| "undefined".to_string(), |crs| crs.to_string());
        println!(
            "{}\t{}\t{}\t{}",
            summary.name, summary.rows, summary.geometry_type, crs
        );
    }
    if let Some(name) = table
        && !found
    {
        return Err(anyhow!("table '{name}' not found in namespace '{namespace}'"));
    }
    Ok(true)
}
