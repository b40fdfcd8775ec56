//! Normalization stages and the job runner that chains them.
//!
//! Every stage takes a [`GeoTable`] by value and returns a new one:
//!
//! read -> [`validate`] -> [`standardize`] -> [`concatenate`] +
//! [`apply_label_mappings`] -> [`SpatialFilter`] -> [`reproject`] -> [`load`]

mod filter;
mod harmonize;
mod load;
mod reproject;
mod standardize;
mod validate;

pub use filter::{FilterReport, SpatialFilter, SpatialPredicate, filter_within};
pub use harmonize::{HarmonizeReport, LabelMapping, apply_label_mappings, concatenate, value_counts};
pub use load::{LoadReport, PartitionOutcome, load};
pub use reproject::reproject;
pub use standardize::{
    StandardizeReport, geometry_types, promote_to_multi, retain_geometry_types, standardize,
    standardize_with_report,
};
pub use validate::{ValidationReport, make_valid, validate, validate_with_report};

use crate::config::{FilterConfig, JobConfig, LayerSource, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::store::{SpatialStore, read_layer};
use crate::table::GeoTable;
use tracing::{error, info, info_span};

/// Counts gathered while preparing one input layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputReport {
    pub source: LayerSource,
    pub validation: ValidationReport,
    pub standardize: StandardizeReport,
}

/// Everything one job did, stage by stage.
#[derive(Debug)]
pub struct JobReport {
    pub job: String,
    pub inputs: Vec<InputReport>,
    /// Present when label mappings were applied.
    pub harmonize: Option<HarmonizeReport>,
    pub filter: Option<FilterReport>,
    pub load: LoadReport,
}

impl JobReport {
    pub fn is_complete(&self) -> bool {
        self.load.is_complete()
    }
}

#[derive(Debug)]
pub struct JobOutcome {
    pub job: String,
    pub result: Result<JobReport>,
}

/// Result of [`Pipeline::run`].
#[derive(Debug, Default)]
pub struct RunReport {
    pub jobs: Vec<JobOutcome>,
}

impl RunReport {
    /// `true` when every job ran and every partition was written.
    pub fn is_success(&self) -> bool {
        self.jobs
            .iter()
            .all(|outcome| matches!(&outcome.result, Ok(report) if report.is_complete()))
    }
}

/// Runs configured jobs against a store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every job in order. A failed job does not stop the next one.
    pub fn run<S: SpatialStore + ?Sized>(&self, store: &mut S) -> RunReport {
        let jobs = self
            .config
            .jobs
            .iter()
            .map(|job| {
                let result = self.run_job(job, store);
                if let Err(err) = &result {
                    error!(job = %job.name, error = %err, "job failed");
                }
                JobOutcome {
                    job: job.name.clone(),
                    result,
                }
            })
            .collect();
        RunReport { jobs }
    }

    /// Run the job called `name`.
    pub fn run_named<S: SpatialStore + ?Sized>(&self, name: &str, store: &mut S) -> Result<JobReport> {
        let job = self
            .config
            .job(name)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("unknown job '{name}'")))?;
        self.run_job(job, store)
    }

    pub fn run_job<S: SpatialStore + ?Sized>(&self, job: &JobConfig, store: &mut S) -> Result<JobReport> {
        let _span = info_span!("job", name = %job.name).entered();

        let mut tables = Vec::with_capacity(job.inputs.len());
        let mut inputs = Vec::with_capacity(job.inputs.len());
        for source in &job.inputs {
            let table = read_layer(&source.path, &source.layer)?;
            let (table, validation) = validate_with_report(table)?;
            let (table, standardize) = standardize_with_report(table)?;
            tables.push(table);
            inputs.push(InputReport {
                source: source.clone(),
                validation,
                standardize,
            });
        }

        let mut table = if tables.len() == 1 {
            tables.remove(0)
        } else {
            concatenate(tables)?
        };

        let mappings = self.config.label_mappings_for(job);
        let harmonize = if mappings.is_empty() {
            None
        } else {
            let (mapped, report) = apply_label_mappings(table, mappings)?;
            table = mapped;
            Some(report)
        };

        let filter = match &job.filter {
            Some(filter_config) => {
                let (filtered, report) = apply_filter(table, filter_config)?;
                table = filtered;
                Some(report)
            }
            None => None,
        };

        let table = reproject(table, self.config.target_crs)?;
        let load_report = load(
            table,
            job.load.partition_column.as_deref(),
            &job.load.table_name_prefix,
            &job.load.namespace,
            store,
        )?;

        info!(
            inputs = inputs.len(),
            rows = load_report.rows_written(),
            complete = load_report.is_complete(),
            "job finished"
        );
        Ok(JobReport {
            job: job.name.clone(),
            inputs,
            harmonize,
            filter,
            load: load_report,
        })
    }
}

// The reference layer is moved onto the subject's CRS here; the filter itself
// refuses mismatched inputs.
fn apply_filter(subject: GeoTable, config: &FilterConfig) -> Result<(GeoTable, FilterReport)> {
    let mut reference = read_layer(&config.path, &config.layer)?;
    if let Some(target) = subject.crs()
        && reference.crs() != Some(target)
    {
        info!(
            reference = reference.name(),
            from = ?reference.crs(),
            to = %target,
            "reprojecting reference layer onto subject CRS"
        );
        reference = reproject(reference, target)?;
    }
    SpatialFilter::new(config.predicate)
        .keep_columns(config.keep_columns.iter().cloned())
        .apply(subject, &reference)
}
