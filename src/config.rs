//! Pipeline configuration read from JSON.
//!
//! ```json
//! {
//!   "target_crs": "EPSG:5880",
//!   "label_mappings": [
//!     { "column": "classe", "replacements": { "Muita Alta": "Muito Alta" } }
//!   ],
//!   "jobs": [
//!     {
//!       "name": "prioridade",
//!       "inputs": [
//!         { "path": "raw/norte.gpkg", "layer": "areas" },
//!         { "path": "raw/sul.gpkg", "layer": "areas" }
//!       ],
//!       "load": { "namespace": "icmbio", "table_name_prefix": "areas_prioritarias" }
//!     }
//!   ]
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use crate::crs::{Crs, SIRGAS_2000_POLYCONIC};
use crate::error::{PipelineError, Result};
use crate::pipeline::{LabelMapping, SpatialPredicate};
use crate::store::validate_identifier;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

fn default_target_crs() -> Crs {
    SIRGAS_2000_POLYCONIC
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// CRS every loaded table ends up in.
    #[serde(default = "default_target_crs")]
    pub target_crs: Crs,
    /// Applied to every job unless the job brings its own.
    #[serde(default)]
    pub label_mappings: Vec<LabelMapping>,
    pub jobs: Vec<JobConfig>,
}

/// One dataset refresh: read, normalize, load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub name: String,
    pub inputs: Vec<LayerSource>,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub label_mappings: Option<Vec<LabelMapping>>,
    pub load: LoadConfig,
}

/// A layer inside a GeoPackage file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerSource {
    pub path: PathBuf,
    pub layer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    /// GeoPackage holding the reference boundaries.
    pub path: PathBuf,
    pub layer: String,
    pub predicate: SpatialPredicate,
    #[serde(default)]
    pub keep_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    pub namespace: String,
    pub table_name_prefix: String,
    #[serde(default)]
    pub partition_column: Option<String>,
}

impl PipelineConfig {
    /// Parse and check a config. Relative paths are kept as written.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file, resolving relative paths against its directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_json_str(&fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Label mappings in force for `job`.
    pub fn label_mappings_for<'a>(&'a self, job: &'a JobConfig) -> &'a [LabelMapping] {
        job.label_mappings
            .as_deref()
            .unwrap_or(&self.label_mappings)
    }

    pub fn validate(&self) -> Result<()> {
        self.target_crs.definition()?;
        if self.jobs.is_empty() {
            return Err(PipelineError::InvalidConfig("no jobs defined".to_string()));
        }
        let mut names = HashSet::new();
        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
            job.validate()?;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for job in &mut self.jobs {
            job.inputs.iter_mut().for_each(|input| resolve(&mut input.path));
            if let Some(filter) = &mut job.filter {
                resolve(&mut filter.path);
            }
        }
    }
}

impl JobConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(PipelineError::InvalidConfig(format!(
                "job '{}': {reason}",
                self.name
            )))
        };
        if self.name.is_empty() {
            return Err(PipelineError::InvalidConfig("job without a name".to_string()));
        }
        if self.inputs.is_empty() {
            return invalid("no inputs");
        }
        if self.load.table_name_prefix.is_empty() {
            return invalid("empty table_name_prefix");
        }
        if self.load.partition_column.as_deref() == Some("") {
            return invalid("empty partition_column");
        }
        validate_identifier(&self.load.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineConfig;
    use crate::Result;
    use crate::crs::{Crs, SIRGAS_2000_POLYCONIC};
    use crate::error::PipelineError;
    use crate::pipeline::SpatialPredicate;
    use std::path::Path;

    const MINIMAL: &str = r#"{
        "jobs": [{
            "name": "car",
            "inputs": [{ "path": "raw/pa.gpkg", "layer": "area_imovel" }],
            "load": { "namespace": "sicar", "table_name_prefix": "area_imovel", "partition_column": "cod_estado" }
        }]
    }"#;

    #[test]
    fn defaults_to_brazil_polyconic() -> Result<()> {
        let config = PipelineConfig::from_json_str(MINIMAL)?;
        assert_eq!(config.target_crs, SIRGAS_2000_POLYCONIC);
        assert!(config.label_mappings.is_empty());
        let job = config.job("car").expect("job");
        assert_eq!(job.load.partition_column.as_deref(), Some("cod_estado"));
        assert!(job.filter.is_none());
        Ok(())
    }

    #[test]
    fn parses_filter_and_job_mappings() -> Result<()> {
        let config = PipelineConfig::from_json_str(
            r#"{
                "target_crs": "EPSG:4674",
                "label_mappings": [{ "column": "classe", "replacements": { "a": "b" } }],
                "jobs": [{
                    "name": "focos",
                    "inputs": [{ "path": "focos.gpkg", "layer": "focos" }],
                    "filter": { "path": "br.gpkg", "layer": "uf", "predicate": "within", "keep_columns": ["sigla"] },
                    "label_mappings": [],
                    "load": { "namespace": "inpe", "table_name_prefix": "focos" }
                }]
            }"#,
        )?;
        assert_eq!(config.target_crs, Crs::epsg(4674));
        let job = &config.jobs[0];
        let filter = job.filter.as_ref().expect("filter");
        assert_eq!(filter.predicate, SpatialPredicate::Within);
        assert_eq!(filter.keep_columns, vec!["sigla".to_string()]);
        assert!(config.label_mappings_for(job).is_empty());
        Ok(())
    }

    #[test]
    fn unknown_predicate_is_rejected() {
        let json = MINIMAL.replace(
            r#""load""#,
            r#""filter": { "path": "b.gpkg", "layer": "b", "predicate": "near" }, "load""#,
        );
        let err = PipelineConfig::from_json_str(&json).expect_err("bad predicate");
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[test]
    fn job_without_inputs_is_invalid() {
        let json = MINIMAL.replace(
            r#"[{ "path": "raw/pa.gpkg", "layer": "area_imovel" }]"#,
            "[]",
        );
        let err = PipelineConfig::from_json_str(&json).expect_err("no inputs");
        match err {
            PipelineError::InvalidConfig(message) => assert!(message.contains("no inputs")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unsupported_target_crs_is_rejected() {
        let json = MINIMAL.replacen('{', r#"{ "target_crs": "EPSG:2154","#, 1);
        let err = PipelineConfig::from_json_str(&json).expect_err("not in catalog");
        assert!(matches!(err, PipelineError::UnsupportedCrs(_)));
    }

    #[test]
    fn relative_paths_follow_the_config_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, MINIMAL)?;
        let config = PipelineConfig::from_path(&path)?;
        assert_eq!(
            config.jobs[0].inputs[0].path,
            dir.path().join(Path::new("raw/pa.gpkg"))
        );
        Ok(())
    }
}
