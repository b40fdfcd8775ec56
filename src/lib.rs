//! Geometry normalization and partitioned GeoPackage loading built on top of rusqlite.
//!
//! ## Overview
//!
//! - `GeoTable` is the table flowing through every stage: a schema, a
//!   table-wide `Crs` and rows holding an ISO WKB geometry plus `Value`s.
//! - The `pipeline` stages each take a `GeoTable` and return a new one:
//!   `validate`, `standardize`, `filter_within` / `SpatialFilter`,
//!   `concatenate` / `apply_label_mappings` and `reproject`.
//! - `load` writes a table into a `SpatialStore`, optionally split into one
//!   table per distinct value of a column.
//! - `GpkgStore` is the store: one GeoPackage per namespace, every geometry
//!   column indexed with `gpkg_rtree_index`.
//!
//! Namespaces are created up front with `bootstrap`; `load` never creates
//! them.
//!
//! ## Short usage
//!
//! ```no_run
//! use geoharmonize::{
//!     GpkgStore, SIRGAS_2000_POLYCONIC, bootstrap, concatenate, load, read_layer, reproject,
//!     standardize, validate,
//! };
//!
//! let mut store = GpkgStore::open("warehouse")?;
//! bootstrap(&mut store, &["icmbio"])?;
//!
//! let mut regions = Vec::new();
//! for region in ["norte", "nordeste", "centro_oeste", "sudeste", "sul"] {
//!     let table = read_layer(format!("raw/{region}.gpkg"), "areas")?;
//!     regions.push(standardize(validate(table)?)?);
//! }
//! let table = reproject(concatenate(regions)?, SIRGAS_2000_POLYCONIC)?;
//!
//! let report = load(table, Some("cd_regiao"), "areas_prioritarias", "icmbio", &mut store)?;
//! assert!(report.is_complete());
//! # Ok::<(), geoharmonize::PipelineError>(())
//! ```
//!
//! ## Configured runs
//!
//! The same chain can be described in JSON and run with `Pipeline`:
//!
//! ```no_run
//! use geoharmonize::{GpkgStore, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::from_path("pipeline.json")?;
//! let mut store = GpkgStore::open("warehouse")?;
//! let report = Pipeline::new(config).run(&mut store);
//! for outcome in &report.jobs {
//!     match &outcome.result {
//!         Ok(job) => println!("{}: {} rows", outcome.job, job.load.rows_written()),
//!         Err(err) => eprintln!("{}: {err}", outcome.job),
//!     }
//! }
//! # Ok::<(), geoharmonize::PipelineError>(())
//! ```
//!
//! ## Spatial SQL
//!
//! Every connection opened by the store has `ST_MinX`, `ST_MaxX`, `ST_MinY`,
//! `ST_MaxY`, `ST_IsEmpty`, `ST_IsValid`, `ST_GeometryType`, `ST_Intersects`,
//! `ST_Within` and `ST_Contains` registered. They take GeoPackage geometry
//! blobs. Use `register_spatial_functions` to add them to your own
//! `rusqlite::Connection`.
mod conversions;
mod error;
mod geometry;
mod ogc_sql;
mod sql_functions;
mod table;
mod types;

pub mod config;
pub mod crs;
pub mod pipeline;
pub mod store;

pub use config::{FilterConfig, JobConfig, LayerSource, LoadConfig, PipelineConfig};
pub use crs::{Crs, SIRGAS_2000, SIRGAS_2000_POLYCONIC, WGS_84};
pub use error::{PipelineError, Result};
pub use geometry::{Dimension, GeometryType};
pub use pipeline::{
    FilterReport, HarmonizeReport, JobReport, LabelMapping, LoadReport, PartitionOutcome,
    Pipeline, RunReport, SpatialFilter, SpatialPredicate, StandardizeReport, ValidationReport,
    apply_label_mappings, concatenate, filter_within, load, reproject, standardize, validate,
};
pub use sql_functions::register_spatial_functions;
pub use store::{Gpkg, GpkgLayer, GpkgStore, SpatialStore, TableSummary, bootstrap, read_layer};
pub use table::{GeoRow, GeoTable, Schema};
pub use types::{ColumnSpec, ColumnType, Value};
