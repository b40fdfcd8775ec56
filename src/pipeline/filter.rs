//! Spatial predicate join that restricts a subject layer to a reference region.
//!
//! Cardinality: every subject row appears at most once in the output. When a
//! subject geometry satisfies the predicate against several reference rows,
//! the reference row that comes first in the reference table is the match,
//! and its requested attributes are the ones appended.

use crate::error::{PipelineError, Result};
use crate::geometry;
use crate::table::{GeoRow, GeoTable, Schema};
use crate::types::ColumnSpec;
use geo::{BoundingRect, Geometry, Intersects, Relate};
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Binary relation tested between a subject and a reference geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialPredicate {
    Intersects,
    /// Subject lies inside the reference.
    Within,
    /// Subject contains the reference.
    Contains,
    Touches,
    Crosses,
    Overlaps,
}

impl SpatialPredicate {
    pub fn evaluate(self, subject: &Geometry<f64>, reference: &Geometry<f64>) -> bool {
        if let SpatialPredicate::Intersects = self {
            return subject.intersects(reference);
        }
        let matrix = subject.relate(reference);
        match self {
            SpatialPredicate::Intersects => matrix.is_intersects(),
            SpatialPredicate::Within => matrix.is_within(),
            SpatialPredicate::Contains => matrix.is_contains(),
            SpatialPredicate::Touches => matrix.is_touches(),
            SpatialPredicate::Crosses => matrix.is_crosses(),
            SpatialPredicate::Overlaps => matrix.is_overlaps(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SpatialPredicate::Intersects => "intersects",
            SpatialPredicate::Within => "within",
            SpatialPredicate::Contains => "contains",
            SpatialPredicate::Touches => "touches",
            SpatialPredicate::Crosses => "crosses",
            SpatialPredicate::Overlaps => "overlaps",
        }
    }
}

impl fmt::Display for SpatialPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpatialPredicate {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let predicate = match s.trim().to_ascii_lowercase().as_str() {
            "intersects" => SpatialPredicate::Intersects,
            "within" => SpatialPredicate::Within,
            "contains" => SpatialPredicate::Contains,
            "touches" => SpatialPredicate::Touches,
            "crosses" => SpatialPredicate::Crosses,
            "overlaps" => SpatialPredicate::Overlaps,
            _ => {
                return Err(PipelineError::InvalidConfig(format!(
                    "unknown spatial predicate '{s}'"
                )));
            }
        };
        Ok(predicate)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FilterReport {
    pub subject_rows: usize,
    pub matched_rows: usize,
}

/// Keep subject rows that satisfy `predicate` against at least one reference row.
pub fn filter_within(
    subject: GeoTable,
    reference: &GeoTable,
    predicate: SpatialPredicate,
) -> Result<GeoTable> {
    SpatialFilter::new(predicate)
        .apply(subject, reference)
        .map(|(table, _)| table)
}

/// Configured spatial join.
#[derive(Clone, Debug)]
pub struct SpatialFilter {
    predicate: SpatialPredicate,
    keep_columns: Vec<String>,
}

/// Bounding box of one reference row.
struct IndexedEnvelope {
    row: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

fn aabb(geom: &Geometry<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = geom.bounding_rect()?;
    let (min, max) = (rect.min(), rect.max());
    Some(AABB::from_corners([min.x, min.y], [max.x, max.y]))
}

impl SpatialFilter {
    pub fn new(predicate: SpatialPredicate) -> Self {
        Self {
            predicate,
            keep_columns: Vec::new(),
        }
    }

    /// Reference attributes to append to matched subject rows.
    ///
    /// A name already used by the subject gets a `_right` suffix.
    pub fn keep_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keep_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn predicate(&self) -> SpatialPredicate {
        self.predicate
    }

    pub fn apply(&self, subject: GeoTable, reference: &GeoTable) -> Result<(GeoTable, FilterReport)> {
        subject.require_geometry_column()?;
        reference.require_geometry_column()?;
        if subject.crs() != reference.crs() {
            return Err(PipelineError::crs_mismatch(
                subject.name(),
                subject.crs(),
                reference.name(),
                reference.crs(),
            ));
        }

        let kept_indices = self
            .keep_columns
            .iter()
            .map(|column| reference.require_column(column))
            .collect::<Result<Vec<usize>>>()?;
        let schema = joined_schema(subject.schema(), reference.schema(), &kept_indices);

        let reference_geometries = reference
            .rows()
            .iter()
            .map(|row| match row.geometry.as_deref() {
                Some(bytes) => geometry::decode_xy(bytes),
                None => Ok(None),
            })
            .collect::<Result<Vec<Option<Geometry<f64>>>>>()?;
        let tree = RTree::bulk_load(
            reference_geometries
                .iter()
                .enumerate()
                .filter_map(|(row, geom)| {
                    let env = aabb(geom.as_ref()?)?;
                    Some(IndexedEnvelope { row, env })
                })
                .collect(),
        );

        let (name, _, crs, rows) = subject.into_parts();
        let subject_rows = rows.len();
        let mut kept = Vec::new();
        for row in rows {
            let Some(geom) = row.geometry.as_deref().map(geometry::decode_xy).transpose()?.flatten()
            else {
                continue;
            };
            let Some(matched) = self.first_match(&geom, &tree, &reference_geometries) else {
                continue;
            };
            let mut properties = row.properties;
            let reference_row = &reference.rows()[matched];
            properties.extend(kept_indices.iter().map(|&i| reference_row.properties[i].clone()));
            kept.push(GeoRow::new(row.geometry, properties));
        }

        let report = FilterReport {
            subject_rows,
            matched_rows: kept.len(),
        };
        info!(
            table = %name,
            reference = reference.name(),
            predicate = %self.predicate,
            subject = report.subject_rows,
            matched = report.matched_rows,
            "filtered by spatial predicate"
        );
        Ok((GeoTable::from_parts(name, schema, crs, kept), report))
    }

    fn first_match(
        &self,
        subject: &Geometry<f64>,
        tree: &RTree<IndexedEnvelope>,
        reference: &[Option<Geometry<f64>>],
    ) -> Option<usize> {
        let envelope = aabb(subject)?;
        let mut candidates: Vec<usize> = tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.row)
            .collect();
        candidates.sort_unstable();
        candidates.into_iter().find(|&idx| {
            reference[idx]
                .as_ref()
                .is_some_and(|candidate| self.predicate.evaluate(subject, candidate))
        })
    }
}

fn joined_schema(subject: &Schema, reference: &Schema, kept_indices: &[usize]) -> Schema {
    let mut columns = subject.columns.clone();
    for &idx in kept_indices {
        let spec = &reference.columns[idx];
        let mut name = spec.name.clone();
        // Column names are case-insensitive once stored.
        while subject
            .geometry_column
            .as_deref()
            .is_some_and(|geom| geom.eq_ignore_ascii_case(&name))
            || columns.iter().any(|c| c.name.eq_ignore_ascii_case(&name))
        {
            name.push_str("_right");
        }
        columns.push(ColumnSpec::new(name, spec.column_type));
    }
    Schema {
        geometry_column: subject.geometry_column.clone(),
        columns,
    }
}
