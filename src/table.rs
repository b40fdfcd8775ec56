use crate::crs::Crs;
use crate::error::{PipelineError, Result};
use crate::geometry;
use crate::types::{ColumnSpec, Value};
use geo_traits::GeometryTrait;
use std::collections::HashMap;

/// Attribute layout of a [`GeoTable`].
#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    /// Name of the geometry attribute, or `None` when the table has none.
    pub geometry_column: Option<String>,
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(geometry_column: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            geometry_column: Some(geometry_column.into()),
            columns,
        }
    }

    /// Schema of a plain attribute table.
    pub fn without_geometry(columns: Vec<ColumnSpec>) -> Self {
        Self {
            geometry_column: None,
            columns,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|spec| spec.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|spec| spec.name == name)
    }
}

/// One record: a geometry (ISO WKB, or null) plus values ordered like the
/// schema's columns.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoRow {
    pub geometry: Option<Vec<u8>>,
    pub properties: Vec<Value>,
}

impl GeoRow {
    pub fn new(geometry: Option<Vec<u8>>, properties: Vec<Value>) -> Self {
        Self {
            geometry,
            properties,
        }
    }

    /// Build a row from any geometry implementing `geo_traits::GeometryTrait`.
    pub fn from_geometry<G, P>(geometry: &G, properties: P) -> Result<Self>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        Ok(Self {
            geometry: Some(geometry::encode(geometry)?),
            properties: properties.into_iter().collect(),
        })
    }

    pub fn null_geometry<P: IntoIterator<Item = Value>>(properties: P) -> Self {
        Self {
            geometry: None,
            properties: properties.into_iter().collect(),
        }
    }
}

/// Tabular dataset with one geometry attribute and a table-wide CRS.
///
/// Stages take a `GeoTable` by value and hand back a new one, so a stage
/// never shares mutable rows with its input.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoTable {
    name: String,
    schema: Schema,
    crs: Option<Crs>,
    rows: Vec<GeoRow>,
}

impl GeoTable {
    /// Build a table, checking every row against the schema.
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        crs: Option<Crs>,
        rows: Vec<GeoRow>,
    ) -> Result<Self> {
        let name = name.into();
        let rows = rows
            .into_iter()
            .map(|row| conform_row(&schema, row))
            .collect::<Result<Vec<GeoRow>>>()?;
        Ok(Self {
            name,
            schema,
            crs,
            rows,
        })
    }

    /// Build a table from rows already known to match the schema.
    pub(crate) fn from_parts(
        name: String,
        schema: Schema,
        crs: Option<Crs>,
        rows: Vec<GeoRow>,
    ) -> Self {
        Self {
            name,
            schema,
            crs,
            rows,
        }
    }

    pub fn into_parts(self) -> (String, Schema, Option<Crs>, Vec<GeoRow>) {
        (self.name, self.schema, self.crs, self.rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn crs(&self) -> Option<Crs> {
        self.crs
    }

    pub fn rows(&self) -> &[GeoRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Tag the table with a CRS without touching coordinates.
    pub fn with_crs(mut self, crs: Option<Crs>) -> Self {
        self.crs = crs;
        self
    }

    /// Name of the geometry attribute, or `SchemaError` when the table has none.
    pub fn require_geometry_column(&self) -> Result<&str> {
        self.schema
            .geometry_column
            .as_deref()
            .ok_or_else(|| PipelineError::schema(&self.name, "geometry"))
    }

    /// Index of a property column, or `SchemaError` when absent.
    pub fn require_column(&self, column: &str) -> Result<usize> {
        self.schema
            .column_index(column)
            .ok_or_else(|| PipelineError::schema(&self.name, column))
    }

    /// Value of `column` in every row.
    pub fn column_values(&self, column: &str) -> Result<impl Iterator<Item = &Value>> {
        let idx = self.require_column(column)?;
        Ok(self.rows.iter().map(move |row| &row.properties[idx]))
    }

    /// Count of every distinct value of a column, in order of first appearance.
    pub fn value_counts(&self, column: &str) -> Result<Vec<(Value, usize)>> {
        let mut counts: Vec<(Value, usize)> = Vec::new();
        let mut index_by_key: HashMap<String, usize> = HashMap::new();
        for value in self.column_values(column)? {
            let key = format!("{value:?}");
            match index_by_key.get(&key) {
                Some(&idx) => counts[idx].1 += 1,
                None => {
                    index_by_key.insert(key, counts.len());
                    counts.push((value.clone(), 1));
                }
            }
        }
        Ok(counts)
    }
}

fn conform_row(schema: &Schema, row: GeoRow) -> Result<GeoRow> {
    if row.properties.len() != schema.columns.len() {
        return Err(PipelineError::InvalidPropertyCount {
            expected: schema.columns.len(),
            got: row.properties.len(),
        });
    }
    if schema.geometry_column.is_none() && row.geometry.is_some() {
        return Err(PipelineError::schema("<row>", "geometry"));
    }
    let properties = row
        .properties
        .into_iter()
        .zip(&schema.columns)
        .map(|(value, column)| value.conform(column))
        .collect::<Result<Vec<Value>>>()?;
    Ok(GeoRow {
        geometry: row.geometry,
        properties,
    })
}
