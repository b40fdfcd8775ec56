use crate::conversions::geometry_type_to_str;
use crate::crs::Crs;
use crate::error::{PipelineError, Result};
use crate::geometry::{Dimension, GeometryType};
use crate::ogc_sql::{quote, sql_count_rows, sql_insert_feature, sql_select_features};
use crate::table::{GeoRow, GeoTable, Schema};
use crate::types::{ColumnSpec, Value};
use rusqlite::params_from_iter;

use super::feature::{gpkg_geometry_to_wkb, wkb_to_gpkg_geometry};
use super::gpkg::Gpkg;

/// A feature table inside a GeoPackage, with its geometry metadata.
#[derive(Debug)]
pub struct GpkgLayer<'a> {
    pub(super) gpkg: &'a Gpkg,
    pub layer_name: String,
    pub geometry_column: String,
    pub primary_key_column: String,
    /// `None` for a `GEOMETRY` column holding mixed types.
    pub geometry_type: Option<GeometryType>,
    pub geometry_dimension: Dimension,
    pub srs_id: i32,
    pub property_columns: Vec<ColumnSpec>,
}

impl GpkgLayer<'_> {
    /// CRS of the layer; the undefined systems (`srs_id` 0 and -1) map to `None`.
    pub fn crs(&self) -> Option<Crs> {
        u32::try_from(self.srs_id)
            .ok()
            .filter(|&code| code > 0)
            .map(Crs::epsg)
    }

    /// Geometry type name as declared in `gpkg_geometry_columns`.
    pub fn geometry_type_name(&self) -> &'static str {
        geometry_type_to_str(self.geometry_type)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .gpkg
            .connection()
            .query_row(&sql_count_rows(&self.layer_name), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Read every feature, in primary key order, as rows holding ISO WKB.
    pub fn rows(&self) -> Result<Vec<GeoRow>> {
        let columns = self.property_columns.iter().map(|spec| spec.name.as_str());
        let sql = sql_select_features(
            &self.layer_name,
            &self.geometry_column,
            &self.primary_key_column,
            columns,
        );
        let mut stmt = self.gpkg.connection().prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let geometry = match row.get_ref(0)? {
                rusqlite::types::ValueRef::Null => None,
                rusqlite::types::ValueRef::Blob(blob) => {
                    Some(gpkg_geometry_to_wkb(blob)?.buf().to_vec())
                }
                other => {
                    return Err(rusqlite::Error::InvalidColumnType(
                        0,
                        self.geometry_column.clone(),
                        other.data_type(),
                    )
                    .into());
                }
            };
            let properties = (0..self.property_columns.len())
                .map(|idx| row.get_ref(idx + 1).map(Value::from))
                .collect::<rusqlite::Result<Vec<Value>>>()?;
            out.push(GeoRow::new(geometry, properties));
        }
        Ok(out)
    }

    /// Read the whole layer into a [`GeoTable`] named after the layer.
    pub fn to_table(&self) -> Result<GeoTable> {
        let schema = Schema::new(self.geometry_column.clone(), self.property_columns.clone());
        GeoTable::new(self.layer_name.clone(), schema, self.crs(), self.rows()?)
    }

    /// Insert one row; the geometry is wrapped into a GeoPackage blob.
    pub(crate) fn insert(&self, row: &GeoRow) -> Result<()> {
        if self.gpkg.is_read_only() {
            return Err(PipelineError::ReadOnly);
        }
        if row.properties.len() != self.property_columns.len() {
            return Err(PipelineError::InvalidPropertyCount {
                expected: self.property_columns.len(),
                got: row.properties.len(),
            });
        }
        let geometry = match &row.geometry {
            Some(wkb) => Value::Blob(wkb_to_gpkg_geometry(wkb, self.srs_id)?),
            None => Value::Null,
        };
        let params = std::iter::once(&geometry).chain(row.properties.iter());

        let sql = Self::build_insert_sql(
            &self.layer_name,
            &self.geometry_column,
            &self.property_columns,
        );
        let mut stmt = self.gpkg.connection().prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(())
    }

    pub(crate) fn build_insert_sql(
        layer_name: &str,
        geometry_column: &str,
        property_columns: &[ColumnSpec],
    ) -> String {
        let columns = std::iter::once(geometry_column)
            .chain(property_columns.iter().map(|spec| spec.name.as_str()))
            .map(quote)
            .collect::<Vec<String>>();

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<String>>()
            .join(",");

        sql_insert_feature(layer_name, &columns.join(","), &placeholders)
    }
}
