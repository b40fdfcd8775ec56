use crate::conversions::{
    column_type_from_str, column_type_to_str, dimension_from_zm, geometry_type_from_str,
    geometry_type_to_str,
};
use crate::crs::Crs;
use crate::error::{PipelineError, Result};
use crate::geometry::{self, Dimension, GeometryType};
use crate::ogc_sql::{
    SQL_DELETE_GPKG_CONTENTS, SQL_DELETE_GPKG_EXTENSIONS, SQL_DELETE_GPKG_GEOMETRY_COLUMNS,
    SQL_INSERT_GPKG_CONTENTS, SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_INSERT_SRS, SQL_LAYER_EXISTS,
    SQL_LIST_LAYERS, SQL_SELECT_GEOMETRY_COLUMN_META, SQL_SRS_EXISTS, execute_rtree_sqls,
    gpkg_rtree_drop_sql, initialize_gpkg, quote, sql_create_table, sql_drop_table,
    sql_table_columns,
};
use crate::sql_functions::register_spatial_functions;
use crate::table::{GeoRow, GeoTable};
use crate::types::ColumnSpec;
use rusqlite::{OpenFlags, OptionalExtension};
use std::io;
use std::path::Path;
use tracing::debug;

use super::feature::{Envelope, envelope};
use super::layer::GpkgLayer;

/// GeoPackage connection wrapper.
#[derive(Debug)]
pub struct Gpkg {
    conn: rusqlite::Connection,
    read_only: bool,
}

impl Gpkg {
    /// Open an existing GeoPackage without write access.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;
        let conn = rusqlite::Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: true,
        })
    }

    /// Open an existing GeoPackage for reading and writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;
        let conn = rusqlite::Connection::open(path)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a new GeoPackage file. Fails if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("GeoPackage file already exists: {}", path.display()),
            )));
        }

        let conn = rusqlite::Connection::open(path)?;
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a transient GeoPackage in memory.
    pub fn new_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Add the CRS to `gpkg_spatial_ref_sys` unless it is already there.
    ///
    /// The WKT definition comes from the built-in catalog, so only catalogued
    /// codes can be registered.
    pub fn register_crs(&self, crs: Crs) -> Result<()> {
        self.ensure_writable()?;
        let exists: bool = self
            .conn
            .query_row(SQL_SRS_EXISTS, [crs.code()], |row| row.get(0))?;
        if exists {
            return Ok(());
        }
        let definition = crs.definition()?;
        self.conn.execute(
            SQL_INSERT_SRS,
            rusqlite::params![
                definition.name,
                crs.code(),
                "EPSG",
                crs.code(),
                definition.definition,
                definition.name
            ],
        )?;
        debug!(%crs, "registered spatial reference system");
        Ok(())
    }

    /// Names of the feature tables, sorted.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_LAYERS)?;
        let layers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(layers)
    }

    pub fn has_layer(&self, layer_name: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(SQL_LAYER_EXISTS, [layer_name], |row| row.get(0))?)
    }

    /// Load a layer definition by name.
    pub fn open_layer<'a>(&'a self, layer_name: &str) -> Result<GpkgLayer<'a>> {
        let (geometry_column, geometry_type, geometry_dimension, srs_id) =
            self.geometry_column_meta(layer_name)?.ok_or_else(|| {
                PipelineError::LayerNotFound {
                    layer_name: layer_name.to_string(),
                }
            })?;
        let (primary_key_column, property_columns) =
            self.column_specs(layer_name, &geometry_column)?;

        Ok(GpkgLayer {
            gpkg: self,
            layer_name: layer_name.to_string(),
            geometry_column,
            primary_key_column,
            geometry_type,
            geometry_dimension,
            srs_id,
            property_columns,
        })
    }

    /// Read a whole layer into a [`GeoTable`].
    pub fn read_table(&self, layer_name: &str) -> Result<GeoTable> {
        self.open_layer(layer_name)?.to_table()
    }

    /// Replace `layer_name` with the contents of `table` in one transaction.
    ///
    /// Any previous table of that name is dropped together with its R-tree
    /// and metadata rows. On error nothing is left behind. Returns the number
    /// of rows written.
    pub fn replace_layer(&self, layer_name: &str, table: &GeoTable) -> Result<usize> {
        self.ensure_writable()?;
        ensure_user_table_name(layer_name)?;
        let geometry_column = table.require_geometry_column()?;
        let crs = table.crs().ok_or_else(|| PipelineError::MissingCrs {
            table: table.name().to_string(),
        })?;
        let layout = RowLayout::of(table.rows())?;

        let tx = self.conn.unchecked_transaction()?;
        self.register_crs(crs)?;
        self.drop_layer_objects(layer_name)?;

        let srs_id = i32::try_from(crs.code())
            .map_err(|_| PipelineError::UnsupportedCrs(crs.to_string()))?;
        let property_columns = table.schema().columns.clone();
        let layer = self.create_layer(
            layer_name,
            geometry_column,
            &layout,
            srs_id,
            property_columns,
        )?;
        for row in table.rows() {
            layer.insert(row)?;
        }
        execute_rtree_sqls(
            &self.conn,
            layer_name,
            geometry_column,
            &layer.primary_key_column,
        )?;
        tx.commit()?;

        debug!(
            layer = layer_name,
            rows = table.len(),
            geometry_type = geometry_type_to_str(layout.geometry_type),
            "replaced layer"
        );
        Ok(table.len())
    }

    /// Delete a layer with its index and metadata. Returns whether it existed.
    pub fn delete_layer(&self, layer_name: &str) -> Result<bool> {
        self.ensure_writable()?;
        ensure_user_table_name(layer_name)?;
        let tx = self.conn.unchecked_transaction()?;
        let existed = self.drop_layer_objects(layer_name)?;
        tx.commit()?;
        Ok(existed)
    }

    pub(crate) fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(PipelineError::ReadOnly);
        }
        Ok(())
    }

    fn create_layer<'a>(
        &'a self,
        layer_name: &str,
        geometry_column: &str,
        layout: &RowLayout,
        srs_id: i32,
        property_columns: Vec<ColumnSpec>,
    ) -> Result<GpkgLayer<'a>> {
        let primary_key_column = primary_key_name(geometry_column, &property_columns);
        let geometry_type_name = geometry_type_to_str(layout.geometry_type);

        let mut column_defs = Vec::with_capacity(property_columns.len() + 2);
        column_defs.push(format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            quote(&primary_key_column)
        ));
        column_defs.push(format!("{} {geometry_type_name}", quote(geometry_column)));
        for spec in &property_columns {
            column_defs.push(format!(
                "{} {}",
                quote(&spec.name),
                column_type_to_str(spec.column_type)
            ));
        }
        self.conn
            .execute_batch(&sql_create_table(layer_name, &column_defs.join(", ")))?;

        let bounds = layout.bounds;
        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![
                layer_name,
                bounds.map(|b| b.minx),
                bounds.map(|b| b.miny),
                bounds.map(|b| b.maxx),
                bounds.map(|b| b.maxy),
                srs_id
            ],
        )?;
        self.conn.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![
                layer_name,
                geometry_column,
                geometry_type_name,
                srs_id,
                layout.z,
                layout.m
            ],
        )?;

        Ok(GpkgLayer {
            gpkg: self,
            layer_name: layer_name.to_string(),
            geometry_column: geometry_column.to_string(),
            primary_key_column,
            geometry_type: layout.geometry_type,
            geometry_dimension: dimension_from_zm(layout.z, layout.m)?,
            srs_id,
            property_columns,
        })
    }

    fn drop_layer_objects(&self, layer_name: &str) -> Result<bool> {
        let geometry_column = self
            .geometry_column_meta(layer_name)?
            .map(|(column, ..)| column);
        let existed = geometry_column.is_some() || self.has_layer(layer_name)?;

        if let Some(column) = &geometry_column {
            self.conn
                .execute_batch(&gpkg_rtree_drop_sql(layer_name, column))?;
        }
        self.conn.execute_batch(&sql_drop_table(layer_name))?;
        self.conn
            .execute(SQL_DELETE_GPKG_EXTENSIONS, [layer_name])?;
        self.conn
            .execute(SQL_DELETE_GPKG_GEOMETRY_COLUMNS, [layer_name])?;
        self.conn.execute(SQL_DELETE_GPKG_CONTENTS, [layer_name])?;
        Ok(existed)
    }

    /// Primary key name and property columns of a table, skipping the geometry column.
    fn column_specs(
        &self,
        layer_name: &str,
        geometry_column: &str,
    ) -> Result<(String, Vec<ColumnSpec>)> {
        let mut stmt = self.conn.prepare(&sql_table_columns(layer_name))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let declared: String = row.get(1)?;
                let pk: i32 = row.get(2)?;
                Ok((name, declared, pk != 0))
            })?
            .collect::<std::result::Result<Vec<(String, String, bool)>, _>>()?;

        let mut primary_key: Option<String> = None;
        let mut property_columns = Vec::new();
        for (name, declared, is_primary_key) in columns {
            if is_primary_key {
                if primary_key.is_some() {
                    return Err(PipelineError::CompositePrimaryKeyUnsupported {
                        layer_name: layer_name.to_string(),
                    });
                }
                primary_key = Some(name);
                continue;
            }
            if name == geometry_column {
                continue;
            }
            if let Some(column_type) = column_type_from_str(&name, &declared)? {
                property_columns.push(ColumnSpec::new(name, column_type));
            }
        }

        let primary_key = primary_key.ok_or_else(|| PipelineError::MissingPrimaryKeyColumn {
            layer_name: layer_name.to_string(),
        })?;
        Ok((primary_key, property_columns))
    }

    fn geometry_column_meta(
        &self,
        layer_name: &str,
    ) -> Result<Option<(String, Option<GeometryType>, Dimension, i32)>> {
        let meta = self
            .conn
            .query_row(SQL_SELECT_GEOMETRY_COLUMN_META, [layer_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, i32>(4)?,
                ))
            })
            .optional()?;

        let Some((geometry_column, geometry_type_str, z, m, srs_id)) = meta else {
            return Ok(None);
        };
        let geometry_type = geometry_type_from_str(&geometry_type_str)?;
        let geometry_dimension = dimension_from_zm(z, m)?;
        Ok(Some((geometry_column, geometry_type, geometry_dimension, srs_id)))
    }
}

/// Names SQLite or the GeoPackage format own; replacing them would drop metadata.
fn ensure_user_table_name(layer_name: &str) -> Result<()> {
    let lower = layer_name.to_ascii_lowercase();
    if ["gpkg_", "rtree_", "sqlite_"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return Err(PipelineError::InvalidIdentifier(format!(
            "'{layer_name}' is reserved for GeoPackage metadata"
        )));
    }
    Ok(())
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(PipelineError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("GeoPackage file does not exist: {}", path.display()),
        )));
    }
    Ok(())
}

/// `fid` unless an attribute already uses that name. SQLite column names
/// are case-insensitive, so `FID` counts as taken.
fn primary_key_name(geometry_column: &str, columns: &[ColumnSpec]) -> String {
    let taken = |name: &str| {
        name.eq_ignore_ascii_case(geometry_column)
            || columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    };
    let mut candidate = "fid".to_string();
    let mut suffix = 1;
    while taken(&candidate) {
        candidate = format!("fid_{suffix}");
        suffix += 1;
    }
    candidate
}

/// Geometry type, z/m flags and extent derived from the rows to be written.
struct RowLayout {
    geometry_type: Option<GeometryType>,
    z: i8,
    m: i8,
    bounds: Option<Envelope>,
}

impl RowLayout {
    fn of(rows: &[GeoRow]) -> Result<Self> {
        let mut kinds: Vec<GeometryType> = Vec::new();
        let (mut total, mut with_z, mut with_m) = (0usize, 0usize, 0usize);
        let mut bounds: Option<Envelope> = None;

        for bytes in rows.iter().filter_map(|row| row.geometry.as_deref()) {
            let wkb = geometry::decode(bytes)?;
            let kind = wkb.geometry_type();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
            total += 1;
            match wkb.dimension() {
                Dimension::Xy => {}
                Dimension::Xyz => with_z += 1,
                Dimension::Xym => with_m += 1,
                Dimension::Xyzm => {
                    with_z += 1;
                    with_m += 1;
                }
            }
            if let Some(b) = envelope(&wkb) {
                bounds = Some(bounds.map_or(b, |existing| existing.merge(b)));
            }
        }

        // 0: prohibited, 1: mandatory, 2: optional
        let flag = |count: usize| match count {
            0 => 0,
            n if n == total => 1,
            _ => 2,
        };
        Ok(Self {
            geometry_type: match kinds.as_slice() {
                [single] => Some(*single),
                _ => None,
            },
            z: flag(with_z),
            m: flag(with_m),
            bounds,
        })
    }
}
