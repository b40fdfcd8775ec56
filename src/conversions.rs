use crate::error::{PipelineError, Result};
use crate::geometry::{Dimension, GeometryType};
use crate::types::ColumnType;

/// Name written to `gpkg_geometry_columns.geometry_type_name`.
///
/// `None` stands for a column holding several geometry types.
#[inline]
pub(crate) fn geometry_type_to_str(geometry_type: Option<GeometryType>) -> &'static str {
    #[allow(unreachable_patterns)]
    match geometry_type {
        None => "GEOMETRY",
        Some(GeometryType::Point) => "POINT",
        Some(GeometryType::LineString) => "LINESTRING",
        Some(GeometryType::Polygon) => "POLYGON",
        Some(GeometryType::MultiPoint) => "MULTIPOINT",
        Some(GeometryType::MultiLineString) => "MULTILINESTRING",
        Some(GeometryType::MultiPolygon) => "MULTIPOLYGON",
        Some(GeometryType::GeometryCollection) => "GEOMETRYCOLLECTION",
        Some(_) => "GEOMETRY",
    }
}

#[inline]
pub(crate) fn geometry_type_from_str(geometry_type_str: &str) -> Result<Option<GeometryType>> {
    let s = geometry_type_str;
    if s.eq_ignore_ascii_case("GEOMETRY") {
        Ok(None)
    } else if s.eq_ignore_ascii_case("GEOMETRYCOLLECTION") {
        Ok(Some(GeometryType::GeometryCollection))
    } else if s.eq_ignore_ascii_case("POINT") {
        Ok(Some(GeometryType::Point))
    } else if s.eq_ignore_ascii_case("LINESTRING") {
        Ok(Some(GeometryType::LineString))
    } else if s.eq_ignore_ascii_case("POLYGON") {
        Ok(Some(GeometryType::Polygon))
    } else if s.eq_ignore_ascii_case("MULTIPOINT") {
        Ok(Some(GeometryType::MultiPoint))
    } else if s.eq_ignore_ascii_case("MULTILINESTRING") {
        Ok(Some(GeometryType::MultiLineString))
    } else if s.eq_ignore_ascii_case("MULTIPOLYGON") {
        Ok(Some(GeometryType::MultiPolygon))
    } else {
        Err(PipelineError::UnsupportedGeometryType(
            geometry_type_str.to_string(),
        ))
    }
}

#[inline]
pub(crate) fn dimension_from_zm(z: i8, m: i8) -> Result<Dimension> {
    // 2 means "optional" in gpkg_geometry_columns; rows are read as WKB
    // anyway, so it is treated like the mandatory flag.
    match (z, m) {
        (0, 0) => Ok(Dimension::Xy),
        (1 | 2, 0) => Ok(Dimension::Xyz),
        (0, 1 | 2) => Ok(Dimension::Xym),
        (1 | 2, 1 | 2) => Ok(Dimension::Xyzm),
        _ => Err(PipelineError::InvalidDimension { z, m }),
    }
}

#[inline]
pub(crate) fn column_type_to_str(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Integer => "INTEGER",
        ColumnType::Double => "DOUBLE",
        ColumnType::Varchar => "TEXT",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Blob => "BLOB",
    }
}

/// Map a declared SQLite column type to a [`ColumnType`].
///
/// Geometry declarations return `None`; the caller skips the geometry column.
#[inline]
pub(crate) fn column_type_from_str(column: &str, declared: &str) -> Result<Option<ColumnType>> {
    let s = declared.trim();
    // TEXT(n) / VARCHAR(n) / BLOB(n) carry a size limit in GeoPackage.
    let base = s.split('(').next().unwrap_or(s).trim();
    let column_type = if ["TINYINT", "SMALLINT", "MEDIUMINT", "INT", "INTEGER"]
        .iter()
        .any(|t| base.eq_ignore_ascii_case(t))
    {
        ColumnType::Integer
    } else if ["DOUBLE", "FLOAT", "REAL"]
        .iter()
        .any(|t| base.eq_ignore_ascii_case(t))
    {
        ColumnType::Double
    } else if ["TEXT", "VARCHAR"]
        .iter()
        .any(|t| base.eq_ignore_ascii_case(t))
    {
        ColumnType::Varchar
    } else if base.eq_ignore_ascii_case("BOOLEAN") {
        ColumnType::Boolean
    } else if base.eq_ignore_ascii_case("BLOB") {
        ColumnType::Blob
    } else if geometry_type_from_str(base).is_ok() {
        return Ok(None);
    } else {
        return Err(PipelineError::UnsupportedColumnType {
            column: column.to_string(),
            declared_type: declared.to_string(),
        });
    };
    Ok(Some(column_type))
}
