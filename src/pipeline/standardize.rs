use crate::error::Result;
use crate::geometry::{self, Dimension, GeometryType};
use crate::table::{GeoRow, GeoTable};
use geo::{Geometry, MultiLineString, MultiPoint, MultiPolygon};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StandardizeReport {
    pub input_rows: usize,
    pub null_dropped: usize,
    pub empty_dropped: usize,
    /// Rows whose bytes were not readable as WKB.
    pub undecodable_dropped: usize,
    /// Rows that carried Z and/or M ordinates.
    pub dimension_stripped: usize,
    pub output_rows: usize,
}

/// Drop null and empty geometries and force every geometry to XY.
///
/// Geometry types are left alone: a mixed table stays mixed. See
/// [`retain_geometry_types`] and [`promote_to_multi`] to homogenize.
pub fn standardize(table: GeoTable) -> Result<GeoTable> {
    standardize_with_report(table).map(|(table, _)| table)
}

pub fn standardize_with_report(table: GeoTable) -> Result<(GeoTable, StandardizeReport)> {
    table.require_geometry_column()?;
    let (name, schema, crs, rows) = table.into_parts();

    let mut report = StandardizeReport {
        input_rows: rows.len(),
        ..Default::default()
    };
    let mut kept = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let Some(bytes) = row.geometry else {
            report.null_dropped += 1;
            continue;
        };
        let Ok(wkb) = geometry::decode(&bytes) else {
            report.undecodable_dropped += 1;
            warn!(table = %name, row = idx, "dropping undecodable geometry");
            continue;
        };
        if geometry::is_empty(&wkb) {
            report.empty_dropped += 1;
            continue;
        }
        if wkb.dimension() == Dimension::Xy {
            kept.push(GeoRow::new(Some(bytes), row.properties));
            continue;
        }
        match geometry::to_geo(&wkb) {
            Some(flat) => {
                report.dimension_stripped += 1;
                kept.push(GeoRow::new(Some(geometry::encode(&flat)?), row.properties));
            }
            None => report.empty_dropped += 1,
        }
    }
    report.output_rows = kept.len();

    info!(
        table = %name,
        input = report.input_rows,
        null_dropped = report.null_dropped,
        empty_dropped = report.empty_dropped,
        dimension_stripped = report.dimension_stripped,
        output = report.output_rows,
        "standardized geometries"
    );
    Ok((GeoTable::from_parts(name, schema, crs, kept), report))
}

/// Distinct geometry types in order of first appearance. Null geometries are skipped.
pub fn geometry_types(table: &GeoTable) -> Result<Vec<GeometryType>> {
    table.require_geometry_column()?;
    let mut kinds = Vec::new();
    for bytes in table.rows().iter().filter_map(|row| row.geometry.as_deref()) {
        let kind = geometry::decode(bytes)?.geometry_type();
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Keep only rows whose geometry is one of `kinds`.
pub fn retain_geometry_types(table: GeoTable, kinds: &[GeometryType]) -> Result<GeoTable> {
    table.require_geometry_column()?;
    let (name, schema, crs, rows) = table.into_parts();
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(bytes) = row.geometry.as_deref() else {
            continue;
        };
        if kinds.contains(&geometry::decode(bytes)?.geometry_type()) {
            kept.push(row);
        }
    }
    Ok(GeoTable::from_parts(name, schema, crs, kept))
}

/// Promote single geometries to their Multi- variant so a column holding
/// e.g. Polygon and MultiPolygon becomes homogeneous. Output is XY.
pub fn promote_to_multi(table: GeoTable) -> Result<GeoTable> {
    table.require_geometry_column()?;
    let (name, schema, crs, rows) = table.into_parts();
    let mut promoted = Vec::with_capacity(rows.len());
    for row in rows {
        let geometry = match row.geometry.as_deref().map(geometry::decode_xy).transpose()? {
            Some(Some(geom)) => Some(geometry::encode(&to_multi(geom))?),
            _ => row.geometry,
        };
        promoted.push(GeoRow::new(geometry, row.properties));
    }
    Ok(GeoTable::from_parts(name, schema, crs, promoted))
}

fn to_multi(geom: Geometry<f64>) -> Geometry<f64> {
    match geom {
        Geometry::Point(point) => Geometry::MultiPoint(MultiPoint::new(vec![point])),
        Geometry::LineString(line) => Geometry::MultiLineString(MultiLineString::new(vec![line])),
        Geometry::Polygon(polygon) => Geometry::MultiPolygon(MultiPolygon::new(vec![polygon])),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{geometry_types, promote_to_multi, retain_geometry_types, standardize_with_report};
    use crate::Result;
    use crate::crs::SIRGAS_2000;
    use crate::geometry::{self, Dimension, GeometryType};
    use crate::table::{GeoRow, GeoTable, Schema};
    use crate::types::{ColumnSpec, ColumnType, Value};
    use geo::{Geometry, LineString, Point, Polygon};
    use std::str::FromStr;
    use wkt::Wkt;

    fn row(text: &str, id: i64) -> Result<GeoRow> {
        GeoRow::from_geometry(&Wkt::<f64>::from_str(text).expect("wkt"), [Value::from(id)])
    }

    fn table(rows: Vec<GeoRow>) -> Result<GeoTable> {
        let schema = Schema::new("geom", vec![ColumnSpec::new("id", ColumnType::Integer)]);
        GeoTable::new("layer", schema, Some(SIRGAS_2000), rows)
    }

    #[test]
    fn strips_z_and_drops_empties() -> Result<()> {
        let rows = vec![
            row("POLYGON Z ((0 0 5, 1 0 5, 1 1 5, 0 0 5))", 1)?,
            row("POLYGON EMPTY", 2)?,
            GeoRow::null_geometry([Value::from(3_i64)]),
            row("POINT (3 4)", 4)?,
            row("LINESTRING ZM (0 0 1 2, 1 1 1 2)", 5)?,
        ];
        let (out, report) = standardize_with_report(table(rows)?)?;

        assert_eq!(report.input_rows, 5);
        assert_eq!(report.null_dropped, 1);
        assert_eq!(report.empty_dropped, 1);
        assert_eq!(report.dimension_stripped, 2);
        assert_eq!(report.output_rows, 3);

        for row in out.rows() {
            let wkb = geometry::decode(row.geometry.as_deref().expect("non-null"))?;
            assert_eq!(wkb.dimension(), Dimension::Xy);
            assert!(!geometry::is_empty(&wkb));
        }
        let first = geometry::decode_xy(out.rows()[0].geometry.as_deref().expect("non-null"))?;
        assert_eq!(
            first,
            Some(Geometry::Polygon(Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                vec![]
            )))
        );
        Ok(())
    }

    #[test]
    fn mixed_types_stay_mixed() -> Result<()> {
        let rows = vec![row("POINT (0 0)", 1)?, row("POLYGON ((0 0, 1 0, 1 1, 0 0))", 2)?];
        let (out, _) = standardize_with_report(table(rows)?)?;
        assert_eq!(
            geometry_types(&out)?,
            vec![GeometryType::Point, GeometryType::Polygon]
        );

        let polygons = retain_geometry_types(out, &[GeometryType::Polygon])?;
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons.rows()[0].properties[0], Value::Integer(2));
        Ok(())
    }

    #[test]
    fn promote_to_multi_homogenizes() -> Result<()> {
        let rows = vec![
            row("POLYGON ((0 0, 1 0, 1 1, 0 0))", 1)?,
            row("MULTIPOLYGON (((5 5, 6 5, 6 6, 5 5)))", 2)?,
        ];
        let promoted = promote_to_multi(table(rows)?)?;
        assert_eq!(geometry_types(&promoted)?, vec![GeometryType::MultiPolygon]);

        let single = promote_to_multi(table(vec![GeoRow::from_geometry(
            &Point::new(1.0, 2.0),
            [Value::from(1_i64)],
        )?])?)?;
        assert_eq!(geometry_types(&single)?, vec![GeometryType::MultiPoint]);
        Ok(())
    }
}
