//! Geometry validity repair.

use crate::error::Result;
use crate::geometry;
use crate::table::{GeoRow, GeoTable};
use geo::{
    BooleanOps, CoordsIter, Geometry, GeometryCollection, LineString, MultiLineString,
    MultiPoint, MultiPolygon, Point, RemoveRepeatedPoints, Validation,
};
use serde::Serialize;
use tracing::{info, warn};

/// Row counts observed by [`validate`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub input_rows: usize,
    pub null_dropped: usize,
    /// Rows that failed the validity check before repair.
    pub invalid_before_fix: usize,
    /// Rows still invalid after the single repair pass; these are dropped.
    pub invalid_after_fix: usize,
    pub valid_rows: usize,
}

/// Drop null geometries, repair invalid ones once, and drop what stays invalid.
///
/// Rows that are already valid keep their geometry bytes untouched; repaired
/// geometries come back as 2D. Empty geometries count as valid.
pub fn validate(table: GeoTable) -> Result<GeoTable> {
    validate_with_report(table).map(|(table, _)| table)
}

/// [`validate`], also returning the counts it logged.
pub fn validate_with_report(table: GeoTable) -> Result<(GeoTable, ValidationReport)> {
    table.require_geometry_column()?;
    let (name, schema, crs, rows) = table.into_parts();

    let mut report = ValidationReport {
        input_rows: rows.len(),
        ..Default::default()
    };
    let mut kept = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let Some(bytes) = row.geometry else {
            report.null_dropped += 1;
            continue;
        };
        match check(&bytes) {
            Check::Valid => kept.push(GeoRow::new(Some(bytes), row.properties)),
            Check::Invalid(geom) => {
                report.invalid_before_fix += 1;
                match geom.and_then(make_valid).filter(|g| g.is_valid()) {
                    Some(fixed) => {
                        kept.push(GeoRow::new(Some(geometry::encode(&fixed)?), row.properties));
                    }
                    None => {
                        report.invalid_after_fix += 1;
                        warn!(table = %name, row = idx, "dropping geometry that could not be repaired");
                    }
                }
            }
        }
    }
    report.valid_rows = kept.len();

    info!(
        table = %name,
        input = report.input_rows,
        null_dropped = report.null_dropped,
        invalid_before_fix = report.invalid_before_fix,
        invalid_after_fix = report.invalid_after_fix,
        valid = report.valid_rows,
        "validated geometries"
    );
    Ok((GeoTable::from_parts(name, schema, crs, kept), report))
}

enum Check {
    Valid,
    /// Carries the decoded geometry, or `None` when the bytes are not WKB.
    Invalid(Option<Geometry<f64>>),
}

fn check(bytes: &[u8]) -> Check {
    let Ok(wkb) = geometry::decode(bytes) else {
        return Check::Invalid(None);
    };
    if geometry::is_empty(&wkb) {
        return Check::Valid;
    }
    match geometry::to_geo(&wkb) {
        Some(geom) if geom.is_valid() => Check::Valid,
        Some(geom) => Check::Invalid(Some(geom)),
        None => Check::Valid,
    }
}

/// Single repair pass. `None` means the geometry cannot be salvaged.
pub fn make_valid(geom: Geometry<f64>) -> Option<Geometry<f64>> {
    if !geom.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite()) {
        return None;
    }
    match geom {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Some(geom),
        Geometry::Line(line) => repair_line_string(LineString::from(vec![line.start, line.end])),
        Geometry::LineString(line) => repair_line_string(line),
        Geometry::MultiLineString(multi) => {
            let mut lines = Vec::new();
            let mut points = Vec::new();
            for line in multi {
                match repair_line_string(line) {
                    Some(Geometry::LineString(line)) => lines.push(line),
                    Some(Geometry::Point(point)) => points.push(point),
                    _ => {}
                }
            }
            match (lines.is_empty(), points.is_empty()) {
                (false, _) => Some(Geometry::MultiLineString(MultiLineString::new(lines))),
                (true, false) => Some(Geometry::MultiPoint(MultiPoint::new(points))),
                (true, true) => None,
            }
        }
        Geometry::Polygon(polygon) => repair_polygons(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => repair_polygons(multi),
        Geometry::Rect(rect) => repair_polygons(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(triangle) => {
            repair_polygons(MultiPolygon::new(vec![triangle.to_polygon()]))
        }
        Geometry::GeometryCollection(collection) => {
            let members: Vec<Geometry<f64>> =
                collection.into_iter().filter_map(make_valid).collect();
            (!members.is_empty()).then(|| Geometry::GeometryCollection(GeometryCollection(members)))
        }
    }
}

// A line with fewer than two distinct points collapses to a point.
fn repair_line_string(line: LineString<f64>) -> Option<Geometry<f64>> {
    let line = line.remove_repeated_points();
    match line.0.len() {
        0 => None,
        1 => Some(Geometry::Point(Point(line.0[0]))),
        _ => Some(Geometry::LineString(line)),
    }
}

// Overlaying with an empty set rebuilds the rings, splitting self-intersections
// and merging overlapping parts. Collapsed polygons vanish.
fn repair_polygons(multi: MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let cleaned = multi.remove_repeated_points();
    let mut rebuilt = MultiPolygon::<f64>::new(vec![]).union(&cleaned);
    match rebuilt.0.len() {
        0 => None,
        1 => rebuilt.0.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(rebuilt)),
    }
}

#[cfg(test)]
mod tests {
    use super::{make_valid, validate, validate_with_report};
    use crate::Result;
    use crate::crs::SIRGAS_2000;
    use crate::error::PipelineError;
    use crate::geometry;
    use crate::table::{GeoRow, GeoTable, Schema};
    use crate::types::{ColumnSpec, ColumnType, Value};
    use geo::{Area, Geometry, LineString, Point, Polygon, Validation};
    use std::str::FromStr;

    fn ring(coords: &[(f64, f64)]) -> Polygon<f64> {
        Polygon::new(LineString::from(coords.to_vec()), vec![])
    }

    fn bowtie() -> Polygon<f64> {
        ring(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)])
    }

    fn table(rows: Vec<GeoRow>) -> Result<GeoTable> {
        let schema = Schema::new("geom", vec![ColumnSpec::new("id", ColumnType::Integer)]);
        GeoTable::new("areas", schema, Some(SIRGAS_2000), rows)
    }

    #[test]
    fn bowtie_is_repaired_into_valid_polygons() {
        let repaired = make_valid(Geometry::Polygon(bowtie())).expect("repairable");
        assert!(repaired.is_valid());
        assert!((repaired.unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_line_collapses_to_point() {
        let line = LineString::from(vec![(1.0, 1.0), (1.0, 1.0)]);
        let repaired = make_valid(Geometry::LineString(line)).expect("repairable");
        assert_eq!(repaired, Geometry::Point(Point::new(1.0, 1.0)));
    }

    #[test]
    fn non_finite_coordinates_are_unrepairable() {
        let point = Geometry::Point(Point::new(f64::NAN, 1.0));
        assert!(make_valid(point).is_none());
    }

    #[test]
    fn zero_area_polygon_is_dropped() {
        let flat = ring(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]);
        assert!(make_valid(Geometry::Polygon(flat)).is_none());
    }

    #[test]
    fn validate_drops_nulls_and_counts_repairs() -> Result<()> {
        let square = ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]);
        let broken = ring(&[(0.0, 0.0), (1.0, 0.0), (f64::NAN, 1.0), (0.0, 0.0)]);
        let rows = vec![
            GeoRow::from_geometry(&square, [Value::from(1_i64)])?,
            GeoRow::null_geometry([Value::from(2_i64)]),
            GeoRow::from_geometry(&bowtie(), [Value::from(3_i64)])?,
            GeoRow::from_geometry(&broken, [Value::from(4_i64)])?,
            GeoRow::new(Some(vec![0xde, 0xad]), vec![Value::from(5_i64)]),
        ];
        let (validated, report) = validate_with_report(table(rows)?)?;

        assert_eq!(report.input_rows, 5);
        assert_eq!(report.null_dropped, 1);
        assert_eq!(report.invalid_before_fix, 3);
        assert_eq!(report.invalid_after_fix, 2);
        assert_eq!(report.valid_rows, 2);

        let ids: Vec<&Value> = validated.rows().iter().map(|r| &r.properties[0]).collect();
        assert_eq!(ids, vec![&Value::Integer(1), &Value::Integer(3)]);
        for row in validated.rows() {
            let geom = geometry::decode_xy(row.geometry.as_deref().expect("non-null"))?
                .expect("non-empty");
            assert!(geom.is_valid());
        }
        Ok(())
    }

    #[test]
    fn valid_rows_keep_their_bytes() -> Result<()> {
        let point_z = wkt::Wkt::<f64>::from_str("POINT Z (1 2 3)").expect("wkt");
        let row = GeoRow::from_geometry(&point_z, [Value::from(1_i64)])?;
        let expected = row.clone();
        let validated = validate(table(vec![row])?)?;
        assert_eq!(validated.rows(), &[expected]);
        Ok(())
    }

    #[test]
    fn missing_geometry_column_is_a_schema_error() -> Result<()> {
        let schema = Schema::without_geometry(vec![ColumnSpec::new("id", ColumnType::Integer)]);
        let table = GeoTable::new("attrs", schema, None, vec![])?;
        let err = validate(table).expect_err("no geometry column");
        assert!(matches!(err, PipelineError::Schema { .. }));
        Ok(())
    }
}
