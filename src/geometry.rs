//! WKB helpers shared by the pipeline stages.
//!
//! Row geometries are kept as ISO WKB so Z/M ordinates survive until the
//! standardizer drops them. Stages that need geometric algorithms decode
//! into `geo` types, which only carry X/Y.

use crate::error::Result;
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use wkb::reader::Wkb;

pub use wkb::reader::{Dimension, GeometryType};

/// Encode any geometry as little endian ISO WKB.
pub fn encode<G: GeometryTrait<T = f64>>(geometry: &G) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    wkb::writer::write_geometry(&mut buf, geometry, &Default::default())?;
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<Wkb<'_>> {
    Ok(Wkb::try_new(bytes)?)
}

/// Decode WKB into a 2D `geo` geometry, discarding any Z/M ordinates.
///
/// Returns `None` for an empty point, which `geo` cannot represent.
pub fn decode_xy(bytes: &[u8]) -> Result<Option<Geometry<f64>>> {
    let wkb = decode(bytes)?;
    Ok(to_geo(&wkb))
}

/// True when the geometry has no coordinates at all.
pub fn is_empty<G: GeometryTrait<T = f64>>(geom: &G) -> bool {
    use geo_traits::GeometryType as GeoType;

    match geom.as_type() {
        GeoType::Point(point) => point.coord().is_none(),
        GeoType::LineString(line) => line.coords().next().is_none(),
        GeoType::Polygon(poly) => poly
            .exterior()
            .is_none_or(|ring| ring.coords().next().is_none()),
        GeoType::MultiPoint(multi) => multi.points().all(|point| point.coord().is_none()),
        GeoType::MultiLineString(multi) => multi
            .line_strings()
            .all(|line| line.coords().next().is_none()),
        GeoType::MultiPolygon(multi) => multi.polygons().all(|poly| {
            poly.exterior()
                .is_none_or(|ring| ring.coords().next().is_none())
        }),
        GeoType::GeometryCollection(collection) => {
            collection.geometries().all(|member| is_empty(&member))
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => false,
    }
}

/// Walk a `geo-traits` geometry into an owned 2D `geo` geometry.
pub fn to_geo<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Geometry<f64>> {
    use geo_traits::GeometryType as GeoType;

    match geom.as_type() {
        GeoType::Point(point) => point.coord().map(|c| Geometry::Point(Point(to_coord(&c)))),
        GeoType::LineString(line) => Some(Geometry::LineString(to_line_string(line))),
        GeoType::Polygon(poly) => Some(Geometry::Polygon(to_polygon(poly))),
        GeoType::MultiPoint(multi) => Some(Geometry::MultiPoint(MultiPoint::new(
            multi
                .points()
                .filter_map(|point| point.coord().map(|c| Point(to_coord(&c))))
                .collect(),
        ))),
        GeoType::MultiLineString(multi) => Some(Geometry::MultiLineString(MultiLineString::new(
            multi
                .line_strings()
                .map(|line| to_line_string(&line))
                .collect(),
        ))),
        GeoType::MultiPolygon(multi) => Some(Geometry::MultiPolygon(MultiPolygon::new(
            multi.polygons().map(|poly| to_polygon(&poly)).collect(),
        ))),
        GeoType::GeometryCollection(collection) => {
            Some(Geometry::GeometryCollection(GeometryCollection(
                collection
                    .geometries()
                    .filter_map(|member| to_geo(&member))
                    .collect(),
            )))
        }
        // WKB never decodes into these.
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => None,
    }
}

fn to_coord<C: CoordTrait<T = f64>>(coord: &C) -> Coord<f64> {
    let (x, y) = coord.x_y();
    Coord { x, y }
}

fn to_line_string<L: LineStringTrait<T = f64>>(line: &L) -> LineString<f64> {
    LineString::new(line.coords().map(|c| to_coord(&c)).collect())
}

fn to_polygon<P: PolygonTrait<T = f64>>(poly: &P) -> Polygon<f64> {
    let exterior = poly
        .exterior()
        .map(|ring| to_line_string(&ring))
        .unwrap_or_else(|| LineString::new(Vec::new()));
    let interiors = poly.interiors().map(|ring| to_line_string(&ring)).collect();
    Polygon::new(exterior, interiors)
}
