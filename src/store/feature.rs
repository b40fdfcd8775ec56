//! GeoPackage binary geometry encoding.
//!
//! cf. https://www.geopackage.org/spec140/index.html#gpb_format

use crate::error::{PipelineError, Result};
use crate::geometry;
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, MultiLineStringTrait,
    MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};
use wkb::reader::Wkb;

const MAGIC: [u8; 2] = [0x47, 0x50];
const HEADER_LEN: usize = 8;
const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_ENVELOPE_XY: u8 = 0b0000_0010;
const FLAG_EMPTY: u8 = 0b0001_0000;

/// 2D bounding box of a geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Envelope {
    pub minx: f64,
    pub maxx: f64,
    pub miny: f64,
    pub maxy: f64,
}

impl Envelope {
    pub(crate) fn merge(self, other: Envelope) -> Envelope {
        Envelope {
            minx: self.minx.min(other.minx),
            maxx: self.maxx.max(other.maxx),
            miny: self.miny.min(other.miny),
            maxy: self.maxy.max(other.maxy),
        }
    }

    fn add(bounds: &mut Option<Envelope>, x: f64, y: f64) {
        let point = Envelope {
            minx: x,
            maxx: x,
            miny: y,
            maxy: y,
        };
        *bounds = Some(match *bounds {
            Some(existing) => existing.merge(point),
            None => point,
        });
    }
}

/// Envelope of a geometry, or `None` when it has no coordinates.
pub(crate) fn envelope<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Envelope> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Envelope> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => add_line_string(&mut bounds, line),
        GeoType::Polygon(poly) => add_polygon(&mut bounds, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(&mut bounds, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for member in collection.geometries() {
                if let Some(member_bounds) = envelope(&member) {
                    bounds = Some(match bounds {
                        Some(existing) => existing.merge(member_bounds),
                        None => member_bounds,
                    });
                }
            }
        }
        GeoType::Rect(_) | GeoType::Triangle(_) | GeoType::Line(_) => {}
    }
    bounds
}

fn add_polygon<P: PolygonTrait<T = f64>>(bounds: &mut Option<Envelope>, poly: &P) {
    if let Some(ring) = poly.exterior() {
        add_line_string(bounds, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(bounds, &ring);
    }
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Envelope>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Envelope>, coord: &C) {
    let (x, y) = coord.x_y();
    Envelope::add(bounds, x, y);
}

/// Strip the GeoPackage header and envelope to access the WKB body.
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    if b.len() < HEADER_LEN {
        return Err(PipelineError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: HEADER_LEN,
        });
    }
    if b[0..2] != MAGIC {
        return Err(PipelineError::InvalidGpkgGeometryMagic(b[0], b[1]));
    }
    let flags = b[3];
    let envelope_size: usize = match flags & 0b0000_1110 {
        0b0000_0000 => 0,  // no envelope
        0b0000_0010 => 32, // [minx, maxx, miny, maxy]
        0b0000_0100 => 48, // [minx, maxx, miny, maxy, minz, maxz]
        0b0000_0110 => 48, // [minx, maxx, miny, maxy, minm, maxm]
        0b0000_1000 => 64, // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => return Err(PipelineError::InvalidGpkgGeometryFlags(flags)),
    };
    let offset = HEADER_LEN + envelope_size;
    if b.len() <= offset {
        return Err(PipelineError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: offset + 1,
        });
    }

    Ok(Wkb::try_new(&b[offset..])?)
}

/// Wrap ISO WKB into a GeoPackage blob with an XY envelope.
///
/// Empty geometries get the empty flag and no envelope.
pub(crate) fn wkb_to_gpkg_geometry(wkb_bytes: &[u8], srs_id: i32) -> Result<Vec<u8>> {
    let wkb = geometry::decode(wkb_bytes)?;
    let bounds = if geometry::is_empty(&wkb) {
        None
    } else {
        envelope(&wkb)
    };

    let flags = match bounds {
        Some(_) => FLAG_LITTLE_ENDIAN | FLAG_ENVELOPE_XY,
        None => FLAG_LITTLE_ENDIAN | FLAG_EMPTY,
    };
    let mut blob = Vec::with_capacity(HEADER_LEN + 32 + wkb_bytes.len());
    blob.extend_from_slice(&MAGIC);
    blob.push(0x00); // version
    blob.push(flags);
    blob.extend_from_slice(&srs_id.to_le_bytes());
    if let Some(b) = bounds {
        for value in [b.minx, b.maxx, b.miny, b.maxy] {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }
    blob.extend_from_slice(wkb_bytes);

    Ok(blob)
}
