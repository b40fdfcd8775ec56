use crate::error::Result;
use crate::geometry;
use crate::pipeline::SpatialPredicate;
use crate::store::feature::{Envelope, envelope, gpkg_geometry_to_wkb};
use geo::Validation;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};
use wkb::reader::Wkb;

/// Register the spatial SQL functions used by GeoPackage triggers and queries.
///
/// Bounds functions (`ST_MinX`, `ST_MaxX`, `ST_MinY`, `ST_MaxY`, `ST_IsEmpty`)
/// are required by the R-tree triggers. The predicates (`ST_Intersects`,
/// `ST_Within`, `ST_Contains`), `ST_IsValid` and `ST_GeometryType` make the
/// store queryable with spatial SQL.
///
/// ```no_run
/// use rusqlite::Connection;
/// use geoharmonize::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), geoharmonize::PipelineError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |b| b.minx)?;
    register_bounds_component(conn, "ST_MinY", |b| b.miny)?;
    register_bounds_component(conn, "ST_MaxX", |b| b.maxx)?;
    register_bounds_component(conn, "ST_MaxY", |b| b.maxy)?;
    register_st_isempty(conn)?;
    register_st_isvalid(conn)?;
    register_st_geometrytype(conn)?;
    register_predicate(conn, "ST_Intersects", SpatialPredicate::Intersects)?;
    register_predicate(conn, "ST_Within", SpatialPredicate::Within)?;
    register_predicate(conn, "ST_Contains", SpatialPredicate::Contains)?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(wkb) = wkb_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            Ok(Some(i64::from(geometry::is_empty(&wkb))))
        },
    )?;
    Ok(())
}

fn register_st_isvalid(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsValid",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(wkb) = wkb_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            // An empty point has no geo representation and is valid.
            let valid = geometry::to_geo(&wkb).is_none_or(|geom| geom.is_valid());
            Ok(Some(i64::from(valid)))
        },
    )?;
    Ok(())
}

fn register_st_geometrytype(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_GeometryType",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(wkb) = wkb_from_ctx(ctx, 0)? else {
                return Ok(None);
            };
            let name = crate::conversions::geometry_type_to_str(Some(wkb.geometry_type()));
            Ok(Some(name.to_string()))
        },
    )?;
    Ok(())
}

fn register_predicate(conn: &Connection, name: &str, predicate: SpatialPredicate) -> Result<()> {
    conn.create_scalar_function(name, 2, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let (Some(left), Some(right)) = (wkb_from_ctx(ctx, 0)?, wkb_from_ctx(ctx, 1)?) else {
            return Ok(None);
        };
        let (Some(left), Some(right)) = (geometry::to_geo(&left), geometry::to_geo(&right)) else {
            return Ok(Some(0_i64));
        };
        Ok(Some(i64::from(predicate.evaluate(&left, &right))))
    })?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Envelope) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let Some(wkb) = wkb_from_ctx(ctx, 0)? else {
            return Ok(None);
        };
        Ok(envelope(&wkb).map(f))
    })?;
    Ok(())
}

fn wkb_from_ctx<'a>(
    ctx: &'a Context<'a>,
    idx: usize,
) -> std::result::Result<Option<Wkb<'a>>, Error> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            let wkb = gpkg_geometry_to_wkb(blob)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(wkb))
        }
        _ => Err(Error::InvalidFunctionParameterType(idx, Type::Blob)),
    }
}

#[cfg(test)]
mod tests {
    use super::register_spatial_functions;
    use crate::geometry;
    use crate::store::feature::wkb_to_gpkg_geometry;
    use geo_types::{Geometry, GeometryCollection, LineString, MultiPoint, Point, Polygon};
    use rusqlite::{Connection, params};

    fn blob<G: geo_traits::GeometryTrait<T = f64>>(geometry: &G) -> crate::Result<Vec<u8>> {
        wkb_to_gpkg_geometry(&geometry::encode(geometry)?, 4326)
    }

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ]),
            vec![],
        )
    }

    fn connection() -> crate::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        Ok(conn)
    }

    #[test]
    fn st_bounds_for_multipoint() -> crate::Result<()> {
        let conn = connection()?;
        let mp = MultiPoint::from(vec![Point::new(1.0, 5.0), Point::new(-2.0, 3.0)]);

        let (minx, maxx, miny, maxy, empty): (f64, f64, f64, f64, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob(&mp)?],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

        assert_eq!((minx, maxx, miny, maxy), (-2.0, 1.0, 3.0, 5.0));
        assert_eq!(empty, 0);
        Ok(())
    }

    #[test]
    fn st_is_empty_for_empty_linestring() -> crate::Result<()> {
        let conn = connection()?;
        let line: LineString<f64> = LineString::new(Vec::new());

        let (minx, empty): (Option<f64>, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_IsEmpty(?1)",
            params![blob(&line)?],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        assert!(minx.is_none());
        assert_eq!(empty, 1);
        Ok(())
    }

    #[test]
    fn st_bounds_for_geometry_collection() -> crate::Result<()> {
        let conn = connection()?;
        let collection = GeometryCollection::from(vec![
            Geometry::Point(Point::new(5.0, -1.0)),
            Geometry::LineString(LineString::from(vec![(-2.0, 2.0), (1.0, 3.0)])),
        ]);

        let (minx, maxx, miny, maxy): (f64, f64, f64, f64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1)",
            params![blob(&collection)?],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        assert_eq!((minx, maxx, miny, maxy), (-2.0, 5.0, -1.0, 3.0));
        Ok(())
    }

    #[test]
    fn spatial_predicates() -> crate::Result<()> {
        let conn = connection()?;
        let outer = blob(&square(0.0, 0.0, 10.0))?;
        let inner = blob(&square(2.0, 2.0, 2.0))?;
        let apart = blob(&square(20.0, 20.0, 1.0))?;

        let (within, contains, intersects, disjoint): (i64, i64, i64, i64) = conn.query_row(
            "SELECT ST_Within(?1, ?2), ST_Contains(?2, ?1), ST_Intersects(?1, ?2), ST_Intersects(?1, ?3)",
            params![inner, outer, apart],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        assert_eq!((within, contains, intersects, disjoint), (1, 1, 1, 0));
        Ok(())
    }

    #[test]
    fn is_valid_and_geometry_type() -> crate::Result<()> {
        let conn = connection()?;
        let bowtie = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        );

        let (valid, invalid, kind): (i64, i64, String) = conn.query_row(
            "SELECT ST_IsValid(?1), ST_IsValid(?2), ST_GeometryType(?2)",
            params![blob(&square(0.0, 0.0, 1.0))?, blob(&bowtie)?],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        assert_eq!((valid, invalid, kind.as_str()), (1, 0, "POLYGON"));
        Ok(())
    }
}
