use crate::crs::{Crs, Transformer};
use crate::error::{PipelineError, Result};
use crate::geometry;
use crate::table::{GeoRow, GeoTable};
use geo::{Coord, MapCoords};
use tracing::{debug, info};

/// Transform every geometry of `table` into `target` and retag the table.
///
/// Returns the table unchanged when it is already in `target`. Fails with
/// `MissingCrs` when the table has no CRS, and with `TransformFailed` (for the
/// whole table) when any coordinate falls outside either projection's domain.
/// Transformed geometries are XY.
pub fn reproject(table: GeoTable, target: Crs) -> Result<GeoTable> {
    table.require_geometry_column()?;
    let Some(source) = table.crs() else {
        return Err(PipelineError::MissingCrs {
            table: table.name().to_string(),
        });
    };
    if source == target {
        debug!(table = table.name(), crs = %target, "already in target CRS");
        return Ok(table);
    }

    let transformer = Transformer::new(source, target)?;
    let (name, schema, _, rows) = table.into_parts();
    let mut transformed = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        let geometry = match row.geometry.as_deref().map(geometry::decode_xy).transpose()? {
            Some(Some(geom)) => {
                let projected = geom
                    .try_map_coords(|c: Coord<f64>| {
                        transformer
                            .transform(c.x, c.y)
                            .map(|(x, y)| Coord { x, y })
                            .ok_or(())
                    })
                    .map_err(|()| PipelineError::TransformFailed {
                        table: name.clone(),
                        row: idx,
                        from: source,
                        to: target,
                    })?;
                Some(geometry::encode(&projected)?)
            }
            // Null and empty geometries have nothing to transform.
            _ => row.geometry,
        };
        transformed.push(GeoRow::new(geometry, row.properties));
    }

    info!(table = %name, from = %source, to = %target, rows = transformed.len(), "reprojected");
    Ok(GeoTable::from_parts(name, schema, Some(target), transformed))
}
