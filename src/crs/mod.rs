//! Coordinate reference systems known to the pipeline.
//!
//! A [`Crs`] is an EPSG code. [`Crs::definition`] resolves it against the
//! built-in catalog, which carries the OGC WKT needed to register the SRS in
//! a GeoPackage and the [`Projection`] used to transform coordinates.
//!
//! WGS 84 and SIRGAS 2000 are treated as the same datum; no datum shift is
//! applied between them.

mod polyconic;
mod projection;
mod transverse_mercator;

pub use polyconic::Polyconic;
pub use projection::{Ellipsoid, GRS80, Geographic, Projection, WGS84, WebMercator};
pub use transverse_mercator::TransverseMercator;

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SIRGAS 2000 / Brazil Polyconic, the default target of the pipeline.
pub const SIRGAS_2000_POLYCONIC: Crs = Crs(5880);
pub const SIRGAS_2000: Crs = Crs(4674);
pub const WGS_84: Crs = Crs(4326);

/// Spatial reference identified by its EPSG code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs(u32);

impl Crs {
    pub const fn epsg(code: u32) -> Self {
        Self(code)
    }

    pub fn code(&self) -> u32 {
        self.0
    }

    /// Look the code up in the built-in catalog.
    pub fn definition(&self) -> Result<CrsDefinition> {
        let code = self.0;
        let definition = match code {
            4326 => CrsDefinition::geographic(*self, "WGS 84", Datum::Wgs84),
            4674 => CrsDefinition::geographic(*self, "SIRGAS 2000", Datum::Sirgas2000),
            3857 => CrsDefinition {
                crs: *self,
                name: "WGS 84 / Pseudo-Mercator".to_string(),
                definition: projected_wkt(
                    "WGS 84 / Pseudo-Mercator",
                    Datum::Wgs84,
                    "Mercator_1SP",
                    &[
                        ("central_meridian", 0.0),
                        ("scale_factor", 1.0),
                        ("false_easting", 0.0),
                        ("false_northing", 0.0),
                    ],
                    code,
                ),
                projection: Box::new(WebMercator),
            },
            5880 => {
                let projection = Polyconic::brazil(GRS80);
                CrsDefinition {
                    crs: *self,
                    name: "SIRGAS 2000 / Brazil Polyconic".to_string(),
                    definition: projected_wkt(
                        "SIRGAS 2000 / Brazil Polyconic",
                        Datum::Sirgas2000,
                        "Polyconic",
                        &[
                            ("latitude_of_origin", projection.lat_0),
                            ("central_meridian", projection.lon_0),
                            ("false_easting", projection.false_easting),
                            ("false_northing", projection.false_northing),
                        ],
                        code,
                    ),
                    projection: Box::new(projection),
                }
            }
            31978..=31985 => {
                let zone = code - 31978 + 18;
                let name = format!("SIRGAS 2000 / UTM zone {zone}S");
                CrsDefinition::utm(*self, name, Datum::Sirgas2000, zone, true)
            }
            32601..=32660 => {
                let zone = code - 32600;
                let name = format!("WGS 84 / UTM zone {zone}N");
                CrsDefinition::utm(*self, name, Datum::Wgs84, zone, false)
            }
            32701..=32760 => {
                let zone = code - 32700;
                let name = format!("WGS 84 / UTM zone {zone}S");
                CrsDefinition::utm(*self, name, Datum::Wgs84, zone, true)
            }
            _ => return Err(PipelineError::UnsupportedCrs(self.to_string())),
        };
        Ok(definition)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("EPSG") => code,
            Some(_) => return Err(PipelineError::UnsupportedCrs(s.to_string())),
            None => trimmed,
        };
        digits
            .trim()
            .parse::<u32>()
            .map(Crs)
            .map_err(|_| PipelineError::UnsupportedCrs(s.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(value: Crs) -> Self {
        value.to_string()
    }
}

/// Catalog entry for one CRS.
pub struct CrsDefinition {
    pub crs: Crs,
    pub name: String,
    /// OGC WKT (version 1) used for `gpkg_spatial_ref_sys.definition`.
    pub definition: String,
    pub projection: Box<dyn Projection>,
}

impl fmt::Debug for CrsDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrsDefinition")
            .field("crs", &self.crs)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CrsDefinition {
    fn geographic(crs: Crs, name: &str, datum: Datum) -> Self {
        Self {
            crs,
            name: name.to_string(),
            definition: datum.geogcs_wkt(),
            projection: Box::new(Geographic),
        }
    }

    fn utm(crs: Crs, name: String, datum: Datum, zone: u32, south: bool) -> Self {
        let projection = TransverseMercator::utm(datum.ellipsoid(), zone, south);
        let definition = projected_wkt(
            &name,
            datum,
            "Transverse_Mercator",
            &[
                ("latitude_of_origin", 0.0),
                ("central_meridian", projection.lon_0),
                ("scale_factor", projection.scale_factor),
                ("false_easting", projection.false_easting),
                ("false_northing", projection.false_northing),
            ],
            crs.code(),
        );
        Self {
            crs,
            name,
            definition,
            projection: Box::new(projection),
        }
    }
}

/// Point transform between two catalog entries through geodetic coordinates.
pub struct Transformer {
    from: CrsDefinition,
    to: CrsDefinition,
}

impl Transformer {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        Ok(Self {
            from: from.definition()?,
            to: to.definition()?,
        })
    }

    pub fn source(&self) -> Crs {
        self.from.crs
    }

    pub fn target(&self) -> Crs {
        self.to.crs
    }

    pub fn transform(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (lon, lat) = self.from.projection.inverse(x, y)?;
        self.to.projection.forward(lon, lat)
    }
}

#[derive(Clone, Copy, Debug)]
enum Datum {
    Wgs84,
    Sirgas2000,
}

impl Datum {
    fn ellipsoid(self) -> Ellipsoid {
        match self {
            Datum::Wgs84 => WGS84,
            Datum::Sirgas2000 => GRS80,
        }
    }

    fn geogcs_wkt(self) -> String {
        match self {
            Datum::Wgs84 => r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#.to_string(),
            Datum::Sirgas2000 => r#"GEOGCS["SIRGAS 2000",DATUM["Sistema_de_Referencia_Geocentrico_para_las_AmericaS_2000",SPHEROID["GRS 1980",6378137,298.257222101,AUTHORITY["EPSG","7019"]],TOWGS84[0,0,0,0,0,0,0],AUTHORITY["EPSG","6674"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4674"]]"#.to_string(),
        }
    }
}

fn projected_wkt(
    name: &str,
    datum: Datum,
    method: &str,
    parameters: &[(&str, f64)],
    code: u32,
) -> String {
    let parameters = parameters
        .iter()
        .map(|(key, value)| format!(r#"PARAMETER["{key}",{value}]"#))
        .collect::<Vec<String>>()
        .join(",");
    format!(
        r#"PROJCS["{name}",{geogcs},PROJECTION["{method}"],{parameters},UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["Easting",EAST],AXIS["Northing",NORTH],AUTHORITY["EPSG","{code}"]]"#,
        geogcs = datum.geogcs_wkt(),
    )
}
