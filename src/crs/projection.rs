use std::f64::consts::FRAC_PI_4;

/// Map projection between geodetic longitude/latitude (degrees) and the
/// native coordinates of a coordinate reference system.
///
/// Both directions return `None` when the input lies outside the domain
/// the projection is defined on.
pub trait Projection: Send + Sync {
    /// Geodetic (lon, lat) in degrees to native (x, y).
    fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)>;

    /// Native (x, y) to geodetic (lon, lat) in degrees.
    fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub inverse_flattening: f64,
}

pub const GRS80: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    inverse_flattening: 298.257_222_101,
};

pub const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.0,
    inverse_flattening: 298.257_223_563,
};

impl Ellipsoid {
    /// First eccentricity squared.
    pub fn es(&self) -> f64 {
        let f = 1.0 / self.inverse_flattening;
        f * (2.0 - f)
    }

    /// Distance along the meridian from the equator to `phi` (radians).
    pub fn meridian_arc(&self, phi: f64) -> f64 {
        let (m1, m2, m3, m4) = self.meridian_coefficients();
        self.a
            * (m1 * phi - m2 * (2.0 * phi).sin() + m3 * (4.0 * phi).sin()
                - m4 * (6.0 * phi).sin())
    }

    /// Derivative of `meridian_arc / a` with respect to `phi`.
    pub fn meridian_arc_derivative(&self, phi: f64) -> f64 {
        let (m1, m2, m3, m4) = self.meridian_coefficients();
        m1 - 2.0 * m2 * (2.0 * phi).cos() + 4.0 * m3 * (4.0 * phi).cos()
            - 6.0 * m4 * (6.0 * phi).cos()
    }

    /// Radius of curvature in the prime vertical.
    pub fn prime_vertical_radius(&self, phi: f64) -> f64 {
        let sin_phi = phi.sin();
        self.a / (1.0 - self.es() * sin_phi * sin_phi).sqrt()
    }

    fn meridian_coefficients(&self) -> (f64, f64, f64, f64) {
        let e2 = self.es();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        (
            1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0,
            3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0,
            15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0,
            35.0 * e6 / 3072.0,
        )
    }
}

/// Geographic coordinates stored as (lon, lat) degrees.
#[derive(Clone, Copy, Debug)]
pub struct Geographic;

impl Projection for Geographic {
    fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        in_geodetic_range(lon, lat).then_some((lon, lat))
    }

    fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        in_geodetic_range(x, y).then_some((x, y))
    }
}

/// Spherical ("Pseudo") Mercator on the WGS 84 semi-major axis.
#[derive(Clone, Copy, Debug)]
pub struct WebMercator;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

impl Projection for WebMercator {
    fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !in_geodetic_range(lon, lat) || lat.abs() > WEB_MERCATOR_MAX_LAT {
            return None;
        }
        let x = WEB_MERCATOR_RADIUS * lon.to_radians();
        let y = WEB_MERCATOR_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
        Some((x, y))
    }

    fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let lon = (x / WEB_MERCATOR_RADIUS).to_degrees();
        let lat = (2.0 * (y / WEB_MERCATOR_RADIUS).exp().atan() - 2.0 * FRAC_PI_4).to_degrees();
        in_geodetic_range(lon, lat).then_some((lon, lat))
    }
}

pub(crate) fn in_geodetic_range(lon: f64, lat: f64) -> bool {
    lon.is_finite() && lat.is_finite() && lon.abs() <= 180.0 && lat.abs() <= 90.0
}
