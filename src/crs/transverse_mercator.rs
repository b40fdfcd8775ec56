use super::projection::{Ellipsoid, Projection, in_geodetic_range};

/// Ellipsoidal Transverse Mercator (series expansion, accurate within a
/// few degrees of the central meridian).
#[derive(Clone, Copy, Debug)]
pub struct TransverseMercator {
    pub ellipsoid: Ellipsoid,
    pub lon_0: f64,
    pub scale_factor: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

// Degrees from the central meridian where the series stay sub-metre.
const MAX_LONGITUDE_OFFSET: f64 = 9.0;
// Slack for the inverse series' own error at the bound.
const INVERSE_TOLERANCE: f64 = 0.1;

impl TransverseMercator {
    pub fn utm(ellipsoid: Ellipsoid, zone: u32, south: bool) -> Self {
        Self {
            ellipsoid,
            lon_0: f64::from(zone) * 6.0 - 183.0,
            scale_factor: 0.9996,
            false_easting: 500_000.0,
            false_northing: if south { 10_000_000.0 } else { 0.0 },
        }
    }

    fn second_eccentricity_squared(&self) -> f64 {
        let es = self.ellipsoid.es();
        es / (1.0 - es)
    }
}

impl Projection for TransverseMercator {
    fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !in_geodetic_range(lon, lat) || lat.abs() >= 90.0 {
            return None;
        }
        let dlon = lon - self.lon_0;
        if dlon.abs() > MAX_LONGITUDE_OFFSET {
            return None;
        }
        let k0 = self.scale_factor;
        let ep2 = self.second_eccentricity_squared();
        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = sin_phi / cos_phi;

        let n = self.ellipsoid.prime_vertical_radius(phi);
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = dlon.to_radians() * cos_phi;
        let m = self.ellipsoid.meridian_arc(phi);

        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;

        let x = k0
            * n
            * (a + (1.0 - t + c) * a3 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a5 / 120.0);
        let y = k0
            * (m + n
                * tan_phi
                * (a2 / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a6 / 720.0));

        Some((x + self.false_easting, y + self.false_northing))
    }

    fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let k0 = self.scale_factor;
        let a = self.ellipsoid.a;
        let es = self.ellipsoid.es();
        let ep2 = self.second_eccentricity_squared();
        let x = x - self.false_easting;
        let y = y - self.false_northing;

        let m = y / k0;
        let mu = m / (a * (1.0 - es / 4.0 - 3.0 * es * es / 64.0 - 5.0 * es * es * es / 256.0));
        let e1 = (1.0 - (1.0 - es).sqrt()) / (1.0 + (1.0 - es).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();
        if phi1.abs() >= std::f64::consts::FRAC_PI_2 {
            return None;
        }

        let (sin_phi1, cos_phi1) = phi1.sin_cos();
        let tan_phi1 = sin_phi1 / cos_phi1;
        let c1 = ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let w = 1.0 - es * sin_phi1 * sin_phi1;
        let n1 = a / w.sqrt();
        let r1 = a * (1.0 - es) / w.powf(1.5);
        let d = x / (n1 * k0);

        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let phi = phi1
            - (n1 * tan_phi1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d4 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * ep2
                        - 3.0 * c1 * c1)
                        * d6
                        / 720.0);
        let dlon = (d - (1.0 + 2.0 * t1 + c1) * d3 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d5
                / 120.0)
            / cos_phi1;

        if dlon.to_degrees().abs() > MAX_LONGITUDE_OFFSET + INVERSE_TOLERANCE {
            return None;
        }
        let lon = self.lon_0 + dlon.to_degrees();
        let lat = phi.to_degrees();
        in_geodetic_range(lon, lat).then_some((lon, lat))
    }
}
