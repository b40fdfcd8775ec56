use super::projection::{Ellipsoid, Projection, in_geodetic_range};

const MAX_ITERATIONS: usize = 20;
const TOLERANCE: f64 = 1e-12;

/// Ellipsoidal American Polyconic projection.
#[derive(Clone, Copy, Debug)]
pub struct Polyconic {
    pub ellipsoid: Ellipsoid,
    /// Latitude of origin, degrees.
    pub lat_0: f64,
    /// Central meridian, degrees.
    pub lon_0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl Polyconic {
    /// SIRGAS 2000 / Brazil Polyconic (EPSG:5880).
    pub fn brazil(ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            lat_0: 0.0,
            lon_0: -54.0,
            false_easting: 5_000_000.0,
            false_northing: 10_000_000.0,
        }
    }

    fn m0(&self) -> f64 {
        self.ellipsoid.meridian_arc(self.lat_0.to_radians())
    }
}

impl Projection for Polyconic {
    fn forward(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        if !in_geodetic_range(lon, lat) || lat.abs() >= 90.0 {
            return None;
        }
        let a = self.ellipsoid.a;
        let phi = lat.to_radians();
        let dlon = (lon - self.lon_0).to_radians();

        let (x, y) = if phi.abs() < TOLERANCE {
            (a * dlon, -self.m0())
        } else {
            let n = self.ellipsoid.prime_vertical_radius(phi);
            let e = dlon * phi.sin();
            let cot = 1.0 / phi.tan();
            (
                n * cot * e.sin(),
                self.ellipsoid.meridian_arc(phi) - self.m0() + n * cot * (1.0 - e.cos()),
            )
        };

        Some((x + self.false_easting, y + self.false_northing))
    }

    fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let a = self.ellipsoid.a;
        let es = self.ellipsoid.es();
        let x = x - self.false_easting;
        let y = y - self.false_northing;
        let m0 = self.m0();

        if (y + m0).abs() < TOLERANCE * a {
            let lon = self.lon_0 + (x / a).to_degrees();
            return in_geodetic_range(lon, 0.0).then_some((lon, 0.0));
        }

        let big_a = (m0 + y) / a;
        let big_b = x * x / (a * a) + big_a * big_a;

        let mut phi = big_a;
        let mut converged = false;
        for _ in 0..MAX_ITERATIONS {
            let sin_phi = phi.sin();
            let sin_2phi = (2.0 * phi).sin();
            let c = (1.0 - es * sin_phi * sin_phi).sqrt() * phi.tan();
            let mn = self.ellipsoid.meridian_arc(phi) / a;
            let mn_prime = self.ellipsoid.meridian_arc_derivative(phi);

            let numerator = big_a * (c * mn + 1.0) - mn - 0.5 * (mn * mn + big_b) * c;
            let denominator = es * sin_2phi * (mn * mn + big_b - 2.0 * big_a * mn) / (4.0 * c)
                + (big_a - mn) * (c * mn_prime - 2.0 / sin_2phi)
                - mn_prime;
            if !denominator.is_finite() || denominator == 0.0 {
                return None;
            }

            let delta = numerator / denominator;
            phi -= delta;
            if delta.abs() < TOLERANCE {
                converged = true;
                break;
            }
        }
        if !converged || phi.abs() > std::f64::consts::FRAC_PI_2 {
            return None;
        }

        let sin_phi = phi.sin();
        let c = (1.0 - es * sin_phi * sin_phi).sqrt() * phi.tan();
        let ratio = x * c / a;
        if ratio.abs() > 1.0 {
            return None;
        }
        let lon = self.lon_0 + (ratio.asin() / sin_phi).to_degrees();
        let lat = phi.to_degrees();
        in_geodetic_range(lon, lat).then_some((lon, lat))
    }
}
