//! Grid definition templates: 3.0 (regular lat/lon) and 3.30 (Lambert
//! Conformal, spherical earth).

use std::f64::consts::{FRAC_PI_4, PI};

use super::sections::Reader;
use super::DecodeError;

const MICRO: f64 = 1e-6;

/// A decoded grid definition with coordinates already materialized in data
/// scan order (rows = j, columns = i, i varying fastest).
#[derive(Debug, Clone)]
pub enum GridDefinition {
    RegularLatLon {
        /// Row coordinate per j, in scan order (may be north-to-south).
        lat: Vec<f64>,
        /// Column coordinate per i.
        lon: Vec<f64>,
    },
    LambertConformal {
        nx: usize,
        ny: usize,
        /// Flattened row-major (j, i) auxiliary coordinates.
        lat: Vec<f64>,
        lon: Vec<f64>,
    },
}

impl GridDefinition {
    pub fn point_count(&self) -> usize {
        match self {
            GridDefinition::RegularLatLon { lat, lon } => lat.len() * lon.len(),
            GridDefinition::LambertConformal { nx, ny, .. } => nx * ny,
        }
    }
}

/// Parse section 3 into a [`GridDefinition`].
pub(crate) fn parse_grid(body: &[u8]) -> Result<GridDefinition, DecodeError> {
    let mut r = Reader::at(body, 12);
    let template = r.u16()?;
    match template {
        0 => parse_regular(body),
        30 => parse_lambert(body),
        other => Err(DecodeError::Unsupported(format!(
            "grid definition template 3.{}",
            other
        ))),
    }
}

fn scan_flags(flags: u8) -> Result<(bool, bool), DecodeError> {
    // Adjacent points in the j direction being consecutive is not published
    // by any supported provider.
    if flags & 0x20 != 0 {
        return Err(DecodeError::Unsupported(
            "j-consecutive scanning mode".to_string(),
        ));
    }
    let i_negative = flags & 0x80 != 0;
    let j_positive = flags & 0x40 != 0;
    Ok((i_negative, j_positive))
}

fn parse_regular(body: &[u8]) -> Result<GridDefinition, DecodeError> {
    let t = 14;
    let mut r = Reader::at(body, t + 16);
    let ni = r.u32()? as usize;
    let nj = r.u32()? as usize;
    if ni == 0 || nj == 0 {
        return Err(DecodeError::Malformed("zero grid dimension".to_string()));
    }
    let _basic_angle = r.u32()?;
    let _subdivisions = r.u32()?;
    let la1 = r.i32_sm()? as f64 * MICRO;
    let lo1 = r.i32_sm()? as f64 * MICRO;
    let _resolution_flags = r.u8()?;
    let _la2 = r.i32_sm()?;
    let _lo2 = r.i32_sm()?;
    let di = r.u32()? as f64 * MICRO;
    let dj = r.u32()? as f64 * MICRO;
    let (i_negative, j_positive) = scan_flags(r.u8()?)?;

    let lon_step = if i_negative { -di } else { di };
    let lat_step = if j_positive { dj } else { -dj };
    let lon = (0..ni).map(|i| lo1 + i as f64 * lon_step).collect();
    let lat = (0..nj).map(|j| la1 + j as f64 * lat_step).collect();
    Ok(GridDefinition::RegularLatLon { lat, lon })
}

fn earth_radius(body: &[u8]) -> Result<f64, DecodeError> {
    let t = 14;
    let mut r = Reader::at(body, t);
    let shape = r.u8()?;
    let scale = r.u8()?;
    let value = r.u32()?;
    match shape {
        0 => Ok(6_367_470.0),
        1 => {
            if value == 0 {
                return Err(DecodeError::Malformed("zero earth radius".to_string()));
            }
            Ok(value as f64 / 10f64.powi(scale as i32))
        }
        6 => Ok(6_371_229.0),
        other => Err(DecodeError::Unsupported(format!("earth shape {}", other))),
    }
}

/// Spherical Lambert Conformal Conic, secant or tangent form.
struct Lcc {
    radius: f64,
    n: f64,
    f: f64,
    rho0: f64,
    lon0: f64,
}

impl Lcc {
    fn new(radius: f64, latin1: f64, latin2: f64, lat_d: f64, lov: f64) -> Self {
        let phi1 = latin1.to_radians();
        let phi2 = latin2.to_radians();
        let n = if (latin1 - latin2).abs() < 1e-9 {
            phi1.sin()
        } else {
            (phi1.cos() / phi2.cos()).ln()
                / ((FRAC_PI_4 + phi2 / 2.0).tan() / (FRAC_PI_4 + phi1 / 2.0).tan()).ln()
        };
        let f = phi1.cos() * (FRAC_PI_4 + phi1 / 2.0).tan().powf(n) / n;
        let rho0 = radius * f / (FRAC_PI_4 + lat_d.to_radians() / 2.0).tan().powf(n);
        Lcc {
            radius,
            n,
            f,
            rho0,
            lon0: normalize_lon(lov).to_radians(),
        }
    }

    fn forward(&self, lat: f64, lon: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let rho = self.radius * self.f / (FRAC_PI_4 + phi / 2.0).tan().powf(self.n);
        let dlon = normalize_lon_rad(lon.to_radians() - self.lon0);
        let theta = self.n * dlon;
        (rho * theta.sin(), self.rho0 - rho * theta.cos())
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let (x, y, rho0) = if self.n >= 0.0 {
            (x, y, self.rho0)
        } else {
            (-x, -y, -self.rho0)
        };
        let rho = (x * x + (rho0 - y) * (rho0 - y)).sqrt();
        let theta = x.atan2(rho0 - y);
        let lat = if rho.abs() < f64::EPSILON {
            if self.n >= 0.0 {
                90.0
            } else {
                -90.0
            }
        } else {
            let t = (self.radius * self.f.abs() / rho).powf(1.0 / self.n.abs());
            let phi = 2.0 * t.atan() - PI / 2.0;
            if self.n >= 0.0 {
                phi.to_degrees()
            } else {
                -phi.to_degrees()
            }
        };
        let lon = normalize_lon((self.lon0 + theta / self.n).to_degrees());
        (lat, lon)
    }
}

fn normalize_lon(lon: f64) -> f64 {
    let mut l = (lon + 180.0) % 360.0;
    if l < 0.0 {
        l += 360.0;
    }
    l - 180.0
}

fn normalize_lon_rad(dlon: f64) -> f64 {
    let mut d = dlon % (2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    } else if d < -PI {
        d += 2.0 * PI;
    }
    d
}

fn parse_lambert(body: &[u8]) -> Result<GridDefinition, DecodeError> {
    let radius = earth_radius(body)?;
    let t = 14;
    let mut r = Reader::at(body, t + 16);
    let nx = r.u32()? as usize;
    let ny = r.u32()? as usize;
    if nx == 0 || ny == 0 {
        return Err(DecodeError::Malformed("zero grid dimension".to_string()));
    }
    let la1 = r.i32_sm()? as f64 * MICRO;
    let lo1 = r.i32_sm()? as f64 * MICRO;
    let _resolution_flags = r.u8()?;
    let lat_d = r.i32_sm()? as f64 * MICRO;
    let lov = r.i32_sm()? as f64 * MICRO;
    let dx = r.u32()? as f64 * 1e-3;
    let dy = r.u32()? as f64 * 1e-3;
    let _projection_centre = r.u8()?;
    let (i_negative, j_positive) = scan_flags(r.u8()?)?;
    let latin1 = r.i32_sm()? as f64 * MICRO;
    let latin2 = r.i32_sm()? as f64 * MICRO;

    let proj = Lcc::new(radius, latin1, latin2, lat_d, lov);
    let (x1, y1) = proj.forward(la1, normalize_lon(lo1));
    let dx = if i_negative { -dx } else { dx };
    let dy = if j_positive { dy } else { -dy };

    let mut lat = Vec::with_capacity(nx * ny);
    let mut lon = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        let y = y1 + j as f64 * dy;
        for i in 0..nx {
            let x = x1 + i as f64 * dx;
            let (plat, plon) = proj.inverse(x, y);
            lat.push(plat);
            lon.push(plon);
        }
    }
    Ok(GridDefinition::LambertConformal { nx, ny, lat, lon })
}
