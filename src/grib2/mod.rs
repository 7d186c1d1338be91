//! GRIB2 edition-2 subset decoder.
//!
//! The supported providers publish messages on regular lat/lon grids
//! (template 3.0) or spherical Lambert Conformal grids (template 3.30), with
//! simple packing (template 5.0) and an optional bitmap. That subset is the
//! decode contract here; anything else is a [`DecodeError::Unsupported`].
//! Fetchers subset whole messages out of provider files by byte range, so
//! every input is expected to be one or more complete messages.

mod grids;
mod packing;
mod sections;

use ndarray::{Array1, Array2};

pub use grids::GridDefinition;

use crate::models::Field;
use packing::{parse_packing, unpack, Packing};
use sections::{split_sections, Reader};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("message truncated")]
    Truncated,
    #[error("no GRIB2 message found in input")]
    NotGrib,
    #[error("unsupported GRIB edition {0}")]
    UnsupportedEdition(u8),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("grid construction failed: {0}")]
    Grid(String),
}

/// Parameter identity and level from section 4.
#[derive(Debug, Clone, Copy)]
struct ProductInfo {
    category: u8,
    parameter: u8,
    surface_type: u8,
    surface_value: f64,
}

/// One decoded field: parameter identity, level, grid, values.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub discipline: u8,
    pub category: u8,
    pub parameter: u8,
    /// Type of first fixed surface (e.g. 103 = height above ground,
    /// 100 = isobaric level in Pa, 101 = mean sea level).
    pub surface_type: u8,
    pub surface_value: f64,
    pub grid: GridDefinition,
    values: Vec<f64>,
}

impl DecodedMessage {
    pub fn matches(&self, discipline: u8, category: u8, parameter: u8) -> bool {
        self.discipline == discipline && self.category == category && self.parameter == parameter
    }

    /// Pressure level in hPa when the first fixed surface is isobaric.
    pub fn level_hpa(&self) -> Option<f64> {
        (self.surface_type == 100).then(|| self.surface_value / 100.0)
    }

    /// Materialize the message as a [`Field`] in the crate's canonical
    /// coordinate shapes.
    pub fn to_field(&self) -> Result<Field, DecodeError> {
        match &self.grid {
            GridDefinition::RegularLatLon { lat, lon } => {
                let values = Array2::from_shape_vec((lat.len(), lon.len()), self.values.clone())
                    .map_err(|e| DecodeError::Grid(e.to_string()))?;
                Field::regular(
                    Array1::from(lat.clone()),
                    Array1::from(lon.clone()),
                    values,
                )
                .map_err(|e| DecodeError::Grid(e.to_string()))
            }
            GridDefinition::LambertConformal { nx, ny, lat, lon } => {
                let shape = (*ny, *nx);
                let to_arr = |v: &Vec<f64>| {
                    Array2::from_shape_vec(shape, v.clone())
                        .map_err(|e| DecodeError::Grid(e.to_string()))
                };
                Field::projected(to_arr(lat)?, to_arr(lon)?, to_arr(&self.values)?)
                    .map_err(|e| DecodeError::Grid(e.to_string()))
            }
        }
    }
}

/// Decode every message in `bytes`.
///
/// Ranged downloads can concatenate several messages; each is scanned from
/// its `GRIB` indicator. Repeated section 4–7 groups within one message
/// yield one [`DecodedMessage`] per data section.
pub fn decode_messages(bytes: &[u8]) -> Result<Vec<DecodedMessage>, DecodeError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut found = false;
    while pos + 16 <= bytes.len() {
        match find_indicator(&bytes[pos..]) {
            Some(offset) => pos += offset,
            None => break,
        }
        if pos + 16 > bytes.len() {
            break;
        }
        found = true;
        let mut r = Reader::at(bytes, pos + 6);
        let discipline = r.u8()?;
        let edition = r.u8()?;
        if edition != 2 {
            return Err(DecodeError::UnsupportedEdition(edition));
        }
        let total_len = r.u64()? as usize;
        if total_len < 20 || pos + total_len > bytes.len() {
            return Err(DecodeError::Truncated);
        }
        decode_one(discipline, &bytes[pos + 16..pos + total_len], &mut out)?;
        pos += total_len;
    }
    if !found {
        return Err(DecodeError::NotGrib);
    }
    Ok(out)
}

fn find_indicator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"GRIB")
}

fn decode_one(
    discipline: u8,
    body: &[u8],
    out: &mut Vec<DecodedMessage>,
) -> Result<(), DecodeError> {
    let sections = split_sections(body)?;
    let mut grid: Option<GridDefinition> = None;
    let mut product: Option<ProductInfo> = None;
    let mut packing: Option<Packing> = None;
    let mut bitmap: Option<Vec<u8>> = None;

    for section in sections {
        match section.number {
            1 | 2 => {}
            3 => grid = Some(grids::parse_grid(section.body)?),
            4 => product = Some(parse_product(section.body)?),
            5 => packing = Some(parse_packing(section.body)?),
            6 => {
                let indicator = *section
                    .body
                    .get(5)
                    .ok_or(DecodeError::Truncated)?;
                match indicator {
                    255 => bitmap = None,
                    0 => bitmap = Some(section.body[6..].to_vec()),
                    // 254: the previously defined bitmap applies.
                    254 => {}
                    other => {
                        return Err(DecodeError::Unsupported(format!(
                            "pre-defined bitmap indicator {}",
                            other
                        )))
                    }
                }
            }
            7 => {
                let grid = grid
                    .as_ref()
                    .ok_or_else(|| DecodeError::Malformed("data before grid".to_string()))?;
                let info = product
                    .ok_or_else(|| DecodeError::Malformed("data before product".to_string()))?;
                let packing = packing
                    .as_ref()
                    .ok_or_else(|| DecodeError::Malformed("data before packing".to_string()))?;
                if section.body.len() < 5 {
                    return Err(DecodeError::Truncated);
                }
                let values = unpack(
                    packing,
                    &section.body[5..],
                    bitmap.as_deref(),
                    grid.point_count(),
                )?;
                out.push(DecodedMessage {
                    discipline,
                    category: info.category,
                    parameter: info.parameter,
                    surface_type: info.surface_type,
                    surface_value: info.surface_value,
                    grid: grid.clone(),
                    values,
                });
            }
            other => {
                return Err(DecodeError::Malformed(format!(
                    "unexpected section number {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn parse_product(body: &[u8]) -> Result<ProductInfo, DecodeError> {
    let mut r = Reader::at(body, 7);
    let template = r.u16()?;
    // 4.8 (accumulations such as APCP) shares the 4.0 prefix we need.
    if !matches!(template, 0 | 1 | 2 | 8) {
        return Err(DecodeError::Unsupported(format!(
            "product definition template 4.{}",
            template
        )));
    }
    let category = r.u8()?;
    let parameter = r.u8()?;

    let mut r = Reader::at(body, 22);
    let surface_type = r.u8()?;
    let scale = r.i8_sm()?;
    let raw = r.u32()?;
    let surface_value = if raw == u32::MAX {
        0.0
    } else {
        raw as f64 / 10f64.powi(scale)
    };
    Ok(ProductInfo {
        category,
        parameter,
        surface_type,
        surface_value,
    })
}

/// Hand-rolled GRIB2 encoder for tests: regular lat/lon grid, simple
/// packing with integral packed values, no bitmap.
#[cfg(test)]
pub(crate) mod test_support {
    pub struct TestMessage {
        pub discipline: u8,
        pub category: u8,
        pub parameter: u8,
        pub surface_type: u8,
        pub surface_value: u32,
        pub lat_start: f64,
        pub lon_start: f64,
        pub step: f64,
        /// Simple-packing reference value R.
        pub reference: f64,
        /// Row-major (lat, lon) values; encoded as 16-bit offsets from
        /// `reference`.
        pub rows: Vec<Vec<f64>>,
    }

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn push_i32_sm(buf: &mut Vec<u8>, v: f64) {
        let micro = (v * 1e6).round() as i64;
        let raw = if micro < 0 {
            0x8000_0000u32 | (-micro) as u32
        } else {
            micro as u32
        };
        push_u32(buf, raw);
    }

    pub fn encode(msg: &TestMessage) -> Vec<u8> {
        let nj = msg.rows.len();
        let ni = msg.rows[0].len();
        let npoints = (ni * nj) as u32;

        let mut sec1 = Vec::new();
        push_u32(&mut sec1, 21);
        sec1.push(1);
        push_u16(&mut sec1, 7);
        push_u16(&mut sec1, 0);
        sec1.extend_from_slice(&[2, 1, 1]);
        push_u16(&mut sec1, 2024);
        sec1.extend_from_slice(&[1, 15, 0, 0, 0, 0, 1]);

        let mut sec3 = Vec::new();
        push_u32(&mut sec3, 72);
        sec3.push(3);
        sec3.push(0);
        push_u32(&mut sec3, npoints);
        sec3.extend_from_slice(&[0, 0]);
        push_u16(&mut sec3, 0); // template 3.0
        sec3.push(6); // spherical earth
        sec3.push(0);
        push_u32(&mut sec3, 0);
        sec3.push(0);
        push_u32(&mut sec3, 0);
        sec3.push(0);
        push_u32(&mut sec3, 0);
        push_u32(&mut sec3, ni as u32);
        push_u32(&mut sec3, nj as u32);
        push_u32(&mut sec3, 0);
        push_u32(&mut sec3, 0);
        push_i32_sm(&mut sec3, msg.lat_start);
        push_i32_sm(&mut sec3, msg.lon_start);
        sec3.push(48);
        push_i32_sm(&mut sec3, msg.lat_start + (nj - 1) as f64 * msg.step);
        push_i32_sm(&mut sec3, msg.lon_start + (ni - 1) as f64 * msg.step);
        push_u32(&mut sec3, (msg.step * 1e6).round() as u32);
        push_u32(&mut sec3, (msg.step * 1e6).round() as u32);
        sec3.push(0b0100_0000); // +i, +j scan
        assert_eq!(sec3.len(), 72);

        let mut sec4 = Vec::new();
        push_u32(&mut sec4, 34);
        sec4.push(4);
        push_u16(&mut sec4, 0);
        push_u16(&mut sec4, 0); // template 4.0
        sec4.push(msg.category);
        sec4.push(msg.parameter);
        sec4.extend_from_slice(&[2, 0, 96]);
        push_u16(&mut sec4, 0);
        sec4.extend_from_slice(&[0, 1]);
        push_u32(&mut sec4, 0); // forecast time
        sec4.push(msg.surface_type);
        sec4.push(0);
        push_u32(&mut sec4, msg.surface_value);
        sec4.push(255);
        sec4.push(0);
        push_u32(&mut sec4, u32::MAX);
        assert_eq!(sec4.len(), 34);

        let mut sec5 = Vec::new();
        push_u32(&mut sec5, 21);
        sec5.push(5);
        push_u32(&mut sec5, npoints);
        push_u16(&mut sec5, 0); // template 5.0
        sec5.extend_from_slice(&(msg.reference as f32).to_be_bytes());
        push_u16(&mut sec5, 0);
        push_u16(&mut sec5, 0);
        sec5.push(16);
        sec5.push(0);
        assert_eq!(sec5.len(), 21);

        let sec6 = {
            let mut s = Vec::new();
            push_u32(&mut s, 6);
            s.push(6);
            s.push(255);
            s
        };

        let mut data = Vec::new();
        for row in &msg.rows {
            for &v in row {
                push_u16(&mut data, (v - msg.reference).round() as u16);
            }
        }
        let mut sec7 = Vec::new();
        push_u32(&mut sec7, 5 + data.len() as u32);
        sec7.push(7);
        sec7.extend_from_slice(&data);

        let body_len: usize = [&sec1, &sec3, &sec4, &sec5, &sec6, &sec7]
            .iter()
            .map(|s| s.len())
            .sum();
        let total = 16 + body_len + 4;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"GRIB");
        out.extend_from_slice(&[0, 0]);
        out.push(msg.discipline);
        out.push(2);
        out.extend_from_slice(&(total as u64).to_be_bytes());
        for s in [sec1, sec3, sec4, sec5, sec6, sec7] {
            out.extend_from_slice(&s);
        }
        out.extend_from_slice(b"7777");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{encode, TestMessage};
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample() -> TestMessage {
        TestMessage {
            discipline: 0,
            category: 3,
            parameter: 1,
            surface_type: 101,
            surface_value: 0,
            lat_start: 40.0,
            lon_start: -100.0,
            step: 1.0,
            reference: 0.0,
            rows: vec![vec![10.0, 11.0, 12.0], vec![20.0, 21.0, 22.0]],
        }
    }

    #[test]
    fn round_trips_a_regular_message() {
        let bytes = encode(&sample());
        let messages = decode_messages(&bytes).unwrap();
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert!(msg.matches(0, 3, 1));
        assert_eq!(msg.surface_type, 101);

        let field = msg.to_field().unwrap();
        match &field {
            Field::Regular { lat, lon, values } => {
                assert_eq!(lat.to_vec(), vec![40.0, 41.0]);
                assert_eq!(lon.to_vec(), vec![-100.0, -99.0, -98.0]);
                assert_abs_diff_eq!(values[[0, 0]], 10.0);
                assert_abs_diff_eq!(values[[1, 2]], 22.0);
            }
            _ => panic!("expected regular field"),
        }
    }

    #[test]
    fn decodes_concatenated_messages() {
        let mut bytes = encode(&sample());
        let mut second = sample();
        second.category = 2;
        second.parameter = 2;
        second.surface_type = 103;
        second.surface_value = 10;
        bytes.extend_from_slice(&encode(&second));

        let messages = decode_messages(&bytes).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].matches(0, 2, 2));
        assert_abs_diff_eq!(messages[1].surface_value, 10.0);
    }

    #[test]
    fn garbage_input_is_not_grib() {
        assert!(matches!(
            decode_messages(b"this is not a forecast"),
            Err(DecodeError::NotGrib)
        ));
    }

    #[test]
    fn truncated_message_errors() {
        let bytes = encode(&sample());
        assert!(decode_messages(&bytes[..bytes.len() - 10]).is_err());
    }

    #[test]
    fn isobaric_level_is_reported_in_hpa() {
        let mut msg = sample();
        msg.surface_type = 100;
        msg.surface_value = 50000;
        let messages = decode_messages(&encode(&msg)).unwrap();
        assert_abs_diff_eq!(messages[0].level_hpa().unwrap(), 500.0);
    }
}
