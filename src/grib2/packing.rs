//! Data representation template 5.0 (simple packing) and the section 6
//! bitmap.

use super::sections::Reader;
use super::DecodeError;

/// Simple-packing parameters from section 5.
#[derive(Debug, Clone)]
pub(crate) struct Packing {
    /// Number of packed values (fewer than the grid size when a bitmap
    /// masks missing cells).
    pub packed_count: usize,
    pub reference: f64,
    pub binary_scale: i32,
    pub decimal_scale: i32,
    pub bits: u32,
}

pub(crate) fn parse_packing(body: &[u8]) -> Result<Packing, DecodeError> {
    let mut r = Reader::at(body, 5);
    let packed_count = r.u32()? as usize;
    let template = r.u16()?;
    if template != 0 {
        return Err(DecodeError::Unsupported(format!(
            "data representation template 5.{}",
            template
        )));
    }
    let reference = r.f32()? as f64;
    let binary_scale = r.i16_sm()?;
    let decimal_scale = r.i16_sm()?;
    let bits = r.u8()? as u32;
    if bits > 32 {
        return Err(DecodeError::Malformed(format!(
            "{} bits per packed value",
            bits
        )));
    }
    Ok(Packing {
        packed_count,
        reference,
        binary_scale,
        decimal_scale,
        bits,
    })
}

/// MSB-first bit cursor over the section 7 payload.
struct BitReader<'a> {
    buf: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        BitReader { buf, bit: 0 }
    }

    fn read(&mut self, nbits: u32) -> Result<u32, DecodeError> {
        let mut out: u32 = 0;
        for _ in 0..nbits {
            let byte = self.bit / 8;
            if byte >= self.buf.len() {
                return Err(DecodeError::Truncated);
            }
            let shift = 7 - (self.bit % 8);
            out = (out << 1) | ((self.buf[byte] >> shift) & 1) as u32;
            self.bit += 1;
        }
        Ok(out)
    }
}

fn bitmap_bit(bitmap: &[u8], index: usize) -> Result<bool, DecodeError> {
    let byte = index / 8;
    if byte >= bitmap.len() {
        return Err(DecodeError::Truncated);
    }
    Ok(bitmap[byte] >> (7 - index % 8) & 1 == 1)
}

/// Expand packed data to `total_points` values, NaN where the bitmap masks
/// a cell.
///
/// `Y = (R + X * 2^E) / 10^D`
pub(crate) fn unpack(
    packing: &Packing,
    data: &[u8],
    bitmap: Option<&[u8]>,
    total_points: usize,
) -> Result<Vec<f64>, DecodeError> {
    let scale = 2f64.powi(packing.binary_scale) / 10f64.powi(packing.decimal_scale);
    let base = packing.reference / 10f64.powi(packing.decimal_scale);

    let mut packed = Vec::with_capacity(packing.packed_count);
    if packing.bits == 0 {
        packed.resize(packing.packed_count, base);
    } else {
        let mut bits = BitReader::new(data);
        for _ in 0..packing.packed_count {
            let x = bits.read(packing.bits)?;
            packed.push(base + x as f64 * scale);
        }
    }

    match bitmap {
        None => {
            if packed.len() != total_points {
                return Err(DecodeError::Malformed(format!(
                    "{} packed values for {} grid points",
                    packed.len(),
                    total_points
                )));
            }
            Ok(packed)
        }
        Some(bitmap) => {
            let mut values = Vec::with_capacity(total_points);
            let mut next = packed.into_iter();
            for i in 0..total_points {
                if bitmap_bit(bitmap, i)? {
                    values.push(next.next().ok_or(DecodeError::Truncated)?);
                } else {
                    values.push(f64::NAN);
                }
            }
            Ok(values)
        }
    }
}
