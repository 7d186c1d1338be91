//! Chunked, compressed array store for 2-D divergence fields.
//!
//! Objects live under a filesystem root at
//! `{root}/divergence/{YYYYMMDDHH}/{variable}/fhr{NNN}.zfc` and are written
//! once, never updated in place. Each object is a single file: a magic tag,
//! a JSON header carrying the regular latitude/longitude axes and the chunk
//! table, then zlib-compressed row bands of little-endian f64 cells. `put`
//! is an idempotent overwrite via write-then-rename.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::models::{Field, Variable};

const MAGIC: &[u8; 4] = b"SSC1";

/// Rows per compressed band.
const CHUNK_ROWS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("array store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("array object missing: {0}")]
    Missing(String),
    #[error("array object corrupt: {0}")]
    Corrupt(String),
    #[error("only regular-grid fields are stored; got a projected field")]
    NotRegular,
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    lat: Vec<f64>,
    lon: Vec<f64>,
    shape: [usize; 2],
    chunk_rows: usize,
    chunks: Vec<ChunkEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkEntry {
    offset: u64,
    compressed_len: u64,
    rows: usize,
}

/// Filesystem-backed store; the handle namespace is relative paths under
/// `root`.
#[derive(Debug, Clone)]
pub struct ArrayStore {
    root: PathBuf,
}

impl ArrayStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArrayStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable handle for a divergence snapshot.
    pub fn divergence_handle(
        init_time: DateTime<Utc>,
        variable: Variable,
        lead_hour: u32,
    ) -> String {
        format!(
            "divergence/{}/{}/fhr{:03}.zfc",
            init_time.format("%Y%m%d%H"),
            variable,
            lead_hour
        )
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf, StoreError> {
        if handle.is_empty()
            || Path::new(handle).is_absolute()
            || handle.split('/').any(|part| part == "..")
        {
            return Err(StoreError::InvalidHandle(handle.to_string()));
        }
        Ok(self.root.join(handle))
    }

    /// Write `field` under `handle`. Overwrites atomically; concurrent puts
    /// to distinct handles need no coordination.
    pub fn put(&self, handle: &str, field: &Field) -> Result<String, StoreError> {
        let (lat, lon, values) = match field {
            Field::Regular { lat, lon, values } => (lat, lon, values),
            Field::Projected { .. } => return Err(StoreError::NotRegular),
        };
        let (nrows, ncols) = values.dim();

        let mut chunks = Vec::new();
        let mut blob: Vec<u8> = Vec::new();
        for row_start in (0..nrows).step_by(CHUNK_ROWS) {
            let rows = CHUNK_ROWS.min(nrows - row_start);
            let mut raw = Vec::with_capacity(rows * ncols * 8);
            for i in row_start..row_start + rows {
                for j in 0..ncols {
                    raw.extend_from_slice(&values[[i, j]].to_le_bytes());
                }
            }
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw)?;
            let compressed = encoder.finish()?;
            chunks.push(ChunkEntry {
                offset: blob.len() as u64,
                compressed_len: compressed.len() as u64,
                rows,
            });
            blob.extend_from_slice(&compressed);
        }

        let header = Header {
            lat: lat.to_vec(),
            lon: lon.to_vec(),
            shape: [nrows, ncols],
            chunk_rows: CHUNK_ROWS,
            chunks,
        };
        let header_bytes =
            serde_json::to_vec(&header).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let path = self.resolve(handle)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidHandle(handle.to_string()))?;
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(MAGIC)?;
        tmp.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        tmp.write_all(&header_bytes)?;
        tmp.write_all(&blob)?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(handle.to_string())
    }

    /// Read the field back; values round-trip bit-exactly.
    pub fn get(&self, handle: &str) -> Result<Field, StoreError> {
        let path = self.resolve(handle)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(handle.to_string()))
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(StoreError::Corrupt(format!("{}: bad magic", handle)));
        }
        let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let body_start = 8 + header_len;
        if bytes.len() < body_start {
            return Err(StoreError::Corrupt(format!("{}: truncated header", handle)));
        }
        let header: Header = serde_json::from_slice(&bytes[8..body_start])
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", handle, e)))?;
        let [nrows, ncols] = header.shape;
        let blob = &bytes[body_start..];

        let mut cells = Vec::with_capacity(nrows * ncols);
        for chunk in &header.chunks {
            let start = chunk.offset as usize;
            let end = start + chunk.compressed_len as usize;
            if end > blob.len() {
                return Err(StoreError::Corrupt(format!("{}: truncated chunk", handle)));
            }
            let mut raw = Vec::with_capacity(chunk.rows * ncols * 8);
            ZlibDecoder::new(&blob[start..end])
                .read_to_end(&mut raw)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", handle, e)))?;
            if raw.len() != chunk.rows * ncols * 8 {
                return Err(StoreError::Corrupt(format!(
                    "{}: chunk decompressed to {} bytes, expected {}",
                    handle,
                    raw.len(),
                    chunk.rows * ncols * 8
                )));
            }
            for cell in raw.chunks_exact(8) {
                cells.push(f64::from_le_bytes([
                    cell[0], cell[1], cell[2], cell[3], cell[4], cell[5], cell[6], cell[7],
                ]));
            }
        }
        if cells.len() != nrows * ncols {
            return Err(StoreError::Corrupt(format!(
                "{}: {} cells for shape {:?}",
                handle,
                cells.len(),
                header.shape
            )));
        }
        let values = Array2::from_shape_vec((nrows, ncols), cells)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Field::regular(Array1::from(header.lat), Array1::from(header.lon), values)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Remove every object under `prefix`; used by the reset path, which
    /// also sweeps orphans left by crashes between `put` and catalog commit.
    pub fn drop_tree(&self, prefix: &str) -> Result<(), StoreError> {
        let path = self.resolve(prefix)?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;
    use tempfile::TempDir;

    fn sample_field() -> Field {
        let lat = Array1::from_iter((0..100).map(|i| 25.0 + i as f64 * 0.25));
        let lon = array![-110.0, -109.75, -109.5];
        let mut values = Array2::from_shape_fn((100, 3), |(i, j)| (i * 3 + j) as f64 * 0.5);
        values[[7, 1]] = f64::NAN;
        Field::regular(lat, lon, values).unwrap()
    }

    #[test]
    fn put_get_round_trips_values_and_axes() {
        let dir = TempDir::new().unwrap();
        let store = ArrayStore::new(dir.path());
        let field = sample_field();
        let handle = store.put("divergence/2024011500/precip/fhr006.zfc", &field).unwrap();

        let loaded = store.get(&handle).unwrap();
        match (&field, &loaded) {
            (
                Field::Regular { lat, lon, values },
                Field::Regular {
                    lat: l2,
                    lon: o2,
                    values: v2,
                },
            ) => {
                assert_eq!(lat, l2);
                assert_eq!(lon, o2);
                for (a, b) in values.iter().zip(v2.iter()) {
                    assert_eq!(a.to_bits(), b.to_bits());
                }
            }
            _ => panic!("expected regular fields"),
        }
    }

    #[test]
    fn put_is_idempotent_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = ArrayStore::new(dir.path());
        let field = sample_field();
        store.put("divergence/x/precip/fhr000.zfc", &field).unwrap();
        store.put("divergence/x/precip/fhr000.zfc", &field).unwrap();
        assert!(store.get("divergence/x/precip/fhr000.zfc").is_ok());
    }

    #[test]
    fn missing_handle_is_distinguished() {
        let dir = TempDir::new().unwrap();
        let store = ArrayStore::new(dir.path());
        assert!(matches!(
            store.get("divergence/none/precip/fhr000.zfc"),
            Err(StoreError::Missing(_))
        ));
    }

    #[test]
    fn projected_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ArrayStore::new(dir.path());
        let field = Field::projected(
            array![[40.0]],
            array![[-100.0]],
            array![[1.0]],
        )
        .unwrap();
        assert!(matches!(
            store.put("divergence/x/precip/fhr000.zfc", &field),
            Err(StoreError::NotRegular)
        ));
    }

    #[test]
    fn drop_tree_removes_prefix() {
        let dir = TempDir::new().unwrap();
        let store = ArrayStore::new(dir.path());
        store
            .put("divergence/2024011500/precip/fhr000.zfc", &sample_field())
            .unwrap();
        store.drop_tree("divergence").unwrap();
        assert!(matches!(
            store.get("divergence/2024011500/precip/fhr000.zfc"),
            Err(StoreError::Missing(_))
        ));
        // Dropping an absent tree is fine.
        store.drop_tree("divergence").unwrap();
    }

    #[test]
    fn traversal_handles_are_invalid() {
        let dir = TempDir::new().unwrap();
        let store = ArrayStore::new(dir.path());
        assert!(matches!(
            store.get("../outside.zfc"),
            Err(StoreError::InvalidHandle(_))
        ));
    }

    #[test]
    fn handles_are_stable_and_zero_padded() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
        assert_eq!(
            ArrayStore::divergence_handle(init, Variable::Hgt500, 12),
            "divergence/2024011506/hgt_500/fhr012.zfc"
        );
    }
}
