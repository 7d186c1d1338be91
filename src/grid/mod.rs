//! Coordinate/array kernel: nearest-neighbour point extraction and
//! regrid-to-regular over both coordinate shapes.
//!
//! All distances are squared-Euclidean in degrees; no great-circle correction
//! is applied, which is acceptable for regional comparison at CONUS latitudes
//! and the grid resolutions involved.

pub mod divergence;
mod kdtree;

use ndarray::{Array1, Array2};

use crate::models::{BoundingBox, Field};

use kdtree::KdTree;

/// Cell centres `low, low+step, …` strictly below `high`.
///
/// Returns an empty axis when the range or the step is degenerate.
pub fn make_axis(low: f64, high: f64, step: f64) -> Array1<f64> {
    if step <= 0.0 || !low.is_finite() || !high.is_finite() {
        return Array1::from_vec(Vec::new());
    }
    let mut centres = Vec::new();
    let mut k = 0u64;
    loop {
        let v = low + k as f64 * step;
        if v >= high {
            break;
        }
        centres.push(v);
        k += 1;
    }
    Array1::from_vec(centres)
}

/// Index of the axis value nearest to `x`.
///
/// The axis must be strictly monotonic (either direction); ties between the
/// two bracketing cells resolve to the lower index.
pub fn nearest_index(axis: &Array1<f64>, x: f64) -> usize {
    let n = axis.len();
    debug_assert!(n > 0);
    if n == 1 {
        return 0;
    }
    let ascending = axis[1] > axis[0];
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = (lo + hi) / 2;
        let before = if ascending { axis[mid] < x } else { axis[mid] > x };
        if before {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == 0 {
        0
    } else if lo == n {
        n - 1
    } else if (axis[lo] - x).abs() < (axis[lo - 1] - x).abs() {
        lo
    } else {
        lo - 1
    }
}

/// Value at the grid cell nearest to `(lat, lon)`.
///
/// Regular grids use an independent nearest-index search on each axis.
/// Projected grids scan the full 2-D coordinate arrays for the squared
/// degree-distance argmin; ties break to the lowest flat index. NaN cells are
/// candidates like any other, so the result may be NaN when the nearest cell
/// is missing.
pub fn extract_point(field: &Field, lat: f64, lon: f64) -> f64 {
    match field {
        Field::Regular {
            lat: lat_axis,
            lon: lon_axis,
            values,
        } => {
            let i = nearest_index(lat_axis, lat);
            let j = nearest_index(lon_axis, lon);
            values[[i, j]]
        }
        Field::Projected {
            lat: lat2d,
            lon: lon2d,
            values,
        } => {
            let mut best = (f64::INFINITY, 0usize);
            for (flat, (&clat, &clon)) in lat2d.iter().zip(lon2d.iter()).enumerate() {
                let d = (clat - lat) * (clat - lat) + (clon - lon) * (clon - lon);
                if d < best.0 {
                    best = (d, flat);
                }
            }
            let ncols = values.dim().1;
            values[[best.1 / ncols, best.1 % ncols]]
        }
    }
}

/// Nearest-neighbour interpolation onto regular target axes.
///
/// Regular inputs gather through independent per-axis nearest indices.
/// Projected inputs are flattened, NaN source cells dropped, and each target
/// point resolved through a k-d tree over the remaining coordinates; if no
/// source cell holds data the output is all-NaN.
pub fn regrid_to_regular(
    field: &Field,
    target_lat: &Array1<f64>,
    target_lon: &Array1<f64>,
) -> Field {
    let values = match field {
        Field::Regular {
            lat: lat_axis,
            lon: lon_axis,
            values,
        } => {
            let li: Vec<usize> = target_lat.iter().map(|&t| nearest_index(lat_axis, t)).collect();
            let lj: Vec<usize> = target_lon.iter().map(|&t| nearest_index(lon_axis, t)).collect();
            Array2::from_shape_fn((li.len(), lj.len()), |(i, j)| values[[li[i], lj[j]]])
        }
        Field::Projected {
            lat: lat2d,
            lon: lon2d,
            values,
        } => {
            let mut points = Vec::new();
            let mut data = Vec::new();
            for ((&clat, &clon), &v) in lat2d.iter().zip(lon2d.iter()).zip(values.iter()) {
                if v.is_nan() {
                    continue;
                }
                points.push([clat, clon]);
                data.push(v);
            }
            if points.is_empty() {
                Array2::from_elem((target_lat.len(), target_lon.len()), f64::NAN)
            } else {
                let tree = KdTree::build(points);
                Array2::from_shape_fn((target_lat.len(), target_lon.len()), |(i, j)| {
                    let idx = tree.nearest([target_lat[i], target_lon[j]]);
                    data[idx]
                })
            }
        }
    };
    Field::Regular {
        lat: target_lat.clone(),
        lon: target_lon.clone(),
        values,
    }
}

/// Intersection of every input field's axis-aligned extent.
pub fn common_bbox<'a>(fields: impl IntoIterator<Item = &'a Field>) -> Option<BoundingBox> {
    let mut iter = fields.into_iter();
    let mut bbox = iter.next()?.bbox();
    for field in iter {
        bbox = bbox.intersect(&field.bbox())?;
    }
    Some(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn regular_field() -> Field {
        // values[i][j] = 10*i + j over lat 40..44, lon -100..-96
        let lat = array![40.0, 41.0, 42.0, 43.0, 44.0];
        let lon = array![-100.0, -99.0, -98.0, -97.0, -96.0];
        let values = Array2::from_shape_fn((5, 5), |(i, j)| 10.0 * i as f64 + j as f64);
        Field::regular(lat, lon, values).unwrap()
    }

    fn projected_field() -> Field {
        // A skewed 8x10 pseudo-projection.
        let shape = (8, 10);
        let lat = Array2::from_shape_fn(shape, |(i, j)| 35.0 + i as f64 * 0.5 + j as f64 * 0.01);
        let lon = Array2::from_shape_fn(shape, |(i, j)| -105.0 + j as f64 * 0.5 + i as f64 * 0.02);
        let values = Array2::from_shape_fn(shape, |(i, j)| (i * 100 + j) as f64);
        Field::projected(lat, lon, values).unwrap()
    }

    #[test]
    fn make_axis_excludes_upper_bound() {
        let axis = make_axis(0.0, 1.0, 0.25);
        assert_eq!(axis.to_vec(), vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn make_axis_handles_degenerate_range() {
        assert!(make_axis(5.0, 5.0, 0.25).is_empty());
        assert!(make_axis(5.0, 4.0, 0.25).is_empty());
    }

    #[test]
    fn nearest_index_on_descending_axis() {
        let axis = array![50.0, 49.0, 48.0, 47.0];
        assert_eq!(nearest_index(&axis, 49.9), 0);
        assert_eq!(nearest_index(&axis, 48.4), 2);
        assert_eq!(nearest_index(&axis, 10.0), 3);
    }

    #[test]
    fn nearest_index_tie_prefers_lower_index() {
        let axis = array![0.0, 1.0, 2.0];
        assert_eq!(nearest_index(&axis, 0.5), 0);
        assert_eq!(nearest_index(&axis, 1.5), 1);
    }

    #[test]
    fn extract_regular_at_cell_centre() {
        let field = regular_field();
        assert_abs_diff_eq!(extract_point(&field, 42.0, -98.0), 22.0);
        // Off-centre snaps to nearest.
        assert_abs_diff_eq!(extract_point(&field, 42.3, -98.4), 22.0);
    }

    #[test]
    fn extract_projected_at_exact_cell_centre() {
        // Query at the exact centre of cell (i=5, j=7) must return data[5][7].
        let field = projected_field();
        let (qlat, qlon) = match &field {
            Field::Projected { lat, lon, .. } => (lat[[5, 7]], lon[[5, 7]]),
            _ => unreachable!(),
        };
        assert_abs_diff_eq!(extract_point(&field, qlat, qlon), 507.0);
    }

    #[test]
    fn extract_projected_tie_breaks_to_lowest_flat_index() {
        let lat = array![[0.0, 0.0], [1.0, 1.0]];
        let lon = array![[0.0, 2.0], [0.0, 2.0]];
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        let field = Field::projected(lat, lon, values).unwrap();
        // (0.5, 1.0) is equidistant from all four cells.
        assert_abs_diff_eq!(extract_point(&field, 0.5, 1.0), 1.0);
    }

    #[test]
    fn regrid_regular_identity_on_same_axes() {
        let field = regular_field();
        let (lat, lon) = match &field {
            Field::Regular { lat, lon, .. } => (lat.clone(), lon.clone()),
            _ => unreachable!(),
        };
        let out = regrid_to_regular(&field, &lat, &lon);
        assert_eq!(out.values(), field.values());
    }

    #[test]
    fn regrid_projected_drops_nan_sources() {
        let lat = array![[40.0, 40.0], [41.0, 41.0]];
        let lon = array![[-100.0, -99.0], [-100.0, -99.0]];
        let values = array![[f64::NAN, 7.0], [f64::NAN, f64::NAN]];
        let field = Field::projected(lat, lon, values).unwrap();
        let out = regrid_to_regular(&field, &array![40.0, 41.0], &array![-100.0, -99.0]);
        // Every target cell resolves to the single non-NaN source.
        assert!(out.values().iter().all(|&v| v == 7.0));
    }

    #[test]
    fn regrid_projected_all_nan_yields_nan() {
        let lat = array![[40.0, 40.0]];
        let lon = array![[-100.0, -99.0]];
        let values = array![[f64::NAN, f64::NAN]];
        let field = Field::projected(lat, lon, values).unwrap();
        let out = regrid_to_regular(&field, &array![40.0], &array![-100.0, -99.0]);
        assert!(out.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn common_bbox_intersects_extents() {
        let a = regular_field();
        let lat = array![41.0, 42.0, 43.0];
        let lon = array![-99.0, -98.0];
        let b = Field::regular(lat, lon, Array2::zeros((3, 2))).unwrap();
        let bbox = common_bbox([&a, &b]).unwrap();
        assert_eq!(bbox.min_lat, 41.0);
        assert_eq!(bbox.max_lat, 43.0);
        assert_eq!(bbox.min_lon, -99.0);
        assert_eq!(bbox.max_lon, -98.0);
    }
}
