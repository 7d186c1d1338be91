//! Gridded 2-D fields and their coordinate shapes.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::variable::Variable;

/// A field's coordinates are neither a regular axis grid nor a projected
/// auxiliary-coordinate grid.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid grid: {0}")]
pub struct InvalidGrid(pub String);

/// Axis-aligned latitude/longitude extent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// The tightest box contained in both inputs, or `None` when the
    /// intersection is empty or degenerate.
    pub fn intersect(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let bbox = BoundingBox {
            min_lat: self.min_lat.max(other.min_lat),
            max_lat: self.max_lat.min(other.max_lat),
            min_lon: self.min_lon.max(other.min_lon),
            max_lon: self.max_lon.min(other.max_lon),
        };
        if bbox.min_lat < bbox.max_lat && bbox.min_lon < bbox.max_lon {
            Some(bbox)
        } else {
            None
        }
    }
}

/// A labelled 2-D field of float64 values.
///
/// Two coordinate shapes exist:
///
/// - [`Field::Regular`]: latitude and longitude are strictly monotonic 1-D
///   axes; `values` is indexed `[lat, lon]`.
/// - [`Field::Projected`]: the field lives on a non-latlon projection (e.g.
///   Lambert Conformal) and latitude/longitude are 2-D auxiliary arrays of
///   the same shape as `values`.
///
/// Missing cells are NaN. Constructors validate the shape contract and fail
/// with [`InvalidGrid`] otherwise.
#[derive(Debug, Clone)]
pub enum Field {
    Regular {
        lat: Array1<f64>,
        lon: Array1<f64>,
        values: Array2<f64>,
    },
    Projected {
        lat: Array2<f64>,
        lon: Array2<f64>,
        values: Array2<f64>,
    },
}

fn strictly_monotonic(axis: &Array1<f64>) -> bool {
    if axis.len() < 2 {
        return axis.len() == 1;
    }
    let ascending = axis[1] > axis[0];
    axis.windows(2)
        .into_iter()
        .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] })
}

impl Field {
    /// Build a regular field, validating axis monotonicity and shape.
    pub fn regular(
        lat: Array1<f64>,
        lon: Array1<f64>,
        values: Array2<f64>,
    ) -> Result<Self, InvalidGrid> {
        let (nlat, nlon) = values.dim();
        if lat.len() != nlat || lon.len() != nlon {
            return Err(InvalidGrid(format!(
                "axis lengths ({}, {}) do not match value shape ({}, {})",
                lat.len(),
                lon.len(),
                nlat,
                nlon
            )));
        }
        if !strictly_monotonic(&lat) || !strictly_monotonic(&lon) {
            return Err(InvalidGrid(
                "regular axes must be strictly monotonic".to_string(),
            ));
        }
        Ok(Field::Regular { lat, lon, values })
    }

    /// Build a projected field with 2-D auxiliary coordinates.
    pub fn projected(
        lat: Array2<f64>,
        lon: Array2<f64>,
        values: Array2<f64>,
    ) -> Result<Self, InvalidGrid> {
        if lat.dim() != values.dim() || lon.dim() != values.dim() {
            return Err(InvalidGrid(format!(
                "auxiliary coordinate shapes {:?}/{:?} do not match value shape {:?}",
                lat.dim(),
                lon.dim(),
                values.dim()
            )));
        }
        Ok(Field::Projected { lat, lon, values })
    }

    pub fn values(&self) -> &Array2<f64> {
        match self {
            Field::Regular { values, .. } | Field::Projected { values, .. } => values,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values().dim()
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, Field::Regular { .. })
    }

    /// Axis-aligned extent of the field's coordinates.
    pub fn bbox(&self) -> BoundingBox {
        let (lat_min, lat_max, lon_min, lon_max) = match self {
            Field::Regular { lat, lon, .. } => (
                fold_min(lat.iter()),
                fold_max(lat.iter()),
                fold_min(lon.iter()),
                fold_max(lon.iter()),
            ),
            Field::Projected { lat, lon, .. } => (
                fold_min(lat.iter()),
                fold_max(lat.iter()),
                fold_min(lon.iter()),
                fold_max(lon.iter()),
            ),
        };
        BoundingBox {
            min_lat: lat_min,
            max_lat: lat_max,
            min_lon: lon_min,
            max_lon: lon_max,
        }
    }
}

fn fold_min<'a>(iter: impl Iterator<Item = &'a f64>) -> f64 {
    iter.copied().fold(f64::INFINITY, f64::min)
}

fn fold_max<'a>(iter: impl Iterator<Item = &'a f64>) -> f64 {
    iter.copied().fold(f64::NEG_INFINITY, f64::max)
}

/// The variables decoded for a single (model, init_time, lead_hour).
///
/// All fields in one set share the same coordinate shape and extent; fetchers
/// guarantee this per fetch.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: BTreeMap<Variable, Field>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variable: Variable, field: Field) {
        self.fields.insert(variable, field);
    }

    pub fn get(&self, variable: Variable) -> Option<&Field> {
        self.fields.get(&variable)
    }

    pub fn contains(&self, variable: Variable) -> bool {
        self.fields.contains_key(&variable)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterate in canonical variable order.
    pub fn iter(&self) -> impl Iterator<Item = (Variable, &Field)> {
        self.fields.iter().map(|(v, f)| (*v, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn regular_field_validates_axis_shape() {
        let values = Array2::zeros((2, 3));
        let err = Field::regular(array![1.0, 2.0, 3.0], array![0.0, 1.0, 2.0], values);
        assert!(err.is_err());
    }

    #[test]
    fn regular_field_rejects_non_monotonic_axis() {
        let values = Array2::zeros((3, 2));
        let err = Field::regular(array![1.0, 3.0, 2.0], array![0.0, 1.0], values);
        assert!(err.is_err());
    }

    #[test]
    fn descending_axis_is_monotonic() {
        // GFS publishes latitude north-to-south.
        let values = Array2::zeros((3, 2));
        let field = Field::regular(array![50.0, 49.0, 48.0], array![0.0, 1.0], values).unwrap();
        let bbox = field.bbox();
        assert_eq!(bbox.min_lat, 48.0);
        assert_eq!(bbox.max_lat, 50.0);
    }

    #[test]
    fn projected_field_requires_matching_shapes() {
        let values = Array2::zeros((2, 2));
        let coords = Array2::zeros((3, 2));
        assert!(Field::projected(coords.clone(), coords, values).is_err());
    }

    #[test]
    fn bbox_intersection_is_tightest() {
        let a = BoundingBox {
            min_lat: 20.0,
            max_lat: 50.0,
            min_lon: -130.0,
            max_lon: -60.0,
        };
        let b = BoundingBox {
            min_lat: 25.0,
            max_lat: 55.0,
            min_lon: -125.0,
            max_lon: -65.0,
        };
        let i = a.intersect(&b).unwrap();
        assert_eq!(i.min_lat, 25.0);
        assert_eq!(i.max_lat, 50.0);
        assert_eq!(i.min_lon, -125.0);
        assert_eq!(i.max_lon, -65.0);
    }

    #[test]
    fn disjoint_bboxes_do_not_intersect() {
        let a = BoundingBox {
            min_lat: 0.0,
            max_lat: 10.0,
            min_lon: 0.0,
            max_lon: 10.0,
        };
        let b = BoundingBox {
            min_lat: 20.0,
            max_lat: 30.0,
            min_lon: 0.0,
            max_lon: 10.0,
        };
        assert!(a.intersect(&b).is_none());
    }
}
