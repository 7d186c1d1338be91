//! Grid-level divergence: per-cell ensemble spread on a common regular grid.

use std::collections::BTreeMap;

use ndarray::Array2;

use crate::metrics::sample_stddev;
use crate::models::{BoundingBox, Field};

use super::{common_bbox, make_axis, regrid_to_regular};

/// A computed divergence field on a regular grid, plus the bbox it covers.
#[derive(Debug, Clone)]
pub struct DivergenceField {
    pub field: Field,
    pub bbox: BoundingBox,
}

/// Per-grid-cell sample std-dev (ddof = 1) across models.
///
/// The participating fields are regridded onto a regular axis at
/// `resolution` degrees covering the intersection of their extents. Cells
/// where fewer than two models have data become NaN. Returns `None` when
/// fewer than two models participate or the common bbox is empty.
pub fn compute_grid_divergence(
    fields: &BTreeMap<String, &Field>,
    resolution: f64,
) -> Option<DivergenceField> {
    if fields.len() < 2 {
        return None;
    }
    let bbox = common_bbox(fields.values().copied())?;
    let lat_axis = make_axis(bbox.min_lat, bbox.max_lat, resolution);
    let lon_axis = make_axis(bbox.min_lon, bbox.max_lon, resolution);
    if lat_axis.is_empty() || lon_axis.is_empty() {
        return None;
    }

    let regridded: Vec<Field> = fields
        .values()
        .map(|f| regrid_to_regular(f, &lat_axis, &lon_axis))
        .collect();

    let shape = (lat_axis.len(), lon_axis.len());
    let mut cell = Vec::with_capacity(regridded.len());
    let divergence = Array2::from_shape_fn(shape, |(i, j)| {
        cell.clear();
        cell.extend(
            regridded
                .iter()
                .map(|f| f.values()[[i, j]])
                .filter(|v| v.is_finite()),
        );
        if cell.len() < 2 {
            f64::NAN
        } else {
            sample_stddev(&cell)
        }
    });

    let field = Field::Regular {
        lat: lat_axis,
        lon: lon_axis,
        values: divergence,
    };
    let bbox = field.bbox();
    Some(DivergenceField { field, bbox })
}
