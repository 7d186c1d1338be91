//! Model fetchers: the capability that turns an initialization time into
//! decoded, canonically-named fields.
//!
//! All provider-specific quirks (URLs, index formats, byte-range subsetting,
//! parameter tables, unit conventions) live behind [`ModelFetcher`]; outside
//! this module only the canonical [`FieldSet`] contract is visible.

mod ecmwf;
mod gfs;
mod hrrr;
mod index;
mod nam;
mod source;

pub use ecmwf::EcmwfFetcher;
pub use gfs::GfsFetcher;
pub use hrrr::HrrrFetcher;
pub use nam::NamFetcher;
pub use source::{GribSource, HttpGribSource, SourceError};

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::grib2::DecodedMessage;
use crate::models::{Field, FieldSet, Variable};

/// Fetch failure taxonomy.
///
/// Each variant is raised only when no lead hour decoded successfully;
/// individual lead-hour failures are caught, logged and skipped.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Network or HTTP failure against the external source.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    /// Downloaded bytes could not be parsed.
    #[error("decode failure: {0}")]
    DecodeFailure(String),
    /// A required variable was absent from the decoded set, or its values
    /// failed the unit sanity check.
    #[error("unexpected schema: {0}")]
    UnexpectedSchema(String),
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        FetchError::SourceUnavailable(err.to_string())
    }
}

impl From<crate::grib2::DecodeError> for FetchError {
    fn from(err: crate::grib2::DecodeError) -> Self {
        FetchError::DecodeFailure(err.to_string())
    }
}

/// Lead hours `0, 6, …, max_hour`.
pub fn standard_lead_hours(max_hour: u32) -> Vec<u32> {
    (0..=max_hour).step_by(6).collect()
}

/// One NWP model's fetch capability.
///
/// Implementations may return a subset of the requested lead hours, must
/// preserve ascending order, and must not return hours they did not decode.
/// Coordinates are normalized at this boundary: axes are latitude/longitude
/// in degrees with longitudes in [-180, 180).
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Canonical model short name, uppercase.
    fn name(&self) -> &'static str;

    /// Lead hours this model publishes.
    fn default_lead_hours(&self) -> Vec<u32>;

    async fn fetch(
        &self,
        init_time: DateTime<Utc>,
        variables: &[Variable],
        lead_hours: &[u32],
    ) -> Result<Vec<(u32, FieldSet)>, FetchError>;
}

/// Scoped scratch directory for downloaded messages; removed on drop on all
/// exit paths, including unwinds.
pub(crate) struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub(crate) fn new() -> Result<Self, FetchError> {
        let dir = tempfile::Builder::new()
            .prefix("synoptic-fetch-")
            .tempdir()
            .map_err(|e| FetchError::SourceUnavailable(format!("scratch dir: {}", e)))?;
        Ok(Scratch { dir })
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Shared per-hour isolation loop.
///
/// Each hour runs under `hour_timeout`; failures and timeouts are logged and
/// the hour is skipped. When nothing decoded at all, the last hour's error
/// propagates.
pub(crate) async fn fetch_hours<F, Fut>(
    model: &str,
    lead_hours: &[u32],
    hour_timeout: Duration,
    mut fetch_hour: F,
) -> Result<Vec<(u32, FieldSet)>, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<FieldSet, FetchError>>,
{
    let mut out: Vec<(u32, FieldSet)> = Vec::new();
    let mut last_err: Option<FetchError> = None;
    for &fhr in lead_hours {
        match tokio::time::timeout(hour_timeout, fetch_hour(fhr)).await {
            Ok(Ok(set)) if !set.is_empty() => {
                info!(model, fhr, variables = set.len(), "lead hour fetched");
                out.push((fhr, set));
            }
            Ok(Ok(_)) => {
                let err = FetchError::UnexpectedSchema(format!(
                    "no requested variable decoded at fhr {}",
                    fhr
                ));
                warn!(model, fhr, error = %err, "lead hour skipped");
                last_err = Some(err);
            }
            Ok(Err(err)) => {
                warn!(model, fhr, error = %err, "lead hour skipped");
                last_err = Some(err);
            }
            Err(_) => {
                let err =
                    FetchError::SourceUnavailable(format!("fhr {} fetch timed out", fhr));
                warn!(model, fhr, "lead hour timed out");
                last_err = Some(err);
            }
        }
    }
    if out.is_empty() {
        if let Some(err) = last_err {
            return Err(err);
        }
    }
    out.sort_by_key(|(fhr, _)| *fhr);
    out.dedup_by_key(|(fhr, _)| *fhr);
    Ok(out)
}

/// `sqrt(U² + V²)` on matching grids; coordinates are taken from U.
pub(crate) fn derive_wind_speed(u: &Field, v: &Field) -> Result<Field, FetchError> {
    if u.shape() != v.shape() {
        return Err(FetchError::DecodeFailure(format!(
            "wind component shapes differ: {:?} vs {:?}",
            u.shape(),
            v.shape()
        )));
    }
    let speed = Array2::from_shape_fn(u.shape(), |idx| {
        let uu = u.values()[idx];
        let vv = v.values()[idx];
        (uu * uu + vv * vv).sqrt()
    });
    let field = match u {
        Field::Regular { lat, lon, .. } => Field::Regular {
            lat: lat.clone(),
            lon: lon.clone(),
            values: speed,
        },
        Field::Projected { lat, lon, .. } => Field::Projected {
            lat: lat.clone(),
            lon: lon.clone(),
            values: speed,
        },
    };
    Ok(field)
}

/// Rotate a global regular grid so longitudes land ascending in [-180, 180).
///
/// Providers on 0–360 axes (GFS, ECMWF) would otherwise resolve negative
/// monitor longitudes to the wrong side of the grid. Non-global or already
/// signed axes pass through unchanged, as do projected fields (their
/// auxiliary longitudes are produced signed).
pub(crate) fn normalize_longitudes(field: Field) -> Field {
    let (lat, lon, values) = match field {
        Field::Regular { lat, lon, values } if lon.iter().any(|&l| l > 180.0) => {
            (lat, lon, values)
        }
        other => return other,
    };
    let wrapped: Vec<f64> = lon
        .iter()
        .map(|&l| {
            let mut w = (l + 180.0) % 360.0;
            if w < 0.0 {
                w += 360.0;
            }
            w - 180.0
        })
        .collect();
    // The wrap point is where the rewritten axis stops ascending.
    let split = wrapped
        .windows(2)
        .position(|w| w[1] < w[0])
        .map(|p| p + 1)
        .unwrap_or(0);
    let n = wrapped.len();
    let new_lon: Vec<f64> = (0..n).map(|j| wrapped[(j + split) % n]).collect();
    let ascending = new_lon.windows(2).all(|w| w[1] > w[0]);
    if !ascending {
        // Regional grid crossing the antimeridian; leave as published.
        return Field::Regular { lat, lon, values };
    }
    let rotated = Array2::from_shape_fn(values.dim(), |(i, j)| values[[i, (j + split) % n]]);
    Field::Regular {
        lat,
        lon: ndarray::Array1::from(new_lon),
        values: rotated,
    }
}

/// Explicit unit sanity assertion at the fetcher boundary.
///
/// Catches provider unit drift (geopotential vs height, hPa vs Pa, m vs mm)
/// instead of trusting the decoder.
pub(crate) fn assert_plausible_units(variable: Variable, field: &Field) -> Result<(), FetchError> {
    let finite: Vec<f64> = field.values().iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Err(FetchError::UnexpectedSchema(format!(
            "{} field holds no finite values",
            variable
        )));
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let (lo, hi) = match variable {
        Variable::Precip => (-1.0, 2000.0),
        Variable::WindSpeed => (0.0, 150.0),
        Variable::Mslp => (80_000.0, 110_000.0),
        Variable::Hgt500 => (4_000.0, 6_500.0),
    };
    if mean < lo || mean > hi {
        return Err(FetchError::UnexpectedSchema(format!(
            "{} mean {:.3} outside plausible range [{}, {}] {}",
            variable,
            mean,
            lo,
            hi,
            variable.unit()
        )));
    }
    Ok(())
}

/// First decoded message matching a parameter identity.
pub(crate) fn find_message<'a>(
    messages: &'a [DecodedMessage],
    discipline: u8,
    category: u8,
    parameter: u8,
) -> Option<&'a DecodedMessage> {
    messages.iter().find(|m| m.matches(discipline, category, parameter))
}

/// Field for a parameter identity, or `UnexpectedSchema` naming the short
/// name that went missing.
pub(crate) fn field_from(
    messages: &[DecodedMessage],
    discipline: u8,
    category: u8,
    parameter: u8,
    short_name: &str,
) -> Result<Field, FetchError> {
    let msg = find_message(messages, discipline, category, parameter).ok_or_else(|| {
        FetchError::UnexpectedSchema(format!("{} message not decoded", short_name))
    })?;
    Ok(msg.to_field()?)
}

/// Field for geopotential height at the 500-hPa isobaric surface.
pub(crate) fn field_for_hgt500(messages: &[DecodedMessage]) -> Result<Field, FetchError> {
    let msg = messages
        .iter()
        .filter(|m| m.matches(0, 3, 5))
        .find(|m| m.level_hpa().is_some_and(|l| (l - 500.0).abs() < 0.5))
        .ok_or_else(|| {
            FetchError::UnexpectedSchema("HGT at 500 mb not decoded".to_string())
        })?;
    Ok(msg.to_field()?)
}

/// Compile the search patterns for the requested variables.
pub(crate) fn search_patterns(
    table: &[(Variable, &'static str)],
    variables: &[Variable],
) -> Vec<(&'static str, regex::Regex)> {
    table
        .iter()
        .filter(|(var, _)| variables.contains(var))
        .map(|(var, pattern)| {
            (
                var.as_str(),
                regex::Regex::new(pattern).expect("static search pattern"),
            )
        })
        .collect()
}

/// Strip the timezone for provider-facing path construction: all cycle URLs
/// are spelled in naive UTC.
pub(crate) fn cycle_parts(init_time: DateTime<Utc>) -> (String, String) {
    (
        init_time.format("%Y%m%d").to_string(),
        init_time.format("%H").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn wind_speed_is_component_magnitude() {
        let lat = array![40.0, 41.0];
        let lon = array![-100.0, -99.0];
        let u = Field::regular(lat.clone(), lon.clone(), array![[3.0, 0.0], [1.0, 5.0]]).unwrap();
        let v = Field::regular(lat, lon, array![[4.0, 2.0], [1.0, 12.0]]).unwrap();
        let speed = derive_wind_speed(&u, &v).unwrap();
        assert_abs_diff_eq!(speed.values()[[0, 0]], 5.0);
        assert_abs_diff_eq!(speed.values()[[1, 1]], 13.0);
    }

    #[test]
    fn wind_speed_rejects_shape_mismatch() {
        let u = Field::regular(
            array![40.0],
            array![-100.0, -99.0],
            array![[1.0, 2.0]],
        )
        .unwrap();
        let v = Field::regular(array![40.0], array![-100.0], array![[1.0]]).unwrap();
        assert!(derive_wind_speed(&u, &v).is_err());
    }

    #[test]
    fn global_longitudes_are_rotated_signed() {
        // 0, 90, 180, 270 → -180, -90, 0, 90 after rotation.
        let field = Field::regular(
            array![0.0],
            array![0.0, 90.0, 180.0, 270.0],
            array![[1.0, 2.0, 3.0, 4.0]],
        )
        .unwrap();
        match normalize_longitudes(field) {
            Field::Regular { lon, values, .. } => {
                assert_eq!(lon.to_vec(), vec![-180.0, -90.0, 0.0, 90.0]);
                assert_eq!(
                    values.row(0).to_vec(),
                    vec![3.0, 4.0, 1.0, 2.0]
                );
            }
            _ => panic!("expected regular"),
        }
    }

    #[test]
    fn signed_longitudes_pass_through() {
        let field = Field::regular(
            array![0.0],
            array![-100.0, -99.0],
            array![[1.0, 2.0]],
        )
        .unwrap();
        match normalize_longitudes(field) {
            Field::Regular { lon, .. } => assert_eq!(lon.to_vec(), vec![-100.0, -99.0]),
            _ => panic!("expected regular"),
        }
    }

    #[test]
    fn unit_assertions_catch_wrong_magnitude() {
        let lat = array![40.0];
        let lon = array![-100.0];
        // MSLP published in hPa instead of Pa.
        let hpa = Field::regular(lat.clone(), lon.clone(), array![[1013.0]]).unwrap();
        assert!(assert_plausible_units(Variable::Mslp, &hpa).is_err());
        let pa = Field::regular(lat, lon, array![[101_300.0]]).unwrap();
        assert!(assert_plausible_units(Variable::Mslp, &pa).is_ok());
    }

    #[tokio::test]
    async fn hour_loop_isolates_failures() {
        let result = fetch_hours("TEST", &[0, 6, 12], Duration::from_secs(5), |fhr| async move {
            if fhr == 6 {
                Err(FetchError::DecodeFailure("corrupt".to_string()))
            } else {
                let mut set = FieldSet::new();
                set.insert(
                    Variable::Mslp,
                    Field::regular(
                        array![40.0],
                        array![-100.0],
                        array![[101_000.0]],
                    )
                    .unwrap(),
                );
                Ok(set)
            }
        })
        .await
        .unwrap();
        let hours: Vec<u32> = result.iter().map(|(h, _)| *h).collect();
        assert_eq!(hours, vec![0, 12]);
    }

    #[tokio::test]
    async fn hour_loop_raises_only_when_nothing_decoded() {
        let err = fetch_hours("TEST", &[0, 6], Duration::from_secs(5), |_| async {
            Err::<FieldSet, _>(FetchError::SourceUnavailable("404".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn hour_loop_empty_request_is_ok() {
        let result = fetch_hours("TEST", &[], Duration::from_secs(5), |_| async {
            Ok(FieldSet::new())
        })
        .await
        .unwrap();
        assert!(result.is_empty());
    }
}
