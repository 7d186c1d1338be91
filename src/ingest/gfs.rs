//! GFS fetcher: 0.25° global regular grid from NOMADS, lead hours 0–120 in
//! 6-hour steps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{FieldSet, Variable};

use super::index::fetch_indexed_messages;
use super::{
    assert_plausible_units, cycle_parts, derive_wind_speed, fetch_hours, field_for_hgt500,
    field_from, find_message, normalize_longitudes, search_patterns, standard_lead_hours,
    FetchError, GribSource, ModelFetcher, Scratch,
};

const DEFAULT_BASE_URL: &str = "https://nomads.ncep.noaa.gov/pub/data/nccf/com/gfs/prod";

/// GRIB index search patterns per canonical variable. Precip is the
/// cycle-to-date surface accumulation.
const GFS_SEARCH: &[(Variable, &'static str)] = &[
    (Variable::Precip, ":APCP:surface:0-"),
    (Variable::WindSpeed, ":(UGRD|VGRD):10 m above ground"),
    (Variable::Mslp, ":PRMSL:mean sea level"),
    (Variable::Hgt500, ":HGT:500 mb"),
];

pub struct GfsFetcher {
    source: Arc<dyn GribSource>,
    base_url: String,
    hour_timeout: Duration,
}

impl GfsFetcher {
    pub fn new(source: Arc<dyn GribSource>, hour_timeout: Duration) -> Self {
        Self {
            source,
            base_url: DEFAULT_BASE_URL.to_string(),
            hour_timeout,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn grib_url(&self, init_time: DateTime<Utc>, fhr: u32) -> String {
        let (date, hour) = cycle_parts(init_time);
        format!(
            "{}/gfs.{}/{}/atmos/gfs.t{}z.pgrb2.0p25.f{:03}",
            self.base_url, date, hour, hour, fhr
        )
    }

    async fn fetch_hour(
        &self,
        init_time: DateTime<Utc>,
        fhr: u32,
        variables: &[Variable],
        scratch: &Scratch,
    ) -> Result<FieldSet, FetchError> {
        let grib_url = self.grib_url(init_time, fhr);
        let idx_url = format!("{}.idx", grib_url);
        let patterns = search_patterns(GFS_SEARCH, variables);
        let messages = fetch_indexed_messages(
            self.source.as_ref(),
            &grib_url,
            &idx_url,
            &patterns,
            scratch,
            &format!("gfs_f{:03}", fhr),
        )
        .await?;

        let mut set = FieldSet::new();
        for &variable in variables {
            let field = match variable {
                Variable::Precip => field_from(&messages, 0, 1, 8, "APCP")?,
                Variable::WindSpeed => {
                    let u = find_message(&messages, 0, 2, 2).ok_or_else(|| {
                        FetchError::UnexpectedSchema("UGRD message not decoded".to_string())
                    })?;
                    let v = find_message(&messages, 0, 2, 3).ok_or_else(|| {
                        FetchError::UnexpectedSchema("VGRD message not decoded".to_string())
                    })?;
                    derive_wind_speed(&u.to_field()?, &v.to_field()?)?
                }
                Variable::Mslp => field_from(&messages, 0, 3, 1, "PRMSL")?,
                Variable::Hgt500 => field_for_hgt500(&messages)?,
            };
            let field = normalize_longitudes(field);
            assert_plausible_units(variable, &field)?;
            set.insert(variable, field);
        }
        Ok(set)
    }
}

#[async_trait]
impl ModelFetcher for GfsFetcher {
    fn name(&self) -> &'static str {
        "GFS"
    }

    fn default_lead_hours(&self) -> Vec<u32> {
        standard_lead_hours(120)
    }

    async fn fetch(
        &self,
        init_time: DateTime<Utc>,
        variables: &[Variable],
        lead_hours: &[u32],
    ) -> Result<Vec<(u32, FieldSet)>, FetchError> {
        let scratch = Scratch::new()?;
        let scratch = &scratch;
        fetch_hours(self.name(), lead_hours, self.hour_timeout, |fhr| {
            self.fetch_hour(init_time, fhr, variables, scratch)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grib2::test_support::{encode, TestMessage};
    use crate::ingest::source::testing::MapSource;
    use crate::models::Field;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn message(category: u8, parameter: u8, surface: (u8, u32), value: f64) -> Vec<u8> {
        encode(&TestMessage {
            discipline: 0,
            category,
            parameter,
            surface_type: surface.0,
            surface_value: surface.1,
            lat_start: 38.0,
            lon_start: 255.0, // 0-360 convention, i.e. -105
            step: 1.0,
            reference: value - 10.0,
            rows: vec![vec![value; 4]; 3],
        })
    }

    /// Build the pgrb2 file plus its idx from a list of named messages.
    fn build_source(
        url: &str,
        messages: Vec<(&str, &str, Vec<u8>)>,
    ) -> MapSource {
        let mut body = Vec::new();
        let mut idx = String::new();
        for (i, (var, level, bytes)) in messages.iter().enumerate() {
            idx.push_str(&format!(
                "{}:{}:d=2024011500:{}:{}:anl:\n",
                i + 1,
                body.len(),
                var,
                level
            ));
            body.extend_from_slice(bytes);
        }
        let mut source = MapSource::new();
        source.insert(url.to_string(), body);
        source.insert(format!("{}.idx", url), idx.into_bytes());
        source
    }

    fn fetcher(source: MapSource) -> GfsFetcher {
        GfsFetcher::new(Arc::new(source), Duration::from_secs(5)).with_base_url("http://test")
    }

    #[tokio::test]
    async fn fetches_and_normalizes_one_hour() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let url = "http://test/gfs.20240115/00/atmos/gfs.t00z.pgrb2.0p25.f006";
        let source = build_source(
            url,
            vec![
                ("PRMSL", "mean sea level", message(3, 1, (101, 0), 101_300.0)),
                ("UGRD", "10 m above ground", message(2, 2, (103, 10), 3.0)),
                ("VGRD", "10 m above ground", message(2, 3, (103, 10), 4.0)),
            ],
        );

        let result = fetcher(source)
            .fetch(init, &[Variable::WindSpeed, Variable::Mslp], &[6])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        let (fhr, set) = &result[0];
        assert_eq!(*fhr, 6);

        let mslp = set.get(Variable::Mslp).unwrap();
        assert_abs_diff_eq!(mslp.values()[[0, 0]], 101_300.0);
        // Longitudes normalized from the 0-360 convention.
        match mslp {
            Field::Regular { lon, .. } => {
                assert!(lon.iter().all(|&l| (-180.0..180.0).contains(&l)));
                assert_abs_diff_eq!(lon[0], -105.0);
            }
            _ => panic!("expected regular grid"),
        }

        let wind = set.get(Variable::WindSpeed).unwrap();
        assert_abs_diff_eq!(wind.values()[[1, 1]], 5.0);
    }

    #[tokio::test]
    async fn missing_hour_is_skipped_and_good_hours_survive() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let url = "http://test/gfs.20240115/00/atmos/gfs.t00z.pgrb2.0p25.f012";
        let source = build_source(
            url,
            vec![("PRMSL", "mean sea level", message(3, 1, (101, 0), 100_800.0))],
        );

        // Hour 6 has no files at all; hour 12 decodes.
        let result = fetcher(source)
            .fetch(init, &[Variable::Mslp], &[6, 12])
            .await
            .unwrap();
        let hours: Vec<u32> = result.iter().map(|(h, _)| *h).collect();
        assert_eq!(hours, vec![12]);
    }

    #[tokio::test]
    async fn all_hours_failing_raises_source_unavailable() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let err = fetcher(MapSource::new())
            .fetch(init, &[Variable::Mslp], &[0, 6])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_variable_in_index_is_schema_error() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let url = "http://test/gfs.20240115/00/atmos/gfs.t00z.pgrb2.0p25.f006";
        let source = build_source(
            url,
            vec![("PRMSL", "mean sea level", message(3, 1, (101, 0), 101_300.0))],
        );
        let err = fetcher(source)
            .fetch(init, &[Variable::Hgt500], &[6])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedSchema(_)));
    }
}
