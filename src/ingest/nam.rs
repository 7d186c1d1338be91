//! NAM CONUSNEST fetcher: 3-km Lambert Conformal grid from NOMADS, lead
//! hours 0–72 in 6-hour steps.
//!
//! The decoded fields carry 2-D auxiliary latitude/longitude coordinates.

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

const DEFAULT_BASE_URL: &str = "https://nomads.ncep.noaa.gov/pub/data/nccf/com/nam/prod";

/// NAM precip accumulations are published as "3-6 hour acc", not "0-N".
/// U and V share a byte range and must come down in one request; the
/// alternation plus range merging guarantees that.
const NAM_SEARCH: &[(Variable, &'static str)] = &[
    (Variable::Precip, ":APCP:surface:"),
    (Variable::WindSpeed, ":(UGRD|VGRD):10 m above ground"),
    (Variable::Mslp, ":PRMSL:mean sea level"),
    (Variable::Hgt500, ":HGT:500 mb"),
];

pub struct NamFetcher {
    source: Arc<dyn GribSource>,
    base_url: String,
    hour_timeout: Duration,
}

impl NamFetcher {
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
            "{}/nam.{}/nam.t{}z.conusnest.hiresf{:02}.tm00.grib2",
            self.base_url, date, hour, fhr
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
        let patterns = search_patterns(NAM_SEARCH, variables);
        let messages = fetch_indexed_messages(
            self.source.as_ref(),
            &grib_url,
            &idx_url,
            &patterns,
            scratch,
            &format!("nam_f{:02}", fhr),
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
impl ModelFetcher for NamFetcher {
    fn name(&self) -> &'static str {
        "NAM"
    }

    fn default_lead_hours(&self) -> Vec<u32> {
        standard_lead_hours(72)
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
