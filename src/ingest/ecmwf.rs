//! ECMWF IFS open-data fetcher: 0.25° global regular grid, lead hours 0–120
//! in 6-hour steps, no API key.
//!
//! The open-data index is JSON-lines rather than a NOMADS `.idx`, and
//! surface fields and the 500-hPa geopotential height are separate requests
//! that get merged into one [`FieldSet`]. `tp` arrives in metres and is
//! normalized to millimetres here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ndarray::Array2;

use crate::grib2::decode_messages;
use crate::models::{Field, FieldSet, Variable};

use super::index::{stash, EcmwfIndex};
use super::{
    assert_plausible_units, cycle_parts, derive_wind_speed, fetch_hours, normalize_longitudes,
    standard_lead_hours, FetchError, GribSource, ModelFetcher, Scratch,
};

const DEFAULT_BASE_URL: &str = "https://data.ecmwf.int/forecasts";

const METRES_TO_MM: f64 = 1000.0;

pub struct EcmwfFetcher {
    source: Arc<dyn GribSource>,
    base_url: String,
    hour_timeout: Duration,
}

impl EcmwfFetcher {
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

    fn url_stem(&self, init_time: DateTime<Utc>, fhr: u32) -> String {
        let (date, hour) = cycle_parts(init_time);
        format!(
            "{}/{}/{}z/ifs/0p25/oper/{}{}0000-{}h-oper-fc",
            self.base_url, date, hour, date, hour, fhr
        )
    }

    /// One ranged request for one parameter; each range holds exactly one
    /// message.
    async fn fetch_param(
        &self,
        grib_url: &str,
        index: &EcmwfIndex,
        param: &str,
        levtype: &str,
        levelist: Option<&str>,
        scratch: &Scratch,
        file_tag: &str,
    ) -> Result<Field, FetchError> {
        let range = index.find(param, levtype, levelist).ok_or_else(|| {
            FetchError::UnexpectedSchema(format!("{} absent from open-data index", param))
        })?;
        let bytes = self
            .source
            .get_range(grib_url, range.start, range.end)
            .await?;
        stash(scratch.path(), file_tag, range.start, &bytes).await?;
        let messages = decode_messages(&bytes)?;
        let message = messages.first().ok_or_else(|| {
            FetchError::DecodeFailure(format!("{} range held no message", param))
        })?;
        Ok(message.to_field()?)
    }

    async fn fetch_hour(
        &self,
        init_time: DateTime<Utc>,
        fhr: u32,
        variables: &[Variable],
        scratch: &Scratch,
    ) -> Result<FieldSet, FetchError> {
        let stem = self.url_stem(init_time, fhr);
        let grib_url = format!("{}.grib2", stem);
        let index_url = format!("{}.index", stem);
        let index_text =
            String::from_utf8_lossy(&self.source.get(&index_url).await?).into_owned();
        let index = EcmwfIndex::parse(&index_text);
        let tag = format!("ecmwf_f{:03}", fhr);

        let mut set = FieldSet::new();
        for &variable in variables {
            let field = match variable {
                Variable::Precip => {
                    let tp = self
                        .fetch_param(&grib_url, &index, "tp", "sfc", None, scratch, &tag)
                        .await?;
                    scale_values(tp, METRES_TO_MM)
                }
                Variable::WindSpeed => {
                    let u = self
                        .fetch_param(&grib_url, &index, "10u", "sfc", None, scratch, &tag)
                        .await?;
                    let v = self
                        .fetch_param(&grib_url, &index, "10v", "sfc", None, scratch, &tag)
                        .await?;
                    derive_wind_speed(&u, &v)?
                }
                Variable::Mslp => {
                    self.fetch_param(&grib_url, &index, "msl", "sfc", None, scratch, &tag)
                        .await?
                }
                Variable::Hgt500 => {
                    // IFS open data publishes gh (height in m) directly, not
                    // geopotential.
                    self.fetch_param(&grib_url, &index, "gh", "pl", Some("500"), scratch, &tag)
                        .await?
                }
            };
            let field = normalize_longitudes(field);
            assert_plausible_units(variable, &field)?;
            set.insert(variable, field);
        }
        Ok(set)
    }
}

fn scale_values(field: Field, factor: f64) -> Field {
    match field {
        Field::Regular { lat, lon, values } => Field::Regular {
            lat,
            lon,
            values: scale(values, factor),
        },
        Field::Projected { lat, lon, values } => Field::Projected {
            lat,
            lon,
            values: scale(values, factor),
        },
    }
}

fn scale(values: Array2<f64>, factor: f64) -> Array2<f64> {
    values.mapv(|v| v * factor)
}

#[async_trait]
impl ModelFetcher for EcmwfFetcher {
    fn name(&self) -> &'static str {
        "ECMWF"
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
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn message(value: f64, reference: f64) -> Vec<u8> {
        encode(&TestMessage {
            discipline: 0,
            category: 1,
            parameter: 8,
            surface_type: 1,
            surface_value: 0,
            lat_start: 30.0,
            lon_start: 0.0,
            step: 1.0,
            reference,
            rows: vec![vec![value; 3]; 2],
        })
    }

    #[tokio::test]
    async fn surface_and_pressure_requests_merge_and_tp_converts() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let stem = "http://test/20240115/00z/ifs/0p25/oper/202401150000-6h-oper-fc";

        // 1 m of accumulated precip; the fetcher must hand back 1000 mm.
        let tp = message(1.0, 0.0);
        let gh = message(5_500.0, 5_400.0);
        let mut body = Vec::new();
        let index = format!(
            "{}\n{}\n",
            format!(
                r#"{{"param":"tp","levtype":"sfc","_offset":0,"_length":{}}}"#,
                tp.len()
            ),
            format!(
                r#"{{"param":"gh","levtype":"pl","levelist":"500","_offset":{},"_length":{}}}"#,
                tp.len(),
                gh.len()
            ),
        );
        body.extend_from_slice(&tp);
        body.extend_from_slice(&gh);

        let mut source = MapSource::new();
        source.insert(format!("{}.grib2", stem), body);
        source.insert(format!("{}.index", stem), index.into_bytes());

        let fetcher = EcmwfFetcher::new(Arc::new(source), Duration::from_secs(5))
            .with_base_url("http://test");
        let result = fetcher
            .fetch(init, &[Variable::Precip, Variable::Hgt500], &[6])
            .await
            .unwrap();
        let set = &result[0].1;
        assert_abs_diff_eq!(
            set.get(Variable::Precip).unwrap().values()[[0, 0]],
            1_000.0
        );
        assert_abs_diff_eq!(
            set.get(Variable::Hgt500).unwrap().values()[[1, 1]],
            5_500.0
        );
    }

    #[tokio::test]
    async fn missing_param_is_schema_error() {
        let init = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let stem = "http://test/20240115/00z/ifs/0p25/oper/202401150000-0h-oper-fc";
        let mut source = MapSource::new();
        source.insert(format!("{}.grib2", stem), vec![]);
        source.insert(
            format!("{}.index", stem),
            br#"{"param":"msl","levtype":"sfc","_offset":0,"_length":10}"#.to_vec(),
        );

        let fetcher = EcmwfFetcher::new(Arc::new(source), Duration::from_secs(5))
            .with_base_url("http://test");
        let err = fetcher
            .fetch(init, &[Variable::Precip], &[0])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedSchema(_)));
    }
}
