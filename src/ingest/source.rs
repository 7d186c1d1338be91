//! HTTP transport seam for provider downloads.
//!
//! Fetchers talk to a [`GribSource`] rather than to reqwest directly, so
//! tests inject in-memory sources and the per-request timeout lives in one
//! place.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Byte-oriented GET access to a provider.
#[async_trait]
pub trait GribSource: Send + Sync {
    /// Full-body GET.
    async fn get(&self, url: &str) -> Result<Vec<u8>, SourceError>;

    /// Ranged GET, inclusive `start`, inclusive `end` when bounded and
    /// to end-of-file otherwise.
    async fn get_range(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<u8>, SourceError>;
}

/// reqwest-backed source with a per-request timeout.
pub struct HttpGribSource {
    client: reqwest::Client,
}

impl HttpGribSource {
    pub fn new(timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("synoptic-spread/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(HttpGribSource { client })
    }

    async fn send(
        &self,
        url: &str,
        range: Option<String>,
    ) -> Result<Vec<u8>, SourceError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        let response = request.send().await.map_err(|e| classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await.map_err(|e| classify(url, e))?;
        Ok(bytes.to_vec())
    }
}

fn classify(url: &str, err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(url.to_string())
    } else {
        SourceError::Transport(err.to_string())
    }
}

#[async_trait]
impl GribSource for HttpGribSource {
    async fn get(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        self.send(url, None).await
    }

    async fn get_range(
        &self,
        url: &str,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<u8>, SourceError> {
        let range = match end {
            Some(end) => format!("bytes={}-{}", start, end),
            None => format!("bytes={}-", start),
        };
        self.send(url, Some(range)).await
    }
}

/// In-memory source for fetcher tests: URL → bytes, with ranged reads
/// sliced out of the stored body.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MapSource {
        bodies: HashMap<String, Vec<u8>>,
    }

    impl MapSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, url: impl Into<String>, body: Vec<u8>) {
            self.bodies.insert(url.into(), body);
        }
    }

    #[async_trait]
    impl GribSource for MapSource {
        async fn get(&self, url: &str) -> Result<Vec<u8>, SourceError> {
            self.bodies.get(url).cloned().ok_or(SourceError::Status {
                status: 404,
                url: url.to_string(),
            })
        }

        async fn get_range(
            &self,
            url: &str,
            start: u64,
            end: Option<u64>,
        ) -> Result<Vec<u8>, SourceError> {
            let body = self.get(url).await?;
            let start = start as usize;
            if start >= body.len() {
                return Err(SourceError::Status {
                    status: 416,
                    url: url.to_string(),
                });
            }
            let stop = match end {
                Some(end) => ((end + 1) as usize).min(body.len()),
                None => body.len(),
            };
            Ok(body[start..stop].to_vec())
        }
    }
}
