//! Provider index files: NOMADS `.idx` sidecars and the ECMWF open-data
//! JSON-lines `.index`.
//!
//! Both formats map message descriptors onto byte ranges so fetchers can
//! subset single messages out of multi-hundred-megabyte files.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use super::{FetchError, GribSource, Scratch};
use crate::grib2::{decode_messages, DecodedMessage};

/// Inclusive byte range; `end = None` runs to end-of-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// A parsed NOMADS `.idx` sidecar.
///
/// Lines look like `4:5423:d=2024011500:UGRD:10 m above ground:anl:`; the
/// searchable descriptor is everything from the variable name on, wrapped in
/// colons so search patterns can anchor on `:VAR:level:`.
pub struct GribIndex {
    entries: Vec<IdxEntry>,
}

struct IdxEntry {
    offset: u64,
    descriptor: String,
}

impl GribIndex {
    /// Parse, skipping malformed lines.
    pub fn parse(text: &str) -> GribIndex {
        let mut entries = Vec::new();
        for line in text.lines() {
            let mut parts = line.splitn(4, ':');
            let _msg = parts.next();
            let offset = match parts.next().and_then(|p| p.parse::<u64>().ok()) {
                Some(o) => o,
                None => continue,
            };
            let _date = parts.next();
            let rest = match parts.next() {
                Some(r) => r,
                None => continue,
            };
            entries.push(IdxEntry {
                offset,
                descriptor: format!(":{}", rest),
            });
        }
        GribIndex { entries }
    }

    /// Byte ranges of the messages whose descriptor matches `pattern`.
    pub fn find(&self, pattern: &Regex) -> Vec<ByteRange> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| pattern.is_match(&e.descriptor))
            .map(|(i, e)| ByteRange {
                start: e.offset,
                end: self.entries.get(i + 1).map(|next| next.offset - 1),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge overlapping or adjacent ranges into single requests.
///
/// NAM's U and V wind components sit in adjacent messages and must come down
/// in one ranged GET; merging makes that the general rule.
pub fn merge_ranges(mut ranges: Vec<ByteRange>) -> Vec<ByteRange> {
    ranges.sort_by_key(|r| r.start);
    ranges.dedup();
    let mut merged: Vec<ByteRange> = Vec::new();
    for range in ranges {
        match merged.last_mut() {
            Some(last) => {
                let contiguous = match last.end {
                    None => true,
                    Some(end) => range.start <= end + 1,
                };
                if contiguous {
                    last.end = match (last.end, range.end) {
                        (None, _) | (_, None) => None,
                        (Some(a), Some(b)) => Some(a.max(b)),
                    };
                } else {
                    merged.push(range);
                }
            }
            None => merged.push(range),
        }
    }
    merged
}

/// Download the `.idx` sidecar, match `patterns`, ranged-GET the matched
/// messages into `scratch`, and decode them.
///
/// Fails with [`FetchError::UnexpectedSchema`] when any pattern matches
/// nothing: the variable is simply absent from this hour's file.
pub(crate) async fn fetch_indexed_messages(
    source: &dyn GribSource,
    grib_url: &str,
    idx_url: &str,
    patterns: &[(&str, Regex)],
    scratch: &Scratch,
    file_tag: &str,
) -> Result<Vec<DecodedMessage>, FetchError> {
    let idx_text = String::from_utf8_lossy(&source.get(idx_url).await?).into_owned();
    let index = GribIndex::parse(&idx_text);
    if index.is_empty() {
        return Err(FetchError::DecodeFailure(format!(
            "empty or unparseable index at {}",
            idx_url
        )));
    }

    let mut ranges = Vec::new();
    for (label, pattern) in patterns {
        let found = index.find(pattern);
        if found.is_empty() {
            return Err(FetchError::UnexpectedSchema(format!(
                "no index entry matched {} in {}",
                label, idx_url
            )));
        }
        ranges.extend(found);
    }

    let mut messages = Vec::new();
    for range in merge_ranges(ranges) {
        let bytes = source.get_range(grib_url, range.start, range.end).await?;
        stash(scratch.path(), file_tag, range.start, &bytes).await?;
        messages.extend(decode_messages(&bytes)?);
    }
    Ok(messages)
}

/// ECMWF open-data `.index`: one JSON object per line.
pub struct EcmwfIndex {
    entries: Vec<EcmwfEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EcmwfEntry {
    pub param: String,
    #[serde(default)]
    pub levtype: String,
    #[serde(default)]
    pub levelist: Option<String>,
    #[serde(rename = "_offset")]
    pub offset: u64,
    #[serde(rename = "_length")]
    pub length: u64,
}

impl EcmwfIndex {
    pub fn parse(text: &str) -> EcmwfIndex {
        let entries = text
            .lines()
            .filter_map(|line| serde_json::from_str::<EcmwfEntry>(line).ok())
            .collect();
        EcmwfIndex { entries }
    }

    /// Range of the first entry for `param` at `levtype` (and level, for
    /// pressure-level fields).
    pub fn find(&self, param: &str, levtype: &str, levelist: Option<&str>) -> Option<ByteRange> {
        self.entries
            .iter()
            .find(|e| {
                e.param == param
                    && e.levtype == levtype
                    && match levelist {
                        Some(want) => e.levelist.as_deref() == Some(want),
                        None => true,
                    }
            })
            .map(|e| ByteRange {
                start: e.offset,
                end: Some(e.offset + e.length - 1),
            })
    }
}

/// Keep the downloaded message bytes in the invocation's scratch directory.
pub(crate) async fn stash(
    scratch: &Path,
    file_tag: &str,
    offset: u64,
    bytes: &[u8],
) -> Result<(), FetchError> {
    let path = scratch.join(format!("{}_{}.grib2", file_tag, offset));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| FetchError::SourceUnavailable(format!("scratch write: {}", e)))
}
