//! # SynopticSpread
//!
//! Divergence tracking between numerical weather prediction (NWP) models.
//!
//! This crate periodically ingests fresh forecast runs from multiple external
//! providers (GFS, NAM CONUSNEST, ECMWF IFS open data, HRRR), extracts a
//! canonical set of meteorological variables onto a common spatial grid, and
//! computes pairwise and ensemble-level divergence metrics that are persisted
//! for query.
//!
//! ## Architecture
//!
//! The crate is organized leaves-first:
//!
//! - [`models`]: canonical variables, gridded fields and relational row types
//! - [`grid`]: the coordinate/array kernel (point extraction, regridding,
//!   bounding boxes) and grid-level divergence
//! - [`metrics`]: stateless point-level metric functions (pairwise RMSE/bias,
//!   ensemble spread)
//! - [`grib2`]: a GRIB2 edition-2 subset decoder for the message templates the
//!   supported providers publish
//! - [`ingest`]: the per-model fetcher capability and its four concrete
//!   implementations
//! - [`store`]: the chunked, compressed array store for 2-D divergence fields
//! - [`db`]: repository traits with in-memory and Diesel/Postgres backends
//! - [`pipeline`]: the idempotent orchestrator, the wall-clock scheduler and
//!   the post-ingest hook seam
//! - [`http`]: read-only query API over the two stores (feature
//!   `http-server`)
//!
//! Control flow: scheduler → orchestrator → fetcher → kernel → metric engine
//! → storage → post-ingest event.

pub mod config;
pub mod db;
pub mod grib2;
pub mod grid;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod store;

#[cfg(feature = "http-server")]
pub mod http;
