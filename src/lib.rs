//! A blocking Rust client for the HERMES forecasting web service.
//!
//! HERMES organizes seismicity forecasts as Projects, which own
//! ForecastSeries, which produce Forecasts made of ModelRuns. This crate reads
//! that hierarchy over the `/v1` REST API and turns model run results into
//! per-window rate grids.
//!
//! ## Quick start
//! - Point the client at a service with `HERMES_URL` (optionally
//!   `HERMES_TIMEOUT`) or a `.hermesrc` file in the current directory or in
//!   your home directory.
//! - Open a forecast series by UUID, or by name within its project, and pick a
//!   forecast by time.
//!
//! ```no_run
//! use anyhow::Result;
//! use chrono::Utc;
//! use hermes_client::HermesClient;
//!
//! fn main() -> Result<()> {
//!     let client = HermesClient::from_env()?;
//!     let series = client.forecastseries("bedretto-2022", Some("induced".into()))?;
//!
//!     if let Some(forecast) = series.get_forecast_by_time(Utc::now(), "previous")? {
//!         for run in forecast.model_runs() {
//!             for grid in run.results()? {
//!                 println!("{} .. {}: {} rows", grid.starttime, grid.endtime, grid.len());
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Sub-resources are fetched lazily and cached per client; the clients are
//! single-threaded.

#![forbid(unsafe_code)]

mod cache;
mod client;
mod config;
mod error;
mod forecast;
mod forecastseries;
mod identifier;
mod modelrun;
mod results;
mod schemas;
mod transport;
mod util;

#[cfg(test)]
mod testing;

pub use client::HermesClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use forecast::{ForecastClient, ModelRunRates};
pub use forecastseries::{ForecastSeriesClient, SearchMethod};
pub use identifier::Identifier;
pub use modelrun::{ModelRunClient, SubResourceProvider};
pub use results::{RateGrid, RateRow, ResultType, materialize};
pub use schemas::{
    BoreholeHydraulics, ForecastInfo, ForecastSeries, InjectionPlanTemplate, ModelConfig,
    ModelRunInfo, Project, Status,
};
pub use transport::{HttpResponse, HttpTransport, Transport};
