use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, debug_span};
use uuid::Uuid;

use crate::cache::LazyResource;
use crate::client::{Api, HermesClient};
use crate::error::{Error, Result};
use crate::forecast::ForecastClient;
use crate::identifier::{Identifier, resolve_forecastseries};
use crate::schemas::{ForecastSeries, InjectionPlanTemplate, ModelConfig, Status, validate};

/// How [`ForecastSeriesClient::forecast_by_time`] picks a forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMethod {
    /// Smallest distance between starttime and the target; ties go to the
    /// earlier forecast.
    #[default]
    Nearest,
    /// Latest forecast starting at or before the target.
    Previous,
    /// Earliest forecast starting at or after the target.
    Next,
}

impl FromStr for SearchMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nearest" => Ok(Self::Nearest),
            "previous" => Ok(Self::Previous),
            "next" => Ok(Self::Next),
            other => Err(Error::InvalidArgument(format!(
                "Invalid method '{}'. Use 'nearest', 'previous', or 'next'.",
                other
            ))),
        }
    }
}

/// A recurring forecast configuration and everything scheduled under it.
///
/// Either the series UUID must be given, or its name together with the
/// project's UUID or name.
pub struct ForecastSeriesClient {
    api: Api,
    raw: Value,
    metadata: ForecastSeries,

    injectionplans: LazyResource<Vec<InjectionPlanTemplate>>,
    modelconfigs: LazyResource<Vec<ModelConfig>>,
    forecasts: LazyResource<Vec<ForecastClient>>,
}

impl ForecastSeriesClient {
    pub fn new(
        client: &HermesClient,
        forecastseries: impl Into<Identifier>,
        project: Option<Identifier>,
    ) -> Result<Self> {
        let api = client.api();
        let oid = resolve_forecastseries(api, &forecastseries.into(), project.as_ref())?;
        let record: Value = api.get_json(
            &format!("/forecastseries/{}", oid),
            &format!("ForecastSeries \"{}\"", oid),
        )?;
        Self::from_metadata(client, record)
    }

    /// Wraps an already fetched series record.
    pub fn from_metadata(client: &HermesClient, record: Value) -> Result<Self> {
        let metadata = validate(&record, "forecast series")?;
        Ok(Self {
            api: client.api().clone(),
            raw: record,
            metadata,
            injectionplans: LazyResource::new(),
            modelconfigs: LazyResource::new(),
            forecasts: LazyResource::new(),
        })
    }

    pub fn oid(&self) -> Uuid {
        self.metadata.oid
    }

    pub fn metadata(&self) -> &ForecastSeries {
        &self.metadata
    }

    pub fn raw_metadata(&self) -> &Value {
        &self.raw
    }

    /// Model settings passed to all models of the series.
    pub fn model_settings(&self) -> Option<&Value> {
        self.metadata.model_settings.as_ref()
    }

    fn list<T: serde::de::DeserializeOwned>(&self, sub: &str, what: &str) -> Result<Vec<T>> {
        self.api.in_sink(|| {
            let _span = debug_span!("forecastseries", oid = %self.oid()).entered();
            self.api
                .list_json(&format!("/forecastseries/{}/{}", self.oid(), sub), what)
        })
    }

    fn load_injection_plans(&self) -> Result<Vec<InjectionPlanTemplate>> {
        let mut plans: Vec<InjectionPlanTemplate> =
            self.list("injectionplans", "injection plans")?;
        plans.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(plans)
    }

    fn load_model_configs(&self) -> Result<Vec<ModelConfig>> {
        let mut configs: Vec<ModelConfig> = self.list("modelconfigs", "model configs")?;
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }

    fn load_forecasts(&self) -> Result<Vec<ForecastClient>> {
        let records: Vec<Value> = self.list("forecasts", "forecasts")?;
        let mut forecasts = records
            .into_iter()
            .map(|r| ForecastClient::build(self.api.clone(), r))
            .collect::<Result<Vec<_>>>()?;
        forecasts.sort_by_key(|f| f.metadata().starttime);
        self.api
            .in_sink(|| debug!(series = %self.oid(), count = forecasts.len(), "forecasts loaded"));
        Ok(forecasts)
    }

    /// Injection plans of the series, sorted by name.
    pub fn injection_plans(&self) -> Result<Vec<InjectionPlanTemplate>> {
        self.injectionplans.get_or_fetch(|| self.load_injection_plans())
    }

    pub fn injection_plan(&self, name: &str) -> Result<InjectionPlanTemplate> {
        self.injectionplans
            .with(
                || self.load_injection_plans(),
                |plans| plans.iter().find(|p| p.name.as_deref() == Some(name)).cloned(),
            )?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "InjectionPlan \"{}\" not found in ForecastSeries {}.",
                    name,
                    self.oid()
                ))
            })
    }

    /// Model configs of the series, sorted by name.
    pub fn model_configs(&self) -> Result<Vec<ModelConfig>> {
        self.modelconfigs.get_or_fetch(|| self.load_model_configs())
    }

    pub fn model_config(&self, name: &str) -> Result<ModelConfig> {
        self.modelconfigs
            .with(
                || self.load_model_configs(),
                |configs| configs.iter().find(|c| c.name.as_deref() == Some(name)).cloned(),
            )?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "ModelConfig \"{}\" not found in ForecastSeries {}.",
                    name,
                    self.oid()
                ))
            })
    }

    /// Finished or still running forecasts, sorted by starttime.
    pub fn forecasts(&self) -> Result<Vec<ForecastClient>> {
        self.forecasts.get_or_fetch(|| self.load_forecasts())
    }

    /// Forecast closest to `time` by `method` ("nearest", "previous" or
    /// "next"), among COMPLETED forecasts.
    pub fn get_forecast_by_time(
        &self,
        time: DateTime<Utc>,
        method: &str,
    ) -> Result<Option<ForecastClient>> {
        let method = method.parse()?;
        self.forecast_by_time(time, method, &[Status::Completed])
    }

    /// Forecast closest to `time` by `method`, among forecasts whose status
    /// is in `status`. `None` when no forecast qualifies.
    pub fn forecast_by_time(
        &self,
        time: DateTime<Utc>,
        method: SearchMethod,
        status: &[Status],
    ) -> Result<Option<ForecastClient>> {
        let forecasts = self.forecasts.with(
            || self.load_forecasts(),
            |all| {
                all.iter()
                    .filter(|f| f.metadata().status.is_some_and(|s| status.contains(&s)))
                    .filter_map(|f| f.metadata().starttime.map(|t| (t, f.clone())))
                    .collect::<Vec<_>>()
            },
        )?;

        // forecasts are sorted by starttime, so min_by_key keeps the earliest on ties
        let picked = match method {
            SearchMethod::Nearest => forecasts
                .into_iter()
                .min_by_key(|(start, _)| (*start - time).abs()),
            SearchMethod::Previous => forecasts
                .into_iter()
                .filter(|(start, _)| *start <= time)
                .max_by_key(|(start, _)| *start),
            SearchMethod::Next => forecasts
                .into_iter()
                .filter(|(start, _)| *start >= time)
                .min_by_key(|(start, _)| *start),
        };

        Ok(picked.map(|(_, f)| f))
    }
}

impl fmt::Debug for ForecastSeriesClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ForecastSeries({}, {})",
            self.metadata.name.as_deref().unwrap_or("None"),
            self.metadata.oid
        )
    }
}
