use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, debug_span};
use uuid::Uuid;

use crate::cache::LazyResource;
use crate::client::{Api, HermesClient};
use crate::error::{Error, Result};
use crate::modelrun::{ModelRunClient, SubResourceProvider};
use crate::results::{RateGrid, grids_from_records};
use crate::schemas::{
    BoreholeHydraulics, ForecastInfo, InjectionPlanTemplate, ModelConfig, ModelRunInfo, validate,
};
use crate::util::deduplicate;

/// Rates of one model run, as returned for a whole forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRunRates {
    /// The run's record as sent, without its `rateforecasts`.
    pub modelrun: Map<String, Value>,
    pub rates: Vec<RateGrid>,
}

/// One forecast of a series and its model runs.
///
/// Model configs and injection plans are never fetched for a forecast: they
/// are the deduplicated records embedded in its model runs. Clones share
/// their caches.
#[derive(Clone)]
pub struct ForecastClient {
    inner: Rc<ForecastInner>,
}

struct ForecastInner {
    api: Api,
    raw: Value,
    metadata: ForecastInfo,
    modelruns: Vec<ModelRunClient>,

    modelconfig_records: Vec<Map<String, Value>>,
    injectionplan_records: Vec<Map<String, Value>>,

    modelconfigs: LazyResource<IndexMap<String, ModelConfig>>,
    injectionplans: LazyResource<IndexMap<String, InjectionPlanTemplate>>,
    seismicityobservation: LazyResource<String>,
    injectionobservations: LazyResource<Vec<BoreholeHydraulics>>,
}

impl ForecastClient {
    /// Fetches a forecast by oid.
    pub fn from_oid(client: &HermesClient, oid: Uuid) -> Result<Self> {
        let record: Value = client
            .api()
            .get_json(
                &format!("/forecasts/{}", oid),
                &format!("Forecast with oid \"{}\"", oid),
            )
            .map_err(|e| match e {
                Error::NotFound(_) => {
                    Error::NotFound(format!("Forecast with oid \"{}\" not found.", oid))
                }
                other => other,
            })?;
        Self::from_metadata(client, record)
    }

    /// Wraps an already fetched forecast record, including its model runs.
    pub fn from_metadata(client: &HermesClient, record: Value) -> Result<Self> {
        Self::build(client.api().clone(), record)
    }

    pub(crate) fn build(api: Api, record: Value) -> Result<Self> {
        let mut metadata: ForecastInfo = validate(&record, "forecast")?;

        let runs = match record.get("modelruns") {
            Some(Value::Array(runs)) => runs.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(Error::InvalidArgument(format!(
                    "forecast {}: 'modelruns' is not a list",
                    metadata.oid
                )));
            }
        };
        let run_infos = runs
            .iter()
            .map(|r| validate::<ModelRunInfo>(r, "model run"))
            .collect::<Result<Vec<_>>>()?;

        let modelconfig_records = deduplicate(embedded(&runs, "modelconfig"));
        let injectionplan_records = deduplicate(embedded(&runs, "injectionplan"));
        metadata.modelconfigs = sorted_names(&modelconfig_records);
        metadata.injectionplans = sorted_names(&injectionplan_records);

        let inner = Rc::new_cyclic(|weak: &Weak<ForecastInner>| {
            let provider: Weak<dyn SubResourceProvider> = weak.clone();
            let modelruns = runs
                .into_iter()
                .zip(run_infos)
                .map(|(raw, info)| {
                    ModelRunClient::from_parts(api.clone(), raw, info, Some(provider.clone()))
                })
                .collect();

            ForecastInner {
                api,
                raw: record,
                metadata,
                modelruns,
                modelconfig_records,
                injectionplan_records,
                modelconfigs: LazyResource::new(),
                injectionplans: LazyResource::new(),
                seismicityobservation: LazyResource::new(),
                injectionobservations: LazyResource::new(),
            }
        });

        Ok(Self { inner })
    }

    pub fn oid(&self) -> Uuid {
        self.inner.metadata.oid
    }

    pub fn metadata(&self) -> &ForecastInfo {
        &self.inner.metadata
    }

    /// The record this forecast was built from.
    pub fn raw_metadata(&self) -> &Value {
        &self.inner.raw
    }

    pub fn model_runs(&self) -> Vec<ModelRunClient> {
        self.inner.modelruns.clone()
    }

    /// Model configs used by this forecast's runs, sorted by name.
    pub fn model_configs(&self) -> Result<Vec<ModelConfig>> {
        self.inner.with_modelconfigs(|m| m.values().cloned().collect())
    }

    /// Injection plans used by this forecast's runs, sorted by name.
    pub fn injection_plans(&self) -> Result<Vec<InjectionPlanTemplate>> {
        self.inner.with_injectionplans(|m| m.values().cloned().collect())
    }

    /// Observed seismicity at forecast time, as a QuakeML document.
    ///
    /// Empty when the service has none.
    pub fn seismicity_observation(&self) -> Result<String> {
        self.inner.seismicityobservation.get_or_fetch(|| {
            let body = self.fetch("seismicityobservation")?.unwrap_or_default();
            String::from_utf8(body).map_err(|e| {
                Error::Payload(format!("seismicity observation is not UTF-8: {}", e))
            })
        })
    }

    /// Observed hydraulics at forecast time.
    pub fn injection_observations(&self) -> Result<Vec<BoreholeHydraulics>> {
        self.inner.injectionobservations.get_or_fetch(|| {
            let path = format!("/forecasts/{}/injectionobservations", self.oid());
            let api = &self.inner.api;
            api.in_sink(|| {
                let _span = debug_span!("forecast", oid = %self.oid()).entered();
                api.list_json(&path, "injection observations")
            })
        })
    }

    fn fetch(&self, sub: &str) -> Result<Option<Vec<u8>>> {
        let api = &self.inner.api;
        api.in_sink(|| {
            let _span = debug_span!("forecast", oid = %self.oid()).entered();
            api.fetch(&format!("/forecasts/{}/{}", self.oid(), sub))
        })
    }

    /// Rates of this forecast's model runs in one request, narrowed to the
    /// given model config and injection plan names. Empty filters select all.
    pub fn rates(
        &self,
        modelconfigs: &[&str],
        injectionplans: &[&str],
    ) -> Result<Vec<ModelRunRates>> {
        let query: Vec<(&str, &str)> = modelconfigs
            .iter()
            .map(|name| ("modelconfigs", *name))
            .chain(injectionplans.iter().map(|name| ("injectionplans", *name)))
            .collect();

        let api = &self.inner.api;
        let body = api.in_sink(|| {
            let _span = debug_span!("forecast", oid = %self.oid()).entered();
            api.fetch_with_query(&format!("/forecasts/{}/rates", self.oid()), &query)
        })?;
        let Some(body) = body else {
            return Ok(Vec::new());
        };

        let runs: Vec<Map<String, Value>> =
            serde_json::from_slice(&body).map_err(|e| Error::decode("forecast rates", e))?;
        runs.into_iter()
            .map(|mut modelrun| {
                let records = match modelrun.remove("rateforecasts") {
                    Some(Value::Array(records)) => records,
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => {
                        return Err(Error::Payload("'rateforecasts' is not a list".into()));
                    }
                };
                Ok(ModelRunRates {
                    modelrun,
                    rates: grids_from_records(records)?,
                })
            })
            .collect()
    }

    /// Results of the model run using `modelconfig` (and `injectionplan`, if given).
    ///
    /// Fails with [`Error::NoInjectionPlans`] when an injection plan is asked
    /// for but none of the runs has one, and with [`Error::NotFound`] when no
    /// run matches.
    pub fn get_results(
        &self,
        modelconfig: &str,
        injectionplan: Option<&str>,
    ) -> Result<Vec<RateGrid>> {
        let runs = &self.inner.modelruns;

        if injectionplan.is_some() && runs.iter().all(|r| r.metadata().injectionplan.is_none()) {
            return Err(Error::NoInjectionPlans {
                forecast: self.oid().to_string(),
            });
        }

        let run = runs
            .iter()
            .find(|r| {
                let m = r.metadata();
                m.modelconfig.as_deref() == Some(modelconfig)
                    && injectionplan.is_none_or(|ip| m.injectionplan.as_deref() == Some(ip))
            })
            .ok_or_else(|| {
                Error::NotFound(match injectionplan {
                    Some(ip) => format!(
                        "No model run with model config \"{}\" and injection plan \"{}\" in forecast {}.",
                        modelconfig,
                        ip,
                        self.oid()
                    ),
                    None => format!(
                        "No model run with model config \"{}\" in forecast {}.",
                        modelconfig,
                        self.oid()
                    ),
                })
            })?;

        run.results()
    }
}

impl ForecastInner {
    fn with_modelconfigs<R>(
        &self,
        read: impl FnOnce(&IndexMap<String, ModelConfig>) -> R,
    ) -> Result<R> {
        self.modelconfigs.with(
            || {
                self.api
                    .in_sink(|| index_by_name(&self.modelconfig_records, "model config"))
            },
            read,
        )
    }

    fn with_injectionplans<R>(
        &self,
        read: impl FnOnce(&IndexMap<String, InjectionPlanTemplate>) -> R,
    ) -> Result<R> {
        self.injectionplans.with(
            || {
                self.api
                    .in_sink(|| index_by_name(&self.injectionplan_records, "injection plan"))
            },
            read,
        )
    }
}

impl SubResourceProvider for ForecastInner {
    fn lookup_injection_plan(&self, name: &str) -> Result<Option<InjectionPlanTemplate>> {
        self.with_injectionplans(|m| m.get(name).cloned())
    }

    fn lookup_model_config(&self, name: &str) -> Result<Option<ModelConfig>> {
        self.with_modelconfigs(|m| m.get(name).cloned())
    }
}

impl SubResourceProvider for ForecastClient {
    fn lookup_injection_plan(&self, name: &str) -> Result<Option<InjectionPlanTemplate>> {
        self.inner.lookup_injection_plan(name)
    }

    fn lookup_model_config(&self, name: &str) -> Result<Option<ModelConfig>> {
        self.inner.lookup_model_config(name)
    }
}

/// The non-null `key` objects of every model run, in run order.
fn embedded(runs: &[Value], key: &str) -> Vec<Map<String, Value>> {
    runs.iter()
        .filter_map(|r| match r.get(key) {
            Some(Value::Object(obj)) => Some(obj.clone()),
            _ => None,
        })
        .collect()
}

fn sorted_names(records: &[Map<String, Value>]) -> Vec<String> {
    let mut names: Vec<String> = records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect();
    names.sort();
    names.dedup();
    names
}

fn index_by_name<T: DeserializeOwned>(
    records: &[Map<String, Value>],
    what: &str,
) -> Result<IndexMap<String, T>> {
    let mut entries = records
        .iter()
        .filter_map(|r| {
            let name = r.get("name").and_then(Value::as_str)?.to_string();
            Some((name, r))
        })
        .map(|(name, r)| {
            T::deserialize(&Value::Object(r.clone()))
                .map(|typed| (name, typed))
                .map_err(|e| Error::decode(what, e))
        })
        .collect::<Result<Vec<_>>>()?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    // first record wins when two differing records share a name
    let mut map = IndexMap::with_capacity(entries.len());
    for (name, typed) in entries {
        map.entry(name).or_insert(typed);
    }
    debug!(what, count = map.len(), "indexed embedded records");
    Ok(map)
}

impl fmt::Debug for ForecastClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.inner.metadata;
        let time = |t: Option<chrono::DateTime<chrono::Utc>>| {
            t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "None".to_string())
        };
        write!(
            f,
            "Forecast({}, {}, {})",
            m.status.map(|s| s.as_str()).unwrap_or("None"),
            time(m.starttime),
            time(m.endtime),
        )
    }
}
