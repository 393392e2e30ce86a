use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, debug_span, warn};

use crate::cache::LazyResource;
use crate::client::Api;
use crate::error::{Error, Result};
use crate::results::{RateGrid, ResultType, materialize};
use crate::schemas::{InjectionPlanTemplate, ModelConfig, ModelRunInfo, validate};

/// Supplies already cached injection plans and model configs by name.
///
/// A model run that has a provider asks it before going to the network;
/// `Ok(None)` means "not known here" and the run fetches the record itself.
/// A provider error is logged and treated the same way.
pub trait SubResourceProvider {
    fn lookup_injection_plan(&self, name: &str) -> Result<Option<InjectionPlanTemplate>>;
    fn lookup_model_config(&self, name: &str) -> Result<Option<ModelConfig>>;
}

/// One model execution within a forecast.
///
/// Clones share their caches.
#[derive(Clone)]
pub struct ModelRunClient {
    inner: Rc<ModelRunInner>,
}

struct ModelRunInner {
    api: Api,
    raw: Value,
    metadata: ModelRunInfo,
    provider: Option<Weak<dyn SubResourceProvider>>,

    injectionplan: LazyResource<Option<InjectionPlanTemplate>>,
    modelconfig: LazyResource<ModelConfig>,
    results: LazyResource<Vec<RateGrid>>,
    rates: LazyResource<Vec<RateGrid>>,
}

impl ModelRunClient {
    pub(crate) fn from_parts(
        api: Api,
        raw: Value,
        metadata: ModelRunInfo,
        provider: Option<Weak<dyn SubResourceProvider>>,
    ) -> Self {
        Self {
            inner: Rc::new(ModelRunInner {
                api,
                raw,
                metadata,
                provider,
                injectionplan: LazyResource::new(),
                modelconfig: LazyResource::new(),
                results: LazyResource::new(),
                rates: LazyResource::new(),
            }),
        }
    }

    /// Attaches a provider consulted before fetching plans and configs.
    ///
    /// The provider is held weakly; once it is dropped the run fetches on its own.
    pub fn with_provider(self, provider: &Rc<dyn SubResourceProvider>) -> Self {
        let inner = &self.inner;
        Self::from_parts(
            inner.api.clone(),
            inner.raw.clone(),
            inner.metadata.clone(),
            Some(Rc::downgrade(provider)),
        )
    }

    pub fn metadata(&self) -> &ModelRunInfo {
        &self.inner.metadata
    }

    /// The record this run was built from.
    pub fn raw_metadata(&self) -> &Value {
        &self.inner.raw
    }

    fn provider(&self) -> Option<Rc<dyn SubResourceProvider>> {
        self.inner.provider.as_ref().and_then(Weak::upgrade)
    }

    /// Asks the provider, if any is still alive; a failed lookup counts as a miss.
    fn from_provider<T>(
        &self,
        what: &str,
        lookup: impl FnOnce(&dyn SubResourceProvider) -> Result<Option<T>>,
    ) -> Option<T> {
        let provider = self.provider()?;
        match lookup(provider.as_ref()) {
            Ok(found) => found,
            Err(error) => {
                self.inner.api.in_sink(|| {
                    warn!(
                        oid = %self.inner.metadata.oid,
                        what,
                        %error,
                        "cached lookup failed, fetching instead"
                    )
                });
                None
            }
        }
    }

    fn path(&self, sub: &str) -> String {
        format!("/modelruns/{}/{}", self.inner.metadata.oid, sub)
    }

    /// The injection plan used by this run; `None` when it ran without one.
    pub fn injection_plan(&self) -> Result<Option<InjectionPlanTemplate>> {
        let Some(name) = self.inner.metadata.injectionplan.as_deref() else {
            return Ok(None);
        };
        self.inner.injectionplan.get_or_fetch(|| {
            if let Some(plan) =
                self.from_provider("injection plan", |p| p.lookup_injection_plan(name))
            {
                return Ok(Some(plan));
            }
            let api = &self.inner.api;
            api.in_sink(|| {
                let _span = debug_span!("modelrun", oid = %self.inner.metadata.oid).entered();
                debug!(name, "fetching injection plan");
                match api.fetch(&self.path("injectionplan"))? {
                    Some(body) => serde_json::from_slice(&body)
                        .map(Some)
                        .map_err(|e| Error::decode("injection plan", e)),
                    None => Ok(None),
                }
            })
        })
    }

    pub fn model_config(&self) -> Result<ModelConfig> {
        self.inner.modelconfig.get_or_fetch(|| {
            if let Some(name) = self.inner.metadata.modelconfig.as_deref() {
                if let Some(config) =
                    self.from_provider("model config", |p| p.lookup_model_config(name))
                {
                    return Ok(config);
                }
            }
            let api = &self.inner.api;
            api.in_sink(|| {
                let _span = debug_span!("modelrun", oid = %self.inner.metadata.oid).entered();
                debug!("fetching model config");
                api.get_json(&self.path("modelconfig"), "model config")
            })
        })
    }

    /// How this run's results are encoded, asking the model config if the run
    /// itself does not say.
    pub fn result_type(&self) -> Result<ResultType> {
        if let Some(rt) = self.inner.metadata.result_type {
            return Ok(rt);
        }
        self.model_config()?.result_type.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "model run {} declares no result type",
                self.inner.metadata.oid
            ))
        })
    }

    /// The run's results, decoded according to its result type.
    pub fn results(&self) -> Result<Vec<RateGrid>> {
        self.inner.results.get_or_fetch(|| {
            let result_type = self.result_type()?;
            let api = &self.inner.api;
            api.in_sink(|| {
                let _span = debug_span!("modelrun", oid = %self.inner.metadata.oid).entered();
                match api.fetch(&self.path("results"))? {
                    Some(body) => {
                        let grids = materialize(&body, result_type)?;
                        debug!(%result_type, grids = grids.len(), "results materialized");
                        Ok(grids)
                    }
                    None => Ok(Vec::new()),
                }
            })
        })
    }

    /// The run's gridded rates from the `rates` endpoint.
    pub fn rates(&self) -> Result<Vec<RateGrid>> {
        self.inner.rates.get_or_fetch(|| {
            let api = &self.inner.api;
            api.in_sink(|| {
                let _span = debug_span!("modelrun", oid = %self.inner.metadata.oid).entered();
                match api.fetch(&self.path("rates"))? {
                    Some(body) => materialize(&body, ResultType::Grid),
                    None => Ok(Vec::new()),
                }
            })
        })
    }
}

impl fmt::Debug for ModelRunClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.inner.metadata;
        write!(
            f,
            "ModelRun({}, modelconfig={}, injectionplan={})",
            m.status.map(|s| s.as_str()).unwrap_or("None"),
            m.modelconfig.as_deref().unwrap_or("None"),
            m.injectionplan.as_deref().unwrap_or("None"),
        )
    }
}
