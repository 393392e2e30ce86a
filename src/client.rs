use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Dispatch, debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, load_config};
use crate::error::{Error, Result, format_api_error};
use crate::forecast::ForecastClient;
use crate::forecastseries::ForecastSeriesClient;
use crate::identifier::{self, Identifier};
use crate::modelrun::ModelRunClient;
use crate::schemas::{ForecastSeries, InjectionPlanTemplate, ModelConfig, Project, validate};
use crate::transport::{HttpTransport, Transport};
use crate::util::urljoin;

/// Status codes that mean "the resource has no content" rather than failure.
const NO_CONTENT_CODES: [StatusCode; 2] = [StatusCode::NO_CONTENT, StatusCode::NOT_FOUND];

/// Shared request plumbing: base URL, transport and log sink.
///
/// Cloned into every entity client; clones share the transport.
#[derive(Clone)]
pub(crate) struct Api {
    url: String,
    transport: Rc<dyn Transport>,
    dispatch: Option<Dispatch>,
}

impl Api {
    pub(crate) fn new(url: &str, transport: Rc<dyn Transport>) -> Self {
        Self {
            url: format!("{}/v1", url.trim_end_matches('/')),
            transport,
            dispatch: None,
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Runs `f` with the injected log sink as the default dispatcher.
    pub(crate) fn in_sink<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    /// GETs `path`; `None` when the service reports no content.
    pub(crate) fn fetch(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.fetch_url(urljoin(&self.url, path))
    }

    /// Like [`Api::fetch`], with `query` appended in order. Repeated keys are
    /// sent as repeated pairs.
    pub(crate) fn fetch_with_query(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<Vec<u8>>> {
        let joined = urljoin(&self.url, path);
        if query.is_empty() {
            return self.fetch_url(joined);
        }
        let mut url = Url::parse(&joined).map_err(|e| Error::Transport {
            url: joined.clone(),
            source: Box::new(e),
        })?;
        url.query_pairs_mut().extend_pairs(query);
        self.fetch_url(url.into())
    }

    fn fetch_url(&self, url: String) -> Result<Option<Vec<u8>>> {
        self.in_sink(|| {
            debug!(%url, "making request");
            let resp = self.transport.get(&url)?;

            if NO_CONTENT_CODES.contains(&resp.status) {
                warn!(%url, status = %resp.status, "no data received");
                return Ok(None);
            }
            if !resp.status.is_success() {
                return Err(format_api_error(resp.status, &url, &resp.body));
            }

            info!(%url, bytes = resp.body.len(), "data received");
            Ok(Some(resp.body))
        })
    }

    /// Fetches a single resource; no content is [`Error::NotFound`].
    pub(crate) fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        match self.fetch(path)? {
            Some(body) => decode(&body, what),
            None => Err(Error::NotFound(format!(
                "{} not found ({}).",
                what,
                urljoin(&self.url, path)
            ))),
        }
    }

    /// Fetches a listing; no content is an empty list.
    pub(crate) fn list_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<Vec<T>> {
        match self.fetch(path)? {
            Some(body) => decode(&body, what),
            None => Ok(Vec::new()),
        }
    }
}

fn decode<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::decode(what, e))
}

impl fmt::Debug for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Api")
            .field("url", &self.url)
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

/// Entry point to a HERMES webservice.
///
/// Cheap to clone; clones share the underlying transport. Not thread-safe:
/// entity clients cache lazily fetched data in `RefCell`s.
#[derive(Debug, Clone)]
pub struct HermesClient {
    api: Api,
}

impl HermesClient {
    /// Creates a client from `HERMES_URL` / `HERMES_TIMEOUT` and/or `.hermesrc`.
    ///
    /// This is equivalent to `HermesClient::new(None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`timeout` arguments
    /// - environment variables `HERMES_URL` / `HERMES_TIMEOUT`
    /// - config file from `HERMES_RC` or `.hermesrc`
    pub fn new(url: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let cfg = load_config(url, timeout).map_err(Error::Config)?;
        Self::with_config(cfg)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(cfg.timeout)?.with_progress(cfg.progress);
        Ok(Self::with_transport(&cfg.url, transport))
    }

    /// Creates a client that sends its requests through `transport`.
    pub fn with_transport(url: &str, transport: impl Transport + 'static) -> Self {
        Self {
            api: Api::new(url, Rc::new(transport)),
        }
    }

    /// Routes all log events of this client, and of every entity client
    /// created from it, to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.api.dispatch = Some(dispatch);
        self
    }

    /// The versioned API root, e.g. `http://localhost:8000/v1`.
    pub fn url(&self) -> &str {
        self.api.url()
    }

    pub(crate) fn api(&self) -> &Api {
        &self.api
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.api.list_json("/projects", "project list")
    }

    /// Looks a project up by UUID or by name.
    pub fn get_project(&self, project: impl Into<Identifier>) -> Result<Project> {
        let oid = self.resolve_project(project)?;
        self.api
            .get_json(&format!("/projects/{}", oid), &format!("Project \"{}\"", oid))
    }

    pub fn resolve_project(&self, project: impl Into<Identifier>) -> Result<Uuid> {
        identifier::resolve_project(&self.api, &project.into())
    }

    /// Lists the forecast series of a project given by UUID or name.
    pub fn list_forecastseries(&self, project: impl Into<Identifier>) -> Result<Vec<ForecastSeries>> {
        let oid = self.resolve_project(project)?;
        self.api.list_json(
            &format!("/projects/{}/forecastseries", oid),
            "forecast series list",
        )
    }

    pub fn get_forecastseries(&self, oid: Uuid) -> Result<ForecastSeries> {
        self.api.get_json(
            &format!("/forecastseries/{}", oid),
            &format!("ForecastSeries \"{}\"", oid),
        )
    }

    pub fn get_forecastseries_by_name(
        &self,
        project: impl Into<Identifier>,
        name: &str,
    ) -> Result<ForecastSeries> {
        let oid = self.resolve_forecastseries(name, Some(project.into()))?;
        self.get_forecastseries(oid)
    }

    /// Resolves a forecast series UUID; names need the owning project.
    pub fn resolve_forecastseries(
        &self,
        forecastseries: impl Into<Identifier>,
        project: Option<Identifier>,
    ) -> Result<Uuid> {
        identifier::resolve_forecastseries(&self.api, &forecastseries.into(), project.as_ref())
    }

    pub fn list_model_configs(&self) -> Result<Vec<ModelConfig>> {
        self.api.list_json("/modelconfigs", "model config list")
    }

    pub fn get_model_config(&self, oid: Uuid) -> Result<ModelConfig> {
        self.api.get_json(
            &format!("/modelconfigs/{}", oid),
            &format!("ModelConfig \"{}\"", oid),
        )
    }

    pub fn get_injection_plan(&self, oid: Uuid) -> Result<InjectionPlanTemplate> {
        self.api.get_json(
            &format!("/injectionplans/{}", oid),
            &format!("InjectionPlan \"{}\"", oid),
        )
    }

    /// Opens a forecast series by UUID, or by name within a project.
    pub fn forecastseries(
        &self,
        forecastseries: impl Into<Identifier>,
        project: Option<Identifier>,
    ) -> Result<ForecastSeriesClient> {
        ForecastSeriesClient::new(self, forecastseries, project)
    }

    /// Opens a forecast by UUID.
    pub fn forecast(&self, oid: Uuid) -> Result<ForecastClient> {
        ForecastClient::from_oid(self, oid)
    }

    /// Wraps an already fetched model run record.
    pub fn model_run(&self, record: Value) -> Result<ModelRunClient> {
        let metadata = validate(&record, "model run")?;
        Ok(ModelRunClient::from_parts(
            self.api.clone(),
            record,
            metadata,
            None,
        ))
    }
}
