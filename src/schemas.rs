//! Validated views over the JSON records returned by HERMES.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::results::ResultType;
use crate::util::{deserialize_names, deserialize_null_default, deserialize_opt_datetime};

/// Lifecycle state of a forecast or model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Scheduled,
    Paused,
    Running,
    Cancelled,
    Failed,
    Completed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Paused => "PAUSED",
            Self::Running => "RUNNING",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(Value::String(s.trim().to_ascii_uppercase()))
            .map_err(|_| Error::InvalidArgument(format!("unknown status '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub oid: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub starttime: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub endtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creationinfo: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    pub oid: Uuid,
    #[serde(default)]
    pub project_oid: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Area of interest as WKT.
    #[serde(default)]
    pub bounding_polygon: Option<String>,
    #[serde(default)]
    pub depth_min: Option<f64>,
    #[serde(default)]
    pub depth_max: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub seismicityobservation_required: Option<String>,
    #[serde(default)]
    pub injectionobservation_required: Option<String>,
    #[serde(default)]
    pub fdsnws_url: Option<String>,
    #[serde(default)]
    pub hydws_url: Option<String>,
    #[serde(default)]
    pub creationinfo: Option<Value>,
    /// Names of the attached injection plans, sorted.
    #[serde(default, deserialize_with = "deserialize_names")]
    pub injectionplans: Vec<String>,
    /// Names of the attached model configs, sorted.
    #[serde(default, deserialize_with = "deserialize_names")]
    pub modelconfigs: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub observation_starttime: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub observation_endtime: Option<DateTime<Utc>>,
    /// Observation window length in seconds.
    #[serde(default)]
    pub observation_window: Option<i64>,
    #[serde(default)]
    pub model_settings: Option<Value>,
}

/// A hydraulic schedule in HYDWS layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoreholeHydraulics {
    #[serde(default)]
    pub publicid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub sections: Vec<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionPlanTemplate {
    #[serde(default)]
    pub oid: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub borehole_hydraulics: Option<BoreholeHydraulics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub oid: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result_type: Option<ResultType>,
    #[serde(default)]
    pub sfm_module: Option<String>,
    #[serde(default)]
    pub sfm_function: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub model_parameters: Map<String, Value>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tags: Vec<String>,
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastInfo {
    pub oid: Uuid,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub starttime: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_opt_datetime")]
    pub endtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub creationinfo: Option<Value>,
    /// Sorted names of the injection plans used by this forecast's model runs.
    #[serde(skip_deserializing)]
    pub injectionplans: Vec<String>,
    /// Sorted names of the model configs used by this forecast's model runs.
    #[serde(skip_deserializing)]
    pub modelconfigs: Vec<String>,
}

/// A model run as embedded in its forecast.
///
/// `injectionplan` and `modelconfig` hold names; `result_type` is the embedded
/// model config's value, or the run's own when the config does not carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawModelRun")]
pub struct ModelRunInfo {
    pub oid: Uuid,
    pub status: Option<Status>,
    pub result_type: Option<ResultType>,
    pub injectionplan: Option<String>,
    pub modelconfig: Option<String>,
}

#[derive(Deserialize)]
struct RawModelRun {
    oid: Uuid,
    #[serde(default)]
    status: Option<Status>,
    #[serde(default)]
    result_type: Option<ResultType>,
    #[serde(default)]
    injectionplan: Option<EmbeddedRef>,
    #[serde(default)]
    modelconfig: Option<EmbeddedRef>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddedRef {
    Name(String),
    Record {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        result_type: Option<ResultType>,
    },
}

impl EmbeddedRef {
    fn name(&self) -> Option<&str> {
        match self {
            Self::Name(n) => Some(n),
            Self::Record { name, .. } => name.as_deref(),
        }
    }

    fn result_type(&self) -> Option<ResultType> {
        match self {
            Self::Name(_) => None,
            Self::Record { result_type, .. } => *result_type,
        }
    }
}

impl From<RawModelRun> for ModelRunInfo {
    fn from(raw: RawModelRun) -> Self {
        let result_type = raw
            .modelconfig
            .as_ref()
            .and_then(EmbeddedRef::result_type)
            .or(raw.result_type);
        Self {
            oid: raw.oid,
            status: raw.status,
            result_type,
            injectionplan: raw
                .injectionplan
                .as_ref()
                .and_then(|r| r.name().map(str::to_string)),
            modelconfig: raw
                .modelconfig
                .as_ref()
                .and_then(|r| r.name().map(str::to_string)),
        }
    }
}

/// Minimal view used when searching a listing by name.
#[derive(Debug, Deserialize)]
pub(crate) struct NamedRecord {
    pub(crate) oid: Uuid,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

/// Validates and coerces a raw JSON record into a typed view.
pub(crate) fn validate<T: DeserializeOwned>(record: &Value, what: &str) -> Result<T> {
    T::deserialize(record).map_err(|e| Error::decode(what, e))
}
