use reqwest::StatusCode;
use thiserror::Error;

use crate::results::ResultType;

/// Errors returned by the HERMES client.
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced a response (connection failure, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The service answered with a non-success status other than "no content".
    #[error("API request failed: HTTP {status} for url ({url})\n{message}")]
    Status {
        status: StatusCode,
        url: String,
        message: String,
    },

    /// The resource is absent, or a name search found no match.
    #[error("{0}")]
    NotFound(String),

    /// A name was given without a parent scope to search in.
    #[error(
        "cannot resolve {kind} \"{name}\" by name without a parent scope; \
         provide its UUID or the name/UUID of its parent"
    )]
    MissingScope { kind: &'static str, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filtering by injection plan on a forecast whose model runs carry none.
    #[error("forecast {forecast} has no model runs with an injection plan")]
    NoInjectionPlans { forecast: String },

    #[error("materializing {0} results is not implemented")]
    Unimplemented(ResultType),

    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed result payload: {0}")]
    Payload(String),

    #[error("failed to read CSV result payload: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// FastAPI answers errors with {"detail": ...}; some proxies use {"message": ...}.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) detail: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
}

pub(crate) fn format_api_error(status: StatusCode, url: &str, body: &[u8]) -> Error {
    let message = match serde_json::from_slice::<ApiErrorResponse>(body) {
        Ok(e) => {
            let title = e.title.as_deref().or(e.message.as_deref()).unwrap_or("");
            let detail = match &e.detail {
                Some(serde_json::Value::String(s)) => s.clone(),
                // validation errors come back as a list of objects
                Some(other) => other.to_string(),
                None => String::new(),
            };
            match (title.is_empty(), detail.is_empty()) {
                (false, false) => format!("{}\n{}", title, detail),
                (false, true) => title.to_string(),
                _ => detail,
            }
        }
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };

    Error::Status {
        status,
        url: url.to_string(),
        message,
    }
}
