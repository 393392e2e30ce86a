//! Name-or-UUID identifiers and their resolution to oids.
//!
//! A UUID is accepted as is. A name is only unique inside its parent, so it is
//! looked up in the parent's child listing: Projects are searched in
//! `/projects`, ForecastSeries in `/projects/{oid}/forecastseries`, with the
//! project itself given by UUID or name.

use std::fmt;

use tracing::debug;
use uuid::Uuid;

use crate::client::Api;
use crate::error::{Error, Result};
use crate::schemas::NamedRecord;

/// A resource reference: either its oid or its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Oid(Uuid),
    Name(String),
}

impl Identifier {
    /// Classifies `value`: anything that parses as a UUID is an oid.
    pub fn parse(value: &str) -> Self {
        match Uuid::parse_str(value.trim()) {
            Ok(oid) => Self::Oid(oid),
            Err(_) => Self::Name(value.to_string()),
        }
    }

    pub fn as_oid(&self) -> Option<Uuid> {
        match self {
            Self::Oid(oid) => Some(*oid),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oid(oid) => write!(f, "{}", oid),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<Uuid> for Identifier {
    fn from(oid: Uuid) -> Self {
        Self::Oid(oid)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&String> for Identifier {
    fn from(value: &String) -> Self {
        Self::parse(value)
    }
}

pub(crate) fn resolve_project(api: &Api, project: &Identifier) -> Result<Uuid> {
    match project {
        Identifier::Oid(oid) => Ok(*oid),
        Identifier::Name(name) => search(api, "/projects", "Project", name).and_then(|found| {
            found.ok_or_else(|| {
                Error::NotFound(format!(
                    "Project with name \"{}\" not found. Please provide a valid Project name or UUID.",
                    name
                ))
            })
        }),
    }
}

pub(crate) fn resolve_forecastseries(
    api: &Api,
    forecastseries: &Identifier,
    project: Option<&Identifier>,
) -> Result<Uuid> {
    let name = match forecastseries {
        Identifier::Oid(oid) => return Ok(*oid),
        Identifier::Name(name) => name,
    };
    let project = project.ok_or_else(|| Error::MissingScope {
        kind: "ForecastSeries",
        name: name.clone(),
    })?;

    let project_oid = resolve_project(api, project)?;
    let path = format!("/projects/{}/forecastseries", project_oid);
    search(api, &path, "ForecastSeries", name)?.ok_or_else(|| {
        Error::NotFound(format!(
            "ForecastSeries with name \"{}\" for Project \"{}\" not found. \
             Please provide a valid Project and ForecastSeries name.",
            name, project
        ))
    })
}

/// First entry of the listing at `path` whose name equals `name` exactly.
fn search(api: &Api, path: &str, kind: &str, name: &str) -> Result<Option<Uuid>> {
    let listing: Vec<NamedRecord> = api.list_json(path, &format!("{} list", kind))?;
    let found = listing
        .into_iter()
        .find(|r| r.name.as_deref() == Some(name))
        .map(|r| r.oid);
    api.in_sink(|| debug!(kind, name, ?found, "resolved by name"));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FS_OID, MockTransport, PROJECT_OID, fixtures};

    #[test]
    fn parse_classifies_uuid_and_names() {
        let oid = Uuid::new_v4();
        assert_eq!(Identifier::parse(&oid.to_string()), Identifier::Oid(oid));
        assert_eq!(Identifier::from("bedretto"), Identifier::Name("bedretto".into()));
        assert_eq!(Identifier::from(oid).as_oid(), Some(oid));
    }

    #[test]
    fn uuid_resolves_without_network() {
        let mock = MockTransport::new();
        let client = mock.client();
        for _ in 0..5 {
            let oid = Uuid::new_v4();
            assert_eq!(client.resolve_project(oid.to_string()).unwrap(), oid);
            assert_eq!(client.resolve_forecastseries(oid, None).unwrap(), oid);
        }
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn name_resolves_through_parent_listing() {
        let mock = fixtures();
        let client = mock.client();

        let by_project_oid = client
            .resolve_forecastseries("bedretto-2022", Some(PROJECT_OID.into()))
            .unwrap();
        assert_eq!(by_project_oid, FS_OID);
        assert_eq!(mock.calls_to("/projects"), 0);

        let by_project_name = client
            .resolve_forecastseries("bedretto-2022", Some("induced".into()))
            .unwrap();
        assert_eq!(by_project_name, FS_OID);
        assert_eq!(mock.calls_to("/projects"), 1);
    }

    #[test]
    fn name_match_is_exact() {
        let mock = fixtures();
        let err = mock
            .client()
            .resolve_forecastseries("Bedretto-2022", Some(PROJECT_OID.into()))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn name_without_scope_is_rejected() {
        let mock = fixtures();
        let err = mock
            .client()
            .resolve_forecastseries("bedretto-2022", None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingScope { kind: "ForecastSeries", .. }));
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn unknown_project_is_not_found() {
        let mock = fixtures();
        let err = mock
            .client()
            .resolve_forecastseries("bedretto-2022", Some("elsewhere".into()))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Project"));
    }

    #[test]
    fn empty_parent_listing_is_not_found() {
        let mock = fixtures();
        let other = Uuid::new_v4();
        let err = mock
            .client()
            .resolve_forecastseries("bedretto-2022", Some(other.into()))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
