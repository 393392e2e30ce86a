//! In-memory transport and fixtures for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::client::HermesClient;
use crate::error::{Error, Result};
use crate::transport::{HttpResponse, Transport};

pub(crate) const BASE: &str = "http://hermes.test";

pub(crate) const PROJECT_OID: Uuid = Uuid::from_u128(0x8c1a_0f2e_4b7d_4c55_9a11_2b3c4d5e6f70);
pub(crate) const FS_OID: Uuid = Uuid::from_u128(0x0d7c_0f36_7e0b_4a53_8f63_55d6a1d33a10);
pub(crate) const FC1_OID: Uuid = Uuid::from_u128(0x1111_0000_0000_4000_8000_000000000001);
pub(crate) const FC2_OID: Uuid = Uuid::from_u128(0x1111_0000_0000_4000_8000_000000000002);
pub(crate) const FC3_OID: Uuid = Uuid::from_u128(0x1111_0000_0000_4000_8000_000000000003);
pub(crate) const FC4_OID: Uuid = Uuid::from_u128(0x1111_0000_0000_4000_8000_000000000004);
pub(crate) const RUN_A: Uuid = Uuid::from_u128(0x2222_0000_0000_4000_8000_00000000000a);
pub(crate) const RUN_B: Uuid = Uuid::from_u128(0x2222_0000_0000_4000_8000_00000000000b);
pub(crate) const RUN_C: Uuid = Uuid::from_u128(0x2222_0000_0000_4000_8000_00000000000c);
pub(crate) const RUN_D: Uuid = Uuid::from_u128(0x2222_0000_0000_4000_8000_00000000000d);
pub(crate) const MC_ETAS: Uuid = Uuid::from_u128(0x3333_0000_0000_4000_8000_000000000001);
pub(crate) const MC_EM1: Uuid = Uuid::from_u128(0x3333_0000_0000_4000_8000_000000000002);
pub(crate) const IP_LOW: Uuid = Uuid::from_u128(0x4444_0000_0000_4000_8000_000000000001);
pub(crate) const IP_HIGH: Uuid = Uuid::from_u128(0x4444_0000_0000_4000_8000_000000000002);

/// Routes GETs by path below `/v1`; unknown paths answer 404.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Rc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    routes: RefCell<HashMap<String, HttpResponse>>,
    failing: RefCell<HashSet<String>>,
    calls: RefCell<Vec<String>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn url(path: &str) -> String {
        format!("{}/v1{}", BASE, path)
    }

    pub(crate) fn respond(&self, path: &str, status: StatusCode, body: impl Into<Vec<u8>>) {
        self.inner
            .routes
            .borrow_mut()
            .insert(Self::url(path), HttpResponse::new(status, body));
    }

    pub(crate) fn json(&self, path: &str, body: Value) {
        self.respond(path, StatusCode::OK, body.to_string());
    }

    pub(crate) fn text(&self, path: &str, body: &str) {
        self.respond(path, StatusCode::OK, body);
    }

    pub(crate) fn status(&self, path: &str, status: StatusCode) {
        self.respond(path, status, Vec::new());
    }

    /// The next request to `path` fails before reaching the server.
    pub(crate) fn fail_once(&self, path: &str) {
        self.inner.failing.borrow_mut().insert(Self::url(path));
    }

    pub(crate) fn calls(&self) -> usize {
        self.inner.calls.borrow().len()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        let url = Self::url(path);
        self.inner.calls.borrow().iter().filter(|c| **c == url).count()
    }

    pub(crate) fn client(&self) -> HermesClient {
        HermesClient::with_transport(BASE, self.clone())
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.inner.calls.borrow_mut().push(url.to_string());
        if self.inner.failing.borrow_mut().remove(url) {
            return Err(Error::Transport {
                url: url.to_string(),
                source: "connection reset by peer".into(),
            });
        }
        Ok(self
            .inner
            .routes
            .borrow()
            .get(url)
            .cloned()
            .unwrap_or_else(|| HttpResponse::new(StatusCode::NOT_FOUND, Vec::new())))
    }
}

pub(crate) fn etas_config() -> Value {
    json!({
        "oid": MC_ETAS,
        "name": "etas",
        "enabled": true,
        "result_type": "GRID",
        "sfm_module": "etas.oef",
        "sfm_function": "entrypoint_suiETAS",
        "model_parameters": {"theta_0": {"log10_mu": -6.2}, "mc": 0.8},
        "tags": ["etas"]
    })
}

pub(crate) fn em1_config() -> Value {
    json!({
        "oid": MC_EM1,
        "name": "em1",
        "enabled": true,
        "result_type": "GRID",
        "sfm_module": "em1.model",
        "sfm_function": "run",
        "model_parameters": {},
        "tags": []
    })
}

fn plan(oid: Uuid, name: &str, rate: f64) -> Value {
    json!({
        "oid": oid,
        "name": name,
        "borehole_hydraulics": {
            "publicid": format!("borehole-{}", name),
            "sections": [{"hydraulics": [{"topflow": {"value": rate}}]}]
        }
    })
}

pub(crate) fn plan_low() -> Value {
    plan(IP_LOW, "plan-low", 0.01)
}

pub(crate) fn plan_high() -> Value {
    plan(IP_HIGH, "plan-high", 0.05)
}

fn run(oid: Uuid, config: Value, injectionplan: Value) -> Value {
    json!({
        "oid": oid,
        "status": "COMPLETED",
        "modelconfig": config,
        "injectionplan": injectionplan,
    })
}

pub(crate) fn forecast_records() -> Vec<Value> {
    vec![
        json!({
            "oid": FC1_OID,
            "status": "COMPLETED",
            "starttime": "2022-04-21T00:00:00",
            "endtime": "2022-04-22T00:00:00",
            "creationinfo": {"creationtime": "2022-04-21T00:00:05"},
            "modelruns": [
                run(RUN_A, etas_config(), plan_low()),
                run(RUN_B, etas_config(), plan_high()),
                run(RUN_C, em1_config(), plan_low()),
            ]
        }),
        json!({
            "oid": FC2_OID,
            "status": "COMPLETED",
            "starttime": "2022-04-22T00:00:00",
            "endtime": "2022-04-23T00:00:00",
            "modelruns": [run(RUN_D, etas_config(), Value::Null)]
        }),
        json!({
            "oid": FC3_OID,
            "status": "COMPLETED",
            "starttime": "2022-04-23T00:00:00",
            "endtime": "2022-04-24T00:00:00",
            "modelruns": []
        }),
        json!({
            "oid": FC4_OID,
            "status": "RUNNING",
            "starttime": "2022-04-24T00:00:00",
            "endtime": "2022-04-25T00:00:00",
            "modelruns": []
        }),
    ]
}

pub(crate) fn series_record() -> Value {
    json!({
        "oid": FS_OID,
        "project_oid": PROJECT_OID,
        "name": "bedretto-2022",
        "status": "ACTIVE",
        "bounding_polygon": "POLYGON ((8.47 46.50, 8.48 46.50, 8.48 46.51, 8.47 46.51, 8.47 46.50))",
        "depth_min": 0.0,
        "depth_max": 1.0,
        "tags": ["bedretto"],
        "fdsnws_url": "http://fdsnws.test/fdsnws/event/1/query",
        "hydws_url": "http://hydws.test/hydws/v1/boreholes",
        "observation_starttime": "2022-04-20T00:00:00",
        "observation_window": 86400,
        "injectionplans": [{"name": "plan-low"}, {"name": "plan-high"}],
        "modelconfigs": [{"name": "etas"}, {"name": "em1"}],
        "model_settings": {"fdsnws_url": "http://fdsnws.test", "bounding_polygon": null}
    })
}

pub(crate) const GRID_A: &str = r#"[
    {"starttime": "2022-04-21T00:00:00", "endtime": "2022-04-21T12:00:00",
     "realization_id": 0, "number_events": {"value": 1.2}, "b": {"value": 1.1}},
    {"starttime": "2022-04-21T12:00:00", "endtime": "2022-04-22T00:00:00",
     "realization_id": 0, "number_events": {"value": 0.7}, "b": {"value": 1.1}},
    {"starttime": "2022-04-21T00:00:00", "endtime": "2022-04-21T12:00:00",
     "realization_id": 1, "number_events": {"value": 1.4}, "b": {"value": 1.0}}
]"#;

pub(crate) const GRID_B: &str = "starttime,endtime,realization_id,number_events,mc\n\
    2022-04-21T00:00:00,2022-04-22T00:00:00,0,3.1,0.8\n";

/// A fully populated HERMES instance with one project and series.
pub(crate) fn fixtures() -> MockTransport {
    let mock = MockTransport::new();

    mock.json(
        "/projects",
        json!([{"oid": PROJECT_OID, "name": "induced", "description": "Induced seismicity"}]),
    );
    mock.json(
        &format!("/projects/{}", PROJECT_OID),
        json!({"oid": PROJECT_OID, "name": "induced"}),
    );
    mock.json(
        &format!("/projects/{}/forecastseries", PROJECT_OID),
        json!([series_record()]),
    );
    mock.json(&format!("/forecastseries/{}", FS_OID), series_record());
    mock.json(
        &format!("/forecastseries/{}/forecasts", FS_OID),
        // served out of order; the client sorts by starttime
        json!([
            forecast_records()[2],
            forecast_records()[0],
            forecast_records()[3],
            forecast_records()[1]
        ]),
    );
    mock.json(
        &format!("/forecastseries/{}/modelconfigs", FS_OID),
        json!([etas_config(), em1_config()]),
    );
    mock.json(
        &format!("/forecastseries/{}/injectionplans", FS_OID),
        json!([plan_low(), plan_high()]),
    );
    for record in forecast_records() {
        let oid = record["oid"].as_str().unwrap_or_default().to_string();
        mock.json(&format!("/forecasts/{}", oid), record);
    }
    mock.text(
        &format!("/forecasts/{}/seismicityobservation", FC1_OID),
        "<?xml version=\"1.0\"?><q:quakeml xmlns:q=\"http://quakeml.org/xmlns/quakeml/1.2\"/>",
    );
    mock.json(
        &format!("/forecasts/{}/injectionobservations", FC1_OID),
        json!([{"publicid": "smi:ch.ethz.sed/bh/ST1", "sections": []}]),
    );
    mock.text(&format!("/modelruns/{}/results", RUN_A), GRID_A);
    mock.text(&format!("/modelruns/{}/results", RUN_B), GRID_B);
    mock.status(&format!("/modelruns/{}/results", RUN_C), StatusCode::NO_CONTENT);
    mock.text(
        &format!("/modelruns/{}/rates", RUN_A),
        &format!(r#"{{"oid": "{}", "rateforecasts": {}}}"#, RUN_A, GRID_A),
    );
    mock.json(&format!("/modelruns/{}/modelconfig", RUN_A), etas_config());
    mock.json(&format!("/modelruns/{}/injectionplan", RUN_A), plan_low());
    mock.json(&format!("/modelruns/{}/modelconfig", RUN_D), etas_config());
    mock.json(&format!("/modelconfigs/{}", MC_ETAS), etas_config());
    mock.json(&format!("/injectionplans/{}", IP_LOW), plan_low());

    mock
}
