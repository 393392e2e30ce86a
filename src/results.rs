//! Decoding of model run result payloads into rate grids.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::util::parse_datetime;

const STARTTIME: &str = "starttime";
const ENDTIME: &str = "endtime";
const OPTIONAL_COLUMNS: [&str; 3] = ["mc", "a", "b"];

/// How a model run's output must be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    Grid,
    Catalog,
    Bins,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grid => "GRID",
            Self::Catalog => "CATALOG",
            Self::Bins => "BINS",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GRID" => Ok(Self::Grid),
            "CATALOG" => Ok(Self::Catalog),
            "BINS" => Ok(Self::Bins),
            other => Err(Error::InvalidArgument(format!(
                "unknown result type '{}'; expected GRID, CATALOG or BINS",
                other
            ))),
        }
    }
}

/// One row of a rate grid.
///
/// Always carries the `mc`, `a` and `b` columns, null when the model did not
/// report them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RateRow {
    columns: IndexMap<String, Value>,
}

impl RateRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.columns
    }

    pub fn grid_id(&self) -> Option<&Value> {
        self.get("grid_id").filter(|v| !v.is_null())
    }

    pub fn mc(&self) -> Option<f64> {
        self.number("mc")
    }

    pub fn a(&self) -> Option<f64> {
        self.number("a")
    }

    pub fn b(&self) -> Option<f64> {
        self.number("b")
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }
}

/// Seismicity rates of one forecast time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateGrid {
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub rows: Vec<RateRow>,
}

impl RateGrid {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decodes a result payload according to its declared result type.
///
/// GRID payloads become one [`RateGrid`] per `(starttime, endtime)` window,
/// sorted ascending by start then end time. CATALOG and BINS are not
/// supported yet and fail with [`Error::Unimplemented`].
pub fn materialize(payload: &[u8], result_type: ResultType) -> Result<Vec<RateGrid>> {
    match result_type {
        ResultType::Grid => rates_to_grids(payload),
        other => Err(Error::Unimplemented(other)),
    }
}

/// Groups already decoded rate records (one run's `rateforecasts`) into grids.
pub(crate) fn grids_from_records(records: Vec<Value>) -> Result<Vec<RateGrid>> {
    group_rows(flatten_records(records)?)
}

fn rates_to_grids(payload: &[u8]) -> Result<Vec<RateGrid>> {
    group_rows(read_rows(payload)?)
}

fn group_rows(rows: Vec<IndexMap<String, Value>>) -> Result<Vec<RateGrid>> {
    let mut groups: BTreeMap<(DateTime<Utc>, DateTime<Utc>), Vec<RateRow>> = BTreeMap::new();
    for (idx, raw) in rows.into_iter().enumerate() {
        let mut columns = normalize_columns(raw);
        let starttime = take_timestamp(&mut columns, STARTTIME, idx)?;
        let endtime = take_timestamp(&mut columns, ENDTIME, idx)?;
        for col in OPTIONAL_COLUMNS {
            columns.entry(col.to_string()).or_insert(Value::Null);
        }
        groups
            .entry((starttime, endtime))
            .or_default()
            .push(RateRow { columns });
    }

    Ok(groups
        .into_iter()
        .map(|((starttime, endtime), rows)| RateGrid {
            starttime,
            endtime,
            rows,
        })
        .collect())
}

fn read_rows(payload: &[u8]) -> Result<Vec<IndexMap<String, Value>>> {
    let start = payload
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(payload.len());
    let payload = &payload[start..];

    match payload.first() {
        None => Ok(Vec::new()),
        Some(b'[') | Some(b'{') => read_json_rows(payload),
        Some(_) => read_csv_rows(payload),
    }
}

fn read_json_rows(payload: &[u8]) -> Result<Vec<IndexMap<String, Value>>> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| Error::decode("result payload", e))?;

    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("rateforecasts") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None if obj.is_empty() => Vec::new(),
            _ => {
                return Err(Error::Payload(
                    "expected a list of rate records or an object with 'rateforecasts'".into(),
                ));
            }
        },
        _ => return Err(Error::Payload("expected a list of rate records".into())),
    };
    flatten_records(records)
}

fn flatten_records(records: Vec<Value>) -> Result<Vec<IndexMap<String, Value>>> {
    records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| match record {
            Value::Object(obj) => {
                let mut row = IndexMap::new();
                flatten_into(&mut row, None, obj);
                Ok(row)
            }
            _ => Err(Error::Payload(format!("rate record {} is not an object", idx))),
        })
        .collect()
}

fn flatten_into(row: &mut IndexMap<String, Value>, prefix: Option<&str>, obj: Map<String, Value>) {
    for (key, value) in obj {
        let key = match prefix {
            Some(p) => format!("{}_{}", p, key),
            None => key,
        };
        match value {
            Value::Object(nested) => flatten_into(row, Some(&key), nested),
            other => {
                row.insert(key, other);
            }
        }
    }
}

fn read_csv_rows(payload: &[u8]) -> Result<Vec<IndexMap<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(payload);
    let headers = reader.headers()?.clone();

    for required in [STARTTIME, ENDTIME] {
        if !headers.iter().any(|h| h == required) {
            return Err(missing_column(required));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.to_string(), parse_cell(cell)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn parse_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    match cell.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::from(f),
        // NaN and friends mark a missing value
        Ok(_) => Value::Null,
        Err(_) => Value::String(cell.to_string()),
    }
}

fn normalize_columns(row: IndexMap<String, Value>) -> IndexMap<String, Value> {
    row.into_iter()
        .map(|(key, value)| {
            let key = key.strip_suffix("_value").unwrap_or(&key);
            let key = if key == "realization_id" {
                "grid_id"
            } else {
                key
            };
            (key.to_string(), value)
        })
        .collect()
}

fn take_timestamp(
    columns: &mut IndexMap<String, Value>,
    column: &str,
    idx: usize,
) -> Result<DateTime<Utc>> {
    match columns.shift_remove(column) {
        Some(Value::String(s)) => parse_datetime(&s).ok_or_else(|| {
            Error::Payload(format!("row {}: invalid {} \"{}\"", idx, column, s))
        }),
        Some(other) => Err(Error::Payload(format!(
            "row {}: invalid {} {}",
            idx, column, other
        ))),
        None => Err(missing_column(column)),
    }
}

fn missing_column(column: &str) -> Error {
    Error::Payload(format!("missing required column '{}'", column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn groups_json_rows_by_window() {
        let payload = json!([
            {"starttime": "2024-01-01T01:00:00", "endtime": "2024-01-01T02:00:00",
             "realization_id": 0, "number_events": {"value": 1.5}, "b": {"value": 1.1}},
            {"starttime": "2024-01-01T00:00:00", "endtime": "2024-01-01T01:00:00",
             "realization_id": 0, "number_events": {"value": 0.5}, "b": {"value": 1.0}},
            {"starttime": "2024-01-01T01:00:00", "endtime": "2024-01-01T02:00:00",
             "realization_id": 1, "number_events": {"value": 2.5}, "b": {"value": 0.9}},
        ]);
        let grids = materialize(payload.to_string().as_bytes(), ResultType::Grid).unwrap();

        assert_eq!(grids.len(), 2);
        assert_eq!((grids[0].starttime, grids[0].endtime), (ts(0), ts(1)));
        assert_eq!((grids[1].starttime, grids[1].endtime), (ts(1), ts(2)));
        assert_eq!(grids[0].len(), 1);
        assert_eq!(grids[1].len(), 2);

        let row = &grids[1].rows[1];
        assert_eq!(row.grid_id(), Some(&json!(1)));
        assert_eq!(row.number("number_events"), Some(2.5));
        assert_eq!(row.b(), Some(0.9));
        assert_eq!(row.mc(), None);
        assert_eq!(row.get("a"), Some(&Value::Null));
        assert!(row.get("starttime").is_none());
        assert!(row.get("realization_id").is_none());
    }

    #[test]
    fn every_row_has_optional_columns() {
        let csv = "starttime,endtime,number_events\n\
                   2024-01-01T00:00:00,2024-01-01T01:00:00,1\n\
                   2024-01-01T01:00:00,2024-01-01T02:00:00,2\n\
                   2024-01-01T00:00:00,2024-01-01T01:00:00,3\n";
        let grids = materialize(csv.as_bytes(), ResultType::Grid).unwrap();
        assert_eq!(grids.len(), 2);
        for row in grids.iter().flat_map(|g| g.rows.iter()) {
            for col in ["mc", "a", "b"] {
                assert_eq!(row.get(col), Some(&Value::Null), "column {col}");
            }
        }
        let first: Vec<_> = grids[0].rows.iter().map(|r| r.number("number_events")).collect();
        assert_eq!(first, vec![Some(1.0), Some(3.0)]);
    }

    #[test]
    fn csv_cells_are_typed() {
        let csv = "starttime,endtime,realization_id,mc,name,alpha\n\
                   2024-01-01T00:00:00Z,2024-01-01T01:00:00Z,4,2.5,cell-a,\n";
        let grids = materialize(csv.as_bytes(), ResultType::Grid).unwrap();
        let row = &grids[0].rows[0];
        assert_eq!(row.grid_id(), Some(&json!(4)));
        assert_eq!(row.mc(), Some(2.5));
        assert_eq!(row.get("name"), Some(&json!("cell-a")));
        assert_eq!(row.get("alpha"), Some(&Value::Null));
    }

    #[test]
    fn wrapped_rateforecasts_are_accepted() {
        let payload = json!({"rateforecasts": [
            {"starttime": "2024-01-01T00:00:00", "endtime": "2024-01-01T01:00:00", "a": {"value": 2.0}}
        ]});
        let grids = materialize(payload.to_string().as_bytes(), ResultType::Grid).unwrap();
        assert_eq!(grids[0].rows[0].a(), Some(2.0));
    }

    #[test]
    fn missing_time_column_is_fatal() {
        let csv = "starttime,number_events\n2024-01-01T00:00:00,1\n";
        let err = materialize(csv.as_bytes(), ResultType::Grid).unwrap_err();
        assert!(matches!(err, Error::Payload(ref m) if m.contains("endtime")));

        let payload = json!([{"endtime": "2024-01-01T00:00:00"}]);
        let err = materialize(payload.to_string().as_bytes(), ResultType::Grid).unwrap_err();
        assert!(matches!(err, Error::Payload(ref m) if m.contains("starttime")));
    }

    #[test]
    fn empty_payload_gives_no_grids() {
        assert!(materialize(b"", ResultType::Grid).unwrap().is_empty());
        assert!(materialize(b"  []", ResultType::Grid).unwrap().is_empty());
        assert!(materialize(b"{}", ResultType::Grid).unwrap().is_empty());
    }

    #[test]
    fn catalog_and_bins_are_unimplemented() {
        let payload = b"[]";
        for rt in [ResultType::Catalog, ResultType::Bins] {
            match materialize(payload, rt) {
                Err(Error::Unimplemented(got)) => assert_eq!(got, rt),
                other => panic!("expected unimplemented, got {other:?}"),
            }
        }
    }

    #[test]
    fn result_type_parses_case_insensitively() {
        assert_eq!("grid".parse::<ResultType>().unwrap(), ResultType::Grid);
        assert_eq!("BINS".parse::<ResultType>().unwrap(), ResultType::Bins);
        assert!(matches!(
            "voxels".parse::<ResultType>(),
            Err(Error::InvalidArgument(_))
        ));
    }
}
