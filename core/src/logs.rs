use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ContextField, CoreError};

/// Default row cap for filtered queries
pub const DEFAULT_QUERY_LIMIT: i64 = 1000;
/// Hard ceiling for any caller-supplied row cap
pub const MAX_QUERY_LIMIT: i64 = 5000;

/// One data-entry scope: a production day on a line during a shift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EntryContext {
    /// Production date (YYYY-MM-DD)
    pub date: NaiveDate,
    pub shift: String,
    pub line: String,
}

impl EntryContext {
    /// The timestamp every measurement of this context is logged under.
    pub fn log_datetime(&self) -> NaiveDateTime {
        self.date.and_time(NaiveTime::MIN)
    }

    /// Half-open window `[start_of_day, start_of_day + 1 day)`.
    pub fn day_window(&self) -> (NaiveDateTime, NaiveDateTime) {
        day_window(self.date)
    }
}

pub fn day_window(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(NaiveTime::MIN);
    (start, start + TimeDelta::days(1))
}

/// Composite natural key of a log row. At most one row per key is the
/// steady state the upsert protocol maintains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub log_datetime: NaiveDateTime,
    pub line_name: String,
    pub shift_name: String,
    pub parameter_id: i64,
}

/// A submitted measurement. Numbers for quantitative parameters,
/// verdict tokens for qualitative ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum MeasuredValue {
    Number(f64),
    Text(String),
}

impl MeasuredValue {
    /// Text form persisted in `value_recorded`.
    pub fn to_stored(&self) -> String {
        match self {
            MeasuredValue::Number(n) => n.to_string(),
            MeasuredValue::Text(s) => s.trim().to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MeasuredValue::Number(n) => Some(*n),
            MeasuredValue::Text(_) => None,
        }
    }
}

/// One item of a create or batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LogItem {
    #[schema(value_type = String, example = "2024-01-15T00:00:00")]
    pub log_datetime: NaiveDateTime,
    pub line_name: String,
    pub shift_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    /// Parameter id; when absent the parameter is resolved from `measure_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure_name: Option<String>,
    pub value: MeasuredValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_name: Option<String>,
    /// Snapshot of the qualitative acceptance criteria in force
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,
    /// Informational snapshot of the parameter definition; not persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl LogItem {
    /// Header fields every item must carry.
    pub fn check_context(&self) -> Result<(), CoreError> {
        if self.line_name.trim().is_empty() {
            return Err(CoreError::MissingContext {
                field: ContextField::Line,
            });
        }
        if self.shift_name.trim().is_empty() {
            return Err(CoreError::MissingContext {
                field: ContextField::Shift,
            });
        }
        Ok(())
    }

    /// How the item refers to its parameter, for error messages.
    pub fn parameter_reference(&self) -> String {
        match (self.parameter_id, self.measure_name.as_deref()) {
            (Some(id), _) => id.to_string(),
            (None, Some(name)) => name.to_string(),
            (None, None) => "<none>".to_string(),
        }
    }

    pub fn key(&self, parameter_id: i64) -> LogKey {
        LogKey {
            log_datetime: self.log_datetime,
            line_name: self.line_name.trim().to_string(),
            shift_name: self.shift_name.trim().to_string(),
            parameter_id,
        }
    }
}

/// Persisted measurement row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LogRecord {
    pub log_id: i64,
    #[schema(value_type = String, example = "2024-01-15T00:00:00")]
    pub log_datetime: NaiveDateTime,
    pub line_name: String,
    pub shift_name: String,
    #[serde(default)]
    pub model_name: Option<String>,
    pub parameter_id: i64,
    pub value_recorded: String,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub inspector_name: Option<String>,
    #[serde(default)]
    pub criteria: Option<String>,
}

impl LogRecord {
    pub fn key(&self) -> LogKey {
        LogKey {
            log_datetime: self.log_datetime,
            line_name: self.line_name.clone(),
            shift_name: self.shift_name.clone(),
            parameter_id: self.parameter_id,
        }
    }
}

/// Latest row per parameter, where "latest" is the greatest `log_id`.
/// Tolerates legacy duplicate rows for the same key.
pub fn latest_by_parameter(records: &[LogRecord]) -> HashMap<i64, &LogRecord> {
    let mut latest: HashMap<i64, &LogRecord> = HashMap::new();
    for record in records {
        latest
            .entry(record.parameter_id)
            .and_modify(|current| {
                if record.log_id > current.log_id {
                    *current = record;
                }
            })
            .or_insert(record);
    }
    latest
}

/// Query result row: a log joined with parameter display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LogView {
    #[serde(flatten)]
    pub record: LogRecord,
    #[serde(default)]
    pub parameter_name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemReceipt {
    /// Position of the item in the submitted batch (0-based)
    pub index: usize,
    pub log_id: i64,
    pub parameter_id: i64,
    pub outcome: UpsertOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchReceipt {
    pub items: Vec<ItemReceipt>,
}

impl BatchReceipt {
    pub fn inserted(&self) -> usize {
        self.count(UpsertOutcome::Inserted)
    }

    pub fn updated(&self) -> usize {
        self.count(UpsertOutcome::Updated)
    }

    fn count(&self, outcome: UpsertOutcome) -> usize {
        self.items.iter().filter(|i| i.outcome == outcome).count()
    }
}

/// Conjunctive filter set for log queries. Absent filters impose no
/// restriction; each present filter takes exactly one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogQuery {
    /// First day included (YYYY-MM-DD)
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    /// Last day included (YYYY-MM-DD)
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    /// Exact day (YYYY-MM-DD)
    #[serde(default)]
    pub on_date: Option<NaiveDate>,
    #[serde(default)]
    pub shift: Option<String>,
    #[serde(default)]
    pub line: Option<String>,
    #[serde(default)]
    pub parameter_id: Option<i64>,
    /// Maximum rows to return (default 1000, max 5000)
    #[serde(default)]
    pub limit: Option<i64>,
}

const QUERY_KEYS: [&str; 7] = [
    "date_from",
    "date_to",
    "on_date",
    "shift",
    "line",
    "parameter_id",
    "limit",
];

impl LogQuery {
    /// Build a query from raw key/value pairs. A filter key given more than
    /// once is rejected: the contract takes a single value per filter, and
    /// dropping the filter would silently widen the result.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<LogQuery, CoreError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = LogQuery::default();
        let mut seen: Vec<&str> = Vec::new();

        for (key, raw) in pairs {
            let Some(&known) = QUERY_KEYS.iter().find(|k| **k == key) else {
                return Err(query_error(key, format!("unknown filter '{key}'")));
            };
            if seen.contains(&known) {
                return Err(query_error(
                    known,
                    format!("filter '{known}' accepts a single value; got several"),
                ));
            }
            seen.push(known);

            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            match known {
                "date_from" => query.date_from = Some(parse_date(known, value)?),
                "date_to" => query.date_to = Some(parse_date(known, value)?),
                "on_date" => query.on_date = Some(parse_date(known, value)?),
                "shift" => query.shift = Some(value.to_string()),
                "line" => query.line = Some(value.to_string()),
                "parameter_id" => query.parameter_id = Some(parse_int(known, value)?),
                _ => query.limit = Some(parse_int(known, value)?),
            }
        }

        query.check()?;
        Ok(query)
    }

    /// Inverse of [`LogQuery::from_pairs`], for building request URLs.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(d) = self.date_from {
            pairs.push(("date_from", d.to_string()));
        }
        if let Some(d) = self.date_to {
            pairs.push(("date_to", d.to_string()));
        }
        if let Some(d) = self.on_date {
            pairs.push(("on_date", d.to_string()));
        }
        if let Some(s) = &self.shift {
            pairs.push(("shift", s.clone()));
        }
        if let Some(l) = &self.line {
            pairs.push(("line", l.clone()));
        }
        if let Some(p) = self.parameter_id {
            pairs.push(("parameter_id", p.to_string()));
        }
        if let Some(l) = self.limit {
            pairs.push(("limit", l.to_string()));
        }
        pairs
    }

    pub fn check(&self) -> Result<(), CoreError> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(query_error(
                    "date_from",
                    format!("date_from {from} is later than date_to {to}"),
                ));
            }
        }
        if self.limit.is_some_and(|l| l < 1) {
            return Err(query_error("limit", "limit must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Row cap after applying the default and the hard ceiling.
    pub fn effective_limit(&self, default_limit: i64) -> i64 {
        self.limit
            .unwrap_or(default_limit)
            .clamp(1, MAX_QUERY_LIMIT)
    }

    /// Combined `[lower, upper)` timestamp window from the date filters.
    pub fn window(&self) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
        let mut lower = self.date_from.map(|d| day_window(d).0);
        let mut upper = self.date_to.map(|d| day_window(d).1);

        if let Some(on) = self.on_date {
            let (start, end) = day_window(on);
            lower = Some(lower.map_or(start, |l| l.max(start)));
            upper = Some(upper.map_or(end, |u| u.min(end)));
        }
        (lower, upper)
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        let (lower, upper) = self.window();
        lower.is_none_or(|l| record.log_datetime >= l)
            && upper.is_none_or(|u| record.log_datetime < u)
            && self.shift.as_deref().is_none_or(|s| record.shift_name == s)
            && self.line.as_deref().is_none_or(|l| record.line_name == l)
            && self.parameter_id.is_none_or(|p| record.parameter_id == p)
    }
}

fn query_error(field: &str, message: String) -> CoreError {
    CoreError::InvalidFilter {
        field: field.to_string(),
        message,
    }
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, CoreError> {
    // Accept full timestamps too; only the day part matters.
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| query_error(field, format!("{field} must be a date (YYYY-MM-DD), got '{raw}'")))
}

fn parse_int(field: &str, raw: &str) -> Result<i64, CoreError> {
    raw.parse::<i64>()
        .map_err(|_| query_error(field, format!("{field} must be an integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
    }

    fn record(log_id: i64, parameter_id: i64, day: &str, shift: &str, line: &str) -> LogRecord {
        LogRecord {
            log_id,
            log_datetime: date(day).and_time(NaiveTime::MIN),
            line_name: line.to_string(),
            shift_name: shift.to_string(),
            model_name: None,
            parameter_id,
            value_recorded: "1".to_string(),
            remarks: None,
            inspector_name: None,
            criteria: None,
        }
    }

    #[test]
    fn measured_value_stores_numbers_without_trailing_zeroes() {
        assert_eq!(MeasuredValue::Number(250.0).to_stored(), "250");
        assert_eq!(MeasuredValue::Number(39.5).to_stored(), "39.5");
        assert_eq!(MeasuredValue::Text(" NOT OK ".into()).to_stored(), "NOT OK");
    }

    #[test]
    fn measured_value_deserializes_untagged() {
        let n: MeasuredValue = serde_json::from_str("250").expect("number");
        let t: MeasuredValue = serde_json::from_str("\"OK\"").expect("text");
        assert_eq!(n, MeasuredValue::Number(250.0));
        assert_eq!(t, MeasuredValue::Text("OK".into()));
    }

    #[test]
    fn latest_by_parameter_picks_greatest_log_id() {
        let records = vec![
            record(7, 1, "2024-01-15", "A", "L1"),
            record(9, 1, "2024-01-15", "A", "L1"),
            record(3, 2, "2024-01-15", "A", "L1"),
        ];
        let latest = latest_by_parameter(&records);
        assert_eq!(latest[&1].log_id, 9);
        assert_eq!(latest[&2].log_id, 3);
    }

    #[test]
    fn repeated_filter_is_rejected_not_dropped() {
        let err = LogQuery::from_pairs([("shift", "A"), ("shift", "B")])
            .expect_err("multi-value shift must fail");
        match err {
            CoreError::InvalidFilter { field, .. } => assert_eq!(field, "shift"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn from_pairs_parses_and_skips_blank_values() {
        let query = LogQuery::from_pairs([
            ("date_from", "2024-01-01"),
            ("date_to", "2024-01-31T00:00:00"),
            ("line", ""),
            ("parameter_id", "3"),
        ])
        .expect("valid query");
        assert_eq!(query.date_from, Some(date("2024-01-01")));
        assert_eq!(query.date_to, Some(date("2024-01-31")));
        assert_eq!(query.line, None);
        assert_eq!(query.parameter_id, Some(3));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(LogQuery::from_pairs([("date_from", "2024-02-01"), ("date_to", "2024-01-01")]).is_err());
    }

    #[test]
    fn date_to_includes_the_whole_day() {
        let query = LogQuery {
            date_from: Some(date("2024-01-10")),
            date_to: Some(date("2024-01-15")),
            ..Default::default()
        };
        assert!(query.matches(&record(1, 1, "2024-01-15", "A", "L1")));
        assert!(query.matches(&record(1, 1, "2024-01-10", "A", "L1")));
        assert!(!query.matches(&record(1, 1, "2024-01-16", "A", "L1")));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(LogQuery::default().matches(&record(1, 1, "1999-12-31", "Z", "Q")));
    }

    #[test]
    fn filters_are_conjunctive() {
        let query = LogQuery {
            on_date: Some(date("2024-01-15")),
            shift: Some("A".into()),
            line: Some("L1".into()),
            ..Default::default()
        };
        assert!(query.matches(&record(1, 1, "2024-01-15", "A", "L1")));
        assert!(!query.matches(&record(1, 1, "2024-01-15", "B", "L1")));
        assert!(!query.matches(&record(1, 1, "2024-01-15", "A", "L2")));
    }

    #[test]
    fn effective_limit_is_clamped() {
        let mut query = LogQuery::default();
        assert_eq!(query.effective_limit(DEFAULT_QUERY_LIMIT), 1000);
        query.limit = Some(1_000_000);
        assert_eq!(query.effective_limit(DEFAULT_QUERY_LIMIT), MAX_QUERY_LIMIT);
    }
}
