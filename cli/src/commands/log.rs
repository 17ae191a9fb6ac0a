use chrono::NaiveDate;
use clap::{Args, Subcommand};
use serde_json::json;

use qclog_core::error::CoreError;
use qclog_core::logs::{EntryContext, LogItem, LogQuery, MeasuredValue};
use qclog_core::parameters::{Parameter, ParameterCatalog};
use qclog_core::store::LogBackend;
use qclog_core::validation::{self, QUALITATIVE_TOKENS, ValidationResult};

use crate::backend::HttpBackend;
use crate::util::{
    api_request, exit_error, pretty, read_json_from_file, report_core_error,
};

/// Log filters. Every filter takes one value; repeating a flag is an error
/// rather than a silently widened query.
#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    pub date_from: Option<String>,
    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    pub date_to: Option<String>,
    /// Exact day (YYYY-MM-DD)
    #[arg(long)]
    pub on_date: Option<String>,
    #[arg(long)]
    pub shift: Vec<String>,
    #[arg(long)]
    pub line: Vec<String>,
    #[arg(long)]
    pub parameter_id: Vec<String>,
    /// Maximum rows (server default 1000, max 5000)
    #[arg(long)]
    pub limit: Option<i64>,
}

impl FilterArgs {
    pub fn to_query(&self) -> Result<LogQuery, CoreError> {
        let mut pairs: Vec<(&str, String)> = Vec::new();
        for (key, value) in [
            ("date_from", &self.date_from),
            ("date_to", &self.date_to),
            ("on_date", &self.on_date),
        ] {
            if let Some(v) = value {
                pairs.push((key, v.clone()));
            }
        }
        for (key, values) in [
            ("shift", &self.shift),
            ("line", &self.line),
            ("parameter_id", &self.parameter_id),
        ] {
            pairs.extend(values.iter().map(|v| (key, v.clone())));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        LogQuery::from_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
    }
}

#[derive(Subcommand)]
pub enum LogCommands {
    /// Query logged measurements (newest first)
    Query(FilterArgs),
    /// Existing records for one date/shift/line
    Context {
        /// Production date (YYYY-MM-DD), defaults to today in the plant time zone
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        shift: String,
        #[arg(long)]
        line: String,
    },
    /// Record a single measurement
    Record {
        /// Production date (YYYY-MM-DD), defaults to today in the plant time zone
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        shift: String,
        #[arg(long)]
        line: String,
        /// Parameter name as it appears in the catalog
        #[arg(long, required_unless_present = "parameter_id")]
        parameter: Option<String>,
        /// Parameter id (takes precedence over --parameter)
        #[arg(long)]
        parameter_id: Option<i64>,
        #[arg(long, allow_hyphen_values = true)]
        value: String,
        #[arg(long)]
        remark: Option<String>,
        #[arg(long, env = "QCLOG_INSPECTOR")]
        inspector: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Submit a batch of log items atomically from JSON
    Submit {
        /// JSON file with an items array (use '-' for stdin)
        #[arg(long, short = 'f')]
        file: String,
    },
}

pub async fn run(api_url: &str, today: NaiveDate, command: LogCommands) -> i32 {
    match command {
        LogCommands::Query(filters) => query(api_url, &filters).await,
        LogCommands::Context { date, shift, line } => {
            let context = EntryContext {
                date: date.unwrap_or(today),
                shift,
                line,
            };
            match HttpBackend::new(api_url).fetch_context(&context).await {
                Ok(records) => {
                    println!("{}", pretty(&json!(records)));
                    0
                }
                Err(e) => report_core_error(&e),
            }
        }
        LogCommands::Record {
            date,
            shift,
            line,
            parameter,
            parameter_id,
            value,
            remark,
            inspector,
            model,
        } => {
            let draft = RecordDraft {
                date: date.unwrap_or(today),
                shift,
                line,
                parameter,
                parameter_id,
                value,
                remark,
                inspector,
                model,
            };
            record(api_url, draft).await
        }
        LogCommands::Submit { file } => submit(api_url, &file).await,
    }
}

async fn query(api_url: &str, filters: &FilterArgs) -> i32 {
    let query = match filters.to_query() {
        Ok(q) => q,
        Err(e) => return report_core_error(&e),
    };
    let pairs: Vec<(String, String)> = query
        .to_pairs()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    api_request(api_url, reqwest::Method::GET, "/v1/logs", None, &pairs).await
}

struct RecordDraft {
    date: NaiveDate,
    shift: String,
    line: String,
    parameter: Option<String>,
    parameter_id: Option<i64>,
    value: String,
    remark: Option<String>,
    inspector: Option<String>,
    model: Option<String>,
}

/// Resolve against the live catalog, apply the remark rules, then upsert.
async fn record(api_url: &str, draft: RecordDraft) -> i32 {
    let backend = HttpBackend::new(api_url);
    let catalog = match backend.fetch_parameters().await.and_then(ParameterCatalog::new) {
        Ok(c) => c,
        Err(e) => return report_core_error(&e),
    };

    let Some(parameter) = catalog.resolve(draft.parameter_id, draft.parameter.as_deref()) else {
        let reference = draft
            .parameter_id
            .map(|id| id.to_string())
            .or(draft.parameter)
            .unwrap_or_default();
        exit_error(
            &format!("unknown parameter '{reference}'"),
            Some("Run `qclog parameter list` to see the catalog"),
        );
    };

    let value = draft.value.trim().to_string();
    let remark = draft.remark.clone().unwrap_or_default();
    let measured = if parameter.is_qualitative() {
        if !QUALITATIVE_TOKENS.contains(&value.as_str()) {
            exit_error(
                &format!("'{}' accepts only OK or NOT OK", parameter.name),
                None,
            );
        }
        MeasuredValue::Text(value.clone())
    } else {
        match validation::parse_reading(&value) {
            Some(n) => MeasuredValue::Number(n),
            None => exit_error(
                &format!("'{}' needs a numeric value, got '{value}'", parameter.name),
                None,
            ),
        }
    };

    if let ValidationResult::Invalid(message) = validation::evaluate(parameter, &value, &remark) {
        exit_error(&message, Some("Add --remark to explain the reading"));
    }

    let item = record_item(draft, parameter, measured);
    if let Err(e) = item.check_context() {
        return report_core_error(&e);
    }

    let body = match serde_json::to_value(&item) {
        Ok(b) => b,
        Err(e) => exit_error(&format!("Failed to encode log item: {e}"), None),
    };
    api_request(api_url, reqwest::Method::POST, "/v1/logs", Some(body), &[]).await
}

/// Acceptance criteria only travel with qualitative measurements.
fn record_item(draft: RecordDraft, parameter: &Parameter, value: MeasuredValue) -> LogItem {
    let context = EntryContext {
        date: draft.date,
        shift: draft.shift.trim().to_string(),
        line: draft.line.trim().to_string(),
    };
    LogItem {
        log_datetime: context.log_datetime(),
        line_name: context.line,
        shift_name: context.shift,
        model_name: draft.model,
        parameter_id: Some(parameter.id),
        measure_name: Some(parameter.name.clone()),
        value,
        remark: draft.remark,
        inspector_name: draft.inspector,
        criteria: parameter
            .is_qualitative()
            .then(|| parameter.criteria.clone())
            .flatten(),
        unit: parameter.unit.clone(),
        min: parameter.min,
        max: parameter.max,
    }
}

fn parse_items(value: serde_json::Value) -> Result<Vec<LogItem>, String> {
    let items = match value {
        serde_json::Value::Object(mut obj) => obj
            .remove("items")
            .ok_or_else(|| "expected an array or an object with an 'items' array".to_string())?,
        other => other,
    };
    serde_json::from_value(items).map_err(|e| format!("invalid log items: {e}"))
}

async fn submit(api_url: &str, file: &str) -> i32 {
    let items = match read_json_from_file(file).and_then(parse_items) {
        Ok(items) => items,
        Err(message) => exit_error(&message, Some("See POST /v1/logs/batch in /swagger-ui")),
    };

    match HttpBackend::new(api_url).apply_batch(items).await {
        Ok(receipt) => {
            println!(
                "{}",
                pretty(&json!({
                    "inserted": receipt.inserted(),
                    "updated": receipt.updated(),
                    "items": receipt.items,
                }))
            );
            0
        }
        Err(e) => report_core_error(&e),
    }
}
