use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};

use qclog_core::error::{ApiError, ContextField, CoreError};
use qclog_core::logs::{
    BatchReceipt, EntryContext, ItemReceipt, LogItem, LogQuery, LogRecord, LogView,
    MAX_QUERY_LIMIT, UpsertOutcome,
};
use qclog_core::store::blank_to_none;

use crate::error::AppError;
use crate::state::AppState;

/// Largest batch accepted by `POST /v1/logs/batch`.
pub const MAX_BATCH_ITEMS: usize = 500;

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/logs", post(create_log))
        .route("/v1/logs/batch", post(apply_batch))
}

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/logs", get(query_logs))
        .route("/v1/logs/context", get(context_logs))
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct LogBatchRequest {
    pub items: Vec<LogItem>,
}

#[derive(sqlx::FromRow)]
pub struct LogRow {
    log_id: i64,
    log_datetime: NaiveDateTime,
    line_name: String,
    shift_name: String,
    model_name: Option<String>,
    parameter_id: i64,
    value_recorded: String,
    remarks: Option<String>,
    inspector_name: Option<String>,
    criteria: Option<String>,
    parameter_name: Option<String>,
    unit: Option<String>,
}

impl LogRow {
    pub fn into_record(self) -> LogRecord {
        LogRecord {
            log_id: self.log_id,
            log_datetime: self.log_datetime,
            line_name: self.line_name,
            shift_name: self.shift_name,
            model_name: self.model_name,
            parameter_id: self.parameter_id,
            value_recorded: self.value_recorded,
            remarks: self.remarks,
            inspector_name: self.inspector_name,
            criteria: self.criteria,
        }
    }

    pub fn into_view(mut self) -> LogView {
        let parameter_name = self.parameter_name.take();
        let unit = self.unit.take();
        LogView {
            record: self.into_record(),
            parameter_name,
            unit,
        }
    }
}

async fn resolve_parameter_id(
    conn: &mut PgConnection,
    item: &LogItem,
    index: usize,
) -> Result<i64, AppError> {
    let name = item
        .measure_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let found = match (item.parameter_id, name) {
        (Some(id), _) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM parameters WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        }
        (None, Some(name)) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM parameters WHERE name = $1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?
        }
        (None, None) => None,
    };

    found.ok_or_else(|| {
        CoreError::UnknownParameter {
            index,
            reference: item.parameter_reference(),
        }
        .into()
    })
}

/// Probe for the newest row with the item's key, then update it or insert
/// a fresh one.
async fn upsert_item(
    conn: &mut PgConnection,
    item: &LogItem,
    index: usize,
) -> Result<ItemReceipt, AppError> {
    let parameter_id = resolve_parameter_id(conn, item, index).await?;
    let key = item.key(parameter_id);

    let value = item.value.to_stored();
    let remark = blank_to_none(item.remark.as_deref());
    let criteria = blank_to_none(item.criteria.as_deref());
    let inspector = blank_to_none(item.inspector_name.as_deref());
    let model = blank_to_none(item.model_name.as_deref());

    let existing = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT log_id
        FROM parameter_logs
        WHERE log_datetime = $1
          AND line_name = $2
          AND shift_name = $3
          AND parameter_id = $4
        ORDER BY log_id DESC
        LIMIT 1
        "#,
    )
    .bind(key.log_datetime)
    .bind(&key.line_name)
    .bind(&key.shift_name)
    .bind(key.parameter_id)
    .fetch_optional(&mut *conn)
    .await?;

    let (log_id, outcome) = match existing {
        Some(log_id) => {
            sqlx::query(
                r#"
                UPDATE parameter_logs
                SET value_recorded = $2,
                    remarks = $3,
                    criteria = $4,
                    inspector_name = $5,
                    model_name = $6,
                    updated_at = now()
                WHERE log_id = $1
                "#,
            )
            .bind(log_id)
            .bind(&value)
            .bind(&remark)
            .bind(&criteria)
            .bind(&inspector)
            .bind(&model)
            .execute(&mut *conn)
            .await?;
            (log_id, UpsertOutcome::Updated)
        }
        None => {
            let log_id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO parameter_logs
                    (log_datetime, line_name, shift_name, model_name, parameter_id,
                     value_recorded, remarks, inspector_name, criteria)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING log_id
                "#,
            )
            .bind(key.log_datetime)
            .bind(&key.line_name)
            .bind(&key.shift_name)
            .bind(&model)
            .bind(key.parameter_id)
            .bind(&value)
            .bind(&remark)
            .bind(&inspector)
            .bind(&criteria)
            .fetch_one(&mut *conn)
            .await?;
            (log_id, UpsertOutcome::Inserted)
        }
    };

    tracing::debug!(index, log_id, parameter_id, outcome = ?outcome, "log item applied");

    Ok(ItemReceipt {
        index,
        log_id,
        parameter_id,
        outcome,
    })
}

/// Write every item in one transaction. The first failing item rolls the
/// whole batch back.
pub async fn write_batch(pool: &PgPool, items: &[LogItem]) -> Result<BatchReceipt, AppError> {
    if items.is_empty() {
        return Err(AppError::NoData {
            field: Some("items".to_string()),
        });
    }

    // Validate all items before writing any
    for (i, item) in items.iter().enumerate() {
        item.check_context()
            .map_err(|e| AppError::from(e).at_item(i))?;
    }

    let mut tx = pool.begin().await?;
    let mut receipts = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        match upsert_item(&mut tx, item, index).await {
            Ok(receipt) => receipts.push(receipt),
            Err(err) => {
                tracing::warn!(index, items = items.len(), "log batch rolled back");
                return Err(after_rollback(err, tx.rollback().await));
            }
        }
    }

    tx.commit().await?;

    let receipt = BatchReceipt { items: receipts };
    tracing::info!(
        inserted = receipt.inserted(),
        updated = receipt.updated(),
        "log batch committed"
    );
    Ok(receipt)
}

/// Single-item upsert, atomic on its own.
/// The item error always wins over a failed rollback, which is only logged.
fn after_rollback(err: AppError, rollback: Result<(), sqlx::Error>) -> AppError {
    if let Err(rollback_err) = rollback {
        tracing::error!(error = %rollback_err, cause = ?err, "log batch rollback failed");
    }
    err
}

pub async fn write_one(pool: &PgPool, item: &LogItem) -> Result<ItemReceipt, AppError> {
    item.check_context()?;

    let mut tx = pool.begin().await?;
    let receipt = upsert_item(&mut tx, item, 0).await?;
    tx.commit().await?;
    Ok(receipt)
}

pub async fn select_logs(
    pool: &PgPool,
    query: &LogQuery,
    default_limit: i64,
) -> Result<Vec<LogView>, AppError> {
    query.check()?;
    let (lower, upper) = query.window();

    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT pl.log_id, pl.log_datetime, pl.line_name, pl.shift_name, pl.model_name,
               pl.parameter_id, pl.value_recorded, pl.remarks, pl.inspector_name, pl.criteria,
               pm.name AS parameter_name, pm.unit
        FROM parameter_logs pl
        LEFT JOIN parameters pm ON pm.id = pl.parameter_id
        WHERE ($1::timestamp IS NULL OR pl.log_datetime >= $1)
          AND ($2::timestamp IS NULL OR pl.log_datetime < $2)
          AND ($3::text IS NULL OR pl.shift_name = $3)
          AND ($4::text IS NULL OR pl.line_name = $4)
          AND ($5::bigint IS NULL OR pl.parameter_id = $5)
        ORDER BY pl.log_datetime DESC, pl.log_id DESC
        LIMIT $6
        "#,
    )
    .bind(lower)
    .bind(upper)
    .bind(query.shift.as_deref())
    .bind(query.line.as_deref())
    .bind(query.parameter_id)
    .bind(query.effective_limit(default_limit))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(LogRow::into_view).collect())
}

pub async fn select_context(
    pool: &PgPool,
    context: &EntryContext,
) -> Result<Vec<LogRecord>, AppError> {
    let shift = context.shift.trim();
    let line = context.line.trim();
    if shift.is_empty() {
        return Err(CoreError::MissingContext {
            field: ContextField::Shift,
        }
        .into());
    }
    if line.is_empty() {
        return Err(CoreError::MissingContext {
            field: ContextField::Line,
        }
        .into());
    }

    let query = LogQuery {
        on_date: Some(context.date),
        shift: Some(shift.to_string()),
        line: Some(line.to_string()),
        limit: Some(MAX_QUERY_LIMIT),
        ..LogQuery::default()
    };
    let views = select_logs(pool, &query, MAX_QUERY_LIMIT).await?;
    Ok(views.into_iter().map(|v| v.record).collect())
}

/// Record one measurement
///
/// Updates the newest existing row for the same
/// (log_datetime, line, shift, parameter) key, or inserts a new one.
#[utoipa::path(
    post,
    path = "/v1/logs",
    request_body = LogItem,
    responses(
        (status = 201, description = "Row inserted", body = ItemReceipt),
        (status = 200, description = "Existing row updated", body = ItemReceipt),
        (status = 400, description = "Missing context or unknown parameter", body = ApiError)
    ),
    tag = "logs"
)]
pub async fn create_log(
    State(state): State<AppState>,
    Json(item): Json<LogItem>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = write_one(&state.db, &item).await?;
    let status = match receipt.outcome {
        UpsertOutcome::Inserted => StatusCode::CREATED,
        UpsertOutcome::Updated => StatusCode::OK,
    };
    Ok((status, Json(receipt)))
}

/// Record a batch of measurements atomically
///
/// Every item goes through the same upsert as `POST /v1/logs`, inside one
/// transaction. If any item fails, nothing is written.
#[utoipa::path(
    post,
    path = "/v1/logs/batch",
    request_body = LogBatchRequest,
    responses(
        (status = 200, description = "Batch committed", body = BatchReceipt),
        (status = 400, description = "Empty batch, missing context or unknown parameter", body = ApiError)
    ),
    tag = "logs"
)]
pub async fn apply_batch(
    State(state): State<AppState>,
    Json(req): Json<LogBatchRequest>,
) -> Result<Json<BatchReceipt>, AppError> {
    if req.items.len() > MAX_BATCH_ITEMS {
        return Err(AppError::Validation {
            message: format!(
                "Batch size {} exceeds maximum of {MAX_BATCH_ITEMS}",
                req.items.len()
            ),
            field: Some("items".to_string()),
            received: Some(serde_json::json!(req.items.len())),
            docs_hint: Some(format!(
                "Split large batches into chunks of {MAX_BATCH_ITEMS} or fewer"
            )),
        });
    }

    let receipt = write_batch(&state.db, &req.items).await?;
    Ok(Json(receipt))
}

/// Query logged measurements
///
/// Filters are ANDed together and each may be given at most once. Results
/// are ordered newest first.
#[utoipa::path(
    get,
    path = "/v1/logs",
    params(LogQuery),
    responses(
        (status = 200, description = "Matching log rows", body = Vec<LogView>),
        (status = 400, description = "Malformed or repeated filter", body = ApiError)
    ),
    tag = "logs"
)]
pub async fn query_logs(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<LogView>>, AppError> {
    let query = LogQuery::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let rows = select_logs(&state.db, &query, state.query_row_cap).await?;
    Ok(Json(rows))
}

/// Existing records for one entry context
///
/// Covers the whole calendar day of `date` for the given shift and line.
#[utoipa::path(
    get,
    path = "/v1/logs/context",
    params(EntryContext),
    responses(
        (status = 200, description = "Records logged for the context", body = Vec<LogRecord>),
        (status = 400, description = "Missing shift or line", body = ApiError)
    ),
    tag = "logs"
)]
pub async fn context_logs(
    State(state): State<AppState>,
    Query(context): Query<EntryContext>,
) -> Result<Json<Vec<LogRecord>>, AppError> {
    let records = select_context(&state.db, &context).await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::NaiveDate;
    use qclog_core::logs::MeasuredValue;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    async fn db_pool_if_available() -> Option<PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .ok()?;
        sqlx::migrate!("../migrations").run(&pool).await.ok()?;
        Some(pool)
    }

    fn unique_line() -> String {
        format!("TEST-{}", uuid::Uuid::now_v7())
    }

    fn item(line: &str, measure: &str, value: MeasuredValue, remark: Option<&str>) -> LogItem {
        LogItem {
            log_datetime: NaiveDate::from_ymd_opt(2024, 1, 15)
                .expect("valid date")
                .and_hms_opt(0, 0, 0)
                .expect("valid time"),
            line_name: line.to_string(),
            shift_name: "A".to_string(),
            model_name: None,
            parameter_id: None,
            measure_name: Some(measure.to_string()),
            value,
            remark: remark.map(str::to_string),
            inspector_name: Some("Priya".to_string()),
            criteria: None,
            unit: None,
            min: None,
            max: None,
        }
    }

    #[test]
    fn failed_rollback_keeps_item_error() {
        let err = after_rollback(
            AppError::UnknownParameter {
                field: Some("items[2]".to_string()),
                reference: "77".to_string(),
                message: "unknown parameter".to_string(),
            },
            Err(sqlx::Error::PoolClosed),
        );
        assert!(matches!(err, AppError::UnknownParameter { ref reference, .. } if reference == "77"));
    }

    async fn rows_for_line(pool: &PgPool, line: &str) -> Vec<LogView> {
        let query = LogQuery {
            line: Some(line.to_string()),
            ..LogQuery::default()
        };
        select_logs(pool, &query, MAX_QUERY_LIMIT)
            .await
            .expect("query logs")
    }

    #[tokio::test]
    async fn repeated_write_updates_instead_of_inserting() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let line = unique_line();

        let first = write_one(
            &pool,
            &item(&line, "Voltage Test", MeasuredValue::Number(250.0), Some("tap high")),
        )
        .await
        .expect("first write");
        let second = write_one(
            &pool,
            &item(&line, "Voltage Test", MeasuredValue::Number(231.0), None),
        )
        .await
        .expect("second write");

        assert_eq!(first.outcome, UpsertOutcome::Inserted);
        assert_eq!(second.outcome, UpsertOutcome::Updated);
        assert_eq!(first.log_id, second.log_id);

        let rows = rows_for_line(&pool, &line).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.value_recorded, "231");
        assert_eq!(rows[0].record.remarks, None);
        assert_eq!(rows[0].parameter_name.as_deref(), Some("Voltage Test"));
    }

    #[tokio::test]
    async fn batch_with_unknown_parameter_writes_nothing() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let line = unique_line();

        let items = vec![
            item(&line, "Voltage Test", MeasuredValue::Number(230.0), None),
            item(&line, "Visual Inspection", MeasuredValue::Text("OK".into()), None),
            item(&line, "No Such Parameter", MeasuredValue::Number(1.0), None),
        ];
        let err = write_batch(&pool, &items).await.expect_err("batch must fail");
        match err {
            AppError::UnknownParameter { field, .. } => {
                assert_eq!(field.as_deref(), Some("items[2]"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(rows_for_line(&pool, &line).await.is_empty());
    }

    #[tokio::test]
    async fn batch_reports_per_item_outcomes() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let line = unique_line();

        write_one(&pool, &item(&line, "Voltage Test", MeasuredValue::Number(229.0), None))
            .await
            .expect("seed write");

        let receipt = write_batch(
            &pool,
            &[
                item(&line, "Voltage Test", MeasuredValue::Number(230.0), None),
                item(&line, "Visual Inspection", MeasuredValue::Text("NOT OK".into()), Some("dent")),
            ],
        )
        .await
        .expect("batch write");

        assert_eq!(receipt.updated(), 1);
        assert_eq!(receipt.inserted(), 1);

        let context = EntryContext {
            date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"),
            shift: "A".into(),
            line: line.clone(),
        };
        let records = select_context(&pool, &context).await.expect("context");
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn batch_with_blank_line_is_rejected_before_writing() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let line = unique_line();

        let items = vec![
            item(&line, "Voltage Test", MeasuredValue::Number(230.0), None),
            item("  ", "Voltage Test", MeasuredValue::Number(230.0), None),
        ];
        let err = write_batch(&pool, &items).await.expect_err("must fail");
        match err {
            AppError::MissingContext { field } => assert_eq!(field, "items[1].line_name"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(rows_for_line(&pool, &line).await.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_over_http() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let app = write_router().with_state(AppState {
            db: pool,
            query_row_cap: 1000,
        });

        let response = app
            .oneshot(
                Request::post("/v1/logs/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"items":[]}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn repeated_filter_is_rejected_over_http() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let app = read_router().with_state(AppState {
            db: pool,
            query_row_cap: 1000,
        });

        let response = app
            .oneshot(
                Request::get("/v1/logs?shift=A&shift=B")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
