use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::PgPool;

use qclog_core::error::{ApiError, CoreError};
use qclog_core::parameters::{Parameter, ParameterDraft, ParameterKind};

use crate::error::AppError;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/parameters", get(list_parameters))
        .route("/v1/parameters/{id}", get(get_parameter))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/parameters", axum::routing::post(create_parameter))
        .route(
            "/v1/parameters/{id}",
            axum::routing::put(update_parameter).delete(delete_parameter),
        )
}

#[derive(sqlx::FromRow)]
pub struct ParameterRow {
    id: i64,
    name: String,
    kind: String,
    unit: Option<String>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    criteria: Option<String>,
}

impl ParameterRow {
    pub fn into_parameter(self) -> Parameter {
        Parameter {
            id: self.id,
            name: self.name,
            kind: ParameterKind::parse_lenient(&self.kind),
            unit: self.unit,
            min: self.min_value,
            max: self.max_value,
            criteria: self.criteria,
        }
    }
}

const SELECT_PARAMETER: &str =
    "SELECT id, name, kind, unit, min_value, max_value, criteria FROM parameters";

pub async fn fetch_catalog(pool: &PgPool) -> Result<Vec<Parameter>, AppError> {
    let rows = sqlx::query_as::<_, ParameterRow>(&format!("{SELECT_PARAMETER} ORDER BY id"))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(ParameterRow::into_parameter).collect())
}

async fn fetch_one(pool: &PgPool, id: i64) -> Result<Parameter, AppError> {
    sqlx::query_as::<_, ParameterRow>(&format!("{SELECT_PARAMETER} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(ParameterRow::into_parameter)
        .ok_or_else(|| not_found(id))
}

fn not_found(id: i64) -> AppError {
    AppError::NotFound {
        resource: "parameter",
        id: id.to_string(),
    }
}

/// Reject a name already used by another parameter.
async fn ensure_unique_name(
    pool: &PgPool,
    name: &str,
    except_id: Option<i64>,
) -> Result<(), AppError> {
    let clash = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM parameters WHERE name = $1 AND ($2::bigint IS NULL OR id <> $2) LIMIT 1",
    )
    .bind(name)
    .bind(except_id)
    .fetch_optional(pool)
    .await?;

    match clash {
        Some(_) => Err(CoreError::DuplicateDefinition {
            name: name.to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

fn map_unique_violation(err: sqlx::Error, name: &str) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return CoreError::DuplicateDefinition {
                name: name.to_string(),
            }
            .into();
        }
    }
    AppError::Database(err)
}

/// List the parameter catalog
#[utoipa::path(
    get,
    path = "/v1/parameters",
    responses(
        (status = 200, description = "All parameters ordered by id", body = Vec<Parameter>)
    ),
    tag = "parameters"
)]
pub async fn list_parameters(
    State(state): State<AppState>,
) -> Result<Json<Vec<Parameter>>, AppError> {
    Ok(Json(fetch_catalog(&state.db).await?))
}

/// Fetch one parameter
#[utoipa::path(
    get,
    path = "/v1/parameters/{id}",
    params(("id" = i64, Path, description = "Parameter id")),
    responses(
        (status = 200, description = "Parameter", body = Parameter),
        (status = 404, description = "No such parameter", body = ApiError)
    ),
    tag = "parameters"
)]
pub async fn get_parameter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Parameter>, AppError> {
    Ok(Json(fetch_one(&state.db, id).await?))
}

/// Create a parameter
///
/// Qualitative parameters need acceptance criteria; their bounds are
/// discarded. Quantitative bounds must satisfy `min <= max`.
#[utoipa::path(
    post,
    path = "/v1/parameters",
    request_body = ParameterDraft,
    responses(
        (status = 201, description = "Parameter created", body = Parameter),
        (status = 400, description = "Invalid definition", body = ApiError),
        (status = 409, description = "Name already in use", body = ApiError)
    ),
    tag = "parameters"
)]
pub async fn create_parameter(
    State(state): State<AppState>,
    Json(draft): Json<ParameterDraft>,
) -> Result<impl IntoResponse, AppError> {
    let draft = draft.normalized()?;
    ensure_unique_name(&state.db, &draft.name, None).await?;

    let row = sqlx::query_as::<_, ParameterRow>(
        r#"
        INSERT INTO parameters (name, kind, unit, min_value, max_value, criteria)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, kind, unit, min_value, max_value, criteria
        "#,
    )
    .bind(&draft.name)
    .bind(draft.kind.as_str())
    .bind(&draft.unit)
    .bind(draft.min)
    .bind(draft.max)
    .bind(&draft.criteria)
    .fetch_one(&state.db)
    .await
    .map_err(|e| map_unique_violation(e, &draft.name))?;

    let parameter = row.into_parameter();
    tracing::info!(id = parameter.id, name = %parameter.name, "parameter created");
    Ok((StatusCode::CREATED, Json(parameter)))
}

/// Replace a parameter definition
#[utoipa::path(
    put,
    path = "/v1/parameters/{id}",
    params(("id" = i64, Path, description = "Parameter id")),
    request_body = ParameterDraft,
    responses(
        (status = 200, description = "Parameter updated", body = Parameter),
        (status = 400, description = "Invalid definition", body = ApiError),
        (status = 404, description = "No such parameter", body = ApiError),
        (status = 409, description = "Name already in use", body = ApiError)
    ),
    tag = "parameters"
)]
pub async fn update_parameter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(draft): Json<ParameterDraft>,
) -> Result<Json<Parameter>, AppError> {
    let draft = draft.normalized()?;
    ensure_unique_name(&state.db, &draft.name, Some(id)).await?;

    let row = sqlx::query_as::<_, ParameterRow>(
        r#"
        UPDATE parameters
        SET name = $2, kind = $3, unit = $4, min_value = $5, max_value = $6,
            criteria = $7, updated_at = now()
        WHERE id = $1
        RETURNING id, name, kind, unit, min_value, max_value, criteria
        "#,
    )
    .bind(id)
    .bind(&draft.name)
    .bind(draft.kind.as_str())
    .bind(&draft.unit)
    .bind(draft.min)
    .bind(draft.max)
    .bind(&draft.criteria)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| map_unique_violation(e, &draft.name))?
    .ok_or_else(|| not_found(id))?;

    Ok(Json(row.into_parameter()))
}

/// Delete a parameter
///
/// Refused while logged measurements still reference it.
#[utoipa::path(
    delete,
    path = "/v1/parameters/{id}",
    params(("id" = i64, Path, description = "Parameter id")),
    responses(
        (status = 204, description = "Parameter deleted"),
        (status = 404, description = "No such parameter", body = ApiError),
        (status = 409, description = "Parameter has logged measurements", body = ApiError)
    ),
    tag = "parameters"
)]
pub async fn delete_parameter(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let referenced = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM parameter_logs WHERE parameter_id = $1)",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    if referenced {
        return Err(AppError::Conflict {
            message: format!("Parameter {id} has logged measurements and cannot be deleted"),
            field: Some("id".to_string()),
            docs_hint: Some("Only parameters without log rows can be removed".to_string()),
        });
    }

    let result = sqlx::query("DELETE FROM parameters WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(id));
    }
    tracing::info!(id, "parameter deleted");
    Ok(StatusCode::NO_CONTENT)
}
