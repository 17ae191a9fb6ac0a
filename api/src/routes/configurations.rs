use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use qclog_core::configurations::{Configurations, LineShift};
use qclog_core::error::ApiError;

use crate::error::AppError;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/configurations", get(list_configurations))
}

pub fn write_router() -> Router<AppState> {
    Router::new().route(
        "/v1/configurations",
        axum::routing::post(add_configuration).delete(remove_configuration),
    )
}

/// List configured line/shift pairs
///
/// Also returns the distinct line and shift names, for header pickers.
#[utoipa::path(
    get,
    path = "/v1/configurations",
    responses(
        (status = 200, description = "Configured pairs", body = Configurations)
    ),
    tag = "configurations"
)]
pub async fn list_configurations(
    State(state): State<AppState>,
) -> Result<Json<Configurations>, AppError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT line_name, shift_name FROM line_configurations ORDER BY line_name, shift_name",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(Configurations::from_pairs(rows)))
}

fn duplicate_pair(err: sqlx::Error, pair: &LineShift) -> AppError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return AppError::Conflict {
                message: format!(
                    "Shift '{}' is already configured for line '{}'",
                    pair.shift, pair.line
                ),
                field: Some("shift".to_string()),
                docs_hint: Some("GET /v1/configurations lists the configured pairs".to_string()),
            };
        }
    }
    AppError::Database(err)
}

/// Add a line/shift pair
#[utoipa::path(
    post,
    path = "/v1/configurations",
    request_body = LineShift,
    responses(
        (status = 201, description = "Pair added", body = LineShift),
        (status = 400, description = "Blank line or shift", body = ApiError),
        (status = 409, description = "Pair already configured", body = ApiError)
    ),
    tag = "configurations"
)]
pub async fn add_configuration(
    State(state): State<AppState>,
    Json(pair): Json<LineShift>,
) -> Result<impl IntoResponse, AppError> {
    let pair = pair.normalized()?;

    sqlx::query("INSERT INTO line_configurations (line_name, shift_name) VALUES ($1, $2)")
        .bind(&pair.line)
        .bind(&pair.shift)
        .execute(&state.db)
        .await
        .map_err(|e| duplicate_pair(e, &pair))?;

    tracing::info!(line = %pair.line, shift = %pair.shift, "configuration added");
    Ok((StatusCode::CREATED, Json(pair)))
}

/// Remove a line/shift pair
///
/// Logged measurements for the pair are kept.
#[utoipa::path(
    delete,
    path = "/v1/configurations",
    request_body = LineShift,
    responses(
        (status = 204, description = "Pair removed"),
        (status = 400, description = "Blank line or shift", body = ApiError),
        (status = 404, description = "Pair not configured", body = ApiError)
    ),
    tag = "configurations"
)]
pub async fn remove_configuration(
    State(state): State<AppState>,
    Json(pair): Json<LineShift>,
) -> Result<StatusCode, AppError> {
    let pair = pair.normalized()?;

    let result =
        sqlx::query("DELETE FROM line_configurations WHERE line_name = $1 AND shift_name = $2")
            .bind(&pair.line)
            .bind(&pair.shift)
            .execute(&state.db)
            .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound {
            resource: "configuration",
            id: format!("{}/{}", pair.line, pair.shift),
        });
    }
    tracing::info!(line = %pair.line, shift = %pair.shift, "configuration removed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    async fn db_pool_if_available() -> Option<PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .ok()?;
        sqlx::migrate!("../migrations").run(&pool).await.ok()?;
        Some(pool)
    }

    fn app(pool: PgPool) -> Router {
        read_router().merge(write_router()).with_state(AppState {
            db: pool,
            query_row_cap: 1000,
        })
    }

    fn json_request(method: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri("/v1/configurations")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn listed(pool: PgPool) -> Configurations {
        let response = app(pool)
            .oneshot(
                Request::get("/v1/configurations")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("configurations json")
    }

    #[tokio::test]
    async fn added_pair_is_listed_until_removed() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let line = format!("TEST-{}", uuid::Uuid::now_v7());
        let pair = serde_json::json!({ "line": format!(" {line} "), "shift": "B" });

        let added = app(pool.clone())
            .oneshot(json_request("POST", pair.clone()))
            .await
            .expect("response");
        assert_eq!(added.status(), StatusCode::CREATED);

        let config = listed(pool.clone()).await;
        assert!(config.lines.contains(&line));
        assert!(config.shifts.contains(&"B".to_string()));
        assert_eq!(config.shifts_for(&line), vec!["B"]);

        let again = app(pool.clone())
            .oneshot(json_request("POST", pair.clone()))
            .await
            .expect("response");
        assert_eq!(again.status(), StatusCode::CONFLICT);

        let removed = app(pool.clone())
            .oneshot(json_request("DELETE", pair.clone()))
            .await
            .expect("response");
        assert_eq!(removed.status(), StatusCode::NO_CONTENT);
        assert!(!listed(pool.clone()).await.lines.contains(&line));

        let missing = app(pool)
            .oneshot(json_request("DELETE", pair))
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_shift_is_rejected() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };
        let response = app(pool)
            .oneshot(json_request(
                "POST",
                serde_json::json!({ "line": "L1", "shift": "   " }),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["error"], qclog_core::error::codes::VALIDATION_FAILED);
        assert_eq!(body["field"], "shift");
    }
}
