use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use qclog_core::error::{self, ApiError, ContextField, CoreError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Header field of a log item is blank (400)
    MissingContext { field: String },
    /// Nothing to write (400)
    NoData { field: Option<String> },
    /// Parameter reference resolves neither by id nor by name (400)
    UnknownParameter {
        field: Option<String>,
        reference: String,
        message: String,
    },
    /// Resource does not exist (404)
    NotFound { resource: &'static str, id: String },
    /// Name clash or a row still referenced elsewhere (409)
    Conflict {
        message: String,
        field: Option<String>,
        docs_hint: Option<String>,
    },
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    /// Re-anchor an item-level error at `items[index]` so the client can
    /// point at the offending batch entry. Unknown-parameter errors already
    /// carry their index.
    pub fn at_item(self, index: usize) -> Self {
        match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => AppError::Validation {
                message: format!("items[{index}]: {message}"),
                field: Some(match field {
                    Some(f) => format!("items[{index}].{f}"),
                    None => format!("items[{index}]"),
                }),
                received,
                docs_hint,
            },
            AppError::MissingContext { field } => AppError::MissingContext {
                field: format!("items[{index}].{field}"),
            },
            other => other,
        }
    }
}

/// Wire name of a header field inside a log item body.
fn item_field(field: ContextField) -> &'static str {
    match field {
        ContextField::Date => "log_datetime",
        ContextField::Shift => "shift_name",
        ContextField::Line => "line_name",
        ContextField::InspectorName => "inspector_name",
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { parameter_id, message } => AppError::Validation {
                message,
                field: Some("value".to_string()),
                received: Some(serde_json::json!({ "parameter_id": parameter_id })),
                docs_hint: Some(
                    "Out-of-range or 'NOT OK' values need a non-blank remark".to_string(),
                ),
            },
            CoreError::MissingContext { field } => AppError::MissingContext {
                field: item_field(field).to_string(),
            },
            CoreError::NoData => AppError::NoData { field: None },
            CoreError::UnknownParameter { index, reference } => AppError::UnknownParameter {
                field: Some(format!("items[{index}]")),
                message: format!("items[{index}]: unknown parameter '{reference}'"),
                reference,
            },
            CoreError::InvalidFilter { field, message } => AppError::Validation {
                message,
                field: Some(field),
                received: None,
                docs_hint: Some(
                    "Filters: date_from, date_to, on_date (YYYY-MM-DD), shift, line, parameter_id, limit; each at most once"
                        .to_string(),
                ),
            },
            CoreError::InvalidDefinition { field, message } => AppError::Validation {
                message,
                field: Some(field.to_string()),
                received: None,
                docs_hint: None,
            },
            CoreError::DuplicateDefinition { name } => AppError::Conflict {
                message: format!("A parameter named '{name}' already exists"),
                field: Some("name".to_string()),
                docs_hint: Some("Parameter names are unique; pick another name or update the existing one".to_string()),
            },
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let api_error = |code: &str, message: String| ApiError {
            error: code.to_string(),
            message,
            field: None,
            received: None,
            request_id: request_id.clone(),
            docs_hint: None,
        };

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..api_error(error::codes::VALIDATION_FAILED, message)
                },
            ),
            AppError::MissingContext { field } => {
                let message = format!("{field} is required");
                (
                    StatusCode::BAD_REQUEST,
                    ApiError {
                        field: Some(field),
                        docs_hint: Some(
                            "Every log item needs a non-blank line_name and shift_name".to_string(),
                        ),
                        ..api_error(error::codes::MISSING_CONTEXT, message)
                    },
                )
            }
            AppError::NoData { field } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    ..api_error(error::codes::NO_DATA, "No log items to write".to_string())
                },
            ),
            AppError::UnknownParameter {
                field,
                reference,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received: Some(serde_json::Value::String(reference)),
                    docs_hint: Some(
                        "Reference a catalog entry by parameter_id or by its exact measure_name".to_string(),
                    ),
                    ..api_error(error::codes::UNKNOWN_PARAMETER, message)
                },
            ),
            AppError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                api_error(error::codes::NOT_FOUND, format!("{resource} {id} not found")),
            ),
            AppError::Conflict {
                message,
                field,
                docs_hint,
            } => (
                StatusCode::CONFLICT,
                ApiError {
                    field,
                    docs_hint,
                    ..api_error(error::codes::CONFLICT, message)
                },
            ),
            AppError::Database(err) => {
                if let sqlx::Error::Database(ref db_err) = err {
                    match db_err.code().as_deref() {
                        Some("23505") => {
                            return AppError::Conflict {
                                message: "A row with the same unique key already exists".to_string(),
                                field: None,
                                docs_hint: None,
                            }
                            .into_response();
                        }
                        Some("23503") => {
                            return AppError::Conflict {
                                message: "The row is still referenced by logged measurements".to_string(),
                                field: None,
                                docs_hint: None,
                            }
                            .into_response();
                        }
                        _ => {}
                    }
                }

                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    api_error(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    api_error(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn missing_context_in_batch_names_item_field() {
        let err = AppError::from(CoreError::MissingContext {
            field: ContextField::Line,
        })
        .at_item(2);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], error::codes::MISSING_CONTEXT);
        assert_eq!(body["field"], "items[2].line_name");
    }

    #[tokio::test]
    async fn unknown_parameter_reports_reference() {
        let err = AppError::from(CoreError::UnknownParameter {
            index: 4,
            reference: "Torque".into(),
        });
        let body = body_json(err.into_response()).await;
        assert_eq!(body["error"], error::codes::UNKNOWN_PARAMETER);
        assert_eq!(body["message"], "items[4]: unknown parameter 'Torque'");
        assert_eq!(body["received"], "Torque");
    }

    #[tokio::test]
    async fn duplicate_definition_is_conflict() {
        let response = AppError::from(CoreError::DuplicateDefinition {
            name: "Voltage Test".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_filter_is_bad_request_with_field() {
        let response = AppError::from(CoreError::InvalidFilter {
            field: "shift".into(),
            message: "shift given more than once".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["field"], "shift");
    }
}
