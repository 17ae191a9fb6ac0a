use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by the HTTP service.
/// Carries enough context for a client to highlight the offending field
/// or batch item without parsing the message text.
#[derive(Debug, Clone, Serialize, serde::Deserialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (see [`codes`])
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable), e.g. `items[4].measure_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    #[serde(default)]
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const MISSING_CONTEXT: &str = "missing_context";
    pub const NO_DATA: &str = "no_data";
    pub const UNKNOWN_PARAMETER: &str = "unknown_parameter";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}

/// Header fields an entry session needs before it may submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextField {
    Date,
    Shift,
    Line,
    InspectorName,
}

impl ContextField {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextField::Date => "date",
            ContextField::Shift => "shift",
            ContextField::Line => "line",
            ContextField::InspectorName => "inspector_name",
        }
    }
}

impl std::fmt::Display for ContextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failures raised by the domain core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// A parameter's value/remark pair fails the validation rules.
    #[error("parameter {parameter_id}: {message}")]
    Validation { parameter_id: i64, message: String },

    /// A required header field is blank at submit time.
    #[error("{field} is required")]
    MissingContext { field: ContextField },

    /// Submit attempted with no filled entries.
    #[error("no parameter values entered")]
    NoData,

    /// A batch item references a parameter that resolves neither by id nor by name.
    #[error("items[{index}]: unknown parameter '{reference}'")]
    UnknownParameter { index: usize, reference: String },

    /// The backend could not be reached or answered with a transport failure.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The backend rejected the request (non-transport failure).
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    /// A log query filter is malformed or given more than once.
    #[error("invalid filter {field}: {message}")]
    InvalidFilter { field: String, message: String },

    /// Catalog name collision.
    #[error("a parameter named '{name}' already exists")]
    DuplicateDefinition { name: String },

    /// A parameter or line/shift definition is incomplete or inconsistent.
    #[error("invalid definition ({field}): {message}")]
    InvalidDefinition { field: &'static str, message: String },

    /// A second submit was attempted while one is still pending.
    #[error("a submission is already in flight")]
    SubmitInFlight,

    /// A response arrived for a context that is no longer loaded.
    #[error("response belongs to a context that is no longer active")]
    StaleContext,

    /// The session has no parameter with this id in its active set.
    #[error("parameter {0} is not part of the active set")]
    NotInActiveSet(i64),
}

impl CoreError {
    /// Whether the operator can simply retry the same action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Connectivity(_))
    }

    /// Map to the wire error code used by [`ApiError`].
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. }
            | CoreError::InvalidDefinition { .. }
            | CoreError::InvalidFilter { .. }
            | CoreError::NotInActiveSet(_) => codes::VALIDATION_FAILED,
            CoreError::MissingContext { .. } => codes::MISSING_CONTEXT,
            CoreError::NoData => codes::NO_DATA,
            CoreError::UnknownParameter { .. } => codes::UNKNOWN_PARAMETER,
            CoreError::DuplicateDefinition { .. }
            | CoreError::SubmitInFlight
            | CoreError::StaleContext => codes::CONFLICT,
            CoreError::Connectivity(_) | CoreError::Rejected { .. } => codes::INTERNAL_ERROR,
        }
    }
}
