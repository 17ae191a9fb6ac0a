use sqlx::PgPool;

use qclog_core::logs::{DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Row cap applied to `GET /v1/logs` when the caller sends no `limit`.
    pub query_row_cap: i64,
}

impl AppState {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            query_row_cap: query_row_cap_from_env(),
        }
    }
}

/// Read `QCLOG_QUERY_ROW_CAP`, clamped to `1..=MAX_QUERY_LIMIT`.
pub fn query_row_cap_from_env() -> i64 {
    parse_row_cap(std::env::var("QCLOG_QUERY_ROW_CAP").ok().as_deref())
}

fn parse_row_cap(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .map(|v| v.clamp(1, MAX_QUERY_LIMIT))
        .unwrap_or(DEFAULT_QUERY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_cap_defaults_and_clamps() {
        assert_eq!(parse_row_cap(None), DEFAULT_QUERY_LIMIT);
        assert_eq!(parse_row_cap(Some("abc")), DEFAULT_QUERY_LIMIT);
        assert_eq!(parse_row_cap(Some("250")), 250);
        assert_eq!(parse_row_cap(Some("0")), 1);
        assert_eq!(parse_row_cap(Some("999999")), MAX_QUERY_LIMIT);
    }
}
