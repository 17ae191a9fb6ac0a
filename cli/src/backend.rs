//! HTTP implementation of the entry session's storage boundary.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use qclog_core::configurations::Configurations;
use qclog_core::error::{ApiError, CoreError, codes};
use qclog_core::logs::{BatchReceipt, EntryContext, LogItem, LogQuery, LogRecord, LogView};
use qclog_core::parameters::Parameter;
use qclog_core::store::LogBackend;

use crate::util::build_url;

pub struct HttpBackend {
    api_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: api_url.to_string(),
            client: crate::util::client(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, CoreError> {
        let url = build_url(&self.api_url, path, query).map_err(CoreError::Connectivity)?;
        tracing::debug!(%url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::Connectivity(e.to_string()))?;
        decode(resp).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CoreError> {
        let url = build_url(&self.api_url, path, &[]).map_err(CoreError::Connectivity)?;
        tracing::debug!(%url, "POST");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::Connectivity(e.to_string()))?;
        decode(resp).await
    }

    pub async fn configurations(&self) -> Result<Configurations, CoreError> {
        self.get_json("/v1/configurations", &[]).await
    }

    pub async fn query_logs(&self, query: &LogQuery) -> Result<Vec<LogView>, CoreError> {
        let pairs: Vec<(String, String)> = query
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.get_json("/v1/logs", &pairs).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CoreError> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.map_err(|e| CoreError::Rejected {
            code: "invalid_response".to_string(),
            message: format!("unexpected response body: {e}"),
        });
    }

    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(rejection_from(api_error)),
        Err(_) => Err(CoreError::Rejected {
            code: format!("http_{}", status.as_u16()),
            message: body,
        }),
    }
}

/// Translate a structured service error into the matching core error.
pub fn rejection_from(err: ApiError) -> CoreError {
    match err.error.as_str() {
        codes::UNKNOWN_PARAMETER => {
            let index = err
                .field
                .as_deref()
                .and_then(batch_index)
                .unwrap_or_default();
            let reference = match err.received {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => err.message,
            };
            CoreError::UnknownParameter { index, reference }
        }
        codes::NO_DATA => CoreError::NoData,
        _ => CoreError::Rejected {
            code: err.error,
            message: err.message,
        },
    }
}

/// `items[4].line_name` -> 4
fn batch_index(field: &str) -> Option<usize> {
    let rest = field.strip_prefix("items[")?;
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

impl LogBackend for HttpBackend {
    async fn fetch_parameters(&self) -> Result<Vec<Parameter>, CoreError> {
        self.get_json("/v1/parameters", &[]).await
    }

    async fn fetch_context(&self, context: &EntryContext) -> Result<Vec<LogRecord>, CoreError> {
        let query = [
            ("date".to_string(), context.date.to_string()),
            ("shift".to_string(), context.shift.clone()),
            ("line".to_string(), context.line.clone()),
        ];
        self.get_json("/v1/logs/context", &query).await
    }

    async fn apply_batch(&self, items: Vec<LogItem>) -> Result<BatchReceipt, CoreError> {
        self.post_json("/v1/logs/batch", &json!({ "items": items }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: &str, field: Option<&str>, received: Option<serde_json::Value>) -> ApiError {
        ApiError {
            error: code.to_string(),
            message: "items[3]: unknown parameter 'Torque'".to_string(),
            field: field.map(str::to_string),
            received,
            request_id: String::new(),
            docs_hint: None,
        }
    }

    #[test]
    fn unknown_parameter_keeps_index_and_reference() {
        let err = rejection_from(api_error(
            codes::UNKNOWN_PARAMETER,
            Some("items[3]"),
            Some(json!("Torque")),
        ));
        assert_eq!(
            err,
            CoreError::UnknownParameter {
                index: 3,
                reference: "Torque".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_codes_become_rejections() {
        let err = rejection_from(api_error(codes::MISSING_CONTEXT, Some("items[0].line_name"), None));
        assert!(matches!(err, CoreError::Rejected { ref code, .. } if code == codes::MISSING_CONTEXT));
        assert_eq!(rejection_from(api_error(codes::NO_DATA, None, None)), CoreError::NoData);
    }

    #[test]
    fn batch_index_parses_item_fields() {
        assert_eq!(batch_index("items[12].shift_name"), Some(12));
        assert_eq!(batch_index("items[0]"), Some(0));
        assert_eq!(batch_index("name"), None);
    }

    #[tokio::test]
    async fn unreachable_service_is_a_retryable_connectivity_error() {
        let backend = HttpBackend::new("http://127.0.0.1:1");
        let err = backend
            .fetch_parameters()
            .await
            .expect_err("nothing listens on port 1");
        assert!(err.is_retryable(), "{err:?}");
    }
}
