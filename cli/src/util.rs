use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Print a structured CLI error to stderr and exit with code 1.
pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", pretty(&err));
    std::process::exit(1);
}

pub fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Map an HTTP status to the CLI exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error
pub fn exit_code_for_status(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Build `{api_url}{path}` with query pairs appended.
pub fn build_url(
    api_url: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<url::Url, String> {
    let mut url = url::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/')))
        .map_err(|e| format!("Invalid URL: {api_url}{path}: {e}"))?;
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in query {
            pairs.append_pair(k, v);
        }
    }
    Ok(url)
}

/// Execute an API request, print the response body, return the exit code.
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    let url = match build_url(api_url, path, query) {
        Ok(u) => u,
        Err(message) => exit_error(&message, Some("Check --api-url / QCLOG_API_URL")),
    };

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => return connection_error(&e),
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for_status(status);

    let resp_body: serde_json::Value = if status == 204 {
        json!({"status": "deleted"})
    } else {
        match resp.json().await {
            Ok(v) => v,
            Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
        }
    };

    if exit_code == 0 {
        println!("{}", pretty(&resp_body));
    } else {
        eprintln!("{}", pretty(&resp_body));
    }

    exit_code
}

/// Report a transport failure and return exit code 3.
pub fn connection_error(err: &dyn std::fmt::Display) -> i32 {
    let err = json!({
        "error": "connection_error",
        "message": err.to_string(),
        "docs_hint": "Is the API server running? Check QCLOG_API_URL."
    });
    eprintln!("{}", pretty(&err));
    3
}

/// Report a core error as structured JSON and return its exit code.
pub fn report_core_error(err: &qclog_core::error::CoreError) -> i32 {
    use qclog_core::error::{CoreError, codes};

    let exit_code = match err {
        CoreError::Connectivity(_) => 3,
        CoreError::Rejected { code, .. }
            if code == codes::INTERNAL_ERROR || code.starts_with("http_5") =>
        {
            2
        }
        _ => 1,
    };
    let mut body = json!({
        "error": err.code(),
        "message": err.to_string(),
        "retryable": err.is_retryable(),
    });
    if let CoreError::Rejected { code, .. } = err {
        body["error"] = json!(code);
    }
    eprintln!("{}", pretty(&body));
    exit_code
}

/// Split a repeated `NAME=VALUE` argument. The value may itself contain `=`.
pub fn split_assignment(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<serde_json::Value, String> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_exit_code() {
        assert_eq!(exit_code_for_status(200), 0);
        assert_eq!(exit_code_for_status(201), 0);
        assert_eq!(exit_code_for_status(409), 1);
        assert_eq!(exit_code_for_status(503), 2);
    }

    #[test]
    fn assignment_keeps_equals_in_value() {
        assert_eq!(
            split_assignment("Visual Inspection=NOT OK").unwrap(),
            ("Visual Inspection".to_string(), "NOT OK".to_string())
        );
        assert_eq!(
            split_assignment("Note=a=b").unwrap(),
            ("Note".to_string(), "a=b".to_string())
        );
        assert!(split_assignment("no-separator").is_err());
        assert!(split_assignment(" =5").is_err());
    }

    #[test]
    fn url_encodes_query_pairs() {
        let url = build_url(
            "http://localhost:3000/",
            "/v1/logs",
            &[("line".to_string(), "Line 1".to_string())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/v1/logs?line=Line+1");
    }
}
