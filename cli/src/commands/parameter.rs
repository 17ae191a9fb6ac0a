use clap::{Args, Subcommand, ValueEnum};

use qclog_core::parameters::{ParameterDraft, ParameterKind};

use crate::util::{api_request, exit_error};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum KindArg {
    Quantitative,
    Qualitative,
}

impl From<KindArg> for ParameterKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Quantitative => ParameterKind::Quantitative,
            KindArg::Qualitative => ParameterKind::Qualitative,
        }
    }
}

#[derive(Args)]
pub struct DefinitionArgs {
    /// Display name, unique across the catalog
    #[arg(long)]
    name: String,
    /// Measurement kind
    #[arg(long, value_enum)]
    kind: KindArg,
    /// Unit of measurement (e.g. "V", "MΩ")
    #[arg(long)]
    unit: Option<String>,
    /// Lower acceptable bound (quantitative only)
    #[arg(long, allow_negative_numbers = true)]
    min: Option<f64>,
    /// Upper acceptable bound (quantitative only)
    #[arg(long, allow_negative_numbers = true)]
    max: Option<f64>,
    /// Acceptance criteria (required for qualitative)
    #[arg(long)]
    criteria: Option<String>,
}

impl DefinitionArgs {
    fn into_draft(self) -> ParameterDraft {
        ParameterDraft {
            name: self.name,
            kind: self.kind.into(),
            unit: self.unit,
            min: self.min,
            max: self.max,
            criteria: self.criteria,
        }
    }
}

#[derive(Subcommand)]
pub enum ParameterCommands {
    /// List the parameter catalog
    List,
    /// Show one parameter
    Get {
        #[arg(long)]
        id: i64,
    },
    /// Add a parameter to the catalog
    Create(DefinitionArgs),
    /// Replace a parameter definition
    Update {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        definition: DefinitionArgs,
    },
    /// Remove a parameter that has no logged measurements
    Delete {
        #[arg(long)]
        id: i64,
    },
}

pub async fn run(api_url: &str, command: ParameterCommands) -> i32 {
    match command {
        ParameterCommands::List => {
            api_request(api_url, reqwest::Method::GET, "/v1/parameters", None, &[]).await
        }
        ParameterCommands::Get { id } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/parameters/{id}"),
                None,
                &[],
            )
            .await
        }
        ParameterCommands::Create(definition) => {
            let body = checked_body(definition.into_draft());
            api_request(api_url, reqwest::Method::POST, "/v1/parameters", Some(body), &[]).await
        }
        ParameterCommands::Update { id, definition } => {
            let body = checked_body(definition.into_draft());
            api_request(
                api_url,
                reqwest::Method::PUT,
                &format!("/v1/parameters/{id}"),
                Some(body),
                &[],
            )
            .await
        }
        ParameterCommands::Delete { id } => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                &format!("/v1/parameters/{id}"),
                None,
                &[],
            )
            .await
        }
    }
}

/// Validate locally so obvious mistakes never reach the service.
fn checked_body(draft: ParameterDraft) -> serde_json::Value {
    let draft = match draft.normalized() {
        Ok(d) => d,
        Err(e) => exit_error(
            &e.to_string(),
            Some("Quantitative: --min <= --max. Qualitative: --criteria is required."),
        ),
    };
    match serde_json::to_value(&draft) {
        Ok(v) => v,
        Err(e) => exit_error(&format!("Failed to encode parameter: {e}"), None),
    }
}
