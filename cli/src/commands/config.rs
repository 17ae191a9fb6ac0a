use clap::{Args, Subcommand};
use serde_json::json;

use qclog_core::configurations::LineShift;

use crate::backend::HttpBackend;
use crate::util::{api_request, exit_error, pretty, report_core_error};

#[derive(Args)]
pub struct PairArgs {
    #[arg(long)]
    line: String,
    #[arg(long)]
    shift: String,
}

impl PairArgs {
    fn body(&self) -> serde_json::Value {
        let pair = LineShift {
            line: self.line.clone(),
            shift: self.shift.clone(),
        };
        match pair.normalized() {
            Ok(pair) => json!(pair),
            Err(e) => exit_error(&e.to_string(), Some("Both --line and --shift need a name")),
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// List configured line/shift pairs
    List,
    /// Shifts configured for one line
    Shifts {
        #[arg(long)]
        line: String,
    },
    /// Configure a shift for a line
    Add(PairArgs),
    /// Remove a configured line/shift pair (logged data is kept)
    Remove(PairArgs),
}

pub async fn run(api_url: &str, command: ConfigCommands) -> i32 {
    match command {
        ConfigCommands::List => {
            api_request(api_url, reqwest::Method::GET, "/v1/configurations", None, &[]).await
        }
        ConfigCommands::Shifts { line } => {
            match HttpBackend::new(api_url).configurations().await {
                Ok(config) => {
                    println!(
                        "{}",
                        pretty(&json!({ "line": line.trim(), "shifts": config.shifts_for(&line) }))
                    );
                    0
                }
                Err(e) => report_core_error(&e),
            }
        }
        ConfigCommands::Add(pair) => {
            api_request(
                api_url,
                reqwest::Method::POST,
                "/v1/configurations",
                Some(pair.body()),
                &[],
            )
            .await
        }
        ConfigCommands::Remove(pair) => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                "/v1/configurations",
                Some(pair.body()),
                &[],
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_body_is_trimmed() {
        let args = PairArgs {
            line: " L2 ".into(),
            shift: "A ".into(),
        };
        assert_eq!(args.body(), json!({ "line": "L2", "shift": "A" }));
    }
}
