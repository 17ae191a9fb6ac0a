use clap::{Args, Subcommand};

use qclog_core::export::{self, ExportLayout};

use crate::backend::HttpBackend;
use crate::commands::log::FilterArgs;
use crate::util::{exit_error, report_core_error};

#[derive(Args)]
pub struct ExportArgs {
    #[command(flatten)]
    filters: FilterArgs,
    /// Write the CSV here instead of stdout
    #[arg(long)]
    out: Option<String>,
}

#[derive(Subcommand)]
pub enum ExportCommands {
    /// One row per shift/line/parameter, value and remark columns per date
    Date(ExportArgs),
    /// Flat rows for exactly one shift
    Shift(ExportArgs),
    /// Flat rows for exactly one parameter
    Parameter(ExportArgs),
}

pub async fn run(api_url: &str, command: ExportCommands) -> i32 {
    let (layout, args) = match command {
        ExportCommands::Date(args) => (ExportLayout::DatePivot, args),
        ExportCommands::Shift(args) => {
            require_single("--shift", args.filters.shift.len());
            (ExportLayout::Flat, args)
        }
        ExportCommands::Parameter(args) => {
            require_single("--parameter-id", args.filters.parameter_id.len());
            (ExportLayout::Flat, args)
        }
    };

    let query = match args.filters.to_query() {
        Ok(q) => q,
        Err(e) => return report_core_error(&e),
    };
    let rows = match HttpBackend::new(api_url).query_logs(&query).await {
        Ok(rows) => rows,
        Err(e) => return report_core_error(&e),
    };
    tracing::debug!(rows = rows.len(), ?layout, "rendering export");

    let csv = export::render(layout, &rows);
    match args.out {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, csv) {
                exit_error(&format!("Failed to write '{path}': {e}"), None);
            }
            eprintln!("wrote {} rows to {path}", rows.len());
        }
        None => println!("{csv}"),
    }
    0
}

fn require_single(flag: &str, given: usize) {
    if given != 1 {
        exit_error(
            &format!("{flag} must be given exactly once for this export (got {given})"),
            Some("Run one export per value"),
        );
    }
}
