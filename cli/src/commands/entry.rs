use chrono::NaiveDate;
use clap::Args;
use serde_json::json;

use qclog_core::error::CoreError;
use qclog_core::session::{EntryField, EntrySession, LoadSummary};
use qclog_core::store::LogBackend;

use crate::backend::HttpBackend;
use crate::util::{exit_error, pretty, report_core_error, split_assignment};

#[derive(Args)]
pub struct EntryArgs {
    /// Production date (YYYY-MM-DD), defaults to today in the plant time zone
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    shift: String,
    #[arg(long)]
    line: String,
    /// Inspector name; taken from the latest existing record when omitted
    #[arg(long, env = "QCLOG_INSPECTOR")]
    inspector: Option<String>,
    /// Product model under inspection
    #[arg(long)]
    model: Option<String>,
    /// Measured value, repeatable: --set "Voltage Test=231"
    #[arg(long = "set", value_name = "NAME=VALUE", allow_hyphen_values = true)]
    values: Vec<String>,
    /// Remark, repeatable: --remark "Voltage Test=tap high"
    #[arg(long = "remark", value_name = "NAME=TEXT")]
    remarks: Vec<String>,
    /// Validate and print the batch without submitting
    #[arg(long)]
    dry_run: bool,
}

pub async fn run(api_url: &str, today: NaiveDate, args: EntryArgs) -> i32 {
    let backend = HttpBackend::new(api_url);
    let date = args.date.unwrap_or(today);
    let mut session = EntrySession::new();
    if let Some(name) = &args.inspector {
        session.set_inspector_name(name);
    }
    session.set_model_name(args.model.as_deref());

    let summary = match session
        .load_context(&backend, date, &args.shift, &args.line)
        .await
    {
        Ok(s) => s,
        Err(e) => return report_core_error(&e),
    };
    tracing::info!(
        active = summary.active,
        prefilled = summary.prefilled,
        fresh = summary.fresh,
        "context loaded"
    );

    // Remarks first, so a value is judged together with its explanation.
    for (raw, field) in args
        .remarks
        .iter()
        .map(|r| (r, EntryField::Remark))
        .chain(args.values.iter().map(|v| (v, EntryField::Value)))
    {
        if let Err(e) = apply(&mut session, raw, field) {
            return report_core_error(&e);
        }
    }

    submit_or_report(&mut session, &backend, summary, args.dry_run).await
}

fn apply(session: &mut EntrySession, raw: &str, field: EntryField) -> Result<(), CoreError> {
    let (name, text) = match split_assignment(raw) {
        Ok(pair) => pair,
        Err(message) => exit_error(&message, Some("Use NAME=VALUE with the catalog name")),
    };
    let Some(id) = session.parameter_id_by_name(&name) else {
        exit_error(
            &format!("'{name}' is not in the active parameter set for this context"),
            Some("Logged contexts only accept the parameters already recorded for them"),
        );
    };
    session.set_entry(id, field, &text)?;
    Ok(())
}

async fn submit_or_report<B: LogBackend>(
    session: &mut EntrySession,
    backend: &B,
    summary: LoadSummary,
    dry_run: bool,
) -> i32 {
    let snapshot = session.snapshot();
    let verdicts: Vec<serde_json::Value> = snapshot
        .rows
        .iter()
        .filter(|r| r.is_filled() || !r.verdict.is_valid())
        .map(|r| {
            json!({
                "parameter": r.parameter.name,
                "unit": r.parameter.unit_label(),
                "value": r.value,
                "remark": r.remark,
                "verdict": r.verdict,
            })
        })
        .collect();

    if !snapshot.can_submit {
        let reason = session
            .build_batch()
            .err()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "entry cannot be submitted".to_string());
        eprintln!(
            "{}",
            pretty(&json!({
                "error": "not_submittable",
                "message": reason,
                "load": summary,
                "entries": verdicts,
            }))
        );
        return 1;
    }

    if dry_run {
        return match session.build_batch() {
            Ok(items) => {
                println!(
                    "{}",
                    pretty(&json!({ "load": summary, "entries": verdicts, "items": items }))
                );
                0
            }
            Err(e) => report_core_error(&e),
        };
    }

    match session.submit(backend).await {
        Ok(receipt) => {
            println!(
                "{}",
                pretty(&json!({
                    "load": summary,
                    "entries": verdicts,
                    "inserted": receipt.inserted(),
                    "updated": receipt.updated(),
                    "items": receipt.items,
                }))
            );
            0
        }
        Err(e) => report_core_error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qclog_core::parameters::{Parameter, ParameterKind};
    use qclog_core::store::MemoryLogStore;

    fn voltage() -> Parameter {
        Parameter {
            id: 1,
            name: "Voltage Test".into(),
            kind: ParameterKind::Quantitative,
            unit: Some("V".into()),
            min: Some(220.0),
            max: Some(240.0),
            criteria: None,
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
    }

    async fn session_for(store: &MemoryLogStore) -> (EntrySession, LoadSummary) {
        let mut session = EntrySession::new();
        session.set_inspector_name("Priya");
        let summary = session
            .load_context(store, day(), "A", "L1")
            .await
            .expect("load");
        (session, summary)
    }

    #[tokio::test]
    async fn out_of_range_without_remark_is_refused() {
        let store = MemoryLogStore::new(vec![voltage()]);
        let (mut session, summary) = session_for(&store).await;
        apply(&mut session, "Voltage Test=250", EntryField::Value).expect("value");

        let code = submit_or_report(&mut session, &store, summary, false).await;
        assert_eq!(code, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remark_unblocks_submission() {
        let store = MemoryLogStore::new(vec![voltage()]);
        let (mut session, summary) = session_for(&store).await;
        apply(&mut session, "Voltage Test=tap high", EntryField::Remark).expect("remark");
        apply(&mut session, "Voltage Test=250", EntryField::Value).expect("value");

        let code = submit_or_report(&mut session, &store, summary, false).await;
        assert_eq!(code, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = MemoryLogStore::new(vec![voltage()]);
        let (mut session, summary) = session_for(&store).await;
        apply(&mut session, "Voltage Test=230", EntryField::Value).expect("value");

        let code = submit_or_report(&mut session, &store, summary, true).await;
        assert_eq!(code, 0);
        assert!(store.is_empty());
    }
}
