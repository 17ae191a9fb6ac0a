//! CSV renderings of query results.
//!
//! Every field is double-quoted with embedded quotes doubled; rows are
//! joined with `\n`.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::logs::LogView;

/// Layout of an export file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportLayout {
    /// One row per (shift, line, parameter, unit) with value/remark column
    /// pairs for each distinct date.
    DatePivot,
    /// One row per log record.
    Flat,
}

const FLAT_HEADERS: [&str; 8] = [
    "DATE",
    "SHIFT",
    "LINE",
    "PARAMETER",
    "UNIT",
    "VALUE",
    "REMARKS",
    "INSPECTOR",
];

pub fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn join_row<S: AsRef<str>>(fields: impl IntoIterator<Item = S>) -> String {
    fields
        .into_iter()
        .map(|f| quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

fn display_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn render(layout: ExportLayout, rows: &[LogView]) -> String {
    match layout {
        ExportLayout::DatePivot => render_date_pivot(rows),
        ExportLayout::Flat => render_flat(rows),
    }
}

pub fn render_flat(rows: &[LogView]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(join_row(FLAT_HEADERS));
    for row in rows {
        let r = &row.record;
        lines.push(join_row([
            r.log_datetime.date().to_string(),
            r.shift_name.clone(),
            r.line_name.clone(),
            row.parameter_name.clone().unwrap_or_default(),
            row.unit.clone().unwrap_or_default(),
            r.value_recorded.clone(),
            r.remarks.clone().unwrap_or_default(),
            r.inspector_name.clone().unwrap_or_default(),
        ]));
    }
    lines.join("\n")
}

pub fn render_date_pivot(rows: &[LogView]) -> String {
    let dates: BTreeSet<NaiveDate> = rows.iter().map(|r| r.record.log_datetime.date()).collect();
    let date_slot: HashMap<NaiveDate, usize> =
        dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let mut headers: Vec<String> = ["SHIFT", "LINE", "PARAMETER", "UNIT OF MEASUREMENT"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    for date in &dates {
        let label = display_date(*date);
        headers.push(format!("VALUE -{label}"));
        headers.push(format!("REMARK -{label}"));
    }

    type RowKey = (String, String, String, String);
    let mut order: Vec<RowKey> = Vec::new();
    let mut cells: HashMap<RowKey, Vec<String>> = HashMap::new();

    for row in rows {
        let r = &row.record;
        let key: RowKey = (
            r.shift_name.trim().to_string(),
            r.line_name.trim().to_string(),
            row.parameter_name.as_deref().unwrap_or_default().trim().to_string(),
            row.unit.as_deref().unwrap_or_default().trim().to_string(),
        );
        let slots = cells.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            vec![String::new(); dates.len() * 2]
        });
        let slot = date_slot[&r.log_datetime.date()];
        slots[slot * 2] = r.value_recorded.clone();
        slots[slot * 2 + 1] = r.remarks.clone().unwrap_or_default();
    }

    let mut lines = Vec::with_capacity(order.len() + 1);
    lines.push(join_row(&headers));
    for key in order {
        let mut fields = vec![key.0.clone(), key.1.clone(), key.2.clone(), key.3.clone()];
        if let Some(slots) = cells.remove(&key) {
            fields.extend(slots);
        }
        lines.push(join_row(fields));
    }
    lines.join("\n")
}
