//! One operator's data-capture session.
//!
//! A session holds the header (date, shift, line, inspector), the active
//! parameter set for the loaded context and a per-parameter entry with its
//! current verdict. Verdicts are recomputed for a single parameter whenever
//! its value or remark changes; the submit gate reads the stored verdicts.
//!
//! Loading and submitting are split into `begin_*` / `finish_*` halves so a
//! caller driving its own I/O can keep the session responsive. Every header
//! change bumps a generation counter; a response carrying an older
//! generation is discarded instead of applied.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{ContextField, CoreError};
use crate::logs::{BatchReceipt, EntryContext, LogItem, LogRecord, MeasuredValue, latest_by_parameter};
use crate::parameters::{Parameter, ParameterCatalog, ParameterKind};
use crate::store::LogBackend;
use crate::validation::{self, QUALITATIVE_TOKENS, ValidationResult};

/// Which half of an entry is being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Value,
    Remark,
}

/// A parameter in the active set together with its entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryRow {
    pub parameter: Parameter,
    pub value: String,
    pub remark: String,
    pub verdict: ValidationResult,
}

impl EntryRow {
    fn blank(parameter: Parameter) -> Self {
        Self {
            parameter,
            value: String::new(),
            remark: String::new(),
            verdict: ValidationResult::Valid,
        }
    }

    fn revalidate(&mut self) -> &ValidationResult {
        self.verdict = validation::evaluate(&self.parameter, &self.value, &self.remark);
        &self.verdict
    }

    pub fn is_filled(&self) -> bool {
        !self.value.trim().is_empty()
    }
}

/// Outcome of applying a context load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Size of the active parameter set
    pub active: usize,
    /// Entries seeded from existing records
    pub prefilled: usize,
    /// True when the context had no records and the full catalog is active
    pub fresh: bool,
}

/// Read-only view of a session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub context: Option<EntryContext>,
    pub inspector_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub rows: Vec<EntryRow>,
    pub can_submit: bool,
    pub submitting: bool,
}

/// Proof that a load was started for a given generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
    pub context: EntryContext,
}

/// Proof that a submit was started; required to finish it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTicket {
    generation: u64,
}

#[derive(Debug, Default)]
pub struct EntrySession {
    date: Option<NaiveDate>,
    shift: String,
    line: String,
    inspector_name: String,
    model_name: Option<String>,

    loaded: Option<EntryContext>,
    rows: Vec<EntryRow>,
    index: HashMap<i64, usize>,
    invalid: BTreeSet<i64>,

    generation: u64,
    submit_in_flight: bool,
}

impl EntrySession {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- header --------------------------------------------------------

    pub fn set_date(&mut self, date: NaiveDate) {
        if self.date != Some(date) {
            self.date = Some(date);
            self.generation += 1;
        }
    }

    pub fn set_shift(&mut self, shift: &str) {
        let shift = shift.trim();
        if self.shift != shift {
            self.shift = shift.to_string();
            self.generation += 1;
        }
    }

    pub fn set_line(&mut self, line: &str) {
        let line = line.trim();
        if self.line != line {
            self.line = line.to_string();
            self.generation += 1;
        }
    }

    pub fn set_inspector_name(&mut self, name: &str) {
        self.inspector_name = name.trim().to_string();
    }

    pub fn set_model_name(&mut self, model: Option<&str>) {
        self.model_name = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
    }

    pub fn inspector_name(&self) -> &str {
        &self.inspector_name
    }

    /// The header as a context, or the first missing field.
    pub fn header_context(&self) -> Result<EntryContext, CoreError> {
        let date = self.date.ok_or(CoreError::MissingContext {
            field: ContextField::Date,
        })?;
        if self.shift.is_empty() {
            return Err(CoreError::MissingContext {
                field: ContextField::Shift,
            });
        }
        if self.line.is_empty() {
            return Err(CoreError::MissingContext {
                field: ContextField::Line,
            });
        }
        Ok(EntryContext {
            date,
            shift: self.shift.clone(),
            line: self.line.clone(),
        })
    }

    /// Context the active set currently belongs to.
    pub fn loaded_context(&self) -> Option<&EntryContext> {
        self.loaded.as_ref()
    }

    // ---- loading -------------------------------------------------------

    pub fn begin_load(&mut self) -> Result<LoadTicket, CoreError> {
        let context = self.header_context()?;
        self.generation += 1;
        Ok(LoadTicket {
            generation: self.generation,
            context,
        })
    }

    /// Apply a fetched catalog and the context's existing records. A failed
    /// fetch or a stale ticket leaves the current state untouched.
    pub fn finish_load(
        &mut self,
        ticket: LoadTicket,
        fetched: Result<(Vec<Parameter>, Vec<LogRecord>), CoreError>,
    ) -> Result<LoadSummary, CoreError> {
        if ticket.generation != self.generation {
            tracing::debug!(context = ?ticket.context, "discarding stale context load");
            return Err(CoreError::StaleContext);
        }
        let (parameters, records) = fetched?;
        let catalog = ParameterCatalog::new(parameters)?;

        let latest = latest_by_parameter(&records);
        let fresh = records.is_empty();

        for parameter_id in latest.keys() {
            if catalog.get(*parameter_id).is_none() {
                tracing::warn!(parameter_id, "record references a parameter missing from the catalog");
            }
        }

        // A logged context reopens for correction only, unless none of its
        // records still match the catalog.
        let mut rows: Vec<EntryRow> = catalog
            .iter()
            .filter(|p| fresh || latest.contains_key(&p.id))
            .cloned()
            .map(EntryRow::blank)
            .collect();
        if rows.is_empty() && !fresh {
            tracing::warn!(
                context = ?ticket.context,
                records = records.len(),
                "no logged parameter is in the catalog; activating the full catalog"
            );
            rows = catalog.iter().cloned().map(EntryRow::blank).collect();
        }

        let mut prefilled = 0;
        for row in &mut rows {
            if let Some(record) = latest.get(&row.parameter.id) {
                row.value = record.value_recorded.clone();
                row.remark = record.remarks.clone().unwrap_or_default();
                prefilled += 1;
            }
            row.revalidate();
        }

        if self.inspector_name.is_empty() {
            if let Some(inspector) = records
                .iter()
                .max_by_key(|r| r.log_id)
                .and_then(|r| r.inspector_name.as_deref())
            {
                self.inspector_name = inspector.trim().to_string();
            }
        }

        self.index = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.parameter.id, idx))
            .collect();
        self.invalid = rows
            .iter()
            .filter(|r| !r.verdict.is_valid())
            .map(|r| r.parameter.id)
            .collect();
        self.rows = rows;
        self.loaded = Some(ticket.context);

        Ok(LoadSummary {
            active: self.rows.len(),
            prefilled,
            fresh,
        })
    }

    /// Set the header and load the context through `backend`.
    pub async fn load_context<B: LogBackend>(
        &mut self,
        backend: &B,
        date: NaiveDate,
        shift: &str,
        line: &str,
    ) -> Result<LoadSummary, CoreError> {
        self.set_date(date);
        self.set_shift(shift);
        self.set_line(line);
        self.reload(backend).await
    }

    /// Reload the context currently named by the header.
    pub async fn reload<B: LogBackend>(&mut self, backend: &B) -> Result<LoadSummary, CoreError> {
        let ticket = self.begin_load()?;
        let fetched = async {
            let parameters = backend.fetch_parameters().await?;
            let records = backend.fetch_context(&ticket.context).await?;
            Ok::<_, CoreError>((parameters, records))
        }
        .await;
        self.finish_load(ticket, fetched)
    }

    // ---- editing -------------------------------------------------------

    /// Update one half of an entry and re-evaluate that parameter only.
    pub fn set_entry(
        &mut self,
        parameter_id: i64,
        field: EntryField,
        new_value: &str,
    ) -> Result<&ValidationResult, CoreError> {
        let idx = *self
            .index
            .get(&parameter_id)
            .ok_or(CoreError::NotInActiveSet(parameter_id))?;
        let row = &mut self.rows[idx];

        match field {
            EntryField::Value => {
                let value = new_value.trim();
                if row.parameter.kind == ParameterKind::Qualitative
                    && !value.is_empty()
                    && !QUALITATIVE_TOKENS.contains(&value)
                {
                    return Err(CoreError::Validation {
                        parameter_id,
                        message: format!(
                            "'{value}' is not a verdict; use one of {}",
                            QUALITATIVE_TOKENS.join(", ")
                        ),
                    });
                }
                row.value = value.to_string();
            }
            EntryField::Remark => row.remark = new_value.to_string(),
        }

        if row.revalidate().is_valid() {
            self.invalid.remove(&parameter_id);
        } else {
            self.invalid.insert(parameter_id);
        }
        Ok(&self.rows[idx].verdict)
    }

    /// Convenience lookup of an active parameter by display name.
    pub fn parameter_id_by_name(&self, name: &str) -> Option<i64> {
        let name = name.trim();
        self.rows
            .iter()
            .find(|r| r.parameter.name == name)
            .map(|r| r.parameter.id)
    }

    pub fn rows(&self) -> &[EntryRow] {
        &self.rows
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            context: self.loaded.clone(),
            inspector_name: self.inspector_name.clone(),
            model_name: self.model_name.clone(),
            rows: self.rows.clone(),
            can_submit: self.can_submit(),
            submitting: self.submit_in_flight,
        }
    }

    pub fn entry(&self, parameter_id: i64) -> Option<&EntryRow> {
        self.index.get(&parameter_id).map(|&idx| &self.rows[idx])
    }

    pub fn active_parameter_ids(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.parameter.id).collect()
    }

    /// Current validation failures, in active-set order.
    pub fn errors(&self) -> impl Iterator<Item = (i64, &str)> {
        self.rows
            .iter()
            .filter_map(|r| r.verdict.message().map(|m| (r.parameter.id, m)))
    }

    pub fn has_errors(&self) -> bool {
        !self.invalid.is_empty()
    }

    // ---- submitting ----------------------------------------------------

    fn header_matches_loaded(&self) -> Result<EntryContext, CoreError> {
        let header = self.header_context()?;
        if self.inspector_name.is_empty() {
            return Err(CoreError::MissingContext {
                field: ContextField::InspectorName,
            });
        }
        match &self.loaded {
            Some(loaded) if *loaded == header => Ok(header),
            _ => Err(CoreError::StaleContext),
        }
    }

    /// Header complete, context loaded, no invalid entry, something filled.
    pub fn can_submit(&self) -> bool {
        self.header_matches_loaded().is_ok()
            && self.invalid.is_empty()
            && self.rows.iter().any(EntryRow::is_filled)
    }

    /// Items for every filled entry of the active set.
    pub fn build_batch(&self) -> Result<Vec<LogItem>, CoreError> {
        let context = self.header_matches_loaded()?;

        if let Some(row) = self.rows.iter().find(|r| !r.verdict.is_valid()) {
            return Err(CoreError::Validation {
                parameter_id: row.parameter.id,
                message: row.verdict.message().unwrap_or_default().to_string(),
            });
        }

        let mut items = Vec::new();
        for row in self.rows.iter().filter(|r| r.is_filled()) {
            let value = match row.parameter.kind {
                ParameterKind::Quantitative => {
                    let reading = validation::parse_reading(&row.value).ok_or_else(|| {
                        CoreError::Validation {
                            parameter_id: row.parameter.id,
                            message: format!("'{}' is not a number", row.value),
                        }
                    })?;
                    MeasuredValue::Number(reading)
                }
                ParameterKind::Qualitative => MeasuredValue::Text(row.value.clone()),
            };

            items.push(LogItem {
                log_datetime: context.log_datetime(),
                line_name: context.line.clone(),
                shift_name: context.shift.clone(),
                model_name: self.model_name.clone(),
                parameter_id: Some(row.parameter.id),
                measure_name: Some(row.parameter.name.clone()),
                value,
                remark: Some(row.remark.trim().to_string()).filter(|r| !r.is_empty()),
                inspector_name: Some(self.inspector_name.clone()),
                criteria: match row.parameter.kind {
                    ParameterKind::Qualitative => row.parameter.criteria.clone(),
                    ParameterKind::Quantitative => None,
                },
                unit: row.parameter.unit.clone(),
                min: row.parameter.min,
                max: row.parameter.max,
            });
        }

        if items.is_empty() {
            return Err(CoreError::NoData);
        }
        Ok(items)
    }

    /// Start a submission. Only one may be pending at a time.
    pub fn begin_submit(&mut self) -> Result<(SubmitTicket, Vec<LogItem>), CoreError> {
        if self.submit_in_flight {
            return Err(CoreError::SubmitInFlight);
        }
        let items = self.build_batch()?;
        self.submit_in_flight = true;
        Ok((
            SubmitTicket {
                generation: self.generation,
            },
            items,
        ))
    }

    /// Finish a submission. On success the entries of the still-current
    /// context are cleared; header fields stay for the next correction.
    /// On failure everything is kept so the operator can retry.
    pub fn finish_submit(
        &mut self,
        ticket: SubmitTicket,
        result: Result<BatchReceipt, CoreError>,
    ) -> Result<BatchReceipt, CoreError> {
        self.submit_in_flight = false;
        let receipt = result?;

        if ticket.generation == self.generation {
            for row in &mut self.rows {
                row.value.clear();
                row.remark.clear();
                row.verdict = ValidationResult::Valid;
            }
            self.invalid.clear();
        } else {
            tracing::debug!("context changed during submit; keeping current entries");
        }
        Ok(receipt)
    }

    pub fn is_submitting(&self) -> bool {
        self.submit_in_flight
    }

    pub async fn submit<B: LogBackend>(&mut self, backend: &B) -> Result<BatchReceipt, CoreError> {
        let (ticket, items) = self.begin_submit()?;
        let result = backend.apply_batch(items).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "batch submission failed");
        }
        self.finish_submit(ticket, result)
    }
}
