//! The log upsert protocol and the boundary an entry session talks to.
//!
//! Every item goes through the same probe-then-act sequence: resolve the
//! parameter, look up the row for `(log_datetime, line, shift, parameter)`,
//! then update that row in place or insert a new one. A batch runs all of
//! its items against one staged copy and only publishes it when every item
//! succeeded.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use crate::error::CoreError;
use crate::logs::{
    BatchReceipt, EntryContext, ItemReceipt, LogItem, LogKey, LogQuery, LogRecord, LogView,
    UpsertOutcome, DEFAULT_QUERY_LIMIT,
};
use crate::parameters::{Parameter, ParameterCatalog, ParameterDraft};

/// What an entry session needs from storage.
pub trait LogBackend {
    /// Catalog fetch.
    fn fetch_parameters(&self) -> impl Future<Output = Result<Vec<Parameter>, CoreError>> + Send;

    /// Existing records for one context (full-day window).
    fn fetch_context(
        &self,
        context: &EntryContext,
    ) -> impl Future<Output = Result<Vec<LogRecord>, CoreError>> + Send;

    /// Apply a batch atomically.
    fn apply_batch(
        &self,
        items: Vec<LogItem>,
    ) -> impl Future<Output = Result<BatchReceipt, CoreError>> + Send;
}

/// Resolve the item's parameter against the catalog.
pub fn resolve_parameter<'c>(
    catalog: &'c ParameterCatalog,
    item: &LogItem,
    index: usize,
) -> Result<&'c Parameter, CoreError> {
    catalog
        .resolve(item.parameter_id, item.measure_name.as_deref())
        .ok_or_else(|| CoreError::UnknownParameter {
            index,
            reference: item.parameter_reference(),
        })
}

/// Probe-then-act for one item against a set of rows. When legacy
/// duplicates share the key, the row with the greatest `log_id` is the
/// one updated.
pub fn upsert_into(
    rows: &mut Vec<LogRecord>,
    next_log_id: &mut i64,
    catalog: &ParameterCatalog,
    item: &LogItem,
    index: usize,
) -> Result<ItemReceipt, CoreError> {
    item.check_context()?;
    let parameter = resolve_parameter(catalog, item, index)?;
    let key = item.key(parameter.id);

    let existing = rows
        .iter_mut()
        .filter(|r| r.key() == key)
        .max_by_key(|r| r.log_id);

    let (log_id, outcome) = match existing {
        Some(row) => {
            row.value_recorded = item.value.to_stored();
            row.remarks = blank_to_none(item.remark.as_deref());
            row.criteria = blank_to_none(item.criteria.as_deref());
            row.inspector_name = blank_to_none(item.inspector_name.as_deref());
            row.model_name = blank_to_none(item.model_name.as_deref());
            (row.log_id, UpsertOutcome::Updated)
        }
        None => {
            let log_id = *next_log_id;
            *next_log_id += 1;
            rows.push(new_record(log_id, key, item));
            (log_id, UpsertOutcome::Inserted)
        }
    };

    tracing::debug!(
        index,
        log_id,
        parameter_id = parameter.id,
        outcome = ?outcome,
        "log item applied"
    );

    Ok(ItemReceipt {
        index,
        log_id,
        parameter_id: parameter.id,
        outcome,
    })
}

fn new_record(log_id: i64, key: LogKey, item: &LogItem) -> LogRecord {
    LogRecord {
        log_id,
        log_datetime: key.log_datetime,
        line_name: key.line_name,
        shift_name: key.shift_name,
        model_name: blank_to_none(item.model_name.as_deref()),
        parameter_id: key.parameter_id,
        value_recorded: item.value.to_stored(),
        remarks: blank_to_none(item.remark.as_deref()),
        inspector_name: blank_to_none(item.inspector_name.as_deref()),
        criteria: blank_to_none(item.criteria.as_deref()),
    }
}

pub fn blank_to_none(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Default)]
struct MemoryState {
    parameters: Vec<Parameter>,
    records: Vec<LogRecord>,
    next_log_id: i64,
    next_parameter_id: i64,
}

/// In-process log store with the same upsert semantics as the SQL store.
/// Used for offline sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    state: Mutex<MemoryState>,
}

impl MemoryLogStore {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        let next_parameter_id = parameters.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        Self {
            state: Mutex::new(MemoryState {
                parameters,
                records: Vec::new(),
                next_log_id: 1,
                next_parameter_id,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave a half-applied batch
        // behind, so the data is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a catalog entry, enforcing name uniqueness.
    pub fn create_parameter(&self, draft: &ParameterDraft) -> Result<Parameter, CoreError> {
        let draft = draft.normalized()?;
        let mut state = self.lock();
        if state.parameters.iter().any(|p| p.name == draft.name) {
            return Err(CoreError::DuplicateDefinition { name: draft.name });
        }
        let id = state.next_parameter_id;
        state.next_parameter_id += 1;
        let parameter = draft.into_parameter(id);
        state.parameters.push(parameter.clone());
        Ok(parameter)
    }

    /// Single-item upsert; its own atomic unit.
    pub fn create_log(&self, item: LogItem) -> Result<ItemReceipt, CoreError> {
        let mut state = self.lock();
        let catalog = ParameterCatalog::new(state.parameters.clone())?;
        let MemoryState {
            records,
            next_log_id,
            ..
        } = &mut *state;
        upsert_into(records, next_log_id, &catalog, &item, 0)
    }

    /// All-or-nothing batch upsert.
    pub fn apply_items(&self, items: &[LogItem]) -> Result<BatchReceipt, CoreError> {
        let mut state = self.lock();
        let catalog = ParameterCatalog::new(state.parameters.clone())?;

        let mut staged = state.records.clone();
        let mut next_log_id = state.next_log_id;
        let mut receipt = BatchReceipt::default();

        for (index, item) in items.iter().enumerate() {
            match upsert_into(&mut staged, &mut next_log_id, &catalog, item, index) {
                Ok(item_receipt) => receipt.items.push(item_receipt),
                Err(err) => {
                    tracing::warn!(index, error = %err, "batch rolled back");
                    return Err(err);
                }
            }
        }

        state.records = staged;
        state.next_log_id = next_log_id;
        Ok(receipt)
    }

    /// Append rows verbatim, bypassing the upsert rule. Models data
    /// imported before the rule existed; duplicates are kept.
    pub fn import_records(&self, records: Vec<LogRecord>) -> Vec<i64> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            record.log_id = state.next_log_id;
            state.next_log_id += 1;
            ids.push(record.log_id);
            state.records.push(record);
        }
        ids
    }

    /// Filtered query, most recent first, joined with parameter metadata.
    pub fn query(&self, query: &LogQuery) -> Vec<LogView> {
        let state = self.lock();
        let mut rows: Vec<&LogRecord> = state.records.iter().filter(|r| query.matches(r)).collect();
        rows.sort_by(|a, b| {
            b.log_datetime
                .cmp(&a.log_datetime)
                .then(b.log_id.cmp(&a.log_id))
        });

        let limit = query.effective_limit(DEFAULT_QUERY_LIMIT) as usize;
        rows.into_iter()
            .take(limit)
            .map(|record| {
                let parameter = state.parameters.iter().find(|p| p.id == record.parameter_id);
                LogView {
                    record: record.clone(),
                    parameter_name: parameter.map(|p| p.name.clone()),
                    unit: parameter.and_then(|p| p.unit.clone()),
                }
            })
            .collect()
    }

    pub fn records_for(&self, context: &EntryContext) -> Vec<LogRecord> {
        let (start, end) = context.day_window();
        self.lock()
            .records
            .iter()
            .filter(|r| {
                r.log_datetime >= start
                    && r.log_datetime < end
                    && r.shift_name == context.shift
                    && r.line_name == context.line
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogBackend for MemoryLogStore {
    async fn fetch_parameters(&self) -> Result<Vec<Parameter>, CoreError> {
        Ok(self.lock().parameters.clone())
    }

    async fn fetch_context(&self, context: &EntryContext) -> Result<Vec<LogRecord>, CoreError> {
        Ok(self.records_for(context))
    }

    async fn apply_batch(&self, items: Vec<LogItem>) -> Result<BatchReceipt, CoreError> {
        if items.is_empty() {
            return Err(CoreError::NoData);
        }
        self.apply_items(&items)
    }
}
