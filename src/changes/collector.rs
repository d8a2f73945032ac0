use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::document::{DetailId, DocumentPath, LogicResult, SaveStatus, ValidStatus};

/// Latest observed state of one field within one checkout. Only the parts that
/// changed are set.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldChange {
    pub field_name: String,
    pub key: bool,
    pub value: Option<Value>,
    pub readonly: Option<bool>,
    pub mandatory: Option<bool>,
    pub displayed: Option<bool>,
}

impl FieldChange {
    fn new(field_name: &str, key: bool) -> Self {
        Self {
            field_name: field_name.to_string(),
            key,
            value: None,
            readonly: None,
            mandatory: None,
            displayed: None,
        }
    }
}

/// Computed logic flags of a field, reported by a validation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FieldFlags {
    pub readonly: bool,
    pub mandatory: bool,
    pub displayed: bool,
}

/// Coarse state of one detail tab.
#[derive(Clone, Debug, PartialEq)]
pub struct IncludedDetailInfo {
    pub detail_id: DetailId,
    pub stale: bool,
    pub allow_create: Option<LogicResult>,
    pub allow_delete: Option<LogicResult>,
}

impl IncludedDetailInfo {
    fn merge(&mut self, other: IncludedDetailInfo) {
        self.stale |= other.stale;
        if other.allow_create.is_some() {
            self.allow_create = other.allow_create;
        }
        if other.allow_delete.is_some() {
            self.allow_delete = other.allow_delete;
        }
    }
}

/// Everything that changed for one document path during one checkout.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentChanges {
    path: DocumentPath,
    field_changes: Vec<FieldChange>,
    valid_status: Option<ValidStatus>,
    save_status: Option<SaveStatus>,
    included_detail_infos: Vec<IncludedDetailInfo>,
    deleted: bool,
}

impl DocumentChanges {
    fn new(path: DocumentPath) -> Self {
        Self {
            path,
            field_changes: Vec::new(),
            valid_status: None,
            save_status: None,
            included_detail_infos: Vec::new(),
            deleted: false,
        }
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// Field changes in the order the fields were first touched.
    pub fn field_changes(&self) -> &[FieldChange] {
        &self.field_changes
    }

    pub fn valid_status(&self) -> Option<&ValidStatus> {
        self.valid_status.as_ref()
    }

    pub fn save_status(&self) -> Option<&SaveStatus> {
        self.save_status.as_ref()
    }

    pub fn included_detail_infos(&self) -> &[IncludedDetailInfo] {
        &self.included_detail_infos
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_empty(&self) -> bool {
        !self.deleted
            && self.field_changes.is_empty()
            && self.valid_status.is_none()
            && self.save_status.is_none()
            && self.included_detail_infos.is_empty()
    }

    fn field_change_mut(&mut self, field_name: &str, key: bool) -> &mut FieldChange {
        let index = match self
            .field_changes
            .iter()
            .position(|change| change.field_name == field_name)
        {
            Some(index) => index,
            None => {
                self.field_changes.push(FieldChange::new(field_name, key));
                self.field_changes.len() - 1
            }
        };
        let change = &mut self.field_changes[index];
        change.key |= key;
        change
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
        self.field_changes.clear();
        self.valid_status = None;
        self.save_status = None;
        self.included_detail_infos.clear();
    }
}

/// Receives the observable changes a document makes while it is checked out.
pub trait DocumentChangesCollector: Send + Sync + fmt::Debug {
    /// Records the new value of a field. The last value recorded for a field
    /// wins.
    fn record_field_change(&self, path: &DocumentPath, field_name: &str, key: bool, value: &Value);

    fn record_field_flags(&self, path: &DocumentPath, field_name: &str, flags: FieldFlags);

    /// Marks the path deleted. Nothing else is recorded for it afterwards.
    fn record_deleted(&self, path: &DocumentPath);

    fn record_valid_status(&self, path: &DocumentPath, status: &ValidStatus);

    fn record_save_status(&self, path: &DocumentPath, status: &SaveStatus);

    fn record_detail_info_change(
        &self,
        path: &DocumentPath,
        detail_id: &DetailId,
        stale: bool,
        allow_create: Option<LogicResult>,
        allow_delete: Option<LogicResult>,
    );

    /// One entry per changed path, in the order the paths were first
    /// touched. Empty entries are skipped.
    fn stream_ordered_document_changes(&self) -> Vec<DocumentChanges>;
}

/// Collector that drops everything. Used for cached snapshots and for
/// checkouts whose diff nobody reads.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChangesCollector;

impl NullChangesCollector {
    pub fn shared() -> Arc<dyn DocumentChangesCollector> {
        Arc::new(NullChangesCollector)
    }
}

impl DocumentChangesCollector for NullChangesCollector {
    fn record_field_change(&self, _: &DocumentPath, _: &str, _: bool, _: &Value) {}

    fn record_field_flags(&self, _: &DocumentPath, _: &str, _: FieldFlags) {}

    fn record_deleted(&self, _: &DocumentPath) {}

    fn record_valid_status(&self, _: &DocumentPath, _: &ValidStatus) {}

    fn record_save_status(&self, _: &DocumentPath, _: &SaveStatus) {}

    fn record_detail_info_change(
        &self,
        _: &DocumentPath,
        _: &DetailId,
        _: bool,
        _: Option<LogicResult>,
        _: Option<LogicResult>,
    ) {
    }

    fn stream_ordered_document_changes(&self) -> Vec<DocumentChanges> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
struct CollectorState {
    touched: Vec<DocumentPath>,
    by_path: HashMap<DocumentPath, DocumentChanges>,
}

impl CollectorState {
    /// Changes for a path that accepts further recording, i.e. is not
    /// deleted.
    fn live_changes(&mut self, path: &DocumentPath) -> Option<&mut DocumentChanges> {
        let changes = self.changes(path);
        if changes.deleted {
            None
        } else {
            Some(changes)
        }
    }

    fn changes(&mut self, path: &DocumentPath) -> &mut DocumentChanges {
        if !self.by_path.contains_key(path) {
            self.touched.push(path.clone());
        }
        self.by_path
            .entry(path.clone())
            .or_insert_with(|| DocumentChanges::new(path.clone()))
    }
}

/// Default collector for one checkout session.
#[derive(Debug, Default)]
pub struct ChangesCollector {
    state: Mutex<CollectorState>,
}

impl ChangesCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<ChangesCollector> {
        Arc::new(Self::new())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CollectorState) -> R) -> R {
        // A panic while recording leaves at worst a partial diff; keep going.
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }
}

impl DocumentChangesCollector for ChangesCollector {
    fn record_field_change(&self, path: &DocumentPath, field_name: &str, key: bool, value: &Value) {
        self.with_state(|state| {
            if let Some(changes) = state.live_changes(path) {
                changes.field_change_mut(field_name, key).value = Some(value.clone());
            }
        })
    }

    fn record_field_flags(&self, path: &DocumentPath, field_name: &str, flags: FieldFlags) {
        self.with_state(|state| {
            if let Some(changes) = state.live_changes(path) {
                let change = changes.field_change_mut(field_name, false);
                change.readonly = Some(flags.readonly);
                change.mandatory = Some(flags.mandatory);
                change.displayed = Some(flags.displayed);
            }
        })
    }

    fn record_deleted(&self, path: &DocumentPath) {
        self.with_state(|state| state.changes(path).mark_deleted())
    }

    fn record_valid_status(&self, path: &DocumentPath, status: &ValidStatus) {
        self.with_state(|state| {
            if let Some(changes) = state.live_changes(path) {
                changes.valid_status = Some(status.clone());
            }
        })
    }

    fn record_save_status(&self, path: &DocumentPath, status: &SaveStatus) {
        self.with_state(|state| {
            if let Some(changes) = state.live_changes(path) {
                changes.save_status = Some(status.clone());
            }
        })
    }

    fn record_detail_info_change(
        &self,
        path: &DocumentPath,
        detail_id: &DetailId,
        stale: bool,
        allow_create: Option<LogicResult>,
        allow_delete: Option<LogicResult>,
    ) {
        let info = IncludedDetailInfo {
            detail_id: detail_id.clone(),
            stale,
            allow_create,
            allow_delete,
        };
        self.with_state(|state| {
            if let Some(changes) = state.live_changes(path) {
                match changes
                    .included_detail_infos
                    .iter_mut()
                    .find(|existing| &existing.detail_id == detail_id)
                {
                    Some(existing) => existing.merge(info),
                    None => changes.included_detail_infos.push(info),
                }
            }
        })
    }

    fn stream_ordered_document_changes(&self) -> Vec<DocumentChanges> {
        self.with_state(|state| {
            state
                .touched
                .iter()
                .filter_map(|path| state.by_path.get(path))
                .filter(|changes| !changes.is_empty())
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentId, DocumentType};
    use serde_json::json;

    fn path(id: i64) -> DocumentPath {
        DocumentPath::root(DocumentType::new("Address"), DocumentId::of(id))
    }

    #[test]
    fn same_field_collapses_to_latest_value() {
        let collector = ChangesCollector::new();
        collector.record_field_change(&path(1), "City", false, &json!("Berlin"));
        collector.record_field_change(&path(1), "City", false, &json!("Bonn"));

        let changes = collector.stream_ordered_document_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field_changes().len(), 1);
        assert_eq!(changes[0].field_changes()[0].value, Some(json!("Bonn")));
    }

    #[test]
    fn key_flag_survives_earlier_flag_change() {
        let collector = ChangesCollector::new();
        let flags = FieldFlags {
            readonly: true,
            mandatory: false,
            displayed: true,
        };
        collector.record_field_flags(&path(7), "C_Location_ID", flags);
        collector.record_field_change(&path(7), "C_Location_ID", true, &json!(7));

        let changes = collector.stream_ordered_document_changes();
        let change = &changes[0].field_changes()[0];
        assert!(change.key);
        assert_eq!(change.readonly, Some(true));
        assert_eq!(change.value, Some(json!(7)));
    }

    #[test]
    fn fields_keep_touch_order() {
        let collector = ChangesCollector::new();
        collector.record_field_change(&path(1), "Postal", false, &json!("53111"));
        collector.record_field_change(&path(1), "City", false, &json!("Bonn"));
        collector.record_field_change(&path(1), "Postal", false, &json!("53113"));

        let changes = collector.stream_ordered_document_changes();
        let names: Vec<_> = changes[0]
            .field_changes()
            .iter()
            .map(|change| change.field_name.as_str())
            .collect();
        assert_eq!(names, vec!["Postal", "City"]);
    }

    #[test]
    fn deletion_dominates() {
        let collector = ChangesCollector::new();
        collector.record_field_change(&path(1), "City", false, &json!("Bonn"));
        collector.record_valid_status(&path(1), &ValidStatus::Valid);
        collector.record_deleted(&path(1));
        collector.record_field_change(&path(1), "City", false, &json!("Köln"));

        let changes = collector.stream_ordered_document_changes();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_deleted());
        assert!(changes[0].field_changes().is_empty());
        assert!(changes[0].valid_status().is_none());
    }

    #[test]
    fn paths_keep_first_touch_order() {
        let collector = ChangesCollector::new();
        collector.record_field_change(&path(2), "City", false, &json!("A"));
        collector.record_field_change(&path(1), "City", false, &json!("B"));
        collector.record_field_change(&path(2), "City", false, &json!("C"));

        let ids: Vec<_> = collector
            .stream_ordered_document_changes()
            .iter()
            .map(|changes| changes.path().document_id().clone())
            .collect();
        assert_eq!(ids, vec![DocumentId::of(2), DocumentId::of(1)]);
    }

    #[test]
    fn detail_infos_merge_per_detail() {
        let collector = ChangesCollector::new();
        let lines = DetailId::new("lines");
        collector.record_detail_info_change(&path(1), &lines, true, None, None);
        collector.record_detail_info_change(
            &path(1),
            &lines,
            false,
            Some(LogicResult::with_reason(false, "processed")),
            None,
        );

        let changes = collector.stream_ordered_document_changes();
        let infos = changes[0].included_detail_infos();
        assert_eq!(infos.len(), 1);
        assert!(infos[0].stale);
        assert_eq!(infos[0].allow_create, Some(LogicResult::with_reason(false, "processed")));
        assert_eq!(infos[0].allow_delete, None);
    }

    #[test]
    fn null_collector_records_nothing() {
        let collector = NullChangesCollector;
        collector.record_field_change(&path(1), "City", false, &json!("Bonn"));
        collector.record_deleted(&path(1));
        assert!(collector.stream_ordered_document_changes().is_empty());
    }
}
