use std::sync::Arc;

use serde_json::Value;

use crate::changes::DocumentChangesCollector;
use crate::document::descriptor::DetailDescriptor;
use crate::document::{
    CopyMode, DetailId, Document, DocumentId, DocumentPath, LogicExpr, LogicResult,
};
use crate::error::{Error, Result};

/// Rows of one detail tab of a root document.
#[derive(Debug)]
pub struct IncludedDocumentsCollection {
    detail: DetailDescriptor,
    parent_path: DocumentPath,
    rows: Vec<Document>,
    next_row_id: i64,
    stale: bool,
    allow_create: LogicResult,
    allow_delete: LogicResult,
}

impl IncludedDocumentsCollection {
    pub(crate) fn new(detail: DetailDescriptor, parent_path: DocumentPath) -> Self {
        Self {
            detail,
            parent_path,
            rows: Vec::new(),
            next_row_id: 1,
            stale: false,
            allow_create: LogicResult::of(true),
            allow_delete: LogicResult::of(true),
        }
    }

    pub fn detail_id(&self) -> &DetailId {
        &self.detail.detail_id
    }

    pub fn rows(&self) -> &[Document] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn allow_create(&self) -> &LogicResult {
        &self.allow_create
    }

    pub fn allow_delete(&self) -> &LogicResult {
        &self.allow_delete
    }

    pub fn row(&self, row_id: &DocumentId) -> Option<&Document> {
        self.rows.iter().find(|row| row.document_id() == row_id)
    }

    pub(crate) fn row_mut(&mut self, row_id: &DocumentId) -> Result<&mut Document> {
        let entity_type = self.detail.entity.document_type().clone();
        self.rows
            .iter_mut()
            .find(|row| row.document_id() == row_id)
            .ok_or_else(|| Error::DocumentNotFound {
                document_type: entity_type,
                document_id: row_id.clone(),
            })
    }

    pub(crate) fn rows_mut(&mut self) -> impl Iterator<Item = &mut Document> {
        self.rows.iter_mut()
    }

    pub(crate) fn create_row(
        &mut self,
        collector: &Arc<dyn DocumentChangesCollector>,
    ) -> Result<&mut Document> {
        if !self.allow_create.value {
            return Err(Error::InvalidState(format!(
                "creating rows in {} is not allowed{}",
                self.detail.detail_id,
                reason_suffix(&self.allow_create)
            )));
        }

        let row_id = DocumentId::of(self.next_row_id);
        self.next_row_id += 1;
        let path = self
            .parent_path
            .included_row(self.detail.detail_id.clone(), row_id.clone())?;
        let mut row = Document::new(self.detail.entity.clone(), path, collector.clone());
        if let Some(key) = self.detail.entity.key_field() {
            let key_name = key.field_name.clone();
            row.set_value(&key_name, row_id.to_json_value())?;
        }
        log::trace!("INCLUDED CREATE: path='{}'", row.path());
        self.rows.push(row);
        let index = self.rows.len() - 1;
        Ok(&mut self.rows[index])
    }

    pub(crate) fn delete_rows(
        &mut self,
        row_ids: &[DocumentId],
        collector: &Arc<dyn DocumentChangesCollector>,
    ) -> Result<()> {
        if !self.allow_delete.value {
            return Err(Error::InvalidState(format!(
                "deleting rows from {} is not allowed{}",
                self.detail.detail_id,
                reason_suffix(&self.allow_delete)
            )));
        }
        if let Some(missing) = row_ids.iter().find(|id| self.row(id).is_none()) {
            return Err(Error::DocumentNotFound {
                document_type: self.detail.entity.document_type().clone(),
                document_id: missing.clone(),
            });
        }

        let (deleted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.rows)
            .into_iter()
            .partition(|row| row_ids.contains(row.document_id()));
        self.rows = kept;
        for row in deleted {
            log::trace!("INCLUDED DELETE: path='{}'", row.path());
            collector.record_deleted(row.path());
        }
        Ok(())
    }

    pub(crate) fn mark_stale(&mut self, collector: &Arc<dyn DocumentChangesCollector>) {
        self.stale = true;
        collector.record_detail_info_change(&self.parent_path, &self.detail.detail_id, true, None, None);
    }

    /// Re-evaluates the create/delete logic against the parent's values and
    /// reports whatever changed.
    pub(crate) fn update_allow_flags<'a, F>(
        &mut self,
        value_of: &F,
        collector: &Arc<dyn DocumentChangesCollector>,
    ) where
        F: Fn(&str) -> Option<&'a Value>,
    {
        let allow_create = evaluate_allow(&self.detail.allow_create, value_of, "create");
        let allow_delete = evaluate_allow(&self.detail.allow_delete, value_of, "delete");

        let create_changed = allow_create != self.allow_create;
        let delete_changed = allow_delete != self.allow_delete;
        if create_changed || delete_changed {
            collector.record_detail_info_change(
                &self.parent_path,
                &self.detail.detail_id,
                false,
                create_changed.then(|| allow_create.clone()),
                delete_changed.then(|| allow_delete.clone()),
            );
        }
        self.allow_create = allow_create;
        self.allow_delete = allow_delete;
    }

    /// Staleness is reported while the document is checked out and clears
    /// when it is checked back in.
    pub(crate) fn copy(&self, mode: &CopyMode) -> Self {
        Self {
            detail: self.detail.clone(),
            parent_path: self.parent_path.clone(),
            rows: self.rows.iter().map(|row| row.copy(mode.clone())).collect(),
            next_row_id: self.next_row_id,
            stale: self.stale && matches!(mode, CopyMode::CheckOutWritable(_)),
            allow_create: self.allow_create.clone(),
            allow_delete: self.allow_delete.clone(),
        }
    }

    pub(crate) fn has_dirty_rows(&self) -> bool {
        self.rows.iter().any(Document::is_dirty)
    }
}

impl PartialEq for IncludedDocumentsCollection {
    fn eq(&self, other: &Self) -> bool {
        self.detail.detail_id == other.detail.detail_id && self.rows == other.rows
    }
}

fn evaluate_allow<'a, F>(logic: &LogicExpr, value_of: &F, what: &str) -> LogicResult
where
    F: Fn(&str) -> Option<&'a Value>,
{
    if logic.evaluate(value_of) {
        LogicResult::of(true)
    } else {
        LogicResult::with_reason(false, format!("{} logic evaluated to false", what))
    }
}

fn reason_suffix(result: &LogicResult) -> String {
    match &result.reason {
        Some(reason) => format!(": {}", reason),
        None => String::new(),
    }
}
