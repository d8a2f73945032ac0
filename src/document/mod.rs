pub mod descriptor;
pub mod id;
pub mod included;
pub mod projection;
pub mod status;

pub use descriptor::*;
pub use id::*;
pub use included::*;
pub use projection::*;
pub use status::*;

use descriptor::is_set;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::{DocumentChangesCollector, FieldFlags, NullChangesCollector};
use crate::error::{Error, Result};

/// How [`Document::copy`] treats the copy.
#[derive(Clone, Debug)]
pub enum CopyMode {
    /// Immutable snapshot for the cache. The change collector is dropped.
    CheckInReadonly,
    /// Private editable copy reporting into the given collector.
    CheckOutWritable(Arc<dyn DocumentChangesCollector>),
}

/// A request to set one field, as sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChangeRequest {
    #[serde(rename = "field")]
    pub field_name: String,
    pub value: Value,
}

impl FieldChangeRequest {
    pub fn new(field_name: &str, value: impl Into<Value>) -> Self {
        Self {
            field_name: field_name.to_string(),
            value: value.into(),
        }
    }
}

/// Snapshot of one business entity: field values laid out by its
/// [`EntityDescriptor`], validity and save state, and its detail tabs.
///
/// Readonly documents are the ones held by the cache; every mutator fails on
/// them with [`Error::ReadonlyDocument`].
pub struct Document {
    descriptor: Arc<EntityDescriptor>,
    path: DocumentPath,
    version: u64,
    writable: bool,
    dirty: bool,
    values: Vec<Value>,
    flags: Vec<FieldFlags>,
    valid_status: ValidStatus,
    save_status: SaveStatus,
    included: Vec<IncludedDocumentsCollection>,
    collector: Arc<dyn DocumentChangesCollector>,
    readonly_violations: Vec<String>,
}

impl Document {
    /// New writable document with default values and freshly evaluated field
    /// flags. Nothing is reported for the initial state.
    pub(crate) fn new(
        descriptor: Arc<EntityDescriptor>,
        path: DocumentPath,
        collector: Arc<dyn DocumentChangesCollector>,
    ) -> Self {
        let values = descriptor
            .fields()
            .iter()
            .map(|field| field.default_value.clone())
            .collect();
        let included = descriptor
            .details()
            .iter()
            .map(|detail| IncludedDocumentsCollection::new(detail.clone(), path.root_path()))
            .collect();
        let mut document = Self {
            flags: vec![FieldFlags::default(); descriptor.fields().len()],
            descriptor,
            path,
            version: 0,
            writable: true,
            dirty: true,
            values,
            valid_status: ValidStatus::NotChecked,
            save_status: SaveStatus::NotSaved,
            included,
            collector,
            readonly_violations: Vec::new(),
        };
        document.flags = document.evaluate_flags();
        let null = NullChangesCollector::shared();
        document.update_included_allow_flags(&null);
        document
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    pub fn document_id(&self) -> &DocumentId {
        self.path
            .single_row_id()
            .unwrap_or_else(|| self.path.document_id())
    }

    pub fn document_type(&self) -> &DocumentType {
        self.descriptor.document_type()
    }

    /// Bumped each time a changed document is checked in.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty || self.included.iter().any(|c| c.has_dirty_rows())
    }

    pub fn valid_status(&self) -> &ValidStatus {
        &self.valid_status
    }

    pub fn save_status(&self) -> &SaveStatus {
        &self.save_status
    }

    pub fn value(&self, field_name: &str) -> Result<&Value> {
        let index = self.field_index(field_name)?;
        Ok(&self.values[index])
    }

    /// Field names and values in descriptor order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.descriptor
            .fields()
            .iter()
            .zip(self.values.iter())
            .map(|(field, value)| (field.field_name.as_str(), value))
    }

    pub fn field_flags(&self, field_name: &str) -> Result<FieldFlags> {
        let index = self.field_index(field_name)?;
        Ok(self.flags[index])
    }

    pub fn included_documents(&self, detail_id: &DetailId) -> Result<&IncludedDocumentsCollection> {
        self.included
            .iter()
            .find(|collection| collection.detail_id() == detail_id)
            .ok_or_else(|| self.unknown_detail(detail_id))
    }

    pub fn included_collections(&self) -> &[IncludedDocumentsCollection] {
        &self.included
    }

    /// Deep copy. Field values and detail rows are never shared with `self`.
    pub fn copy(&self, mode: CopyMode) -> Document {
        let (writable, collector, version) = match &mode {
            CopyMode::CheckInReadonly => {
                let version = if self.is_dirty() {
                    self.version + 1
                } else {
                    self.version
                };
                (false, NullChangesCollector::shared(), version)
            }
            CopyMode::CheckOutWritable(collector) => (true, collector.clone(), self.version),
        };
        Document {
            descriptor: self.descriptor.clone(),
            path: self.path.clone(),
            version,
            writable,
            dirty: false,
            values: self.values.clone(),
            flags: self.flags.clone(),
            valid_status: self.valid_status.clone(),
            save_status: self.save_status.clone(),
            included: self.included.iter().map(|c| c.copy(&mode)).collect(),
            collector,
            readonly_violations: Vec::new(),
        }
    }

    /// Sets a field, regardless of its readonly logic. No-op when the value is
    /// unchanged.
    pub fn set_value(&mut self, field_name: &str, value: impl Into<Value>) -> Result<()> {
        self.assert_writable()?;
        let index = self.field_index(field_name)?;
        let value = value.into();
        if self.values[index] == value {
            return Ok(());
        }

        log::trace!("DOCUMENT SET: path='{}' field='{}' value={}", self.path, field_name, value);
        let key = self.descriptor.fields()[index].key;
        self.collector
            .record_field_change(&self.path, field_name, key, &value);
        self.values[index] = value;
        self.valid_status = ValidStatus::NotChecked;
        self.dirty = true;
        Ok(())
    }

    /// Applies client change requests, then runs a validation pass. Requests
    /// for fields that are currently readonly are skipped and make the
    /// validation report the document invalid.
    pub fn process_value_changes(&mut self, requests: &[FieldChangeRequest]) -> Result<ValidStatus> {
        self.assert_writable()?;
        for request in requests {
            let index = self.field_index(&request.field_name)?;
            if self.is_readonly_now(index) {
                log::debug!(
                    "DOCUMENT READONLY FIELD: path='{}' field='{}'",
                    self.path,
                    request.field_name
                );
                self.readonly_violations.push(request.field_name.clone());
                continue;
            }
            self.set_value(&request.field_name, request.value.clone())?;
        }
        self.check_and_get_valid_status()
    }

    /// Validation pass: re-evaluates every field's logic, reports changed
    /// flags, validates detail rows and computes the new [`ValidStatus`].
    pub fn check_and_get_valid_status(&mut self) -> Result<ValidStatus> {
        self.assert_writable()?;

        let flags = self.evaluate_flags();
        for (index, (old, new)) in self.flags.iter().zip(flags.iter()).enumerate() {
            if old != new {
                let field_name = &self.descriptor.fields()[index].field_name;
                self.collector
                    .record_field_flags(&self.path, field_name, *new);
            }
        }
        self.flags = flags;

        let collector = self.collector.clone();
        self.update_included_allow_flags(&collector);

        let mut status = self.compute_own_status();
        for collection in self.included.iter_mut() {
            let detail_id = collection.detail_id().clone();
            for row in collection.rows_mut() {
                let row_status = row.check_and_get_valid_status()?;
                if status.is_valid() {
                    if let ValidStatus::Invalid { reason, field_name } = row_status {
                        status = ValidStatus::Invalid {
                            reason: format!("{} row {}: {}", detail_id, row.document_id(), reason),
                            field_name,
                        };
                    }
                }
            }
        }
        self.readonly_violations.clear();

        if status != self.valid_status {
            self.collector.record_valid_status(&self.path, &status);
            self.valid_status = status.clone();
        }
        Ok(status)
    }

    pub fn set_save_status(&mut self, status: SaveStatus) -> Result<()> {
        self.assert_writable()?;
        if status != self.save_status {
            self.collector.record_save_status(&self.path, &status);
            self.save_status = status;
            self.dirty = true;
        }
        Ok(())
    }

    /// Appends a new row to a detail tab and returns it for editing.
    pub fn create_included_document(&mut self, detail_id: &DetailId) -> Result<&mut Document> {
        self.assert_writable()?;
        self.dirty = true;
        let collector = self.collector.clone();
        let collection = self.included_mut(detail_id)?;
        collection.create_row(&collector)
    }

    pub fn included_document_mut(
        &mut self,
        detail_id: &DetailId,
        row_id: &DocumentId,
    ) -> Result<&mut Document> {
        self.assert_writable()?;
        self.included_mut(detail_id)?.row_mut(row_id)
    }

    pub fn delete_included_documents(
        &mut self,
        detail_id: &DetailId,
        row_ids: &[DocumentId],
    ) -> Result<()> {
        self.assert_writable()?;
        let collector = self.collector.clone();
        self.included_mut(detail_id)?.delete_rows(row_ids, &collector)?;
        self.dirty = true;
        Ok(())
    }

    /// Tells clients that the rows of a detail tab must be reloaded.
    pub fn mark_included_stale(&mut self, detail_id: &DetailId) -> Result<()> {
        self.assert_writable()?;
        let collector = self.collector.clone();
        self.included_mut(detail_id)?.mark_stale(&collector);
        Ok(())
    }

    fn compute_own_status(&self) -> ValidStatus {
        if let Some(field_name) = self.readonly_violations.first() {
            return ValidStatus::invalid(format!("{} is readonly", field_name), Some(field_name));
        }
        for ((field, value), flags) in self
            .descriptor
            .fields()
            .iter()
            .zip(self.values.iter())
            .zip(self.flags.iter())
        {
            if flags.mandatory && flags.displayed && !is_set(value) {
                return ValidStatus::invalid(
                    format!("{} is mandatory", field.field_name),
                    Some(&field.field_name),
                );
            }
        }
        ValidStatus::Valid
    }

    /// Readonly logic against the current values, which may be ahead of the
    /// flags computed by the last validation pass.
    fn is_readonly_now(&self, index: usize) -> bool {
        let value_of = |name: &str| self.descriptor.field_index(name).map(|i| &self.values[i]);
        self.descriptor.fields()[index]
            .readonly_logic
            .evaluate(&value_of)
    }

    fn evaluate_flags(&self) -> Vec<FieldFlags> {
        let value_of = |name: &str| self.descriptor.field_index(name).map(|i| &self.values[i]);
        self.descriptor
            .fields()
            .iter()
            .map(|field| FieldFlags {
                readonly: field.readonly_logic.evaluate(&value_of),
                mandatory: field.mandatory_logic.evaluate(&value_of),
                displayed: field.display_logic.evaluate(&value_of),
            })
            .collect()
    }

    fn update_included_allow_flags(&mut self, collector: &Arc<dyn DocumentChangesCollector>) {
        let descriptor = &self.descriptor;
        let values = &self.values;
        let value_of = |name: &str| descriptor.field_index(name).map(|i| &values[i]);
        for collection in self.included.iter_mut() {
            collection.update_allow_flags(&value_of, collector);
        }
    }

    fn included_mut(&mut self, detail_id: &DetailId) -> Result<&mut IncludedDocumentsCollection> {
        let error = self.unknown_detail(detail_id);
        self.included
            .iter_mut()
            .find(|collection| collection.detail_id() == detail_id)
            .ok_or(error)
    }

    fn unknown_detail(&self, detail_id: &DetailId) -> Error {
        Error::InvalidArgument(format!(
            "{} has no detail '{}'",
            self.descriptor.document_type(),
            detail_id
        ))
    }

    fn field_index(&self, field_name: &str) -> Result<usize> {
        self.descriptor
            .field_index(field_name)
            .ok_or_else(|| Error::FieldNotFound {
                document_type: self.descriptor.document_type().clone(),
                field_name: field_name.to_string(),
            })
    }

    fn assert_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::ReadonlyDocument(self.path.to_string()))
        }
    }
}

/// Compares content only: path, values, statuses and detail rows.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.values == other.values
            && self.valid_status == other.valid_status
            && self.save_status == other.save_status
            && self.included == other.included
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("writable", &self.writable)
            .field("values", &self.values)
            .field("valid_status", &self.valid_status)
            .field("save_status", &self.save_status)
            .field("included", &self.included)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::ChangesCollector;
    use serde_json::json;

    fn address_descriptor() -> anyhow::Result<Arc<EntityDescriptor>> {
        Ok(EntityDescriptor::builder(DocumentType::new("Address"))
            .field(FieldDescriptor::new("C_Location_ID").key())
            .field(FieldDescriptor::new("C_Country_ID").mandatory())
            .field(FieldDescriptor::new("City"))
            .field(FieldDescriptor::new("HasRegion").default_value("N"))
            .field(
                FieldDescriptor::new("RegionName")
                    .display_logic(LogicExpr::field_equals("HasRegion", "Y", "N"))
                    .mandatory(),
            )
            .build()?)
    }

    fn new_address(collector: Arc<dyn DocumentChangesCollector>) -> anyhow::Result<Document> {
        let descriptor = address_descriptor()?;
        let path = DocumentPath::root(descriptor.document_type().clone(), DocumentId::of(1));
        Ok(Document::new(descriptor, path, collector))
    }

    #[test]
    fn mutation_resets_validation() -> anyhow::Result<()> {
        let mut document = new_address(NullChangesCollector::shared())?;
        document.set_value("C_Country_ID", 101)?;
        assert_eq!(document.check_and_get_valid_status()?, ValidStatus::Valid);

        document.set_value("City", "Bonn")?;
        assert_eq!(document.valid_status(), &ValidStatus::NotChecked);
        Ok(())
    }

    #[test]
    fn mandatory_fields_only_count_when_displayed() -> anyhow::Result<()> {
        let mut document = new_address(NullChangesCollector::shared())?;
        document.set_value("C_Country_ID", 101)?;
        assert!(document.check_and_get_valid_status()?.is_valid());

        let status = document.process_value_changes(&[FieldChangeRequest::new("HasRegion", "Y")])?;
        assert_eq!(
            status,
            ValidStatus::invalid("RegionName is mandatory", Some("RegionName"))
        );
        Ok(())
    }

    #[test]
    fn readonly_fields_are_not_applied() -> anyhow::Result<()> {
        let mut document = new_address(NullChangesCollector::shared())?;
        let status = document.process_value_changes(&[
            FieldChangeRequest::new("C_Country_ID", 101),
            FieldChangeRequest::new("C_Location_ID", 99),
        ])?;
        assert_eq!(
            status,
            ValidStatus::invalid("C_Location_ID is readonly", Some("C_Location_ID"))
        );
        assert_eq!(document.value("C_Location_ID")?, &Value::Null);

        // The violation is reported once.
        assert!(document.check_and_get_valid_status()?.is_valid());
        Ok(())
    }

    #[test]
    fn unknown_fields_fail() -> anyhow::Result<()> {
        let mut document = new_address(NullChangesCollector::shared())?;
        let result = document.process_value_changes(&[FieldChangeRequest::new("Nope", 1)]);
        assert!(matches!(result, Err(Error::FieldNotFound { .. })));
        Ok(())
    }

    #[test]
    fn readonly_copy_rejects_mutation() -> anyhow::Result<()> {
        let document = new_address(NullChangesCollector::shared())?;
        let mut readonly = document.copy(CopyMode::CheckInReadonly);
        assert!(!readonly.is_writable());
        assert!(matches!(
            readonly.set_value("City", "Bonn"),
            Err(Error::ReadonlyDocument(_))
        ));
        Ok(())
    }

    #[test]
    fn copies_are_deep() -> anyhow::Result<()> {
        let mut document = new_address(NullChangesCollector::shared())?;
        document.set_value("City", "Bonn")?;
        let readonly = document.copy(CopyMode::CheckInReadonly);

        let mut writable = readonly.copy(CopyMode::CheckOutWritable(NullChangesCollector::shared()));
        assert_eq!(writable, readonly);
        writable.set_value("City", "Köln")?;
        assert_eq!(readonly.value("City")?, &json!("Bonn"));
        assert_ne!(writable, readonly);
        Ok(())
    }

    #[test]
    fn version_bumps_only_for_changed_check_ins() -> anyhow::Result<()> {
        let document = new_address(NullChangesCollector::shared())?;
        let v1 = document.copy(CopyMode::CheckInReadonly);

        let untouched = v1.copy(CopyMode::CheckOutWritable(NullChangesCollector::shared()));
        assert_eq!(untouched.copy(CopyMode::CheckInReadonly).version(), v1.version());

        let mut changed = v1.copy(CopyMode::CheckOutWritable(NullChangesCollector::shared()));
        changed.set_value("City", "Bonn")?;
        assert_eq!(changed.copy(CopyMode::CheckInReadonly).version(), v1.version() + 1);
        Ok(())
    }

    #[test]
    fn flag_changes_are_collected() -> anyhow::Result<()> {
        let collector = ChangesCollector::shared();
        let mut document = new_address(collector.clone())?;
        document.process_value_changes(&[FieldChangeRequest::new("HasRegion", "Y")])?;

        let changes = collector.stream_ordered_document_changes();
        assert_eq!(changes.len(), 1);
        let region = changes[0]
            .field_changes()
            .iter()
            .find(|change| change.field_name == "RegionName")
            .ok_or_else(|| anyhow::anyhow!("RegionName not reported"))?;
        assert_eq!(region.displayed, Some(true));
        assert_eq!(region.value, None);
        Ok(())
    }

    #[test]
    fn included_rows() -> anyhow::Result<()> {
        let line = EntityDescriptor::builder(DocumentType::new("OrderLine"))
            .field(FieldDescriptor::new("Line_ID").key())
            .field(FieldDescriptor::new("Qty").mandatory())
            .build()?;
        let lines = DetailId::new("lines");
        let order = EntityDescriptor::builder(DocumentType::new("Order"))
            .field(FieldDescriptor::new("Processed").default_value("N"))
            .detail(
                lines.clone(),
                line,
                LogicExpr::TRUE,
                LogicExpr::field_equals("Processed", "N", "N"),
            )
            .build()?;
        let collector = ChangesCollector::shared();
        let path = DocumentPath::root(order.document_type().clone(), DocumentId::of(5));
        let mut document = Document::new(order, path, collector.clone());

        let row = document.create_included_document(&lines)?;
        assert_eq!(row.document_id(), &DocumentId::of(1));
        assert!(row.path().is_single_included_document());
        let status = document.check_and_get_valid_status()?;
        assert!(matches!(status, ValidStatus::Invalid { .. }));

        document
            .included_document_mut(&lines, &DocumentId::of(1))?
            .set_value("Qty", 3)?;
        assert!(document.check_and_get_valid_status()?.is_valid());

        document.set_value("Processed", "Y")?;
        document.check_and_get_valid_status()?;
        let result = document.delete_included_documents(&lines, &[DocumentId::of(1)]);
        assert!(matches!(result, Err(Error::InvalidState(_))));

        document.set_value("Processed", "N")?;
        document.check_and_get_valid_status()?;
        document.delete_included_documents(&lines, &[DocumentId::of(1)])?;
        assert!(document.included_documents(&lines)?.is_empty());

        let changes = collector.stream_ordered_document_changes();
        let row_changes = changes
            .iter()
            .find(|changes| changes.path().is_single_included_document())
            .ok_or_else(|| anyhow::anyhow!("row changes missing"))?;
        assert!(row_changes.is_deleted());
        Ok(())
    }

    #[test]
    fn stale_flag_clears_on_check_in() -> anyhow::Result<()> {
        let line = EntityDescriptor::builder(DocumentType::new("OrderLine"))
            .field(FieldDescriptor::new("Line_ID").key())
            .build()?;
        let lines = DetailId::new("lines");
        let order = EntityDescriptor::builder(DocumentType::new("Order"))
            .detail(lines.clone(), line, LogicExpr::TRUE, LogicExpr::TRUE)
            .build()?;
        let collector = ChangesCollector::shared();
        let path = DocumentPath::root(order.document_type().clone(), DocumentId::of(5));
        let mut document = Document::new(order, path, collector.clone());

        document.mark_included_stale(&lines)?;
        assert!(document.included_documents(&lines)?.is_stale());
        let writable = document.copy(CopyMode::CheckOutWritable(collector.clone()));
        assert!(writable.included_documents(&lines)?.is_stale());

        let checked_in = document.copy(CopyMode::CheckInReadonly);
        assert!(!checked_in.included_documents(&lines)?.is_stale());
        let checked_out = checked_in.copy(CopyMode::CheckOutWritable(collector));
        assert!(!checked_out.included_documents(&lines)?.is_stale());
        Ok(())
    }
}
