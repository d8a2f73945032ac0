use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::changes::{DocumentChanges, DocumentChangesCollector, FieldChange, IncludedDetailInfo};
use crate::config::JsonOptions;
use crate::document::{
    Document, DocumentPath, IncludedDocumentsCollection, SaveStatus, ValidStatus,
};

/// Name of the pseudo field carrying the document id.
pub const ID_FIELD: &str = "id";

const DEBUG_PREFIX: &str = "debug-";

/// Wire form of a document or of the changes made to one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonDocument {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<JsonDocumentField>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_status: Option<JsonValidStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_status: Option<JsonSaveStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included_tabs_info: Option<Vec<JsonIncludedTabInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    /// Open-ended extra properties, merged into the object on the wire.
    #[serde(flatten)]
    pub other_properties: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonDocumentField {
    pub field: String,
    /// `Some(Value::Null)` is a cleared field, `None` an unchanged value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayed: Option<bool>,
}

impl JsonDocumentField {
    fn id_field(value: Value) -> Self {
        Self {
            field: ID_FIELD.to_string(),
            value: Some(value),
            ..Default::default()
        }
    }

    fn of_change(change: &FieldChange) -> Self {
        Self {
            field: change.field_name.clone(),
            value: change.value.clone(),
            readonly: change.readonly,
            mandatory: change.mandatory,
            displayed: change.displayed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonValidStatus {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl From<&ValidStatus> for JsonValidStatus {
    fn from(status: &ValidStatus) -> Self {
        match status {
            ValidStatus::NotChecked => Self {
                valid: false,
                checked: Some(false),
                reason: None,
                field_name: None,
            },
            ValidStatus::Valid => Self {
                valid: true,
                checked: None,
                reason: None,
                field_name: None,
            },
            ValidStatus::Invalid { reason, field_name } => Self {
                valid: false,
                checked: None,
                reason: Some(reason.clone()),
                field_name: field_name.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonSaveStatus {
    pub saved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&SaveStatus> for JsonSaveStatus {
    fn from(status: &SaveStatus) -> Self {
        match status {
            SaveStatus::NotSaved => Self {
                saved: false,
                error: None,
                reason: None,
            },
            SaveStatus::Saved => Self {
                saved: true,
                error: None,
                reason: None,
            },
            SaveStatus::SaveError(reason) => Self {
                saved: false,
                error: Some(true),
                reason: Some(reason.clone()),
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonIncludedTabInfo {
    pub tabid: String,
    /// Only sent when the tab is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_create_new: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_create_new_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_delete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_delete_reason: Option<String>,
}

impl From<&IncludedDetailInfo> for JsonIncludedTabInfo {
    fn from(info: &IncludedDetailInfo) -> Self {
        Self {
            tabid: info.detail_id.to_json(),
            stale: info.stale.then_some(true),
            allow_create_new: info.allow_create.as_ref().map(|allow| allow.value),
            allow_create_new_reason: info.allow_create.as_ref().and_then(|allow| allow.reason.clone()),
            allow_delete: info.allow_delete.as_ref().map(|allow| allow.value),
            allow_delete_reason: info.allow_delete.as_ref().and_then(|allow| allow.reason.clone()),
        }
    }
}

impl From<&IncludedDocumentsCollection> for JsonIncludedTabInfo {
    fn from(collection: &IncludedDocumentsCollection) -> Self {
        Self {
            tabid: collection.detail_id().to_json(),
            stale: collection.is_stale().then_some(true),
            allow_create_new: Some(collection.allow_create().value),
            allow_create_new_reason: collection.allow_create().reason.clone(),
            allow_delete: Some(collection.allow_delete().value),
            allow_delete_reason: collection.allow_delete().reason.clone(),
        }
    }
}

impl JsonDocument {
    fn of_path(path: &DocumentPath) -> Self {
        Self {
            id: path.document_id().to_json(),
            tabid: path.detail_id().map(|detail_id| detail_id.to_json()),
            row_id: path.single_row_id().map(|row_id| row_id.to_json()),
            ..Default::default()
        }
    }

    /// One JSON document per changed path collected so far, in the order the
    /// paths were first touched.
    pub fn of_events(collector: &dyn DocumentChangesCollector, options: &JsonOptions) -> Vec<JsonDocument> {
        collector
            .stream_ordered_document_changes()
            .iter()
            .filter(|changes| !changes.is_empty())
            .map(|changes| Self::of_changes(changes, options))
            .collect()
    }

    pub fn of_changes(changes: &DocumentChanges, options: &JsonOptions) -> JsonDocument {
        let mut json = Self::of_path(changes.path());
        if changes.is_deleted() {
            json.deleted = Some(true);
            return json;
        }

        let mut fields = Vec::with_capacity(changes.field_changes().len() + 1);
        for change in changes.field_changes() {
            if change.key {
                if let Some(value) = &change.value {
                    fields.insert(0, JsonDocumentField::id_field(value.clone()));
                }
                if change.field_name == ID_FIELD {
                    continue;
                }
            }
            fields.push(JsonDocumentField::of_change(change));
        }
        if !fields.is_empty() {
            json.fields = Some(fields);
        }

        json.valid_status = changes.valid_status().map(JsonValidStatus::from);
        json.save_status = changes.save_status().map(JsonSaveStatus::from);
        if !changes.included_detail_infos().is_empty() {
            json.included_tabs_info = Some(
                changes
                    .included_detail_infos()
                    .iter()
                    .map(JsonIncludedTabInfo::from)
                    .collect(),
            );
        }
        if options.protocol_debugging {
            json.put_debug_property("path", changes.path().to_string());
        }
        json
    }

    /// Full state of a document: the id pseudo field first, then every field
    /// in descriptor order.
    pub fn of_document(document: &Document, options: &JsonOptions) -> JsonDocument {
        let mut json = Self::of_path(document.path());

        let mut fields = vec![JsonDocumentField::id_field(document.document_id().to_json_value())];
        for ((field_name, value), field) in document.values().zip(document.descriptor().fields()) {
            if field.key && field_name == ID_FIELD {
                continue;
            }
            let flags = document.field_flags(field_name).unwrap_or_default();
            fields.push(JsonDocumentField {
                field: field_name.to_string(),
                value: Some(value.clone()),
                readonly: Some(flags.readonly),
                mandatory: Some(flags.mandatory),
                displayed: Some(flags.displayed),
            });
        }
        json.fields = Some(fields);
        json.valid_status = Some(JsonValidStatus::from(document.valid_status()));
        json.save_status = Some(JsonSaveStatus::from(document.save_status()));
        if !document.included_collections().is_empty() {
            json.included_tabs_info = Some(
                document
                    .included_collections()
                    .iter()
                    .map(JsonIncludedTabInfo::from)
                    .collect(),
            );
        }

        if options.protocol_debugging {
            json.put_debug_property("version", document.version());
            json.put_debug_property("writable", document.is_writable());
        }
        json
    }

    pub fn put_other_property(&mut self, name: &str, value: impl Into<Value>) {
        self.other_properties.insert(name.to_string(), value.into());
    }

    pub fn put_debug_property(&mut self, name: &str, value: impl Into<Value>) {
        self.put_other_property(&format!("{}{}", DEBUG_PREFIX, name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{ChangesCollector, FieldFlags};
    use crate::document::{DetailId, DocumentId, DocumentType, LogicResult};
    use serde_json::json;

    fn root() -> DocumentPath {
        DocumentPath::root(DocumentType::new("Address"), DocumentId::of(7))
    }

    #[test]
    fn key_field_change_puts_id_first() -> anyhow::Result<()> {
        let collector = ChangesCollector::new();
        collector.record_field_change(&root(), "City", false, &json!("Bonn"));
        collector.record_field_change(&root(), "C_Location_ID", true, &json!(7));

        let documents = JsonDocument::of_events(&collector, &JsonOptions::default());
        assert_eq!(
            serde_json::to_value(&documents)?,
            json!([{
                "id": "7",
                "fields": [
                    {"field": "id", "value": 7},
                    {"field": "City", "value": "Bonn"},
                    {"field": "C_Location_ID", "value": 7}
                ]
            }])
        );
        Ok(())
    }

    #[test]
    fn key_change_after_flag_change_still_renders_id() -> anyhow::Result<()> {
        let collector = ChangesCollector::new();
        let flags = FieldFlags {
            readonly: true,
            mandatory: true,
            displayed: true,
        };
        collector.record_field_flags(&root(), "C_Location_ID", flags);
        collector.record_field_change(&root(), "C_Location_ID", true, &json!(7));

        let changes = collector.stream_ordered_document_changes();
        let json = serde_json::to_value(JsonDocument::of_changes(&changes[0], &JsonOptions::default()))?;
        assert_eq!(json["fields"][0], json!({"field": "id", "value": 7}));
        assert_eq!(json["fields"][1]["field"], json!("C_Location_ID"));
        Ok(())
    }

    #[test]
    fn key_field_named_id_is_not_duplicated() -> anyhow::Result<()> {
        let collector = ChangesCollector::new();
        collector.record_field_change(&root(), "id", true, &json!(7));

        let documents = JsonDocument::of_events(&collector, &JsonOptions::default());
        let fields = documents[0].fields.clone().unwrap_or_default();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field, ID_FIELD);
        Ok(())
    }

    #[test]
    fn deleted_paths_carry_nothing_else() -> anyhow::Result<()> {
        let collector = ChangesCollector::new();
        let row = root().included_row(DetailId::new("lines"), DocumentId::of(3))?;
        collector.record_field_change(&row, "Qty", false, &json!(1));
        collector.record_valid_status(&row, &ValidStatus::Valid);
        collector.record_deleted(&row);

        let documents = JsonDocument::of_events(&collector, &JsonOptions::default());
        assert_eq!(
            serde_json::to_value(&documents)?,
            json!([{"id": "7", "tabid": "lines", "rowId": "3", "deleted": true}])
        );
        Ok(())
    }

    #[test]
    fn statuses_and_tab_infos() -> anyhow::Result<()> {
        let collector = ChangesCollector::new();
        collector.record_valid_status(&root(), &ValidStatus::invalid("City is mandatory", Some("City")));
        collector.record_save_status(&root(), &SaveStatus::Saved);
        collector.record_detail_info_change(
            &root(),
            &DetailId::new("lines"),
            false,
            None,
            Some(LogicResult::with_reason(false, "processed")),
        );

        let documents = JsonDocument::of_events(&collector, &JsonOptions::default());
        assert_eq!(
            serde_json::to_value(&documents)?,
            json!([{
                "id": "7",
                "validStatus": {"valid": false, "reason": "City is mandatory", "fieldName": "City"},
                "saveStatus": {"saved": true},
                "includedTabsInfo": [
                    {"tabid": "lines", "allowDelete": false, "allowDeleteReason": "processed"}
                ]
            }])
        );
        Ok(())
    }

    #[test]
    fn other_properties_are_merged() -> anyhow::Result<()> {
        let mut document = JsonDocument {
            id: "1".to_string(),
            ..Default::default()
        };
        document.put_other_property("websocketEndpoint", "/document/1");
        document.put_debug_property("version", 3);

        assert_eq!(
            serde_json::to_value(&document)?,
            json!({"id": "1", "websocketEndpoint": "/document/1", "debug-version": 3})
        );
        Ok(())
    }
}
