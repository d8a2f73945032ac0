use std::fmt;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a document or of a view row. Integer ids come from sequences,
/// string ids from anything else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    Str(String),
}

impl DocumentId {
    pub fn of(id: i64) -> Self {
        DocumentId::Int(id)
    }

    /// Parses the JSON form. Anything that looks like an integer becomes
    /// `Int`.
    pub fn from_json(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(Error::InvalidArgument("empty document id".to_string()));
        }
        Ok(match id.parse::<i64>() {
            Ok(int_id) => DocumentId::Int(int_id),
            Err(_) => DocumentId::Str(id.to_string()),
        })
    }

    pub fn to_json(&self) -> String {
        self.to_string()
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            DocumentId::Int(id) => Some(*id),
            DocumentId::Str(_) => None,
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            DocumentId::Int(id) => serde_json::Value::from(*id),
            DocumentId::Str(id) => serde_json::Value::from(id.as_str()),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(id) => write!(f, "{}", id),
            DocumentId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        DocumentId::Int(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId::Str(id.to_string())
    }
}

impl ToSql for DocumentId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            DocumentId::Int(id) => Ok(ToSqlOutput::from(*id)),
            DocumentId::Str(id) => Ok(ToSqlOutput::from(id.as_str())),
        }
    }
}

impl FromSql for DocumentId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(id) => Ok(DocumentId::Int(id)),
            ValueRef::Text(text) => {
                let text = std::str::from_utf8(text).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Ok(DocumentId::Str(text.to_string()))
            }
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Kind of document, e.g. "Address". Used in not-found errors and logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentType(String);

impl DocumentType {
    pub fn new(name: impl Into<String>) -> Self {
        DocumentType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a detail tab, i.e. a nested collection of included documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DetailId(String);

impl DetailId {
    pub fn new(id: impl Into<String>) -> Self {
        DetailId(id.into())
    }

    pub fn to_json(&self) -> String {
        self.0.clone()
    }
}

impl fmt::Display for DetailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a document: either a root document, or exactly one row of one
/// detail collection of a root document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    document_type: DocumentType,
    document_id: DocumentId,
    included: Option<(DetailId, DocumentId)>,
}

impl DocumentPath {
    pub fn root(document_type: DocumentType, document_id: DocumentId) -> Self {
        Self {
            document_type,
            document_id,
            included: None,
        }
    }

    pub fn single_included(
        document_type: DocumentType,
        document_id: DocumentId,
        detail_id: DetailId,
        row_id: DocumentId,
    ) -> Self {
        Self {
            document_type,
            document_id,
            included: Some((detail_id, row_id)),
        }
    }

    /// Generic constructor. Only root paths (no detail, no rows) and single
    /// included document paths (a detail and exactly one row) are accepted.
    pub fn new(
        document_type: DocumentType,
        document_id: DocumentId,
        detail_id: Option<DetailId>,
        row_ids: Vec<DocumentId>,
    ) -> Result<Self> {
        match (detail_id, row_ids.len()) {
            (None, 0) => Ok(Self::root(document_type, document_id)),
            (Some(detail_id), 1) => {
                let row_id = row_ids.into_iter().next().ok_or_else(|| {
                    Error::InvalidState("row id vanished while building path".to_string())
                })?;
                Ok(Self::single_included(document_type, document_id, detail_id, row_id))
            }
            (detail_id, _) => Err(Error::InvalidPath {
                path: describe_path(&document_type, &document_id, detail_id.as_ref(), &row_ids),
                reason: "only root path and single included document path are allowed",
            }),
        }
    }

    pub fn document_type(&self) -> &DocumentType {
        &self.document_type
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn is_root_document(&self) -> bool {
        self.included.is_none()
    }

    pub fn is_single_included_document(&self) -> bool {
        self.included.is_some()
    }

    pub fn detail_id(&self) -> Option<&DetailId> {
        self.included.as_ref().map(|(detail_id, _)| detail_id)
    }

    pub fn single_row_id(&self) -> Option<&DocumentId> {
        self.included.as_ref().map(|(_, row_id)| row_id)
    }

    /// Path of the root document this path belongs to.
    pub fn root_path(&self) -> DocumentPath {
        Self::root(self.document_type.clone(), self.document_id.clone())
    }

    pub fn included_row(&self, detail_id: DetailId, row_id: DocumentId) -> Result<DocumentPath> {
        if !self.is_root_document() {
            return Err(Error::InvalidPath {
                path: self.to_string(),
                reason: "included documents can only be nested one level deep",
            });
        }
        Ok(Self::single_included(
            self.document_type.clone(),
            self.document_id.clone(),
            detail_id,
            row_id,
        ))
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.included {
            None => write!(f, "{}/{}", self.document_type, self.document_id),
            Some((detail_id, row_id)) => write!(
                f,
                "{}/{}/{}/{}",
                self.document_type, self.document_id, detail_id, row_id
            ),
        }
    }
}

fn describe_path(
    document_type: &DocumentType,
    document_id: &DocumentId,
    detail_id: Option<&DetailId>,
    row_ids: &[DocumentId],
) -> String {
    let rows = row_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    match detail_id {
        Some(detail_id) => format!("{}/{}/{}/[{}]", document_type, document_id, detail_id, rows),
        None => format!("{}/{}/[{}]", document_type, document_id, rows),
    }
}
