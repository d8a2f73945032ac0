use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{DetailId, DocumentType};
use crate::error::{Error, Result};

/// A boolean expression over the field values of one document. Used for the
/// display, mandatory and readonly logic of fields.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicExpr {
    Const(bool),
    /// True when the field's value equals `value`. A missing or null field is
    /// compared as `default`.
    FieldEquals {
        field_name: String,
        value: Value,
        default: Value,
    },
    /// True when the field has a non-null, non-empty value.
    FieldIsSet(String),
    Not(Box<LogicExpr>),
    And(Box<LogicExpr>, Box<LogicExpr>),
    Or(Box<LogicExpr>, Box<LogicExpr>),
}

impl LogicExpr {
    pub const TRUE: LogicExpr = LogicExpr::Const(true);
    pub const FALSE: LogicExpr = LogicExpr::Const(false);

    pub fn field_equals(field_name: &str, value: impl Into<Value>, default: impl Into<Value>) -> Self {
        LogicExpr::FieldEquals {
            field_name: field_name.to_string(),
            value: value.into(),
            default: default.into(),
        }
    }

    pub fn field_is_set(field_name: &str) -> Self {
        LogicExpr::FieldIsSet(field_name.to_string())
    }

    pub fn negate(self) -> Self {
        match self {
            LogicExpr::Const(value) => LogicExpr::Const(!value),
            LogicExpr::Not(inner) => *inner,
            other => LogicExpr::Not(Box::new(other)),
        }
    }

    pub fn and(self, other: LogicExpr) -> Self {
        LogicExpr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: LogicExpr) -> Self {
        LogicExpr::Or(Box::new(self), Box::new(other))
    }

    /// Evaluates against a field value lookup.
    pub fn evaluate<'a, F>(&self, value_of: &F) -> bool
    where
        F: Fn(&str) -> Option<&'a Value>,
    {
        match self {
            LogicExpr::Const(value) => *value,
            LogicExpr::FieldEquals {
                field_name,
                value,
                default,
            } => {
                let actual = match value_of(field_name) {
                    Some(Value::Null) | None => default,
                    Some(actual) => actual,
                };
                actual == value
            }
            LogicExpr::FieldIsSet(field_name) => value_of(field_name).map_or(false, is_set),
            LogicExpr::Not(inner) => !inner.evaluate(value_of),
            LogicExpr::And(left, right) => left.evaluate(value_of) && right.evaluate(value_of),
            LogicExpr::Or(left, right) => left.evaluate(value_of) || right.evaluate(value_of),
        }
    }

    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a str>) {
        match self {
            LogicExpr::Const(_) => {}
            LogicExpr::FieldEquals { field_name, .. } | LogicExpr::FieldIsSet(field_name) => {
                fields.push(field_name)
            }
            LogicExpr::Not(inner) => inner.collect_fields(fields),
            LogicExpr::And(left, right) | LogicExpr::Or(left, right) => {
                left.collect_fields(fields);
                right.collect_fields(fields);
            }
        }
    }
}

pub(crate) fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// An evaluated logic value together with a human readable reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicResult {
    pub value: bool,
    pub reason: Option<String>,
}

impl LogicResult {
    pub fn of(value: bool) -> Self {
        Self { value, reason: None }
    }

    pub fn with_reason(value: bool, reason: impl Into<String>) -> Self {
        Self {
            value,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub field_name: String,
    pub key: bool,
    pub default_value: Value,
    pub display_logic: LogicExpr,
    pub mandatory_logic: LogicExpr,
    pub readonly_logic: LogicExpr,
    /// Copied from the seed record when a new document is created from one.
    pub seeded: bool,
}

impl FieldDescriptor {
    pub fn new(field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            key: false,
            default_value: Value::Null,
            display_logic: LogicExpr::TRUE,
            mandatory_logic: LogicExpr::FALSE,
            readonly_logic: LogicExpr::FALSE,
            seeded: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self.readonly_logic = LogicExpr::TRUE;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }

    pub fn display_logic(mut self, logic: LogicExpr) -> Self {
        self.display_logic = logic;
        self
    }

    pub fn mandatory_logic(mut self, logic: LogicExpr) -> Self {
        self.mandatory_logic = logic;
        self
    }

    pub fn readonly_logic(mut self, logic: LogicExpr) -> Self {
        self.readonly_logic = logic;
        self
    }

    pub fn mandatory(self) -> Self {
        self.mandatory_logic(LogicExpr::TRUE)
    }

    pub fn seeded(mut self) -> Self {
        self.seeded = true;
        self
    }
}

/// Description of a detail tab: the entity of its rows and whether rows may
/// be created or deleted.
#[derive(Clone, Debug)]
pub struct DetailDescriptor {
    pub detail_id: DetailId,
    pub entity: Arc<EntityDescriptor>,
    pub allow_create: LogicExpr,
    pub allow_delete: LogicExpr,
}

/// Field layout of one kind of document. Built once and shared through an
/// `Arc` by every document of that kind.
#[derive(Debug)]
pub struct EntityDescriptor {
    document_type: DocumentType,
    fields: Vec<FieldDescriptor>,
    index_by_name: HashMap<String, usize>,
    details: Vec<DetailDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(document_type: DocumentType) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            document_type,
            fields: Vec::new(),
            details: Vec::new(),
        }
    }

    pub fn document_type(&self) -> &DocumentType {
        &self.document_type
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index(&self, field_name: &str) -> Option<usize> {
        self.index_by_name.get(field_name).copied()
    }

    pub fn field(&self, field_name: &str) -> Result<&FieldDescriptor> {
        self.field_index(field_name)
            .map(|index| &self.fields[index])
            .ok_or_else(|| Error::FieldNotFound {
                document_type: self.document_type.clone(),
                field_name: field_name.to_string(),
            })
    }

    pub fn has_field(&self, field_name: &str) -> bool {
        self.index_by_name.contains_key(field_name)
    }

    pub fn key_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.key)
    }

    pub fn details(&self) -> &[DetailDescriptor] {
        &self.details
    }

    pub fn detail(&self, detail_id: &DetailId) -> Option<&DetailDescriptor> {
        self.details.iter().find(|detail| &detail.detail_id == detail_id)
    }
}

pub struct EntityDescriptorBuilder {
    document_type: DocumentType,
    fields: Vec<FieldDescriptor>,
    details: Vec<DetailDescriptor>,
}

impl EntityDescriptorBuilder {
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn detail(
        mut self,
        detail_id: DetailId,
        entity: Arc<EntityDescriptor>,
        allow_create: LogicExpr,
        allow_delete: LogicExpr,
    ) -> Self {
        self.details.push(DetailDescriptor {
            detail_id,
            entity,
            allow_create,
            allow_delete,
        });
        self
    }

    /// Checks field names are unique and there is at most one key field.
    /// Field logic and the create/delete logic of details must reference
    /// fields of this entity.
    pub fn build(self) -> Result<Arc<EntityDescriptor>> {
        let mut index_by_name = HashMap::new();
        for (index, field) in self.fields.iter().enumerate() {
            if index_by_name.insert(field.field_name.clone(), index).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "duplicate field '{}' in {}",
                    field.field_name, self.document_type
                )));
            }
        }

        if self.fields.iter().filter(|field| field.key).count() > 1 {
            return Err(Error::InvalidArgument(format!(
                "{} declares more than one key field",
                self.document_type
            )));
        }

        for field in &self.fields {
            let logics = [&field.display_logic, &field.mandatory_logic, &field.readonly_logic];
            for referenced in logics.iter().flat_map(|logic| logic.referenced_fields()) {
                if !index_by_name.contains_key(referenced) {
                    return Err(Error::FieldNotFound {
                        document_type: self.document_type.clone(),
                        field_name: referenced.to_string(),
                    });
                }
            }
        }

        for detail in &self.details {
            let logics = [&detail.allow_create, &detail.allow_delete];
            for referenced in logics.iter().flat_map(|logic| logic.referenced_fields()) {
                if !index_by_name.contains_key(referenced) {
                    return Err(Error::FieldNotFound {
                        document_type: self.document_type.clone(),
                        field_name: referenced.to_string(),
                    });
                }
            }
        }

        Ok(Arc::new(EntityDescriptor {
            document_type: self.document_type,
            fields: self.fields,
            index_by_name,
            details: self.details,
        }))
    }
}
