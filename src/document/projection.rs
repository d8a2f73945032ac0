use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::document::{Document, DocumentType, EntityDescriptor};
use crate::error::{Error, Result};

/// Typed view over some fields of a document: each mapped document field is
/// read into, and written back from, one key of `T`'s serde representation.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Location { city: Option<String>, postal: Option<String> }
///
/// let projection = FieldProjection::<Location>::builder(&descriptor)
///     .map("City", "city")
///     .map("Postal", "postal")
///     .build()?;
/// let location = projection.read(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct FieldProjection<T> {
    document_type: DocumentType,
    mappings: Vec<(String, String)>,
    marker: PhantomData<fn() -> T>,
}

pub struct FieldProjectionBuilder<'a, T> {
    descriptor: &'a EntityDescriptor,
    mappings: Vec<(String, String)>,
    marker: PhantomData<fn() -> T>,
}

impl<T> FieldProjection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn builder(descriptor: &EntityDescriptor) -> FieldProjectionBuilder<'_, T> {
        FieldProjectionBuilder {
            descriptor,
            mappings: Vec::new(),
            marker: PhantomData,
        }
    }

    pub fn read(&self, document: &Document) -> Result<T> {
        self.assert_document_type(document)?;
        let mut object = Map::new();
        for (field_name, key) in &self.mappings {
            object.insert(key.clone(), document.value(field_name)?.clone());
        }
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    /// Writes every mapped key of `value` into its field. Keys missing from
    /// the serialized form are left alone.
    pub fn write(&self, document: &mut Document, value: &T) -> Result<()> {
        self.assert_document_type(document)?;
        let object = match serde_json::to_value(value)? {
            Value::Object(object) => object,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "projection of {} must serialize to an object, got {}",
                    self.document_type, other
                )))
            }
        };
        for (field_name, key) in &self.mappings {
            if let Some(field_value) = object.get(key) {
                document.set_value(field_name, field_value.clone())?;
            }
        }
        Ok(())
    }

    fn assert_document_type(&self, document: &Document) -> Result<()> {
        if document.document_type() == &self.document_type {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "projection for {} used on {}",
                self.document_type,
                document.path()
            )))
        }
    }
}

impl<'a, T> FieldProjectionBuilder<'a, T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn map(mut self, field_name: &str, key: &str) -> Self {
        self.mappings.push((field_name.to_string(), key.to_string()));
        self
    }

    /// Fails if a mapped field is unknown to the descriptor or a key is used
    /// twice.
    pub fn build(self) -> Result<FieldProjection<T>> {
        for (index, (field_name, key)) in self.mappings.iter().enumerate() {
            self.descriptor.field(field_name)?;
            if self.mappings[..index].iter().any(|(_, other)| other == key) {
                return Err(Error::InvalidArgument(format!(
                    "key '{}' is mapped more than once",
                    key
                )));
            }
        }
        Ok(FieldProjection {
            document_type: self.descriptor.document_type().clone(),
            mappings: self.mappings,
            marker: PhantomData,
        })
    }
}
