use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::DocumentId;
use crate::error::{Error, Result};

/// Identity of one open view: the window it belongs to plus a unique part.
/// The string form is `<window>-<unique>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId {
    window_id: String,
    unique_id: String,
}

impl ViewId {
    /// A new, never used view id for `window_id`.
    pub fn random(window_id: &str) -> Result<Self> {
        Self::new(window_id, &Uuid::now_v7().simple().to_string())
    }

    pub fn new(window_id: &str, unique_id: &str) -> Result<Self> {
        if window_id.is_empty() || window_id.contains('-') {
            return Err(Error::InvalidArgument(format!("invalid window id '{}'", window_id)));
        }
        if unique_id.is_empty() {
            return Err(Error::InvalidArgument("empty view id".to_string()));
        }
        Ok(Self {
            window_id: window_id.to_string(),
            unique_id: unique_id.to_string(),
        })
    }

    /// Parses the string form.
    pub fn from_json(view_id: &str) -> Result<Self> {
        match view_id.split_once('-') {
            Some((window_id, unique_id)) => Self::new(window_id, unique_id),
            None => Err(Error::InvalidArgument(format!("invalid view id '{}'", view_id))),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    /// A view of another window sharing this view's unique part. Used for
    /// included views.
    pub fn with_window_id(&self, window_id: &str) -> Result<Self> {
        Self::new(window_id, &self.unique_id)
    }

    pub fn to_json(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.window_id, self.unique_id)
    }
}

impl Serialize for ViewId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ViewId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ViewId::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

/// One sort criterion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub field_name: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            ascending: true,
        }
    }

    pub fn desc(field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            ascending: false,
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.ascending { "ASC" } else { "DESC" };
        write!(f, "{} {}", self.field_name, direction)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    Like,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Between,
    IsNull,
    IsNotNull,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParam {
    pub field_name: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_to: Option<Value>,
}

impl FilterParam {
    pub fn new(field_name: &str, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field_name: field_name.to_string(),
            operator,
            value: value.into(),
            value_to: None,
        }
    }

    pub fn equal(field_name: &str, value: impl Into<Value>) -> Self {
        Self::new(field_name, FilterOperator::Equal, value)
    }

    pub fn between(field_name: &str, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Self {
            value_to: Some(to.into()),
            ..Self::new(field_name, FilterOperator::Between, from)
        }
    }
}

/// A named filter; all its parameters must match.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    pub filter_id: String,
    #[serde(default)]
    pub parameters: Vec<FilterParam>,
}

impl DocumentFilter {
    pub fn new(filter_id: &str, parameters: Vec<FilterParam>) -> Self {
        Self {
            filter_id: filter_id.to_string(),
            parameters,
        }
    }

    /// Single parameter filter named after its field.
    pub fn single(parameter: FilterParam) -> Self {
        Self::new(&parameter.field_name.clone(), vec![parameter])
    }
}

/// Which rows of a selection an operation addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowIdsSelection {
    All,
    Ids(Vec<DocumentId>),
}

impl RowIdsSelection {
    pub fn of(ids: impl IntoIterator<Item = DocumentId>) -> Self {
        RowIdsSelection::Ids(ids.into_iter().collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, RowIdsSelection::All)
    }

    /// True for an explicit, empty id list.
    pub fn is_empty(&self) -> bool {
        matches!(self, RowIdsSelection::Ids(ids) if ids.is_empty())
    }
}

/// Materialized, ordered row ids of one view.
///
/// When `query_limit` is set, at most that many rows were materialized and
/// `query_limit_hit` tells whether the limit truncated the result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedSelection {
    view_id: ViewId,
    size: usize,
    order_bys: Vec<OrderBy>,
    query_limit: Option<usize>,
    query_limit_hit: bool,
}

impl OrderedSelection {
    pub fn new(
        view_id: ViewId,
        size: usize,
        order_bys: Vec<OrderBy>,
        query_limit: Option<usize>,
    ) -> Self {
        let query_limit_hit = query_limit.map_or(false, |limit| size >= limit);
        Self {
            view_id,
            size,
            order_bys,
            query_limit,
            query_limit_hit,
        }
    }

    pub fn view_id(&self) -> &ViewId {
        &self.view_id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn order_bys(&self) -> &[OrderBy] {
        &self.order_bys
    }

    pub fn query_limit(&self) -> Option<usize> {
        self.query_limit
    }

    pub fn is_query_limit_hit(&self) -> bool {
        self.query_limit_hit
    }

    /// Same selection under another view id, e.g. a re-sorted copy.
    pub fn with_view_id(&self, view_id: ViewId) -> Self {
        Self {
            view_id,
            ..self.clone()
        }
    }

    /// The selection after rows were removed from it. Never grows; the limit
    /// flag keeps recording what happened at creation.
    pub fn with_size(&self, size: usize) -> Self {
        Self {
            size: size.min(self.size),
            ..self.clone()
        }
    }

    /// Ceiling for page iteration over this selection.
    pub fn row_ceiling(&self) -> usize {
        match self.query_limit {
            Some(limit) => limit.min(self.size),
            None => self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_id_string_form() -> anyhow::Result<()> {
        let view_id = ViewId::random("540000")?;
        assert_eq!(view_id.window_id(), "540000");
        assert_eq!(ViewId::from_json(&view_id.to_json())?, view_id);
        assert_ne!(ViewId::random("540000")?, view_id);

        assert!(ViewId::from_json("no_separator").is_err());
        assert!(ViewId::new("a-b", "c").is_err());

        let json = serde_json::to_string(&view_id)?;
        assert_eq!(serde_json::from_str::<ViewId>(&json)?, view_id);
        Ok(())
    }

    #[test]
    fn query_limit_hit() -> anyhow::Result<()> {
        let view_id = ViewId::new("1", "a")?;
        assert!(!OrderedSelection::new(view_id.clone(), 10, vec![], None).is_query_limit_hit());
        assert!(!OrderedSelection::new(view_id.clone(), 9, vec![], Some(10)).is_query_limit_hit());
        assert!(OrderedSelection::new(view_id, 10, vec![], Some(10)).is_query_limit_hit());
        Ok(())
    }

    #[test]
    fn narrowing_never_grows() -> anyhow::Result<()> {
        let selection = OrderedSelection::new(ViewId::new("1", "a")?, 10, vec![], None);
        assert_eq!(selection.with_size(4).size(), 4);
        assert_eq!(selection.with_size(40).size(), 10);
        Ok(())
    }
}
