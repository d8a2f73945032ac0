use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::document::DocumentId;
use crate::error::Result;
use crate::view::{
    DocumentFilter, FilterOperator, FilterParam, OrderBy, OrderedSelection, PageIndex,
    RowIdsSelection, ViewId,
};

/// A row shown in a view.
pub trait ViewRow {
    fn id(&self) -> DocumentId;
}

/// Who is looking at a view. Passed through to security restrictions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewEvaluationCtx {
    pub language: String,
    pub user_id: Option<i64>,
}

impl ViewEvaluationCtx {
    pub fn new(language: &str, user_id: Option<i64>) -> Self {
        Self {
            language: language.to_string(),
            user_id,
        }
    }
}

/// Extra values a filter converter may reference while compiling filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterContext {
    pub parameters: Map<String, Value>,
}

/// Compiles a filter into an SQL boolean expression. `None` means the filter
/// does not restrict anything.
pub trait SqlFilterConverter: Send + Sync {
    fn sql_where_clause(&self, filter: &DocumentFilter, ctx: &FilterContext) -> anyhow::Result<Option<String>>;
}

/// Row level access rules applied when a selection is created with security
/// restrictions.
pub trait SecurityRestriction: Send + Sync {
    fn sql_where_clause(&self, ctx: &ViewEvaluationCtx, table_name: &str) -> anyhow::Result<Option<String>>;
}

/// Access to the rows behind views: materializes ordered selections of row
/// ids and reads pages of rows from them.
pub trait ViewDataRepository: Send + Sync {
    type Row: ViewRow;

    fn table_name(&self) -> &str;

    /// WHERE clause addressing the rows of a view's selection that match
    /// `filters`, optionally restricted to some row ids.
    fn sql_where_clause(
        &self,
        view_id: &ViewId,
        filters: &[DocumentFilter],
        row_ids: &RowIdsSelection,
    ) -> Result<String>;

    fn retrieve_by_id(&self, ctx: &ViewEvaluationCtx, view_id: &ViewId, row_id: &DocumentId) -> Result<Self::Row>;

    /// Rows of `selection` addressed by `page`, in selection order. Fewer
    /// than `page.page_length()` at the end of the selection.
    fn retrieve_page(
        &self,
        ctx: &ViewEvaluationCtx,
        selection: &OrderedSelection,
        page: PageIndex,
    ) -> Result<Vec<Self::Row>>;

    /// Same addressing as [`retrieve_page`](Self::retrieve_page), ids only.
    fn retrieve_row_ids_by_page(
        &self,
        ctx: &ViewEvaluationCtx,
        selection: &OrderedSelection,
        page: PageIndex,
    ) -> Result<Vec<DocumentId>>;

    /// Bulk lookup of the underlying records of some rows of a view, in
    /// selection order.
    fn retrieve_models_by_ids<M: DeserializeOwned>(
        &self,
        view_id: &ViewId,
        row_ids: &RowIdsSelection,
    ) -> Result<Vec<M>>
    where
        Self: Sized;

    fn create_ordered_selection(
        &self,
        ctx: &ViewEvaluationCtx,
        view_id: ViewId,
        filters: &[DocumentFilter],
        apply_security_restrictions: bool,
        filter_ctx: &FilterContext,
    ) -> Result<OrderedSelection>;

    /// Re-sorts the rows of an existing selection into a new one, without
    /// evaluating filters again.
    fn create_ordered_selection_from_selection(
        &self,
        ctx: &ViewEvaluationCtx,
        from_selection: &OrderedSelection,
        order_bys: &[OrderBy],
    ) -> Result<OrderedSelection>;

    /// Drops those `row_ids` from `selection` that no longer match
    /// `filters`. The returned selection is never larger than `selection`.
    fn remove_row_ids_not_matching_filters(
        &self,
        selection: &OrderedSelection,
        filters: &[DocumentFilter],
        row_ids: &HashSet<DocumentId>,
    ) -> Result<OrderedSelection>;

    fn delete_selection(&self, view_id: &ViewId) -> Result<()>;

    /// Fire-and-forget variant of [`delete_selection`](Self::delete_selection).
    fn schedule_delete_selections(&self, view_ids: Vec<ViewId>);
}

/// Compiles filter parameters into column comparisons, one per parameter,
/// joined with AND. Field names are used as column names.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColumnFilterConverter;

impl SqlFilterConverter for ColumnFilterConverter {
    fn sql_where_clause(&self, filter: &DocumentFilter, _ctx: &FilterContext) -> anyhow::Result<Option<String>> {
        let clauses = filter
            .parameters
            .iter()
            .map(param_sql)
            .collect::<anyhow::Result<Vec<_>>>()?;
        if clauses.is_empty() {
            Ok(None)
        } else {
            Ok(Some(clauses.join(" AND ")))
        }
    }
}

fn param_sql(param: &FilterParam) -> anyhow::Result<String> {
    let column = quote_identifier(&param.field_name)?;
    let value = || sql_literal(&param.value);
    Ok(match param.operator {
        FilterOperator::Equal if param.value.is_null() => format!("{} IS NULL", column),
        FilterOperator::Equal => format!("{} = {}", column, value()?),
        FilterOperator::NotEqual if param.value.is_null() => format!("{} IS NOT NULL", column),
        FilterOperator::NotEqual => format!("{} <> {}", column, value()?),
        FilterOperator::Like => format!("{} LIKE {}", column, value()?),
        FilterOperator::Greater => format!("{} > {}", column, value()?),
        FilterOperator::GreaterOrEqual => format!("{} >= {}", column, value()?),
        FilterOperator::Less => format!("{} < {}", column, value()?),
        FilterOperator::LessOrEqual => format!("{} <= {}", column, value()?),
        FilterOperator::Between => {
            let to = param
                .value_to
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("BETWEEN on {} without upper bound", param.field_name))?;
            format!("{} BETWEEN {} AND {}", column, value()?, sql_literal(to)?)
        }
        FilterOperator::IsNull => format!("{} IS NULL", column),
        FilterOperator::IsNotNull => format!("{} IS NOT NULL", column),
    })
}

/// Double-quoted SQL identifier. Only plain identifiers are accepted.
pub(crate) fn quote_identifier(name: &str) -> anyhow::Result<String> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        anyhow::bail!("invalid identifier '{}'", name);
    }
    Ok(format!("\"{}\"", name))
}

/// SQL literal for a scalar JSON value.
pub(crate) fn sql_literal(value: &Value) -> anyhow::Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        other => anyhow::bail!("unsupported filter value {}", other),
    }
}
