use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::view::{DocumentFilter, OrderBy, PageIndex, ViewId, ViewRow};

/// What [`ViewResult`] needs to know about a view.
pub trait View {
    fn view_id(&self) -> &ViewId;

    fn parent_view_id(&self) -> Option<&ViewId> {
        None
    }

    fn description(&self) -> Option<String> {
        None
    }

    fn size(&self) -> usize;

    fn query_limit(&self) -> Option<usize>;

    fn is_query_limit_hit(&self) -> bool;

    /// Filters the user cannot remove.
    fn sticky_filters(&self) -> Vec<DocumentFilter> {
        Vec::new()
    }

    fn filters(&self) -> Vec<DocumentFilter>;

    fn default_order_bys(&self) -> Vec<OrderBy>;
}

/// Snapshot of a view's state, optionally with one loaded page.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewResult<R> {
    view_id: ViewId,
    parent_view_id: Option<ViewId>,
    view_description: Option<String>,
    size: usize,
    query_limit: Option<usize>,
    query_limit_hit: bool,
    sticky_filters: Vec<DocumentFilter>,
    filters: Vec<DocumentFilter>,
    order_bys: Vec<OrderBy>,
    page_index: Option<PageIndex>,
    row_ids: Option<Vec<DocumentId>>,
    page: Option<Vec<R>>,
}

impl<R> ViewResult<R> {
    /// The view alone, without a page.
    pub fn of_view(view: &dyn View) -> Self {
        Self {
            view_id: view.view_id().clone(),
            parent_view_id: view.parent_view_id().cloned(),
            view_description: view.description(),
            size: view.size(),
            query_limit: view.query_limit(),
            query_limit_hit: view.is_query_limit_hit(),
            sticky_filters: view.sticky_filters(),
            filters: view.filters(),
            order_bys: view.default_order_bys(),
            page_index: None,
            row_ids: None,
            page: None,
        }
    }

    pub fn of_view_and_page(
        view: &dyn View,
        page_index: PageIndex,
        order_bys: Vec<OrderBy>,
        rows: Vec<R>,
    ) -> Result<Self> {
        Self::builder(view, page_index).order_bys(order_bys).rows(rows).build()
    }

    pub fn builder(view: &dyn View, page_index: PageIndex) -> ViewResultBuilder<'_, R> {
        ViewResultBuilder {
            view,
            page_index,
            order_bys: None,
            row_ids: None,
            rows: None,
        }
    }

    pub fn view_id(&self) -> &ViewId {
        &self.view_id
    }

    pub fn parent_view_id(&self) -> Option<&ViewId> {
        self.parent_view_id.as_ref()
    }

    /// `None` for a missing or blank description.
    pub fn view_description(&self) -> Option<&str> {
        self.view_description
            .as_deref()
            .filter(|description| !description.trim().is_empty())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn query_limit(&self) -> Option<usize> {
        self.query_limit
    }

    pub fn is_query_limit_hit(&self) -> bool {
        self.query_limit_hit
    }

    pub fn sticky_filters(&self) -> &[DocumentFilter] {
        &self.sticky_filters
    }

    pub fn filters(&self) -> &[DocumentFilter] {
        &self.filters
    }

    pub fn order_bys(&self) -> &[OrderBy] {
        &self.order_bys
    }

    pub fn first_row(&self) -> usize {
        self.page_index.map_or(0, |page| page.first_row())
    }

    pub fn page_length(&self) -> usize {
        self.page_index.map_or(0, |page| page.page_length())
    }

    pub fn is_page_loaded(&self) -> bool {
        self.page.is_some()
    }

    /// The loaded page. Fails when only ids, or nothing at all, were loaded.
    pub fn page(&self) -> Result<&[R]> {
        self.page
            .as_deref()
            .ok_or_else(|| Error::InvalidState(format!("page not loaded for view {}", self.view_id)))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.page()?.is_empty())
    }
}

impl<R: ViewRow> ViewResult<R> {
    /// The page's row ids: the separately loaded list if there is one,
    /// otherwise the ids of the loaded rows.
    pub fn row_ids(&self) -> Result<Vec<DocumentId>> {
        match &self.row_ids {
            Some(row_ids) => Ok(row_ids.clone()),
            None => Ok(self.page()?.iter().map(ViewRow::id).collect()),
        }
    }
}

pub struct ViewResultBuilder<'a, R> {
    view: &'a dyn View,
    page_index: PageIndex,
    order_bys: Option<Vec<OrderBy>>,
    row_ids: Option<Vec<DocumentId>>,
    rows: Option<Vec<R>>,
}

impl<'a, R> ViewResultBuilder<'a, R> {
    /// Defaults to the view's default order.
    pub fn order_bys(mut self, order_bys: Vec<OrderBy>) -> Self {
        self.order_bys = Some(order_bys);
        self
    }

    pub fn row_ids(mut self, row_ids: Vec<DocumentId>) -> Self {
        self.row_ids = Some(row_ids);
        self
    }

    pub fn rows(mut self, rows: Vec<R>) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Fails unless row ids or rows were given.
    pub fn build(self) -> Result<ViewResult<R>> {
        if self.row_ids.is_none() && self.rows.is_none() {
            return Err(Error::InvalidState(format!(
                "row ids or rows required for a page of view {}",
                self.view.view_id()
            )));
        }
        let order_bys = match self.order_bys {
            Some(order_bys) => order_bys,
            None => self.view.default_order_bys(),
        };
        Ok(ViewResult {
            page_index: Some(self.page_index),
            row_ids: self.row_ids,
            page: self.rows,
            order_bys,
            ..ViewResult::of_view(self.view)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestView {
        view_id: ViewId,
    }

    impl View for TestView {
        fn view_id(&self) -> &ViewId {
            &self.view_id
        }

        fn description(&self) -> Option<String> {
            Some("  ".to_string())
        }

        fn size(&self) -> usize {
            23
        }

        fn query_limit(&self) -> Option<usize> {
            None
        }

        fn is_query_limit_hit(&self) -> bool {
            false
        }

        fn filters(&self) -> Vec<DocumentFilter> {
            Vec::new()
        }

        fn default_order_bys(&self) -> Vec<OrderBy> {
            vec![OrderBy::asc("Name")]
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Row(i64);

    impl ViewRow for Row {
        fn id(&self) -> DocumentId {
            DocumentId::of(self.0)
        }
    }

    fn view() -> anyhow::Result<TestView> {
        Ok(TestView {
            view_id: ViewId::new("540000", "a")?,
        })
    }

    #[test]
    fn view_only() -> anyhow::Result<()> {
        let view = view()?;
        let result = ViewResult::<Row>::of_view(&view);
        assert_eq!(result.size(), 23);
        assert_eq!(result.first_row(), 0);
        assert_eq!(result.page_length(), 0);
        assert!(!result.is_page_loaded());
        assert!(matches!(result.page(), Err(Error::InvalidState(_))));
        assert!(result.is_empty().is_err());
        assert!(result.row_ids().is_err());
        assert_eq!(result.view_description(), None);
        assert_eq!(result.order_bys(), &[OrderBy::asc("Name")]);
        Ok(())
    }

    #[test]
    fn page_requires_ids_or_rows() -> anyhow::Result<()> {
        let view = view()?;
        let page = PageIndex::of_first_row_and_page_length(10, 10)?;
        let result = ViewResult::<Row>::builder(&view, page).build();
        assert!(matches!(result, Err(Error::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn row_ids_fall_back_to_page() -> anyhow::Result<()> {
        let view = view()?;
        let page = PageIndex::of_first_row_and_page_length(10, 10)?;
        let result = ViewResult::of_view_and_page(&view, page, vec![], vec![Row(11), Row(12)])?;
        assert_eq!(result.first_row(), 10);
        assert_eq!(result.page_length(), 10);
        assert!(result.is_page_loaded());
        assert_eq!(result.row_ids()?, vec![DocumentId::of(11), DocumentId::of(12)]);
        assert!(result.order_bys().is_empty());
        Ok(())
    }

    #[test]
    fn ids_only_page() -> anyhow::Result<()> {
        let view = view()?;
        let page = PageIndex::first_page(5)?;
        let result = ViewResult::<Row>::builder(&view, page)
            .row_ids(vec![DocumentId::of(3)])
            .build()?;
        assert_eq!(result.row_ids()?, vec![DocumentId::of(3)]);
        assert!(!result.is_page_loaded());
        assert!(result.page().is_err());
        Ok(())
    }
}
