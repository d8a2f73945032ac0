pub mod page_index;
pub mod repository;
pub mod result;
pub mod selection;
pub mod sqlite;

pub use page_index::*;
pub use repository::*;
pub use result::*;
pub use selection::*;
pub use sqlite::*;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ViewConfig;
use crate::document::DocumentId;
use crate::error::Result;

/// One open view: the filters a user applied, and the ordered selections
/// materialized for them. The selection in default order is created on
/// open; other orders are derived from it on first use and kept.
///
/// Closing the view deletes its selections. A view dropped without closing
/// schedules the deletion instead.
pub struct SelectionView<D: ViewDataRepository> {
    repository: Arc<D>,
    ctx: ViewEvaluationCtx,
    parent_view_id: Option<ViewId>,
    description: Option<String>,
    sticky_filters: Vec<DocumentFilter>,
    filters: Vec<DocumentFilter>,
    config: ViewConfig,
    view_id: ViewId,
    selections: Mutex<Selections>,
    closed: bool,
}

struct Selections {
    default: OrderedSelection,
    by_order: HashMap<Vec<OrderBy>, OrderedSelection>,
}

impl Selections {
    fn all(&self) -> impl Iterator<Item = &OrderedSelection> {
        std::iter::once(&self.default).chain(self.by_order.values())
    }
}

pub struct SelectionViewBuilder<D: ViewDataRepository> {
    repository: Arc<D>,
    window_id: String,
    ctx: ViewEvaluationCtx,
    parent_view_id: Option<ViewId>,
    description: Option<String>,
    sticky_filters: Vec<DocumentFilter>,
    filters: Vec<DocumentFilter>,
    filter_ctx: FilterContext,
    apply_security_restrictions: bool,
    config: ViewConfig,
}

impl<D: ViewDataRepository> SelectionViewBuilder<D> {
    pub fn ctx(mut self, ctx: ViewEvaluationCtx) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn parent_view_id(mut self, parent_view_id: ViewId) -> Self {
        self.parent_view_id = Some(parent_view_id);
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn sticky_filter(mut self, filter: DocumentFilter) -> Self {
        self.sticky_filters.push(filter);
        self
    }

    pub fn filter(mut self, filter: DocumentFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filter_ctx(mut self, filter_ctx: FilterContext) -> Self {
        self.filter_ctx = filter_ctx;
        self
    }

    /// Security restrictions are applied unless disabled here.
    pub fn skip_security_restrictions(mut self) -> Self {
        self.apply_security_restrictions = false;
        self
    }

    pub fn config(mut self, config: ViewConfig) -> Self {
        self.config = config;
        self
    }

    /// Materializes the default selection and returns the open view.
    pub fn open(self) -> Result<SelectionView<D>> {
        let view_id = ViewId::random(&self.window_id)?;
        let all_filters: Vec<DocumentFilter> = self
            .sticky_filters
            .iter()
            .chain(self.filters.iter())
            .cloned()
            .collect();
        let default = self.repository.create_ordered_selection(
            &self.ctx,
            view_id.clone(),
            &all_filters,
            self.apply_security_restrictions,
            &self.filter_ctx,
        )?;
        log::debug!(
            "VIEW OPEN: view_id='{}' size={} limit_hit={}",
            view_id,
            default.size(),
            default.is_query_limit_hit()
        );
        Ok(SelectionView {
            repository: self.repository,
            ctx: self.ctx,
            parent_view_id: self.parent_view_id,
            description: self.description,
            sticky_filters: self.sticky_filters,
            filters: self.filters,
            config: self.config,
            view_id,
            selections: Mutex::new(Selections {
                default,
                by_order: HashMap::new(),
            }),
            closed: false,
        })
    }
}

impl<D: ViewDataRepository> SelectionView<D> {
    pub fn builder(repository: Arc<D>, window_id: &str) -> SelectionViewBuilder<D> {
        SelectionViewBuilder {
            repository,
            window_id: window_id.to_string(),
            ctx: ViewEvaluationCtx::default(),
            parent_view_id: None,
            description: None,
            sticky_filters: Vec::new(),
            filters: Vec::new(),
            filter_ctx: FilterContext::default(),
            apply_security_restrictions: true,
            config: ViewConfig::default(),
        }
    }

    pub fn repository(&self) -> &Arc<D> {
        &self.repository
    }

    /// The view without any page loaded.
    pub fn result(&self) -> ViewResult<D::Row> {
        ViewResult::of_view(self)
    }

    /// Loads one page of rows in the given order. An empty order means the
    /// default order; `page_length` defaults to the configured one.
    pub fn page(
        &self,
        first_row: usize,
        page_length: Option<usize>,
        order_bys: &[OrderBy],
    ) -> Result<ViewResult<D::Row>> {
        let page = self.page_index(first_row, page_length)?;
        let selection = self.selection_for(order_bys)?;
        let rows = self.repository.retrieve_page(&self.ctx, &selection, page)?;
        ViewResult::of_view_and_page(self, page, selection.order_bys().to_vec(), rows)
    }

    /// Like [`page`](Self::page), loading row ids only.
    pub fn page_row_ids(
        &self,
        first_row: usize,
        page_length: Option<usize>,
        order_bys: &[OrderBy],
    ) -> Result<ViewResult<D::Row>> {
        let page = self.page_index(first_row, page_length)?;
        let selection = self.selection_for(order_bys)?;
        let row_ids = self
            .repository
            .retrieve_row_ids_by_page(&self.ctx, &selection, page)?;
        ViewResult::builder(self, page)
            .order_bys(selection.order_bys().to_vec())
            .row_ids(row_ids)
            .build()
    }

    /// Every row of the view, fetched lazily page by page.
    pub fn stream_rows(&self, order_bys: &[OrderBy]) -> Result<impl Iterator<Item = Result<D::Row>> + '_> {
        let selection = self.selection_for(order_bys)?;
        let first_page = PageIndex::first_page(self.config.default_page_length)?;
        let ceiling = selection.row_ceiling();
        Ok(first_page.stream_pages(ceiling, move |page| {
            match self.repository.retrieve_page(&self.ctx, &selection, page) {
                Ok(rows) => rows.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        }))
    }

    pub fn retrieve_by_id(&self, row_id: &DocumentId) -> Result<D::Row> {
        self.repository.retrieve_by_id(&self.ctx, &self.view_id, row_id)
    }

    /// Some rows changed outside the view. Those that no longer match the
    /// view's filters are removed from every selection of the view.
    pub fn notify_rows_changed(&self, row_ids: &HashSet<DocumentId>) -> Result<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        let filters = self.all_filters();
        let mut selections = self.lock_selections();
        let default = self
            .repository
            .remove_row_ids_not_matching_filters(&selections.default, &filters, row_ids)?;
        selections.default = default;
        for selection in selections.by_order.values_mut() {
            *selection = self
                .repository
                .remove_row_ids_not_matching_filters(selection, &filters, row_ids)?;
        }
        Ok(())
    }

    /// Deletes all selections of this view. When one deletion fails, it and
    /// the selections not yet deleted are scheduled for background cleanup
    /// and the error is returned.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let view_ids = self.selection_view_ids();
        for (index, view_id) in view_ids.iter().enumerate() {
            if let Err(e) = self.repository.delete_selection(view_id) {
                log::warn!("VIEW CLOSE FAILED: view_id='{}' error={}", view_id, e);
                self.repository
                    .schedule_delete_selections(view_ids[index..].to_vec());
                return Err(e);
            }
        }
        log::debug!("VIEW CLOSE: view_id='{}' selections={}", self.view_id, view_ids.len());
        Ok(())
    }

    fn page_index(&self, first_row: usize, page_length: Option<usize>) -> Result<PageIndex> {
        PageIndex::of_first_row_and_page_length(
            first_row,
            page_length.unwrap_or(self.config.default_page_length),
        )
    }

    fn selection_for(&self, order_bys: &[OrderBy]) -> Result<OrderedSelection> {
        let mut selections = self.lock_selections();
        if order_bys.is_empty() || order_bys == selections.default.order_bys() {
            return Ok(selections.default.clone());
        }
        if let Some(selection) = selections.by_order.get(order_bys) {
            return Ok(selection.clone());
        }
        let selection = self.repository.create_ordered_selection_from_selection(
            &self.ctx,
            &selections.default,
            order_bys,
        )?;
        selections.by_order.insert(order_bys.to_vec(), selection.clone());
        Ok(selection)
    }

    fn all_filters(&self) -> Vec<DocumentFilter> {
        self.sticky_filters
            .iter()
            .chain(self.filters.iter())
            .cloned()
            .collect()
    }

    /// Ids of every selection materialized for this view, the default one
    /// first.
    pub fn selection_view_ids(&self) -> Vec<ViewId> {
        self.lock_selections()
            .all()
            .map(|selection| selection.view_id().clone())
            .collect()
    }

    /// Selections are replaced whole, so a poisoned lock still holds a
    /// consistent value.
    fn lock_selections(&self) -> MutexGuard<'_, Selections> {
        self.selections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: ViewDataRepository> View for SelectionView<D> {
    fn view_id(&self) -> &ViewId {
        &self.view_id
    }

    fn parent_view_id(&self) -> Option<&ViewId> {
        self.parent_view_id.as_ref()
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn size(&self) -> usize {
        self.lock_selections().default.size()
    }

    fn query_limit(&self) -> Option<usize> {
        self.lock_selections().default.query_limit()
    }

    fn is_query_limit_hit(&self) -> bool {
        self.lock_selections().default.is_query_limit_hit()
    }

    fn sticky_filters(&self) -> Vec<DocumentFilter> {
        self.sticky_filters.clone()
    }

    fn filters(&self) -> Vec<DocumentFilter> {
        self.filters.clone()
    }

    fn default_order_bys(&self) -> Vec<OrderBy> {
        self.lock_selections().default.order_bys().to_vec()
    }
}

impl<D: ViewDataRepository> Drop for SelectionView<D> {
    fn drop(&mut self) {
        if !self.closed {
            let view_ids = self.selection_view_ids();
            log::debug!("VIEW DROP: view_id='{}' scheduling cleanup", self.view_id);
            self.repository.schedule_delete_selections(view_ids);
        }
    }
}
