use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use docview::config::ViewConfig;
use docview::document::DocumentId;
use docview::rusqlite::params;
use docview::rusqlite_migration::{Migrations, M};
use docview::view::{
    DocumentFilter, FilterParam, OrderBy, PageIndex, SelectionView, SqliteViewDataRepository,
    View, ViewId, ViewRow,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SalesOrder {
    id: i64,
    document_no: String,
    partner: String,
    grand_total: i64,
}

impl ViewRow for SalesOrder {
    fn id(&self) -> DocumentId {
        DocumentId::of(self.id)
    }
}

fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

fn sales_orders(
    dir: &tempfile::TempDir,
    config: ViewConfig,
) -> anyhow::Result<Arc<SqliteViewDataRepository<SalesOrder>>> {
    let repository = SqliteViewDataRepository::<SalesOrder>::builder("sales_order", "id")
        .order_by(OrderBy::asc("document_no"))
        .config(config)
        .open(dir.path().join("views.db"))?;
    repository.migrate(&Migrations::new(vec![M::up(
        "CREATE TABLE sales_order (
            id          INTEGER PRIMARY KEY,
            document_no TEXT NOT NULL,
            partner     TEXT NOT NULL,
            grand_total INTEGER NOT NULL
        );",
    )]))?;
    repository.with_connection(|conn| {
        for i in 1..=23 {
            let partner = if i % 2 == 1 { "A" } else { "B" };
            conn.execute(
                "INSERT INTO sales_order (id, document_no, partner, grand_total) VALUES (?, ?, ?, ?)",
                params![i, format!("SO{:03}", i), partner, i * 10],
            )?;
        }
        Ok(())
    })?;
    Ok(Arc::new(repository))
}

fn wait_until_deleted(
    repository: &SqliteViewDataRepository<SalesOrder>,
    view_ids: &[ViewId],
) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);
    for view_id in view_ids {
        while repository.count_selection_rows(view_id)? > 0 {
            anyhow::ensure!(Instant::now() < deadline, "selection '{}' was not deleted", view_id);
            thread::sleep(Duration::from_millis(20));
        }
    }
    Ok(())
}

fn paging_config(query_limit: Option<usize>) -> ViewConfig {
    ViewConfig {
        query_limit,
        default_page_length: 10,
    }
}

#[test]
fn pages_cover_the_selection_in_order() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(None))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .description("Sales orders")
        .config(paging_config(None))
        .open()?;
    assert_eq!(view.size(), 23);
    assert!(!view.is_query_limit_hit());

    let pages: Vec<PageIndex> = PageIndex::first_page(10)?.iter(view.size()).collect();
    assert_eq!(
        pages.iter().map(|page| page.page_length()).collect::<Vec<_>>(),
        vec![10, 10, 3]
    );

    let mut expected_id = 1;
    for page in pages {
        let result = view.page(page.first_row(), Some(page.page_length()), &[])?;
        assert_eq!(result.first_row(), page.first_row());
        assert_eq!(result.view_description(), Some("Sales orders"));
        assert_eq!(result.order_bys(), &[OrderBy::asc("document_no")]);
        for row in result.page()? {
            assert_eq!(row.id, expected_id);
            assert_eq!(row.document_no, format!("SO{:03}", expected_id));
            expected_id += 1;
        }
        let ids_only = view.page_row_ids(page.first_row(), Some(page.page_length()), &[])?;
        assert_eq!(ids_only.row_ids()?, result.row_ids()?);
    }
    assert_eq!(expected_id, 24);

    let streamed = view
        .stream_rows(&[])?
        .map(|row| row.map(|row| row.id))
        .collect::<docview::Result<Vec<_>>>()?;
    assert_eq!(streamed, (1..=23).collect::<Vec<_>>());

    view.close()?;
    Ok(())
}

#[test]
fn resorting_keeps_the_default_selection() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(None))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .config(paging_config(None))
        .open()?;

    let by_total = [OrderBy::desc("grand_total")];
    let first = view.page(0, Some(3), &by_total)?;
    assert_eq!(
        first.page()?.iter().map(|row| row.grand_total).collect::<Vec<_>>(),
        vec![230, 220, 210]
    );
    assert_eq!(first.order_bys(), &by_total);

    // Same order again reuses the re-sorted selection.
    let again = view.page(3, Some(3), &by_total)?;
    assert_eq!(again.page()?[0].grand_total, 200);

    let default = view.page(0, Some(1), &[])?;
    assert_eq!(default.page()?[0].id, 1);
    assert_eq!(view.default_order_bys(), vec![OrderBy::asc("document_no")]);
    Ok(())
}

#[test]
fn filters_limits_and_narrowing() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(None))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .sticky_filter(DocumentFilter::single(FilterParam::equal("partner", "A")))
        .config(paging_config(None))
        .open()?;
    assert_eq!(view.size(), 12);
    assert_eq!(view.sticky_filters().len(), 1);
    assert!(view.filters().is_empty());

    let by_total = [OrderBy::desc("grand_total")];
    assert_eq!(view.page(0, None, &by_total)?.page()?[0].id, 23);

    repository.with_connection(|conn| {
        conn.execute("UPDATE sales_order SET partner = 'B' WHERE id IN (1, 23)", [])?;
        Ok(())
    })?;
    let changed: HashSet<DocumentId> = [1, 3, 23].into_iter().map(DocumentId::of).collect();
    view.notify_rows_changed(&changed)?;
    assert_eq!(view.size(), 10);
    assert!(!repository.contains_row(view.view_id(), &DocumentId::of(1))?);
    assert!(repository.contains_row(view.view_id(), &DocumentId::of(3))?);
    assert_eq!(view.page(0, None, &by_total)?.page()?[0].id, 21);

    let view_id = view.view_id().clone();
    view.close()?;
    assert_eq!(repository.count_selection_rows(&view_id)?, 0);
    Ok(())
}

#[test]
fn query_limit_truncates_the_selection() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(Some(20)))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .config(paging_config(Some(20)))
        .open()?;
    assert_eq!(view.size(), 20);
    assert_eq!(view.query_limit(), Some(20));
    assert!(view.is_query_limit_hit());

    let pages: Vec<usize> = PageIndex::first_page(10)?
        .iter(view.size())
        .map(|page| page.page_length())
        .collect();
    assert_eq!(pages, vec![10, 10]);
    assert_eq!(view.result().size(), 20);
    Ok(())
}

#[test]
fn resorting_respects_the_query_limit() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(Some(20)))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .config(paging_config(Some(20)))
        .open()?;

    let by_total = [OrderBy::desc("grand_total")];
    let ids = view.page_row_ids(0, Some(25), &by_total)?.row_ids()?;
    assert_eq!(ids.len(), 20);
    // Only the rows within the limit are re-sorted; SO021..SO023 never entered.
    assert_eq!(ids[0], DocumentId::of(20));

    let view_ids = view.selection_view_ids();
    assert_eq!(view_ids.len(), 2);
    for view_id in &view_ids {
        assert_eq!(repository.count_selection_rows(view_id)?, 20);
    }
    assert!(view.is_query_limit_hit());
    Ok(())
}

#[test]
fn dropped_view_cleans_up_every_selection() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(None))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .config(paging_config(None))
        .open()?;
    view.page(0, None, &[OrderBy::desc("grand_total")])?;
    view.page(0, None, &[OrderBy::asc("partner"), OrderBy::asc("document_no")])?;

    let view_ids = view.selection_view_ids();
    assert_eq!(view_ids.len(), 3);
    drop(view);
    wait_until_deleted(&repository, &view_ids)
}

#[test]
fn failed_close_schedules_remaining_selections() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let repository = sales_orders(&dir, paging_config(None))?;
    let view = SelectionView::builder(repository.clone(), "540000")
        .config(paging_config(None))
        .open()?;
    view.page(0, None, &[OrderBy::desc("grand_total")])?;

    let view_ids = view.selection_view_ids();
    assert_eq!(view_ids[0], *view.view_id());
    repository.with_connection(|conn| {
        conn.execute_batch(&format!(
            "CREATE TRIGGER keep_default_selection BEFORE DELETE ON ZV_VIEW_SELECTION
             WHEN old.view_id = '{}'
             BEGIN SELECT RAISE(ABORT, 'selection is locked'); END;",
            view_ids[0]
        ))?;
        Ok(())
    })?;

    assert!(view.close().is_err());
    wait_until_deleted(&repository, &view_ids[1..])?;
    assert_eq!(repository.count_selection_rows(&view_ids[0])?, 23);
    Ok(())
}
