use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use rusqlite_migration::Migrations;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

use crate::config::ViewConfig;
use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::view::repository::{quote_identifier, sql_literal};
use crate::view::{
    ColumnFilterConverter, DocumentFilter, FilterContext, OrderBy, OrderedSelection, PageIndex,
    RowIdsSelection, SecurityRestriction, SqlFilterConverter, ViewDataRepository,
    ViewEvaluationCtx, ViewId, ViewRow,
};

type SqlitePool = Pool<SqliteConnectionManager>;

/// [`ViewDataRepository`] over one SQLite table. Selections are stored as
/// `(view_id, seq_no, row_id)` rows in `ZV_VIEW_SELECTION`; pages are read by
/// joining the selection with the table in `seq_no` order.
///
/// Rows are deserialized from the table's columns with `serde_rusqlite`.
pub struct SqliteViewDataRepository<R> {
    pool: SqlitePool,
    table_name: String,
    key_column: String,
    order_bys: Vec<OrderBy>,
    config: ViewConfig,
    filter_converter: Arc<dyn SqlFilterConverter>,
    security: Option<Arc<dyn SecurityRestriction>>,
    cleanup: Mutex<Sender<Vec<ViewId>>>,
    marker: PhantomData<fn() -> R>,
}

pub struct SqliteViewDataRepositoryBuilder<R> {
    table_name: String,
    key_column: String,
    order_bys: Vec<OrderBy>,
    config: ViewConfig,
    filter_converter: Arc<dyn SqlFilterConverter>,
    security: Option<Arc<dyn SecurityRestriction>>,
    marker: PhantomData<fn() -> R>,
}

impl<R> SqliteViewDataRepositoryBuilder<R> {
    /// Default sort of new selections. Without any, rows are sorted by key.
    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_bys.push(order_by);
        self
    }

    pub fn config(mut self, config: ViewConfig) -> Self {
        self.config = config;
        self
    }

    pub fn filter_converter(mut self, converter: impl SqlFilterConverter + 'static) -> Self {
        self.filter_converter = Arc::new(converter);
        self
    }

    pub fn security_restriction(mut self, security: impl SecurityRestriction + 'static) -> Self {
        self.security = Some(Arc::new(security));
        self
    }

    /// Private in-memory database. All access goes through one connection.
    pub fn open_memory(self) -> Result<SqliteViewDataRepository<R>> {
        // The database lives and dies with its only connection.
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?;
        self.build(pool)
    }

    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<SqliteViewDataRepository<R>> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        });
        let pool = Pool::builder().build(manager)?;
        self.build(pool)
    }

    pub fn build(self, pool: SqlitePool) -> Result<SqliteViewDataRepository<R>> {
        for identifier in [&self.table_name, &self.key_column] {
            quote_identifier(identifier).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        }
        for order_by in &self.order_bys {
            quote_identifier(&order_by.field_name).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        }

        init_selection_tables(&*pool.get()?)?;
        let cleanup = spawn_cleanup(pool.clone());
        Ok(SqliteViewDataRepository {
            pool,
            table_name: self.table_name,
            key_column: self.key_column,
            order_bys: self.order_bys,
            config: self.config,
            filter_converter: self.filter_converter,
            security: self.security,
            cleanup: Mutex::new(cleanup),
            marker: PhantomData,
        })
    }
}

/// ZV prefixed tables are internal to this crate.
fn init_selection_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ZV_VIEW_SELECTION (
            view_id TEXT NOT NULL,
            seq_no INTEGER NOT NULL,
            row_id NOT NULL,
            PRIMARY KEY (view_id, seq_no)
        );

        CREATE INDEX IF NOT EXISTS ZV_VIEW_SELECTION_ROW
            ON ZV_VIEW_SELECTION (view_id, row_id);
    ",
    )?;
    Ok(())
}

/// Deletes selections handed over by `schedule_delete_selections` until the
/// repository, and with it the sender, is dropped.
fn spawn_cleanup(pool: SqlitePool) -> Sender<Vec<ViewId>> {
    let (tx, rx) = channel::<Vec<ViewId>>();
    thread::spawn(move || {
        for view_ids in rx {
            for view_id in view_ids {
                let result = pool
                    .get()
                    .map_err(Error::from)
                    .and_then(|conn| delete_selection_rows(&conn, &view_id));
                match result {
                    Ok(deleted) => log::debug!(
                        "VIEW SELECTION CLEANUP: view_id='{}' rows={}",
                        view_id,
                        deleted
                    ),
                    Err(e) => log::warn!("VIEW SELECTION CLEANUP FAILED: view_id='{}' error={}", view_id, e),
                }
            }
        }
        log::trace!("VIEW SELECTION CLEANUP: stopped");
    });
    tx
}

fn delete_selection_rows(conn: &Connection, view_id: &ViewId) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM ZV_VIEW_SELECTION WHERE view_id = ?",
        [view_id.to_string()],
    )?)
}

impl<R> SqliteViewDataRepository<R> {
    pub fn builder(table_name: &str, key_column: &str) -> SqliteViewDataRepositoryBuilder<R> {
        SqliteViewDataRepositoryBuilder {
            table_name: table_name.to_string(),
            key_column: key_column.to_string(),
            order_bys: Vec::new(),
            config: ViewConfig::default(),
            filter_converter: Arc::new(ColumnFilterConverter),
            security: None,
            marker: PhantomData,
        }
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Applies the caller's schema migrations to the underlying database.
    pub fn migrate(&self, migrations: &Migrations) -> Result<()> {
        let mut conn = self.connection()?;
        migrations.to_latest(&mut conn)?;
        Ok(())
    }

    /// Runs `f` with a pooled connection, e.g. to maintain the data table.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> Result<T> {
        let conn = self.connection()?;
        f(&conn).map_err(Error::storage)
    }

    /// Number of stored rows of a selection.
    pub fn count_selection_rows(&self, view_id: &ViewId) -> Result<usize> {
        let count: i64 = self.connection()?.query_row(
            "SELECT COUNT(*) FROM ZV_VIEW_SELECTION WHERE view_id = ?",
            [view_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn key_sql(&self) -> Result<String> {
        quote_identifier(&self.key_column).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    fn table_sql(&self) -> Result<String> {
        quote_identifier(&self.table_name).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    /// ORDER BY list with the key appended as tie breaker, so the order is
    /// total. Columns are prefixed with `alias.` when given.
    fn order_by_sql(&self, order_bys: &[OrderBy], alias: Option<&str>) -> Result<String> {
        let prefix = alias.map(|alias| format!("{}.", alias)).unwrap_or_default();
        let mut parts = Vec::with_capacity(order_bys.len() + 1);
        for order_by in order_bys {
            let column = quote_identifier(&order_by.field_name)
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
            let direction = if order_by.ascending { "ASC" } else { "DESC" };
            parts.push(format!("{}{} {}", prefix, column, direction));
        }
        if !order_bys.iter().any(|order_by| order_by.field_name == self.key_column) {
            parts.push(format!("{}{} ASC", prefix, self.key_sql()?));
        }
        Ok(parts.join(", "))
    }

    /// SQL for each filter, each checked to be exactly one expression.
    fn filter_clauses(&self, filters: &[DocumentFilter], filter_ctx: &FilterContext) -> Result<Vec<String>> {
        let mut clauses = Vec::new();
        for filter in filters {
            let clause = self
                .filter_converter
                .sql_where_clause(filter, filter_ctx)
                .map_err(|e| Error::InvalidFilter(format!("{}: {}", filter.filter_id, e)))?;
            if let Some(clause) = clause {
                self.validate_where_clause(&clause)?;
                clauses.push(clause);
            }
        }
        Ok(clauses)
    }

    fn validate_where_clause(&self, clause: &str) -> Result<()> {
        let sql = format!("SELECT * FROM {} WHERE {}", self.table_sql()?, clause);
        match Parser::parse_sql(&SQLiteDialect {}, &sql) {
            Ok(statements) if statements.len() == 1 => Ok(()),
            Ok(_) => Err(Error::InvalidFilter(format!("'{}' is not a single expression", clause))),
            Err(e) => Err(Error::InvalidFilter(format!("'{}': {}", clause, e))),
        }
    }

    fn page_params(page: PageIndex) -> (i64, i64) {
        let limit = i64::try_from(page.page_length()).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.first_row()).unwrap_or(i64::MAX);
        (limit, offset)
    }
}

fn compose_where(clauses: &[String]) -> String {
    if clauses.is_empty() {
        "1=1".to_string()
    } else {
        clauses
            .iter()
            .map(|clause| format!("({})", clause))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl<R> ViewDataRepository for SqliteViewDataRepository<R>
where
    R: ViewRow + DeserializeOwned,
{
    type Row = R;

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn sql_where_clause(
        &self,
        view_id: &ViewId,
        filters: &[DocumentFilter],
        row_ids: &RowIdsSelection,
    ) -> Result<String> {
        let key = self.key_sql()?;
        let view_id_literal = sql_literal(&Value::String(view_id.to_string())).map_err(Error::storage)?;
        let mut clauses = vec![format!(
            "{} IN (SELECT row_id FROM ZV_VIEW_SELECTION WHERE view_id = {})",
            key, view_id_literal
        )];
        clauses.extend(self.filter_clauses(filters, &FilterContext::default())?);
        if let RowIdsSelection::Ids(ids) = row_ids {
            if ids.is_empty() {
                clauses.push("1=0".to_string());
            } else {
                let literals = ids
                    .iter()
                    .map(|id| sql_literal(&id.to_json_value()))
                    .collect::<anyhow::Result<Vec<_>>>()
                    .map_err(Error::storage)?;
                clauses.push(format!("{} IN ({})", key, literals.join(", ")));
            }
        }
        let where_clause = compose_where(&clauses);
        self.validate_where_clause(&where_clause)?;
        Ok(where_clause)
    }

    fn retrieve_by_id(&self, _ctx: &ViewEvaluationCtx, view_id: &ViewId, row_id: &DocumentId) -> Result<R> {
        let sql = format!(
            "SELECT t.* FROM ZV_VIEW_SELECTION sel JOIN {} t ON t.{} = sel.row_id
             WHERE sel.view_id = ? AND sel.row_id = ?
             LIMIT 1",
            self.table_sql()?,
            self.key_sql()?
        );
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let row = serde_rusqlite::from_rows::<R>(stmt.query(params![view_id.to_string(), row_id])?)
            .next()
            .transpose()?;
        row.ok_or_else(|| Error::RowNotFound {
            view_id: view_id.clone(),
            row_id: row_id.clone(),
        })
    }

    fn retrieve_page(
        &self,
        _ctx: &ViewEvaluationCtx,
        selection: &OrderedSelection,
        page: PageIndex,
    ) -> Result<Vec<R>> {
        let sql = format!(
            "SELECT t.* FROM ZV_VIEW_SELECTION sel JOIN {} t ON t.{} = sel.row_id
             WHERE sel.view_id = ?
             ORDER BY sel.seq_no
             LIMIT ? OFFSET ?",
            self.table_sql()?,
            self.key_sql()?
        );
        let (limit, offset) = Self::page_params(page);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = serde_rusqlite::from_rows::<R>(stmt.query(params![
            selection.view_id().to_string(),
            limit,
            offset
        ])?)
        .collect::<std::result::Result<Vec<_>, _>>()?;
        log::trace!(
            "VIEW PAGE: view_id='{}' page={} rows={}",
            selection.view_id(),
            page,
            rows.len()
        );
        Ok(rows)
    }

    fn retrieve_row_ids_by_page(
        &self,
        _ctx: &ViewEvaluationCtx,
        selection: &OrderedSelection,
        page: PageIndex,
    ) -> Result<Vec<DocumentId>> {
        let sql = format!(
            "SELECT sel.row_id FROM ZV_VIEW_SELECTION sel JOIN {} t ON t.{} = sel.row_id
             WHERE sel.view_id = ?
             ORDER BY sel.seq_no
             LIMIT ? OFFSET ?",
            self.table_sql()?,
            self.key_sql()?
        );
        let (limit, offset) = Self::page_params(page);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params![selection.view_id().to_string(), limit, offset], |row| {
                row.get::<_, DocumentId>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn retrieve_models_by_ids<M: DeserializeOwned>(
        &self,
        view_id: &ViewId,
        row_ids: &RowIdsSelection,
    ) -> Result<Vec<M>> {
        let ids = match row_ids {
            RowIdsSelection::All => None,
            RowIdsSelection::Ids(ids) if ids.is_empty() => return Ok(Vec::new()),
            RowIdsSelection::Ids(ids) => Some(ids),
        };
        let id_filter = match ids {
            Some(ids) => format!("AND sel.row_id IN ({})", vec!["?"; ids.len()].join(", ")),
            None => String::new(),
        };
        let sql = format!(
            "SELECT t.* FROM ZV_VIEW_SELECTION sel JOIN {} t ON t.{} = sel.row_id
             WHERE sel.view_id = ? {}
             ORDER BY sel.seq_no",
            self.table_sql()?,
            self.key_sql()?,
            id_filter
        );

        let view_id = view_id.to_string();
        let mut params: Vec<&dyn ToSql> = vec![&view_id];
        if let Some(ids) = ids {
            params.extend(ids.iter().map(|id| id as &dyn ToSql));
        }
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let models = serde_rusqlite::from_rows::<M>(stmt.query(params.as_slice())?)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(models)
    }

    fn create_ordered_selection(
        &self,
        ctx: &ViewEvaluationCtx,
        view_id: ViewId,
        filters: &[DocumentFilter],
        apply_security_restrictions: bool,
        filter_ctx: &FilterContext,
    ) -> Result<OrderedSelection> {
        let mut clauses = self.filter_clauses(filters, filter_ctx)?;
        if apply_security_restrictions {
            if let Some(security) = &self.security {
                let clause = security
                    .sql_where_clause(ctx, &self.table_name)
                    .map_err(Error::storage)?;
                if let Some(clause) = clause {
                    self.validate_where_clause(&clause)?;
                    clauses.push(clause);
                }
            }
        }

        let limit = self
            .config
            .query_limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let order_by = self.order_by_sql(&self.order_bys, None)?;
        let sql = format!(
            "INSERT INTO ZV_VIEW_SELECTION (view_id, seq_no, row_id)
             SELECT ?, ROW_NUMBER() OVER (ORDER BY {order_by}), {key}
             FROM {table}
             WHERE {where_clause}
             ORDER BY {order_by}
             LIMIT ?",
            order_by = order_by,
            key = self.key_sql()?,
            table = self.table_sql()?,
            where_clause = compose_where(&clauses),
        );

        let conn = self.connection()?;
        delete_selection_rows(&conn, &view_id)?;
        let size = conn.execute(&sql, params![view_id.to_string(), limit])?;
        let selection = OrderedSelection::new(view_id, size, self.order_bys.clone(), self.config.query_limit);
        log::debug!(
            "VIEW SELECTION CREATE: view_id='{}' table='{}' size={} limit_hit={}",
            selection.view_id(),
            self.table_name,
            selection.size(),
            selection.is_query_limit_hit()
        );
        Ok(selection)
    }

    fn create_ordered_selection_from_selection(
        &self,
        _ctx: &ViewEvaluationCtx,
        from_selection: &OrderedSelection,
        order_bys: &[OrderBy],
    ) -> Result<OrderedSelection> {
        let view_id = ViewId::random(from_selection.view_id().window_id())?;
        let sql = format!(
            "INSERT INTO ZV_VIEW_SELECTION (view_id, seq_no, row_id)
             SELECT ?, ROW_NUMBER() OVER (ORDER BY {order_by}, sel.seq_no), sel.row_id
             FROM ZV_VIEW_SELECTION sel JOIN {table} t ON t.{key} = sel.row_id
             WHERE sel.view_id = ?",
            order_by = self.order_by_sql(order_bys, Some("t"))?,
            table = self.table_sql()?,
            key = self.key_sql()?,
        );

        let conn = self.connection()?;
        let size = conn.execute(
            &sql,
            params![view_id.to_string(), from_selection.view_id().to_string()],
        )?;
        let selection = OrderedSelection::new(view_id, size, order_bys.to_vec(), from_selection.query_limit());
        log::debug!(
            "VIEW SELECTION RESORT: from='{}' view_id='{}' order_by={:?} size={}",
            from_selection.view_id(),
            selection.view_id(),
            order_bys,
            selection.size()
        );
        Ok(selection)
    }

    fn remove_row_ids_not_matching_filters(
        &self,
        selection: &OrderedSelection,
        filters: &[DocumentFilter],
        row_ids: &HashSet<DocumentId>,
    ) -> Result<OrderedSelection> {
        if row_ids.is_empty() || selection.is_empty() {
            return Ok(selection.clone());
        }

        let clauses = self.filter_clauses(filters, &FilterContext::default())?;
        let sql = format!(
            "DELETE FROM ZV_VIEW_SELECTION
             WHERE view_id = ?
             AND row_id IN ({placeholders})
             AND NOT EXISTS (
                SELECT 1 FROM {table} t
                WHERE t.{key} = ZV_VIEW_SELECTION.row_id AND ({where_clause})
             )",
            placeholders = vec!["?"; row_ids.len()].join(", "),
            table = self.table_sql()?,
            key = self.key_sql()?,
            where_clause = compose_where(&clauses),
        );

        let view_id = selection.view_id().to_string();
        let mut params: Vec<&dyn ToSql> = vec![&view_id];
        params.extend(row_ids.iter().map(|id| id as &dyn ToSql));
        let removed = self.connection()?.execute(&sql, params.as_slice())?;
        log::debug!(
            "VIEW SELECTION NARROW: view_id='{}' candidates={} removed={}",
            view_id,
            row_ids.len(),
            removed
        );
        Ok(selection.with_size(selection.size().saturating_sub(removed)))
    }

    fn delete_selection(&self, view_id: &ViewId) -> Result<()> {
        let deleted = delete_selection_rows(&*self.connection()?, view_id)?;
        log::debug!("VIEW SELECTION DELETE: view_id='{}' rows={}", view_id, deleted);
        Ok(())
    }

    fn schedule_delete_selections(&self, view_ids: Vec<ViewId>) {
        if view_ids.is_empty() {
            return;
        }
        let sent = match self.cleanup.lock() {
            Ok(cleanup) => cleanup.send(view_ids).map_err(|e| e.to_string()),
            Err(_) => Err("cleanup channel lock poisoned".to_string()),
        };
        if let Err(e) = sent {
            log::warn!("VIEW SELECTION CLEANUP NOT SCHEDULED: {}", e);
        }
    }
}

impl<R> SqliteViewDataRepository<R> {
    /// Looks up whether a row is part of a selection.
    pub fn contains_row(&self, view_id: &ViewId, row_id: &DocumentId) -> Result<bool> {
        let found = self
            .connection()?
            .query_row(
                "SELECT 1 FROM ZV_VIEW_SELECTION WHERE view_id = ? AND row_id = ? LIMIT 1",
                params![view_id.to_string(), row_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
