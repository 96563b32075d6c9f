//! 表结构编译器 / Schema compiler
//!
//! `plan` 是纯函数：比较目标描述与数据库现状，只输出缺失或不一致的 DDL，
//! 因此对同一目录连续两次 `reconcile`，第二次不会产生任何语句。
//! `plan` is pure: it diffs the desired descriptor with the introspected state and emits
//! only missing or mismatched DDL, so a second `reconcile` over an unchanged catalog is a no-op.

use serde::Serialize;
use sqlx::{Acquire, PgConnection, PgPool};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{MdmError, MdmResult};
use crate::modules::schema::catalog::FieldCatalog;
use crate::modules::schema::descriptor::{ColumnSpec, SqlType, TableDescriptor, TableKind};

/// 数据库中已存在的列 / Existing column as introspected
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub char_len: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
    pub is_nullable: String,
}

impl ColumnInfo {
    pub fn nullable(&self) -> bool {
        self.is_nullable.eq_ignore_ascii_case("YES")
    }

    pub fn matches(&self, ty: &SqlType) -> bool {
        match ty {
            SqlType::Varchar(n) => {
                self.data_type == "character varying" && self.char_len == Some(*n as i32)
            }
            SqlType::Numeric { precision, scale } => {
                self.data_type == "numeric"
                    && self.numeric_precision == Some(*precision as i32)
                    && self.numeric_scale == Some(*scale as i32)
            }
            SqlType::BigInt => self.data_type == "bigint",
            SqlType::Date => self.data_type == "date",
            SqlType::Timestamp => {
                self.data_type == "timestamp without time zone" && self.datetime_precision == Some(3)
            }
        }
    }
}

/// 表现状 / Introspected table state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableState {
    pub columns: Vec<ColumnInfo>,
    pub indexes: HashSet<String>,
}

impl TableState {
    pub fn exists(&self) -> bool {
        !self.columns.is_empty()
    }

    fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.column_name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DdlStatement {
    CreateTable(String),
    AddColumn(String),
    /// 修改已存在列（类型或可空性），失败只记录并跳过
    /// Alteration of an existing column, logged and skipped on failure
    AlterColumn { column: String, sql: String },
    CreateIndex(String),
}

impl DdlStatement {
    pub fn sql(&self) -> &str {
        match self {
            DdlStatement::CreateTable(s)
            | DdlStatement::AddColumn(s)
            | DdlStatement::CreateIndex(s) => s,
            DdlStatement::AlterColumn { sql, .. } => sql,
        }
    }

    pub fn is_alteration(&self) -> bool {
        matches!(self, DdlStatement::AlterColumn { .. })
    }
}

/// 计算迁移语句 / Compute the migration statements
pub fn plan(desired: &TableDescriptor, state: &TableState) -> Vec<DdlStatement> {
    let table = desired.quoted_table();
    let mut out = Vec::new();

    if !state.exists() {
        let cols = desired
            .columns
            .iter()
            .map(ColumnSpec::ddl)
            .collect::<Vec<_>>()
            .join(", ");
        out.push(DdlStatement::CreateTable(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table, cols
        )));
    } else {
        for col in &desired.columns {
            let ident = v::quote_ident(&col.name);
            match state.column(&col.name) {
                None => out.push(DdlStatement::AddColumn(format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                    table,
                    col.ddl()
                ))),
                Some(_) if col.is_primary_key() => {}
                Some(existing) => {
                    if !existing.matches(&col.sql_type) {
                        let ty = col.sql_type.ddl();
                        out.push(DdlStatement::AlterColumn {
                            column: col.name.clone(),
                            sql: format!(
                                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                                table, ident, ty, ident, ty
                            ),
                        });
                    }
                    if col.nullable && !existing.nullable() {
                        out.push(DdlStatement::AlterColumn {
                            column: col.name.clone(),
                            sql: format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL", table, ident),
                        });
                    }
                }
            }
        }
    }

    for idx in &desired.indexes {
        if !state.indexes.contains(&idx.name) {
            out.push(DdlStatement::CreateIndex(idx.ddl(&desired.table_name)));
        }
    }
    out
}

/// 单表单变体的迁移结果 / Reconcile outcome for one table variant
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    pub executed: Vec<String>,
    /// 被跳过的修改语句及原因 / skipped alterations with the reason
    pub skipped: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty() && self.skipped.is_empty()
    }
}

/// 全量迁移汇总 / Summary over every registered table
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub reports: Vec<ReconcileReport>,
    pub failed: Vec<(String, MdmError)>,
}

pub struct SchemaCompiler {
    pool: PgPool,
    catalog: Arc<FieldCatalog>,
}

impl SchemaCompiler {
    pub fn new(pool: PgPool, catalog: Arc<FieldCatalog>) -> Self {
        Self { pool, catalog }
    }

    /// 迁移一张表的正式、草稿与日志三个变体 / Reconcile the live, draft and log variants
    pub async fn reconcile(&self, table_code: &str) -> MdmResult<Vec<ReconcileReport>> {
        let mut reports = Vec::with_capacity(TableKind::ALL.len());
        for kind in TableKind::ALL {
            reports.push(self.reconcile_kind(table_code, kind).await?);
        }
        self.catalog.invalidate(table_code);
        Ok(reports)
    }

    /// 迁移全部已登记表，单表失败不影响其他表
    /// Reconcile every registered table; one table failing does not stop the rest
    pub async fn reconcile_all(&self) -> MdmResult<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for table in self.catalog.list_tables().await? {
            match self.reconcile(&table.code).await {
                Ok(reports) => summary.reports.extend(reports),
                Err(e) => {
                    tracing::error!(table = %table.code, error = %e, "reconcile failed");
                    summary.failed.push((table.code.clone(), e));
                }
            }
        }
        Ok(summary)
    }

    pub async fn reconcile_kind(&self, table_code: &str, kind: TableKind) -> MdmResult<ReconcileReport> {
        let desired = self.catalog.fresh_descriptor(table_code, kind).await?;
        let table = desired.table_name.clone();
        let migration = |e: sqlx::Error| MdmError::migration(table.clone(), e);

        let mut tx = self.pool.begin().await.map_err(migration)?;
        // 同表迁移串行化 / serialize DDL per table
        v::advisory_xact_lock(&mut *tx, &table)
            .await
            .map_err(|e| MdmError::migration(table.clone(), e))?;

        let state = introspect(&mut *tx, &table).await.map_err(migration)?;
        let statements = plan(&desired, &state);
        let mut report = ReconcileReport {
            table: table.clone(),
            ..Default::default()
        };

        for stmt in &statements {
            tracing::debug!(table = %table, sql = stmt.sql(), "ddl");
            if stmt.is_alteration() {
                let mut sp = Acquire::begin(&mut *tx).await.map_err(migration)?;
                match sqlx::query(stmt.sql()).execute(&mut *sp).await {
                    Ok(_) => {
                        sp.commit().await.map_err(migration)?;
                        report.executed.push(stmt.sql().to_string());
                    }
                    Err(e) => {
                        tracing::warn!(table = %table, sql = stmt.sql(), error = %e, "column alteration skipped");
                        sp.rollback().await.map_err(migration)?;
                        report.skipped.push((stmt.sql().to_string(), e.to_string()));
                    }
                }
            } else {
                sqlx::query(stmt.sql())
                    .execute(&mut *tx)
                    .await
                    .map_err(migration)?;
                report.executed.push(stmt.sql().to_string());
            }
        }
        tx.commit().await.map_err(migration)?;

        if report.is_noop() {
            tracing::debug!(table = %table, "schema up to date");
        } else {
            tracing::info!(
                table = %table,
                executed = report.executed.len(),
                skipped = report.skipped.len(),
                "schema reconciled"
            );
        }
        Ok(report)
    }
}

/// 读取表现状 / Introspect the table
pub async fn introspect(conn: &mut PgConnection, table: &str) -> Result<TableState, sqlx::Error> {
    let columns: Vec<ColumnInfo> = sqlx::query_as(
        r#"SELECT column_name::text AS column_name,
                  data_type::text AS data_type,
                  character_maximum_length::int4 AS char_len,
                  numeric_precision::int4 AS numeric_precision,
                  numeric_scale::int4 AS numeric_scale,
                  datetime_precision::int4 AS datetime_precision,
                  is_nullable::text AS is_nullable
             FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT indexname::text FROM pg_indexes WHERE schemaname = current_schema() AND tablename = $1",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    Ok(TableState {
        columns,
        indexes: indexes.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::schema::field::{FieldDefinition, NumericOptions, PrimitiveType};

    fn info(col: &ColumnSpec) -> ColumnInfo {
        let (data_type, char_len, p, s, dp) = match col.sql_type {
            SqlType::Varchar(n) => ("character varying", Some(n as i32), None, None, None),
            SqlType::Numeric { precision, scale } => {
                ("numeric", None, Some(precision as i32), Some(scale as i32), None)
            }
            SqlType::BigInt => ("bigint", None, Some(64), Some(0), None),
            SqlType::Date => ("date", None, None, None, Some(0)),
            SqlType::Timestamp => ("timestamp without time zone", None, None, None, Some(3)),
        };
        ColumnInfo {
            column_name: col.name.clone(),
            data_type: data_type.to_string(),
            char_len,
            numeric_precision: p,
            numeric_scale: s,
            datetime_precision: dp,
            is_nullable: if col.nullable { "YES" } else { "NO" }.to_string(),
        }
    }

    /// 模拟执行计划后的数据库现状 / state after the plan has been applied
    fn applied(d: &TableDescriptor) -> TableState {
        TableState {
            columns: d.columns.iter().map(info).collect(),
            indexes: d.indexes.iter().map(|i| i.name.clone()).collect(),
        }
    }

    fn fields() -> Vec<FieldDefinition> {
        let mut code = FieldDefinition::new("goods", "code", "编码", PrimitiveType::Text);
        code.is_unique = true;
        let mut price = FieldDefinition::new("goods", "price", "价格", PrimitiveType::Number);
        price.numeric = NumericOptions {
            precision: Some(10),
            scale: Some(2),
        };
        price.sort_order = 1;
        let mut name = FieldDefinition::new("goods", "name", "名称", PrimitiveType::Text);
        name.is_index = true;
        name.sort_order = 2;
        vec![code, price, name]
    }

    #[test]
    fn fresh_table_creates_everything() {
        let d = TableDescriptor::build("goods", TableKind::Live, &fields()).unwrap();
        let stmts = plan(&d, &TableState::default());
        assert!(matches!(stmts[0], DdlStatement::CreateTable(ref s) if s.starts_with("CREATE TABLE IF NOT EXISTS \"t_goods\" (\"id\" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY")));
        assert_eq!(
            stmts.iter().filter(|s| matches!(s, DdlStatement::CreateIndex(_))).count(),
            d.indexes.len()
        );
        assert!(stmts.iter().any(|s| s.sql().contains("CREATE UNIQUE INDEX")));
    }

    #[test]
    fn second_run_is_a_noop() {
        for kind in TableKind::ALL {
            let d = TableDescriptor::build("goods", kind, &fields()).unwrap();
            assert!(!plan(&d, &TableState::default()).is_empty());
            assert!(plan(&d, &applied(&d)).is_empty(), "{kind:?} not idempotent");
        }
    }

    #[test]
    fn new_field_adds_column_only() {
        let before = TableDescriptor::build("goods", TableKind::Live, &fields()).unwrap();
        let mut more = fields();
        more.push(FieldDefinition::new("goods", "born", "日期", PrimitiveType::Date));
        let after = TableDescriptor::build("goods", TableKind::Live, &more).unwrap();
        let stmts = plan(&after, &applied(&before));
        assert_eq!(
            stmts,
            vec![DdlStatement::AddColumn(
                "ALTER TABLE \"t_goods\" ADD COLUMN IF NOT EXISTS \"born\" date".into()
            )]
        );
    }

    #[test]
    fn changed_type_and_not_null_emit_explicit_alterations() {
        let d = TableDescriptor::build("goods", TableKind::Live, &fields()).unwrap();
        let mut state = applied(&d);
        for c in state.columns.iter_mut() {
            if c.column_name == "name" {
                c.char_len = Some(50);
                c.is_nullable = "NO".into();
            }
        }
        let stmts = plan(&d, &state);
        assert_eq!(stmts.len(), 2);
        assert!(stmts.iter().all(DdlStatement::is_alteration));
        assert_eq!(
            stmts[0].sql(),
            "ALTER TABLE \"t_goods\" ALTER COLUMN \"name\" TYPE varchar(255) USING \"name\"::varchar(255)"
        );
        assert_eq!(
            stmts[1].sql(),
            "ALTER TABLE \"t_goods\" ALTER COLUMN \"name\" DROP NOT NULL"
        );
    }

    #[test]
    fn draft_plan_never_creates_unique_index() {
        let d = TableDescriptor::build("goods", TableKind::Draft, &fields()).unwrap();
        let stmts = plan(&d, &TableState::default());
        assert!(stmts.iter().all(|s| !s.sql().contains("UNIQUE")));
        assert!(stmts.iter().any(|s| s.sql().contains("idx_t_goods_draft_name")));
    }

    #[test]
    fn primary_key_type_is_not_altered() {
        let d = TableDescriptor::build("goods", TableKind::Live, &fields()).unwrap();
        let mut state = applied(&d);
        state.columns[0].data_type = "integer".into();
        assert!(plan(&d, &state).is_empty());
    }
}
