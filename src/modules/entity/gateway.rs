//! 通用实体网关 / Generic entity gateway
//!
//! 所有读写都以表描述为准：键必须是描述中的列，值按列类型转换后绑定，
//! 表名与列名在拼接前都经过白名单校验并加引号。

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{MdmError, MdmResult};
use crate::modules::entity::change_log::ChangeLog;
use crate::modules::schema::{FieldCatalog, RecordStatus, TableDescriptor, TableKind};
use v::Predicate;

/// 通用行 / Generic row keyed by column code
pub type Entity = Map<String, Value>;

/// upsert 时不覆盖的列 / columns never overwritten by the upsert path
const NON_UPDATABLE: [&str; 3] = ["id", "created_at", "deleted_at"];
/// 调用方附带的辅助键，不落库 / helper keys carried by callers, never stored
const HELPER_KEYS: [&str; 2] = ["table_code", "reason"];
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    pub default_size: i64,
    pub max_size: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 20,
            max_size: 500,
        }
    }
}

impl PageLimits {
    /// 返回 (page, size, offset)，页码从 1 开始 / returns (page, size, offset), pages start at 1
    pub fn normalize(&self, page: i64, size: i64) -> (i64, i64, i64) {
        let page = page.max(1);
        let size = if size <= 0 {
            self.default_size
        } else {
            size.min(self.max_size)
        };
        (page, size, (page - 1) * size)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityPage {
    pub rows: Vec<Entity>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl EntityPage {
    fn empty(page: i64, page_size: i64) -> Self {
        Self {
            rows: Vec::new(),
            total: 0,
            page,
            page_size,
        }
    }
}

pub(crate) fn now_value() -> Value {
    Value::String(Utc::now().naive_utc().format(TS_FORMAT).to_string())
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn ensure_columns<'a>(
    desc: &TableDescriptor,
    names: impl IntoIterator<Item = &'a str>,
) -> MdmResult<()> {
    for name in names {
        if !desc.has_column(name) {
            return Err(MdmError::validation(
                name,
                format!("表 {} 不存在列 '{}'", desc.table_code, name),
            ));
        }
    }
    Ok(())
}

/// 按描述列顺序排列 / order values by descriptor column order
fn ordered(desc: &TableDescriptor, mut values: Entity) -> Vec<(String, Value)> {
    desc.columns
        .iter()
        .filter_map(|c| values.remove(&c.name).map(|v| (c.name.clone(), v)))
        .collect()
}

/// 软删除范围内的过滤条件 / filter predicate scoped to live (not deleted) rows
pub(crate) fn scoped(desc: &TableDescriptor, filter: &Entity) -> MdmResult<Predicate> {
    let pred = v::build_condition(filter)?;
    let columns = pred.columns();
    ensure_columns(desc, columns.iter().map(String::as_str))?;
    Ok(Predicate::raw("\"deleted_at\" IS NULL").and(pred))
}

/// 插入前整理：去掉辅助键、补审计默认值、校验必填
/// Prepare an insert: strip helper keys, fill audit defaults, check required fields
pub(crate) fn prepare_insert(
    desc: &TableDescriptor,
    mut entity: Entity,
    actor: &str,
) -> MdmResult<Vec<(String, Value)>> {
    for key in HELPER_KEYS.iter().chain(["id"].iter()) {
        entity.remove(*key);
    }
    ensure_columns(desc, entity.keys().map(String::as_str))?;

    if desc.kind == TableKind::Live && entity.get("status").map_or(true, is_blank) {
        entity.insert("status".into(), Value::from(RecordStatus::Normal.as_str()));
    }
    let now = now_value();
    for (key, value) in [
        ("created_by", Value::from(actor)),
        ("updated_by", Value::from(actor)),
        ("created_at", now.clone()),
        ("updated_at", now),
    ] {
        if entity.get(key).map_or(true, is_blank) {
            entity.insert(key.to_string(), value);
        }
    }

    if desc.kind == TableKind::Live {
        for col in desc.business_columns().filter(|c| c.required) {
            if entity.get(&col.name).map_or(true, is_blank) {
                return Err(MdmError::validation(&col.name, "必填字段不能为空"));
            }
        }
    }
    Ok(ordered(desc, entity))
}

/// 部分更新整理 / Prepare a partial update
pub(crate) fn prepare_patch(
    desc: &TableDescriptor,
    mut patch: Entity,
    actor: &str,
) -> MdmResult<Vec<(String, Value)>> {
    for key in HELPER_KEYS.iter().chain(["id", "created_at", "created_by"].iter()) {
        patch.remove(*key);
    }
    ensure_columns(desc, patch.keys().map(String::as_str))?;
    patch.insert("updated_by".into(), Value::from(actor));
    patch.insert("updated_at".into(), now_value());
    Ok(ordered(desc, patch))
}

/// INSERT，配置了唯一键时为 upsert / INSERT, an upsert when unique keys exist
pub(crate) fn insert_query(
    desc: &TableDescriptor,
    row: &[(String, Value)],
) -> MdmResult<QueryBuilder<'static, Postgres>> {
    let type_of = |c: &str| desc.col_type(c);
    let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (", desc.quoted_table()));
    let names: Vec<String> = row.iter().map(|(c, _)| v::quote_ident(c)).collect();
    qb.push(names.join(", "));
    qb.push(") VALUES (");
    for (i, (column, value)) in row.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        v::push_typed(&mut qb, Some(column.as_str()), value, &type_of)?;
    }
    qb.push(")");

    if desc.conflict_columns != ["id"] {
        let keys = &desc.conflict_columns;
        let updates: Vec<String> = row
            .iter()
            .map(|(c, _)| c)
            .filter(|c| !keys.contains(c) && !NON_UPDATABLE.contains(&c.as_str()))
            .map(|c| format!("{0} = EXCLUDED.{0}", v::quote_ident(c)))
            .collect();
        let target: Vec<String> = keys.iter().map(|k| v::quote_ident(k)).collect();
        qb.push(format!(" ON CONFLICT ({}) ", target.join(", ")));
        if updates.is_empty() {
            qb.push("DO NOTHING");
        } else {
            qb.push(format!("DO UPDATE SET {}", updates.join(", ")));
        }
    }
    qb.push(" RETURNING *");
    Ok(qb)
}

pub(crate) fn update_query(
    desc: &TableDescriptor,
    patch: &[(String, Value)],
    pred: &Predicate,
) -> MdmResult<QueryBuilder<'static, Postgres>> {
    let type_of = |c: &str| desc.col_type(c);
    let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", desc.quoted_table()));
    for (i, (column, value)) in patch.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("{} = ", v::quote_ident(column)));
        v::push_typed(&mut qb, Some(column.as_str()), value, &type_of)?;
    }
    qb.push(" WHERE ");
    v::push_where(&mut qb, pred, &type_of)?;
    Ok(qb)
}

fn ids_filter(ids: &[i64]) -> Entity {
    let mut f = Entity::new();
    f.insert("id".into(), Value::from(ids.to_vec()));
    f
}

fn is_missing_table(e: &MdmError) -> bool {
    matches!(e, MdmError::Database(db) if db.is_undefined_table())
}

/// 实体网关 / Entity gateway
pub struct EntityGateway {
    pool: PgPool,
    catalog: Arc<FieldCatalog>,
    limits: PageLimits,
    changes: ChangeLog,
}

impl EntityGateway {
    pub fn new(pool: PgPool, catalog: Arc<FieldCatalog>, limits: PageLimits) -> Self {
        Self {
            changes: ChangeLog::new(pool.clone()),
            pool,
            catalog,
            limits,
        }
    }

    pub fn catalog(&self) -> &Arc<FieldCatalog> {
        &self.catalog
    }

    /// 字段级变更记录 / field-level change log
    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    async fn descriptor(&self, table_code: &str, kind: TableKind) -> MdmResult<Arc<TableDescriptor>> {
        self.catalog.descriptor(table_code, kind).await
    }

    /// 按主键取一行 / Fetch one row by id
    pub async fn get(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        id: i64,
    ) -> MdmResult<Entity> {
        let desc = self.descriptor(table_code, kind).await?;
        let type_of = |c: &str| desc.col_type(c);
        let sql = format!(
            "SELECT * FROM {} WHERE \"id\" = $1 AND \"deleted_at\" IS NULL",
            desc.quoted_table()
        );
        let row = ctx
            .run("entity.get", async {
                Ok::<_, MdmError>(sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?)
            })
            .await;
        match row {
            Ok(Some(row)) => Ok(v::row_to_json(&row, &type_of)?),
            Ok(None) => Err(MdmError::not_found(table_code, id)),
            Err(e) if is_missing_table(&e) => Err(MdmError::not_found(table_code, id)),
            Err(e) => Err(e),
        }
    }

    /// 满足条件的最新一行 / Latest row matching the filter
    pub async fn first(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        filter: &Entity,
    ) -> MdmResult<Option<Entity>> {
        let desc = self.descriptor(table_code, kind).await?;
        let pred = scoped(&desc, filter)?;
        let type_of = |c: &str| desc.col_type(c);
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {} WHERE ", desc.quoted_table()));
        v::push_where(&mut qb, &pred, &type_of)?;
        qb.push(" ORDER BY \"id\" DESC LIMIT 1");
        let row = ctx
            .run("entity.first", async {
                Ok::<_, MdmError>(qb.build().fetch_optional(&self.pool).await?)
            })
            .await?;
        row.map(|r| v::row_to_json(&r, &type_of).map_err(MdmError::from))
            .transpose()
    }

    /// 满足条件的全部行，按主键升序 / every row matching the filter, by ascending id
    pub async fn all(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        filter: &Entity,
    ) -> MdmResult<Vec<Entity>> {
        if filter.is_empty() {
            return Err(MdmError::validation("filter", "查询条件不能为空"));
        }
        let desc = self.descriptor(table_code, kind).await?;
        let pred = scoped(&desc, filter)?;
        let type_of = |c: &str| desc.col_type(c);
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {} WHERE ", desc.quoted_table()));
        v::push_where(&mut qb, &pred, &type_of)?;
        qb.push(" ORDER BY \"id\"");
        let rows = ctx
            .run("entity.all", async {
                Ok::<_, MdmError>(qb.build().fetch_all(&self.pool).await?)
            })
            .await?;
        rows.iter()
            .map(|r| v::row_to_json(r, &type_of).map_err(MdmError::from))
            .collect()
    }

    /// 分页查询；物理表尚未创建时返回空页
    /// Paginated query; a table not yet reconciled yields an empty page
    pub async fn page(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        page: i64,
        page_size: i64,
        filter: &Entity,
    ) -> MdmResult<EntityPage> {
        let desc = self.descriptor(table_code, kind).await?;
        let pred = scoped(&desc, filter)?;
        let (page, size, offset) = self.limits.normalize(page, page_size);
        let type_of = |c: &str| desc.col_type(c);

        let mut count = QueryBuilder::<Postgres>::new(format!(
            "SELECT COUNT(*) FROM {} WHERE ",
            desc.quoted_table()
        ));
        v::push_where(&mut count, &pred, &type_of)?;
        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT * FROM {} WHERE ", desc.quoted_table()));
        v::push_where(&mut select, &pred, &type_of)?;
        select.push(" ORDER BY \"id\" DESC LIMIT ");
        select.push_bind(size);
        select.push(" OFFSET ");
        select.push_bind(offset);
        tracing::debug!(sql = select.sql(), "entity page");

        let result = ctx
            .run("entity.page", async {
                let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
                let rows = select.build().fetch_all(&self.pool).await?;
                Ok::<_, MdmError>((total, rows))
            })
            .await;
        match result {
            Ok((total, rows)) => {
                let rows = rows
                    .iter()
                    .map(|r| v::row_to_json(r, &type_of).map_err(MdmError::from))
                    .collect::<MdmResult<Vec<_>>>()?;
                Ok(EntityPage {
                    rows,
                    total,
                    page,
                    page_size: size,
                })
            }
            Err(e) if is_missing_table(&e) => {
                tracing::warn!(table = %desc.table_name, "table not reconciled yet, empty page");
                Ok(EntityPage::empty(page, size))
            }
            Err(e) => Err(e),
        }
    }

    /// 创建；有唯一键时按唯一键 upsert / Create, upserting on the unique key set
    pub async fn create(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        entity: Entity,
    ) -> MdmResult<Entity> {
        let desc = self.descriptor(table_code, kind).await?;
        let row = prepare_insert(&desc, entity, &ctx.user_id)?;
        self.insert_row(ctx, &desc, &row).await
    }

    async fn insert_row(
        &self,
        ctx: &RequestContext,
        desc: &TableDescriptor,
        row: &[(String, Value)],
    ) -> MdmResult<Entity> {
        let type_of = |c: &str| desc.col_type(c);
        let mut qb = insert_query(desc, row)?;
        tracing::debug!(sql = qb.sql(), "entity insert");
        let returned = ctx
            .run("entity.create", async {
                Ok::<_, MdmError>(qb.build().fetch_optional(&self.pool).await?)
            })
            .await?;
        match returned {
            Some(r) => Ok(v::row_to_json(&r, &type_of)?),
            // ON CONFLICT DO NOTHING 未返回行 / nothing returned by DO NOTHING
            None => Err(MdmError::conflict(format!("{} 唯一键冲突", desc.table_name))),
        }
    }

    /// 按条件部分更新，返回影响行数 / Filtered partial update, returns affected rows
    pub async fn update(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        patch: Entity,
        filter: &Entity,
    ) -> MdmResult<u64> {
        if filter.is_empty() {
            return Err(MdmError::validation("filter", "更新条件不能为空"));
        }
        let desc = self.descriptor(table_code, kind).await?;
        let patch = prepare_patch(&desc, patch, &ctx.user_id)?;
        let pred = scoped(&desc, filter)?;
        self.execute_update(ctx, &desc, &patch, &pred, "entity.update").await
    }

    pub async fn batch_update(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        ids: &[i64],
        patch: Entity,
    ) -> MdmResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.update(ctx, table_code, kind, patch, &ids_filter(ids)).await
    }

    /// 软删除：`deleted_at`、`status = Deleted`、`action = D`
    pub async fn batch_delete(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
        ids: &[i64],
    ) -> MdmResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let desc = self.descriptor(table_code, kind).await?;
        let now = now_value();
        let patch = vec![
            ("action".to_string(), Value::from("D")),
            ("status".to_string(), Value::from(RecordStatus::Deleted.as_str())),
            ("updated_by".to_string(), Value::from(ctx.user_id.as_str())),
            ("updated_at".to_string(), now.clone()),
            ("deleted_at".to_string(), now),
        ];
        let pred = scoped(&desc, &ids_filter(ids))?;
        self.execute_update(ctx, &desc, &patch, &pred, "entity.delete").await
    }

    async fn execute_update(
        &self,
        ctx: &RequestContext,
        desc: &TableDescriptor,
        patch: &[(String, Value)],
        pred: &Predicate,
        operation: &str,
    ) -> MdmResult<u64> {
        let mut qb = update_query(desc, patch, pred)?;
        tracing::debug!(sql = qb.sql(), "entity update");
        let done = ctx
            .run(operation, async {
                Ok::<_, MdmError>(qb.build().execute(&self.pool).await?)
            })
            .await?;
        Ok(done.rows_affected())
    }

    /// 按状态统计，空状态计入 `Normal` / Count per status, blank status counted as `Normal`
    pub async fn statistics_by_status(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        kind: TableKind,
    ) -> MdmResult<BTreeMap<String, i64>> {
        let desc = self.descriptor(table_code, kind).await?;
        let sql = format!(
            "SELECT COALESCE(NULLIF(\"status\", ''), 'Normal') AS status, COUNT(*) AS total FROM {} GROUP BY 1",
            desc.quoted_table()
        );
        let rows = ctx
            .run("entity.statistics", async {
                Ok::<_, MdmError>(
                    sqlx::query_as::<_, (String, i64)>(&sql)
                        .fetch_all(&self.pool)
                        .await?,
                )
            })
            .await;
        match rows {
            Ok(rows) => Ok(merge_status_counts(rows)),
            Err(e) if is_missing_table(&e) => Ok(BTreeMap::new()),
            Err(e) => Err(e),
        }
    }

    /// 写入不可变日志快照 / Write an immutable snapshot into the log table
    pub async fn insert_log(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        snapshot: &Entity,
    ) -> MdmResult<Entity> {
        let desc = self.descriptor(table_code, TableKind::Log).await?;
        let mut row = Entity::new();
        for (k, val) in snapshot {
            if desc.has_column(k) && !NON_UPDATABLE.contains(&k.as_str()) {
                row.insert(k.clone(), val.clone());
            }
        }
        if row.get("entity_id").map_or(true, is_blank) {
            if let Some(id) = snapshot.get("id") {
                row.insert("entity_id".into(), id.clone());
            }
        }
        let row = prepare_insert(&desc, row, &ctx.user_id)?;
        self.insert_row(ctx, &desc, &row).await
    }
}

/// 合并统计结果，空白状态计入 `Normal`
fn merge_status_counts(rows: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    let mut out = BTreeMap::new();
    for (status, n) in rows {
        let key = if status.trim().is_empty() {
            RecordStatus::Normal.as_str().to_string()
        } else {
            status.trim().to_string()
        };
        *out.entry(key).or_insert(0) += n;
    }
    out
}
