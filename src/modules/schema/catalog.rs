//! 字段目录 / Field catalog
//!
//! `CatalogStore` 是持久化接缝：`PgCatalogStore` 面向 PostgreSQL，`MemoryCatalogStore` 用于测试。
//! `FieldCatalog` 在其上做校验、唯一性检查与表描述缓存。

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MdmError, MdmResult};
use crate::modules::schema::cache::DescriptorCache;
use crate::modules::schema::descriptor::{TableDescriptor, TableKind};
use crate::modules::schema::field::{
    validate_table_code, FieldDefinition, NumericOptions, RecordStatus, TableDefinition,
};

/// 目录存储 / Catalog storage
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_table(&self, table: &TableDefinition) -> MdmResult<()>;
    async fn get_table(&self, code: &str) -> MdmResult<Option<TableDefinition>>;
    async fn list_tables(&self) -> MdmResult<Vec<TableDefinition>>;
    async fn insert_field(&self, field: &FieldDefinition) -> MdmResult<i64>;
    async fn update_field(&self, field: &FieldDefinition) -> MdmResult<()>;
    async fn get_field(&self, id: i64) -> MdmResult<Option<FieldDefinition>>;
    async fn find_field(&self, table_code: &str, code: &str) -> MdmResult<Option<FieldDefinition>>;
    /// `Normal` 状态字段，按 `sort_order, id` 排序 / active fields ordered by sort_order, id
    async fn list_active_fields(&self, table_code: &str) -> MdmResult<Vec<FieldDefinition>>;
}

/// 字段目录服务 / Field catalog service
pub struct FieldCatalog {
    store: Arc<dyn CatalogStore>,
    cache: DescriptorCache,
}

impl FieldCatalog {
    pub fn new(store: Arc<dyn CatalogStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DescriptorCache::new(ttl),
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub async fn register_table(&self, code: &str, name: &str) -> MdmResult<TableDefinition> {
        validate_table_code(code)?;
        if self.store.get_table(code).await?.is_some() {
            return Err(MdmError::conflict(format!("表 '{}' 已存在", code)));
        }
        let table = TableDefinition {
            code: code.to_string(),
            name: name.to_string(),
            status: RecordStatus::Normal,
        };
        self.store.insert_table(&table).await?;
        tracing::info!(table = code, "table registered");
        Ok(table)
    }

    /// 已登记且未删除的表 / registered, non-deleted table
    pub async fn require_table(&self, code: &str) -> MdmResult<TableDefinition> {
        validate_table_code(code)?;
        match self.store.get_table(code).await? {
            Some(t) if t.status != RecordStatus::Deleted => Ok(t),
            _ => Err(MdmError::validation(
                "table_code",
                format!("未知的表编码 '{}'", code),
            )),
        }
    }

    pub async fn list_tables(&self) -> MdmResult<Vec<TableDefinition>> {
        self.store.list_tables().await
    }

    pub async fn create_field(&self, mut field: FieldDefinition) -> MdmResult<FieldDefinition> {
        field.validate()?;
        self.require_table(&field.table_code).await?;
        if self
            .store
            .find_field(&field.table_code, &field.code)
            .await?
            .is_some()
        {
            return Err(MdmError::conflict(format!(
                "字段 '{}.{}' 已存在",
                field.table_code, field.code
            )));
        }
        field.status = RecordStatus::Normal;
        field.id = self.store.insert_field(&field).await?;
        self.cache.invalidate(&field.table_code);
        Ok(field)
    }

    /// 更新字段，表编码与字段编码不可变 / table and field codes are immutable
    pub async fn update_field(&self, field: FieldDefinition) -> MdmResult<FieldDefinition> {
        let current = self
            .store
            .get_field(field.id)
            .await?
            .ok_or_else(|| MdmError::not_found("field", field.id))?;
        if current.table_code != field.table_code {
            return Err(MdmError::validation("table_code", "表编码不可修改"));
        }
        if current.code != field.code {
            return Err(MdmError::validation("code", "字段编码不可修改"));
        }
        field.validate()?;
        self.store.update_field(&field).await?;
        self.cache.invalidate(&field.table_code);
        Ok(field)
    }

    /// 退役字段（只改状态，不删列）/ retire a field, the column stays
    pub async fn retire_field(&self, id: i64) -> MdmResult<()> {
        let mut field = self
            .store
            .get_field(id)
            .await?
            .ok_or_else(|| MdmError::not_found("field", id))?;
        field.status = RecordStatus::Deleted;
        self.store.update_field(&field).await?;
        self.cache.invalidate(&field.table_code);
        Ok(())
    }

    pub async fn get_field(&self, id: i64) -> MdmResult<FieldDefinition> {
        self.store
            .get_field(id)
            .await?
            .ok_or_else(|| MdmError::not_found("field", id))
    }

    pub async fn list_active(&self, table_code: &str) -> MdmResult<Vec<FieldDefinition>> {
        validate_table_code(table_code)?;
        self.store.list_active_fields(table_code).await
    }

    /// 取表描述（带缓存）/ descriptor, cached
    pub async fn descriptor(&self, table_code: &str, kind: TableKind) -> MdmResult<Arc<TableDescriptor>> {
        if let Some(d) = self.cache.get(table_code, kind) {
            return Ok(d);
        }
        self.require_table(table_code).await?;
        let fields = self.store.list_active_fields(table_code).await?;
        let d = TableDescriptor::build(table_code, kind, &fields)?;
        Ok(self.cache.insert(d))
    }

    /// 绕过缓存重建描述 / rebuild bypassing the cache
    pub async fn fresh_descriptor(&self, table_code: &str, kind: TableKind) -> MdmResult<TableDescriptor> {
        self.require_table(table_code).await?;
        let fields = self.store.list_active_fields(table_code).await?;
        TableDescriptor::build(table_code, kind, &fields)
    }

    pub fn invalidate(&self, table_code: &str) {
        self.cache.invalidate(table_code);
    }
}

/// 目录系统表 / Catalog system tables
pub const CATALOG_DDL: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS "mdm_table" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "code" varchar(64) NOT NULL UNIQUE,
    "name" varchar(128) NOT NULL DEFAULT '',
    "status" varchar(16) NOT NULL DEFAULT 'Normal',
    "created_at" timestamptz NOT NULL DEFAULT now(),
    "updated_at" timestamptz NOT NULL DEFAULT now()
)"#,
    r#"CREATE TABLE IF NOT EXISTS "mdm_table_field" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "table_code" varchar(64) NOT NULL,
    "code" varchar(64) NOT NULL,
    "name" varchar(128) NOT NULL DEFAULT '',
    "primitive_type" varchar(16) NOT NULL,
    "length" integer,
    "required" boolean NOT NULL DEFAULT false,
    "is_index" boolean NOT NULL DEFAULT false,
    "is_unique" boolean NOT NULL DEFAULT false,
    "index_name" varchar(64),
    "index_priority" integer NOT NULL DEFAULT 0,
    "precision" integer,
    "scale" integer,
    "sort_order" integer NOT NULL DEFAULT 0,
    "status" varchar(16) NOT NULL DEFAULT 'Normal',
    "created_at" timestamptz NOT NULL DEFAULT now(),
    "updated_at" timestamptz NOT NULL DEFAULT now(),
    UNIQUE ("table_code", "code")
)"#,
];

#[derive(sqlx::FromRow)]
struct TableRow {
    code: String,
    name: String,
    status: String,
}

impl TryFrom<TableRow> for TableDefinition {
    type Error = MdmError;

    fn try_from(r: TableRow) -> MdmResult<Self> {
        Ok(TableDefinition {
            status: r.status.parse().map_err(corrupt("status"))?,
            code: r.code,
            name: r.name,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FieldRow {
    id: i64,
    table_code: String,
    code: String,
    name: String,
    primitive_type: String,
    length: Option<i32>,
    required: bool,
    is_index: bool,
    is_unique: bool,
    index_name: Option<String>,
    index_priority: i32,
    precision: Option<i32>,
    scale: Option<i32>,
    sort_order: i32,
    status: String,
}

impl TryFrom<FieldRow> for FieldDefinition {
    type Error = MdmError;

    fn try_from(r: FieldRow) -> MdmResult<Self> {
        Ok(FieldDefinition {
            id: r.id,
            primitive_type: r.primitive_type.parse().map_err(corrupt("primitive_type"))?,
            status: r.status.parse().map_err(corrupt("status"))?,
            table_code: r.table_code,
            code: r.code,
            name: r.name,
            length: r.length,
            required: r.required,
            is_index: r.is_index,
            is_unique: r.is_unique,
            index_name: r.index_name,
            index_priority: r.index_priority,
            numeric: NumericOptions {
                precision: r.precision.map(|p| p.max(0) as u32),
                scale: r.scale.map(|s| s.max(0) as u32),
            },
            sort_order: r.sort_order,
        })
    }
}

pub(crate) fn corrupt<E: std::fmt::Display>(column: &'static str) -> impl Fn(E) -> MdmError {
    move |e| {
        MdmError::Database(v::DbError::Value {
            column: column.to_string(),
            message: e.to_string(),
        })
    }
}

const FIELD_COLUMNS: &str = r#""id", "table_code", "code", "name", "primitive_type", "length", "required", "is_index", "is_unique", "index_name", "index_priority", "precision", "scale", "sort_order", "status""#;

/// PostgreSQL 目录存储 / PostgreSQL catalog store
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> MdmResult<()> {
        for ddl in CATALOG_DDL {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn insert_table(&self, table: &TableDefinition) -> MdmResult<()> {
        sqlx::query(r#"INSERT INTO "mdm_table" ("code", "name", "status") VALUES ($1, $2, $3)"#)
            .bind(&table.code)
            .bind(&table.name)
            .bind(table.status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_table(&self, code: &str) -> MdmResult<Option<TableDefinition>> {
        let row: Option<TableRow> = sqlx::query_as(
            r#"SELECT "code", "name", "status" FROM "mdm_table" WHERE "code" = $1"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TableDefinition::try_from).transpose()
    }

    async fn list_tables(&self) -> MdmResult<Vec<TableDefinition>> {
        let rows: Vec<TableRow> = sqlx::query_as(
            r#"SELECT "code", "name", "status" FROM "mdm_table" WHERE "status" <> 'Deleted' ORDER BY "id""#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TableDefinition::try_from).collect()
    }

    async fn insert_field(&self, f: &FieldDefinition) -> MdmResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO "mdm_table_field" ("table_code", "code", "name", "primitive_type", "length", "required", "is_index", "is_unique", "index_name", "index_priority", "precision", "scale", "sort_order", "status") VALUES ("#,
        );
        let mut sep = qb.separated(", ");
        sep.push_bind(&f.table_code)
            .push_bind(&f.code)
            .push_bind(&f.name)
            .push_bind(f.primitive_type.as_str())
            .push_bind(f.length)
            .push_bind(f.required)
            .push_bind(f.is_index)
            .push_bind(f.is_unique)
            .push_bind(&f.index_name)
            .push_bind(f.index_priority)
            .push_bind(f.numeric.precision.map(|p| p as i32))
            .push_bind(f.numeric.scale.map(|s| s as i32))
            .push_bind(f.sort_order)
            .push_bind(f.status.as_str());
        qb.push(r#") RETURNING "id""#);
        let id: i64 = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(id)
    }

    async fn update_field(&self, f: &FieldDefinition) -> MdmResult<()> {
        let res = sqlx::query(
            r#"UPDATE "mdm_table_field" SET "name" = $2, "primitive_type" = $3, "length" = $4, "required" = $5, "is_index" = $6, "is_unique" = $7, "index_name" = $8, "index_priority" = $9, "precision" = $10, "scale" = $11, "sort_order" = $12, "status" = $13, "updated_at" = $14 WHERE "id" = $1"#,
        )
        .bind(f.id)
        .bind(&f.name)
        .bind(f.primitive_type.as_str())
        .bind(f.length)
        .bind(f.required)
        .bind(f.is_index)
        .bind(f.is_unique)
        .bind(&f.index_name)
        .bind(f.index_priority)
        .bind(f.numeric.precision.map(|p| p as i32))
        .bind(f.numeric.scale.map(|s| s as i32))
        .bind(f.sort_order)
        .bind(f.status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(MdmError::not_found("field", f.id));
        }
        Ok(())
    }

    async fn get_field(&self, id: i64) -> MdmResult<Option<FieldDefinition>> {
        let row: Option<FieldRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_table_field" WHERE "id" = $1"#,
            FIELD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FieldDefinition::try_from).transpose()
    }

    async fn find_field(&self, table_code: &str, code: &str) -> MdmResult<Option<FieldDefinition>> {
        let row: Option<FieldRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_table_field" WHERE "table_code" = $1 AND "code" = $2"#,
            FIELD_COLUMNS
        ))
        .bind(table_code)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(FieldDefinition::try_from).transpose()
    }

    async fn list_active_fields(&self, table_code: &str) -> MdmResult<Vec<FieldDefinition>> {
        let rows: Vec<FieldRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_table_field" WHERE "table_code" = $1 AND "status" = 'Normal' ORDER BY "sort_order", "id""#,
            FIELD_COLUMNS
        ))
        .bind(table_code)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FieldDefinition::try_from).collect()
    }
}

/// 内存目录存储 / In-memory catalog store
#[derive(Default)]
pub struct MemoryCatalogStore {
    tables: Mutex<Vec<TableDefinition>>,
    fields: Mutex<Vec<FieldDefinition>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn insert_table(&self, table: &TableDefinition) -> MdmResult<()> {
        self.tables.lock().push(table.clone());
        Ok(())
    }

    async fn get_table(&self, code: &str) -> MdmResult<Option<TableDefinition>> {
        Ok(self.tables.lock().iter().find(|t| t.code == code).cloned())
    }

    async fn list_tables(&self) -> MdmResult<Vec<TableDefinition>> {
        Ok(self
            .tables
            .lock()
            .iter()
            .filter(|t| t.status != RecordStatus::Deleted)
            .cloned()
            .collect())
    }

    async fn insert_field(&self, field: &FieldDefinition) -> MdmResult<i64> {
        let mut fields = self.fields.lock();
        let id = fields.iter().map(|f| f.id).max().unwrap_or(0) + 1;
        let mut f = field.clone();
        f.id = id;
        fields.push(f);
        Ok(id)
    }

    async fn update_field(&self, field: &FieldDefinition) -> MdmResult<()> {
        let mut fields = self.fields.lock();
        match fields.iter_mut().find(|f| f.id == field.id) {
            Some(slot) => {
                *slot = field.clone();
                Ok(())
            }
            None => Err(MdmError::not_found("field", field.id)),
        }
    }

    async fn get_field(&self, id: i64) -> MdmResult<Option<FieldDefinition>> {
        Ok(self.fields.lock().iter().find(|f| f.id == id).cloned())
    }

    async fn find_field(&self, table_code: &str, code: &str) -> MdmResult<Option<FieldDefinition>> {
        Ok(self
            .fields
            .lock()
            .iter()
            .find(|f| f.table_code == table_code && f.code == code)
            .cloned())
    }

    async fn list_active_fields(&self, table_code: &str) -> MdmResult<Vec<FieldDefinition>> {
        let mut out: Vec<FieldDefinition> = self
            .fields
            .lock()
            .iter()
            .filter(|f| f.table_code == table_code && f.is_active())
            .cloned()
            .collect();
        out.sort_by_key(|f| (f.sort_order, f.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::schema::field::PrimitiveType;

    fn catalog() -> FieldCatalog {
        FieldCatalog::new(Arc::new(MemoryCatalogStore::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn fields_require_a_registered_table() {
        let c = catalog();
        let f = FieldDefinition::new("customer", "name", "名称", PrimitiveType::Text);
        assert!(matches!(
            c.create_field(f.clone()).await,
            Err(MdmError::Validation { .. })
        ));
        c.register_table("customer", "客户").await.unwrap();
        let created = c.create_field(f.clone()).await.unwrap();
        assert!(created.id > 0);
        assert!(c.create_field(f).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn codes_are_immutable_and_retire_hides_field() {
        let c = catalog();
        c.register_table("customer", "客户").await.unwrap();
        let created = c
            .create_field(FieldDefinition::new("customer", "name", "名称", PrimitiveType::Text))
            .await
            .unwrap();

        let mut renamed = created.clone();
        renamed.code = "title".into();
        assert!(matches!(
            c.update_field(renamed).await,
            Err(MdmError::Validation { ref field, .. }) if field == "code"
        ));

        let d = c.descriptor("customer", TableKind::Live).await.unwrap();
        assert!(d.has_column("name"));
        c.retire_field(created.id).await.unwrap();
        assert!(c.list_active("customer").await.unwrap().is_empty());
        let d = c.descriptor("customer", TableKind::Live).await.unwrap();
        assert!(!d.has_column("name"));
        assert_eq!(c.get_field(created.id).await.unwrap().status, RecordStatus::Deleted);
    }

    #[tokio::test]
    async fn unknown_tables_have_no_descriptor() {
        let c = catalog();
        assert!(c.descriptor("ghost", TableKind::Live).await.is_err());
        assert!(c.descriptor("bad name", TableKind::Live).await.is_err());
    }
}
