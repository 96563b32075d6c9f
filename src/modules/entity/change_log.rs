//! 字段级变更记录 / Field-level change log
//!
//! 变更生效时对比正式行的前后值，业务列与 `status` 逐字段写入 `mdm_entity_change`；
//! 审计列与系统列不记录。

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::context::RequestContext;
use crate::error::{MdmError, MdmResult};
use crate::modules::entity::Entity;
use crate::modules::schema::TableDescriptor;

pub const CHANGE_LOG_DDL: [&str; 2] = [
    r#"CREATE TABLE IF NOT EXISTS "mdm_entity_change" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "table_code" varchar(64) NOT NULL,
    "entity_id" bigint NOT NULL,
    "approval_code" varchar(64),
    "operation" varchar(16) NOT NULL,
    "field_code" varchar(64) NOT NULL,
    "before_value" text,
    "after_value" text,
    "created_by" varchar(64) NOT NULL DEFAULT '',
    "created_at" timestamp(3) NOT NULL DEFAULT now()
)"#,
    r#"CREATE INDEX IF NOT EXISTS "idx_mdm_entity_change_entity" ON "mdm_entity_change" ("table_code", "entity_id")"#,
];

/// 单个字段的前后值 / before and after of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub field_code: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// 已记录的字段变更 / A stored field change
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FieldChange {
    pub table_code: String,
    pub entity_id: i64,
    pub approval_code: Option<String>,
    pub operation: String,
    pub field_code: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
}

fn value_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 对比业务列与状态列 / diff business columns plus `status`
pub fn diff_fields(desc: &TableDescriptor, before: &Entity, after: &Entity) -> Vec<FieldDiff> {
    desc.business_columns()
        .map(|c| c.name.as_str())
        .chain(std::iter::once("status"))
        .filter_map(|name| {
            let b = value_text(before.get(name));
            let a = value_text(after.get(name));
            (b != a).then(|| FieldDiff {
                field_code: name.to_string(),
                before: b,
                after: a,
            })
        })
        .collect()
}

pub struct ChangeLog {
    pool: PgPool,
}

impl ChangeLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> MdmResult<()> {
        for ddl in CHANGE_LOG_DDL {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// 批量写入一次变更的字段差异 / write the diffs of one change
    pub async fn record(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        entity_id: i64,
        operation: &str,
        approval_code: Option<&str>,
        diffs: &[FieldDiff],
    ) -> MdmResult<u64> {
        if diffs.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"INSERT INTO "mdm_entity_change" ("table_code", "entity_id", "approval_code", "operation", "field_code", "before_value", "after_value", "created_by") "#,
        );
        qb.push_values(diffs, |mut b, d| {
            b.push_bind(table_code.to_string())
                .push_bind(entity_id)
                .push_bind(approval_code.map(str::to_string))
                .push_bind(operation.to_string())
                .push_bind(d.field_code.clone())
                .push_bind(d.before.clone())
                .push_bind(d.after.clone())
                .push_bind(ctx.user_id.clone());
        });
        let done = ctx
            .run("entity.change_log", async {
                Ok::<_, MdmError>(qb.build().execute(&self.pool).await?)
            })
            .await?;
        Ok(done.rows_affected())
    }

    /// 某实体的字段变更历史，按写入顺序 / field history of one entity in write order
    pub async fn history(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        entity_id: i64,
    ) -> MdmResult<Vec<FieldChange>> {
        ctx.run("entity.change_history", async {
            Ok::<_, MdmError>(
                sqlx::query_as::<_, FieldChange>(
                    r#"SELECT "table_code", "entity_id", "approval_code", "operation", "field_code", "before_value", "after_value", "created_by", "created_at" FROM "mdm_entity_change" WHERE "table_code" = $1 AND "entity_id" = $2 ORDER BY "id""#,
                )
                .bind(table_code)
                .bind(entity_id)
                .fetch_all(&self.pool)
                .await?,
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::schema::{FieldDefinition, PrimitiveType, TableKind};
    use serde_json::json;

    fn desc() -> TableDescriptor {
        let sku = FieldDefinition::new("goods", "sku", "编码", PrimitiveType::Text);
        let mut qty = FieldDefinition::new("goods", "qty", "数量", PrimitiveType::Number);
        qty.sort_order = 1;
        TableDescriptor::build("goods", TableKind::Live, &[sku, qty]).unwrap()
    }

    fn entity(v: Value) -> Entity {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn only_changed_business_fields_and_status_are_listed() {
        let before = entity(json!({
            "id": 1, "sku": "A1", "qty": 3, "status": "Normal",
            "updated_by": "u1", "updated_at": "2024-01-01 00:00:00.000", "action": "I"
        }));
        let after = entity(json!({
            "id": 1, "sku": "A1", "qty": 5, "status": "Frozen",
            "updated_by": "u2", "updated_at": "2024-01-02 00:00:00.000", "action": "B"
        }));
        let diffs = diff_fields(&desc(), &before, &after);
        assert_eq!(
            diffs,
            vec![
                FieldDiff {
                    field_code: "qty".into(),
                    before: Some("3".into()),
                    after: Some("5".into()),
                },
                FieldDiff {
                    field_code: "status".into(),
                    before: Some("Normal".into()),
                    after: Some("Frozen".into()),
                },
            ]
        );
    }

    #[test]
    fn created_rows_diff_against_nothing() {
        let after = entity(json!({"sku": "A1", "qty": null, "status": "Normal"}));
        let diffs = diff_fields(&desc(), &Entity::new(), &after);
        let fields: Vec<&str> = diffs.iter().map(|d| d.field_code.as_str()).collect();
        assert_eq!(fields, ["sku", "status"]);
        assert!(diffs.iter().all(|d| d.before.is_none()));
    }
}
