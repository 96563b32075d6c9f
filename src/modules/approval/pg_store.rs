//! PostgreSQL 审批存储 / PostgreSQL approval store

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::error::{MdmError, MdmResult};
use crate::modules::approval::flow::counters;
use crate::modules::approval::model::{
    Approval, ApprovalDefinition, ApprovalNode, ApprovalStatus, ApprovalTask, TaskStatus,
};
use crate::modules::approval::store::{ApprovalChangeset, ApprovalStore, RemindScope};
use crate::modules::schema::catalog::corrupt;

/// 审批系统表 / Approval system tables
pub const APPROVAL_DDL: [&str; 5] = [
    r#"CREATE TABLE IF NOT EXISTS "mdm_approval_definition" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "code" varchar(64) NOT NULL,
    "name" varchar(128) NOT NULL DEFAULT '',
    "version" integer NOT NULL,
    "entity_code" varchar(64) NOT NULL,
    "status" varchar(16) NOT NULL DEFAULT 'Draft',
    "form_schema" jsonb,
    "created_at" timestamp(3) NOT NULL,
    "updated_at" timestamp(3) NOT NULL,
    UNIQUE ("code", "version")
)"#,
    r#"CREATE TABLE IF NOT EXISTS "mdm_approval_node" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "approval_def_code" varchar(64) NOT NULL,
    "version" integer NOT NULL,
    "node_code" varchar(64) NOT NULL,
    "node_name" varchar(128) NOT NULL DEFAULT '',
    "node_type" varchar(16) NOT NULL,
    "approver_type" varchar(32) NOT NULL DEFAULT '',
    "approver_config" jsonb,
    "condition_config" jsonb,
    "next_node_code" varchar(64),
    "sort_order" integer NOT NULL DEFAULT 0,
    "timeout_hours" integer NOT NULL DEFAULT 0,
    "status" varchar(16) NOT NULL DEFAULT 'Normal',
    UNIQUE ("approval_def_code", "version", "node_code")
)"#,
    r#"CREATE TABLE IF NOT EXISTS "mdm_approval" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "code" varchar(64) NOT NULL UNIQUE,
    "approval_def_code" varchar(64) NOT NULL,
    "def_version" integer NOT NULL,
    "entity_code" varchar(64) NOT NULL,
    "entity_id" bigint,
    "title" varchar(256) NOT NULL DEFAULT '',
    "form_data" jsonb NOT NULL DEFAULT '{}',
    "status" varchar(16) NOT NULL,
    "current_task_id" varchar(64) NOT NULL DEFAULT '',
    "current_task_name" varchar(128) NOT NULL DEFAULT '',
    "submitter_id" varchar(64) NOT NULL,
    "submitter_name" varchar(128) NOT NULL DEFAULT '',
    "submitted_at" timestamp(3) NOT NULL,
    "started_at" timestamp(3) NOT NULL,
    "completed_at" timestamp(3),
    "expired_at" timestamp(3),
    "task_count" integer NOT NULL DEFAULT 0,
    "completed_tasks" integer NOT NULL DEFAULT 0,
    "pending_tasks" integer NOT NULL DEFAULT 0,
    "revision" bigint NOT NULL DEFAULT 0,
    "updated_at" timestamp(3) NOT NULL
)"#,
    r#"CREATE TABLE IF NOT EXISTS "mdm_approval_task" (
    "id" bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
    "task_code" varchar(64) NOT NULL UNIQUE,
    "approval_code" varchar(64) NOT NULL,
    "node_code" varchar(64) NOT NULL,
    "node_name" varchar(128) NOT NULL DEFAULT '',
    "assignee_id" varchar(64) NOT NULL,
    "assignee_name" varchar(128) NOT NULL DEFAULT '',
    "status" varchar(16) NOT NULL,
    "result" varchar(16),
    "comment" text NOT NULL DEFAULT '',
    "reason" text NOT NULL DEFAULT '',
    "assigned_at" timestamp(3) NOT NULL,
    "started_at" timestamp(3),
    "completed_at" timestamp(3),
    "expired_at" timestamp(3),
    "remind_count" integer NOT NULL DEFAULT 0,
    "last_remind_at" timestamp(3),
    "transfer_from_id" varchar(64),
    "transfer_from_name" varchar(128),
    "transfer_to_id" varchar(64),
    "transfer_to_name" varchar(128),
    "updated_at" timestamp(3) NOT NULL
)"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS "uk_mdm_approval_task_pending" ON "mdm_approval_task" ("approval_code", "node_code", "assignee_id") WHERE "status" = 'Pending'"#,
];

const DEF_COLUMNS: &str = r#""id", "code", "name", "version", "entity_code", "status", "form_schema", "created_at", "updated_at""#;
const NODE_COLUMNS: &str = r#""id", "approval_def_code", "version", "node_code", "node_name", "node_type", "approver_type", "approver_config", "condition_config", "next_node_code", "sort_order", "timeout_hours", "status""#;
const APPROVAL_COLUMNS: &str = r#""id", "code", "approval_def_code", "def_version", "entity_code", "entity_id", "title", "form_data", "status", "current_task_id", "current_task_name", "submitter_id", "submitter_name", "submitted_at", "started_at", "completed_at", "expired_at", "task_count", "completed_tasks", "pending_tasks", "revision", "updated_at""#;
const TASK_COLUMNS: &str = r#""id", "task_code", "approval_code", "node_code", "node_name", "assignee_id", "assignee_name", "status", "result", "comment", "reason", "assigned_at", "started_at", "completed_at", "expired_at", "remind_count", "last_remind_at", "transfer_from_id", "transfer_from_name", "transfer_to_id", "transfer_to_name", "updated_at""#;

#[derive(sqlx::FromRow)]
struct DefinitionRow {
    id: i64,
    code: String,
    name: String,
    version: i32,
    entity_code: String,
    status: String,
    form_schema: Option<Value>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl TryFrom<DefinitionRow> for ApprovalDefinition {
    type Error = MdmError;

    fn try_from(r: DefinitionRow) -> MdmResult<Self> {
        Ok(ApprovalDefinition {
            status: r.status.parse().map_err(corrupt("status"))?,
            id: r.id,
            code: r.code,
            name: r.name,
            version: r.version,
            entity_code: r.entity_code,
            form_schema: r.form_schema,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    id: i64,
    approval_def_code: String,
    version: i32,
    node_code: String,
    node_name: String,
    node_type: String,
    approver_type: String,
    approver_config: Option<Value>,
    condition_config: Option<Value>,
    next_node_code: Option<String>,
    sort_order: i32,
    timeout_hours: i32,
    status: String,
}

impl TryFrom<NodeRow> for ApprovalNode {
    type Error = MdmError;

    fn try_from(r: NodeRow) -> MdmResult<Self> {
        Ok(ApprovalNode {
            node_type: r.node_type.parse().map_err(corrupt("node_type"))?,
            id: r.id,
            approval_def_code: r.approval_def_code,
            version: r.version,
            node_code: r.node_code,
            node_name: r.node_name,
            approver_type: r.approver_type,
            approver_config: r.approver_config,
            condition_config: r.condition_config,
            next_node_code: r.next_node_code,
            sort_order: r.sort_order,
            timeout_hours: r.timeout_hours,
            status: r.status,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: i64,
    code: String,
    approval_def_code: String,
    def_version: i32,
    entity_code: String,
    entity_id: Option<i64>,
    title: String,
    form_data: Value,
    status: String,
    current_task_id: String,
    current_task_name: String,
    submitter_id: String,
    submitter_name: String,
    submitted_at: NaiveDateTime,
    started_at: NaiveDateTime,
    completed_at: Option<NaiveDateTime>,
    expired_at: Option<NaiveDateTime>,
    task_count: i32,
    completed_tasks: i32,
    pending_tasks: i32,
    revision: i64,
    updated_at: NaiveDateTime,
}

impl TryFrom<ApprovalRow> for Approval {
    type Error = MdmError;

    fn try_from(r: ApprovalRow) -> MdmResult<Self> {
        Ok(Approval {
            status: r.status.parse().map_err(corrupt("status"))?,
            id: r.id,
            code: r.code,
            approval_def_code: r.approval_def_code,
            def_version: r.def_version,
            entity_code: r.entity_code,
            entity_id: r.entity_id,
            title: r.title,
            form_data: r.form_data,
            current_task_id: r.current_task_id,
            current_task_name: r.current_task_name,
            submitter_id: r.submitter_id,
            submitter_name: r.submitter_name,
            submitted_at: r.submitted_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            expired_at: r.expired_at,
            task_count: r.task_count,
            completed_tasks: r.completed_tasks,
            pending_tasks: r.pending_tasks,
            revision: r.revision,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    task_code: String,
    approval_code: String,
    node_code: String,
    node_name: String,
    assignee_id: String,
    assignee_name: String,
    status: String,
    result: Option<String>,
    comment: String,
    reason: String,
    assigned_at: NaiveDateTime,
    started_at: Option<NaiveDateTime>,
    completed_at: Option<NaiveDateTime>,
    expired_at: Option<NaiveDateTime>,
    remind_count: i32,
    last_remind_at: Option<NaiveDateTime>,
    transfer_from_id: Option<String>,
    transfer_from_name: Option<String>,
    transfer_to_id: Option<String>,
    transfer_to_name: Option<String>,
    updated_at: NaiveDateTime,
}

impl TryFrom<TaskRow> for ApprovalTask {
    type Error = MdmError;

    fn try_from(r: TaskRow) -> MdmResult<Self> {
        Ok(ApprovalTask {
            status: r.status.parse().map_err(corrupt("status"))?,
            result: r
                .result
                .filter(|s| !s.is_empty())
                .map(|s| s.parse())
                .transpose()
                .map_err(corrupt("result"))?,
            id: r.id,
            task_code: r.task_code,
            approval_code: r.approval_code,
            node_code: r.node_code,
            node_name: r.node_name,
            assignee_id: r.assignee_id,
            assignee_name: r.assignee_name,
            comment: r.comment,
            reason: r.reason,
            assigned_at: r.assigned_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            expired_at: r.expired_at,
            remind_count: r.remind_count,
            last_remind_at: r.last_remind_at,
            transfer_from_id: r.transfer_from_id,
            transfer_from_name: r.transfer_from_name,
            transfer_to_id: r.transfer_to_id,
            transfer_to_name: r.transfer_to_name,
            updated_at: r.updated_at,
        })
    }
}

async fn insert_approval(conn: &mut PgConnection, a: &Approval) -> MdmResult<()> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"INSERT INTO "mdm_approval" ("code", "approval_def_code", "def_version", "entity_code", "entity_id", "title", "form_data", "status", "current_task_id", "current_task_name", "submitter_id", "submitter_name", "submitted_at", "started_at", "completed_at", "expired_at", "task_count", "completed_tasks", "pending_tasks", "revision", "updated_at") VALUES ("#,
    );
    let mut sep = qb.separated(", ");
    sep.push_bind(&a.code)
        .push_bind(&a.approval_def_code)
        .push_bind(a.def_version)
        .push_bind(&a.entity_code)
        .push_bind(a.entity_id)
        .push_bind(&a.title)
        .push_bind(&a.form_data)
        .push_bind(a.status.as_str())
        .push_bind(&a.current_task_id)
        .push_bind(&a.current_task_name)
        .push_bind(&a.submitter_id)
        .push_bind(&a.submitter_name)
        .push_bind(a.submitted_at)
        .push_bind(a.started_at)
        .push_bind(a.completed_at)
        .push_bind(a.expired_at)
        .push_bind(a.task_count)
        .push_bind(a.completed_tasks)
        .push_bind(a.pending_tasks)
        .push_bind(a.revision)
        .push_bind(a.updated_at);
    qb.push(")");
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

/// 守卫更新：库中状态与版本必须仍为 `expected` / guarded update on stored status and revision
async fn update_approval(
    conn: &mut PgConnection,
    a: &Approval,
    expected: (ApprovalStatus, i64),
) -> MdmResult<()> {
    let res = sqlx::query(
        r#"UPDATE "mdm_approval" SET "entity_id" = $2, "title" = $3, "form_data" = $4, "status" = $5, "current_task_id" = $6, "current_task_name" = $7, "completed_at" = $8, "expired_at" = $9, "task_count" = $10, "completed_tasks" = $11, "pending_tasks" = $12, "revision" = $13, "updated_at" = $14 WHERE "code" = $1 AND "status" = $15 AND "revision" = $16"#,
    )
    .bind(&a.code)
    .bind(a.entity_id)
    .bind(&a.title)
    .bind(&a.form_data)
    .bind(a.status.as_str())
    .bind(&a.current_task_id)
    .bind(&a.current_task_name)
    .bind(a.completed_at)
    .bind(a.expired_at)
    .bind(a.task_count)
    .bind(a.completed_tasks)
    .bind(a.pending_tasks)
    .bind(a.revision)
    .bind(a.updated_at)
    .bind(expected.0.as_str())
    .bind(expected.1)
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Err(MdmError::state(format!("审批实例 {} 已被并发修改", a.code)));
    }
    Ok(())
}

async fn insert_task(conn: &mut PgConnection, t: &ApprovalTask) -> MdmResult<()> {
    let mut qb = QueryBuilder::<Postgres>::new(
        r#"INSERT INTO "mdm_approval_task" ("task_code", "approval_code", "node_code", "node_name", "assignee_id", "assignee_name", "status", "result", "comment", "reason", "assigned_at", "started_at", "completed_at", "expired_at", "remind_count", "last_remind_at", "transfer_from_id", "transfer_from_name", "transfer_to_id", "transfer_to_name", "updated_at") VALUES ("#,
    );
    let mut sep = qb.separated(", ");
    sep.push_bind(&t.task_code)
        .push_bind(&t.approval_code)
        .push_bind(&t.node_code)
        .push_bind(&t.node_name)
        .push_bind(&t.assignee_id)
        .push_bind(&t.assignee_name)
        .push_bind(t.status.as_str())
        .push_bind(t.result.map(|r| r.as_str()))
        .push_bind(&t.comment)
        .push_bind(&t.reason)
        .push_bind(t.assigned_at)
        .push_bind(t.started_at)
        .push_bind(t.completed_at)
        .push_bind(t.expired_at)
        .push_bind(t.remind_count)
        .push_bind(t.last_remind_at)
        .push_bind(&t.transfer_from_id)
        .push_bind(&t.transfer_from_name)
        .push_bind(&t.transfer_to_id)
        .push_bind(&t.transfer_to_name)
        .push_bind(t.updated_at);
    qb.push(")");
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

async fn update_task(conn: &mut PgConnection, t: &ApprovalTask, expected: TaskStatus) -> MdmResult<()> {
    let res = sqlx::query(
        r#"UPDATE "mdm_approval_task" SET "status" = $2, "result" = $3, "comment" = $4, "reason" = $5, "completed_at" = $6, "expired_at" = $7, "remind_count" = $8, "last_remind_at" = $9, "transfer_from_id" = $10, "transfer_from_name" = $11, "transfer_to_id" = $12, "transfer_to_name" = $13, "updated_at" = $14 WHERE "task_code" = $1 AND "status" = $15"#,
    )
    .bind(&t.task_code)
    .bind(t.status.as_str())
    .bind(t.result.map(|r| r.as_str()))
    .bind(&t.comment)
    .bind(&t.reason)
    .bind(t.completed_at)
    .bind(t.expired_at)
    .bind(t.remind_count)
    .bind(t.last_remind_at)
    .bind(&t.transfer_from_id)
    .bind(&t.transfer_from_name)
    .bind(&t.transfer_to_id)
    .bind(&t.transfer_to_name)
    .bind(t.updated_at)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;
    if res.rows_affected() == 0 {
        return Err(MdmError::state(format!(
            "任务 {} 已不是 {} 状态",
            t.task_code, expected
        )));
    }
    Ok(())
}

async fn tasks_of(conn: &mut PgConnection, approval_code: &str) -> MdmResult<Vec<ApprovalTask>> {
    let rows: Vec<TaskRow> = sqlx::query_as(&format!(
        r#"SELECT {} FROM "mdm_approval_task" WHERE "approval_code" = $1 ORDER BY "id""#,
        TASK_COLUMNS
    ))
    .bind(approval_code)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(ApprovalTask::try_from).collect()
}

/// PostgreSQL 审批存储 / PostgreSQL approval store
pub struct PgApprovalStore {
    pool: PgPool,
}

impl PgApprovalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> MdmResult<()> {
        for ddl in APPROVAL_DDL {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for PgApprovalStore {
    async fn insert_definition(&self, d: &ApprovalDefinition) -> MdmResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO "mdm_approval_definition" ("code", "name", "version", "entity_code", "status", "form_schema", "created_at", "updated_at") VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING "id""#,
        )
        .bind(&d.code)
        .bind(&d.name)
        .bind(d.version)
        .bind(&d.entity_code)
        .bind(d.status.as_str())
        .bind(&d.form_schema)
        .bind(d.created_at)
        .bind(d.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_definition(&self, code: &str, version: i32) -> MdmResult<Option<ApprovalDefinition>> {
        let row: Option<DefinitionRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval_definition" WHERE "code" = $1 AND "version" = $2"#,
            DEF_COLUMNS
        ))
        .bind(code)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ApprovalDefinition::try_from).transpose()
    }

    async fn latest_definition(&self, code: &str) -> MdmResult<Option<ApprovalDefinition>> {
        let row: Option<DefinitionRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval_definition" WHERE "code" = $1 AND "status" <> 'Deleted' ORDER BY "version" DESC LIMIT 1"#,
            DEF_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ApprovalDefinition::try_from).transpose()
    }

    async fn active_definition(&self, entity_code: &str) -> MdmResult<Option<ApprovalDefinition>> {
        let row: Option<DefinitionRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval_definition" WHERE "entity_code" = $1 AND "status" = 'Active' ORDER BY "updated_at" DESC, "id" DESC LIMIT 1"#,
            DEF_COLUMNS
        ))
        .bind(entity_code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ApprovalDefinition::try_from).transpose()
    }

    async fn activate_definition(&self, code: &str, version: i32) -> MdmResult<()> {
        let now = chrono::Utc::now().naive_utc();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"UPDATE "mdm_approval_definition" SET "status" = 'Frozen', "updated_at" = $3 WHERE "code" = $1 AND "version" <> $2 AND "status" = 'Active'"#,
        )
        .bind(code)
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let res = sqlx::query(
            r#"UPDATE "mdm_approval_definition" SET "status" = 'Active', "updated_at" = $3 WHERE "code" = $1 AND "version" = $2"#,
        )
        .bind(code)
        .bind(version)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(MdmError::not_found("approval_definition", format!("{code} v{version}")));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn save_node(&self, n: &ApprovalNode) -> MdmResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO "mdm_approval_node" ("approval_def_code", "version", "node_code", "node_name", "node_type", "approver_type", "approver_config", "condition_config", "next_node_code", "sort_order", "timeout_hours", "status") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
ON CONFLICT ("approval_def_code", "version", "node_code") DO UPDATE SET "node_name" = EXCLUDED."node_name", "node_type" = EXCLUDED."node_type", "approver_type" = EXCLUDED."approver_type", "approver_config" = EXCLUDED."approver_config", "condition_config" = EXCLUDED."condition_config", "next_node_code" = EXCLUDED."next_node_code", "sort_order" = EXCLUDED."sort_order", "timeout_hours" = EXCLUDED."timeout_hours", "status" = EXCLUDED."status"
RETURNING "id""#,
        )
        .bind(&n.approval_def_code)
        .bind(n.version)
        .bind(&n.node_code)
        .bind(&n.node_name)
        .bind(n.node_type.as_str())
        .bind(&n.approver_type)
        .bind(&n.approver_config)
        .bind(&n.condition_config)
        .bind(&n.next_node_code)
        .bind(n.sort_order)
        .bind(n.timeout_hours)
        .bind(&n.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_node(&self, code: &str, version: i32, node_code: &str) -> MdmResult<bool> {
        let res = sqlx::query(
            r#"DELETE FROM "mdm_approval_node" WHERE "approval_def_code" = $1 AND "version" = $2 AND "node_code" = $3"#,
        )
        .bind(code)
        .bind(version)
        .bind(node_code)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_nodes(&self, code: &str, version: i32) -> MdmResult<Vec<ApprovalNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval_node" WHERE "approval_def_code" = $1 AND "version" = $2 ORDER BY "sort_order", "id""#,
            NODE_COLUMNS
        ))
        .bind(code)
        .bind(version)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ApprovalNode::try_from).collect()
    }

    async fn commit(&self, changes: &ApprovalChangeset) -> MdmResult<()> {
        let mut tx = self.pool.begin().await?;
        match changes.expected {
            None => insert_approval(&mut *tx, &changes.approval).await?,
            Some(expected) => update_approval(&mut *tx, &changes.approval, expected).await?,
        }
        for u in &changes.task_updates {
            update_task(&mut *tx, &u.task, u.expected).await?;
        }
        for t in &changes.new_tasks {
            insert_task(&mut *tx, t).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_approval(&self, code: &str) -> MdmResult<Option<Approval>> {
        let row: Option<ApprovalRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval" WHERE "code" = $1"#,
            APPROVAL_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Approval::try_from).transpose()
    }

    async fn list_tasks(&self, approval_code: &str) -> MdmResult<Vec<ApprovalTask>> {
        let mut conn = self.pool.acquire().await?;
        tasks_of(&mut *conn, approval_code).await
    }

    async fn get_task(&self, task_code: &str) -> MdmResult<Option<ApprovalTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval_task" WHERE "task_code" = $1"#,
            TASK_COLUMNS
        ))
        .bind(task_code)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ApprovalTask::try_from).transpose()
    }

    async fn tasks_by_assignee(
        &self,
        assignee_id: &str,
        statuses: &[TaskStatus],
        limit: i64,
        offset: i64,
    ) -> MdmResult<(Vec<ApprovalTask>, i64)> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM "mdm_approval_task" WHERE "assignee_id" = $1 AND "status" = ANY($2)"#,
        )
        .bind(assignee_id)
        .bind(&statuses)
        .fetch_one(&self.pool)
        .await?;
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval_task" WHERE "assignee_id" = $1 AND "status" = ANY($2) ORDER BY "id" DESC LIMIT $3 OFFSET $4"#,
            TASK_COLUMNS
        ))
        .bind(assignee_id)
        .bind(&statuses)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let tasks = rows
            .into_iter()
            .map(ApprovalTask::try_from)
            .collect::<MdmResult<Vec<_>>>()?;
        Ok((tasks, total))
    }

    async fn approvals_by_submitter(
        &self,
        submitter_id: &str,
        limit: i64,
        offset: i64,
    ) -> MdmResult<(Vec<Approval>, i64)> {
        let total: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM "mdm_approval" WHERE "submitter_id" = $1"#)
                .bind(submitter_id)
                .fetch_one(&self.pool)
                .await?;
        let rows: Vec<ApprovalRow> = sqlx::query_as(&format!(
            r#"SELECT {} FROM "mdm_approval" WHERE "submitter_id" = $1 ORDER BY "id" DESC LIMIT $2 OFFSET $3"#,
            APPROVAL_COLUMNS
        ))
        .bind(submitter_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let approvals = rows
            .into_iter()
            .map(Approval::try_from)
            .collect::<MdmResult<Vec<_>>>()?;
        Ok((approvals, total))
    }

    async fn claim_expired(&self, now: NaiveDateTime) -> MdmResult<Vec<Approval>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<ApprovalRow> = sqlx::query_as(&format!(
            r#"UPDATE "mdm_approval" SET "status" = 'Expired', "completed_at" = $1, "revision" = "revision" + 1, "updated_at" = $1 WHERE "status" = 'Pending' AND "expired_at" IS NOT NULL AND "expired_at" < $1 RETURNING {}"#,
            APPROVAL_COLUMNS
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let mut approval = Approval::try_from(row)?;
            sqlx::query(
                r#"UPDATE "mdm_approval_task" SET "status" = 'Canceled', "completed_at" = $2, "updated_at" = $2 WHERE "approval_code" = $1 AND "status" = 'Pending'"#,
            )
            .bind(&approval.code)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let tasks = tasks_of(&mut *tx, &approval.code).await?;
            let (total, completed, pending) = counters(&tasks);
            sqlx::query(
                r#"UPDATE "mdm_approval" SET "task_count" = $2, "completed_tasks" = $3, "pending_tasks" = $4 WHERE "code" = $1"#,
            )
            .bind(&approval.code)
            .bind(total)
            .bind(completed)
            .bind(pending)
            .execute(&mut *tx)
            .await?;
            approval.task_count = total;
            approval.completed_tasks = completed;
            approval.pending_tasks = pending;
            claimed.push(approval);
        }
        tx.commit().await?;
        Ok(claimed)
    }

    async fn claim_reminders(
        &self,
        now: NaiveDateTime,
        cutoff: NaiveDateTime,
        scope: RemindScope<'_>,
    ) -> MdmResult<Vec<ApprovalTask>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"UPDATE "mdm_approval_task" SET "remind_count" = "remind_count" + 1, "last_remind_at" = "#,
        );
        qb.push_bind(now)
            .push(r#", "updated_at" = "#)
            .push_bind(now)
            .push(r#" WHERE "status" = 'Pending' AND "#);
        match scope {
            RemindScope::Sweep => {
                qb.push(r#"COALESCE("last_remind_at", "assigned_at") <= "#)
                    .push_bind(cutoff);
            }
            RemindScope::Task(code) => {
                qb.push(r#""task_code" = "#)
                    .push_bind(code)
                    .push(r#" AND ("last_remind_at" IS NULL OR "last_remind_at" <= "#)
                    .push_bind(cutoff)
                    .push(")");
            }
        }
        qb.push(" RETURNING ").push(TASK_COLUMNS);
        let rows: Vec<TaskRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(ApprovalTask::try_from).collect()
    }
}
