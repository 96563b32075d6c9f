//! 实体变更治理：草稿、审批、发布 / Entity change governance: draft, approve, publish
//!
//! 有启用审批定义的表，变更先写入草稿表（`draft_status = Pending`）并发起审批；
//! 审批通过后由 `DraftPublisher` 应用到正式表并写日志快照，驳回、撤回或过期时草稿回到 `Drafted`。
//! 修改、冻结、解冻与删除的草稿保存叠加补丁后的完整业务行；同一实体同时只允许一条待审批草稿。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{MdmError, MdmResult};
use crate::modules::approval::engine::{ApprovalEngine, SubmitRequest};
use crate::modules::approval::model::{new_code, Approval};
use crate::modules::entity::{diff_fields, Entity, EntityGateway};
use crate::modules::schema::field::string_enum;
use crate::modules::schema::{RecordStatus, TableDescriptor, TableKind};

/// 实体变更类型 / Kind of entity change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Freeze,
    Unfreeze,
    Delete,
}

string_enum!(Operation, "operation", {
    Create => "Create",
    Update => "Update",
    Freeze => "Freeze",
    Unfreeze => "Unfreeze",
    Delete => "Delete",
});

impl Operation {
    /// 行上的 `action` 代码 / the `action` code written on rows
    pub fn action(&self) -> &'static str {
        match self {
            Operation::Create => "I",
            Operation::Update => "U",
            Operation::Freeze => "B",
            Operation::Unfreeze => "C",
            Operation::Delete => "D",
        }
    }

    /// 应用后正式行的状态，`None` 表示不变 / live status after applying, `None` keeps it
    pub fn live_status(&self) -> Option<RecordStatus> {
        match self {
            Operation::Create | Operation::Unfreeze => Some(RecordStatus::Normal),
            Operation::Update => None,
            Operation::Freeze => Some(RecordStatus::Frozen),
            Operation::Delete => Some(RecordStatus::Deleted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DraftStatus {
    Drafted,
    Pending,
    Published,
}

string_enum!(DraftStatus, "draft status", {
    Drafted => "Drafted",
    Pending => "Pending",
    Published => "Published",
});

/// 审批终态后的草稿处理 / Draft transitions after an approval reaches a terminal status
#[async_trait]
pub trait DraftPublisher: Send + Sync {
    /// 通过：应用到正式表，草稿置为 `Published`
    async fn publish(&self, approval: &Approval) -> MdmResult<()>;
    /// 驳回、撤回、过期：草稿回到 `Drafted`
    async fn revert(&self, approval: &Approval) -> MdmResult<()>;
}

/// 草稿行内容 / Draft row contents
pub fn draft_row(
    op: Operation,
    entity_id: Option<i64>,
    approval_code: &str,
    mut data: Entity,
) -> Entity {
    data.remove("id");
    data.insert("operation".into(), Value::from(op.as_str()));
    data.insert("action".into(), Value::from(op.action()));
    data.insert("entity_id".into(), Value::from(entity_id.unwrap_or(0)));
    data.insert("approval_code".into(), Value::from(approval_code));
    data.insert("draft_status".into(), Value::from(DraftStatus::Pending.as_str()));
    data
}

fn by_field(column: &str, value: Value) -> Entity {
    let mut f = Entity::new();
    f.insert(column.to_string(), value);
    f
}

fn int_of(row: &Entity, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|id| *id > 0)
}

/// 把补丁叠加到当前正式行的业务列上 / overlay a patch on the live row's business columns
///
/// 草稿保存完整的目标行，发布时未提交的列保持原值。
pub fn merge_onto(live: &TableDescriptor, current: &Entity, patch: Entity) -> Entity {
    let mut merged: Entity = live
        .business_columns()
        .filter_map(|c| current.get(&c.name).map(|v| (c.name.clone(), v.clone())))
        .collect();
    merged.extend(patch);
    merged
}

/// 把一次变更应用到正式表，写日志快照与字段变更 / apply a change, then log the snapshot and field diffs
async fn apply_change(
    gateway: &EntityGateway,
    ctx: &RequestContext,
    table_code: &str,
    op: Operation,
    entity_id: Option<i64>,
    mut data: Entity,
    approval_code: Option<&str>,
) -> MdmResult<Entity> {
    let live = gateway.catalog().descriptor(table_code, TableKind::Live).await?;
    data.retain(|k, _| live.business_columns().any(|c| &c.name == k));
    data.insert("action".into(), Value::from(op.action()));
    data.insert("operation".into(), Value::from(op.as_str()));
    if let Some(status) = op.live_status() {
        data.insert("status".into(), Value::from(status.as_str()));
    }

    let (before, snapshot) = match (op, entity_id) {
        (Operation::Create, _) => (
            Entity::new(),
            gateway.create(ctx, table_code, TableKind::Live, data).await?,
        ),
        (_, None) => return Err(MdmError::validation("entity_id", format!("{} 操作需要实体主键", op))),
        (Operation::Delete, Some(id)) => {
            let current = gateway.get(ctx, table_code, TableKind::Live, id).await?;
            gateway.batch_delete(ctx, table_code, TableKind::Live, &[id]).await?;
            let mut snapshot = current.clone();
            snapshot.extend(data);
            (current, snapshot)
        }
        (_, Some(id)) => {
            let current = gateway.get(ctx, table_code, TableKind::Live, id).await?;
            let touched = gateway
                .update(ctx, table_code, TableKind::Live, data, &by_field("id", Value::from(id)))
                .await?;
            if touched == 0 {
                return Err(MdmError::not_found(table_code, id));
            }
            (current, gateway.get(ctx, table_code, TableKind::Live, id).await?)
        }
    };
    // 正式表不含审批编号，只记入日志 / live rows carry no approval code, only the log does
    let mut logged = snapshot.clone();
    if let Some(code) = approval_code {
        logged.insert("approval_code".into(), Value::from(code));
    }
    gateway.insert_log(ctx, table_code, &logged).await?;
    if let Some(id) = int_of(&snapshot, "id") {
        let diffs = diff_fields(&live, &before, &snapshot);
        gateway
            .changes()
            .record(ctx, table_code, id, op.as_str(), approval_code, &diffs)
            .await?;
    }
    Ok(snapshot)
}

/// 基于实体网关的草稿发布器 / Draft publisher backed by the entity gateway
///
/// 一个审批可管辖多条草稿（批量冻结、解冻、删除），只处理仍为 `Pending` 的草稿。
pub struct GatewayPublisher {
    gateway: Arc<EntityGateway>,
}

impl GatewayPublisher {
    pub fn new(gateway: Arc<EntityGateway>) -> Self {
        Self { gateway }
    }

    async fn pending_drafts(&self, ctx: &RequestContext, approval: &Approval) -> MdmResult<Vec<Entity>> {
        let mut filter = by_field("approval_code", Value::from(approval.code.as_str()));
        filter.insert("draft_status".into(), Value::from(DraftStatus::Pending.as_str()));
        self.gateway
            .all(ctx, &approval.entity_code, TableKind::Draft, &filter)
            .await
    }

    async fn mark(
        &self,
        ctx: &RequestContext,
        approval: &Approval,
        draft: &Entity,
        status: DraftStatus,
        entity_id: Option<i64>,
    ) -> MdmResult<()> {
        let draft_id = int_of(draft, "id").ok_or_else(|| MdmError::not_found("draft", &approval.code))?;
        let mut patch = by_field("draft_status", Value::from(status.as_str()));
        if let Some(id) = entity_id {
            patch.insert("entity_id".into(), Value::from(id));
        }
        self.gateway
            .update(
                ctx,
                &approval.entity_code,
                TableKind::Draft,
                patch,
                &by_field("id", Value::from(draft_id)),
            )
            .await?;
        Ok(())
    }
}

fn operation_of(draft: &Entity) -> MdmResult<Operation> {
    draft
        .get("operation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .parse::<Operation>()
        .map_err(|e| MdmError::validation("operation", e.to_string()))
}

#[async_trait]
impl DraftPublisher for GatewayPublisher {
    async fn publish(&self, approval: &Approval) -> MdmResult<()> {
        let ctx = RequestContext::new(&approval.submitter_id, &approval.submitter_name);
        let drafts = self.pending_drafts(&ctx, approval).await?;
        if drafts.is_empty() {
            tracing::debug!(approval = %approval.code, "no draft governed by approval");
            return Ok(());
        }
        for draft in &drafts {
            let op = operation_of(draft)?;
            let snapshot = apply_change(
                &self.gateway,
                &ctx,
                &approval.entity_code,
                op,
                int_of(draft, "entity_id"),
                draft.clone(),
                Some(approval.code.as_str()),
            )
            .await?;
            self.mark(&ctx, approval, draft, DraftStatus::Published, int_of(&snapshot, "id"))
                .await?;
            tracing::info!(approval = %approval.code, table = %approval.entity_code, operation = %op, "draft published");
        }
        Ok(())
    }

    async fn revert(&self, approval: &Approval) -> MdmResult<()> {
        let ctx = RequestContext::new(&approval.submitter_id, &approval.submitter_name);
        for draft in self.pending_drafts(&ctx, approval).await? {
            self.mark(&ctx, approval, &draft, DraftStatus::Drafted, None).await?;
            tracing::info!(approval = %approval.code, status = %approval.status, "draft reverted");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ChangeOutcome {
    /// 无审批定义，已直接生效 / no active definition, applied directly
    Applied(Entity),
    /// 批量操作直接生效 / a batch applied directly
    AppliedBatch(Vec<Entity>),
    /// 已提交审批 / submitted for approval
    Submitted(Approval),
}

/// 实体变更入口 / Entry point for governed entity changes
pub struct EntityGovernor {
    gateway: Arc<EntityGateway>,
    engine: Arc<ApprovalEngine>,
}

impl EntityGovernor {
    pub fn new(gateway: Arc<EntityGateway>, engine: Arc<ApprovalEngine>) -> Self {
        Self { gateway, engine }
    }

    /// 同一实体同时只能有一条待审批草稿 / one pending draft per entity at a time
    async fn ensure_no_pending(&self, ctx: &RequestContext, table_code: &str, entity_id: i64) -> MdmResult<()> {
        let mut filter = by_field("entity_id", Value::from(entity_id));
        filter.insert("draft_status".into(), Value::from(DraftStatus::Pending.as_str()));
        match self.gateway.first(ctx, table_code, TableKind::Draft, &filter).await? {
            Some(draft) => Err(MdmError::conflict(format!(
                "{} 实体 {} 已有待审批变更 {}",
                table_code,
                entity_id,
                draft.get("approval_code").and_then(Value::as_str).unwrap_or_default()
            ))),
            None => Ok(()),
        }
    }

    async fn has_active_definition(&self, ctx: &RequestContext, table_code: &str) -> MdmResult<bool> {
        let active = ctx
            .run("governance.definition", self.engine.store().active_definition(table_code))
            .await?;
        Ok(active.is_some())
    }

    pub async fn submit_change(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        op: Operation,
        entity_id: Option<i64>,
        data: Entity,
        reason: &str,
    ) -> MdmResult<ChangeOutcome> {
        self.gateway.catalog().require_table(table_code).await?;
        let target = match (op, entity_id) {
            (Operation::Create, _) => None,
            (_, Some(id)) => Some(id),
            (_, None) => {
                return Err(MdmError::validation("entity_id", format!("{} 操作需要实体主键", op)))
            }
        };
        if let Some(id) = target {
            self.ensure_no_pending(ctx, table_code, id).await?;
        }

        if !self.has_active_definition(ctx, table_code).await? {
            let applied = apply_change(&self.gateway, ctx, table_code, op, entity_id, data, None).await?;
            tracing::info!(table = table_code, operation = %op, "change applied without approval");
            return Ok(ChangeOutcome::Applied(applied));
        }

        let mut form = data.clone();
        form.insert("reason".into(), Value::from(reason));
        let draft = match target {
            Some(id) => {
                let live = self.gateway.catalog().descriptor(table_code, TableKind::Live).await?;
                let current = self.gateway.get(ctx, table_code, TableKind::Live, id).await?;
                merge_onto(&live, &current, data)
            }
            None => data,
        };
        let approval = self
            .open_approval(
                ctx,
                table_code,
                op,
                entity_id,
                vec![(target, draft)],
                form,
                format!("{} {}", table_code, op),
            )
            .await?;
        Ok(ChangeOutcome::Submitted(approval))
    }

    /// 批量冻结、解冻或删除，共用一个审批 / batch freeze, unfreeze or delete under one approval
    pub async fn submit_batch(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        op: Operation,
        ids: &[i64],
        reason: &str,
    ) -> MdmResult<ChangeOutcome> {
        if !matches!(op, Operation::Freeze | Operation::Unfreeze | Operation::Delete) {
            return Err(MdmError::validation("operation", format!("{} 不支持批量提交", op)));
        }
        let mut seen = HashSet::new();
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(MdmError::validation("ids", "实体主键列表不能为空"));
        }
        self.gateway.catalog().require_table(table_code).await?;

        let mut current = Vec::with_capacity(ids.len());
        for id in &ids {
            self.ensure_no_pending(ctx, table_code, *id).await?;
            current.push(self.gateway.get(ctx, table_code, TableKind::Live, *id).await?);
        }

        if !self.has_active_definition(ctx, table_code).await? {
            let mut applied = Vec::with_capacity(ids.len());
            for id in &ids {
                applied.push(
                    apply_change(&self.gateway, ctx, table_code, op, Some(*id), Entity::new(), None).await?,
                );
            }
            tracing::info!(table = table_code, operation = %op, count = ids.len(), "batch applied without approval");
            return Ok(ChangeOutcome::AppliedBatch(applied));
        }

        let live = self.gateway.catalog().descriptor(table_code, TableKind::Live).await?;
        let drafts = ids
            .iter()
            .zip(&current)
            .map(|(id, row)| (Some(*id), merge_onto(&live, row, Entity::new())))
            .collect();
        let mut form = Entity::new();
        form.insert("ids".into(), Value::from(ids.clone()));
        form.insert("reason".into(), Value::from(reason));
        let approval = self
            .open_approval(
                ctx,
                table_code,
                op,
                None,
                drafts,
                form,
                format!("{} {} x{}", table_code, op, ids.len()),
            )
            .await?;
        Ok(ChangeOutcome::Submitted(approval))
    }

    /// 写入草稿并发起审批，失败时清理已写草稿 / write drafts then submit, removing them on failure
    #[allow(clippy::too_many_arguments)]
    async fn open_approval(
        &self,
        ctx: &RequestContext,
        table_code: &str,
        op: Operation,
        entity_id: Option<i64>,
        drafts: Vec<(Option<i64>, Entity)>,
        form: Entity,
        title: String,
    ) -> MdmResult<Approval> {
        let code = new_code();
        let mut written = Vec::with_capacity(drafts.len());
        let mut result = Ok(());
        for (target, data) in drafts {
            match self
                .gateway
                .create(ctx, table_code, TableKind::Draft, draft_row(op, target, &code, data))
                .await
            {
                Ok(row) => written.extend(int_of(&row, "id")),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let submitted = match result {
            Ok(()) => {
                let req = SubmitRequest {
                    code: Some(code),
                    entity_code: table_code.to_string(),
                    entity_id,
                    title,
                    form_data: Value::Object(form),
                };
                self.engine.submit(ctx, req).await
            }
            Err(e) => Err(e),
        };
        if submitted.is_err() && !written.is_empty() {
            if let Err(cleanup) = self
                .gateway
                .batch_delete(ctx, table_code, TableKind::Draft, &written)
                .await
            {
                tracing::warn!(table = table_code, drafts = ?written, error = %cleanup, "draft cleanup failed");
            }
        }
        submitted
    }
}
