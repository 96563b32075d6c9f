//! 审批实例与任务引擎 / Approval instance and task engine
//!
//! 每个操作先在内存中算出完整的 `ApprovalChangeset`，一次提交；提交成功后才发送通知、
//! 发布或回退草稿。Every operation computes a full changeset, commits it once, and only then
//! enqueues notifications and publishes or reverts the governed draft.

use chrono::{Duration, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::conf::ApprovalSettings;
use crate::context::RequestContext;
use crate::error::{MdmError, MdmResult};
use crate::modules::approval::collab::{
    ApproverDirectory, Notification, NotificationEvent, NotificationQueue,
};
use crate::modules::approval::flow::{
    conditions_hold, counters, find_node, next_node, node_outcome, start_node, NodeOutcome,
};
use crate::modules::approval::governance::DraftPublisher;
use crate::modules::approval::model::{
    new_code, Approval, ApprovalNode, ApprovalStatus, ApprovalTask, ApproverType, Assignee,
    NodeType, TaskResult, TaskStatus,
};
use crate::modules::approval::store::{ApprovalChangeset, ApprovalStore, RemindScope};
use crate::modules::entity::PageLimits;

/// 提交审批的入参 / Submission input
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// 预先生成的实例编码，草稿行需要先写入 / pre-generated code, drafts are written first
    pub code: Option<String>,
    pub entity_code: String,
    pub entity_id: Option<i64>,
    pub title: String,
    pub form_data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub rows: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// 批量催办结果 / Outcome of a batch reminder
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemindReport {
    pub reminded: Vec<String>,
    /// 仍在催办间隔内 / still inside the reminder interval
    pub skipped: Vec<String>,
    /// 任务编码与失败原因 / task code with the failure message
    pub failed: Vec<(String, String)>,
}

/// 一次流转产生的新任务与待发通知 / tasks and notifications produced by one walk
#[derive(Default)]
struct Step {
    new_tasks: Vec<ApprovalTask>,
    notices: Vec<Notification>,
}

impl Step {
    fn notify(&mut self, event: NotificationEvent, approval: &str, task: Option<&str>, recipient: &str) {
        self.notices.push(Notification {
            event,
            approval_code: approval.to_string(),
            task_code: task.map(str::to_string),
            recipient_id: recipient.to_string(),
        });
    }
}

fn dedup(assignees: Vec<Assignee>) -> Vec<Assignee> {
    let mut seen = HashSet::new();
    assignees
        .into_iter()
        .filter(|a| !a.id.is_empty() && seen.insert(a.id.clone()))
        .collect()
}

/// 关闭节点上的其余待办 / close the remaining pending tasks, optionally of one node only
fn cancel_pending(
    changes: &mut ApprovalChangeset,
    stored: &[ApprovalTask],
    node_code: Option<&str>,
    now: NaiveDateTime,
) {
    let touched: HashSet<String> = changes
        .task_updates
        .iter()
        .map(|u| u.task.task_code.clone())
        .collect();
    for t in stored {
        if !t.is_pending() || touched.contains(&t.task_code) {
            continue;
        }
        if node_code.is_some_and(|n| n != t.node_code) {
            continue;
        }
        let mut closed = t.clone();
        closed.status = TaskStatus::Canceled;
        closed.completed_at = Some(now);
        closed.updated_at = now;
        changes.update_task(closed, TaskStatus::Pending);
    }
}

/// 按提交后的任务视图重算计数器 / recompute counters from the post-commit task view
fn refresh_counters(changes: &mut ApprovalChangeset, stored: &[ApprovalTask], now: NaiveDateTime) {
    let (total, completed, pending) = counters(&changes.merged_tasks(stored));
    let a = &mut changes.approval;
    a.task_count = total;
    a.completed_tasks = completed;
    a.pending_tasks = pending;
    a.updated_at = now;
}

fn finish(approval: &mut Approval, status: ApprovalStatus, now: NaiveDateTime) {
    approval.status = status;
    approval.completed_at = Some(now);
}

pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    directory: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn NotificationQueue>,
    publisher: Arc<dyn DraftPublisher>,
    settings: ApprovalSettings,
    limits: PageLimits,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        directory: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn NotificationQueue>,
        publisher: Arc<dyn DraftPublisher>,
        settings: ApprovalSettings,
    ) -> Self {
        let limits = PageLimits {
            default_size: settings.default_page_size,
            max_size: settings.max_page_size,
        };
        Self {
            store,
            directory,
            notifier,
            publisher,
            settings,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    fn reminder_cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - Duration::hours(self.settings.reminder_interval_hours)
    }

    async fn load_nodes(&self, approval: &Approval) -> MdmResult<Vec<ApprovalNode>> {
        let nodes = self
            .store
            .list_nodes(&approval.approval_def_code, approval.def_version)
            .await?;
        if nodes.is_empty() {
            return Err(MdmError::state(format!(
                "审批定义 {} v{} 没有节点",
                approval.approval_def_code, approval.def_version
            )));
        }
        Ok(nodes)
    }

    async fn require_approval(&self, code: &str) -> MdmResult<Approval> {
        self.store
            .get_approval(code)
            .await?
            .ok_or_else(|| MdmError::not_found("approval", code))
    }

    async fn require_task(&self, code: &str) -> MdmResult<ApprovalTask> {
        self.store
            .get_task(code)
            .await?
            .ok_or_else(|| MdmError::not_found("approval_task", code))
    }

    async fn resolve(
        &self,
        node: &ApprovalNode,
        approver_type: ApproverType,
        approval: &Approval,
    ) -> MdmResult<Vec<Assignee>> {
        let config = node.approver_config()?;
        let found = self.directory.resolve(approver_type, &config, approval).await?;
        Ok(dedup(found))
    }

    /// 从 `from` 之后的节点开始推进，直到需要人工处理或到达终态
    /// Advance past `from` until a node needs people or the instance becomes terminal
    async fn walk<'a>(
        &self,
        approval: &mut Approval,
        nodes: &'a [ApprovalNode],
        from: &'a ApprovalNode,
        now: NaiveDateTime,
        step: &mut Step,
    ) -> MdmResult<()> {
        let mut current = from;
        for _ in 0..=nodes.len() {
            let next = next_node(nodes, current).ok_or_else(|| {
                MdmError::state(format!("节点 {} 之后没有可流转的节点", current.node_code))
            })?;
            approval.current_task_id = next.node_code.clone();
            approval.current_task_name = next.display_name().to_string();
            current = next;

            match next.node_type {
                NodeType::End => {
                    finish(approval, ApprovalStatus::Approved, now);
                    return Ok(());
                }
                NodeType::Start | NodeType::Condition => {}
                NodeType::Cc => {
                    if !conditions_hold(&next.conditions()?, &approval.form_data) {
                        continue;
                    }
                    // 抄送节点不校验审批人类型，无法识别时按用户列表处理
                    let ty = next.approver().ok().flatten().unwrap_or(ApproverType::Users);
                    for r in self.resolve(next, ty, approval).await? {
                        let task = ApprovalTask::closed(&approval.code, next, &r, TaskResult::Notified, now);
                        step.notify(NotificationEvent::CarbonCopied, &approval.code, Some(task.task_code.as_str()), &r.id);
                        step.new_tasks.push(task);
                    }
                }
                NodeType::Approval => {
                    if !conditions_hold(&next.conditions()?, &approval.form_data) {
                        tracing::debug!(approval = %approval.code, node = %next.node_code, "node skipped by condition");
                        continue;
                    }
                    match next.approver()?.unwrap_or(ApproverType::Users) {
                        ApproverType::AutoApprove => {
                            step.new_tasks.push(ApprovalTask::closed(
                                &approval.code,
                                next,
                                &Assignee::system(),
                                TaskResult::Approved,
                                now,
                            ));
                        }
                        ApproverType::AutoReject => {
                            step.new_tasks.push(ApprovalTask::closed(
                                &approval.code,
                                next,
                                &Assignee::system(),
                                TaskResult::Rejected,
                                now,
                            ));
                            finish(approval, ApprovalStatus::Rejected, now);
                            return Ok(());
                        }
                        ty => {
                            let assignees = self.resolve(next, ty, approval).await?;
                            if assignees.is_empty() {
                                return Err(MdmError::validation(
                                    "approver_config",
                                    format!("节点 {} 未解析到审批人", next.node_code),
                                ));
                            }
                            for a in &assignees {
                                let task = ApprovalTask::pending(&approval.code, next, a, now);
                                step.notify(NotificationEvent::TaskAssigned, &approval.code, Some(task.task_code.as_str()), &a.id);
                                step.new_tasks.push(task);
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
        Err(MdmError::state(format!("审批实例 {} 的节点流转出现环", approval.code)))
    }

    /// 提交后的副作用：通知、草稿发布或回退 / post-commit effects
    async fn after_commit(&self, approval: &Approval, notices: Vec<Notification>) {
        for n in &notices {
            if let Err(e) = self.notifier.enqueue(n).await {
                tracing::warn!(approval = %n.approval_code, event = %n.event, error = %e, "notification enqueue failed");
            }
        }
        if !approval.status.is_terminal() {
            return;
        }
        let done = Notification {
            event: NotificationEvent::ApprovalCompleted,
            approval_code: approval.code.clone(),
            task_code: None,
            recipient_id: approval.submitter_id.clone(),
        };
        if let Err(e) = self.notifier.enqueue(&done).await {
            tracing::warn!(approval = %approval.code, error = %e, "notification enqueue failed");
        }
        let result = match approval.status {
            ApprovalStatus::Approved => self.publisher.publish(approval).await,
            _ => self.publisher.revert(approval).await,
        };
        if let Err(e) = result {
            tracing::error!(
                approval = %approval.code,
                status = %approval.status,
                error = %e,
                "draft transition failed after approval committed"
            );
        }
    }

    /// 按实体的启用定义发起审批 / start an approval using the entity's active definition
    pub async fn submit(&self, ctx: &RequestContext, req: SubmitRequest) -> MdmResult<Approval> {
        let (approval, notices) = ctx
            .run("approval.submit", async {
                let def = self
                    .store
                    .active_definition(&req.entity_code)
                    .await?
                    .ok_or_else(|| {
                        MdmError::validation(
                            "entity_code",
                            format!("实体 '{}' 没有启用的审批定义", req.entity_code),
                        )
                    })?;
                let nodes = self.store.list_nodes(&def.code, def.version).await?;
                let start = start_node(&nodes).ok_or_else(|| {
                    MdmError::state(format!("审批定义 {} v{} 缺少开始节点", def.code, def.version))
                })?;

                let now = Utc::now().naive_utc();
                let expire_hours = self.settings.default_expire_hours;
                let mut approval = Approval {
                    id: 0,
                    code: req.code.clone().unwrap_or_else(new_code),
                    approval_def_code: def.code.clone(),
                    def_version: def.version,
                    entity_code: req.entity_code.clone(),
                    entity_id: req.entity_id,
                    title: if req.title.is_empty() { def.name.clone() } else { req.title.clone() },
                    form_data: req.form_data.clone(),
                    status: ApprovalStatus::Pending,
                    current_task_id: start.node_code.clone(),
                    current_task_name: start.display_name().to_string(),
                    submitter_id: ctx.user_id.clone(),
                    submitter_name: ctx.user_name.clone(),
                    submitted_at: now,
                    started_at: now,
                    completed_at: None,
                    expired_at: (expire_hours > 0).then(|| now + Duration::hours(expire_hours)),
                    task_count: 0,
                    completed_tasks: 0,
                    pending_tasks: 0,
                    revision: 0,
                    updated_at: now,
                };

                let mut step = Step::default();
                step.notify(NotificationEvent::ApprovalCreated, &approval.code, None, &approval.submitter_id);
                self.walk(&mut approval, &nodes, start, now, &mut step).await?;

                let mut changes = ApprovalChangeset::insert(approval);
                changes.new_tasks = step.new_tasks;
                refresh_counters(&mut changes, &[], now);
                self.store.commit(&changes).await?;
                Ok::<_, MdmError>((changes.approval, step.notices))
            })
            .await?;

        tracing::info!(
            approval = %approval.code,
            entity = %approval.entity_code,
            node = %approval.current_task_id,
            status = %approval.status,
            "approval submitted"
        );
        self.after_commit(&approval, notices).await;
        Ok(approval)
    }

    /// 审批人处理任务 / the assignee decides a task
    pub async fn complete(
        &self,
        ctx: &RequestContext,
        task_code: &str,
        result: TaskResult,
        comment: &str,
        reason: &str,
    ) -> MdmResult<Approval> {
        if result == TaskResult::Notified {
            return Err(MdmError::validation("result", "处理结果只能是 Approved 或 Rejected"));
        }
        let (approval, notices) = ctx
            .run("approval.complete", async {
                let task = self.require_task(task_code).await?;
                if !task.is_pending() {
                    return Err(MdmError::state(format!("任务 {} 状态为 {}，不能重复处理", task_code, task.status)));
                }
                if task.assignee_id != ctx.user_id {
                    return Err(MdmError::permission(format!("任务 {} 不属于当前用户", task_code)));
                }
                let approval = self.require_approval(&task.approval_code).await?;
                if approval.status != ApprovalStatus::Pending {
                    return Err(MdmError::state(format!("审批实例 {} 已是 {}", approval.code, approval.status)));
                }
                let nodes = self.load_nodes(&approval).await?;
                let node = find_node(&nodes, &task.node_code)
                    .ok_or_else(|| MdmError::state(format!("节点 {} 不存在", task.node_code)))?;
                let stored = self.store.list_tasks(&approval.code).await?;

                let now = Utc::now().naive_utc();
                let mut done = task.clone();
                done.status = TaskStatus::Done;
                done.result = Some(result);
                done.comment = comment.to_string();
                done.reason = reason.to_string();
                done.completed_at = Some(now);
                done.updated_at = now;

                let mut changes = ApprovalChangeset::update(approval);
                changes.update_task(done, TaskStatus::Pending);
                let merged = changes.merged_tasks(&stored);
                let mode = node.approver_config()?.mode;
                let outcome = node_outcome(mode, merged.iter().filter(|t| t.node_code == node.node_code));

                let mut step = Step::default();
                match outcome {
                    NodeOutcome::Waiting => {}
                    NodeOutcome::Rejected => {
                        cancel_pending(&mut changes, &stored, Some(node.node_code.as_str()), now);
                        finish(&mut changes.approval, ApprovalStatus::Rejected, now);
                    }
                    NodeOutcome::Passed => {
                        cancel_pending(&mut changes, &stored, Some(node.node_code.as_str()), now);
                        self.walk(&mut changes.approval, &nodes, node, now, &mut step).await?;
                        changes.new_tasks = std::mem::take(&mut step.new_tasks);
                    }
                }
                refresh_counters(&mut changes, &stored, now);
                self.store.commit(&changes).await?;
                tracing::info!(
                    approval = %changes.approval.code,
                    task = task_code,
                    result = %result,
                    outcome = ?outcome,
                    "task completed"
                );
                Ok::<_, MdmError>((changes.approval, step.notices))
            })
            .await?;
        self.after_commit(&approval, notices).await;
        Ok(approval)
    }

    /// 转交：原任务置为已转交，为新审批人开新任务 / close the task as transferred and open one for `to`
    pub async fn transfer(
        &self,
        ctx: &RequestContext,
        task_code: &str,
        to: Assignee,
        reason: &str,
    ) -> MdmResult<ApprovalTask> {
        let (approval, opened) = ctx
            .run("approval.transfer", async {
                let task = self.require_task(task_code).await?;
                if !task.is_pending() {
                    return Err(MdmError::state(format!("任务 {} 状态为 {}，不能转交", task_code, task.status)));
                }
                if task.assignee_id != ctx.user_id {
                    return Err(MdmError::permission(format!("任务 {} 不属于当前用户", task_code)));
                }
                if to.id.is_empty() || to.id == task.assignee_id {
                    return Err(MdmError::validation("to", "转交对象不能为空或为本人"));
                }
                let approval = self.require_approval(&task.approval_code).await?;
                if approval.status != ApprovalStatus::Pending {
                    return Err(MdmError::state(format!("审批实例 {} 已是 {}", approval.code, approval.status)));
                }
                let stored = self.store.list_tasks(&approval.code).await?;
                if stored
                    .iter()
                    .any(|t| t.is_pending() && t.node_code == task.node_code && t.assignee_id == to.id)
                {
                    return Err(MdmError::conflict(format!(
                        "{} 在节点 {} 已有待办任务",
                        to.id, task.node_code
                    )));
                }
                let nodes = self.load_nodes(&approval).await?;
                let node = find_node(&nodes, &task.node_code)
                    .ok_or_else(|| MdmError::state(format!("节点 {} 不存在", task.node_code)))?;

                let now = Utc::now().naive_utc();
                let mut moved = task.clone();
                moved.status = TaskStatus::Transferred;
                moved.transfer_to_id = Some(to.id.clone());
                moved.transfer_to_name = Some(to.name.clone());
                moved.reason = reason.to_string();
                moved.completed_at = Some(now);
                moved.updated_at = now;

                let mut opened = ApprovalTask::pending(&approval.code, node, &to, now);
                opened.transfer_from_id = Some(task.assignee_id.clone());
                opened.transfer_from_name = Some(task.assignee_name.clone());
                opened.reason = reason.to_string();

                let mut changes = ApprovalChangeset::update(approval);
                changes.update_task(moved, TaskStatus::Pending);
                changes.add_task(opened.clone());
                refresh_counters(&mut changes, &stored, now);
                self.store.commit(&changes).await?;
                Ok::<_, MdmError>((changes.approval, opened))
            })
            .await?;

        tracing::info!(approval = %approval.code, from = task_code, to = %opened.task_code, "task transferred");
        let notice = Notification {
            event: NotificationEvent::TaskAssigned,
            approval_code: approval.code.clone(),
            task_code: Some(opened.task_code.clone()),
            recipient_id: opened.assignee_id.clone(),
        };
        self.after_commit(&approval, vec![notice]).await;
        Ok(opened)
    }

    /// 提交人手动催办；间隔内重复催办返回 `false`
    /// Manual reminder by the submitter; returns `false` inside the reminder interval
    pub async fn remind(&self, ctx: &RequestContext, task_code: &str) -> MdmResult<bool> {
        let claimed = ctx
            .run("approval.remind", async {
                let task = self.require_task(task_code).await?;
                if !task.is_pending() {
                    return Err(MdmError::state(format!("任务 {} 状态为 {}，无需催办", task_code, task.status)));
                }
                let approval = self.require_approval(&task.approval_code).await?;
                if approval.submitter_id != ctx.user_id {
                    return Err(MdmError::permission("只有提交人可以催办"));
                }
                let now = Utc::now().naive_utc();
                self.store
                    .claim_reminders(now, self.reminder_cutoff(now), RemindScope::Task(task_code))
                    .await
            })
            .await?;
        let Some(task) = claimed.into_iter().next() else {
            tracing::debug!(task = task_code, "reminder skipped inside interval");
            return Ok(false);
        };
        self.notify_reminder(&task).await;
        Ok(true)
    }

    /// 批量催办：逐个处理，单个失败不影响其余 / remind each task, one failure does not stop the rest
    pub async fn batch_remind(&self, ctx: &RequestContext, task_codes: &[String]) -> RemindReport {
        let mut report = RemindReport::default();
        let mut seen = HashSet::new();
        for code in task_codes.iter().filter(|c| seen.insert(c.as_str())) {
            match self.remind(ctx, code).await {
                Ok(true) => report.reminded.push(code.clone()),
                Ok(false) => report.skipped.push(code.clone()),
                Err(e) => report.failed.push((code.clone(), e.to_string())),
            }
        }
        tracing::info!(
            reminded = report.reminded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "batch reminder done"
        );
        report
    }

    async fn notify_reminder(&self, task: &ApprovalTask) {
        let notice = Notification {
            event: NotificationEvent::TaskReminder,
            approval_code: task.approval_code.clone(),
            task_code: Some(task.task_code.clone()),
            recipient_id: task.assignee_id.clone(),
        };
        if let Err(e) = self.notifier.enqueue(&notice).await {
            tracing::warn!(task = %task.task_code, error = %e, "reminder enqueue failed");
        }
    }

    /// 提交人撤回 / the submitter withdraws the approval
    pub async fn cancel(&self, ctx: &RequestContext, approval_code: &str, reason: &str) -> MdmResult<Approval> {
        let approval = ctx
            .run("approval.cancel", async {
                let approval = self.require_approval(approval_code).await?;
                if approval.submitter_id != ctx.user_id {
                    return Err(MdmError::permission("只有提交人可以撤回"));
                }
                if approval.status != ApprovalStatus::Pending {
                    return Err(MdmError::state(format!("审批实例 {} 已是 {}", approval.code, approval.status)));
                }
                let stored = self.store.list_tasks(approval_code).await?;
                let now = Utc::now().naive_utc();
                let mut changes = ApprovalChangeset::update(approval);
                cancel_pending(&mut changes, &stored, None, now);
                for u in changes.task_updates.iter_mut() {
                    u.task.reason = reason.to_string();
                }
                finish(&mut changes.approval, ApprovalStatus::Cancelled, now);
                refresh_counters(&mut changes, &stored, now);
                self.store.commit(&changes).await?;
                Ok::<_, MdmError>(changes.approval)
            })
            .await?;
        tracing::info!(approval = approval_code, user = %ctx.user_id, "approval cancelled");
        self.after_commit(&approval, Vec::new()).await;
        Ok(approval)
    }

    /// 过期扫描，返回认领的实例数 / expire sweep, returns the number of claimed instances
    pub async fn expire_sweep(&self, now: NaiveDateTime) -> MdmResult<usize> {
        let claimed = self.store.claim_expired(now).await?;
        for approval in &claimed {
            tracing::info!(approval = %approval.code, "approval expired");
            self.after_commit(approval, Vec::new()).await;
        }
        Ok(claimed.len())
    }

    /// 催办扫描，返回认领的任务数 / reminder sweep, returns the number of claimed tasks
    pub async fn remind_sweep(&self, now: NaiveDateTime) -> MdmResult<usize> {
        let claimed = self
            .store
            .claim_reminders(now, self.reminder_cutoff(now), RemindScope::Sweep)
            .await?;
        for task in &claimed {
            self.notify_reminder(task).await;
        }
        Ok(claimed.len())
    }

    pub async fn get_approval(&self, ctx: &RequestContext, code: &str) -> MdmResult<Approval> {
        ctx.run("approval.get", self.require_approval(code)).await
    }

    pub async fn list_tasks(&self, ctx: &RequestContext, approval_code: &str) -> MdmResult<Vec<ApprovalTask>> {
        ctx.run("approval.list_tasks", self.store.list_tasks(approval_code))
            .await
    }

    async fn tasks_page(
        &self,
        ctx: &RequestContext,
        assignee_id: &str,
        statuses: &[TaskStatus],
        page: i64,
        size: i64,
    ) -> MdmResult<Paged<ApprovalTask>> {
        let (page, page_size, offset) = self.limits.normalize(page, size);
        let (rows, total) = ctx
            .run(
                "approval.tasks_by_assignee",
                self.store.tasks_by_assignee(assignee_id, statuses, page_size, offset),
            )
            .await?;
        Ok(Paged {
            rows,
            total,
            page,
            page_size,
        })
    }

    /// 我的待办 / tasks waiting on the assignee
    pub async fn my_pending(
        &self,
        ctx: &RequestContext,
        assignee_id: &str,
        page: i64,
        size: i64,
    ) -> MdmResult<Paged<ApprovalTask>> {
        self.tasks_page(ctx, assignee_id, &[TaskStatus::Pending], page, size)
            .await
    }

    /// 我的已办 / tasks the assignee closed
    pub async fn my_history(
        &self,
        ctx: &RequestContext,
        assignee_id: &str,
        page: i64,
        size: i64,
    ) -> MdmResult<Paged<ApprovalTask>> {
        self.tasks_page(
            ctx,
            assignee_id,
            &[
                TaskStatus::Done,
                TaskStatus::Transferred,
                TaskStatus::Approved,
                TaskStatus::Rejected,
            ],
            page,
            size,
        )
        .await
    }

    pub async fn my_submissions(
        &self,
        ctx: &RequestContext,
        submitter_id: &str,
        page: i64,
        size: i64,
    ) -> MdmResult<Paged<Approval>> {
        let (page, page_size, offset) = self.limits.normalize(page, size);
        let (rows, total) = ctx
            .run(
                "approval.by_submitter",
                self.store.approvals_by_submitter(submitter_id, page_size, offset),
            )
            .await?;
        Ok(Paged {
            rows,
            total,
            page,
            page_size,
        })
    }
}
