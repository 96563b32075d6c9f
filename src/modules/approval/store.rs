//! 审批存储接缝 / Approval storage seam

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::MdmResult;
use crate::modules::approval::model::{
    Approval, ApprovalDefinition, ApprovalNode, ApprovalStatus, ApprovalTask, TaskStatus,
};

/// 任务更新，要求库中状态仍为 `expected` / task update guarded by its stored status
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub task: ApprovalTask,
    pub expected: TaskStatus,
}

/// 一次原子提交：实例行、任务更新与新任务
/// One atomic write: the instance row, task updates and new tasks
///
/// 更新实例时要求库中状态与版本未变，任一守卫失败整体回滚并返回 `State`。
/// Updating an instance requires its stored status and revision to be unchanged; any failed
/// guard rolls the whole changeset back with `State`.
#[derive(Debug, Clone)]
pub struct ApprovalChangeset {
    pub approval: Approval,
    /// `None` 表示新建 / `None` inserts a new instance
    pub expected: Option<(ApprovalStatus, i64)>,
    pub task_updates: Vec<TaskUpdate>,
    pub new_tasks: Vec<ApprovalTask>,
}

impl ApprovalChangeset {
    pub fn insert(approval: Approval) -> Self {
        Self {
            approval,
            expected: None,
            task_updates: Vec::new(),
            new_tasks: Vec::new(),
        }
    }

    /// 记录当前状态与版本作为守卫，并递增版本 / capture the guard and bump the revision
    pub fn update(mut approval: Approval) -> Self {
        let expected = Some((approval.status, approval.revision));
        approval.revision += 1;
        Self {
            approval,
            expected,
            task_updates: Vec::new(),
            new_tasks: Vec::new(),
        }
    }

    pub fn update_task(&mut self, task: ApprovalTask, expected: TaskStatus) {
        self.task_updates.push(TaskUpdate { task, expected });
    }

    pub fn add_task(&mut self, task: ApprovalTask) {
        self.new_tasks.push(task);
    }

    /// 提交后实例的全部任务视图 / the instance's tasks as they will be after commit
    pub fn merged_tasks(&self, stored: &[ApprovalTask]) -> Vec<ApprovalTask> {
        let mut out: Vec<ApprovalTask> = stored
            .iter()
            .map(|t| {
                self.task_updates
                    .iter()
                    .find(|u| u.task.task_code == t.task_code)
                    .map(|u| u.task.clone())
                    .unwrap_or_else(|| t.clone())
            })
            .collect();
        out.extend(self.new_tasks.iter().cloned());
        out
    }
}

/// 催办认领范围 / Reminder claim scope
#[derive(Debug, Clone, Copy)]
pub enum RemindScope<'a> {
    /// 定时扫描：以上次催办时间（没有则分配时间）为准
    /// Sweep: gated on the last reminder, or the assignment time when never reminded
    Sweep,
    /// 手动催办单个任务：只看上次催办时间 / manual remind of one task, gated on the last reminder only
    Task(&'a str),
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert_definition(&self, def: &ApprovalDefinition) -> MdmResult<i64>;
    async fn get_definition(&self, code: &str, version: i32) -> MdmResult<Option<ApprovalDefinition>>;
    async fn latest_definition(&self, code: &str) -> MdmResult<Option<ApprovalDefinition>>;
    async fn active_definition(&self, entity_code: &str) -> MdmResult<Option<ApprovalDefinition>>;
    /// 启用指定版本，原启用版本同时冻结 / activate a version, freezing the previous active one
    async fn activate_definition(&self, code: &str, version: i32) -> MdmResult<()>;

    /// 按 (定义, 版本, 节点编码) 插入或更新 / upsert by (definition, version, node code)
    async fn save_node(&self, node: &ApprovalNode) -> MdmResult<i64>;
    async fn delete_node(&self, code: &str, version: i32, node_code: &str) -> MdmResult<bool>;
    async fn list_nodes(&self, code: &str, version: i32) -> MdmResult<Vec<ApprovalNode>>;

    async fn commit(&self, changes: &ApprovalChangeset) -> MdmResult<()>;
    async fn get_approval(&self, code: &str) -> MdmResult<Option<Approval>>;
    async fn list_tasks(&self, approval_code: &str) -> MdmResult<Vec<ApprovalTask>>;
    async fn get_task(&self, task_code: &str) -> MdmResult<Option<ApprovalTask>>;
    async fn tasks_by_assignee(
        &self,
        assignee_id: &str,
        statuses: &[TaskStatus],
        limit: i64,
        offset: i64,
    ) -> MdmResult<(Vec<ApprovalTask>, i64)>;
    async fn approvals_by_submitter(
        &self,
        submitter_id: &str,
        limit: i64,
        offset: i64,
    ) -> MdmResult<(Vec<Approval>, i64)>;

    /// 认领已过期的待审批实例并取消其待办任务 / claim expired pending instances and cancel their tasks
    async fn claim_expired(&self, now: NaiveDateTime) -> MdmResult<Vec<Approval>>;
    /// 认领可催办任务：`remind_count + 1`、`last_remind_at = now`
    async fn claim_reminders(
        &self,
        now: NaiveDateTime,
        cutoff: NaiveDateTime,
        scope: RemindScope<'_>,
    ) -> MdmResult<Vec<ApprovalTask>>;
}
