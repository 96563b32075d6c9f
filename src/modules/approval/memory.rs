//! 内存审批存储，语义与 PostgreSQL 实现一致，用于测试与嵌入
//! In-memory approval store with the same guards as the PostgreSQL one

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::HashSet;

use crate::error::{MdmError, MdmResult};
use crate::modules::approval::flow::counters;
use crate::modules::approval::model::{
    Approval, ApprovalDefinition, ApprovalNode, ApprovalStatus, ApprovalTask, DefinitionStatus,
    TaskStatus,
};
use crate::modules::approval::store::{ApprovalChangeset, ApprovalStore, RemindScope};

#[derive(Default)]
struct State {
    next_id: i64,
    definitions: Vec<ApprovalDefinition>,
    nodes: Vec<ApprovalNode>,
    approvals: Vec<Approval>,
    tasks: Vec<ApprovalTask>,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryApprovalStore {
    state: Mutex<State>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> (Vec<T>, i64) {
    let total = items.len() as i64;
    let rows = items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect();
    (rows, total)
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn insert_definition(&self, def: &ApprovalDefinition) -> MdmResult<i64> {
        let mut s = self.state.lock();
        if s
            .definitions
            .iter()
            .any(|d| d.code == def.code && d.version == def.version)
        {
            return Err(MdmError::conflict(format!(
                "审批定义 {} v{} 已存在",
                def.code, def.version
            )));
        }
        let id = s.id();
        s.definitions.push(ApprovalDefinition { id, ..def.clone() });
        Ok(id)
    }

    async fn get_definition(&self, code: &str, version: i32) -> MdmResult<Option<ApprovalDefinition>> {
        Ok(self
            .state
            .lock()
            .definitions
            .iter()
            .find(|d| d.code == code && d.version == version)
            .cloned())
    }

    async fn latest_definition(&self, code: &str) -> MdmResult<Option<ApprovalDefinition>> {
        Ok(self
            .state
            .lock()
            .definitions
            .iter()
            .filter(|d| d.code == code && d.status != DefinitionStatus::Deleted)
            .max_by_key(|d| d.version)
            .cloned())
    }

    async fn active_definition(&self, entity_code: &str) -> MdmResult<Option<ApprovalDefinition>> {
        Ok(self
            .state
            .lock()
            .definitions
            .iter()
            .filter(|d| d.entity_code == entity_code && d.status == DefinitionStatus::Active)
            .max_by_key(|d| (d.updated_at, d.id))
            .cloned())
    }

    async fn activate_definition(&self, code: &str, version: i32) -> MdmResult<()> {
        let mut s = self.state.lock();
        if !s
            .definitions
            .iter()
            .any(|d| d.code == code && d.version == version)
        {
            return Err(MdmError::not_found("approval_definition", format!("{code} v{version}")));
        }
        let now = chrono::Utc::now().naive_utc();
        for d in s.definitions.iter_mut().filter(|d| d.code == code) {
            if d.version == version {
                d.status = DefinitionStatus::Active;
                d.updated_at = now;
            } else if d.status == DefinitionStatus::Active {
                d.status = DefinitionStatus::Frozen;
                d.updated_at = now;
            }
        }
        Ok(())
    }

    async fn save_node(&self, node: &ApprovalNode) -> MdmResult<i64> {
        let mut s = self.state.lock();
        if let Some(existing) = s.nodes.iter_mut().find(|n| {
            n.approval_def_code == node.approval_def_code
                && n.version == node.version
                && n.node_code == node.node_code
        }) {
            let id = existing.id;
            *existing = ApprovalNode { id, ..node.clone() };
            return Ok(id);
        }
        let id = s.id();
        s.nodes.push(ApprovalNode { id, ..node.clone() });
        Ok(id)
    }

    async fn delete_node(&self, code: &str, version: i32, node_code: &str) -> MdmResult<bool> {
        let mut s = self.state.lock();
        let before = s.nodes.len();
        s.nodes.retain(|n| {
            !(n.approval_def_code == code && n.version == version && n.node_code == node_code)
        });
        Ok(s.nodes.len() != before)
    }

    async fn list_nodes(&self, code: &str, version: i32) -> MdmResult<Vec<ApprovalNode>> {
        let mut nodes: Vec<ApprovalNode> = self
            .state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.approval_def_code == code && n.version == version)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| (n.sort_order, n.id));
        Ok(nodes)
    }

    async fn commit(&self, changes: &ApprovalChangeset) -> MdmResult<()> {
        let mut s = self.state.lock();
        let code = changes.approval.code.as_str();

        match changes.expected {
            None => {
                if s.approvals.iter().any(|a| a.code == code) {
                    return Err(MdmError::conflict(format!("审批实例 {} 已存在", code)));
                }
            }
            Some((status, revision)) => {
                let current = s
                    .approvals
                    .iter()
                    .find(|a| a.code == code)
                    .ok_or_else(|| MdmError::not_found("approval", code))?;
                if current.status != status || current.revision != revision {
                    return Err(MdmError::state(format!("审批实例 {} 已被并发修改", code)));
                }
            }
        }
        for u in &changes.task_updates {
            let current = s
                .tasks
                .iter()
                .find(|t| t.task_code == u.task.task_code)
                .ok_or_else(|| MdmError::not_found("approval_task", &u.task.task_code))?;
            if current.status != u.expected {
                return Err(MdmError::state(format!(
                    "任务 {} 状态为 {}，无法处理",
                    current.task_code, current.status
                )));
            }
        }

        // 同一节点同一审批人只能有一个待办 / one pending task per (approval, node, assignee)
        let stored: Vec<ApprovalTask> = s
            .tasks
            .iter()
            .filter(|t| t.approval_code == code)
            .cloned()
            .collect();
        let mut pending = HashSet::new();
        for t in changes.merged_tasks(&stored).iter().filter(|t| t.is_pending()) {
            if !pending.insert((t.node_code.clone(), t.assignee_id.clone())) {
                return Err(MdmError::conflict(format!(
                    "审批人 {} 在节点 {} 已有待办任务",
                    t.assignee_id, t.node_code
                )));
            }
        }

        match changes.expected {
            None => {
                let id = s.id();
                s.approvals.push(Approval {
                    id,
                    ..changes.approval.clone()
                });
            }
            Some(_) => {
                if let Some(a) = s.approvals.iter_mut().find(|a| a.code == code) {
                    let id = a.id;
                    *a = Approval {
                        id,
                        ..changes.approval.clone()
                    };
                }
            }
        }
        for u in &changes.task_updates {
            if let Some(t) = s.tasks.iter_mut().find(|t| t.task_code == u.task.task_code) {
                let id = t.id;
                *t = ApprovalTask { id, ..u.task.clone() };
            }
        }
        for t in &changes.new_tasks {
            let id = s.id();
            s.tasks.push(ApprovalTask { id, ..t.clone() });
        }
        Ok(())
    }

    async fn get_approval(&self, code: &str) -> MdmResult<Option<Approval>> {
        Ok(self
            .state
            .lock()
            .approvals
            .iter()
            .find(|a| a.code == code)
            .cloned())
    }

    async fn list_tasks(&self, approval_code: &str) -> MdmResult<Vec<ApprovalTask>> {
        Ok(self
            .state
            .lock()
            .tasks
            .iter()
            .filter(|t| t.approval_code == approval_code)
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_code: &str) -> MdmResult<Option<ApprovalTask>> {
        Ok(self
            .state
            .lock()
            .tasks
            .iter()
            .find(|t| t.task_code == task_code)
            .cloned())
    }

    async fn tasks_by_assignee(
        &self,
        assignee_id: &str,
        statuses: &[TaskStatus],
        limit: i64,
        offset: i64,
    ) -> MdmResult<(Vec<ApprovalTask>, i64)> {
        let mut found: Vec<ApprovalTask> = self
            .state
            .lock()
            .tasks
            .iter()
            .filter(|t| t.assignee_id == assignee_id && statuses.contains(&t.status))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(page(found, limit, offset))
    }

    async fn approvals_by_submitter(
        &self,
        submitter_id: &str,
        limit: i64,
        offset: i64,
    ) -> MdmResult<(Vec<Approval>, i64)> {
        let mut found: Vec<Approval> = self
            .state
            .lock()
            .approvals
            .iter()
            .filter(|a| a.submitter_id == submitter_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(page(found, limit, offset))
    }

    async fn claim_expired(&self, now: NaiveDateTime) -> MdmResult<Vec<Approval>> {
        let mut s = self.state.lock();
        let codes: Vec<String> = s
            .approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending && a.expired_at.is_some_and(|e| e < now))
            .map(|a| a.code.clone())
            .collect();
        let mut claimed = Vec::with_capacity(codes.len());
        for code in codes {
            for t in s
                .tasks
                .iter_mut()
                .filter(|t| t.approval_code == code && t.is_pending())
            {
                t.status = TaskStatus::Canceled;
                t.completed_at = Some(now);
                t.updated_at = now;
            }
            let tasks: Vec<ApprovalTask> = s
                .tasks
                .iter()
                .filter(|t| t.approval_code == code)
                .cloned()
                .collect();
            let (total, completed, pending) = counters(&tasks);
            if let Some(a) = s.approvals.iter_mut().find(|a| a.code == code) {
                a.status = ApprovalStatus::Expired;
                a.completed_at = Some(now);
                a.task_count = total;
                a.completed_tasks = completed;
                a.pending_tasks = pending;
                a.revision += 1;
                a.updated_at = now;
                claimed.push(a.clone());
            }
        }
        Ok(claimed)
    }

    async fn claim_reminders(
        &self,
        now: NaiveDateTime,
        cutoff: NaiveDateTime,
        scope: RemindScope<'_>,
    ) -> MdmResult<Vec<ApprovalTask>> {
        let mut s = self.state.lock();
        let mut claimed = Vec::new();
        for t in s.tasks.iter_mut().filter(|t| t.is_pending()) {
            let due = match scope {
                RemindScope::Sweep => t.last_remind_at.unwrap_or(t.assigned_at) <= cutoff,
                RemindScope::Task(code) => {
                    t.task_code == code && t.last_remind_at.map_or(true, |at| at <= cutoff)
                }
            };
            if due {
                t.remind_count += 1;
                t.last_remind_at = Some(now);
                t.updated_at = now;
                claimed.push(t.clone());
            }
        }
        Ok(claimed)
    }
}
