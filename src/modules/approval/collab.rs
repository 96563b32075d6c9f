//! 外部协作者接口：审批人目录与通知队列
//! External collaborators: approver directory and notification queue

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{MdmError, MdmResult};
use crate::modules::approval::model::{Approval, ApproverConfig, ApproverType, Assignee};
use crate::modules::schema::field::string_enum;

/// 审批人解析 / Approver resolution
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    async fn resolve(
        &self,
        approver_type: ApproverType,
        config: &ApproverConfig,
        approval: &Approval,
    ) -> MdmResult<Vec<Assignee>>;
}

/// 进程内目录：用户直接取自配置，其余类型查静态分组
/// In-process directory: users come from the node config, other types from static groups
///
/// 角色、部门、岗位按配置中的编码分组；上级与部门负责人按提交人分组；表达式按表达式文本分组；
/// 自选审批人取自表单的 `_approvers` 数组。
#[derive(Default)]
pub struct StaticDirectory {
    groups: HashMap<(ApproverType, String), Vec<Assignee>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(
        mut self,
        approver_type: ApproverType,
        key: impl Into<String>,
        members: Vec<Assignee>,
    ) -> Self {
        self.groups.insert((approver_type, key.into()), members);
        self
    }

    fn lookup(&self, ty: ApproverType, keys: &[String]) -> Vec<Assignee> {
        keys.iter()
            .filter_map(|k| self.groups.get(&(ty, k.clone())))
            .flatten()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ApproverDirectory for StaticDirectory {
    async fn resolve(
        &self,
        approver_type: ApproverType,
        config: &ApproverConfig,
        approval: &Approval,
    ) -> MdmResult<Vec<Assignee>> {
        let found = match approver_type {
            ApproverType::Users => config.users.clone(),
            ApproverType::Roles => self.lookup(approver_type, &config.roles),
            ApproverType::Departments => self.lookup(approver_type, &config.departments),
            ApproverType::Positions => self.lookup(approver_type, &config.positions),
            ApproverType::Superior | ApproverType::DeptManager => {
                self.lookup(approver_type, &[approval.submitter_id.clone()])
            }
            ApproverType::Expression => {
                let expr = config.expression.clone().unwrap_or_default();
                self.lookup(approver_type, &[expr])
            }
            ApproverType::SelfSelect => match approval.form_data.get("_approvers") {
                Some(v) => serde_json::from_value(v.clone())
                    .map_err(|e| MdmError::validation("_approvers", e.to_string()))?,
                None => Vec::new(),
            },
            ApproverType::AutoApprove | ApproverType::AutoReject => vec![Assignee::system()],
        };
        Ok(found)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationEvent {
    ApprovalCreated,
    TaskAssigned,
    TaskReminder,
    ApprovalCompleted,
    CarbonCopied,
}

string_enum!(NotificationEvent, "notification event", {
    ApprovalCreated => "ApprovalCreated",
    TaskAssigned => "TaskAssigned",
    TaskReminder => "TaskReminder",
    ApprovalCompleted => "ApprovalCompleted",
    CarbonCopied => "CarbonCopied",
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub approval_code: String,
    pub task_code: Option<String>,
    pub recipient_id: String,
}

/// 通知入队，投递与重试由协作方负责 / Enqueue only; delivery and retries belong to the collaborator
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, notification: &Notification) -> MdmResult<()>;
}

/// 只写日志的队列 / Queue that only logs
pub struct LogNotificationQueue;

#[async_trait]
impl NotificationQueue for LogNotificationQueue {
    async fn enqueue(&self, n: &Notification) -> MdmResult<()> {
        tracing::info!(
            event = %n.event,
            approval = %n.approval_code,
            task = n.task_code.as_deref().unwrap_or(""),
            recipient = %n.recipient_id,
            "notification enqueued"
        );
        Ok(())
    }
}

/// 内存队列，记录所有通知 / In-memory queue recording every notification
#[derive(Default)]
pub struct MemoryNotificationQueue {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self, event: NotificationEvent) -> usize {
        self.sent.lock().iter().filter(|n| n.event == event).count()
    }
}

#[async_trait]
impl NotificationQueue for MemoryNotificationQueue {
    async fn enqueue(&self, n: &Notification) -> MdmResult<()> {
        self.sent.lock().push(n.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::approval::model::ApprovalStatus;
    use serde_json::json;

    fn approval(form: serde_json::Value) -> Approval {
        let now = chrono::Utc::now().naive_utc();
        Approval {
            id: 0,
            code: "AP1".into(),
            approval_def_code: "D".into(),
            def_version: 1,
            entity_code: "goods".into(),
            entity_id: None,
            title: String::new(),
            form_data: form,
            status: ApprovalStatus::Pending,
            current_task_id: String::new(),
            current_task_name: String::new(),
            submitter_id: "u9".into(),
            submitter_name: "提交人".into(),
            submitted_at: now,
            started_at: now,
            completed_at: None,
            expired_at: None,
            task_count: 0,
            completed_tasks: 0,
            pending_tasks: 0,
            revision: 0,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn static_directory_resolves_each_kind() {
        let dir = StaticDirectory::new()
            .with_group(ApproverType::Roles, "auditor", vec![Assignee::new("r1", "审计")])
            .with_group(ApproverType::Superior, "u9", vec![Assignee::new("boss", "上级")]);
        let cfg = ApproverConfig {
            users: vec![Assignee::new("u1", "甲")],
            roles: vec!["auditor".into(), "nobody".into()],
            ..Default::default()
        };
        let ap = approval(json!({"_approvers": [{"id": "u5", "name": "自选"}]}));
        assert_eq!(dir.resolve(ApproverType::Users, &cfg, &ap).await.unwrap()[0].id, "u1");
        assert_eq!(dir.resolve(ApproverType::Roles, &cfg, &ap).await.unwrap()[0].id, "r1");
        assert_eq!(dir.resolve(ApproverType::Superior, &cfg, &ap).await.unwrap()[0].id, "boss");
        assert_eq!(dir.resolve(ApproverType::SelfSelect, &cfg, &ap).await.unwrap()[0].id, "u5");
        assert!(dir.resolve(ApproverType::Positions, &cfg, &ap).await.unwrap().is_empty());
    }
}
