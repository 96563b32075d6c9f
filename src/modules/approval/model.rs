//! 审批模型 / Approval model

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MdmError, MdmResult};
use crate::modules::schema::field::string_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefinitionStatus {
    Draft,
    Active,
    Frozen,
    Deleted,
}

string_enum!(DefinitionStatus, "definition status", {
    Draft => "Draft",
    Active => "Active",
    Frozen => "Frozen",
    Deleted => "Deleted",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Start,
    Approval,
    Condition,
    Cc,
    End,
}

string_enum!(NodeType, "node type", {
    Start => "START",
    Approval => "APPROVAL",
    Condition => "CONDITION",
    Cc => "CC",
    End => "END",
});

/// 审批人解析方式 / How approvers are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApproverType {
    Users,
    Roles,
    Departments,
    Positions,
    SelfSelect,
    Expression,
    Superior,
    DeptManager,
    AutoApprove,
    AutoReject,
}

string_enum!(ApproverType, "approver type", {
    Users => "USERS",
    Roles => "ROLES",
    Departments => "DEPARTMENTS",
    Positions => "POSITIONS",
    SelfSelect => "SELF_SELECT",
    Expression => "EXPRESSION",
    Superior => "SUPERIOR",
    DeptManager => "DEPT_MANAGER",
    AutoApprove => "AUTO_APPROVE",
    AutoReject => "AUTO_REJECT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

string_enum!(ApprovalStatus, "approval status", {
    Pending => "Pending",
    Approved => "Approved",
    Rejected => "Rejected",
    Cancelled => "Cancelled",
    Expired => "Expired",
});

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
    Transferred,
    Done,
    /// 被同节点其他决定、撤回或过期关闭 / closed by a sibling decision, cancellation or expiry
    Canceled,
}

string_enum!(TaskStatus, "task status", {
    Pending => "Pending",
    Approved => "Approved",
    Rejected => "Rejected",
    Transferred => "Transferred",
    Done => "Done",
    Canceled => "Canceled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskResult {
    Approved,
    Rejected,
    Notified,
}

string_enum!(TaskResult, "task result", {
    Approved => "Approved",
    Rejected => "Rejected",
    Notified => "Notified",
});

/// 节点通过策略 / Node pass policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassMode {
    /// 或签 / any approval passes
    #[default]
    #[serde(rename = "OR")]
    Or,
    /// 会签 / every task must approve
    #[serde(rename = "AND")]
    And,
}

/// 用户引用 / User reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl Assignee {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("system", "system")
    }
}

/// 审批人配置 / Approver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApproverConfig {
    pub users: Vec<Assignee>,
    pub roles: Vec<String>,
    pub departments: Vec<String>,
    pub positions: Vec<String>,
    pub expression: Option<String>,
    pub mode: PassMode,
}

/// 条件规则，`op` 取值 `eq ne gt gte lt lte contains not_contains`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    pub field: String,
    pub op: String,
    pub value: Value,
}

/// 实例与任务编码：大写 UUID / instance and task codes are uppercase UUIDs
pub fn new_code() -> String {
    uuid::Uuid::new_v4().to_string().to_uppercase()
}

pub const CONDITION_OPS: [&str; 8] = ["eq", "ne", "gt", "gte", "lt", "lte", "contains", "not_contains"];

/// 审批定义 / Approval definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDefinition {
    #[serde(default)]
    pub id: i64,
    pub code: String,
    pub name: String,
    pub version: i32,
    pub entity_code: String,
    pub status: DefinitionStatus,
    #[serde(default)]
    pub form_schema: Option<Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// 审批节点 / Approval node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalNode {
    #[serde(default)]
    pub id: i64,
    pub approval_def_code: String,
    pub version: i32,
    pub node_code: String,
    #[serde(default)]
    pub node_name: String,
    pub node_type: NodeType,
    /// 原样保存；仅审批节点会解析与校验 / stored verbatim, parsed only for approval nodes
    #[serde(default)]
    pub approver_type: String,
    #[serde(default)]
    pub approver_config: Option<Value>,
    #[serde(default)]
    pub condition_config: Option<Value>,
    #[serde(default)]
    pub next_node_code: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub timeout_hours: i32,
    #[serde(default = "normal_status")]
    pub status: String,
}

fn normal_status() -> String {
    "Normal".to_string()
}

impl ApprovalNode {
    pub fn new(
        def_code: impl Into<String>,
        version: i32,
        node_code: impl Into<String>,
        node_type: NodeType,
        sort_order: i32,
    ) -> Self {
        let node_code = node_code.into();
        Self {
            id: 0,
            approval_def_code: def_code.into(),
            version,
            node_name: node_code.clone(),
            node_code,
            node_type,
            approver_type: String::new(),
            approver_config: None,
            condition_config: None,
            next_node_code: None,
            sort_order,
            timeout_hours: 0,
            status: normal_status(),
        }
    }

    /// 解析审批人类型；空值表示稍后解析 / parse approver type, blank means resolve later
    pub fn approver(&self) -> MdmResult<Option<ApproverType>> {
        let raw = self.approver_type.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<ApproverType>()
            .map(Some)
            .map_err(|e| MdmError::validation("approver_type", e.to_string()))
    }

    pub fn approver_config(&self) -> MdmResult<ApproverConfig> {
        match &self.approver_config {
            None | Some(Value::Null) => Ok(ApproverConfig::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| MdmError::validation("approver_config", e.to_string())),
        }
    }

    pub fn conditions(&self) -> MdmResult<Vec<ConditionRule>> {
        match &self.condition_config {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v @ Value::Object(_)) => {
                let rule: ConditionRule = serde_json::from_value(v.clone())
                    .map_err(|e| MdmError::validation("condition_config", e.to_string()))?;
                Ok(vec![rule])
            }
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| MdmError::validation("condition_config", e.to_string())),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.node_name.is_empty() {
            &self.node_code
        } else {
            &self.node_name
        }
    }
}

/// 审批实例 / Approval instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    #[serde(default)]
    pub id: i64,
    pub code: String,
    pub approval_def_code: String,
    pub def_version: i32,
    pub entity_code: String,
    pub entity_id: Option<i64>,
    pub title: String,
    pub form_data: Value,
    pub status: ApprovalStatus,
    /// 当前节点编码 / current node code
    pub current_task_id: String,
    pub current_task_name: String,
    pub submitter_id: String,
    pub submitter_name: String,
    pub submitted_at: NaiveDateTime,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub expired_at: Option<NaiveDateTime>,
    pub task_count: i32,
    pub completed_tasks: i32,
    pub pending_tasks: i32,
    /// 乐观并发版本 / optimistic concurrency revision
    #[serde(default)]
    pub revision: i64,
    pub updated_at: NaiveDateTime,
}

/// 审批任务 / Approval task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTask {
    #[serde(default)]
    pub id: i64,
    pub task_code: String,
    pub approval_code: String,
    pub node_code: String,
    pub node_name: String,
    pub assignee_id: String,
    pub assignee_name: String,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub reason: String,
    pub assigned_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub expired_at: Option<NaiveDateTime>,
    pub remind_count: i32,
    pub last_remind_at: Option<NaiveDateTime>,
    pub transfer_from_id: Option<String>,
    pub transfer_from_name: Option<String>,
    pub transfer_to_id: Option<String>,
    pub transfer_to_name: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl ApprovalTask {
    pub fn pending(
        approval_code: &str,
        node: &ApprovalNode,
        assignee: &Assignee,
        now: NaiveDateTime,
    ) -> Self {
        let expired_at = (node.timeout_hours > 0)
            .then(|| now + chrono::Duration::hours(node.timeout_hours as i64));
        Self {
            id: 0,
            task_code: new_code(),
            approval_code: approval_code.to_string(),
            node_code: node.node_code.clone(),
            node_name: node.display_name().to_string(),
            assignee_id: assignee.id.clone(),
            assignee_name: assignee.name.clone(),
            status: TaskStatus::Pending,
            result: None,
            comment: String::new(),
            reason: String::new(),
            assigned_at: now,
            started_at: Some(now),
            completed_at: None,
            expired_at,
            remind_count: 0,
            last_remind_at: None,
            transfer_from_id: None,
            transfer_from_name: None,
            transfer_to_id: None,
            transfer_to_name: None,
            updated_at: now,
        }
    }

    /// 立即完成的任务（自动节点、抄送）/ a task completed on creation
    pub fn closed(
        approval_code: &str,
        node: &ApprovalNode,
        assignee: &Assignee,
        result: TaskResult,
        now: NaiveDateTime,
    ) -> Self {
        let mut t = Self::pending(approval_code, node, assignee, now);
        t.status = TaskStatus::Done;
        t.result = Some(result);
        t.completed_at = Some(now);
        t.expired_at = None;
        t
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// 任务的审批结论 / the decision carried by the task
    pub fn decision(&self) -> Option<TaskResult> {
        match self.status {
            TaskStatus::Approved => Some(TaskResult::Approved),
            TaskStatus::Rejected => Some(TaskResult::Rejected),
            TaskStatus::Done => self.result,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approver_type_wire_names() {
        assert_eq!(ApproverType::ALL.len(), 10);
        assert_eq!("DEPT_MANAGER".parse::<ApproverType>().unwrap(), ApproverType::DeptManager);
        assert!("Users".parse::<ApproverType>().is_err());
        assert_eq!(NodeType::Cc.to_string(), "CC");
    }

    #[test]
    fn approver_config_defaults_to_or() {
        let mut n = ApprovalNode::new("d", 1, "a1", NodeType::Approval, 1);
        assert_eq!(n.approver_config().unwrap().mode, PassMode::Or);
        n.approver_config = Some(json!({"users": [{"id": "u1", "name": "甲"}], "mode": "AND"}));
        let cfg = n.approver_config().unwrap();
        assert_eq!(cfg.mode, PassMode::And);
        assert_eq!(cfg.users[0].id, "u1");
        n.approver_config = Some(json!({"mode": "XOR"}));
        assert!(n.approver_config().is_err());
    }

    #[test]
    fn single_condition_object_is_accepted() {
        let mut n = ApprovalNode::new("d", 1, "a1", NodeType::Approval, 1);
        n.condition_config = Some(json!({"field": "amount", "op": "gt", "value": 100}));
        assert_eq!(n.conditions().unwrap().len(), 1);
        n.condition_config = Some(json!([{"field": "a", "op": "eq", "value": "x"}, {"field": "b", "op": "ne", "value": 1}]));
        assert_eq!(n.conditions().unwrap().len(), 2);
    }

    #[test]
    fn done_task_carries_decision_in_result() {
        let node = ApprovalNode::new("d", 1, "a1", NodeType::Approval, 1);
        let now = chrono::Utc::now().naive_utc();
        let t = ApprovalTask::closed("AP1", &node, &Assignee::system(), TaskResult::Approved, now);
        assert_eq!(t.decision(), Some(TaskResult::Approved));
        let p = ApprovalTask::pending("AP1", &node, &Assignee::new("u1", "甲"), now);
        assert!(p.is_pending());
        assert_eq!(p.decision(), None);
        assert_eq!(p.task_code, p.task_code.to_uppercase());
    }
}
