//! 节点图遍历与通过策略（纯函数）/ Node graph traversal and pass policy, all pure

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{MdmError, MdmResult};
use crate::modules::approval::model::{
    ApprovalNode, ApprovalTask, ConditionRule, NodeType, PassMode, TaskResult, TaskStatus,
    CONDITION_OPS,
};

/// 节点保存时的校验 / Validation applied when a node is saved
///
/// 只有审批节点解析 `approver_type`；其他类型不消费该值，也不校验。
/// Only approval nodes parse `approver_type`; other node types never consume it and skip the check.
pub fn validate_node(node: &ApprovalNode) -> MdmResult<()> {
    if !v::is_identifier(&node.node_code) {
        return Err(MdmError::validation(
            "node_code",
            format!("节点编码 '{}' 非法", node.node_code),
        ));
    }
    if let Some(next) = node.next_node_code.as_deref().filter(|n| !n.is_empty()) {
        if !v::is_identifier(next) || next == node.node_code {
            return Err(MdmError::validation(
                "next_node_code",
                format!("后继节点 '{}' 非法", next),
            ));
        }
    }
    if node.timeout_hours < 0 {
        return Err(MdmError::validation("timeout_hours", "超时小时数不能为负"));
    }
    match node.node_type {
        NodeType::Approval => {
            node.approver()?;
            node.approver_config()?;
        }
        NodeType::Cc => {
            node.approver_config()?;
        }
        _ => {}
    }
    for rule in node.conditions()? {
        if !CONDITION_OPS.contains(&rule.op.as_str()) {
            return Err(MdmError::validation(
                "condition_config",
                format!("不支持的条件操作符 '{}'", rule.op),
            ));
        }
    }
    Ok(())
}

fn order_key(n: &ApprovalNode) -> (i32, i64, &str) {
    (n.sort_order, n.id, n.node_code.as_str())
}

/// 按 `sort_order` 排序的节点 / nodes in sort order
pub fn ordered(nodes: &[ApprovalNode]) -> Vec<&ApprovalNode> {
    let mut out: Vec<&ApprovalNode> = nodes.iter().collect();
    out.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
    out
}

pub fn find_node<'a>(nodes: &'a [ApprovalNode], code: &str) -> Option<&'a ApprovalNode> {
    nodes.iter().find(|n| n.node_code == code)
}

pub fn start_node(nodes: &[ApprovalNode]) -> Option<&ApprovalNode> {
    nodes.iter().find(|n| n.node_type == NodeType::Start)
}

/// 后继节点：显式连线优先，否则取排序上的下一个
/// Next node: the explicit edge wins, otherwise the next one in sort order
pub fn next_node<'a>(nodes: &'a [ApprovalNode], current: &ApprovalNode) -> Option<&'a ApprovalNode> {
    if let Some(code) = current.next_node_code.as_deref().filter(|c| !c.is_empty()) {
        return find_node(nodes, code);
    }
    let key = order_key(current);
    ordered(nodes)
        .into_iter()
        .find(|n| order_key(n).cmp(&key) == Ordering::Greater)
}

/// 启用前的图检查 / Graph check before activation
pub fn check_graph(nodes: &[ApprovalNode]) -> MdmResult<()> {
    let mut codes = HashSet::new();
    for n in nodes {
        if !codes.insert(n.node_code.as_str()) {
            return Err(MdmError::validation(
                "node_code",
                format!("节点编码 '{}' 重复", n.node_code),
            ));
        }
    }
    let starts = nodes.iter().filter(|n| n.node_type == NodeType::Start).count();
    if starts != 1 {
        return Err(MdmError::validation(
            "node_type",
            format!("必须有且仅有一个开始节点，实际 {} 个", starts),
        ));
    }
    if !nodes.iter().any(|n| n.node_type == NodeType::End) {
        return Err(MdmError::validation("node_type", "至少需要一个结束节点"));
    }
    for n in nodes {
        if let Some(next) = n.next_node_code.as_deref().filter(|c| !c.is_empty()) {
            if !codes.contains(next) {
                return Err(MdmError::validation(
                    "next_node_code",
                    format!("节点 '{}' 的后继 '{}' 不存在", n.node_code, next),
                ));
            }
        }
    }

    let mut seen = HashSet::new();
    let mut current = start_node(nodes);
    while let Some(node) = current {
        if node.node_type == NodeType::End {
            return Ok(());
        }
        if !seen.insert(node.node_code.as_str()) {
            return Err(MdmError::validation(
                "next_node_code",
                format!("节点 '{}' 处存在环", node.node_code),
            ));
        }
        current = next_node(nodes, node);
    }
    Err(MdmError::validation("nodes", "从开始节点无法到达结束节点"))
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 两边都是数字时按数值比较，否则按字符串 / numeric when both parse, string otherwise
fn compare(actual: &str, expected: &str) -> Ordering {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.cmp(expected),
    }
}

fn rule_holds(rule: &ConditionRule, form: &Value) -> bool {
    let Some(actual) = form.get(&rule.field) else {
        return false;
    };
    let (actual, expected) = (text_of(actual), text_of(&rule.value));
    match rule.op.as_str() {
        "eq" => compare(&actual, &expected) == Ordering::Equal,
        "ne" => compare(&actual, &expected) != Ordering::Equal,
        "gt" => compare(&actual, &expected) == Ordering::Greater,
        "gte" => compare(&actual, &expected) != Ordering::Less,
        "lt" => compare(&actual, &expected) == Ordering::Less,
        "lte" => compare(&actual, &expected) != Ordering::Greater,
        "contains" => actual.contains(&expected),
        "not_contains" => !actual.contains(&expected),
        _ => false,
    }
}

/// 全部条件成立 / every rule holds against the form data
pub fn conditions_hold(rules: &[ConditionRule], form: &Value) -> bool {
    rules.iter().all(|r| rule_holds(r, form))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Waiting,
    Passed,
    Rejected,
}

/// 按通过策略判定节点结果；已转交与已取消的任务不参与
/// Decide the node by its pass policy; transferred and canceled tasks do not count
pub fn node_outcome<'a>(mode: PassMode, tasks: impl IntoIterator<Item = &'a ApprovalTask>) -> NodeOutcome {
    let live: Vec<&ApprovalTask> = tasks
        .into_iter()
        .filter(|t| !matches!(t.status, TaskStatus::Transferred | TaskStatus::Canceled))
        .collect();
    if live.iter().any(|t| t.decision() == Some(TaskResult::Rejected)) {
        return NodeOutcome::Rejected;
    }
    let approved = |t: &&ApprovalTask| t.decision() == Some(TaskResult::Approved);
    let passed = match mode {
        PassMode::Or => live.iter().any(approved),
        PassMode::And => !live.is_empty() && live.iter().all(approved),
    };
    if passed {
        NodeOutcome::Passed
    } else {
        NodeOutcome::Waiting
    }
}

/// (task_count, completed_tasks, pending_tasks)
///
/// 已转交与已取消的任务只计入总数，因此 `completed + pending <= task_count` 恒成立。
pub fn counters(tasks: &[ApprovalTask]) -> (i32, i32, i32) {
    let total = tasks.len() as i32;
    let pending = tasks.iter().filter(|t| t.is_pending()).count() as i32;
    let completed = tasks.iter().filter(|t| t.decision().is_some()).count() as i32;
    (total, completed, pending)
}
