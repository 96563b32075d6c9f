use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use vmdm::conf::ApprovalSettings;
use vmdm::modules::approval::{
    Approval, ApprovalEngine, ApprovalNode, ApprovalStatus, ApprovalTask, Assignee,
    DefinitionService, DraftPublisher, MemoryApprovalStore, MemoryNotificationQueue, NodeType,
    NotificationEvent, StaticDirectory, SubmitRequest, TaskResult, TaskStatus,
};
use vmdm::{MdmError, MdmResult, RequestContext};

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<String>>,
    reverted: Mutex<Vec<String>>,
}

#[async_trait]
impl DraftPublisher for RecordingPublisher {
    async fn publish(&self, approval: &Approval) -> MdmResult<()> {
        self.published.lock().push(approval.code.clone());
        Ok(())
    }

    async fn revert(&self, approval: &Approval) -> MdmResult<()> {
        self.reverted.lock().push(approval.code.clone());
        Ok(())
    }
}

struct Harness {
    defs: DefinitionService,
    engine: ApprovalEngine,
    queue: Arc<MemoryNotificationQueue>,
    publisher: Arc<RecordingPublisher>,
}

fn harness(settings: ApprovalSettings) -> Harness {
    let store = Arc::new(MemoryApprovalStore::new());
    let queue = Arc::new(MemoryNotificationQueue::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let engine = ApprovalEngine::new(
        store.clone(),
        Arc::new(StaticDirectory::new()),
        queue.clone(),
        publisher.clone(),
        settings,
    );
    Harness {
        defs: DefinitionService::new(store),
        engine,
        queue,
        publisher,
    }
}

fn ctx(user: &str) -> RequestContext {
    RequestContext::new(user, format!("用户{}", user))
}

fn approval_node(code: &str, order: i32, approver_type: &str, config: Value) -> ApprovalNode {
    let mut n = ApprovalNode::new("goods_flow", 1, code, NodeType::Approval, order);
    n.approver_type = approver_type.to_string();
    n.approver_config = Some(config);
    n
}

/// start -> 中间节点 -> end，并启用 / start, the given middle nodes, end; then activate
async fn deploy(h: &Harness, middle: Vec<ApprovalNode>) {
    let admin = ctx("admin");
    h.defs
        .create_definition(&admin, "goods_flow", "商品审批", "goods", None)
        .await
        .unwrap();
    let start = ApprovalNode::new("goods_flow", 1, "start", NodeType::Start, 0);
    let end = ApprovalNode::new("goods_flow", 1, "end", NodeType::End, 99);
    for n in std::iter::once(start).chain(middle).chain(std::iter::once(end)) {
        h.defs.save_node(&admin, n).await.unwrap();
    }
    h.defs.activate(&admin, "goods_flow", 1).await.unwrap();
}

fn two_users(mode: &str) -> ApprovalNode {
    approval_node(
        "a1",
        1,
        "USERS",
        json!({"users": [{"id": "u1", "name": "甲"}, {"id": "u2", "name": "乙"}], "mode": mode}),
    )
}

async fn submit(h: &Harness, form: Value) -> Approval {
    h.engine
        .submit(
            &ctx("sub"),
            SubmitRequest {
                entity_code: "goods".into(),
                title: "新增商品".into(),
                form_data: form,
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

async fn tasks(h: &Harness, approval: &Approval) -> Vec<ApprovalTask> {
    h.engine.list_tasks(&ctx("sub"), &approval.code).await.unwrap()
}

fn task_of<'a>(tasks: &'a [ApprovalTask], assignee: &str, status: TaskStatus) -> &'a ApprovalTask {
    tasks
        .iter()
        .find(|t| t.assignee_id == assignee && t.status == status)
        .unwrap()
}

fn assert_counters(a: &Approval, total: i32, completed: i32, pending: i32) {
    assert_eq!((a.task_count, a.completed_tasks, a.pending_tasks), (total, completed, pending));
    assert!(a.completed_tasks + a.pending_tasks <= a.task_count);
}

#[tokio::test]
async fn or_node_passes_on_first_approval_and_publishes() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;

    let ap = submit(&h, json!({"name": "螺丝"})).await;
    assert_eq!(ap.status, ApprovalStatus::Pending);
    assert_eq!(ap.current_task_id, "a1");
    assert_eq!(ap.code, ap.code.to_uppercase());
    assert_counters(&ap, 2, 0, 2);

    let ts = tasks(&h, &ap).await;
    let t1 = task_of(&ts, "u1", TaskStatus::Pending).task_code.clone();
    let done = h
        .engine
        .complete(&ctx("u1"), &t1, TaskResult::Approved, "同意", "")
        .await
        .unwrap();
    assert_eq!(done.status, ApprovalStatus::Approved);
    assert_eq!(done.current_task_id, "end");
    assert!(done.completed_at.is_some());
    assert_counters(&done, 2, 1, 0);

    let ts = tasks(&h, &ap).await;
    assert_eq!(task_of(&ts, "u1", TaskStatus::Done).result, Some(TaskResult::Approved));
    task_of(&ts, "u2", TaskStatus::Canceled);

    assert_eq!(*h.publisher.published.lock(), vec![ap.code.clone()]);
    assert!(h.publisher.reverted.lock().is_empty());
    assert_eq!(h.queue.count(NotificationEvent::ApprovalCreated), 1);
    assert_eq!(h.queue.count(NotificationEvent::TaskAssigned), 2);
    assert_eq!(h.queue.count(NotificationEvent::ApprovalCompleted), 1);
}

#[tokio::test]
async fn and_node_waits_for_every_assignee() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("AND")]).await;
    let ap = submit(&h, json!({})).await;
    let ts = tasks(&h, &ap).await;

    let first = h
        .engine
        .complete(&ctx("u1"), &task_of(&ts, "u1", TaskStatus::Pending).task_code, TaskResult::Approved, "", "")
        .await
        .unwrap();
    assert_eq!(first.status, ApprovalStatus::Pending);
    assert_eq!(first.current_task_id, "a1");
    assert_counters(&first, 2, 1, 1);

    let second = h
        .engine
        .complete(&ctx("u2"), &task_of(&ts, "u2", TaskStatus::Pending).task_code, TaskResult::Approved, "", "")
        .await
        .unwrap();
    assert_eq!(second.status, ApprovalStatus::Approved);
    assert_counters(&second, 2, 2, 0);
}

#[tokio::test]
async fn rejection_closes_siblings_and_reverts_draft() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("AND")]).await;
    let ap = submit(&h, json!({})).await;
    let ts = tasks(&h, &ap).await;

    let rejected = h
        .engine
        .complete(&ctx("u2"), &task_of(&ts, "u2", TaskStatus::Pending).task_code, TaskResult::Rejected, "资料不全", "")
        .await
        .unwrap();
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_counters(&rejected, 2, 1, 0);
    task_of(&tasks(&h, &ap).await, "u1", TaskStatus::Canceled);
    assert_eq!(*h.publisher.reverted.lock(), vec![ap.code.clone()]);
    assert!(h.publisher.published.lock().is_empty());
}

#[tokio::test]
async fn transfer_hands_the_task_over_without_closing_the_node() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;
    let ap = submit(&h, json!({})).await;
    let ts = tasks(&h, &ap).await;
    let t1 = task_of(&ts, "u1", TaskStatus::Pending).task_code.clone();

    let stranger = h
        .engine
        .transfer(&ctx("u2"), &t1, Assignee::new("u3", "丙"), "")
        .await;
    assert!(matches!(stranger, Err(MdmError::Permission(_))));
    let duplicate = h
        .engine
        .transfer(&ctx("u1"), &t1, Assignee::new("u2", "乙"), "")
        .await;
    assert!(matches!(duplicate, Err(MdmError::Conflict(_))));

    let opened = h
        .engine
        .transfer(&ctx("u1"), &t1, Assignee::new("u3", "丙"), "出差")
        .await
        .unwrap();
    assert_eq!(opened.status, TaskStatus::Pending);
    assert_eq!(opened.transfer_from_id.as_deref(), Some("u1"));

    let ts = tasks(&h, &ap).await;
    let moved = task_of(&ts, "u1", TaskStatus::Transferred);
    assert_eq!(moved.transfer_to_id.as_deref(), Some("u3"));
    let current = h.engine.get_approval(&ctx("sub"), &ap.code).await.unwrap();
    assert_eq!(current.status, ApprovalStatus::Pending);
    assert_eq!(current.current_task_id, "a1");
    assert_counters(&current, 3, 0, 2);

    let again = h
        .engine
        .complete(&ctx("u1"), &t1, TaskResult::Approved, "", "")
        .await;
    assert!(matches!(again, Err(MdmError::State(_))));

    let done = h
        .engine
        .complete(&ctx("u3"), &opened.task_code, TaskResult::Approved, "", "")
        .await
        .unwrap();
    assert_eq!(done.status, ApprovalStatus::Approved);
    assert_counters(&done, 3, 1, 0);
}

#[tokio::test]
async fn completing_requires_a_pending_task_owned_by_the_caller() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;
    let ap = submit(&h, json!({})).await;
    let t1 = task_of(&tasks(&h, &ap).await, "u1", TaskStatus::Pending).task_code.clone();

    assert!(matches!(
        h.engine.complete(&ctx("u1"), &t1, TaskResult::Notified, "", "").await,
        Err(MdmError::Validation { .. })
    ));
    assert!(matches!(
        h.engine.complete(&ctx("u2"), &t1, TaskResult::Approved, "", "").await,
        Err(MdmError::Permission(_))
    ));
    assert!(matches!(
        h.engine.complete(&ctx("u1"), "NO-SUCH-TASK", TaskResult::Approved, "", "").await,
        Err(MdmError::NotFound { .. })
    ));
    h.engine
        .complete(&ctx("u1"), &t1, TaskResult::Approved, "", "")
        .await
        .unwrap();
    assert!(matches!(
        h.engine.complete(&ctx("u1"), &t1, TaskResult::Approved, "", "").await,
        Err(MdmError::State(_))
    ));
}

#[tokio::test]
async fn reminders_respect_the_interval() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;
    let ap = submit(&h, json!({})).await;
    let t1 = task_of(&tasks(&h, &ap).await, "u1", TaskStatus::Pending).task_code.clone();

    assert!(matches!(
        h.engine.remind(&ctx("u1"), &t1).await,
        Err(MdmError::Permission(_))
    ));
    assert!(h.engine.remind(&ctx("sub"), &t1).await.unwrap());
    assert!(!h.engine.remind(&ctx("sub"), &t1).await.unwrap());
    assert_eq!(h.queue.count(NotificationEvent::TaskReminder), 1);

    let now = Utc::now().naive_utc();
    assert_eq!(h.engine.remind_sweep(now).await.unwrap(), 0);
    let later = now + Duration::hours(25);
    assert_eq!(h.engine.remind_sweep(later).await.unwrap(), 2);
    assert_eq!(h.engine.remind_sweep(later).await.unwrap(), 0);
    assert_eq!(h.queue.count(NotificationEvent::TaskReminder), 3);

    let ts = tasks(&h, &ap).await;
    assert_eq!(task_of(&ts, "u1", TaskStatus::Pending).remind_count, 2);
    assert_eq!(task_of(&ts, "u2", TaskStatus::Pending).remind_count, 1);
}

#[tokio::test]
async fn batch_reminder_reports_each_task() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;
    let ap = submit(&h, json!({})).await;
    let ts = tasks(&h, &ap).await;
    let t1 = task_of(&ts, "u1", TaskStatus::Pending).task_code.clone();
    let t2 = task_of(&ts, "u2", TaskStatus::Pending).task_code.clone();

    assert!(h.engine.remind(&ctx("sub"), &t1).await.unwrap());
    let codes = vec![t1.clone(), t2.clone(), t2.clone(), "missing".to_string()];
    let report = h.engine.batch_remind(&ctx("sub"), &codes).await;
    assert_eq!(report.reminded, vec![t2.clone()]);
    assert_eq!(report.skipped, vec![t1]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "missing");
    assert_eq!(h.queue.count(NotificationEvent::TaskReminder), 2);

    let denied = h.engine.batch_remind(&ctx("u1"), &[t2]).await;
    assert!(denied.reminded.is_empty());
    assert_eq!(denied.failed.len(), 1);
}

#[tokio::test]
async fn submitter_cancels_pending_approval() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;
    let ap = submit(&h, json!({})).await;

    assert!(matches!(
        h.engine.cancel(&ctx("u1"), &ap.code, "").await,
        Err(MdmError::Permission(_))
    ));
    let cancelled = h.engine.cancel(&ctx("sub"), &ap.code, "不需要了").await.unwrap();
    assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
    assert_counters(&cancelled, 2, 0, 0);
    assert!(tasks(&h, &ap)
        .await
        .iter()
        .all(|t| t.status == TaskStatus::Canceled && t.reason == "不需要了"));
    assert_eq!(*h.publisher.reverted.lock(), vec![ap.code.clone()]);
    assert!(matches!(
        h.engine.cancel(&ctx("sub"), &ap.code, "").await,
        Err(MdmError::State(_))
    ));
}

#[tokio::test]
async fn expire_sweep_claims_overdue_instances_once() {
    let settings = ApprovalSettings {
        default_expire_hours: 1,
        ..Default::default()
    };
    let h = harness(settings);
    deploy(&h, vec![two_users("OR")]).await;
    let ap = submit(&h, json!({})).await;
    assert!(ap.expired_at.is_some());

    let now = Utc::now().naive_utc();
    assert_eq!(h.engine.expire_sweep(now).await.unwrap(), 0);
    let later = now + Duration::hours(2);
    assert_eq!(h.engine.expire_sweep(later).await.unwrap(), 1);
    assert_eq!(h.engine.expire_sweep(later).await.unwrap(), 0);

    let expired = h.engine.get_approval(&ctx("sub"), &ap.code).await.unwrap();
    assert_eq!(expired.status, ApprovalStatus::Expired);
    assert_counters(&expired, 2, 0, 0);
    assert_eq!(*h.publisher.reverted.lock(), vec![ap.code.clone()]);
}

#[tokio::test]
async fn automatic_and_conditional_nodes_advance_without_people() {
    let h = harness(ApprovalSettings::default());
    let mut cc = ApprovalNode::new("goods_flow", 1, "cc1", NodeType::Cc, 1);
    cc.approver_type = "USERS".into();
    cc.approver_config = Some(json!({"users": [{"id": "w1", "name": "仓管"}]}));
    let mut big = two_users("OR");
    big.node_code = "big".into();
    big.sort_order = 3;
    big.condition_config = Some(json!({"field": "amount", "op": "gt", "value": 1000}));
    deploy(
        &h,
        vec![cc, approval_node("auto", 2, "AUTO_APPROVE", json!({})), big],
    )
    .await;

    let small = submit(&h, json!({"amount": 10})).await;
    assert_eq!(small.status, ApprovalStatus::Approved);
    assert_counters(&small, 2, 2, 0);
    let ts = tasks(&h, &small).await;
    assert_eq!(task_of(&ts, "w1", TaskStatus::Done).result, Some(TaskResult::Notified));
    assert_eq!(task_of(&ts, "system", TaskStatus::Done).result, Some(TaskResult::Approved));
    assert_eq!(h.queue.count(NotificationEvent::CarbonCopied), 1);
    assert_eq!(*h.publisher.published.lock(), vec![small.code.clone()]);

    let large = submit(&h, json!({"amount": "5000"})).await;
    assert_eq!(large.status, ApprovalStatus::Pending);
    assert_eq!(large.current_task_id, "big");
    assert_counters(&large, 4, 2, 2);
}

#[tokio::test]
async fn auto_reject_node_ends_the_approval() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![approval_node("deny", 1, "AUTO_REJECT", json!({}))]).await;
    let ap = submit(&h, json!({})).await;
    assert_eq!(ap.status, ApprovalStatus::Rejected);
    assert_eq!(ap.current_task_id, "deny");
    assert_eq!(*h.publisher.reverted.lock(), vec![ap.code.clone()]);
}

#[tokio::test]
async fn submission_needs_an_active_definition_and_resolvable_approvers() {
    let h = harness(ApprovalSettings::default());
    let missing = h
        .engine
        .submit(
            &ctx("sub"),
            SubmitRequest {
                entity_code: "goods".into(),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(missing, Err(MdmError::Validation { .. })));

    deploy(&h, vec![approval_node("a1", 1, "ROLES", json!({"roles": ["auditor"]}))]).await;
    let nobody = h
        .engine
        .submit(
            &ctx("sub"),
            SubmitRequest {
                entity_code: "goods".into(),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(nobody, Err(MdmError::Validation { .. })));
    assert!(h.publisher.published.lock().is_empty());
}

#[tokio::test]
async fn inbox_queries_page_by_assignee_and_submitter() {
    let h = harness(ApprovalSettings::default());
    deploy(&h, vec![two_users("OR")]).await;
    let first = submit(&h, json!({})).await;
    submit(&h, json!({})).await;

    let pending = h.engine.my_pending(&ctx("u1"), "u1", 1, 1).await.unwrap();
    assert_eq!(pending.total, 2);
    assert_eq!(pending.rows.len(), 1);
    assert_eq!(pending.page_size, 1);

    let t1 = task_of(&tasks(&h, &first).await, "u1", TaskStatus::Pending).task_code.clone();
    h.engine
        .complete(&ctx("u1"), &t1, TaskResult::Approved, "", "")
        .await
        .unwrap();
    assert_eq!(h.engine.my_pending(&ctx("u1"), "u1", 1, 10).await.unwrap().total, 1);
    assert_eq!(h.engine.my_history(&ctx("u1"), "u1", 1, 10).await.unwrap().total, 1);
    assert_eq!(h.engine.my_history(&ctx("u2"), "u2", 1, 10).await.unwrap().total, 0);

    let mine = h.engine.my_submissions(&ctx("sub"), "sub", 1, 10).await.unwrap();
    assert_eq!(mine.total, 2);
    assert_eq!(mine.rows[1].code, first.code);
}
