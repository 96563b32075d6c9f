//! 审批工作流 / Approval workflow

pub mod collab;
pub mod definition;
pub mod engine;
pub mod flow;
pub mod governance;
pub mod memory;
pub mod model;
pub mod pg_store;
pub mod store;
pub mod sweep;

pub use collab::{
    ApproverDirectory, LogNotificationQueue, MemoryNotificationQueue, Notification,
    NotificationEvent, NotificationQueue, StaticDirectory,
};
pub use definition::DefinitionService;
pub use engine::{ApprovalEngine, Paged, RemindReport, SubmitRequest};
pub use governance::{
    ChangeOutcome, DraftPublisher, DraftStatus, EntityGovernor, GatewayPublisher, Operation,
};
pub use memory::MemoryApprovalStore;
pub use model::{
    Approval, ApprovalDefinition, ApprovalNode, ApprovalStatus, ApprovalTask, ApproverConfig,
    ApproverType, Assignee, ConditionRule, DefinitionStatus, NodeType, PassMode, TaskResult,
    TaskStatus,
};
pub use pg_store::PgApprovalStore;
pub use store::{ApprovalChangeset, ApprovalStore, RemindScope};
pub use sweep::{run_once, spawn_sweeps};
