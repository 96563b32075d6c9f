/// 模块管理
/// schema：字段目录与表结构迁移；entity：动态实体读写；approval：审批定义、实例与任务
pub mod approval;
pub mod entity;
pub mod schema;
