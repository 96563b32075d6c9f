//! 动态实体读写 / Runtime entity access

pub mod change_log;
pub mod gateway;

pub use change_log::{diff_fields, ChangeLog, FieldChange, FieldDiff};
pub use gateway::{Entity, EntityGateway, EntityPage, PageLimits};
