use thiserror::Error;
use v::{ConditionError, DbError};

/// 统一的领域错误类型
#[derive(Error, Debug)]
pub enum MdmError {
    #[error("资源未找到: {entity} {key}")]
    NotFound { entity: String, key: String },

    #[error("验证错误: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("冲突: {0}")]
    Conflict(String),

    #[error("迁移失败: {table}: {message}")]
    Migration { table: String, message: String },

    #[error("状态错误: {0}")]
    State(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("超时错误: {operation}")]
    Timeout { operation: String },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(DbError),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MdmError {
    pub fn not_found<E: Into<String>, K: ToString>(entity: E, key: K) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    /// 创建验证错误
    pub fn validation<T: Into<String>, U: Into<String>>(field: T, message: U) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict<T: Into<String>>(message: T) -> Self {
        Self::Conflict(message.into())
    }

    pub fn state<T: Into<String>>(message: T) -> Self {
        Self::State(message.into())
    }

    pub fn migration<T: Into<String>, U: ToString>(table: T, message: U) -> Self {
        Self::Migration {
            table: table.into(),
            message: message.to_string(),
        }
    }

    pub fn permission<T: Into<String>>(message: T) -> Self {
        Self::Permission(message.into())
    }

    /// 对调用方而言属于冲突（含任务状态冲突）
    /// Reported to callers as a conflict, task state errors included
    pub fn is_conflict(&self) -> bool {
        matches!(self, MdmError::Conflict(_) | MdmError::State(_))
    }

    /// 获取错误代码
    pub fn error_code(&self) -> i32 {
        match self {
            MdmError::Config(_) => 1001,
            MdmError::Permission(_) => 1003,
            MdmError::Validation { .. } => 1004,
            MdmError::Database(_) => 1006,
            MdmError::Timeout { .. } => 1008,
            MdmError::NotFound { .. } => 1009,
            MdmError::Conflict(_) => 1010,
            MdmError::State(_) => 1011,
            MdmError::Migration { .. } => 1012,
            MdmError::Serialization(_) => 1013,
        }
    }
}

impl From<DbError> for MdmError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Timeout(operation) => MdmError::Timeout { operation },
            DbError::NotFound => MdmError::not_found("record", ""),
            DbError::Condition(c) => MdmError::from(c),
            DbError::Value { column, message } => MdmError::Validation {
                field: column,
                message,
            },
            DbError::Config(msg) => MdmError::Config(msg),
            DbError::Serde(e) => MdmError::Serialization(e),
            other if other.is_unique_violation() => MdmError::Conflict(other.to_string()),
            other => MdmError::Database(other),
        }
    }
}

impl From<sqlx::Error> for MdmError {
    fn from(e: sqlx::Error) -> Self {
        MdmError::from(DbError::from(e))
    }
}

impl From<ConditionError> for MdmError {
    fn from(e: ConditionError) -> Self {
        MdmError::Validation {
            field: e.field().to_string(),
            message: e.to_string(),
        }
    }
}

/// 领域结果类型
pub type MdmResult<T> = Result<T, MdmError>;
