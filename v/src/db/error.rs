use thiserror::Error;

use crate::db::condition::ConditionError;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("配置错误: {0}")]
    Config(String),
    #[error("连接池错误: {0}")]
    Pool(String),
    #[error("SQLx 错误: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("未找到记录")]
    NotFound,
    #[error("事务错误: {0}")]
    Tx(String),
    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("条件错误: {0}")]
    Condition(#[from] ConditionError),
    #[error("列值错误: {column}: {message}")]
    Value { column: String, message: String },
    #[error("操作超时: {0}")]
    Timeout(String),
}

impl DbError {
    /// PostgreSQL SQLSTATE（若有）/ PostgreSQL SQLSTATE if any
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            DbError::Sqlx(e) => sqlstate(e),
            _ => None,
        }
    }

    /// 表不存在（42P01）/ undefined table
    pub fn is_undefined_table(&self) -> bool {
        self.sqlstate().as_deref() == Some("42P01")
    }

    /// 唯一约束冲突（23505）/ unique violation
    pub fn is_unique_violation(&self) -> bool {
        self.sqlstate().as_deref() == Some("23505")
    }
}

pub fn sqlstate(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}
