use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::MdmError;

/// 请求上下文：操作人与截止时间 / Request context: actor and deadline
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: String,
    pub user_name: String,
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            deadline: None,
        }
    }

    /// 后台任务使用的系统身份 / system identity used by sweeps
    pub fn system() -> Self {
        Self::new("system", "system")
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// 在截止时间内执行存储调用 / run a storage call within the deadline
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T, MdmError>
    where
        F: Future<Output = Result<T, MdmError>>,
    {
        v::with_deadline(self.deadline, operation, fut).await
    }
}
