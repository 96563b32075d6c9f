use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, instrument};
use v::{HealthCheck, HealthStatus};

use crate::conf::Settings;
use crate::context::RequestContext;
use crate::error::MdmResult;
use crate::modules::approval::{
    spawn_sweeps, ApprovalEngine, DefinitionService, EntityGovernor, GatewayPublisher,
    LogNotificationQueue, PgApprovalStore, StaticDirectory,
};
use crate::modules::entity::{EntityGateway, PageLimits};
use crate::modules::schema::{FieldCatalog, PgCatalogStore, SchemaCompiler};

/// 应用上下文：启动时显式构造，关闭时释放连接池
/// Application context, built explicitly at startup and closed at shutdown
pub struct AppContext {
    pub settings: Settings,
    pub pool: PgPool,
    pub catalog: Arc<FieldCatalog>,
    pub compiler: SchemaCompiler,
    pub gateway: Arc<EntityGateway>,
    pub definitions: DefinitionService,
    pub engine: Arc<ApprovalEngine>,
    pub governor: EntityGovernor,
    catalog_store: Arc<PgCatalogStore>,
    approval_store: Arc<PgApprovalStore>,
}

impl AppContext {
    /// 建立连接池并装配各组件 / connect and wire every component
    #[instrument(skip(settings))]
    pub async fn open(settings: Settings) -> anyhow::Result<Self> {
        let pool = v::connect(&settings.database)
            .await
            .context("连接数据库失败")?;

        let catalog_store = Arc::new(PgCatalogStore::new(pool.clone()));
        let catalog = Arc::new(FieldCatalog::new(
            catalog_store.clone(),
            Duration::from_secs(settings.schema.descriptor_ttl_secs),
        ));
        let compiler = SchemaCompiler::new(pool.clone(), catalog.clone());
        let limits = PageLimits {
            default_size: settings.approval.default_page_size,
            max_size: settings.approval.max_page_size,
        };
        let gateway = Arc::new(EntityGateway::new(pool.clone(), catalog.clone(), limits));

        let approval_store = Arc::new(PgApprovalStore::new(pool.clone()));
        let definitions = DefinitionService::new(approval_store.clone());
        // TODO: 接入组织架构服务后替换静态目录，角色、部门与上级目前只能解析为空
        let engine = Arc::new(ApprovalEngine::new(
            approval_store.clone(),
            Arc::new(StaticDirectory::new()),
            Arc::new(LogNotificationQueue),
            Arc::new(GatewayPublisher::new(gateway.clone())),
            settings.approval.clone(),
        ));
        let governor = EntityGovernor::new(gateway.clone(), engine.clone());

        info!(db = %settings.database.name, "application context opened");
        Ok(Self {
            settings,
            pool,
            catalog,
            compiler,
            gateway,
            definitions,
            engine,
            governor,
            catalog_store,
            approval_store,
        })
    }

    /// 创建目录、审批与变更记录系统表 / create catalog, approval and change-log system tables
    pub async fn init_system_tables(&self) -> MdmResult<()> {
        self.catalog_store.init_tables().await?;
        self.approval_store.init_tables().await?;
        self.gateway.changes().init_tables().await?;
        info!("system tables ready");
        Ok(())
    }

    /// 带默认超时的请求上下文 / request context carrying the default timeout
    pub fn request(&self, user_id: &str, user_name: &str) -> RequestContext {
        RequestContext::new(user_id, user_name)
            .with_timeout(Duration::from_millis(self.settings.request.default_timeout_ms))
    }

    /// 运行后台扫描直到收到 Ctrl-C / run the sweeps until Ctrl-C
    pub async fn serve(&self) -> anyhow::Result<()> {
        let health = self.check_health().await;
        if !health.healthy {
            anyhow::bail!(
                "{} 不可用: {}",
                health.component,
                health.message.unwrap_or_default()
            );
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = spawn_sweeps(self.engine.clone(), &self.settings.approval, shutdown_rx);
        info!("vmdm running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("等待退出信号失败")?;
        info!("shutdown signal received");
        shutdown_tx.send(true).ok();
        for handle in handles {
            handle.await.ok();
        }
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
        info!("application context closed");
    }
}

#[async_trait::async_trait]
impl HealthCheck for AppContext {
    async fn check_health(&self) -> HealthStatus {
        self.pool.check_health().await
    }
}
