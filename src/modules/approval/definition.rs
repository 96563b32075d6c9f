//! 审批定义与节点维护 / Approval definition and node maintenance

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{MdmError, MdmResult};
use crate::modules::approval::flow::{check_graph, validate_node};
use crate::modules::approval::model::{ApprovalDefinition, ApprovalNode, DefinitionStatus};
use crate::modules::approval::store::ApprovalStore;

pub struct DefinitionService {
    store: Arc<dyn ApprovalStore>,
}

impl DefinitionService {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self { store }
    }

    async fn require(&self, code: &str, version: i32) -> MdmResult<ApprovalDefinition> {
        self.store
            .get_definition(code, version)
            .await?
            .ok_or_else(|| MdmError::not_found("approval_definition", format!("{code} v{version}")))
    }

    /// 只有草稿版本允许编辑节点 / only draft versions accept node edits
    async fn require_draft(&self, code: &str, version: i32) -> MdmResult<ApprovalDefinition> {
        let def = self.require(code, version).await?;
        if def.status != DefinitionStatus::Draft {
            return Err(MdmError::state(format!(
                "审批定义 {} v{} 为 {}，不可编辑",
                code, version, def.status
            )));
        }
        Ok(def)
    }

    /// 新建定义，版本号从 1 开始 / create a definition at version 1
    pub async fn create_definition(
        &self,
        ctx: &RequestContext,
        code: &str,
        name: &str,
        entity_code: &str,
        form_schema: Option<Value>,
    ) -> MdmResult<ApprovalDefinition> {
        for (field, value) in [("code", code), ("entity_code", entity_code)] {
            if !v::is_identifier(value) {
                return Err(MdmError::validation(field, format!("'{}' 不是合法编码", value)));
            }
        }
        ctx.run("approval.definition.create", async {
            if self.store.latest_definition(code).await?.is_some() {
                return Err(MdmError::conflict(format!("审批定义 '{}' 已存在", code)));
            }
            let now = Utc::now().naive_utc();
            let mut def = ApprovalDefinition {
                id: 0,
                code: code.to_string(),
                name: name.to_string(),
                version: 1,
                entity_code: entity_code.to_string(),
                status: DefinitionStatus::Draft,
                form_schema,
                created_at: now,
                updated_at: now,
            };
            def.id = self.store.insert_definition(&def).await?;
            tracing::info!(code, entity = entity_code, user = %ctx.user_id, "approval definition created");
            Ok::<_, MdmError>(def)
        })
        .await
    }

    /// 新增或更新节点 / add or replace a node
    pub async fn save_node(&self, ctx: &RequestContext, mut node: ApprovalNode) -> MdmResult<ApprovalNode> {
        validate_node(&node)?;
        ctx.run("approval.definition.save_node", async {
            self.require_draft(&node.approval_def_code, node.version).await?;
            node.id = self.store.save_node(&node).await?;
            tracing::debug!(
                definition = %node.approval_def_code,
                version = node.version,
                node = %node.node_code,
                node_type = %node.node_type,
                "approval node saved"
            );
            Ok::<_, MdmError>(node)
        })
        .await
    }

    pub async fn remove_node(
        &self,
        ctx: &RequestContext,
        code: &str,
        version: i32,
        node_code: &str,
    ) -> MdmResult<()> {
        ctx.run("approval.definition.remove_node", async {
            self.require_draft(code, version).await?;
            if !self.store.delete_node(code, version, node_code).await? {
                return Err(MdmError::not_found("approval_node", node_code));
            }
            Ok::<_, MdmError>(())
        })
        .await
    }

    /// 校验节点图后启用，同编码的原启用版本被冻结
    /// Check the node graph, then activate; the previously active version is frozen
    pub async fn activate(&self, ctx: &RequestContext, code: &str, version: i32) -> MdmResult<()> {
        ctx.run("approval.definition.activate", async {
            let def = self.require(code, version).await?;
            match def.status {
                DefinitionStatus::Active => return Ok(()),
                DefinitionStatus::Deleted => {
                    return Err(MdmError::state(format!("审批定义 {} v{} 已删除", code, version)))
                }
                DefinitionStatus::Draft | DefinitionStatus::Frozen => {}
            }
            let nodes = self.store.list_nodes(code, version).await?;
            check_graph(&nodes)?;
            self.store.activate_definition(code, version).await?;
            tracing::info!(code, version, nodes = nodes.len(), "approval definition activated");
            Ok::<_, MdmError>(())
        })
        .await
    }

    /// 以最新版本为模板复制出新草稿版本 / copy the latest version into a new draft version
    pub async fn new_version(&self, ctx: &RequestContext, code: &str) -> MdmResult<ApprovalDefinition> {
        ctx.run("approval.definition.new_version", async {
            let latest = self
                .store
                .latest_definition(code)
                .await?
                .ok_or_else(|| MdmError::not_found("approval_definition", code))?;
            let now = Utc::now().naive_utc();
            let mut def = ApprovalDefinition {
                id: 0,
                version: latest.version + 1,
                status: DefinitionStatus::Draft,
                created_at: now,
                updated_at: now,
                ..latest.clone()
            };
            def.id = self.store.insert_definition(&def).await?;
            for node in self.store.list_nodes(code, latest.version).await? {
                let copy = ApprovalNode {
                    id: 0,
                    version: def.version,
                    ..node
                };
                self.store.save_node(&copy).await?;
            }
            tracing::info!(code, version = def.version, "approval definition version created");
            Ok::<_, MdmError>(def)
        })
        .await
    }

    pub async fn get(&self, ctx: &RequestContext, code: &str, version: i32) -> MdmResult<ApprovalDefinition> {
        ctx.run("approval.definition.get", self.require(code, version)).await
    }

    pub async fn nodes(&self, ctx: &RequestContext, code: &str, version: i32) -> MdmResult<Vec<ApprovalNode>> {
        ctx.run("approval.definition.nodes", self.store.list_nodes(code, version))
            .await
    }

    pub async fn active_for_entity(
        &self,
        ctx: &RequestContext,
        entity_code: &str,
    ) -> MdmResult<Option<ApprovalDefinition>> {
        ctx.run(
            "approval.definition.active_for_entity",
            self.store.active_definition(entity_code),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::approval::memory::MemoryApprovalStore;
    use crate::modules::approval::model::NodeType;

    fn service() -> DefinitionService {
        DefinitionService::new(Arc::new(MemoryApprovalStore::new()))
    }

    async fn linear(svc: &DefinitionService, ctx: &RequestContext, version: i32) {
        for (code, ty, order) in [
            ("start", NodeType::Start, 0),
            ("a1", NodeType::Approval, 1),
            ("end", NodeType::End, 9),
        ] {
            let mut n = ApprovalNode::new("goods_flow", version, code, ty, order);
            if ty == NodeType::Approval {
                n.approver_type = "USERS".into();
            }
            svc.save_node(ctx, n).await.unwrap();
        }
    }

    #[tokio::test]
    async fn activation_requires_a_valid_graph() {
        let svc = service();
        let ctx = RequestContext::new("admin", "管理员");
        svc.create_definition(&ctx, "goods_flow", "商品审批", "goods", None)
            .await
            .unwrap();
        let start = ApprovalNode::new("goods_flow", 1, "start", NodeType::Start, 0);
        svc.save_node(&ctx, start).await.unwrap();
        assert!(matches!(
            svc.activate(&ctx, "goods_flow", 1).await,
            Err(MdmError::Validation { .. })
        ));

        linear(&svc, &ctx, 1).await;
        svc.activate(&ctx, "goods_flow", 1).await.unwrap();
        let active = svc.active_for_entity(&ctx, "goods").await.unwrap().unwrap();
        assert_eq!(active.version, 1);

        let late = ApprovalNode::new("goods_flow", 1, "a2", NodeType::Approval, 2);
        assert!(matches!(svc.save_node(&ctx, late).await, Err(MdmError::State(_))));
    }

    #[tokio::test]
    async fn new_version_copies_nodes_and_freezes_previous_on_activation() {
        let svc = service();
        let ctx = RequestContext::new("admin", "管理员");
        svc.create_definition(&ctx, "goods_flow", "商品审批", "goods", None)
            .await
            .unwrap();
        linear(&svc, &ctx, 1).await;
        svc.activate(&ctx, "goods_flow", 1).await.unwrap();

        let v2 = svc.new_version(&ctx, "goods_flow").await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.status, DefinitionStatus::Draft);
        assert_eq!(svc.nodes(&ctx, "goods_flow", 2).await.unwrap().len(), 3);

        svc.activate(&ctx, "goods_flow", 2).await.unwrap();
        assert_eq!(
            svc.get(&ctx, "goods_flow", 1).await.unwrap().status,
            DefinitionStatus::Frozen
        );
        assert_eq!(svc.active_for_entity(&ctx, "goods").await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn invalid_approver_type_is_rejected_only_on_approval_nodes() {
        let svc = service();
        let ctx = RequestContext::new("admin", "管理员");
        svc.create_definition(&ctx, "goods_flow", "商品审批", "goods", None)
            .await
            .unwrap();
        let mut bad = ApprovalNode::new("goods_flow", 1, "a1", NodeType::Approval, 1);
        bad.approver_type = "MANAGERS".into();
        assert!(matches!(svc.save_node(&ctx, bad).await, Err(MdmError::Validation { .. })));

        let mut cc = ApprovalNode::new("goods_flow", 1, "cc1", NodeType::Cc, 2);
        cc.approver_type = "MANAGERS".into();
        assert!(svc.save_node(&ctx, cc).await.is_ok());
        svc.remove_node(&ctx, "goods_flow", 1, "cc1").await.unwrap();
        assert!(matches!(
            svc.remove_node(&ctx, "goods_flow", 1, "cc1").await,
            Err(MdmError::NotFound { .. })
        ));
    }
}
