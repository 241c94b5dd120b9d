use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::service::complete;
use crate::application::ApplicationError;
use crate::domain::model::{OperatorId, PickingOrder, PickingOrderId, PickingOrderStatus};
use crate::domain::port::{Logger, SessionFactory};
use crate::domain::service::{CreatePickingOrder, PickingOrderEngine, UpdatePickingOrder};

const COMPONENT: &str = "PickingOrderApplicationService";

/// 期限切れ処理の結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySummary {
    pub expired: usize,
    pub failed: usize,
}

/// ピッキングオーダーアプリケーションサービス
pub struct PickingOrderApplicationService {
    sessions: Arc<dyn SessionFactory>,
    engine: Arc<PickingOrderEngine>,
    logger: Arc<dyn Logger>,
}

impl PickingOrderApplicationService {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        engine: Arc<PickingOrderEngine>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            sessions,
            engine,
            logger,
        }
    }

    pub async fn create(
        &self,
        command: CreatePickingOrder,
    ) -> Result<PickingOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.create(session.as_mut(), command).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn update(
        &self,
        order_id: PickingOrderId,
        command: UpdatePickingOrder,
    ) -> Result<PickingOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.update(session.as_mut(), order_id, command).await;
        complete(session, result, self.logger.as_ref()).await
    }

    /// 取消・期限切れ・出庫完了・準備完了の一括操作
    pub async fn operation_in_picking_order(
        &self,
        order_id: PickingOrderId,
        operator_id: Option<OperatorId>,
        operation: PickingOrderStatus,
    ) -> Result<PickingOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .engine
            .operation_in_picking_order(session.as_mut(), order_id, operator_id, operation)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn delete(
        &self,
        order_id: PickingOrderId,
        operator_id: Option<OperatorId>,
    ) -> Result<(), ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.delete(session.as_mut(), order_id, operator_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn show(&self, order_id: PickingOrderId) -> Result<PickingOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.show(session.as_mut(), order_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn list(&self) -> Result<Vec<PickingOrder>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.list(session.as_mut()).await;
        complete(session, result, self.logger.as_ref()).await
    }

    /// 期限を過ぎたピッキングオーダーを期限切れにする
    /// オーダーごとに別のセッションで処理し、失敗は記録して続行する
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<ExpirySummary, ApplicationError> {
        let candidates = {
            let mut session = self.sessions.begin().await?;
            let result = self.engine.list_expirable(session.as_mut(), now).await;
            complete(session, result, self.logger.as_ref()).await?
        };

        let mut summary = ExpirySummary::default();
        for order_id in candidates {
            match self
                .operation_in_picking_order(order_id, None, PickingOrderStatus::Expired)
                .await
            {
                Ok(_) => summary.expired += 1,
                Err(err) => {
                    summary.failed += 1;
                    let mut context = HashMap::new();
                    context.insert("error".to_string(), err.to_string());
                    self.logger.error(
                        COMPONENT,
                        "Failed to expire picking order",
                        Some(order_id.as_uuid()),
                        Some(context),
                    );
                }
            }
        }

        let mut context = HashMap::new();
        context.insert("expired".to_string(), summary.expired.to_string());
        context.insert("failed".to_string(), summary.failed.to_string());
        self.logger
            .info(COMPONENT, "Expiry sweep finished", None, Some(context));
        Ok(summary)
    }
}
