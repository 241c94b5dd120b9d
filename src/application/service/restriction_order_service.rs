use rust_decimal::Decimal;
use std::sync::Arc;

use crate::application::service::complete;
use crate::application::ApplicationError;
use crate::domain::model::{
    OperatorId, RestrictionOrder, RestrictionOrderId, RestrictionOrderItemId,
};
use crate::domain::port::{Logger, SessionFactory};
use crate::domain::service::{
    CreateRestrictionOrder, RestrictionOrderEngine, UpdateRestrictionOrder,
};

/// 制限オーダーアプリケーションサービス
pub struct RestrictionOrderApplicationService {
    sessions: Arc<dyn SessionFactory>,
    engine: Arc<RestrictionOrderEngine>,
    logger: Arc<dyn Logger>,
}

impl RestrictionOrderApplicationService {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        engine: Arc<RestrictionOrderEngine>,
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
        command: CreateRestrictionOrder,
    ) -> Result<RestrictionOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.create(session.as_mut(), command).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn update(
        &self,
        order_id: RestrictionOrderId,
        command: UpdateRestrictionOrder,
    ) -> Result<RestrictionOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.update(session.as_mut(), order_id, command).await;
        complete(session, result, self.logger.as_ref()).await
    }

    /// 明細1件の制限数を変更する
    pub async fn update_item(
        &self,
        order_id: RestrictionOrderId,
        item_id: RestrictionOrderItemId,
        quantity_restricted: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<RestrictionOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .engine
            .update_item(
                session.as_mut(),
                order_id,
                item_id,
                quantity_restricted,
                operator_id,
            )
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn delete(
        &self,
        order_id: RestrictionOrderId,
        operator_id: Option<OperatorId>,
    ) -> Result<(), ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.delete(session.as_mut(), order_id, operator_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn show(
        &self,
        order_id: RestrictionOrderId,
    ) -> Result<RestrictionOrder, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.show(session.as_mut(), order_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn list(&self) -> Result<Vec<RestrictionOrder>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.engine.list(session.as_mut()).await;
        complete(session, result, self.logger.as_ref()).await
    }
}
