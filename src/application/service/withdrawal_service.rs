use std::sync::Arc;

use crate::application::service::complete;
use crate::application::ApplicationError;
use crate::domain::model::{Withdrawal, WithdrawalId};
use crate::domain::port::{Logger, SessionFactory};
use crate::domain::service::{CreateWithdrawal, WithdrawalProcessor};

/// 出庫アプリケーションサービス
pub struct WithdrawalApplicationService {
    sessions: Arc<dyn SessionFactory>,
    processor: Arc<WithdrawalProcessor>,
    logger: Arc<dyn Logger>,
}

impl WithdrawalApplicationService {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        processor: Arc<WithdrawalProcessor>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            sessions,
            processor,
            logger,
        }
    }

    /// 単独の出庫を作成する（残量と倉庫在庫を検証する）
    pub async fn create(&self, command: CreateWithdrawal) -> Result<Withdrawal, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.create(session.as_mut(), command, false).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn update(
        &self,
        withdrawal_id: WithdrawalId,
        notes: Option<String>,
    ) -> Result<Withdrawal, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .processor
            .update(session.as_mut(), withdrawal_id, notes)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn delete(&self, withdrawal_id: WithdrawalId) -> Result<(), ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.delete(session.as_mut(), withdrawal_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn show(&self, withdrawal_id: WithdrawalId) -> Result<Withdrawal, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.show(session.as_mut(), withdrawal_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn list(&self) -> Result<Vec<Withdrawal>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.list(session.as_mut()).await;
        complete(session, result, self.logger.as_ref()).await
    }
}
