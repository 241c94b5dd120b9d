use std::sync::Arc;

use crate::application::service::complete;
use crate::application::ApplicationError;
use crate::domain::model::{Receipt, ReceiptId};
use crate::domain::port::{Logger, SessionFactory};
use crate::domain::service::{CreateReceipt, ReceiptProcessor, UpdateReceipt};

/// 入庫アプリケーションサービス
pub struct ReceiptApplicationService {
    sessions: Arc<dyn SessionFactory>,
    processor: Arc<ReceiptProcessor>,
    logger: Arc<dyn Logger>,
}

impl ReceiptApplicationService {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        processor: Arc<ReceiptProcessor>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            sessions,
            processor,
            logger,
        }
    }

    pub async fn create(&self, command: CreateReceipt) -> Result<Receipt, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.create(session.as_mut(), command).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn update(
        &self,
        receipt_id: ReceiptId,
        command: UpdateReceipt,
    ) -> Result<Receipt, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self
            .processor
            .update(session.as_mut(), receipt_id, command)
            .await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn delete(&self, receipt_id: ReceiptId) -> Result<(), ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.delete(session.as_mut(), receipt_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn show(&self, receipt_id: ReceiptId) -> Result<Receipt, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.show(session.as_mut(), receipt_id).await;
        complete(session, result, self.logger.as_ref()).await
    }

    pub async fn list(&self) -> Result<Vec<Receipt>, ApplicationError> {
        let mut session = self.sessions.begin().await?;
        let result = self.processor.list(session.as_mut()).await;
        complete(session, result, self.logger.as_ref()).await
    }
}
