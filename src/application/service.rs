// アプリケーションサービス
// 公開操作ごとにセッションを1つ開き、成功時に確定・失敗時に破棄する

mod picking_order_service;
mod receipt_service;
mod restriction_order_service;
mod stock_service;
mod withdrawal_service;

pub use picking_order_service::{ExpirySummary, PickingOrderApplicationService};
pub use receipt_service::ReceiptApplicationService;
pub use restriction_order_service::RestrictionOrderApplicationService;
pub use stock_service::StockApplicationService;
pub use withdrawal_service::WithdrawalApplicationService;

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use crate::application::ApplicationError;
use crate::domain::error::DomainError;
use crate::domain::port::{Logger, RepositoryError, Session, SessionFactory};
use crate::domain::service::{
    BalanceValidator, MaterialRequestBalanceValidator, MovementLedger, PickingOrderEngine,
    ReceiptProcessor, RestrictionOrderEngine, StockAdjustment, StockLedger, WithdrawalProcessor,
};

const COMPONENT: &str = "ApplicationService";

/// エンジンの結果に応じてセッションを確定または破棄する
/// 破棄に失敗した場合はログに残し、元のエラーを返す
pub(crate) async fn complete<T>(
    session: Box<dyn Session>,
    result: Result<T, DomainError>,
    logger: &dyn Logger,
) -> Result<T, ApplicationError> {
    match result {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            let rolled_back = session.rollback().await;
            Err(rollback_failed(err, rolled_back, logger))
        }
    }
}

fn rollback_failed(
    err: DomainError,
    rolled_back: Result<(), RepositoryError>,
    logger: &dyn Logger,
) -> ApplicationError {
    if let Err(rollback_err) = rolled_back {
        let mut context = HashMap::new();
        context.insert("error".to_string(), rollback_err.to_string());
        context.insert("cause".to_string(), err.to_string());
        logger.error(
            COMPONENT,
            "Failed to roll back session",
            None,
            Some(context),
        );
    }
    err.into()
}

/// 在庫台帳のアプリケーションサービス一式
/// エンジン間の依存関係をここで組み立てる
pub struct LedgerServices {
    pub picking_orders: PickingOrderApplicationService,
    pub restriction_orders: RestrictionOrderApplicationService,
    pub withdrawals: WithdrawalApplicationService,
    pub receipts: ReceiptApplicationService,
    pub stock: StockApplicationService,
}

impl LedgerServices {
    /// # Arguments
    /// * `sessions` - セッションファクトリ
    /// * `logger` - ロガー
    /// * `picking_order_ttl` - ピッキングオーダーの有効期間（None なら期限なし）
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        logger: Arc<dyn Logger>,
        picking_order_ttl: Option<Duration>,
    ) -> Self {
        let ledger: Arc<dyn StockLedger> = Arc::new(MovementLedger::new(logger.clone()));
        let validator: Arc<dyn BalanceValidator> =
            Arc::new(MaterialRequestBalanceValidator::new(logger.clone()));
        let restriction_engine = Arc::new(RestrictionOrderEngine::new(
            ledger.clone(),
            validator.clone(),
            logger.clone(),
        ));
        let withdrawal_processor = Arc::new(WithdrawalProcessor::new(
            ledger.clone(),
            validator.clone(),
            restriction_engine.clone(),
            logger.clone(),
        ));
        let picking_engine = Arc::new(PickingOrderEngine::new(
            ledger.clone(),
            validator,
            restriction_engine.clone(),
            withdrawal_processor.clone(),
            logger.clone(),
            picking_order_ttl,
        ));
        let receipt_processor = Arc::new(ReceiptProcessor::new(
            ledger.clone(),
            restriction_engine.clone(),
            logger.clone(),
        ));
        let stock_adjustment = Arc::new(StockAdjustment::new(ledger, logger.clone()));

        Self {
            picking_orders: PickingOrderApplicationService::new(
                sessions.clone(),
                picking_engine,
                logger.clone(),
            ),
            restriction_orders: RestrictionOrderApplicationService::new(
                sessions.clone(),
                restriction_engine,
                logger.clone(),
            ),
            withdrawals: WithdrawalApplicationService::new(
                sessions.clone(),
                withdrawal_processor,
                logger.clone(),
            ),
            receipts: ReceiptApplicationService::new(
                sessions.clone(),
                receipt_processor,
                logger.clone(),
            ),
            stock: StockApplicationService::new(sessions, stock_adjustment, logger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// 出力されたログを記録するロガー
    #[derive(Default)]
    struct RecordingLogger {
        errors: Mutex<Vec<(String, HashMap<String, String>)>>,
    }

    impl Logger for RecordingLogger {
        fn debug(&self, _: &str, _: &str, _: Option<Uuid>, _: Option<HashMap<String, String>>) {}

        fn info(&self, _: &str, _: &str, _: Option<Uuid>, _: Option<HashMap<String, String>>) {}

        fn warn(&self, _: &str, _: &str, _: Option<Uuid>, _: Option<HashMap<String, String>>) {}

        fn error(
            &self,
            _: &str,
            message: &str,
            _: Option<Uuid>,
            context: Option<HashMap<String, String>>,
        ) {
            self.errors
                .lock()
                .unwrap()
                .push((message.to_string(), context.unwrap_or_default()));
        }
    }

    #[test]
    fn test_failed_rollback_is_logged_and_original_error_returned() {
        let logger = RecordingLogger::default();

        let err = rollback_failed(
            DomainError::conflict("在庫が不足しています"),
            Err(RepositoryError::ConnectionFailed("接続が切れました".to_string())),
            &logger,
        );

        assert!(matches!(err, ApplicationError::Conflict(_)));
        let errors = logger.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "Failed to roll back session");
        assert!(errors[0].1["error"].contains("接続が切れました"));
        assert!(errors[0].1["cause"].contains("在庫が不足しています"));
    }

    #[test]
    fn test_successful_rollback_logs_nothing() {
        let logger = RecordingLogger::default();

        let err = rollback_failed(DomainError::validation("数量が不正です"), Ok(()), &logger);

        assert!(matches!(err, ApplicationError::Validation(_)));
        assert!(logger.errors.lock().unwrap().is_empty());
    }
}
