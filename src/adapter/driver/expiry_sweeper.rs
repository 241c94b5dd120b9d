use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::application::service::{ExpirySummary, PickingOrderApplicationService};
use crate::application::ApplicationError;
use crate::domain::port::Logger;

const COMPONENT: &str = "ExpirySweeper";

/// 期限切れピッキングオーダーの定期掃除
/// 一定間隔で `expire_stale` を呼び出し、停止シグナルを受けたら終了する
pub struct ExpirySweeper {
    picking_orders: Arc<PickingOrderApplicationService>,
    interval: Duration,
    logger: Arc<dyn Logger>,
}

impl ExpirySweeper {
    /// # Arguments
    /// * `picking_orders` - ピッキングオーダーアプリケーションサービス
    /// * `interval` - 実行間隔
    /// * `logger` - ロガー
    pub fn new(
        picking_orders: Arc<PickingOrderApplicationService>,
        interval: Duration,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            picking_orders,
            interval,
            logger,
        }
    }

    /// 1回分の掃除を実行する
    pub async fn sweep_once(&self) -> Result<ExpirySummary, ApplicationError> {
        self.picking_orders.expire_stale(Utc::now()).await
    }

    /// 停止シグナルを受けるまで掃除を繰り返す
    /// 起動直後に1回目を実行する
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut context = HashMap::new();
        context.insert(
            "interval_secs".to_string(),
            self.interval.as_secs().to_string(),
        );
        self.logger
            .info(COMPONENT, "Expiry sweeper started", None, Some(context));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        let mut context = HashMap::new();
                        context.insert("error".to_string(), err.to_string());
                        self.logger
                            .error(COMPONENT, "Expiry sweep failed", None, Some(context));
                    }
                }
                changed = shutdown.changed() => {
                    // 送信側が破棄された場合も停止する
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.logger
            .info(COMPONENT, "Expiry sweeper stopped", None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::driven::{InMemorySessionFactory, TracingLogger};
    use crate::application::service::LedgerServices;
    use crate::domain::model::{MaterialId, PickingOrderItemInput, PickingOrderStatus, WarehouseId};
    use crate::domain::service::CreatePickingOrder;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn services(factory: &InMemorySessionFactory, ttl: chrono::Duration) -> LedgerServices {
        LedgerServices::new(
            Arc::new(factory.clone()),
            Arc::new(TracingLogger::new()),
            Some(ttl),
        )
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let factory = InMemorySessionFactory::new();
        let services = services(&factory, chrono::Duration::days(7));
        let sweeper = ExpirySweeper::new(
            Arc::new(services.picking_orders),
            Duration::from_secs(3600),
            Arc::new(TracingLogger::new()),
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_once_expires_orders_past_ttl() {
        let factory = InMemorySessionFactory::new();
        let warehouse_id = WarehouseId::new();
        let material_id = MaterialId::new();

        // 在庫を用意する（負の有効期間で作成直後から期限切れにする）
        let services = services(&factory, chrono::Duration::seconds(-1));
        services
            .stock
            .count_global_material_in_warehouse(warehouse_id, material_id, dec!(10), None)
            .await
            .unwrap();

        let order = services
            .picking_orders
            .create(
                CreatePickingOrder::new(
                    warehouse_id,
                    vec![PickingOrderItemInput::new(material_id, dec!(3))],
                ),
            )
            .await
            .unwrap();

        let picking_orders = Arc::new(services.picking_orders);
        let sweeper = ExpirySweeper::new(
            picking_orders.clone(),
            Duration::from_secs(3600),
            Arc::new(TracingLogger::new()),
        );
        let summary = sweeper.sweep_once().await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.failed, 0);

        let expired = picking_orders.show(order.id()).await.unwrap();
        assert_eq!(expired.status(), PickingOrderStatus::Expired);

        let record = services
            .stock
            .show(warehouse_id, material_id)
            .await
            .unwrap();
        assert_eq!(record.reserved_quantity(), Decimal::ZERO);
        assert_eq!(record.physical_quantity(), dec!(10));
    }
}
