use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    NewStockMovement, StockEffect, StockMovement, StockMovementId, StockRecord,
};
use crate::domain::port::{Logger, Session, StockMovementRepository, StockRecordRepository};

const COMPONENT: &str = "MovementLedger";

/// 在庫台帳トレイト
/// 在庫レコードへの唯一の書き込み経路
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// 在庫移動を記録し、作用を在庫レコードに適用する
    ///
    /// # Arguments
    /// * `session` - 実行中のセッション
    /// * `movement` - 記録する在庫移動
    ///
    /// # Returns
    /// * `Ok(Some(StockMovement))` - 記録された在庫移動
    /// * `Ok(None)` - 数量 0 のため記録しなかった
    /// * `Err(DomainError)` - 不変条件違反など
    async fn record(
        &self,
        session: &mut dyn Session,
        movement: NewStockMovement,
    ) -> Result<Option<StockMovement>, DomainError>;

    /// 在庫移動を取り消す
    /// 逆の作用を適用してから行を削除する
    async fn delete(
        &self,
        session: &mut dyn Session,
        movement_id: StockMovementId,
    ) -> Result<StockMovement, DomainError>;
}

/// 在庫台帳の実装
pub struct MovementLedger {
    logger: Arc<dyn Logger>,
}

impl MovementLedger {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }

    /// 作用を検証してから適用する
    /// 検証は排他取得したレコードの写しで行い、書き込みは行単位の増減のみ
    async fn apply(
        &self,
        session: &mut dyn Session,
        movement: &NewStockMovement,
        effect: &StockEffect,
    ) -> Result<StockRecord, DomainError> {
        let now = Utc::now();
        let current = session
            .lock_stock_record(movement.warehouse_id, movement.material_id)
            .await?;

        let mut projected = current.clone();
        let checked = projected
            .apply(effect, now)
            .and_then(|_| projected.check_invariants(effect));
        if let Err(err) = checked {
            let mut context = HashMap::new();
            context.insert("warehouse_id".to_string(), movement.warehouse_id.to_string());
            context.insert("material_id".to_string(), movement.material_id.to_string());
            context.insert("sub_type".to_string(), movement.sub_type.to_string());
            context.insert("quantity".to_string(), movement.quantity.to_string());
            context.insert("error".to_string(), err.to_string());
            self.logger
                .warn(COMPONENT, "Stock movement rejected", None, Some(context));
            return Err(err);
        }

        Ok(session.apply_stock_effect(current.id(), effect, now).await?)
    }
}

#[async_trait]
impl StockLedger for MovementLedger {
    async fn record(
        &self,
        session: &mut dyn Session,
        movement: NewStockMovement,
    ) -> Result<Option<StockMovement>, DomainError> {
        if movement.quantity < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "在庫移動の数量は負にできません（{} {}）",
                movement.sub_type, movement.quantity
            )));
        }
        if movement.quantity == Decimal::ZERO {
            return Ok(None);
        }

        let effect = movement.effect();
        let record = self.apply(session, &movement, &effect).await?;

        let movement = movement.into_movement(Utc::now());
        session.insert_movement(&movement).await?;

        let mut context = HashMap::new();
        context.insert("movement_id".to_string(), movement.id.to_string());
        context.insert("sub_type".to_string(), movement.sub_type.to_string());
        context.insert("quantity".to_string(), movement.quantity.to_string());
        context.insert(
            "available_quantity".to_string(),
            record.available_quantity().to_string(),
        );
        self.logger.debug(
            COMPONENT,
            "Stock movement recorded",
            Some(movement.id.as_uuid()),
            Some(context),
        );

        Ok(Some(movement))
    }

    async fn delete(
        &self,
        session: &mut dyn Session,
        movement_id: StockMovementId,
    ) -> Result<StockMovement, DomainError> {
        let movement = session.find_movement(movement_id).await?.ok_or_else(|| {
            DomainError::not_found(format!("在庫移動 {} が見つかりません", movement_id))
        })?;

        let reversal = NewStockMovement::new(
            movement.warehouse_id,
            movement.material_id,
            movement.sub_type,
            movement.quantity,
        );
        let effect = movement.effect().negated();
        self.apply(session, &reversal, &effect).await?;
        session.delete_movement(movement_id).await?;

        let mut context = HashMap::new();
        context.insert("sub_type".to_string(), movement.sub_type.to_string());
        context.insert("quantity".to_string(), movement.quantity.to_string());
        self.logger.debug(
            COMPONENT,
            "Stock movement reversed",
            Some(movement.id.as_uuid()),
            Some(context),
        );

        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::driven::{InMemorySessionFactory, TracingLogger};
    use crate::domain::model::{MaterialId, MovementSubType, WarehouseId};
    use crate::domain::port::SessionFactory;
    use rust_decimal_macros::dec;

    fn ledger() -> MovementLedger {
        MovementLedger::new(Arc::new(TracingLogger::new()))
    }

    #[tokio::test]
    async fn test_record_lazily_creates_stock_record() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        let movement = ledger()
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::InCentral, dec!(12))
                    .with_unit_price(Some(dec!(3))),
            )
            .await
            .unwrap();
        assert!(movement.is_some());

        let record = session.find_stock_record(w, m).await.unwrap().unwrap();
        assert_eq!(record.balance_in_minus_out(), dec!(12));
        assert_eq!(record.updated_cost(), Some(dec!(3)));
    }

    #[tokio::test]
    async fn test_zero_quantity_is_not_recorded() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        let movement = ledger()
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::ReserveForPickingOrder, dec!(0)),
            )
            .await
            .unwrap();

        assert!(movement.is_none());
        assert!(session.find_stock_record(w, m).await.unwrap().is_none());
        assert!(session.list_movements(w, m).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_negative_quantity_is_invalid() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let result = ledger()
            .record(
                session.as_mut(),
                NewStockMovement::new(
                    WarehouseId::new(),
                    MaterialId::new(),
                    MovementSubType::InCentral,
                    dec!(-1),
                ),
            )
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reservation_beyond_available_is_rejected() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let ledger = ledger();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::InCentral, dec!(5)),
            )
            .await
            .unwrap();
        let result = ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::ReserveForPickingOrder, dec!(6)),
            )
            .await;

        match result {
            Err(DomainError::ConsistencyViolation { ceiling, .. }) => {
                assert_eq!(ceiling, Some(dec!(5)))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let record = session.find_stock_record(w, m).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity(), dec!(0));
    }

    #[tokio::test]
    async fn test_release_below_zero_is_rejected() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let result = ledger()
            .record(
                session.as_mut(),
                NewStockMovement::new(
                    WarehouseId::new(),
                    MaterialId::new(),
                    MovementSubType::ReleasePaidRestriction,
                    dec!(1),
                ),
            )
            .await;
        assert!(matches!(result, Err(DomainError::ConsistencyViolation { .. })));
    }

    #[tokio::test]
    async fn test_delete_applies_negated_effect() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let ledger = ledger();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::InCentral, dec!(10)),
            )
            .await
            .unwrap();
        let reserve = ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::ReserveForPickingOrder, dec!(4)),
            )
            .await
            .unwrap()
            .unwrap();

        ledger.delete(session.as_mut(), reserve.id).await.unwrap();

        let record = session.find_stock_record(w, m).await.unwrap().unwrap();
        assert_eq!(record.reserved_quantity(), dec!(0));
        assert_eq!(record.available_quantity(), dec!(10));
        assert!(session.find_movement(reserve.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_inbound_is_rejected_when_stock_is_committed() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let ledger = ledger();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        let inbound = ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::InCentral, dec!(10)),
            )
            .await
            .unwrap()
            .unwrap();
        ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::RestrictForPaidItem, dec!(8)),
            )
            .await
            .unwrap();

        let result = ledger.delete(session.as_mut(), inbound.id).await;
        assert!(matches!(result, Err(DomainError::ConsistencyViolation { .. })));
    }

    #[tokio::test]
    async fn test_delete_unknown_movement() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let result = ledger()
            .delete(session.as_mut(), StockMovementId::new())
            .await;
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }
}
