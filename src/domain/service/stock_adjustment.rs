use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    MaterialId, MovementSubType, NewStockMovement, OperatorId, StockMovement, StockMovementId,
    StockRecord, WarehouseId,
};
use crate::domain::port::{Logger, Session, StockMovementRepository, StockRecordRepository};
use crate::domain::service::StockLedger;

const COMPONENT: &str = "StockAdjustment";

/// 在庫調整サービス
/// 棚卸・振替・誤登録の取り消しを台帳経由で行う
pub struct StockAdjustment {
    ledger: Arc<dyn StockLedger>,
    logger: Arc<dyn Logger>,
}

impl StockAdjustment {
    pub fn new(ledger: Arc<dyn StockLedger>, logger: Arc<dyn Logger>) -> Self {
        Self { ledger, logger }
    }

    /// 棚卸数量を登録する
    ///
    /// 初期在庫が未設定なら INITIAL_STOCK_LOAD で基準値を設定し、
    /// 設定済みなら差分を INV_IN / INV_OUT として記録する
    ///
    /// # Returns
    /// * `Ok(StockRecord)` - 棚卸後の在庫レコード
    /// * `Err(DomainError)` - 棚卸数量が拘束数を下回る、または差分が無い
    pub async fn count_global_material_in_warehouse(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
        counted: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<StockRecord, DomainError> {
        if counted < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "棚卸数量は負にできません（{}）",
                counted
            )));
        }

        let record = session.lock_stock_record(warehouse_id, material_id).await?;
        let committed = record.committed_quantity();
        if counted < committed {
            self.logger.warn(
                COMPONENT,
                "Stock count below committed quantity",
                Some(record.id().as_uuid()),
                Some(count_context(&record, counted)),
            );
            return Err(DomainError::exceeded(
                format!(
                    "棚卸数量 {} が予約数 {} と制限数 {} の合計を下回っています",
                    counted,
                    record.reserved_quantity(),
                    record.restricted_quantity()
                ),
                committed,
            ));
        }
        if counted == record.physical_quantity() {
            return Err(DomainError::validation(format!(
                "棚卸数量 {} は現在の在庫数と同じため調整の必要がありません",
                counted
            )));
        }

        let (sub_type, quantity) = match record.initial_stock_quantity() {
            None => {
                let difference = counted - record.balance_in_minus_out();
                if difference >= Decimal::ZERO {
                    (MovementSubType::InitialStockLoad, difference)
                } else {
                    (MovementSubType::InvOut, -difference)
                }
            }
            Some(_) => {
                let difference = counted - record.physical_quantity();
                if difference > Decimal::ZERO {
                    (MovementSubType::InvIn, difference)
                } else {
                    (MovementSubType::InvOut, -difference)
                }
            }
        };

        self.ledger
            .record(
                session,
                NewStockMovement::new(warehouse_id, material_id, sub_type, quantity)
                    .by(operator_id),
            )
            .await?;

        let counted_record = self.show(session, warehouse_id, material_id).await?;
        let mut context = count_context(&counted_record, counted);
        context.insert("sub_type".to_string(), sub_type.to_string());
        self.logger.info(
            COMPONENT,
            "Stock counted",
            Some(counted_record.id().as_uuid()),
            Some(context),
        );
        Ok(counted_record)
    }

    /// 引当可能な在庫を別の資材に振り替える
    pub async fn reclassify(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
        from_material_id: MaterialId,
        to_material_id: MaterialId,
        quantity: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<Vec<StockMovement>, DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "振替数量は正の値である必要があります（{}）",
                quantity
            )));
        }
        if from_material_id == to_material_id {
            return Err(DomainError::validation(
                "振替元と振替先の資材が同じです".to_string(),
            ));
        }

        let outbound = self
            .ledger
            .record(
                session,
                NewStockMovement::new(
                    warehouse_id,
                    from_material_id,
                    MovementSubType::ReclassifyOut,
                    quantity,
                )
                .by(operator_id),
            )
            .await?;
        let inbound = self
            .ledger
            .record(
                session,
                NewStockMovement::new(
                    warehouse_id,
                    to_material_id,
                    MovementSubType::ReclassifyIn,
                    quantity,
                )
                .by(operator_id),
            )
            .await?;

        let mut context = HashMap::new();
        context.insert("warehouse_id".to_string(), warehouse_id.to_string());
        context.insert("from_material_id".to_string(), from_material_id.to_string());
        context.insert("to_material_id".to_string(), to_material_id.to_string());
        context.insert("quantity".to_string(), quantity.to_string());
        self.logger
            .info(COMPONENT, "Stock reclassified", None, Some(context));

        Ok(outbound.into_iter().chain(inbound).collect())
    }

    /// 誤って登録した単独の在庫移動を取り消す
    /// オーダーから発生した移動と引当・制限の移動は対象外
    pub async fn delete_movement(
        &self,
        session: &mut dyn Session,
        movement_id: StockMovementId,
    ) -> Result<StockMovement, DomainError> {
        let movement = session.find_movement(movement_id).await?.ok_or_else(|| {
            DomainError::not_found(format!("在庫移動 {} が見つかりません", movement_id))
        })?;
        if !movement.is_standalone() {
            return Err(DomainError::conflict(format!(
                "在庫移動 {} ({}) はオーダーから発生した移動のため直接削除できません",
                movement_id, movement.sub_type
            )));
        }

        let reversed = self.ledger.delete(session, movement_id).await?;

        let mut context = HashMap::new();
        context.insert("sub_type".to_string(), reversed.sub_type.to_string());
        context.insert("quantity".to_string(), reversed.quantity.to_string());
        self.logger.info(
            COMPONENT,
            "Stock movement deleted",
            Some(reversed.id.as_uuid()),
            Some(context),
        );
        Ok(reversed)
    }

    pub async fn show(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<StockRecord, DomainError> {
        session
            .find_stock_record(warehouse_id, material_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "倉庫 {} の資材 {} の在庫レコードが見つかりません",
                    warehouse_id, material_id
                ))
            })
    }

    pub async fn list_by_warehouse(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, DomainError> {
        Ok(session.list_stock_records_by_warehouse(warehouse_id).await?)
    }

    pub async fn list_movements(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Vec<StockMovement>, DomainError> {
        Ok(session.list_movements(warehouse_id, material_id).await?)
    }
}

fn count_context(record: &StockRecord, counted: Decimal) -> HashMap<String, String> {
    let mut context = HashMap::new();
    context.insert("warehouse_id".to_string(), record.warehouse_id().to_string());
    context.insert("material_id".to_string(), record.material_id().to_string());
    context.insert("counted".to_string(), counted.to_string());
    context.insert(
        "physical_quantity".to_string(),
        record.physical_quantity().to_string(),
    );
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::driven::{InMemorySessionFactory, TracingLogger};
    use crate::domain::model::{MovementOrigin, PickingOrderItemId};
    use crate::domain::port::SessionFactory;
    use crate::domain::service::MovementLedger;
    use rust_decimal_macros::dec;

    fn service() -> (StockAdjustment, Arc<dyn StockLedger>) {
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
        let ledger: Arc<dyn StockLedger> = Arc::new(MovementLedger::new(logger.clone()));
        (StockAdjustment::new(ledger.clone(), logger), ledger)
    }

    async fn seed(
        ledger: &Arc<dyn StockLedger>,
        session: &mut dyn Session,
        w: WarehouseId,
        m: MaterialId,
        sub_type: MovementSubType,
        quantity: Decimal,
    ) {
        ledger
            .record(session, NewStockMovement::new(w, m, sub_type, quantity))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_count_loads_initial_stock() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(4)).await;

        let record = service
            .count_global_material_in_warehouse(session.as_mut(), w, m, dec!(10), None)
            .await
            .unwrap();

        assert_eq!(record.initial_stock_quantity(), Some(dec!(6)));
        assert_eq!(record.physical_quantity(), dec!(10));
        assert!(record.last_stock_count_date().is_some());
    }

    #[tokio::test]
    async fn test_first_count_below_balance_records_inventory_out() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(10)).await;

        let record = service
            .count_global_material_in_warehouse(session.as_mut(), w, m, dec!(7), None)
            .await
            .unwrap();

        assert_eq!(record.initial_stock_quantity(), None);
        assert_eq!(record.physical_quantity(), dec!(7));
        let movements = session.list_movements(w, m).await.unwrap();
        assert_eq!(movements.last().unwrap().sub_type, MovementSubType::InvOut);
    }

    #[tokio::test]
    async fn test_later_count_records_difference() {
        let (service, _) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        service
            .count_global_material_in_warehouse(session.as_mut(), w, m, dec!(10), None)
            .await
            .unwrap();
        let record = service
            .count_global_material_in_warehouse(session.as_mut(), w, m, dec!(13), None)
            .await
            .unwrap();

        assert_eq!(record.initial_stock_quantity(), Some(dec!(10)));
        assert_eq!(record.balance_in_minus_out(), dec!(3));
        let movements = session.list_movements(w, m).await.unwrap();
        assert_eq!(movements.last().unwrap().sub_type, MovementSubType::InvIn);
    }

    #[tokio::test]
    async fn test_count_below_committed_is_rejected() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(10)).await;
        seed(&ledger, session.as_mut(), w, m, MovementSubType::ReserveForPickingOrder, dec!(4)).await;
        seed(&ledger, session.as_mut(), w, m, MovementSubType::RestrictForPaidItem, dec!(3)).await;

        let result = service
            .count_global_material_in_warehouse(session.as_mut(), w, m, dec!(6), None)
            .await;

        match result {
            Err(DomainError::ConsistencyViolation { ceiling, .. }) => {
                assert_eq!(ceiling, Some(dec!(7)))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_count_equal_to_stock_is_rejected() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(10)).await;

        let result = service
            .count_global_material_in_warehouse(session.as_mut(), w, m, dec!(10), None)
            .await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_reclassify_moves_free_stock() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, from, to) = (WarehouseId::new(), MaterialId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, from, MovementSubType::InCentral, dec!(5)).await;

        let movements = service
            .reclassify(session.as_mut(), w, from, to, dec!(2), None)
            .await
            .unwrap();
        assert_eq!(movements.len(), 2);

        let source = service.show(session.as_mut(), w, from).await.unwrap();
        let target = service.show(session.as_mut(), w, to).await.unwrap();
        assert_eq!(source.available_quantity(), dec!(3));
        assert_eq!(target.available_quantity(), dec!(2));

        let result = service
            .reclassify(session.as_mut(), w, from, to, dec!(4), None)
            .await;
        assert!(matches!(result, Err(DomainError::ConsistencyViolation { .. })));
    }

    #[tokio::test]
    async fn test_linked_movement_cannot_be_deleted_directly() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(5)).await;

        let linked = ledger
            .record(
                session.as_mut(),
                NewStockMovement::new(w, m, MovementSubType::ReserveForPickingOrder, dec!(2))
                    .with_origin(MovementOrigin::PickingOrderItem(PickingOrderItemId::new())),
            )
            .await
            .unwrap()
            .unwrap();

        let result = service.delete_movement(session.as_mut(), linked.id).await;
        assert!(matches!(result, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reservation_and_restriction_movements_cannot_be_deleted() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(5)).await;
        seed(&ledger, session.as_mut(), w, m, MovementSubType::ReserveForPickingOrder, dec!(2)).await;
        seed(&ledger, session.as_mut(), w, m, MovementSubType::RestrictForPaidItem, dec!(1)).await;
        let movements = service.list_movements(session.as_mut(), w, m).await.unwrap();

        for movement in &movements[1..] {
            let result = service.delete_movement(session.as_mut(), movement.id).await;
            assert!(matches!(result, Err(DomainError::Conflict(_))));
        }

        let record = service.show(session.as_mut(), w, m).await.unwrap();
        assert_eq!(record.reserved_quantity(), dec!(2));
        assert_eq!(record.restricted_quantity(), dec!(1));
    }

    #[tokio::test]
    async fn test_standalone_movement_is_reversed() {
        let (service, ledger) = service();
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());
        seed(&ledger, session.as_mut(), w, m, MovementSubType::InCentral, dec!(5)).await;
        let movements = service.list_movements(session.as_mut(), w, m).await.unwrap();

        service
            .delete_movement(session.as_mut(), movements[0].id)
            .await
            .unwrap();

        let record = service.show(session.as_mut(), w, m).await.unwrap();
        assert_eq!(record.physical_quantity(), dec!(0));
        assert!(service
            .list_movements(session.as_mut(), w, m)
            .await
            .unwrap()
            .is_empty());
    }
}
