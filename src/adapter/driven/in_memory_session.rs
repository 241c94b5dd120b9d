use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::model::{
    MaintenanceRequestId, MaterialId, MaterialRequest, MaterialRequestId, MovementOrigin,
    PickingOrder, PickingOrderId, Receipt, ReceiptId, RestrictionOrder, RestrictionOrderId,
    StockEffect, StockMovement, StockMovementId, StockRecord, StockRecordId, WarehouseId,
    Withdrawal, WithdrawalId,
};
use crate::domain::port::{
    MaterialRequestRepository, PickingOrderRepository, ReceiptRepository, RepositoryError,
    RestrictionOrderRepository, SequenceGenerator, Session, SessionFactory,
    StockMovementRepository, StockRecordRepository, WithdrawalRepository,
};

/// インメモリストアの内容
#[derive(Debug, Clone, Default)]
struct StoreState {
    stock_records: HashMap<(WarehouseId, MaterialId), StockRecord>,
    movements: Vec<StockMovement>,
    sequences: HashMap<String, i64>,
    material_requests: HashMap<MaterialRequestId, MaterialRequest>,
    picking_orders: HashMap<PickingOrderId, PickingOrder>,
    restriction_orders: HashMap<RestrictionOrderId, RestrictionOrder>,
    withdrawals: HashMap<WithdrawalId, Withdrawal>,
    receipts: HashMap<ReceiptId, Receipt>,
}

impl StoreState {
    /// 削除された明細を参照する在庫移動の紐付けを外す
    fn detach_origins(&mut self, origins: &[MovementOrigin]) {
        for movement in self.movements.iter_mut() {
            if origins.contains(&movement.origin) {
                movement.origin = MovementOrigin::None;
            }
        }
    }
}

/// インメモリセッションファクトリ
/// セッションは同時に1つだけ開かれ、確定時に作業コピーで置き換える
#[derive(Clone, Default)]
pub struct InMemorySessionFactory {
    state: Arc<Mutex<StoreState>>,
}

impl InMemorySessionFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionFactory for InMemorySessionFactory {
    async fn begin(&self) -> Result<Box<dyn Session>, RepositoryError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemorySession { guard, working }))
    }
}

/// インメモリセッション
pub struct InMemorySession {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    items
}

#[async_trait]
impl StockRecordRepository for InMemorySession {
    async fn lock_stock_record(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<StockRecord, RepositoryError> {
        Ok(self
            .working
            .stock_records
            .entry((warehouse_id, material_id))
            .or_insert_with(|| StockRecord::new(warehouse_id, material_id))
            .clone())
    }

    async fn find_stock_record(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Option<StockRecord>, RepositoryError> {
        Ok(self
            .working
            .stock_records
            .get(&(warehouse_id, material_id))
            .cloned())
    }

    async fn list_stock_records_by_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, RepositoryError> {
        let mut records = self
            .working
            .stock_records
            .values()
            .filter(|record| record.warehouse_id() == warehouse_id)
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by_key(|record| record.material_id());
        Ok(records)
    }

    async fn apply_stock_effect(
        &mut self,
        record_id: StockRecordId,
        effect: &StockEffect,
        at: DateTime<Utc>,
    ) -> Result<StockRecord, RepositoryError> {
        let record = self
            .working
            .stock_records
            .values_mut()
            .find(|record| record.id() == record_id)
            .ok_or_else(|| {
                RepositoryError::OperationFailed(format!(
                    "在庫レコード {} が見つかりません",
                    record_id
                ))
            })?;
        record
            .apply(effect, at)
            .map_err(|e| RepositoryError::OperationFailed(e.to_string()))?;
        Ok(record.clone())
    }
}

#[async_trait]
impl StockMovementRepository for InMemorySession {
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), RepositoryError> {
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn find_movement(
        &mut self,
        movement_id: StockMovementId,
    ) -> Result<Option<StockMovement>, RepositoryError> {
        Ok(self
            .working
            .movements
            .iter()
            .find(|movement| movement.id == movement_id)
            .cloned())
    }

    async fn delete_movement(
        &mut self,
        movement_id: StockMovementId,
    ) -> Result<(), RepositoryError> {
        self.working
            .movements
            .retain(|movement| movement.id != movement_id);
        Ok(())
    }

    async fn list_movements(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        Ok(self
            .working
            .movements
            .iter()
            .filter(|m| m.warehouse_id == warehouse_id && m.material_id == material_id)
            .cloned()
            .collect())
    }

    async fn list_movements_by_origin(
        &mut self,
        origin: MovementOrigin,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        if origin.is_none() {
            return Ok(Vec::new());
        }
        Ok(self
            .working
            .movements
            .iter()
            .filter(|movement| movement.origin == origin)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SequenceGenerator for InMemorySession {
    async fn next_sequence(&mut self, name: &str) -> Result<i64, RepositoryError> {
        let value = self.working.sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[async_trait]
impl MaterialRequestRepository for InMemorySession {
    async fn find_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Option<MaterialRequest>, RepositoryError> {
        Ok(self.working.material_requests.get(&request_id).cloned())
    }

    async fn save_material_request(
        &mut self,
        request: &MaterialRequest,
    ) -> Result<(), RepositoryError> {
        self.working
            .material_requests
            .insert(request.id, request.clone());
        Ok(())
    }
}

#[async_trait]
impl PickingOrderRepository for InMemorySession {
    async fn find_picking_order(
        &mut self,
        order_id: PickingOrderId,
    ) -> Result<Option<PickingOrder>, RepositoryError> {
        Ok(self.working.picking_orders.get(&order_id).cloned())
    }

    async fn list_picking_orders(&mut self) -> Result<Vec<PickingOrder>, RepositoryError> {
        Ok(newest_first(
            self.working.picking_orders.values().cloned().collect(),
            PickingOrder::created_at,
        ))
    }

    async fn list_picking_orders_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Vec<PickingOrder>, RepositoryError> {
        Ok(newest_first(
            self.working
                .picking_orders
                .values()
                .filter(|order| order.material_request_id() == Some(request_id))
                .cloned()
                .collect(),
            PickingOrder::created_at,
        ))
    }

    async fn list_expirable_picking_orders(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PickingOrder>, RepositoryError> {
        Ok(newest_first(
            self.working
                .picking_orders
                .values()
                .filter(|order| !order.status().is_terminal() && order.is_expired_at(now))
                .cloned()
                .collect(),
            PickingOrder::created_at,
        ))
    }

    async fn save_picking_order(&mut self, order: &PickingOrder) -> Result<(), RepositoryError> {
        self.working
            .picking_orders
            .insert(order.id(), order.clone());
        Ok(())
    }

    async fn delete_picking_order(
        &mut self,
        order_id: PickingOrderId,
    ) -> Result<(), RepositoryError> {
        if let Some(order) = self.working.picking_orders.remove(&order_id) {
            let origins = order
                .items()
                .iter()
                .map(|item| MovementOrigin::PickingOrderItem(item.id))
                .collect::<Vec<_>>();
            self.working.detach_origins(&origins);
        }
        Ok(())
    }

    async fn count_picking_orders_by_maintenance_request(
        &mut self,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError> {
        Ok(self
            .working
            .picking_orders
            .values()
            .filter(|order| order.maintenance_request_id() == Some(maintenance_request_id))
            .count() as u64)
    }
}

#[async_trait]
impl RestrictionOrderRepository for InMemorySession {
    async fn find_restriction_order(
        &mut self,
        order_id: RestrictionOrderId,
    ) -> Result<Option<RestrictionOrder>, RepositoryError> {
        Ok(self.working.restriction_orders.get(&order_id).cloned())
    }

    async fn find_restriction_order_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Option<RestrictionOrder>, RepositoryError> {
        Ok(self
            .working
            .restriction_orders
            .values()
            .find(|order| order.material_request_id() == request_id)
            .cloned())
    }

    async fn list_restriction_orders(&mut self) -> Result<Vec<RestrictionOrder>, RepositoryError> {
        Ok(newest_first(
            self.working.restriction_orders.values().cloned().collect(),
            RestrictionOrder::created_at,
        ))
    }

    async fn save_restriction_order(
        &mut self,
        order: &RestrictionOrder,
    ) -> Result<(), RepositoryError> {
        let duplicate = self.working.restriction_orders.values().any(|existing| {
            existing.id() != order.id()
                && existing.material_request_id() == order.material_request_id()
        });
        if duplicate {
            return Err(RepositoryError::ConstraintViolation(format!(
                "資材要求 {} には既に制限オーダーがあります",
                order.material_request_id()
            )));
        }
        self.working
            .restriction_orders
            .insert(order.id(), order.clone());
        Ok(())
    }

    async fn delete_restriction_order(
        &mut self,
        order_id: RestrictionOrderId,
    ) -> Result<(), RepositoryError> {
        if let Some(order) = self.working.restriction_orders.remove(&order_id) {
            let origins = order
                .items()
                .iter()
                .map(|item| MovementOrigin::RestrictionOrderItem(item.id))
                .collect::<Vec<_>>();
            self.working.detach_origins(&origins);
        }
        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for InMemorySession {
    async fn find_withdrawal(
        &mut self,
        withdrawal_id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, RepositoryError> {
        Ok(self.working.withdrawals.get(&withdrawal_id).cloned())
    }

    async fn list_withdrawals(&mut self) -> Result<Vec<Withdrawal>, RepositoryError> {
        Ok(newest_first(
            self.working.withdrawals.values().cloned().collect(),
            Withdrawal::created_at,
        ))
    }

    async fn list_withdrawals_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Vec<Withdrawal>, RepositoryError> {
        Ok(newest_first(
            self.working
                .withdrawals
                .values()
                .filter(|withdrawal| withdrawal.material_request_id() == Some(request_id))
                .cloned()
                .collect(),
            Withdrawal::created_at,
        ))
    }

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), RepositoryError> {
        self.working
            .withdrawals
            .insert(withdrawal.id(), withdrawal.clone());
        Ok(())
    }

    async fn count_withdrawals_by_maintenance_request(
        &mut self,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError> {
        Ok(self
            .working
            .withdrawals
            .values()
            .filter(|withdrawal| {
                withdrawal.maintenance_request_id() == Some(maintenance_request_id)
            })
            .count() as u64)
    }
}

#[async_trait]
impl ReceiptRepository for InMemorySession {
    async fn find_receipt(
        &mut self,
        receipt_id: ReceiptId,
    ) -> Result<Option<Receipt>, RepositoryError> {
        Ok(self.working.receipts.get(&receipt_id).cloned())
    }

    async fn list_receipts(&mut self) -> Result<Vec<Receipt>, RepositoryError> {
        Ok(newest_first(
            self.working.receipts.values().cloned().collect(),
            Receipt::created_at,
        ))
    }

    async fn list_receipts_by_material_request_and_warehouse(
        &mut self,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<Receipt>, RepositoryError> {
        Ok(newest_first(
            self.working
                .receipts
                .values()
                .filter(|receipt| {
                    receipt.material_request_id() == Some(request_id)
                        && receipt.warehouse_id() == warehouse_id
                })
                .cloned()
                .collect(),
            Receipt::created_at,
        ))
    }

    async fn save_receipt(&mut self, receipt: &Receipt) -> Result<(), RepositoryError> {
        self.working.receipts.insert(receipt.id(), receipt.clone());
        Ok(())
    }

    async fn delete_receipt(&mut self, receipt_id: ReceiptId) -> Result<(), RepositoryError> {
        if let Some(receipt) = self.working.receipts.remove(&receipt_id) {
            let origins = receipt
                .items()
                .iter()
                .map(|item| MovementOrigin::ReceiptItem(item.id))
                .collect::<Vec<_>>();
            self.working.detach_origins(&origins);
        }
        Ok(())
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let InMemorySession { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MaterialRequestItem;
    use rust_decimal_macros::dec;

    fn request() -> MaterialRequest {
        MaterialRequest::new(
            "MR-1",
            WarehouseId::new(),
            None,
            vec![MaterialRequestItem::new(MaterialId::new(), dec!(5))],
        )
    }

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let factory = InMemorySessionFactory::new();
        let request = request();

        let mut session = factory.begin().await.unwrap();
        session.save_material_request(&request).await.unwrap();
        session.commit().await.unwrap();

        let mut session = factory.begin().await.unwrap();
        assert!(session
            .find_material_request(request.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let factory = InMemorySessionFactory::new();
        let request = request();

        let mut session = factory.begin().await.unwrap();
        session.save_material_request(&request).await.unwrap();
        session.next_sequence("receipt").await.unwrap();
        session.rollback().await.unwrap();

        let mut session = factory.begin().await.unwrap();
        assert!(session
            .find_material_request(request.id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(session.next_sequence("receipt").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sequences_are_independent() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        assert_eq!(session.next_sequence("picking_order").await.unwrap(), 1);
        assert_eq!(session.next_sequence("picking_order").await.unwrap(), 2);
        assert_eq!(session.next_sequence("withdrawal").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lock_creates_record_once() {
        let factory = InMemorySessionFactory::new();
        let mut session = factory.begin().await.unwrap();
        let (w, m) = (WarehouseId::new(), MaterialId::new());

        let first = session.lock_stock_record(w, m).await.unwrap();
        let second = session.lock_stock_record(w, m).await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(
            session.list_stock_records_by_warehouse(w).await.unwrap().len(),
            1
        );
    }
}
