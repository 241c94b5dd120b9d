use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::error::DomainError;
use crate::domain::model::{
    MaintenanceRequestId, MaterialId, MaterialRequestId, MaterialRequestItemId, WarehouseId,
};

/// 資材要求明細
/// 引当・制限・出庫の上限を決める「契約」となる数量を保持する
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialRequestItem {
    pub id: MaterialRequestItemId,
    pub material_id: MaterialId,
    pub quantity_requested: Decimal,
    pub quantity_approved: Option<Decimal>,
    pub quantity_delivered: Decimal,
    pub quantity_returned: Decimal,
    pub unit_price: Option<Decimal>,
}

impl MaterialRequestItem {
    pub fn new(material_id: MaterialId, quantity_requested: Decimal) -> Self {
        Self {
            id: MaterialRequestItemId::new(),
            material_id,
            quantity_requested,
            quantity_approved: None,
            quantity_delivered: Decimal::ZERO,
            quantity_returned: Decimal::ZERO,
            unit_price: None,
        }
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    /// まだ納入を受け付けられる残量（追加入庫時の上限）
    pub fn remaining_deliverable(&self) -> Decimal {
        self.quantity_requested + self.quantity_returned - self.quantity_delivered
    }

    /// 納入数量を加算する（上限は要求数 + 返却数 − 納入済み）
    pub fn add_delivered(&mut self, quantity: Decimal) -> Result<(), DomainError> {
        let ceiling = self.remaining_deliverable();
        if quantity > ceiling {
            return Err(DomainError::exceeded(
                format!(
                    "要求明細 {} の納入数量 {} が残量 {} を超えています",
                    self.id, quantity, ceiling
                ),
                ceiling,
            ));
        }
        self.quantity_delivered += quantity;
        Ok(())
    }

    /// 初回入庫時に納入数量を直接設定する（上限は要求数 + 返却数）
    pub fn set_delivered(&mut self, quantity: Decimal) -> Result<(), DomainError> {
        let ceiling = self.quantity_requested + self.quantity_returned;
        if quantity > ceiling {
            return Err(DomainError::exceeded(
                format!(
                    "要求明細 {} の納入数量 {} が上限 {} を超えています",
                    self.id, quantity, ceiling
                ),
                ceiling,
            ));
        }
        self.quantity_delivered = quantity;
        Ok(())
    }

    /// 入庫取消時に納入数量を戻す
    pub fn revert_delivered(&mut self, quantity: Decimal) {
        self.quantity_delivered = (self.quantity_delivered - quantity).max(Decimal::ZERO);
    }
}

/// 資材要求
/// 所有は別モジュールだが、台帳エンジンがトランザクション内で読み書きする
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialRequest {
    pub id: MaterialRequestId,
    pub protocol: String,
    pub warehouse_id: WarehouseId,
    pub maintenance_request_id: Option<MaintenanceRequestId>,
    pub items: Vec<MaterialRequestItem>,
}

impl MaterialRequest {
    pub fn new(
        protocol: impl Into<String>,
        warehouse_id: WarehouseId,
        maintenance_request_id: Option<MaintenanceRequestId>,
        items: Vec<MaterialRequestItem>,
    ) -> Self {
        Self {
            id: MaterialRequestId::new(),
            protocol: protocol.into(),
            warehouse_id,
            maintenance_request_id,
            items,
        }
    }

    pub fn item(&self, item_id: MaterialRequestItemId) -> Option<&MaterialRequestItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: MaterialRequestItemId) -> Option<&mut MaterialRequestItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    /// 明細を取得し、無ければ NotFound
    pub fn require_item(
        &self,
        item_id: MaterialRequestItemId,
    ) -> Result<&MaterialRequestItem, DomainError> {
        self.item(item_id).ok_or_else(|| {
            DomainError::not_found(format!(
                "資材要求 {} に明細 {} がありません",
                self.protocol, item_id
            ))
        })
    }

    /// 資材で明細を検索（同一資材の明細が複数ある場合は最初のもの）
    pub fn item_for_material(&self, material_id: MaterialId) -> Option<&MaterialRequestItem> {
        self.items.iter().find(|item| item.material_id == material_id)
    }

    pub fn total_requested(&self) -> Decimal {
        self.items.iter().map(|item| item.quantity_requested).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_add_delivered_within_remaining() {
        let mut item = MaterialRequestItem::new(MaterialId::new(), dec!(10));
        item.add_delivered(dec!(4)).unwrap();
        item.add_delivered(dec!(6)).unwrap();
        assert_eq!(item.quantity_delivered, dec!(10));
        assert_eq!(item.remaining_deliverable(), dec!(0));
    }

    #[test]
    fn test_add_delivered_rejects_over_delivery() {
        let mut item = MaterialRequestItem::new(MaterialId::new(), dec!(10));
        item.quantity_delivered = dec!(8);
        match item.add_delivered(dec!(3)) {
            Err(DomainError::ConsistencyViolation { ceiling, .. }) => {
                assert_eq!(ceiling, Some(dec!(2)))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(item.quantity_delivered, dec!(8));
    }

    #[test]
    fn test_returned_quantity_extends_ceiling() {
        let mut item = MaterialRequestItem::new(MaterialId::new(), dec!(10));
        item.quantity_returned = dec!(2);
        item.set_delivered(dec!(12)).unwrap();
        assert!(item.set_delivered(dec!(13)).is_err());
    }

    #[test]
    fn test_revert_delivered_never_negative() {
        let mut item = MaterialRequestItem::new(MaterialId::new(), dec!(10));
        item.quantity_delivered = dec!(3);
        item.revert_delivered(dec!(5));
        assert_eq!(item.quantity_delivered, dec!(0));
    }

    #[test]
    fn test_total_requested() {
        let request = MaterialRequest::new(
            "REQ-1",
            WarehouseId::new(),
            None,
            vec![
                MaterialRequestItem::new(MaterialId::new(), dec!(3)),
                MaterialRequestItem::new(MaterialId::new(), dec!(4.5)),
            ],
        );
        assert_eq!(request.total_requested(), dec!(7.5));
    }
}
