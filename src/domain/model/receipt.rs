use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::model::{
    MaterialId, MaterialRequestId, MaterialRequestItemId, MovementSubType, OperatorId, ReceiptId,
    ReceiptItemId, WarehouseId,
};

/// 入庫明細
/// 在庫に入るのは `quantity_received` のみで、`quantity_rejected` は受入拒否数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptItem {
    pub id: ReceiptItemId,
    pub material_id: MaterialId,
    pub material_request_item_id: Option<MaterialRequestItemId>,
    pub quantity_expected: Decimal,
    pub quantity_received: Decimal,
    pub quantity_rejected: Decimal,
    pub unit_price: Option<Decimal>,
}

impl ReceiptItem {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quantity_expected < Decimal::ZERO
            || self.quantity_received < Decimal::ZERO
            || self.quantity_rejected < Decimal::ZERO
        {
            return Err(DomainError::validation(format!(
                "資材 {} の入庫数量は負にできません",
                self.material_id
            )));
        }
        Ok(())
    }
}

/// 入庫明細の入力
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReceiptItemInput {
    pub material_id: MaterialId,
    pub material_request_item_id: Option<MaterialRequestItemId>,
    #[serde(default)]
    pub quantity_expected: Decimal,
    pub quantity_received: Decimal,
    #[serde(default)]
    pub quantity_rejected: Decimal,
    pub unit_price: Option<Decimal>,
}

impl ReceiptItemInput {
    pub fn new(material_id: MaterialId, quantity_received: Decimal) -> Self {
        Self {
            material_id,
            material_request_item_id: None,
            quantity_expected: quantity_received,
            quantity_received,
            quantity_rejected: Decimal::ZERO,
            unit_price: None,
        }
    }

    pub fn for_request_line(mut self, line: MaterialRequestItemId) -> Self {
        self.material_request_item_id = Some(line);
        self
    }

    pub fn with_unit_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }

    pub fn rejected(mut self, quantity: Decimal) -> Self {
        self.quantity_rejected = quantity;
        self
    }

    pub fn into_item(self) -> ReceiptItem {
        ReceiptItem {
            id: ReceiptItemId::new(),
            material_id: self.material_id,
            material_request_item_id: self.material_request_item_id,
            quantity_expected: self.quantity_expected,
            quantity_received: self.quantity_received,
            quantity_rejected: self.quantity_rejected,
            unit_price: self.unit_price,
        }
    }
}

/// 入庫集約（物理的な受け入れ）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    id: ReceiptId,
    protocol: String,
    warehouse_id: WarehouseId,
    sub_type: MovementSubType,
    material_request_id: Option<MaterialRequestId>,
    items: Vec<ReceiptItem>,
    notes: Option<String>,
    operator_id: Option<OperatorId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Receipt {
    /// 新しい入庫を作成
    /// 種別は入庫系（IN）に限る
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: String,
        warehouse_id: WarehouseId,
        sub_type: MovementSubType,
        material_request_id: Option<MaterialRequestId>,
        items: Vec<ReceiptItem>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !sub_type.is_inbound() {
            return Err(DomainError::validation(format!(
                "入庫の移動種別は IN 系である必要があります: {}",
                sub_type
            )));
        }
        if items.is_empty() {
            return Err(DomainError::validation("入庫明細が空です"));
        }
        for item in &items {
            item.validate()?;
        }
        Ok(Self {
            id: ReceiptId::new(),
            protocol,
            warehouse_id,
            sub_type,
            material_request_id,
            items,
            notes,
            operator_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// データベースから取得したデータで入庫を再構築
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: ReceiptId,
        protocol: String,
        warehouse_id: WarehouseId,
        sub_type: MovementSubType,
        material_request_id: Option<MaterialRequestId>,
        items: Vec<ReceiptItem>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            protocol,
            warehouse_id,
            sub_type,
            material_request_id,
            items,
            notes,
            operator_id,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> ReceiptId {
        self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn sub_type(&self) -> MovementSubType {
        self.sub_type
    }

    pub fn material_request_id(&self) -> Option<MaterialRequestId> {
        self.material_request_id
    }

    pub fn items(&self) -> &[ReceiptItem] {
        &self.items
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn operator_id(&self) -> Option<OperatorId> {
        self.operator_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn total_received(&self) -> Decimal {
        self.items.iter().map(|item| item.quantity_received).sum()
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    /// 在庫に影響しない数量（予定数・拒否数）を更新する
    pub fn update_counters(
        &mut self,
        item_id: ReceiptItemId,
        quantity_expected: Option<Decimal>,
        quantity_rejected: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| DomainError::not_found(format!("入庫明細 {} が見つかりません", item_id)))?;
        let mut updated = item.clone();
        if let Some(expected) = quantity_expected {
            updated.quantity_expected = expected;
        }
        if let Some(rejected) = quantity_rejected {
            updated.quantity_rejected = rejected;
        }
        updated.validate()?;
        *item = updated;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn receipt(items: Vec<ReceiptItem>) -> Result<Receipt, DomainError> {
        Receipt::new(
            "RCP-000001".to_string(),
            WarehouseId::new(),
            MovementSubType::InCentral,
            None,
            items,
            None,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_outbound_sub_type_is_rejected() {
        let items = vec![ReceiptItemInput::new(MaterialId::new(), dec!(1)).into_item()];
        let result = Receipt::new(
            "RCP-000001".to_string(),
            WarehouseId::new(),
            MovementSubType::OutDiscard,
            None,
            items,
            None,
            None,
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_negative_quantity_is_rejected() {
        let items = vec![ReceiptItemInput::new(MaterialId::new(), dec!(-1)).into_item()];
        assert!(receipt(items).is_err());
    }

    #[test]
    fn test_update_counters_keeps_received() {
        let item = ReceiptItemInput::new(MaterialId::new(), dec!(5)).into_item();
        let item_id = item.id;
        let mut receipt = receipt(vec![item]).unwrap();
        receipt
            .update_counters(item_id, Some(dec!(6)), Some(dec!(1)), Utc::now())
            .unwrap();
        let item = &receipt.items()[0];
        assert_eq!(item.quantity_expected, dec!(6));
        assert_eq!(item.quantity_rejected, dec!(1));
        assert_eq!(item.quantity_received, dec!(5));
    }

    #[test]
    fn test_update_counters_unknown_item() {
        let mut receipt =
            receipt(vec![ReceiptItemInput::new(MaterialId::new(), dec!(5)).into_item()]).unwrap();
        let result = receipt.update_counters(ReceiptItemId::new(), Some(dec!(1)), None, Utc::now());
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }
}
