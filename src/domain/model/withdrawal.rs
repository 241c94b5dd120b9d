use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::model::{
    total_value, MaintenanceRequestId, MaterialId, MaterialRequestId, MaterialRequestItemId,
    MovementSubType, OperatorId, PickingOrderId, PickingOrderItemId, WarehouseId, WithdrawalId,
    WithdrawalItemId,
};

/// 出庫明細
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalItem {
    pub id: WithdrawalItemId,
    pub material_id: MaterialId,
    pub material_request_item_id: Option<MaterialRequestItemId>,
    pub picking_order_item_id: Option<PickingOrderItemId>,
    pub quantity_withdrawn: Decimal,
    pub unit_price: Option<Decimal>,
}

/// 出庫明細の入力
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WithdrawalItemInput {
    pub material_id: MaterialId,
    pub material_request_item_id: Option<MaterialRequestItemId>,
    #[serde(skip)]
    pub picking_order_item_id: Option<PickingOrderItemId>,
    pub quantity_withdrawn: Decimal,
    pub unit_price: Option<Decimal>,
}

impl WithdrawalItemInput {
    pub fn new(material_id: MaterialId, quantity_withdrawn: Decimal) -> Self {
        Self {
            material_id,
            material_request_item_id: None,
            picking_order_item_id: None,
            quantity_withdrawn,
            unit_price: None,
        }
    }

    pub fn for_request_line(mut self, line: Option<MaterialRequestItemId>) -> Self {
        self.material_request_item_id = line;
        self
    }

    pub fn from_picking_item(mut self, item_id: PickingOrderItemId) -> Self {
        self.picking_order_item_id = Some(item_id);
        self
    }

    pub fn with_unit_price(mut self, unit_price: Option<Decimal>) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn into_item(self) -> WithdrawalItem {
        WithdrawalItem {
            id: WithdrawalItemId::new(),
            material_id: self.material_id,
            material_request_item_id: self.material_request_item_id,
            picking_order_item_id: self.picking_order_item_id,
            quantity_withdrawn: self.quantity_withdrawn,
            unit_price: self.unit_price,
        }
    }
}

/// 出庫集約（終端・取消不可の物理的な払い出し）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    id: WithdrawalId,
    protocol: String,
    warehouse_id: WarehouseId,
    sub_type: MovementSubType,
    material_request_id: Option<MaterialRequestId>,
    maintenance_request_id: Option<MaintenanceRequestId>,
    picking_order_id: Option<PickingOrderId>,
    items: Vec<WithdrawalItem>,
    value_withdrawal: Option<Decimal>,
    notes: Option<String>,
    operator_id: Option<OperatorId>,
    created_at: DateTime<Utc>,
}

impl Withdrawal {
    /// 新しい出庫を作成
    /// 種別は出庫系（OUT）に限る
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: String,
        warehouse_id: WarehouseId,
        sub_type: MovementSubType,
        material_request_id: Option<MaterialRequestId>,
        maintenance_request_id: Option<MaintenanceRequestId>,
        picking_order_id: Option<PickingOrderId>,
        items: Vec<WithdrawalItem>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        Self::validate_draft(sub_type, &items)?;
        let value_withdrawal = total_value(
            items
                .iter()
                .map(|item| (item.quantity_withdrawn, item.unit_price)),
        );
        Ok(Self {
            id: WithdrawalId::new(),
            protocol,
            warehouse_id,
            sub_type,
            material_request_id,
            maintenance_request_id,
            picking_order_id,
            items,
            value_withdrawal,
            notes,
            operator_id,
            created_at: now,
        })
    }

    /// 作成前の種別と明細を検証する
    pub fn validate_draft(
        sub_type: MovementSubType,
        items: &[WithdrawalItem],
    ) -> Result<(), DomainError> {
        if !sub_type.is_outbound() {
            return Err(DomainError::validation(format!(
                "出庫の移動種別は OUT 系である必要があります: {}",
                sub_type
            )));
        }
        if items.is_empty() {
            return Err(DomainError::validation("出庫明細が空です"));
        }
        if let Some(item) = items
            .iter()
            .find(|item| item.quantity_withdrawn <= Decimal::ZERO)
        {
            return Err(DomainError::validation(format!(
                "資材 {} の出庫数量は正の値である必要があります（{}）",
                item.material_id, item.quantity_withdrawn
            )));
        }
        Ok(())
    }

    /// データベースから取得したデータで出庫を再構築
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: WithdrawalId,
        protocol: String,
        warehouse_id: WarehouseId,
        sub_type: MovementSubType,
        material_request_id: Option<MaterialRequestId>,
        maintenance_request_id: Option<MaintenanceRequestId>,
        picking_order_id: Option<PickingOrderId>,
        items: Vec<WithdrawalItem>,
        value_withdrawal: Option<Decimal>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            protocol,
            warehouse_id,
            sub_type,
            material_request_id,
            maintenance_request_id,
            picking_order_id,
            items,
            value_withdrawal,
            notes,
            operator_id,
            created_at,
        }
    }

    pub fn id(&self) -> WithdrawalId {
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

    pub fn maintenance_request_id(&self) -> Option<MaintenanceRequestId> {
        self.maintenance_request_id
    }

    pub fn picking_order_id(&self) -> Option<PickingOrderId> {
        self.picking_order_id
    }

    pub fn items(&self) -> &[WithdrawalItem] {
        &self.items
    }

    pub fn value_withdrawal(&self) -> Option<Decimal> {
        self.value_withdrawal
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

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }
}
