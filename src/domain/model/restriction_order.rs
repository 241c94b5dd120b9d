use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::model::{
    MaterialId, MaterialRequestId, MaterialRequestItemId, MovementSubType, OperatorId,
    RestrictionOrderId, RestrictionOrderItemId, WarehouseId,
};

/// 制限オーダーのステータス
/// 制限数合計と対象資材要求の要求数合計の比較から導出される
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestrictionStatus {
    Free,
    PartiallyRestricted,
    FullyRestricted,
}

impl RestrictionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictionStatus::Free => "FREE",
            RestrictionStatus::PartiallyRestricted => "PARTIALLY_RESTRICTED",
            RestrictionStatus::FullyRestricted => "FULLY_RESTRICTED",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, DomainError> {
        match s {
            "FREE" => Ok(RestrictionStatus::Free),
            "PARTIALLY_RESTRICTED" => Ok(RestrictionStatus::PartiallyRestricted),
            "FULLY_RESTRICTED" => Ok(RestrictionStatus::FullyRestricted),
            _ => Err(DomainError::validation(format!(
                "未知の制限ステータスです: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RestrictionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 制限数合計と要求数合計からステータスを導出する
pub fn derive_restriction_status(
    total_restricted: Decimal,
    total_requested: Decimal,
) -> RestrictionStatus {
    if total_restricted <= Decimal::ZERO {
        RestrictionStatus::Free
    } else if total_restricted >= total_requested {
        RestrictionStatus::FullyRestricted
    } else {
        RestrictionStatus::PartiallyRestricted
    }
}

/// 制限数の増減から移動種別と数量を決める
/// 正 → RestrictForPaidItem、負 → ReleasePaidRestriction、0 → 移動なし
pub fn restriction_movement(delta: Decimal) -> Option<(MovementSubType, Decimal)> {
    if delta > Decimal::ZERO {
        Some((MovementSubType::RestrictForPaidItem, delta))
    } else if delta < Decimal::ZERO {
        Some((MovementSubType::ReleasePaidRestriction, -delta))
    } else {
        None
    }
}

/// 制限オーダー明細
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestrictionOrderItem {
    pub id: RestrictionOrderItemId,
    pub material_id: MaterialId,
    pub material_request_item_id: MaterialRequestItemId,
    pub quantity_restricted: Decimal,
}

impl RestrictionOrderItem {
    pub fn new(
        material_id: MaterialId,
        material_request_item_id: MaterialRequestItemId,
        quantity_restricted: Decimal,
    ) -> Self {
        Self {
            id: RestrictionOrderItemId::new(),
            material_id,
            material_request_item_id,
            quantity_restricted,
        }
    }
}

/// 制限明細の入力
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestrictionItemInput {
    pub material_request_item_id: MaterialRequestItemId,
    pub quantity_restricted: Decimal,
}

impl RestrictionItemInput {
    pub fn new(material_request_item_id: MaterialRequestItemId, quantity_restricted: Decimal) -> Self {
        Self {
            material_request_item_id,
            quantity_restricted,
        }
    }
}

/// 制限オーダー集約
/// 対象の資材要求ごとに高々1件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestrictionOrder {
    id: RestrictionOrderId,
    protocol: String,
    warehouse_id: WarehouseId,
    material_request_id: MaterialRequestId,
    status: RestrictionStatus,
    items: Vec<RestrictionOrderItem>,
    notes: Option<String>,
    operator_id: Option<OperatorId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RestrictionOrder {
    /// 新しい制限オーダーを作成
    /// ステータスは明細と要求数合計から導出する
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: String,
        warehouse_id: WarehouseId,
        material_request_id: MaterialRequestId,
        items: Vec<RestrictionOrderItem>,
        total_requested: Decimal,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = derive_restriction_status(Self::sum(&items), total_requested);
        Self {
            id: RestrictionOrderId::new(),
            protocol,
            warehouse_id,
            material_request_id,
            status,
            items,
            notes,
            operator_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// データベースから取得したデータで制限オーダーを再構築
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: RestrictionOrderId,
        protocol: String,
        warehouse_id: WarehouseId,
        material_request_id: MaterialRequestId,
        status: RestrictionStatus,
        items: Vec<RestrictionOrderItem>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            protocol,
            warehouse_id,
            material_request_id,
            status,
            items,
            notes,
            operator_id,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> RestrictionOrderId {
        self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn material_request_id(&self) -> MaterialRequestId {
        self.material_request_id
    }

    pub fn status(&self) -> RestrictionStatus {
        self.status
    }

    pub fn items(&self) -> &[RestrictionOrderItem] {
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

    pub fn total_restricted(&self) -> Decimal {
        Self::sum(&self.items)
    }

    pub fn item(&self, item_id: RestrictionOrderItemId) -> Option<&RestrictionOrderItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_for_request_line(
        &self,
        line: MaterialRequestItemId,
    ) -> Option<&RestrictionOrderItem> {
        self.items
            .iter()
            .find(|item| item.material_request_item_id == line)
    }

    /// 要求明細に対する制限数（明細が無ければ 0）
    pub fn restricted_for_line(&self, line: MaterialRequestItemId) -> Decimal {
        self.item_for_request_line(line)
            .map(|item| item.quantity_restricted)
            .unwrap_or(Decimal::ZERO)
    }

    /// 明細を置き換え、ステータスを再計算する
    pub fn apply_items(
        &mut self,
        items: Vec<RestrictionOrderItem>,
        total_requested: Decimal,
        now: DateTime<Utc>,
    ) {
        self.status = derive_restriction_status(Self::sum(&items), total_requested);
        self.items = items;
        self.updated_at = now;
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    fn sum(items: &[RestrictionOrderItem]) -> Decimal {
        items.iter().map(|item| item.quantity_restricted).sum()
    }
}
