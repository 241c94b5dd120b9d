use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::model::{
    InitialStockChange, MaintenanceRequestId, MaterialId, MaterialRequestId, OperatorId,
    PickingOrderItemId, ReceiptItemId, RestrictionOrderItemId, StockEffect, StockMovementId,
    WarehouseId, WithdrawalItemId,
};

/// 在庫移動の操作区分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementOperation {
    In,
    Out,
    Adjustment,
    Reservation,
    Restriction,
}

impl MovementOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementOperation::In => "IN",
            MovementOperation::Out => "OUT",
            MovementOperation::Adjustment => "ADJUSTMENT",
            MovementOperation::Reservation => "RESERVATION",
            MovementOperation::Restriction => "RESTRICTION",
        }
    }
}

/// 在庫移動の種別コード
/// エンジン間で共有される閉じた列挙で、各コードの作用は `effect` に定義される
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementSubType {
    InCentral,
    InReturn,
    InTransfer,
    OutServiceUse,
    OutTransfer,
    OutDiscard,
    InitialStockLoad,
    InvIn,
    InvOut,
    ReclassifyIn,
    ReclassifyOut,
    ReserveForPickingOrder,
    ReleasePickingReservation,
    RestrictForPaidItem,
    ReleasePaidRestriction,
}

impl MovementSubType {
    pub const ALL: [MovementSubType; 15] = [
        MovementSubType::InCentral,
        MovementSubType::InReturn,
        MovementSubType::InTransfer,
        MovementSubType::OutServiceUse,
        MovementSubType::OutTransfer,
        MovementSubType::OutDiscard,
        MovementSubType::InitialStockLoad,
        MovementSubType::InvIn,
        MovementSubType::InvOut,
        MovementSubType::ReclassifyIn,
        MovementSubType::ReclassifyOut,
        MovementSubType::ReserveForPickingOrder,
        MovementSubType::ReleasePickingReservation,
        MovementSubType::RestrictForPaidItem,
        MovementSubType::ReleasePaidRestriction,
    ];

    /// 種別が属する操作区分
    pub fn operation(&self) -> MovementOperation {
        use MovementSubType::*;
        match self {
            InCentral | InReturn | InTransfer => MovementOperation::In,
            OutServiceUse | OutTransfer | OutDiscard => MovementOperation::Out,
            InitialStockLoad | InvIn | InvOut | ReclassifyIn | ReclassifyOut => {
                MovementOperation::Adjustment
            }
            ReserveForPickingOrder | ReleasePickingReservation => MovementOperation::Reservation,
            RestrictForPaidItem | ReleasePaidRestriction => MovementOperation::Restriction,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use MovementSubType::*;
        match self {
            InCentral => "IN_CENTRAL",
            InReturn => "IN_RETURN",
            InTransfer => "IN_TRANSFER",
            OutServiceUse => "OUT_SERVICE_USE",
            OutTransfer => "OUT_TRANSFER",
            OutDiscard => "OUT_DISCARD",
            InitialStockLoad => "INITIAL_STOCK_LOAD",
            InvIn => "INV_IN",
            InvOut => "INV_OUT",
            ReclassifyIn => "RECLASSIFY_IN",
            ReclassifyOut => "RECLASSIFY_OUT",
            ReserveForPickingOrder => "RESERVE_FOR_PICKING_ORDER",
            ReleasePickingReservation => "RELEASE_PICKING_RESERVATION",
            RestrictForPaidItem => "RESTRICT_FOR_PAID_ITEM",
            ReleasePaidRestriction => "RELEASE_PAID_RESTRICTION",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, DomainError> {
        Self::ALL
            .iter()
            .copied()
            .find(|sub_type| sub_type.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("未知の移動種別です: {}", s)))
    }

    /// 物理的な出庫を表す種別か
    pub fn is_outbound(&self) -> bool {
        self.operation() == MovementOperation::Out
    }

    /// 物理的な入庫を表す種別か
    pub fn is_inbound(&self) -> bool {
        self.operation() == MovementOperation::In
    }

    /// 数量と単価から在庫レコードへの作用を求める
    ///
    /// # Arguments
    /// * `quantity` - 移動数量（正の大きさ）
    /// * `unit_price` - 単価（入庫時のみ `updated_cost` に反映）
    pub fn effect(&self, quantity: Decimal, unit_price: Option<Decimal>) -> StockEffect {
        use MovementSubType::*;
        let base = StockEffect::default();
        match self {
            InCentral | InReturn | InTransfer => StockEffect {
                balance_delta: quantity,
                updated_cost: unit_price,
                ..base
            },
            OutServiceUse | OutTransfer | OutDiscard => StockEffect {
                balance_delta: -quantity,
                ..base
            },
            InitialStockLoad => StockEffect {
                initial: InitialStockChange::Load(quantity),
                stamps_count_date: true,
                ..base
            },
            InvIn | ReclassifyIn => StockEffect {
                balance_delta: quantity,
                stamps_count_date: true,
                ..base
            },
            InvOut | ReclassifyOut => StockEffect {
                balance_delta: -quantity,
                stamps_count_date: true,
                ..base
            },
            ReserveForPickingOrder => StockEffect {
                reserved_delta: quantity,
                ..base
            },
            ReleasePickingReservation => StockEffect {
                reserved_delta: -quantity,
                ..base
            },
            RestrictForPaidItem => StockEffect {
                restricted_delta: quantity,
                ..base
            },
            ReleasePaidRestriction => StockEffect {
                restricted_delta: -quantity,
                ..base
            },
        }
    }
}

impl std::fmt::Display for MovementSubType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 移動の発生元となったオーダー明細（高々1つ）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementOrigin {
    #[default]
    None,
    PickingOrderItem(PickingOrderItemId),
    RestrictionOrderItem(RestrictionOrderItemId),
    WithdrawalItem(WithdrawalItemId),
    ReceiptItem(ReceiptItemId),
}

impl MovementOrigin {
    pub fn is_none(&self) -> bool {
        matches!(self, MovementOrigin::None)
    }
}

/// 在庫移動（不変のイベント）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockMovement {
    pub id: StockMovementId,
    pub warehouse_id: WarehouseId,
    pub material_id: MaterialId,
    pub quantity: Decimal,
    pub sub_type: MovementSubType,
    pub origin: MovementOrigin,
    /// 記録時にオーダー明細から発生したか
    /// 明細が削除されて `origin` が外れても変わらない
    pub order_linked: bool,
    pub material_request_id: Option<MaterialRequestId>,
    pub maintenance_request_id: Option<MaintenanceRequestId>,
    pub unit_price: Option<Decimal>,
    pub operator_id: Option<OperatorId>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn operation(&self) -> MovementOperation {
        self.sub_type.operation()
    }

    /// この移動が在庫レコードに与えた作用
    pub fn effect(&self) -> StockEffect {
        self.sub_type.effect(self.quantity, self.unit_price)
    }

    /// 単独の誤登録として取り消せる移動か
    /// 引当と制限はオーダーだけが保持する
    pub fn is_standalone(&self) -> bool {
        !self.order_linked
            && self.origin.is_none()
            && !matches!(
                self.operation(),
                MovementOperation::Reservation | MovementOperation::Restriction
            )
    }
}

/// 記録前の在庫移動
#[derive(Debug, Clone, PartialEq)]
pub struct NewStockMovement {
    pub warehouse_id: WarehouseId,
    pub material_id: MaterialId,
    pub sub_type: MovementSubType,
    pub quantity: Decimal,
    pub origin: MovementOrigin,
    pub material_request_id: Option<MaterialRequestId>,
    pub maintenance_request_id: Option<MaintenanceRequestId>,
    pub unit_price: Option<Decimal>,
    pub operator_id: Option<OperatorId>,
}

impl NewStockMovement {
    pub fn new(
        warehouse_id: WarehouseId,
        material_id: MaterialId,
        sub_type: MovementSubType,
        quantity: Decimal,
    ) -> Self {
        Self {
            warehouse_id,
            material_id,
            sub_type,
            quantity,
            origin: MovementOrigin::None,
            material_request_id: None,
            maintenance_request_id: None,
            unit_price: None,
            operator_id: None,
        }
    }

    pub fn with_origin(mut self, origin: MovementOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_unit_price(mut self, unit_price: Option<Decimal>) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn with_material_request(mut self, material_request_id: Option<MaterialRequestId>) -> Self {
        self.material_request_id = material_request_id;
        self
    }

    pub fn with_maintenance_request(
        mut self,
        maintenance_request_id: Option<MaintenanceRequestId>,
    ) -> Self {
        self.maintenance_request_id = maintenance_request_id;
        self
    }

    pub fn by(mut self, operator_id: Option<OperatorId>) -> Self {
        self.operator_id = operator_id;
        self
    }

    pub fn effect(&self) -> StockEffect {
        self.sub_type.effect(self.quantity, self.unit_price)
    }

    /// IDと記録日時を付与して確定する
    pub fn into_movement(self, created_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id: StockMovementId::new(),
            warehouse_id: self.warehouse_id,
            material_id: self.material_id,
            quantity: self.quantity,
            sub_type: self.sub_type,
            origin: self.origin,
            order_linked: !self.origin.is_none(),
            material_request_id: self.material_request_id,
            maintenance_request_id: self.maintenance_request_id,
            unit_price: self.unit_price,
            operator_id: self.operator_id,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sub_type_string_round_trip() {
        for sub_type in MovementSubType::ALL {
            assert_eq!(MovementSubType::from_string(sub_type.as_str()), Ok(sub_type));
        }
        assert!(MovementSubType::from_string("TELEPORT").is_err());
    }

    #[test]
    fn test_sub_type_serializes_as_wire_code() {
        let json = serde_json::to_string(&MovementSubType::ReserveForPickingOrder).unwrap();
        assert_eq!(json, "\"RESERVE_FOR_PICKING_ORDER\"");
    }

    #[test]
    fn test_operation_of_sub_types() {
        assert_eq!(MovementSubType::InCentral.operation(), MovementOperation::In);
        assert_eq!(MovementSubType::OutDiscard.operation(), MovementOperation::Out);
        assert_eq!(
            MovementSubType::InitialStockLoad.operation(),
            MovementOperation::Adjustment
        );
        assert_eq!(
            MovementSubType::ReleasePickingReservation.operation(),
            MovementOperation::Reservation
        );
        assert_eq!(
            MovementSubType::RestrictForPaidItem.operation(),
            MovementOperation::Restriction
        );
    }

    #[test]
    fn test_inbound_effect_updates_cost() {
        let effect = MovementSubType::InCentral.effect(dec!(5), Some(dec!(2.5)));
        assert_eq!(effect.balance_delta, dec!(5));
        assert_eq!(effect.updated_cost, Some(dec!(2.5)));
        assert!(!effect.stamps_count_date);
    }

    #[test]
    fn test_outbound_effect_ignores_price() {
        let effect = MovementSubType::OutServiceUse.effect(dec!(5), Some(dec!(2.5)));
        assert_eq!(effect.balance_delta, dec!(-5));
        assert_eq!(effect.updated_cost, None);
    }

    #[test]
    fn test_adjustment_effects_stamp_count_date() {
        let load = MovementSubType::InitialStockLoad.effect(dec!(7), None);
        assert_eq!(load.initial, InitialStockChange::Load(dec!(7)));
        assert_eq!(load.balance_delta, Decimal::ZERO);

        let inv_out = MovementSubType::InvOut.effect(dec!(2), None);
        assert_eq!(inv_out.balance_delta, dec!(-2));
        assert!(inv_out.stamps_count_date);

        let reclassify_in = MovementSubType::ReclassifyIn.effect(dec!(3), None);
        assert_eq!(reclassify_in.balance_delta, dec!(3));
        assert!(reclassify_in.stamps_count_date);
    }

    #[test]
    fn test_reservation_and_restriction_effects() {
        assert_eq!(
            MovementSubType::ReserveForPickingOrder
                .effect(dec!(4), None)
                .reserved_delta,
            dec!(4)
        );
        assert_eq!(
            MovementSubType::ReleasePickingReservation
                .effect(dec!(4), None)
                .reserved_delta,
            dec!(-4)
        );
        assert_eq!(
            MovementSubType::RestrictForPaidItem
                .effect(dec!(4), None)
                .restricted_delta,
            dec!(4)
        );
        assert_eq!(
            MovementSubType::ReleasePaidRestriction
                .effect(dec!(4), None)
                .restricted_delta,
            dec!(-4)
        );
    }

    #[test]
    fn test_new_movement_builder() {
        let warehouse_id = WarehouseId::new();
        let material_id = MaterialId::new();
        let item_id = PickingOrderItemId::new();
        let movement = NewStockMovement::new(
            warehouse_id,
            material_id,
            MovementSubType::ReserveForPickingOrder,
            dec!(3),
        )
        .with_origin(MovementOrigin::PickingOrderItem(item_id))
        .into_movement(Utc::now());

        assert_eq!(movement.warehouse_id, warehouse_id);
        assert_eq!(movement.origin, MovementOrigin::PickingOrderItem(item_id));
        assert_eq!(movement.operation(), MovementOperation::Reservation);
        assert_eq!(movement.effect().reserved_delta, dec!(3));
        assert!(movement.order_linked);
    }

    #[test]
    fn test_standalone_movements() {
        let warehouse_id = WarehouseId::new();
        let material_id = MaterialId::new();
        let inbound =
            NewStockMovement::new(warehouse_id, material_id, MovementSubType::InCentral, dec!(2))
                .into_movement(Utc::now());
        assert!(inbound.is_standalone());

        // 引当と制限は紐付けがなくても単独では取り消せない
        let release = NewStockMovement::new(
            warehouse_id,
            material_id,
            MovementSubType::ReleasePickingReservation,
            dec!(2),
        )
        .into_movement(Utc::now());
        assert!(!release.is_standalone());

        // 明細の削除で紐付けが外れても出自は残る
        let mut detached = NewStockMovement::new(
            warehouse_id,
            material_id,
            MovementSubType::InCentral,
            dec!(2),
        )
        .with_origin(MovementOrigin::ReceiptItem(ReceiptItemId::new()))
        .into_movement(Utc::now());
        detached.origin = MovementOrigin::None;
        assert!(detached.order_linked);
        assert!(!detached.is_standalone());
    }
}
