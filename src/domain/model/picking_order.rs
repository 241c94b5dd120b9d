use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use std::collections::HashSet;

use crate::domain::error::DomainError;
use crate::domain::model::{
    total_value, MaintenanceRequestId, MaterialId, MaterialRequestId, MaterialRequestItemId,
    OperatorId, PickingOrderId, PickingOrderItemId, WarehouseId,
};

/// ピッキングオーダーのステータス
/// 終端（Cancelled / FullyWithdrawn / Expired）以外は明細から導出される
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickingOrderStatus {
    PendingPreparation,
    InPreparation,
    ReadyForPickup,
    PartiallyWithdrawn,
    FullyWithdrawn,
    Cancelled,
    Expired,
}

impl PickingOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickingOrderStatus::PendingPreparation => "PENDING_PREPARATION",
            PickingOrderStatus::InPreparation => "IN_PREPARATION",
            PickingOrderStatus::ReadyForPickup => "READY_FOR_PICKUP",
            PickingOrderStatus::PartiallyWithdrawn => "PARTIALLY_WITHDRAWN",
            PickingOrderStatus::FullyWithdrawn => "FULLY_WITHDRAWN",
            PickingOrderStatus::Cancelled => "CANCELLED",
            PickingOrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, DomainError> {
        match s {
            "PENDING_PREPARATION" => Ok(PickingOrderStatus::PendingPreparation),
            "IN_PREPARATION" => Ok(PickingOrderStatus::InPreparation),
            "READY_FOR_PICKUP" => Ok(PickingOrderStatus::ReadyForPickup),
            "PARTIALLY_WITHDRAWN" => Ok(PickingOrderStatus::PartiallyWithdrawn),
            "FULLY_WITHDRAWN" => Ok(PickingOrderStatus::FullyWithdrawn),
            "CANCELLED" => Ok(PickingOrderStatus::Cancelled),
            "EXPIRED" => Ok(PickingOrderStatus::Expired),
            _ => Err(DomainError::validation(format!(
                "未知のピッキングオーダーステータスです: {}",
                s
            ))),
        }
    }

    /// 編集不可の終端ステータスか
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PickingOrderStatus::Cancelled
                | PickingOrderStatus::FullyWithdrawn
                | PickingOrderStatus::Expired
        )
    }
}

impl std::fmt::Display for PickingOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 明細の業務キー
/// 要求明細に紐づく場合はその明細ID、そうでなければ行ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKey {
    RequestLine(MaterialRequestItemId),
    Line(PickingOrderItemId),
}

/// ピッキングオーダー明細
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickingOrderItem {
    pub id: PickingOrderItemId,
    pub material_id: MaterialId,
    pub material_request_item_id: Option<MaterialRequestItemId>,
    pub quantity_to_pick: Decimal,
    pub quantity_picked: Decimal,
    pub quantity_withdrawn: Decimal,
    pub unit_price: Option<Decimal>,
}

impl PickingOrderItem {
    pub fn business_key(&self) -> ItemKey {
        match self.material_request_item_id {
            Some(line) => ItemKey::RequestLine(line),
            None => ItemKey::Line(self.id),
        }
    }

    /// 明細数量の整合性を検証
    /// - 取り置き数 ≤ 要求数
    /// - 出庫数 + 取り置き数 ≤ 要求数
    /// - 出庫は全量のみ（出庫数 > 0 なら取り置き数 = 0 かつ 出庫数 = 要求数）
    pub fn validate_quantities(&self) -> Result<(), DomainError> {
        if self.quantity_to_pick <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "資材 {} のピッキング数量は正の値である必要があります（{}）",
                self.material_id, self.quantity_to_pick
            )));
        }
        if self.quantity_picked < Decimal::ZERO || self.quantity_withdrawn < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "資材 {} の取り置き数・出庫数は負にできません",
                self.material_id
            )));
        }
        if self.quantity_picked > self.quantity_to_pick {
            return Err(DomainError::exceeded(
                format!(
                    "資材 {} の取り置き数 {} が要求数 {} を超えています",
                    self.material_id, self.quantity_picked, self.quantity_to_pick
                ),
                self.quantity_to_pick,
            ));
        }
        if self.quantity_withdrawn + self.quantity_picked > self.quantity_to_pick {
            return Err(DomainError::exceeded(
                format!(
                    "資材 {} の出庫数 {} と取り置き数 {} の合計が要求数 {} を超えています",
                    self.material_id,
                    self.quantity_withdrawn,
                    self.quantity_picked,
                    self.quantity_to_pick
                ),
                self.quantity_to_pick - self.quantity_withdrawn,
            ));
        }
        if self.quantity_withdrawn > Decimal::ZERO
            && (self.quantity_picked != Decimal::ZERO
                || self.quantity_withdrawn != self.quantity_to_pick)
        {
            return Err(DomainError::exceeded(
                format!(
                    "資材 {} の部分出庫は許可されていません（要求数 {}、取り置き数 {}、出庫数 {}）",
                    self.material_id,
                    self.quantity_to_pick,
                    self.quantity_picked,
                    self.quantity_withdrawn
                ),
                self.quantity_to_pick,
            ));
        }
        Ok(())
    }
}

/// 明細の入力（作成・更新時）
/// `id` は既存行を指す場合のみ指定する
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PickingOrderItemInput {
    pub id: Option<PickingOrderItemId>,
    pub material_id: MaterialId,
    pub material_request_item_id: Option<MaterialRequestItemId>,
    pub quantity_to_pick: Decimal,
    #[serde(default)]
    pub quantity_picked: Decimal,
    #[serde(default)]
    pub quantity_withdrawn: Decimal,
    pub unit_price: Option<Decimal>,
}

impl PickingOrderItemInput {
    pub fn new(material_id: MaterialId, quantity_to_pick: Decimal) -> Self {
        Self {
            id: None,
            material_id,
            material_request_item_id: None,
            quantity_to_pick,
            quantity_picked: Decimal::ZERO,
            quantity_withdrawn: Decimal::ZERO,
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

    /// 既存明細と同じ内容の入力を作成（数量だけ変える用途）
    pub fn from_item(item: &PickingOrderItem) -> Self {
        Self {
            id: Some(item.id),
            material_id: item.material_id,
            material_request_item_id: item.material_request_item_id,
            quantity_to_pick: item.quantity_to_pick,
            quantity_picked: item.quantity_picked,
            quantity_withdrawn: item.quantity_withdrawn,
            unit_price: item.unit_price,
        }
    }

    pub fn picked(mut self, quantity: Decimal) -> Self {
        self.quantity_picked = quantity;
        self
    }

    pub fn withdrawn(mut self, quantity: Decimal) -> Self {
        self.quantity_withdrawn = quantity;
        self
    }

    fn into_item(self, id: PickingOrderItemId) -> PickingOrderItem {
        PickingOrderItem {
            id,
            material_id: self.material_id,
            material_request_item_id: self.material_request_item_id,
            quantity_to_pick: self.quantity_to_pick,
            quantity_picked: self.quantity_picked,
            quantity_withdrawn: self.quantity_withdrawn,
            unit_price: self.unit_price,
        }
    }
}

/// 既存明細と入力明細の突き合わせ結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDiff {
    /// 突き合わせ後の明細（入力順）
    pub items: Vec<PickingOrderItem>,
    pub added: Vec<PickingOrderItem>,
    /// (変更前, 変更後)
    pub changed: Vec<(PickingOrderItem, PickingOrderItem)>,
    pub removed: Vec<PickingOrderItem>,
}

/// 入力明細を既存明細と業務キーで突き合わせる
/// 入力は明細の全体集合で、入力に無い既存明細は削除扱いになる
pub fn reconcile_items(
    existing: &[PickingOrderItem],
    inputs: Vec<PickingOrderItemInput>,
) -> Result<ItemDiff, DomainError> {
    let mut diff = ItemDiff::default();
    let mut matched: HashSet<PickingOrderItemId> = HashSet::new();

    for input in inputs {
        let current = existing.iter().find(|item| match input.material_request_item_id {
            Some(line) => item.material_request_item_id == Some(line),
            None => input.id == Some(item.id),
        });

        match current {
            Some(current) => {
                if !matched.insert(current.id) {
                    return Err(DomainError::validation(format!(
                        "明細 {} が入力内で重複しています",
                        current.id
                    )));
                }
                if current.material_id != input.material_id
                    || current.material_request_item_id != input.material_request_item_id
                {
                    return Err(DomainError::validation(format!(
                        "明細 {} の資材・要求明細は変更できません",
                        current.id
                    )));
                }
                let merged = input.into_item(current.id);
                if &merged != current {
                    diff.changed.push((current.clone(), merged.clone()));
                }
                diff.items.push(merged);
            }
            None => {
                if let Some(id) = input.id {
                    if existing.iter().any(|item| item.id == id) {
                        return Err(DomainError::validation(format!(
                            "明細 {} の要求明細の紐付けは変更できません",
                            id
                        )));
                    }
                }
                let item = input.into_item(PickingOrderItemId::new());
                diff.added.push(item.clone());
                diff.items.push(item);
            }
        }
    }

    diff.removed = existing
        .iter()
        .filter(|item| !matched.contains(&item.id))
        .cloned()
        .collect();

    let mut keys = HashSet::new();
    for item in &diff.items {
        if !keys.insert(item.business_key()) {
            return Err(DomainError::validation(format!(
                "要求明細 {:?} に対する明細が重複しています",
                item.material_request_item_id
            )));
        }
    }

    Ok(diff)
}

/// 明細の合計からステータスを導出する
/// 1. 出庫数 ≥ 要求数 → FullyWithdrawn
/// 2. 出庫数 > 0 → PartiallyWithdrawn
/// 3. 取り置き数 = 0 → PendingPreparation
/// 4. 取り置き数 ≥ 要求数 → ReadyForPickup
/// 5. それ以外 → InPreparation
pub fn derive_status(items: &[PickingOrderItem]) -> PickingOrderStatus {
    let to_pick: Decimal = items.iter().map(|item| item.quantity_to_pick).sum();
    let picked: Decimal = items.iter().map(|item| item.quantity_picked).sum();
    let withdrawn: Decimal = items.iter().map(|item| item.quantity_withdrawn).sum();

    if to_pick <= Decimal::ZERO {
        return PickingOrderStatus::PendingPreparation;
    }
    if withdrawn >= to_pick {
        PickingOrderStatus::FullyWithdrawn
    } else if withdrawn > Decimal::ZERO {
        PickingOrderStatus::PartiallyWithdrawn
    } else if picked == Decimal::ZERO {
        PickingOrderStatus::PendingPreparation
    } else if picked >= to_pick {
        PickingOrderStatus::ReadyForPickup
    } else {
        PickingOrderStatus::InPreparation
    }
}

/// `operation_in_picking_order` で受け付ける一括操作の明細を作成する
pub fn synthetic_items(
    items: &[PickingOrderItem],
    operation: PickingOrderStatus,
) -> Result<Vec<PickingOrderItemInput>, DomainError> {
    match operation {
        PickingOrderStatus::FullyWithdrawn => {
            Ok(rebuild(items, |item| (Decimal::ZERO, item.quantity_to_pick)))
        }
        PickingOrderStatus::ReadyForPickup => Ok(rebuild(items, |item| {
            if item.quantity_withdrawn > Decimal::ZERO {
                (Decimal::ZERO, item.quantity_withdrawn)
            } else {
                (item.quantity_to_pick, Decimal::ZERO)
            }
        })),
        PickingOrderStatus::Cancelled | PickingOrderStatus::Expired => {
            Ok(rebuild(items, |item| (Decimal::ZERO, item.quantity_withdrawn)))
        }
        other => Err(DomainError::validation(format!(
            "一括操作 {} はサポートされていません",
            other
        ))),
    }
}

fn rebuild<F>(items: &[PickingOrderItem], quantities: F) -> Vec<PickingOrderItemInput>
where
    F: Fn(&PickingOrderItem) -> (Decimal, Decimal),
{
    items
        .iter()
        .map(|item| {
            let (picked, withdrawn) = quantities(item);
            PickingOrderItemInput::from_item(item)
                .picked(picked)
                .withdrawn(withdrawn)
        })
        .collect()
}

/// ピッキングオーダー集約（取り置きのヘッダー）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickingOrder {
    id: PickingOrderId,
    protocol: String,
    warehouse_id: WarehouseId,
    material_request_id: Option<MaterialRequestId>,
    maintenance_request_id: Option<MaintenanceRequestId>,
    status: PickingOrderStatus,
    items: Vec<PickingOrderItem>,
    value_picking_order: Option<Decimal>,
    notes: Option<String>,
    operator_id: Option<OperatorId>,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PickingOrder {
    /// 新しいピッキングオーダーを作成
    /// 初期ステータスは PendingPreparation
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: String,
        warehouse_id: WarehouseId,
        material_request_id: Option<MaterialRequestId>,
        maintenance_request_id: Option<MaintenanceRequestId>,
        items: Vec<PickingOrderItem>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let value_picking_order = Self::compute_value(&items);
        Self {
            id: PickingOrderId::new(),
            protocol,
            warehouse_id,
            material_request_id,
            maintenance_request_id,
            status: PickingOrderStatus::PendingPreparation,
            items,
            value_picking_order,
            notes,
            operator_id,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// データベースから取得したデータでピッキングオーダーを再構築
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: PickingOrderId,
        protocol: String,
        warehouse_id: WarehouseId,
        material_request_id: Option<MaterialRequestId>,
        maintenance_request_id: Option<MaintenanceRequestId>,
        status: PickingOrderStatus,
        items: Vec<PickingOrderItem>,
        value_picking_order: Option<Decimal>,
        notes: Option<String>,
        operator_id: Option<OperatorId>,
        expires_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            protocol,
            warehouse_id,
            material_request_id,
            maintenance_request_id,
            status,
            items,
            value_picking_order,
            notes,
            operator_id,
            expires_at,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> PickingOrderId {
        self.id
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn material_request_id(&self) -> Option<MaterialRequestId> {
        self.material_request_id
    }

    pub fn maintenance_request_id(&self) -> Option<MaintenanceRequestId> {
        self.maintenance_request_id
    }

    pub fn status(&self) -> PickingOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[PickingOrderItem] {
        &self.items
    }

    pub fn value_picking_order(&self) -> Option<Decimal> {
        self.value_picking_order
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn operator_id(&self) -> Option<OperatorId> {
        self.operator_id
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn total_picked(&self) -> Decimal {
        self.items.iter().map(|item| item.quantity_picked).sum()
    }

    pub fn total_withdrawn(&self) -> Decimal {
        self.items.iter().map(|item| item.quantity_withdrawn).sum()
    }

    /// 期限切れ対象か（終端ステータスでなく、期限を過ぎている）
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// 編集可能か確認する
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::conflict(format!(
                "ピッキングオーダー {} はステータス {} のため編集できません",
                self.protocol, self.status
            )));
        }
        Ok(())
    }

    /// 明細を置き換え、金額とステータスを再計算する
    /// `explicit` は終端への遷移（Cancelled / Expired）時のみ指定する
    pub fn apply_items(
        &mut self,
        items: Vec<PickingOrderItem>,
        explicit: Option<PickingOrderStatus>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let derived = derive_status(&items);
        let status = match explicit {
            Some(status @ (PickingOrderStatus::Cancelled | PickingOrderStatus::Expired)) => {
                if let Some(held) = items.iter().find(|item| item.quantity_picked > Decimal::ZERO)
                {
                    return Err(DomainError::validation(format!(
                        "資材 {} の取り置き数 {} が残っているため {} にできません",
                        held.material_id, held.quantity_picked, status
                    )));
                }
                status
            }
            Some(status) if status != derived => {
                return Err(DomainError::validation(format!(
                    "指定されたステータス {} は明細から導出されるステータス {} と一致しません",
                    status, derived
                )));
            }
            _ => derived,
        };
        self.value_picking_order = Self::compute_value(&items);
        self.items = items;
        self.status = status;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_notes(&mut self, notes: Option<String>) {
        self.notes = notes;
    }

    pub fn set_expires_at(&mut self, expires_at: Option<DateTime<Utc>>) {
        self.expires_at = expires_at;
    }

    fn compute_value(items: &[PickingOrderItem]) -> Option<Decimal> {
        total_value(
            items
                .iter()
                .map(|item| (item.quantity_to_pick, item.unit_price)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(to_pick: Decimal, picked: Decimal, withdrawn: Decimal) -> PickingOrderItem {
        PickingOrderItem {
            id: PickingOrderItemId::new(),
            material_id: MaterialId::new(),
            material_request_item_id: None,
            quantity_to_pick: to_pick,
            quantity_picked: picked,
            quantity_withdrawn: withdrawn,
            unit_price: None,
        }
    }

    fn order(items: Vec<PickingOrderItem>) -> PickingOrder {
        PickingOrder::new(
            "PCK-000001".to_string(),
            WarehouseId::new(),
            None,
            None,
            items,
            None,
            None,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_validate_quantities_accepts_consistent_item() {
        assert!(item(dec!(10), dec!(4), dec!(0)).validate_quantities().is_ok());
        assert!(item(dec!(10), dec!(0), dec!(10)).validate_quantities().is_ok());
    }

    #[test]
    fn test_picked_above_to_pick_is_rejected() {
        let result = item(dec!(10), dec!(11), dec!(0)).validate_quantities();
        assert!(matches!(
            result,
            Err(DomainError::ConsistencyViolation { ceiling: Some(c), .. }) if c == dec!(10)
        ));
    }

    #[test]
    fn test_partial_withdrawal_is_rejected() {
        let result = item(dec!(10), dec!(5), dec!(5)).validate_quantities();
        assert!(matches!(result, Err(DomainError::ConsistencyViolation { .. })));

        let result = item(dec!(10), dec!(0), dec!(5)).validate_quantities();
        assert!(matches!(result, Err(DomainError::ConsistencyViolation { .. })));
    }

    #[test]
    fn test_zero_to_pick_is_invalid() {
        let result = item(dec!(0), dec!(0), dec!(0)).validate_quantities();
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_derive_status() {
        assert_eq!(
            derive_status(&[item(dec!(10), dec!(0), dec!(0))]),
            PickingOrderStatus::PendingPreparation
        );
        assert_eq!(
            derive_status(&[item(dec!(10), dec!(3), dec!(0))]),
            PickingOrderStatus::InPreparation
        );
        assert_eq!(
            derive_status(&[item(dec!(10), dec!(10), dec!(0))]),
            PickingOrderStatus::ReadyForPickup
        );
        assert_eq!(
            derive_status(&[item(dec!(10), dec!(0), dec!(10))]),
            PickingOrderStatus::FullyWithdrawn
        );
        assert_eq!(
            derive_status(&[
                item(dec!(10), dec!(0), dec!(10)),
                item(dec!(5), dec!(5), dec!(0)),
            ]),
            PickingOrderStatus::PartiallyWithdrawn
        );
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            PickingOrderStatus::PendingPreparation,
            PickingOrderStatus::InPreparation,
            PickingOrderStatus::ReadyForPickup,
            PickingOrderStatus::PartiallyWithdrawn,
            PickingOrderStatus::FullyWithdrawn,
            PickingOrderStatus::Cancelled,
            PickingOrderStatus::Expired,
        ] {
            assert_eq!(PickingOrderStatus::from_string(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn test_reconcile_by_request_line() {
        let line = MaterialRequestItemId::new();
        let mut existing = item(dec!(10), dec!(0), dec!(0));
        existing.material_request_item_id = Some(line);

        let input = PickingOrderItemInput::new(existing.material_id, dec!(10))
            .for_request_line(line)
            .picked(dec!(4));
        let diff = reconcile_items(std::slice::from_ref(&existing), vec![input]).unwrap();

        assert!(diff.added.is_empty());
        assert!(diff.removed.is_empty());
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.items[0].id, existing.id);
        assert_eq!(diff.items[0].quantity_picked, dec!(4));
    }

    #[test]
    fn test_reconcile_add_and_remove() {
        let existing = item(dec!(10), dec!(2), dec!(0));
        let added = PickingOrderItemInput::new(MaterialId::new(), dec!(3));
        let diff = reconcile_items(std::slice::from_ref(&existing), vec![added]).unwrap();

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed, vec![existing]);
        assert!(diff.changed.is_empty());
    }

    #[test]
    fn test_reconcile_unchanged_item_is_not_reported() {
        let existing = item(dec!(10), dec!(2), dec!(0));
        let input = PickingOrderItemInput::from_item(&existing);
        let diff = reconcile_items(std::slice::from_ref(&existing), vec![input]).unwrap();
        assert!(diff.changed.is_empty());
        assert_eq!(diff.items, vec![existing]);
    }

    #[test]
    fn test_reconcile_rejects_material_change() {
        let existing = item(dec!(10), dec!(0), dec!(0));
        let mut input = PickingOrderItemInput::from_item(&existing);
        input.material_id = MaterialId::new();
        assert!(reconcile_items(&[existing], vec![input]).is_err());
    }

    #[test]
    fn test_synthetic_items_for_full_withdrawal() {
        let items = vec![item(dec!(10), dec!(10), dec!(0))];
        let inputs = synthetic_items(&items, PickingOrderStatus::FullyWithdrawn).unwrap();
        assert_eq!(inputs[0].quantity_picked, dec!(0));
        assert_eq!(inputs[0].quantity_withdrawn, dec!(10));
    }

    #[test]
    fn test_synthetic_items_rejects_unsupported_operation() {
        let items = vec![item(dec!(10), dec!(0), dec!(0))];
        assert!(synthetic_items(&items, PickingOrderStatus::InPreparation).is_err());
    }

    #[test]
    fn test_apply_items_with_explicit_cancel_requires_no_reservation() {
        let mut order = order(vec![item(dec!(10), dec!(0), dec!(0))]);
        let held = vec![item(dec!(10), dec!(4), dec!(0))];
        assert!(order
            .apply_items(held, Some(PickingOrderStatus::Cancelled), Utc::now())
            .is_err());

        let released = vec![item(dec!(10), dec!(0), dec!(0))];
        order
            .apply_items(released, Some(PickingOrderStatus::Cancelled), Utc::now())
            .unwrap();
        assert_eq!(order.status(), PickingOrderStatus::Cancelled);
        assert!(order.ensure_editable().is_err());
    }

    #[test]
    fn test_apply_items_rejects_mismatched_explicit_status() {
        let mut order = order(vec![item(dec!(10), dec!(0), dec!(0))]);
        let result = order.apply_items(
            vec![item(dec!(10), dec!(2), dec!(0))],
            Some(PickingOrderStatus::ReadyForPickup),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_value_requires_every_price() {
        let mut priced = item(dec!(2), dec!(0), dec!(0));
        priced.unit_price = Some(dec!(5));
        let unpriced = item(dec!(1), dec!(0), dec!(0));

        assert_eq!(order(vec![priced.clone()]).value_picking_order(), Some(dec!(10)));
        assert_eq!(order(vec![priced, unpriced]).value_picking_order(), None);
    }

    #[test]
    fn test_is_expired_at() {
        let now = Utc::now();
        let mut order = order(vec![item(dec!(1), dec!(0), dec!(0))]);
        assert!(!order.is_expired_at(now));
        order.set_expires_at(Some(now - chrono::Duration::hours(1)));
        assert!(order.is_expired_at(now));
    }
}
