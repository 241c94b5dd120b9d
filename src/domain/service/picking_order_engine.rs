use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    format_protocol, reconcile_items, synthetic_items, ItemDiff, MaintenanceRequestId, MaterialId,
    MaterialRequest, MaterialRequestId, MaterialRequestItemId, MovementOrigin, MovementSubType,
    NewStockMovement, OperatorId, PickingOrder, PickingOrderId, PickingOrderItem,
    PickingOrderItemInput, PickingOrderStatus, WarehouseId, WithdrawalItemInput,
};
use crate::domain::port::{Logger, PickingOrderRepository, SequenceGenerator, Session};
use crate::domain::service::restriction_order_engine::load_request;
use crate::domain::service::{
    BalanceCheckMode, BalanceKind, BalanceValidator, BalanceView, CreateWithdrawal,
    ExcludedOrder, MaterialNeed, RequestLineDemand, RestrictionOrderEngine, StockLedger,
    WithdrawalProcessor,
};

const COMPONENT: &str = "PickingOrderEngine";
const SEQUENCE: &str = "picking_order";
const PROTOCOL_PREFIX: &str = "PCK";

/// ピッキングオーダー作成コマンド
/// 作成時は取り置きを行わない（取り置き数・出庫数は 0）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatePickingOrder {
    pub warehouse_id: WarehouseId,
    pub material_request_id: Option<MaterialRequestId>,
    pub maintenance_request_id: Option<MaintenanceRequestId>,
    pub items: Vec<PickingOrderItemInput>,
    pub notes: Option<String>,
    pub operator_id: Option<OperatorId>,
    /// 未指定の場合は設定された有効期間から計算する
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreatePickingOrder {
    pub fn new(warehouse_id: WarehouseId, items: Vec<PickingOrderItemInput>) -> Self {
        Self {
            warehouse_id,
            material_request_id: None,
            maintenance_request_id: None,
            items,
            notes: None,
            operator_id: None,
            expires_at: None,
        }
    }

    pub fn for_request(mut self, material_request_id: MaterialRequestId) -> Self {
        self.material_request_id = Some(material_request_id);
        self
    }
}

/// ピッキングオーダー更新コマンド
/// `items` は明細の全体集合（含まれない既存明細は削除される）
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdatePickingOrder {
    pub items: Option<Vec<PickingOrderItemInput>>,
    /// Cancelled / Expired 以外は導出されるステータスと一致する必要がある
    pub status: Option<PickingOrderStatus>,
    pub notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub operator_id: Option<OperatorId>,
}

impl UpdatePickingOrder {
    pub fn items(items: Vec<PickingOrderItemInput>) -> Self {
        Self {
            items: Some(items),
            ..Self::default()
        }
    }
}

/// 明細の差分から求めた在庫移動の計画
#[derive(Debug, Default)]
struct MovementPlan {
    /// (明細, 解除数量) 保存前に記録する
    releases: Vec<(PickingOrderItem, Decimal)>,
    /// (明細, 取り置き数量) 保存後に記録する
    reserves: Vec<(PickingOrderItem, Decimal)>,
    /// (明細, 出庫数量) 保存後に出庫として記録する
    withdrawals: Vec<(PickingOrderItem, Decimal)>,
    /// 資材ごとの引当可能数の正味の必要量
    needs: BTreeMap<MaterialId, Decimal>,
}

impl MovementPlan {
    fn from_diff(diff: &ItemDiff) -> Result<Self, DomainError> {
        let mut plan = MovementPlan::default();

        for item in &diff.added {
            plan.track(item, item.quantity_picked, item.quantity_withdrawn);
        }
        for (old, new) in &diff.changed {
            if new.quantity_withdrawn < old.quantity_withdrawn {
                return Err(DomainError::exceeded(
                    format!(
                        "資材 {} の出庫数は減らせません（{} → {}）",
                        new.material_id, old.quantity_withdrawn, new.quantity_withdrawn
                    ),
                    old.quantity_withdrawn,
                ));
            }
            plan.track(
                new,
                new.quantity_picked - old.quantity_picked,
                new.quantity_withdrawn - old.quantity_withdrawn,
            );
        }
        for item in &diff.removed {
            if item.quantity_withdrawn > Decimal::ZERO {
                return Err(DomainError::inconsistent(format!(
                    "資材 {} は出庫済み（{}）のため明細を削除できません",
                    item.material_id, item.quantity_withdrawn
                )));
            }
            plan.track(item, -item.quantity_picked, Decimal::ZERO);
        }
        Ok(plan)
    }

    fn track(&mut self, item: &PickingOrderItem, picked_delta: Decimal, withdrawn_delta: Decimal) {
        if picked_delta < Decimal::ZERO {
            self.releases.push((item.clone(), -picked_delta));
        } else if picked_delta > Decimal::ZERO {
            self.reserves.push((item.clone(), picked_delta));
        }
        if withdrawn_delta > Decimal::ZERO {
            self.withdrawals.push((item.clone(), withdrawn_delta));
        }
        *self.needs.entry(item.material_id).or_default() += picked_delta + withdrawn_delta;
    }

    fn material_needs(&self) -> Vec<MaterialNeed> {
        self.needs
            .iter()
            .filter(|(_, quantity)| **quantity > Decimal::ZERO)
            .map(|(material_id, quantity)| MaterialNeed {
                material_id: *material_id,
                quantity: *quantity,
            })
            .collect()
    }
}

/// ピッキングオーダーエンジン
/// 取り置き（予約）のライフサイクルを管理する
pub struct PickingOrderEngine {
    ledger: Arc<dyn StockLedger>,
    validator: Arc<dyn BalanceValidator>,
    restriction_orders: Arc<RestrictionOrderEngine>,
    withdrawals: Arc<WithdrawalProcessor>,
    logger: Arc<dyn Logger>,
    ttl: Option<Duration>,
}

impl PickingOrderEngine {
    /// 新しいピッキングオーダーエンジンを作成
    ///
    /// # Arguments
    /// * `ttl` - 作成からの有効期間（None の場合は期限なし）
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        validator: Arc<dyn BalanceValidator>,
        restriction_orders: Arc<RestrictionOrderEngine>,
        withdrawals: Arc<WithdrawalProcessor>,
        logger: Arc<dyn Logger>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            ledger,
            validator,
            restriction_orders,
            withdrawals,
            logger,
            ttl,
        }
    }

    /// ピッキングオーダーを作成する
    pub async fn create(
        &self,
        session: &mut dyn Session,
        mut command: CreatePickingOrder,
    ) -> Result<PickingOrder, DomainError> {
        if command.items.is_empty() {
            return Err(DomainError::validation("ピッキング明細が空です"));
        }
        if let Some(input) = command.items.iter().find(|input| {
            input.quantity_picked != Decimal::ZERO || input.quantity_withdrawn != Decimal::ZERO
        }) {
            return Err(DomainError::validation(format!(
                "資材 {} の取り置き数・出庫数は作成時に指定できません",
                input.material_id
            )));
        }

        let request = match command.material_request_id {
            Some(request_id) => Some(load_request(session, request_id).await?),
            None => None,
        };
        resolve_request_lines(request.as_ref(), &mut command.items)?;

        let diff = reconcile_items(&[], command.items)?;
        for item in &diff.items {
            item.validate_quantities()?;
        }

        if let Some(request) = request.as_ref() {
            self.validator
                .validate_request_lines(
                    session,
                    request.id,
                    command.warehouse_id,
                    &demands(&diff.items),
                    BalanceCheckMode::new(BalanceKind::Reservation, BalanceView::Potential),
                )
                .await?;
        }

        let mut needs: BTreeMap<MaterialId, Decimal> = BTreeMap::new();
        for item in &diff.items {
            *needs.entry(item.material_id).or_default() += item.quantity_to_pick;
        }
        let needs = needs
            .into_iter()
            .map(|(material_id, quantity)| MaterialNeed {
                material_id,
                quantity,
            })
            .collect::<Vec<_>>();
        // 作成時は取り置かないため、解除対象は使わず受け入れ可否の確認のみ
        self.validator
            .validate_warehouse_stock(
                session,
                command.warehouse_id,
                &needs,
                BalanceKind::Reservation,
                command.material_request_id,
            )
            .await?;

        let now = Utc::now();
        let expires_at = command
            .expires_at
            .or_else(|| self.ttl.map(|ttl| now + ttl));
        let maintenance_request_id = command.maintenance_request_id.or_else(|| {
            request
                .as_ref()
                .and_then(|request| request.maintenance_request_id)
        });

        let sequence = session.next_sequence(SEQUENCE).await?;
        let order = PickingOrder::new(
            format_protocol(PROTOCOL_PREFIX, sequence),
            command.warehouse_id,
            command.material_request_id,
            maintenance_request_id,
            diff.items,
            command.notes,
            command.operator_id,
            expires_at,
            now,
        );
        session.save_picking_order(&order).await?;

        self.log_info("Picking order created", &order, None);
        Ok(order)
    }

    /// ピッキングオーダーを更新する
    /// 明細の差分に応じて取り置き・解除・出庫を記録する
    pub async fn update(
        &self,
        session: &mut dyn Session,
        order_id: PickingOrderId,
        command: UpdatePickingOrder,
    ) -> Result<PickingOrder, DomainError> {
        let mut order = load_order(session, order_id).await?;
        order.ensure_editable()?;
        let previous_status = order.status();

        let request = match order.material_request_id() {
            Some(request_id) => Some(load_request(session, request_id).await?),
            None => None,
        };
        let mut inputs = match command.items {
            Some(items) => items,
            None => order
                .items()
                .iter()
                .map(PickingOrderItemInput::from_item)
                .collect(),
        };
        if inputs.is_empty() {
            return Err(DomainError::validation("ピッキング明細が空です"));
        }
        resolve_request_lines(request.as_ref(), &mut inputs)?;

        let diff = reconcile_items(order.items(), inputs)?;
        for item in &diff.items {
            item.validate_quantities()?;
        }
        let plan = MovementPlan::from_diff(&diff)?;

        if let Some(request) = request.as_ref() {
            self.validator
                .validate_request_lines(
                    session,
                    request.id,
                    order.warehouse_id(),
                    &demands(&diff.items),
                    BalanceCheckMode::new(BalanceKind::Reservation, BalanceView::Potential)
                        .excluding(ExcludedOrder::PickingOrder(order.id())),
                )
                .await?;
        }

        let releases = self
            .validator
            .validate_warehouse_stock(
                session,
                order.warehouse_id(),
                &plan.material_needs(),
                BalanceKind::Reservation,
                order.material_request_id(),
            )
            .await?;

        order.apply_items(diff.items.clone(), command.status, Utc::now())?;
        if command.notes.is_some() {
            order.set_notes(command.notes);
        }
        if command.expires_at.is_some() {
            order.set_expires_at(command.expires_at);
        }

        // 削除される明細を参照する移動は、明細の削除前に記録する
        for (item, quantity) in &plan.releases {
            self.record(
                session,
                &order,
                item,
                MovementSubType::ReleasePickingReservation,
                *quantity,
                command.operator_id,
            )
            .await?;
        }
        session.save_picking_order(&order).await?;

        self.restriction_orders
            .release(session, &releases, command.operator_id)
            .await?;
        for (item, quantity) in &plan.reserves {
            self.record(
                session,
                &order,
                item,
                MovementSubType::ReserveForPickingOrder,
                *quantity,
                command.operator_id,
            )
            .await?;
        }

        if !plan.withdrawals.is_empty() {
            let items = plan
                .withdrawals
                .iter()
                .map(|(item, quantity)| {
                    WithdrawalItemInput::new(item.material_id, *quantity)
                        .for_request_line(item.material_request_item_id)
                        .from_picking_item(item.id)
                        .with_unit_price(item.unit_price)
                })
                .collect();
            let mut withdrawal =
                CreateWithdrawal::new(order.warehouse_id(), MovementSubType::OutServiceUse, items)
                    .for_request(order.material_request_id())
                    .by(command.operator_id.or(order.operator_id()));
            withdrawal.maintenance_request_id = order.maintenance_request_id();
            withdrawal.picking_order_id = Some(order.id());
            self.withdrawals.create(session, withdrawal, true).await?;
        }

        self.log_info("Picking order updated", &order, Some(previous_status));
        Ok(order)
    }

    /// 一括操作（Cancelled / Expired / FullyWithdrawn / ReadyForPickup）を実行する
    /// 操作ごとの明細を組み立てて `update` に委譲する
    pub async fn operation_in_picking_order(
        &self,
        session: &mut dyn Session,
        order_id: PickingOrderId,
        operator_id: Option<OperatorId>,
        operation: PickingOrderStatus,
    ) -> Result<PickingOrder, DomainError> {
        let order = load_order(session, order_id).await?;
        let items = synthetic_items(order.items(), operation)?;
        let status = match operation {
            PickingOrderStatus::Cancelled | PickingOrderStatus::Expired => Some(operation),
            _ => None,
        };
        self.update(
            session,
            order_id,
            UpdatePickingOrder {
                items: Some(items),
                status,
                notes: None,
                expires_at: None,
                operator_id,
            },
        )
        .await
    }

    /// ピッキングオーダーを削除する
    /// 各明細の取り置き数を解除してから削除する（出庫済みの明細がある場合は競合）
    pub async fn delete(
        &self,
        session: &mut dyn Session,
        order_id: PickingOrderId,
        operator_id: Option<OperatorId>,
    ) -> Result<(), DomainError> {
        let order = load_order(session, order_id).await?;
        if order.total_withdrawn() > Decimal::ZERO {
            return Err(DomainError::conflict(format!(
                "ピッキングオーダー {} は出庫済みの明細があるため削除できません",
                order.protocol()
            )));
        }

        for item in order.items() {
            self.record(
                session,
                &order,
                item,
                MovementSubType::ReleasePickingReservation,
                item.quantity_picked,
                operator_id,
            )
            .await?;
        }
        session.delete_picking_order(order_id).await?;

        self.log_info("Picking order deleted", &order, None);
        Ok(())
    }

    pub async fn show(
        &self,
        session: &mut dyn Session,
        order_id: PickingOrderId,
    ) -> Result<PickingOrder, DomainError> {
        load_order(session, order_id).await
    }

    pub async fn list(&self, session: &mut dyn Session) -> Result<Vec<PickingOrder>, DomainError> {
        Ok(session.list_picking_orders().await?)
    }

    /// 期限切れの対象となるピッキングオーダーのIDを取得する
    pub async fn list_expirable(
        &self,
        session: &mut dyn Session,
        now: DateTime<Utc>,
    ) -> Result<Vec<PickingOrderId>, DomainError> {
        Ok(session
            .list_expirable_picking_orders(now)
            .await?
            .into_iter()
            .filter(|order| order.is_expired_at(now))
            .map(|order| order.id())
            .collect())
    }

    async fn record(
        &self,
        session: &mut dyn Session,
        order: &PickingOrder,
        item: &PickingOrderItem,
        sub_type: MovementSubType,
        quantity: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<(), DomainError> {
        self.ledger
            .record(
                session,
                NewStockMovement::new(order.warehouse_id(), item.material_id, sub_type, quantity)
                    .with_origin(MovementOrigin::PickingOrderItem(item.id))
                    .with_unit_price(item.unit_price)
                    .with_material_request(order.material_request_id())
                    .with_maintenance_request(order.maintenance_request_id())
                    .by(operator_id),
            )
            .await?;
        Ok(())
    }

    fn log_info(
        &self,
        message: &str,
        order: &PickingOrder,
        previous_status: Option<PickingOrderStatus>,
    ) {
        let mut context = HashMap::new();
        context.insert("protocol".to_string(), order.protocol().to_string());
        context.insert("status".to_string(), order.status().to_string());
        if let Some(previous) = previous_status {
            context.insert("previous_status".to_string(), previous.to_string());
        }
        context.insert("total_picked".to_string(), order.total_picked().to_string());
        context.insert(
            "total_withdrawn".to_string(),
            order.total_withdrawn().to_string(),
        );
        self.logger
            .info(COMPONENT, message, Some(order.id().as_uuid()), Some(context));
    }
}

/// 要求明細の存在と資材を確認し、単価が無ければ要求明細の単価を使う
fn resolve_request_lines(
    request: Option<&MaterialRequest>,
    inputs: &mut [PickingOrderItemInput],
) -> Result<(), DomainError> {
    for input in inputs.iter_mut() {
        let Some(line) = input.material_request_item_id else {
            continue;
        };
        let request = request.ok_or_else(|| {
            DomainError::validation(format!(
                "要求明細 {} を指定するには資材要求との紐付けが必要です",
                line
            ))
        })?;
        let request_item = request.require_item(line)?;
        if request_item.material_id != input.material_id {
            return Err(DomainError::validation(format!(
                "要求明細 {} の資材とピッキング明細の資材が一致しません",
                line
            )));
        }
        if input.unit_price.is_none() {
            input.unit_price = request_item.unit_price;
        }
    }
    Ok(())
}

fn demands(items: &[PickingOrderItem]) -> Vec<RequestLineDemand> {
    let mut totals: BTreeMap<MaterialRequestItemId, Decimal> = BTreeMap::new();
    for item in items {
        if let Some(line) = item.material_request_item_id {
            *totals.entry(line).or_default() += item.quantity_to_pick;
        }
    }
    totals
        .into_iter()
        .map(|(line, quantity)| RequestLineDemand {
            material_request_item_id: line,
            quantity,
        })
        .collect()
}

async fn load_order(
    session: &mut dyn Session,
    order_id: PickingOrderId,
) -> Result<PickingOrder, DomainError> {
    session.find_picking_order(order_id).await?.ok_or_else(|| {
        DomainError::not_found(format!("ピッキングオーダー {} が見つかりません", order_id))
    })
}
