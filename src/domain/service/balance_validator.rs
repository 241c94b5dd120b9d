use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    MaterialId, MaterialRequest, MaterialRequestId, MaterialRequestItemId, PickingOrderId,
    PickingOrderStatus, RestrictionOrderId, RestrictionOrderItemId, WarehouseId, WithdrawalId,
};
use crate::domain::port::{
    Logger, MaterialRequestRepository, PickingOrderRepository, RestrictionOrderRepository,
    Session, StockRecordRepository, WithdrawalRepository,
};

const COMPONENT: &str = "BalanceValidator";

/// 検証するコミットの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceKind {
    Reservation,
    Restriction,
    Withdrawal,
}

impl BalanceKind {
    fn label(&self) -> &'static str {
        match self {
            BalanceKind::Reservation => "引当",
            BalanceKind::Restriction => "制限",
            BalanceKind::Withdrawal => "出庫",
        }
    }
}

/// 残量の見方
/// - Potential: 要求数 − 他のオーダーによるコミット
/// - Effective: Potential と（倉庫の引当可能数 + 自身の保持分）の小さい方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceView {
    Potential,
    Effective,
}

/// 検証から除外する編集中のオーダー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludedOrder {
    PickingOrder(PickingOrderId),
    RestrictionOrder(RestrictionOrderId),
    Withdrawal(WithdrawalId),
}

/// 検証モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCheckMode {
    pub kind: BalanceKind,
    pub view: BalanceView,
    pub exclude: Option<ExcludedOrder>,
}

impl BalanceCheckMode {
    pub fn new(kind: BalanceKind, view: BalanceView) -> Self {
        Self {
            kind,
            view,
            exclude: None,
        }
    }

    pub fn excluding(mut self, order: ExcludedOrder) -> Self {
        self.exclude = Some(order);
        self
    }
}

/// 要求明細に対してオーダーがコミットしようとする数量（変更後の合計）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLineDemand {
    pub material_request_item_id: MaterialRequestItemId,
    pub quantity: Decimal,
}

/// 倉庫在庫から追加で必要になる数量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialNeed {
    pub material_id: MaterialId,
    pub quantity: Decimal,
}

/// 要求明細ごとの残量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBalance {
    pub material_request_item_id: MaterialRequestItemId,
    pub material_id: MaterialId,
    pub requested: Decimal,
    pub committed: Decimal,
    pub potential: Decimal,
    pub effective: Option<Decimal>,
}

impl LineBalance {
    pub fn ceiling(&self) -> Decimal {
        match self.effective {
            Some(effective) => self.potential.min(effective),
            None => self.potential,
        }
    }
}

/// 不足分を補うために解除が必要な制限明細
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestrictionRelease {
    pub restriction_order_id: RestrictionOrderId,
    pub item_id: RestrictionOrderItemId,
    pub material_id: MaterialId,
    pub quantity: Decimal,
}

/// 残量検証トレイト
/// 読み取りのみで、書き込みは行わない
#[async_trait]
pub trait BalanceValidator: Send + Sync {
    /// 要求明細ごとの残量を計算する
    async fn line_balances(
        &self,
        session: &mut dyn Session,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
        mode: BalanceCheckMode,
    ) -> Result<Vec<LineBalance>, DomainError>;

    /// 要求明細に対するコミット数量が残量を超えないか検証する
    ///
    /// # Arguments
    /// * `session` - 実行中のセッション
    /// * `request_id` - 対象の資材要求
    /// * `warehouse_id` - 実効残量の計算に使う倉庫
    /// * `lines` - 明細ごとのコミット数量（編集中オーダーの変更後の合計）
    /// * `mode` - 検証モード
    async fn validate_request_lines(
        &self,
        session: &mut dyn Session,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
        lines: &[RequestLineDemand],
        mode: BalanceCheckMode,
    ) -> Result<(), DomainError>;

    /// 倉庫の引当可能数で追加の必要数量を賄えるか検証する
    /// 不足分を資材要求自身の制限で賄える場合は、解除すべき制限明細を返す
    async fn validate_warehouse_stock(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
        needs: &[MaterialNeed],
        kind: BalanceKind,
        request_id: Option<MaterialRequestId>,
    ) -> Result<Vec<RestrictionRelease>, DomainError>;
}

/// 資材要求を基準とする残量検証の実装
pub struct MaterialRequestBalanceValidator {
    logger: Arc<dyn Logger>,
}

impl MaterialRequestBalanceValidator {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }

    async fn load_request(
        session: &mut dyn Session,
        request_id: MaterialRequestId,
    ) -> Result<MaterialRequest, DomainError> {
        session
            .find_material_request(request_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("資材要求 {} が見つかりません", request_id))
            })
    }

    /// 明細ごとのコミット数量を集計する
    /// (他オーダーのコミット, 編集中オーダーの保持分, 制限による保持分)
    async fn commitments(
        session: &mut dyn Session,
        request: &MaterialRequest,
        mode: BalanceCheckMode,
    ) -> Result<HashMap<MaterialRequestItemId, Commitment>, DomainError> {
        let mut commitments: HashMap<MaterialRequestItemId, Commitment> = HashMap::new();

        for order in session
            .list_picking_orders_by_material_request(request.id)
            .await?
        {
            let excluded = mode.exclude == Some(ExcludedOrder::PickingOrder(order.id()));
            let released = matches!(
                order.status(),
                PickingOrderStatus::Cancelled | PickingOrderStatus::Expired
            );
            for item in order.items() {
                let Some(line) = item.material_request_item_id else {
                    continue;
                };
                let entry = commitments.entry(line).or_default();
                if excluded {
                    entry.own_hold += item.quantity_picked;
                } else if released {
                    entry.consumed += item.quantity_withdrawn;
                } else {
                    entry.consumed += item.quantity_to_pick;
                }
            }
        }

        for withdrawal in session
            .list_withdrawals_by_material_request(request.id)
            .await?
        {
            // ピッキング経由の出庫はピッキングオーダー側で集計済み
            if withdrawal.picking_order_id().is_some()
                || mode.exclude == Some(ExcludedOrder::Withdrawal(withdrawal.id()))
            {
                continue;
            }
            for item in withdrawal.items() {
                if let Some(line) = item.material_request_item_id {
                    commitments.entry(line).or_default().consumed += item.quantity_withdrawn;
                }
            }
        }

        if let Some(order) = session
            .find_restriction_order_by_material_request(request.id)
            .await?
        {
            let excluded = mode.exclude == Some(ExcludedOrder::RestrictionOrder(order.id()));
            for item in order.items() {
                let entry = commitments.entry(item.material_request_item_id).or_default();
                if excluded {
                    entry.own_hold += item.quantity_restricted;
                } else {
                    entry.restricted += item.quantity_restricted;
                }
            }
        }

        Ok(commitments)
    }

    fn reject(&self, message: String, ceiling: Decimal) -> DomainError {
        let mut context = HashMap::new();
        context.insert("ceiling".to_string(), ceiling.to_string());
        self.logger.warn(COMPONENT, &message, None, Some(context));
        DomainError::exceeded(message, ceiling)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Commitment {
    consumed: Decimal,
    restricted: Decimal,
    own_hold: Decimal,
}

#[async_trait]
impl BalanceValidator for MaterialRequestBalanceValidator {
    async fn line_balances(
        &self,
        session: &mut dyn Session,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
        mode: BalanceCheckMode,
    ) -> Result<Vec<LineBalance>, DomainError> {
        let request = Self::load_request(session, request_id).await?;
        let commitments = Self::commitments(session, &request, mode).await?;

        let mut balances = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let commitment = commitments.get(&item.id).copied().unwrap_or_default();
            // 制限は同じ要求に対する保持なので、引当・出庫の上限を減らさない
            let committed = match mode.kind {
                BalanceKind::Restriction => commitment.consumed + commitment.restricted,
                BalanceKind::Reservation | BalanceKind::Withdrawal => commitment.consumed,
            };
            let potential = (item.quantity_requested - committed).max(Decimal::ZERO);

            let effective = match mode.view {
                BalanceView::Potential => None,
                BalanceView::Effective => {
                    let available = session
                        .find_stock_record(warehouse_id, item.material_id)
                        .await?
                        .map(|record| record.available_quantity())
                        .unwrap_or(Decimal::ZERO);
                    let held = match mode.kind {
                        BalanceKind::Restriction => commitment.own_hold,
                        BalanceKind::Reservation | BalanceKind::Withdrawal => {
                            commitment.own_hold + commitment.restricted
                        }
                    };
                    Some((available + held).max(Decimal::ZERO))
                }
            };

            balances.push(LineBalance {
                material_request_item_id: item.id,
                material_id: item.material_id,
                requested: item.quantity_requested,
                committed,
                potential,
                effective,
            });
        }
        Ok(balances)
    }

    async fn validate_request_lines(
        &self,
        session: &mut dyn Session,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
        lines: &[RequestLineDemand],
        mode: BalanceCheckMode,
    ) -> Result<(), DomainError> {
        let balances = self
            .line_balances(session, request_id, warehouse_id, mode)
            .await?;

        // 同じ要求明細への複数行は合算して検証する
        let mut demands: BTreeMap<MaterialRequestItemId, Decimal> = BTreeMap::new();
        for line in lines {
            *demands.entry(line.material_request_item_id).or_default() += line.quantity;
        }

        for (line, quantity) in demands {
            let balance = balances
                .iter()
                .find(|balance| balance.material_request_item_id == line)
                .ok_or_else(|| {
                    DomainError::validation(format!(
                        "要求明細 {} は資材要求 {} に含まれていません",
                        line, request_id
                    ))
                })?;
            let ceiling = balance.ceiling();
            if quantity > ceiling {
                return Err(self.reject(
                    format!(
                        "要求明細 {} の{}数量 {} が残量 {} を超えています（要求数 {}、コミット済み {}）",
                        line,
                        mode.kind.label(),
                        quantity,
                        ceiling,
                        balance.requested,
                        balance.committed
                    ),
                    ceiling,
                ));
            }
        }
        Ok(())
    }

    async fn validate_warehouse_stock(
        &self,
        session: &mut dyn Session,
        warehouse_id: WarehouseId,
        needs: &[MaterialNeed],
        kind: BalanceKind,
        request_id: Option<MaterialRequestId>,
    ) -> Result<Vec<RestrictionRelease>, DomainError> {
        let mut totals: BTreeMap<MaterialId, Decimal> = BTreeMap::new();
        for need in needs.iter().filter(|need| need.quantity > Decimal::ZERO) {
            *totals.entry(need.material_id).or_default() += need.quantity;
        }
        if totals.is_empty() {
            return Ok(Vec::new());
        }

        let restriction = match (kind, request_id) {
            (BalanceKind::Reservation | BalanceKind::Withdrawal, Some(request_id)) => {
                session
                    .find_restriction_order_by_material_request(request_id)
                    .await?
            }
            _ => None,
        };

        let mut releases = Vec::new();
        for (material_id, quantity) in totals {
            let available = session
                .find_stock_record(warehouse_id, material_id)
                .await?
                .map(|record| record.available_quantity())
                .unwrap_or(Decimal::ZERO);
            if quantity <= available {
                continue;
            }

            let mut shortage = quantity - available;
            let mut releasable = Decimal::ZERO;
            if let Some(order) = restriction
                .as_ref()
                .filter(|order| order.warehouse_id() == warehouse_id)
            {
                for item in order
                    .items()
                    .iter()
                    .filter(|item| item.material_id == material_id)
                {
                    releasable += item.quantity_restricted;
                    if shortage > Decimal::ZERO && item.quantity_restricted > Decimal::ZERO {
                        let take = shortage.min(item.quantity_restricted);
                        shortage -= take;
                        releases.push(RestrictionRelease {
                            restriction_order_id: order.id(),
                            item_id: item.id,
                            material_id,
                            quantity: take,
                        });
                    }
                }
            }

            if shortage > Decimal::ZERO {
                let ceiling = available.max(Decimal::ZERO) + releasable;
                return Err(self.reject(
                    format!(
                        "倉庫 {} の資材 {} の{}数量 {} が引当可能数 {} を超えています",
                        warehouse_id,
                        material_id,
                        kind.label(),
                        quantity,
                        ceiling
                    ),
                    ceiling,
                ));
            }
        }

        Ok(releases)
    }
}
