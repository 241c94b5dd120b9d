use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    format_protocol, restriction_movement, MaterialRequest, MaterialRequestId, MovementOrigin,
    NewStockMovement, OperatorId, RestrictionItemInput, RestrictionOrder,
    RestrictionOrderId, RestrictionOrderItem, RestrictionOrderItemId, RestrictionStatus,
    WarehouseId,
};
use crate::domain::port::{
    Logger, MaterialRequestRepository, RestrictionOrderRepository, SequenceGenerator, Session,
};
use crate::domain::service::{
    BalanceCheckMode, BalanceKind, BalanceValidator, BalanceView, ExcludedOrder,
    RequestLineDemand, RestrictionRelease, StockLedger,
};

const COMPONENT: &str = "RestrictionOrderEngine";
const SEQUENCE: &str = "restriction_order";
const PROTOCOL_PREFIX: &str = "RST";

/// 制限オーダー作成コマンド
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateRestrictionOrder {
    pub warehouse_id: WarehouseId,
    pub material_request_id: Option<MaterialRequestId>,
    /// FullyRestricted を指定すると要求明細ごとに要求数の明細を自動作成する
    pub status: Option<RestrictionStatus>,
    #[serde(default)]
    pub items: Vec<RestrictionItemInput>,
    pub notes: Option<String>,
    pub operator_id: Option<OperatorId>,
}

/// 制限オーダー更新コマンド
/// `items` に含まれない明細はそのまま残る
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateRestrictionOrder {
    pub items: Option<Vec<RestrictionItemInput>>,
    pub notes: Option<String>,
    pub operator_id: Option<OperatorId>,
}

/// 制限オーダーエンジン
/// 物理在庫を消費せずに特定の資材要求のために拘束する
pub struct RestrictionOrderEngine {
    ledger: Arc<dyn StockLedger>,
    validator: Arc<dyn BalanceValidator>,
    logger: Arc<dyn Logger>,
}

impl RestrictionOrderEngine {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        validator: Arc<dyn BalanceValidator>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            ledger,
            validator,
            logger,
        }
    }

    /// 制限オーダーを作成する
    /// 1つの資材要求に対して制限オーダーは1件まで
    pub async fn create(
        &self,
        session: &mut dyn Session,
        command: CreateRestrictionOrder,
    ) -> Result<RestrictionOrder, DomainError> {
        let request_id = command
            .material_request_id
            .ok_or_else(|| DomainError::validation("制限オーダーには対象の資材要求IDが必要です"))?;
        let request = load_request(session, request_id).await?;

        if let Some(existing) = session
            .find_restriction_order_by_material_request(request_id)
            .await?
        {
            return Err(DomainError::conflict(format!(
                "資材要求 {} には既に制限オーダー {} があります",
                request.protocol,
                existing.protocol()
            )));
        }

        let inputs = match command.status {
            Some(RestrictionStatus::FullyRestricted) => request
                .items
                .iter()
                .map(|item| RestrictionItemInput::new(item.id, item.quantity_requested))
                .collect(),
            _ => command.items,
        };
        if inputs.is_empty() {
            return Err(DomainError::validation("制限明細が空です"));
        }

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(inputs.len());
        for input in &inputs {
            if !seen.insert(input.material_request_item_id) {
                return Err(DomainError::validation(format!(
                    "要求明細 {} に対する制限明細が重複しています",
                    input.material_request_item_id
                )));
            }
            items.push(build_item(&request, input)?);
        }

        self.validator
            .validate_request_lines(
                session,
                request_id,
                command.warehouse_id,
                &demands(&items),
                BalanceCheckMode::new(BalanceKind::Restriction, BalanceView::Effective),
            )
            .await?;

        let sequence = session.next_sequence(SEQUENCE).await?;
        let order = RestrictionOrder::new(
            format_protocol(PROTOCOL_PREFIX, sequence),
            command.warehouse_id,
            request_id,
            items,
            request.total_requested(),
            command.notes,
            command.operator_id,
            Utc::now(),
        );
        session.save_restriction_order(&order).await?;

        let deltas = order
            .items()
            .iter()
            .map(|item| (item.clone(), item.quantity_restricted))
            .collect::<Vec<_>>();
        self.emit(session, &order, &request, deltas, command.operator_id)
            .await?;

        self.log_info("Restriction order created", &order);
        Ok(order)
    }

    /// 明細を要求明細で突き合わせて更新する
    pub async fn update(
        &self,
        session: &mut dyn Session,
        order_id: RestrictionOrderId,
        command: UpdateRestrictionOrder,
    ) -> Result<RestrictionOrder, DomainError> {
        let mut order = load_order(session, order_id).await?;
        let request = load_request(session, order.material_request_id()).await?;

        if let Some(inputs) = command.items {
            let mut items = order.items().to_vec();
            let mut deltas = Vec::new();
            let mut seen = HashSet::new();
            for input in &inputs {
                if !seen.insert(input.material_request_item_id) {
                    return Err(DomainError::validation(format!(
                        "要求明細 {} に対する制限明細が重複しています",
                        input.material_request_item_id
                    )));
                }
                let built = build_item(&request, input)?;
                match items
                    .iter_mut()
                    .find(|item| item.material_request_item_id == input.material_request_item_id)
                {
                    Some(item) => {
                        let delta = built.quantity_restricted - item.quantity_restricted;
                        item.quantity_restricted = built.quantity_restricted;
                        deltas.push((item.clone(), delta));
                    }
                    None => {
                        deltas.push((built.clone(), built.quantity_restricted));
                        items.push(built);
                    }
                }
            }

            self.validator
                .validate_request_lines(
                    session,
                    request.id,
                    order.warehouse_id(),
                    &demands(&items),
                    BalanceCheckMode::new(BalanceKind::Restriction, BalanceView::Effective)
                        .excluding(ExcludedOrder::RestrictionOrder(order.id())),
                )
                .await?;

            order.apply_items(items, request.total_requested(), Utc::now());
            if command.notes.is_some() {
                order.set_notes(command.notes);
            }
            session.save_restriction_order(&order).await?;
            self.emit(session, &order, &request, deltas, command.operator_id)
                .await?;
        } else if command.notes.is_some() {
            order.set_notes(command.notes);
            session.save_restriction_order(&order).await?;
        }

        self.log_info("Restriction order updated", &order);
        Ok(order)
    }

    /// 1明細の制限数を変更する
    pub async fn update_item(
        &self,
        session: &mut dyn Session,
        order_id: RestrictionOrderId,
        item_id: RestrictionOrderItemId,
        quantity_restricted: Decimal,
        operator_id: Option<OperatorId>,
    ) -> Result<RestrictionOrder, DomainError> {
        let order = load_order(session, order_id).await?;
        let item = order.item(item_id).ok_or_else(|| {
            DomainError::not_found(format!(
                "制限オーダー {} に明細 {} がありません",
                order.protocol(),
                item_id
            ))
        })?;
        let command = UpdateRestrictionOrder {
            items: Some(vec![RestrictionItemInput::new(
                item.material_request_item_id,
                quantity_restricted,
            )]),
            notes: None,
            operator_id,
        };
        self.update(session, order_id, command).await
    }

    /// 他のオーダーのために制限を解除する
    /// 解除対象は `BalanceValidator::validate_warehouse_stock` が返したもの
    pub async fn release(
        &self,
        session: &mut dyn Session,
        releases: &[RestrictionRelease],
        operator_id: Option<OperatorId>,
    ) -> Result<(), DomainError> {
        let mut by_order: BTreeMap<RestrictionOrderId, Vec<&RestrictionRelease>> = BTreeMap::new();
        for release in releases {
            by_order
                .entry(release.restriction_order_id)
                .or_default()
                .push(release);
        }

        for (order_id, releases) in by_order {
            let mut order = load_order(session, order_id).await?;
            let request = load_request(session, order.material_request_id()).await?;
            let mut items = order.items().to_vec();
            let mut deltas = Vec::new();
            for release in releases {
                let item = items
                    .iter_mut()
                    .find(|item| item.id == release.item_id)
                    .ok_or_else(|| {
                        DomainError::not_found(format!(
                            "制限オーダー {} に明細 {} がありません",
                            order.protocol(),
                            release.item_id
                        ))
                    })?;
                if release.quantity > item.quantity_restricted {
                    return Err(DomainError::exceeded(
                        format!(
                            "制限オーダー {} の明細 {} の解除数量 {} が制限数 {} を超えています",
                            order.protocol(),
                            item.id,
                            release.quantity,
                            item.quantity_restricted
                        ),
                        item.quantity_restricted,
                    ));
                }
                item.quantity_restricted -= release.quantity;
                deltas.push((item.clone(), -release.quantity));
            }
            order.apply_items(items, request.total_requested(), Utc::now());
            session.save_restriction_order(&order).await?;
            self.emit(session, &order, &request, deltas, operator_id)
                .await?;
            self.log_info("Restriction released for another order", &order);
        }
        Ok(())
    }

    /// 制限オーダーを削除する
    /// すべての制限数を解除してから削除する
    pub async fn delete(
        &self,
        session: &mut dyn Session,
        order_id: RestrictionOrderId,
        operator_id: Option<OperatorId>,
    ) -> Result<(), DomainError> {
        let order = load_order(session, order_id).await?;
        let request = load_request(session, order.material_request_id()).await?;
        let deltas = order
            .items()
            .iter()
            .map(|item| (item.clone(), -item.quantity_restricted))
            .collect::<Vec<_>>();
        self.emit(session, &order, &request, deltas, operator_id)
            .await?;
        session.delete_restriction_order(order_id).await?;

        self.log_info("Restriction order deleted", &order);
        Ok(())
    }

    pub async fn show(
        &self,
        session: &mut dyn Session,
        order_id: RestrictionOrderId,
    ) -> Result<RestrictionOrder, DomainError> {
        load_order(session, order_id).await
    }

    pub async fn list(&self, session: &mut dyn Session) -> Result<Vec<RestrictionOrder>, DomainError> {
        Ok(session.list_restriction_orders().await?)
    }

    /// 明細ごとの増減を在庫移動として記録する
    /// 解除を先に記録し、引当可能数が一時的に不足しないようにする
    async fn emit(
        &self,
        session: &mut dyn Session,
        order: &RestrictionOrder,
        request: &MaterialRequest,
        mut deltas: Vec<(RestrictionOrderItem, Decimal)>,
        operator_id: Option<OperatorId>,
    ) -> Result<(), DomainError> {
        deltas.sort_by_key(|(_, delta)| *delta);
        for (item, delta) in deltas {
            let Some((sub_type, quantity)) = restriction_movement(delta) else {
                continue;
            };
            self.ledger
                .record(
                    session,
                    NewStockMovement::new(order.warehouse_id(), item.material_id, sub_type, quantity)
                        .with_origin(MovementOrigin::RestrictionOrderItem(item.id))
                        .with_material_request(Some(request.id))
                        .with_maintenance_request(request.maintenance_request_id)
                        .by(operator_id),
                )
                .await?;
        }
        Ok(())
    }

    fn log_info(&self, message: &str, order: &RestrictionOrder) {
        let mut context = HashMap::new();
        context.insert("protocol".to_string(), order.protocol().to_string());
        context.insert("status".to_string(), order.status().to_string());
        context.insert(
            "total_restricted".to_string(),
            order.total_restricted().to_string(),
        );
        self.logger
            .info(COMPONENT, message, Some(order.id().as_uuid()), Some(context));
    }
}

fn build_item(
    request: &MaterialRequest,
    input: &RestrictionItemInput,
) -> Result<RestrictionOrderItem, DomainError> {
    if input.quantity_restricted < Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "要求明細 {} の制限数は負にできません（{}）",
            input.material_request_item_id, input.quantity_restricted
        )));
    }
    let line = request.require_item(input.material_request_item_id)?;
    Ok(RestrictionOrderItem::new(
        line.material_id,
        line.id,
        input.quantity_restricted,
    ))
}

fn demands(items: &[RestrictionOrderItem]) -> Vec<RequestLineDemand> {
    items
        .iter()
        .map(|item| RequestLineDemand {
            material_request_item_id: item.material_request_item_id,
            quantity: item.quantity_restricted,
        })
        .collect()
}

async fn load_order(
    session: &mut dyn Session,
    order_id: RestrictionOrderId,
) -> Result<RestrictionOrder, DomainError> {
    session
        .find_restriction_order(order_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("制限オーダー {} が見つかりません", order_id)))
}

pub(crate) async fn load_request(
    session: &mut dyn Session,
    request_id: MaterialRequestId,
) -> Result<MaterialRequest, DomainError> {
    session
        .find_material_request(request_id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("資材要求 {} が見つかりません", request_id)))
}
