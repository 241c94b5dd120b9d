use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    format_protocol, MaintenanceRequestId, MaterialRequestId, MaterialRequestItemId,
    MovementOrigin, MovementSubType, NewStockMovement, OperatorId, PickingOrderId, WarehouseId,
    Withdrawal, WithdrawalId, WithdrawalItemInput,
};
use crate::domain::port::{Logger, SequenceGenerator, Session, WithdrawalRepository};
use crate::domain::service::restriction_order_engine::load_request;
use crate::domain::service::{
    BalanceCheckMode, BalanceKind, BalanceValidator, BalanceView, MaterialNeed,
    RequestLineDemand, RestrictionOrderEngine, StockLedger,
};

const COMPONENT: &str = "WithdrawalProcessor";
const SEQUENCE: &str = "withdrawal";
const PROTOCOL_PREFIX: &str = "WDR";

/// 出庫作成コマンド
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateWithdrawal {
    pub warehouse_id: WarehouseId,
    pub sub_type: MovementSubType,
    pub material_request_id: Option<MaterialRequestId>,
    pub maintenance_request_id: Option<MaintenanceRequestId>,
    /// ピッキングオーダーからの自動作成時のみ設定される
    #[serde(skip)]
    pub picking_order_id: Option<PickingOrderId>,
    pub items: Vec<WithdrawalItemInput>,
    pub notes: Option<String>,
    pub operator_id: Option<OperatorId>,
}

impl CreateWithdrawal {
    pub fn new(
        warehouse_id: WarehouseId,
        sub_type: MovementSubType,
        items: Vec<WithdrawalItemInput>,
    ) -> Self {
        Self {
            warehouse_id,
            sub_type,
            material_request_id: None,
            maintenance_request_id: None,
            picking_order_id: None,
            items,
            notes: None,
            operator_id: None,
        }
    }

    pub fn for_request(mut self, material_request_id: Option<MaterialRequestId>) -> Self {
        self.material_request_id = material_request_id;
        self
    }

    pub fn by(mut self, operator_id: Option<OperatorId>) -> Self {
        self.operator_id = operator_id;
        self
    }
}

/// 出庫処理
/// 物理在庫の払い出しを確定する（取り消し不可）
pub struct WithdrawalProcessor {
    ledger: Arc<dyn StockLedger>,
    validator: Arc<dyn BalanceValidator>,
    restriction_orders: Arc<RestrictionOrderEngine>,
    logger: Arc<dyn Logger>,
}

impl WithdrawalProcessor {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        validator: Arc<dyn BalanceValidator>,
        restriction_orders: Arc<RestrictionOrderEngine>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            ledger,
            validator,
            restriction_orders,
            logger,
        }
    }

    /// 出庫を作成する
    ///
    /// # Arguments
    /// * `session` - 実行中のセッション
    /// * `command` - 出庫作成コマンド
    /// * `from_picking_order` - ピッキングオーダーの更新から呼ばれた場合 true
    ///   （残量検証はピッキングオーダー側で済んでいるため行わない）
    pub async fn create(
        &self,
        session: &mut dyn Session,
        mut command: CreateWithdrawal,
        from_picking_order: bool,
    ) -> Result<Withdrawal, DomainError> {
        let request = match command.material_request_id {
            Some(request_id) => Some(load_request(session, request_id).await?),
            None => None,
        };

        for item in command.items.iter_mut() {
            let Some(line) = item.material_request_item_id else {
                continue;
            };
            let request = request.as_ref().ok_or_else(|| {
                DomainError::validation(format!(
                    "要求明細 {} を指定するには資材要求IDが必要です",
                    line
                ))
            })?;
            let request_item = request.require_item(line)?;
            if request_item.material_id != item.material_id {
                return Err(DomainError::validation(format!(
                    "要求明細 {} の資材と出庫明細の資材が一致しません",
                    line
                )));
            }
            if item.unit_price.is_none() {
                item.unit_price = request_item.unit_price;
            }
        }

        let maintenance_request_id = command.maintenance_request_id.or_else(|| {
            request
                .as_ref()
                .and_then(|request| request.maintenance_request_id)
        });
        let items = command
            .items
            .into_iter()
            .map(WithdrawalItemInput::into_item)
            .collect::<Vec<_>>();
        Withdrawal::validate_draft(command.sub_type, &items)?;

        if !from_picking_order {
            if let Some(request) = request.as_ref() {
                let mut totals: BTreeMap<MaterialRequestItemId, Decimal> = BTreeMap::new();
                for item in &items {
                    if let Some(line) = item.material_request_item_id {
                        *totals.entry(line).or_default() += item.quantity_withdrawn;
                    }
                }
                let demands = totals
                    .into_iter()
                    .map(|(line, quantity)| RequestLineDemand {
                        material_request_item_id: line,
                        quantity,
                    })
                    .collect::<Vec<_>>();
                self.validator
                    .validate_request_lines(
                        session,
                        request.id,
                        command.warehouse_id,
                        &demands,
                        BalanceCheckMode::new(BalanceKind::Withdrawal, BalanceView::Potential),
                    )
                    .await?;
            }

            let needs = items
                .iter()
                .map(|item| MaterialNeed {
                    material_id: item.material_id,
                    quantity: item.quantity_withdrawn,
                })
                .collect::<Vec<_>>();
            let releases = self
                .validator
                .validate_warehouse_stock(
                    session,
                    command.warehouse_id,
                    &needs,
                    BalanceKind::Withdrawal,
                    command.material_request_id,
                )
                .await?;
            self.restriction_orders
                .release(session, &releases, command.operator_id)
                .await?;
        }

        let sequence = session.next_sequence(SEQUENCE).await?;
        let withdrawal = Withdrawal::new(
            format_protocol(PROTOCOL_PREFIX, sequence),
            command.warehouse_id,
            command.sub_type,
            command.material_request_id,
            maintenance_request_id,
            command.picking_order_id,
            items,
            command.notes,
            command.operator_id,
            Utc::now(),
        )?;
        session.save_withdrawal(&withdrawal).await?;

        for item in withdrawal.items() {
            self.ledger
                .record(
                    session,
                    NewStockMovement::new(
                        withdrawal.warehouse_id(),
                        item.material_id,
                        withdrawal.sub_type(),
                        item.quantity_withdrawn,
                    )
                    .with_origin(MovementOrigin::WithdrawalItem(item.id))
                    .with_unit_price(item.unit_price)
                    .with_material_request(withdrawal.material_request_id())
                    .with_maintenance_request(withdrawal.maintenance_request_id())
                    .by(withdrawal.operator_id()),
                )
                .await?;
        }

        let mut context = HashMap::new();
        context.insert("protocol".to_string(), withdrawal.protocol().to_string());
        context.insert("sub_type".to_string(), withdrawal.sub_type().to_string());
        context.insert(
            "from_picking_order".to_string(),
            from_picking_order.to_string(),
        );
        if let Some(value) = withdrawal.value_withdrawal() {
            context.insert("value_withdrawal".to_string(), value.to_string());
        }
        self.logger.info(
            COMPONENT,
            "Withdrawal created",
            Some(withdrawal.id().as_uuid()),
            Some(context),
        );

        Ok(withdrawal)
    }

    /// 備考のみ更新できる
    pub async fn update(
        &self,
        session: &mut dyn Session,
        withdrawal_id: WithdrawalId,
        notes: Option<String>,
    ) -> Result<Withdrawal, DomainError> {
        let mut withdrawal = self.show(session, withdrawal_id).await?;
        withdrawal.set_notes(notes);
        session.save_withdrawal(&withdrawal).await?;
        Ok(withdrawal)
    }

    /// 出庫は終端で取り消せないため、削除は常に競合
    pub async fn delete(
        &self,
        session: &mut dyn Session,
        withdrawal_id: WithdrawalId,
    ) -> Result<(), DomainError> {
        let withdrawal = self.show(session, withdrawal_id).await?;
        Err(DomainError::conflict(format!(
            "出庫 {} は確定済みのため削除できません",
            withdrawal.protocol()
        )))
    }

    pub async fn show(
        &self,
        session: &mut dyn Session,
        withdrawal_id: WithdrawalId,
    ) -> Result<Withdrawal, DomainError> {
        session
            .find_withdrawal(withdrawal_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("出庫 {} が見つかりません", withdrawal_id)))
    }

    pub async fn list(&self, session: &mut dyn Session) -> Result<Vec<Withdrawal>, DomainError> {
        Ok(session.list_withdrawals().await?)
    }
}
