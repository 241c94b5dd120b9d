use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::error::DomainError;
use crate::domain::model::{
    format_protocol, MaterialRequest, MaterialRequestId, MaterialRequestItemId, MovementOrigin,
    MovementSubType, NewStockMovement, OperatorId, Receipt, ReceiptId, ReceiptItem,
    ReceiptItemId, ReceiptItemInput, RestrictionItemInput, WarehouseId,
};
use crate::domain::port::{
    Logger, MaterialRequestRepository, PickingOrderRepository, ReceiptRepository,
    RestrictionOrderRepository, SequenceGenerator, Session, StockMovementRepository,
    WithdrawalRepository,
};
use crate::domain::service::restriction_order_engine::load_request;
use crate::domain::service::{CreateRestrictionOrder, RestrictionOrderEngine, StockLedger};

const COMPONENT: &str = "ReceiptProcessor";
const SEQUENCE: &str = "receipt";
const PROTOCOL_PREFIX: &str = "RCP";

fn default_sub_type() -> MovementSubType {
    MovementSubType::InCentral
}

/// 入庫作成コマンド
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateReceipt {
    pub warehouse_id: WarehouseId,
    #[serde(default = "default_sub_type")]
    pub sub_type: MovementSubType,
    pub material_request_id: Option<MaterialRequestId>,
    pub items: Vec<ReceiptItemInput>,
    pub notes: Option<String>,
    pub operator_id: Option<OperatorId>,
}

impl CreateReceipt {
    pub fn new(warehouse_id: WarehouseId, items: Vec<ReceiptItemInput>) -> Self {
        Self {
            warehouse_id,
            sub_type: default_sub_type(),
            material_request_id: None,
            items,
            notes: None,
            operator_id: None,
        }
    }

    pub fn for_request(mut self, material_request_id: MaterialRequestId) -> Self {
        self.material_request_id = Some(material_request_id);
        self
    }
}

/// 入庫明細の更新内容
/// `quantity_received` は現在値と同じ場合のみ受け付ける
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReceiptItemUpdate {
    pub item_id: ReceiptItemId,
    pub quantity_expected: Option<Decimal>,
    pub quantity_received: Option<Decimal>,
    pub quantity_rejected: Option<Decimal>,
}

/// 入庫更新コマンド
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateReceipt {
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptItemUpdate>,
}

/// 入庫処理
/// 物理在庫を追加し、資材要求の納入数量を更新する
pub struct ReceiptProcessor {
    ledger: Arc<dyn StockLedger>,
    restriction_orders: Arc<RestrictionOrderEngine>,
    logger: Arc<dyn Logger>,
}

impl ReceiptProcessor {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        restriction_orders: Arc<RestrictionOrderEngine>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            ledger,
            restriction_orders,
            logger,
        }
    }

    /// 入庫を作成する
    /// IN_CENTRAL で資材要求に紐づく場合は納入数量を更新し、
    /// 初回入庫であれば受け入れた在庫を同じ要求のために制限する
    pub async fn create(
        &self,
        session: &mut dyn Session,
        mut command: CreateReceipt,
    ) -> Result<Receipt, DomainError> {
        let mut request = match command.material_request_id {
            Some(request_id) => Some(load_request(session, request_id).await?),
            None => None,
        };
        resolve_request_lines(request.as_ref(), &mut command.items)?;

        let items = command
            .items
            .into_iter()
            .map(ReceiptItemInput::into_item)
            .collect::<Vec<_>>();
        let received = received_by_line(&items);

        let backfill = command.sub_type == MovementSubType::InCentral;
        let mut first_receipt = false;
        if let (true, Some(request)) = (backfill, request.as_mut()) {
            let prior = session
                .list_receipts_by_material_request_and_warehouse(request.id, command.warehouse_id)
                .await?;
            first_receipt = prior.is_empty();
            for (line, quantity) in &received {
                let item = request.item_mut(*line).ok_or_else(|| {
                    DomainError::not_found(format!("要求明細 {} が見つかりません", line))
                })?;
                if first_receipt {
                    item.set_delivered(*quantity)?;
                } else {
                    item.add_delivered(*quantity)?;
                }
            }
        }

        let sequence = session.next_sequence(SEQUENCE).await?;
        let receipt = Receipt::new(
            format_protocol(PROTOCOL_PREFIX, sequence),
            command.warehouse_id,
            command.sub_type,
            command.material_request_id,
            items,
            command.notes,
            command.operator_id,
            Utc::now(),
        )?;

        if let (true, Some(request)) = (backfill, request.as_ref()) {
            session.save_material_request(request).await?;
        }
        session.save_receipt(&receipt).await?;

        let maintenance_request_id = request
            .as_ref()
            .and_then(|request| request.maintenance_request_id);
        for item in receipt.items() {
            self.ledger
                .record(
                    session,
                    NewStockMovement::new(
                        receipt.warehouse_id(),
                        item.material_id,
                        receipt.sub_type(),
                        item.quantity_received,
                    )
                    .with_origin(MovementOrigin::ReceiptItem(item.id))
                    .with_unit_price(item.unit_price)
                    .with_material_request(receipt.material_request_id())
                    .with_maintenance_request(maintenance_request_id)
                    .by(receipt.operator_id()),
                )
                .await?;
        }

        if first_receipt {
            if let Some(request) = request.as_ref() {
                self.restrict_received_stock(session, &receipt, request, &received)
                    .await?;
            }
        }

        self.log_info("Receipt created", &receipt);
        Ok(receipt)
    }

    /// 初回入庫の在庫を要求のために自動で制限する
    /// 保守要求にピッキング・出庫の実績がなく、制限オーダーがまだ無い場合のみ
    async fn restrict_received_stock(
        &self,
        session: &mut dyn Session,
        receipt: &Receipt,
        request: &MaterialRequest,
        received: &BTreeMap<MaterialRequestItemId, Decimal>,
    ) -> Result<(), DomainError> {
        let Some(maintenance_request_id) = request.maintenance_request_id else {
            return Ok(());
        };
        if session
            .count_picking_orders_by_maintenance_request(maintenance_request_id)
            .await?
            > 0
            || session
                .count_withdrawals_by_maintenance_request(maintenance_request_id)
                .await?
                > 0
            || session
                .find_restriction_order_by_material_request(request.id)
                .await?
                .is_some()
        {
            return Ok(());
        }

        let items = received
            .iter()
            .filter_map(|(line, quantity)| {
                let requested = request.item(*line)?.quantity_requested;
                let quantity = (*quantity).min(requested);
                (quantity > Decimal::ZERO).then(|| RestrictionItemInput::new(*line, quantity))
            })
            .collect::<Vec<_>>();
        if items.is_empty() {
            return Ok(());
        }

        let order = self
            .restriction_orders
            .create(
                session,
                CreateRestrictionOrder {
                    warehouse_id: receipt.warehouse_id(),
                    material_request_id: Some(request.id),
                    status: None,
                    items,
                    notes: Some(format!("入庫 {} による自動制限", receipt.protocol())),
                    operator_id: receipt.operator_id(),
                },
            )
            .await?;

        let mut context = HashMap::new();
        context.insert("receipt".to_string(), receipt.protocol().to_string());
        context.insert("restriction_order".to_string(), order.protocol().to_string());
        self.logger.info(
            COMPONENT,
            "Received stock restricted for material request",
            Some(receipt.id().as_uuid()),
            Some(context),
        );
        Ok(())
    }

    /// 備考と在庫に影響しない数量を更新する
    pub async fn update(
        &self,
        session: &mut dyn Session,
        receipt_id: ReceiptId,
        command: UpdateReceipt,
    ) -> Result<Receipt, DomainError> {
        let mut receipt = self.show(session, receipt_id).await?;
        let now = Utc::now();
        for update in &command.items {
            if let Some(received) = update.quantity_received {
                let current = receipt
                    .items()
                    .iter()
                    .find(|item| item.id == update.item_id)
                    .map(|item| item.quantity_received);
                if current.is_some_and(|current| current != received) {
                    return Err(DomainError::validation(format!(
                        "入庫明細 {} の受入数量は変更できません（削除して再登録してください）",
                        update.item_id
                    )));
                }
            }
            receipt.update_counters(
                update.item_id,
                update.quantity_expected,
                update.quantity_rejected,
                now,
            )?;
        }
        if command.notes.is_some() {
            receipt.set_notes(command.notes);
        }
        session.save_receipt(&receipt).await?;

        self.log_info("Receipt updated", &receipt);
        Ok(receipt)
    }

    /// 入庫を削除する
    /// 入庫の移動を台帳から取り消し（引当可能数を検証）、納入数量を戻す
    pub async fn delete(
        &self,
        session: &mut dyn Session,
        receipt_id: ReceiptId,
    ) -> Result<(), DomainError> {
        let receipt = self.show(session, receipt_id).await?;

        for item in receipt.items() {
            let movements = session
                .list_movements_by_origin(MovementOrigin::ReceiptItem(item.id))
                .await?;
            for movement in movements {
                self.ledger.delete(session, movement.id).await?;
            }
        }

        if let (MovementSubType::InCentral, Some(request_id)) =
            (receipt.sub_type(), receipt.material_request_id())
        {
            let mut request = load_request(session, request_id).await?;
            for (line, quantity) in received_by_line(receipt.items()) {
                if let Some(item) = request.item_mut(line) {
                    item.revert_delivered(quantity);
                }
            }
            session.save_material_request(&request).await?;
        }

        session.delete_receipt(receipt_id).await?;
        self.log_info("Receipt deleted", &receipt);
        Ok(())
    }

    pub async fn show(
        &self,
        session: &mut dyn Session,
        receipt_id: ReceiptId,
    ) -> Result<Receipt, DomainError> {
        session
            .find_receipt(receipt_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("入庫 {} が見つかりません", receipt_id)))
    }

    pub async fn list(&self, session: &mut dyn Session) -> Result<Vec<Receipt>, DomainError> {
        Ok(session.list_receipts().await?)
    }

    fn log_info(&self, message: &str, receipt: &Receipt) {
        let mut context = HashMap::new();
        context.insert("protocol".to_string(), receipt.protocol().to_string());
        context.insert("sub_type".to_string(), receipt.sub_type().to_string());
        context.insert(
            "total_received".to_string(),
            receipt.total_received().to_string(),
        );
        self.logger
            .info(COMPONENT, message, Some(receipt.id().as_uuid()), Some(context));
    }
}

fn resolve_request_lines(
    request: Option<&MaterialRequest>,
    inputs: &mut [ReceiptItemInput],
) -> Result<(), DomainError> {
    for input in inputs.iter_mut() {
        let Some(line) = input.material_request_item_id else {
            continue;
        };
        let request = request.ok_or_else(|| {
            DomainError::validation(format!(
                "要求明細 {} を指定するには資材要求IDが必要です",
                line
            ))
        })?;
        let request_item = request.require_item(line)?;
        if request_item.material_id != input.material_id {
            return Err(DomainError::validation(format!(
                "要求明細 {} の資材と入庫明細の資材が一致しません",
                line
            )));
        }
        if input.unit_price.is_none() {
            input.unit_price = request_item.unit_price;
        }
    }
    Ok(())
}

fn received_by_line(items: &[ReceiptItem]) -> BTreeMap<MaterialRequestItemId, Decimal> {
    let mut totals = BTreeMap::new();
    for item in items {
        if let Some(line) = item.material_request_item_id {
            *totals.entry(line).or_insert(Decimal::ZERO) += item.quantity_received;
        }
    }
    totals
}
