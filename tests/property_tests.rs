use chrono::Utc;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use rust_decimal::Decimal;
use std::sync::Arc;
use warehouse_stock_ledger::adapter::driven::{InMemorySessionFactory, TracingLogger};
use warehouse_stock_ledger::application::service::LedgerServices;
use warehouse_stock_ledger::application::ApplicationError;
use warehouse_stock_ledger::domain::model::{
    derive_status, format_protocol, synthetic_items, MaterialId, MaterialRequest,
    MaterialRequestItem, MovementSubType, PickingOrderItem, PickingOrderItemId,
    PickingOrderItemInput, PickingOrderStatus, ReceiptItemInput, RestrictionItemInput,
    StockEffect, StockRecord, WarehouseId, WithdrawalItemInput,
};
use warehouse_stock_ledger::domain::port::{MaterialRequestRepository, SessionFactory};
use warehouse_stock_ledger::domain::service::{
    CreatePickingOrder, CreateReceipt, CreateRestrictionOrder, CreateWithdrawal,
    UpdatePickingOrder,
};

fn quantity(max: i64) -> impl Strategy<Value = Decimal> {
    (0i64..=max).prop_map(Decimal::from)
}

fn sub_type() -> impl Strategy<Value = MovementSubType> {
    prop::sample::select(MovementSubType::ALL.to_vec())
}

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

/// 棚卸で在庫を置いた在庫レコード
fn stocked_record(on_hand: Decimal) -> StockRecord {
    let mut record = StockRecord::new(WarehouseId::new(), MaterialId::new());
    record
        .apply(
            &MovementSubType::InitialStockLoad.effect(on_hand, None),
            Utc::now(),
        )
        .unwrap();
    record
}

// 在庫レコードの作用に関するプロパティベーステスト
proptest! {
    /// 作用を適用して逆の作用を適用すると数量は元に戻る
    #[test]
    fn test_effect_then_negation_restores_quantities(
        on_hand in quantity(1_000),
        sub_type in sub_type(),
        amount in quantity(1_000),
    ) {
        let original = if sub_type == MovementSubType::InitialStockLoad {
            StockRecord::new(WarehouseId::new(), MaterialId::new())
        } else {
            stocked_record(on_hand)
        };
        let effect = sub_type.effect(amount, None);

        let mut record = original.clone();
        record.apply(&effect, Utc::now()).unwrap();
        record.apply(&effect.negated(), Utc::now()).unwrap();

        prop_assert_eq!(record.physical_quantity(), original.physical_quantity());
        prop_assert_eq!(record.reserved_quantity(), original.reserved_quantity());
        prop_assert_eq!(record.restricted_quantity(), original.restricted_quantity());
        prop_assert_eq!(record.initial_stock_quantity(), original.initial_stock_quantity());
    }

    /// 引当可能数の増減量は適用前後の差と一致する
    #[test]
    fn test_available_delta_matches_applied_change(
        on_hand in quantity(1_000),
        sub_type in sub_type(),
        amount in quantity(1_000),
    ) {
        prop_assume!(sub_type != MovementSubType::InitialStockLoad);
        let mut record = stocked_record(on_hand);
        let before = record.available_quantity();
        let effect = sub_type.effect(amount, None);

        record.apply(&effect, Utc::now()).unwrap();

        prop_assert_eq!(record.available_quantity() - before, effect.available_delta());
    }

    /// 引当は引当可能数の範囲内でのみ受け付けられる
    #[test]
    fn test_reservation_accepted_only_within_available(
        on_hand in quantity(500),
        reserved in quantity(500),
        requested in 1i64..=1_000,
    ) {
        prop_assume!(reserved <= on_hand);
        let mut record = stocked_record(on_hand);
        record
            .apply(&MovementSubType::ReserveForPickingOrder.effect(reserved, None), Utc::now())
            .unwrap();

        let effect = MovementSubType::ReserveForPickingOrder.effect(Decimal::from(requested), None);
        let mut projected = record.clone();
        projected.apply(&effect, Utc::now()).unwrap();
        let checked = projected.check_invariants(&effect);

        prop_assert_eq!(checked.is_ok(), Decimal::from(requested) <= on_hand - reserved);
        if checked.is_ok() {
            prop_assert!(projected.available_quantity() >= Decimal::ZERO);
        }
    }

    /// 予約数を超える解除は拒否され、予約数は負にならない
    #[test]
    fn test_release_never_drives_reserved_negative(
        reserved in quantity(500),
        released in 1i64..=1_000,
    ) {
        let mut record = stocked_record(Decimal::from(1_000));
        record
            .apply(&MovementSubType::ReserveForPickingOrder.effect(reserved, None), Utc::now())
            .unwrap();

        let effect = MovementSubType::ReleasePickingReservation.effect(Decimal::from(released), None);
        let mut projected = record.clone();
        projected.apply(&effect, Utc::now()).unwrap();

        match projected.check_invariants(&effect) {
            Ok(()) => prop_assert!(projected.reserved_quantity() >= Decimal::ZERO),
            Err(_) => prop_assert!(Decimal::from(released) > reserved),
        }
    }
}

// ピッキング明細に関するプロパティベーステスト
proptest! {
    /// 検証を通った明細は数量の不変条件を満たす
    #[test]
    fn test_valid_items_satisfy_picking_invariant(
        to_pick in 1i64..=100,
        picked in 0i64..=120,
        withdrawn in 0i64..=120,
    ) {
        let item = item(Decimal::from(to_pick), Decimal::from(picked), Decimal::from(withdrawn));
        if item.validate_quantities().is_ok() {
            prop_assert!(item.quantity_picked <= item.quantity_to_pick);
            prop_assert!(item.quantity_withdrawn + item.quantity_picked <= item.quantity_to_pick);
            if item.quantity_withdrawn > Decimal::ZERO {
                prop_assert_eq!(item.quantity_picked, Decimal::ZERO);
                prop_assert_eq!(item.quantity_withdrawn, item.quantity_to_pick);
            }
        }
    }

    /// 導出されるステータスは終端の取消・期限切れにならない
    #[test]
    fn test_derived_status_is_never_cancelled_or_expired(
        lines in prop::collection::vec((1i64..=50, 0i64..=50, any::<bool>()), 1..5),
    ) {
        let items = lines
            .into_iter()
            .map(|(to_pick, picked, withdrawn)| {
                let to_pick = Decimal::from(to_pick);
                if withdrawn {
                    item(to_pick, Decimal::ZERO, to_pick)
                } else {
                    item(to_pick, Decimal::from(picked).min(to_pick), Decimal::ZERO)
                }
            })
            .collect::<Vec<_>>();

        let status = derive_status(&items);
        prop_assert_ne!(status, PickingOrderStatus::Cancelled);
        prop_assert_ne!(status, PickingOrderStatus::Expired);

        let fully_withdrawn = items
            .iter()
            .all(|item| item.quantity_withdrawn == item.quantity_to_pick);
        prop_assert_eq!(status == PickingOrderStatus::FullyWithdrawn, fully_withdrawn);
    }

    /// 一括操作の明細はすべて検証を通る
    #[test]
    fn test_synthetic_items_are_valid(
        lines in prop::collection::vec((1i64..=50, 0i64..=50, any::<bool>()), 1..5),
        operation in prop::sample::select(vec![
            PickingOrderStatus::FullyWithdrawn,
            PickingOrderStatus::ReadyForPickup,
            PickingOrderStatus::Cancelled,
            PickingOrderStatus::Expired,
        ]),
    ) {
        let items = lines
            .into_iter()
            .map(|(to_pick, picked, withdrawn)| {
                let to_pick = Decimal::from(to_pick);
                if withdrawn {
                    item(to_pick, Decimal::ZERO, to_pick)
                } else {
                    item(to_pick, Decimal::from(picked).min(to_pick), Decimal::ZERO)
                }
            })
            .collect::<Vec<_>>();

        let inputs = synthetic_items(&items, operation).unwrap();
        prop_assert_eq!(inputs.len(), items.len());
        for (input, original) in inputs.iter().zip(&items) {
            let rebuilt = item(
                input.quantity_to_pick,
                input.quantity_picked,
                input.quantity_withdrawn,
            );
            prop_assert!(rebuilt.validate_quantities().is_ok());
            // 出庫済みの数量は取り消されない
            prop_assert!(input.quantity_withdrawn >= original.quantity_withdrawn);
        }
    }

    /// 帳票番号は接頭辞と6桁以上の連番からなる
    #[test]
    fn test_protocol_format(sequence in 1i64..10_000_000) {
        let protocol = format_protocol("PCK", sequence);
        prop_assert!(protocol.starts_with("PCK-"));
        prop_assert!(protocol.len() >= 10);
        prop_assert_eq!(protocol[4..].parse::<i64>().unwrap(), sequence);
    }
}

/// 台帳に対する操作（添字は実行時点の一覧に対する剰余で解決する）
#[derive(Debug, Clone)]
enum LedgerOp {
    Count { material: usize, counted: i64 },
    Receive { material: usize, quantity: i64, for_request: bool },
    DeleteReceipt { index: usize },
    CreatePicking { material: usize, quantity: i64 },
    Pick { index: usize, picked: i64 },
    OperatePicking { index: usize, status: PickingOrderStatus },
    DeletePicking { index: usize },
    CreateRestriction { material: usize, quantity: i64 },
    UpdateRestriction { index: usize, quantity: i64 },
    DeleteRestriction { index: usize },
    Withdraw { material: usize, quantity: i64, for_request: bool },
    DeleteMovement { material: usize, index: usize },
}

fn ledger_op() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        (0usize..2, 0i64..=30).prop_map(|(material, counted)| LedgerOp::Count { material, counted }),
        (0usize..2, 1i64..=10, any::<bool>()).prop_map(|(material, quantity, for_request)| {
            LedgerOp::Receive { material, quantity, for_request }
        }),
        any::<usize>().prop_map(|index| LedgerOp::DeleteReceipt { index }),
        (0usize..2, 1i64..=10)
            .prop_map(|(material, quantity)| LedgerOp::CreatePicking { material, quantity }),
        (any::<usize>(), 0i64..=10).prop_map(|(index, picked)| LedgerOp::Pick { index, picked }),
        (
            any::<usize>(),
            prop::sample::select(vec![
                PickingOrderStatus::FullyWithdrawn,
                PickingOrderStatus::ReadyForPickup,
                PickingOrderStatus::Cancelled,
            ]),
        )
            .prop_map(|(index, status)| LedgerOp::OperatePicking { index, status }),
        any::<usize>().prop_map(|index| LedgerOp::DeletePicking { index }),
        (0usize..2, 1i64..=10)
            .prop_map(|(material, quantity)| LedgerOp::CreateRestriction { material, quantity }),
        (any::<usize>(), 0i64..=10)
            .prop_map(|(index, quantity)| LedgerOp::UpdateRestriction { index, quantity }),
        any::<usize>().prop_map(|index| LedgerOp::DeleteRestriction { index }),
        (0usize..2, 1i64..=10, any::<bool>()).prop_map(|(material, quantity, for_request)| {
            LedgerOp::Withdraw { material, quantity, for_request }
        }),
        (0usize..2, any::<usize>())
            .prop_map(|(material, index)| LedgerOp::DeleteMovement { material, index }),
    ]
}

struct Ledger {
    services: LedgerServices,
    warehouse_id: WarehouseId,
    request: MaterialRequest,
}

impl Ledger {
    async fn new() -> Self {
        let factory = InMemorySessionFactory::new();
        let services = LedgerServices::new(
            Arc::new(factory.clone()),
            Arc::new(TracingLogger::new()),
            None,
        );
        let warehouse_id = WarehouseId::new();
        let request = MaterialRequest::new(
            "REQ-0001",
            warehouse_id,
            None,
            vec![
                MaterialRequestItem::new(MaterialId::new(), Decimal::from(10))
                    .with_unit_price(Decimal::from(2)),
                MaterialRequestItem::new(MaterialId::new(), Decimal::from(10)),
            ],
        );
        let mut session = factory.begin().await.unwrap();
        session.save_material_request(&request).await.unwrap();
        session.commit().await.unwrap();
        Self {
            services,
            warehouse_id,
            request,
        }
    }

    fn material(&self, index: usize) -> MaterialId {
        self.request.items[index].material_id
    }

    /// 操作を実行する。業務上の拒否は結果として無視する
    async fn apply(&self, op: &LedgerOp) {
        let w = self.warehouse_id;
        match *op {
            LedgerOp::Count { material, counted } => {
                let _ = self
                    .services
                    .stock
                    .count_global_material_in_warehouse(
                        w,
                        self.material(material),
                        Decimal::from(counted),
                        None,
                    )
                    .await;
            }
            LedgerOp::Receive { material, quantity, for_request } => {
                let mut item = ReceiptItemInput::new(self.material(material), Decimal::from(quantity));
                let mut command = CreateReceipt::new(w, vec![]);
                if for_request {
                    item = item.for_request_line(self.request.items[material].id);
                    command = command.for_request(self.request.id);
                }
                command.items.push(item);
                let _ = self.services.receipts.create(command).await;
            }
            LedgerOp::DeleteReceipt { index } => {
                let receipts = self.services.receipts.list().await.unwrap();
                if !receipts.is_empty() {
                    let _ = self
                        .services
                        .receipts
                        .delete(receipts[index % receipts.len()].id())
                        .await;
                }
            }
            LedgerOp::CreatePicking { material, quantity } => {
                let _ = self
                    .services
                    .picking_orders
                    .create(CreatePickingOrder::new(
                        w,
                        vec![PickingOrderItemInput::new(
                            self.material(material),
                            Decimal::from(quantity),
                        )],
                    ))
                    .await;
            }
            LedgerOp::Pick { index, picked } => {
                let orders = self.services.picking_orders.list().await.unwrap();
                if !orders.is_empty() {
                    let order = &orders[index % orders.len()];
                    let _ = self
                        .services
                        .picking_orders
                        .update(
                            order.id(),
                            UpdatePickingOrder::items(vec![PickingOrderItemInput::from_item(
                                &order.items()[0],
                            )
                            .picked(Decimal::from(picked))]),
                        )
                        .await;
                }
            }
            LedgerOp::OperatePicking { index, status } => {
                let orders = self.services.picking_orders.list().await.unwrap();
                if !orders.is_empty() {
                    let _ = self
                        .services
                        .picking_orders
                        .operation_in_picking_order(orders[index % orders.len()].id(), None, status)
                        .await;
                }
            }
            LedgerOp::DeletePicking { index } => {
                let orders = self.services.picking_orders.list().await.unwrap();
                if !orders.is_empty() {
                    let _ = self
                        .services
                        .picking_orders
                        .delete(orders[index % orders.len()].id(), None)
                        .await;
                }
            }
            LedgerOp::CreateRestriction { material, quantity } => {
                let _ = self
                    .services
                    .restriction_orders
                    .create(CreateRestrictionOrder {
                        warehouse_id: w,
                        material_request_id: Some(self.request.id),
                        status: None,
                        items: vec![RestrictionItemInput::new(
                            self.request.items[material].id,
                            Decimal::from(quantity),
                        )],
                        notes: None,
                        operator_id: None,
                    })
                    .await;
            }
            LedgerOp::UpdateRestriction { index, quantity } => {
                let orders = self.services.restriction_orders.list().await.unwrap();
                if let Some(order) = orders.first() {
                    if !order.items().is_empty() {
                        let item = &order.items()[index % order.items().len()];
                        let _ = self
                            .services
                            .restriction_orders
                            .update_item(order.id(), item.id, Decimal::from(quantity), None)
                            .await;
                    }
                }
            }
            LedgerOp::DeleteRestriction { index } => {
                let orders = self.services.restriction_orders.list().await.unwrap();
                if !orders.is_empty() {
                    let _ = self
                        .services
                        .restriction_orders
                        .delete(orders[index % orders.len()].id(), None)
                        .await;
                }
            }
            LedgerOp::Withdraw { material, quantity, for_request } => {
                let mut item = WithdrawalItemInput::new(self.material(material), Decimal::from(quantity));
                let mut command = CreateWithdrawal::new(w, MovementSubType::OutServiceUse, vec![]);
                if for_request {
                    item = item.for_request_line(Some(self.request.items[material].id));
                    command = command.for_request(Some(self.request.id));
                }
                command.items.push(item);
                let _ = self.services.withdrawals.create(command).await;
            }
            LedgerOp::DeleteMovement { material, index } => {
                let movements = self
                    .services
                    .stock
                    .list_movements(w, self.material(material))
                    .await
                    .unwrap();
                if !movements.is_empty() {
                    let _ = self
                        .services
                        .stock
                        .delete_movement(movements[index % movements.len()].id)
                        .await;
                }
            }
        }
    }

    /// 引当数と制限数が非負で、それぞれ保持しているオーダーの合計と一致する
    async fn check_consistency(&self) -> Result<(), TestCaseError> {
        let picking_orders = self.services.picking_orders.list().await.unwrap();
        let restriction_orders = self.services.restriction_orders.list().await.unwrap();

        for line in &self.request.items {
            let (reserved, restricted) =
                match self.services.stock.show(self.warehouse_id, line.material_id).await {
                    Ok(record) => (record.reserved_quantity(), record.restricted_quantity()),
                    Err(ApplicationError::NotFound(_)) => (Decimal::ZERO, Decimal::ZERO),
                    Err(err) => return Err(TestCaseError::fail(err.to_string())),
                };
            prop_assert!(reserved >= Decimal::ZERO);
            prop_assert!(restricted >= Decimal::ZERO);

            let held_by_picking: Decimal = picking_orders
                .iter()
                .flat_map(|order| order.items())
                .filter(|item| item.material_id == line.material_id)
                .map(|item| item.quantity_picked)
                .sum();
            let held_by_restriction: Decimal = restriction_orders
                .iter()
                .flat_map(|order| order.items())
                .filter(|item| item.material_id == line.material_id)
                .map(|item| item.quantity_restricted)
                .sum();
            prop_assert_eq!(reserved, held_by_picking);
            prop_assert_eq!(restricted, held_by_restriction);
        }
        Ok(())
    }
}

// 操作列に対する台帳の整合性に関するプロパティベーステスト
proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// どの操作列の後でも引当と制限はオーダーが保持する分と一致する
    #[test]
    fn test_operation_sequences_keep_holds_consistent(
        ops in prop::collection::vec(ledger_op(), 1..25),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let ledger = Ledger::new().await;
            for op in &ops {
                ledger.apply(op).await;
                ledger.check_consistency().await?;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
