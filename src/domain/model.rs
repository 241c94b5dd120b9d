// ドメインモデル（エンティティと値オブジェクト）

mod material_request;
mod movement;
mod picking_order;
mod receipt;
mod restriction_order;
mod stock;
mod value_objects;
mod withdrawal;

pub use value_objects::{
    format_protocol, total_value, MaintenanceRequestId, MaterialId, MaterialRequestId,
    MaterialRequestItemId, OperatorId, PickingOrderId, PickingOrderItemId, ReceiptId,
    ReceiptItemId, RestrictionOrderId, RestrictionOrderItemId, StockMovementId, StockRecordId,
    WarehouseId, WithdrawalId, WithdrawalItemId,
};

pub use stock::{InitialStockChange, StockEffect, StockRecord};

pub use movement::{
    MovementOperation, MovementOrigin, MovementSubType, NewStockMovement, StockMovement,
};

pub use material_request::{MaterialRequest, MaterialRequestItem};

pub use picking_order::{
    derive_status, reconcile_items, synthetic_items, ItemDiff, ItemKey, PickingOrder,
    PickingOrderItem, PickingOrderItemInput, PickingOrderStatus,
};

pub use restriction_order::{
    derive_restriction_status, restriction_movement, RestrictionItemInput, RestrictionOrder,
    RestrictionOrderItem, RestrictionStatus,
};

pub use withdrawal::{Withdrawal, WithdrawalItem, WithdrawalItemInput};

pub use receipt::{Receipt, ReceiptItem, ReceiptItemInput};
