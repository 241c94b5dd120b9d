// ドメインサービス
// 在庫台帳と、台帳を更新する各オーダーのエンジンを実装

mod balance_validator;
mod movement_ledger;
mod picking_order_engine;
mod receipt_processor;
pub(crate) mod restriction_order_engine;
mod stock_adjustment;
mod withdrawal_processor;

pub use movement_ledger::{MovementLedger, StockLedger};

pub use balance_validator::{
    BalanceCheckMode, BalanceKind, BalanceValidator, BalanceView, ExcludedOrder, LineBalance,
    MaterialNeed, MaterialRequestBalanceValidator, RequestLineDemand, RestrictionRelease,
};

pub use restriction_order_engine::{
    CreateRestrictionOrder, RestrictionOrderEngine, UpdateRestrictionOrder,
};

pub use withdrawal_processor::{CreateWithdrawal, WithdrawalProcessor};

pub use picking_order_engine::{CreatePickingOrder, PickingOrderEngine, UpdatePickingOrder};

pub use receipt_processor::{CreateReceipt, ReceiptItemUpdate, ReceiptProcessor, UpdateReceipt};

pub use stock_adjustment::StockAdjustment;
