use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::error::DomainError;
use crate::domain::model::{MaterialId, StockRecordId, WarehouseId};

/// 初期在庫量への作用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialStockChange {
    /// 変更しない
    #[default]
    Unchanged,
    /// 初回棚卸の基準値を設定する（未設定の場合のみ）
    Load(Decimal),
    /// 設定済みの基準値を取り消す（Load の逆操作）
    Unload(Decimal),
}

/// 在庫移動が在庫レコードに与える算術的な作用
/// 移動の種別から決定的に導出され、在庫レコードへの唯一の書き込み経路となる
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StockEffect {
    pub balance_delta: Decimal,
    pub reserved_delta: Decimal,
    pub restricted_delta: Decimal,
    pub initial: InitialStockChange,
    pub updated_cost: Option<Decimal>,
    pub stamps_count_date: bool,
}

impl StockEffect {
    /// 逆の作用を作成（移動の取り消し用）
    /// 単価と棚卸日は巻き戻さない
    pub fn negated(&self) -> Self {
        let initial = match self.initial {
            InitialStockChange::Unchanged => InitialStockChange::Unchanged,
            InitialStockChange::Load(q) => InitialStockChange::Unload(q),
            InitialStockChange::Unload(q) => InitialStockChange::Load(q),
        };
        Self {
            balance_delta: -self.balance_delta,
            reserved_delta: -self.reserved_delta,
            restricted_delta: -self.restricted_delta,
            initial,
            updated_cost: None,
            stamps_count_date: false,
        }
    }

    /// 引当可能数の増減量
    pub fn available_delta(&self) -> Decimal {
        let initial_delta = match self.initial {
            InitialStockChange::Unchanged => Decimal::ZERO,
            InitialStockChange::Load(q) => q,
            InitialStockChange::Unload(q) => -q,
        };
        initial_delta + self.balance_delta - self.reserved_delta - self.restricted_delta
    }
}

/// 在庫レコード（倉庫 × 資材ごとに1件）
/// 台帳（MovementLedger）以外からは更新されない
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockRecord {
    id: StockRecordId,
    warehouse_id: WarehouseId,
    material_id: MaterialId,
    balance_in_minus_out: Decimal,
    reserved_quantity: Decimal,
    restricted_quantity: Decimal,
    initial_stock_quantity: Option<Decimal>,
    updated_cost: Option<Decimal>,
    last_stock_count_date: Option<DateTime<Utc>>,
}

impl StockRecord {
    /// 空の在庫レコードを作成（初回移動時の遅延作成用）
    pub fn new(warehouse_id: WarehouseId, material_id: MaterialId) -> Self {
        Self {
            id: StockRecordId::new(),
            warehouse_id,
            material_id,
            balance_in_minus_out: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            restricted_quantity: Decimal::ZERO,
            initial_stock_quantity: None,
            updated_cost: None,
            last_stock_count_date: None,
        }
    }

    /// データベースから取得したデータで在庫レコードを再構築
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        id: StockRecordId,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
        balance_in_minus_out: Decimal,
        reserved_quantity: Decimal,
        restricted_quantity: Decimal,
        initial_stock_quantity: Option<Decimal>,
        updated_cost: Option<Decimal>,
        last_stock_count_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            warehouse_id,
            material_id,
            balance_in_minus_out,
            reserved_quantity,
            restricted_quantity,
            initial_stock_quantity,
            updated_cost,
            last_stock_count_date,
        }
    }

    pub fn id(&self) -> StockRecordId {
        self.id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.warehouse_id
    }

    pub fn material_id(&self) -> MaterialId {
        self.material_id
    }

    pub fn balance_in_minus_out(&self) -> Decimal {
        self.balance_in_minus_out
    }

    pub fn reserved_quantity(&self) -> Decimal {
        self.reserved_quantity
    }

    pub fn restricted_quantity(&self) -> Decimal {
        self.restricted_quantity
    }

    pub fn initial_stock_quantity(&self) -> Option<Decimal> {
        self.initial_stock_quantity
    }

    pub fn updated_cost(&self) -> Option<Decimal> {
        self.updated_cost
    }

    pub fn last_stock_count_date(&self) -> Option<DateTime<Utc>> {
        self.last_stock_count_date
    }

    /// 物理在庫数（初期在庫 + 入出庫差引）
    pub fn physical_quantity(&self) -> Decimal {
        self.initial_stock_quantity.unwrap_or(Decimal::ZERO) + self.balance_in_minus_out
    }

    /// 引当可能数（物理在庫 − 予約 − 制限）
    pub fn available_quantity(&self) -> Decimal {
        self.physical_quantity() - self.reserved_quantity - self.restricted_quantity
    }

    /// 予約・制限で拘束されている数量
    pub fn committed_quantity(&self) -> Decimal {
        self.reserved_quantity + self.restricted_quantity
    }

    /// 作用を適用する
    /// 初期在庫の二重設定は競合として拒否する
    pub fn apply(&mut self, effect: &StockEffect, at: DateTime<Utc>) -> Result<(), DomainError> {
        match effect.initial {
            InitialStockChange::Unchanged => {}
            InitialStockChange::Load(q) => {
                if let Some(existing) = self.initial_stock_quantity {
                    return Err(DomainError::conflict(format!(
                        "資材 {} の初期在庫は既に {} で設定されています",
                        self.material_id, existing
                    )));
                }
                self.initial_stock_quantity = Some(q);
            }
            InitialStockChange::Unload(_) => {
                self.initial_stock_quantity = None;
            }
        }
        self.balance_in_minus_out += effect.balance_delta;
        self.reserved_quantity += effect.reserved_delta;
        self.restricted_quantity += effect.restricted_delta;
        if let Some(cost) = effect.updated_cost {
            self.updated_cost = Some(cost);
        }
        if effect.stamps_count_date {
            self.last_stock_count_date = Some(at);
        }
        Ok(())
    }

    /// 作用適用後の不変条件を検証
    /// - 予約数・制限数は負にならない
    /// - 引当可能数を減らす作用で引当可能数が負になってはならない
    pub fn check_invariants(&self, effect: &StockEffect) -> Result<(), DomainError> {
        if self.reserved_quantity < Decimal::ZERO {
            return Err(DomainError::exceeded(
                format!(
                    "資材 {} の予約数が負になります（予約数 {}）",
                    self.material_id, self.reserved_quantity
                ),
                self.reserved_quantity - effect.reserved_delta,
            ));
        }
        if self.restricted_quantity < Decimal::ZERO {
            return Err(DomainError::exceeded(
                format!(
                    "資材 {} の制限数が負になります（制限数 {}）",
                    self.material_id, self.restricted_quantity
                ),
                self.restricted_quantity - effect.restricted_delta,
            ));
        }
        let delta = effect.available_delta();
        if delta < Decimal::ZERO && self.available_quantity() < Decimal::ZERO {
            return Err(DomainError::exceeded(
                format!(
                    "倉庫 {} の資材 {} の引当可能数が不足しています（要求 {}、引当可能 {}）",
                    self.warehouse_id,
                    self.material_id,
                    -delta,
                    self.available_quantity() - delta
                ),
                self.available_quantity() - delta,
            ));
        }
        Ok(())
    }
}
