// 出力ポート
// ドメイン層が外部に依存する機能をトレイトとして定義
// アダプター層でこれらのトレイトを実装する

use crate::domain::model::{
    MaintenanceRequestId, MaterialId, MaterialRequest, MaterialRequestId, MovementOrigin,
    PickingOrder, PickingOrderId, Receipt, ReceiptId, RestrictionOrder, RestrictionOrderId,
    StockEffect, StockMovement, StockMovementId, StockRecord, StockRecordId, WarehouseId,
    Withdrawal, WithdrawalId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// ロガートレイト
/// ログ出力を抽象化するポート
pub trait Logger: Send + Sync {
    /// デバッグレベルのログを出力
    fn debug(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    );

    /// 情報レベルのログを出力
    fn info(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    );

    /// 警告レベルのログを出力
    fn warn(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    );

    /// エラーレベルのログを出力
    fn error(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    );
}

/// リポジトリエラー型
/// リポジトリ操作で発生するエラーを表現する
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::enum_variant_names)]
pub enum RepositoryError {
    /// データベース接続に失敗
    ConnectionFailed(String),
    /// 操作に失敗
    OperationFailed(String),
    /// データの取得に失敗
    FetchFailed(String),
    /// 一意制約などの制約に違反
    ConstraintViolation(String),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            RepositoryError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
            RepositoryError::FetchFailed(msg) => write!(f, "Fetch failed: {}", msg),
            RepositoryError::ConstraintViolation(msg) => {
                write!(f, "Constraint violation: {}", msg)
            }
        }
    }
}

impl std::error::Error for RepositoryError {}

/// 在庫レコードリポジトリトレイト
/// 在庫レコードの書き込みは `apply_stock_effect` の行単位の増減に限る
#[async_trait]
pub trait StockRecordRepository: Send {
    /// 在庫レコードを排他取得する（無ければ空のレコードを作成する）
    ///
    /// # Arguments
    /// * `warehouse_id` - 倉庫ID
    /// * `material_id` - 資材ID
    ///
    /// # Returns
    /// * `Ok(StockRecord)` - 現在の在庫レコード
    /// * `Err(RepositoryError)` - 取得失敗
    async fn lock_stock_record(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<StockRecord, RepositoryError>;

    /// 在庫レコードを検索する（作成はしない）
    async fn find_stock_record(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Option<StockRecord>, RepositoryError>;

    /// 倉庫の在庫レコードを取得する
    /// 資材IDの昇順で並べて返す
    async fn list_stock_records_by_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, RepositoryError>;

    /// 作用を行単位の増減として適用する
    ///
    /// # Arguments
    /// * `record_id` - 対象の在庫レコードID
    /// * `effect` - 適用する作用
    /// * `at` - 棚卸日の記録に使う日時
    ///
    /// # Returns
    /// * `Ok(StockRecord)` - 適用後の在庫レコード
    /// * `Err(RepositoryError)` - 更新失敗
    async fn apply_stock_effect(
        &mut self,
        record_id: StockRecordId,
        effect: &StockEffect,
        at: DateTime<Utc>,
    ) -> Result<StockRecord, RepositoryError>;
}

/// 在庫移動リポジトリトレイト
#[async_trait]
pub trait StockMovementRepository: Send {
    /// 在庫移動を追加する
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), RepositoryError>;

    /// IDで在庫移動を検索する
    async fn find_movement(
        &mut self,
        movement_id: StockMovementId,
    ) -> Result<Option<StockMovement>, RepositoryError>;

    /// 在庫移動を削除する（作用の取り消しは呼び出し側の責務）
    async fn delete_movement(&mut self, movement_id: StockMovementId)
        -> Result<(), RepositoryError>;

    /// 倉庫・資材の在庫移動を取得する
    /// 記録日時の昇順で並べて返す
    async fn list_movements(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Vec<StockMovement>, RepositoryError>;

    /// 発生元の明細に紐づく在庫移動を取得する
    async fn list_movements_by_origin(
        &mut self,
        origin: MovementOrigin,
    ) -> Result<Vec<StockMovement>, RepositoryError>;
}

/// 採番トレイト
#[async_trait]
pub trait SequenceGenerator: Send {
    /// 名前付き連番の次の値を取得する（1始まり）
    async fn next_sequence(&mut self, name: &str) -> Result<i64, RepositoryError>;
}

/// 資材要求リポジトリトレイト
#[async_trait]
pub trait MaterialRequestRepository: Send {
    async fn find_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Option<MaterialRequest>, RepositoryError>;

    /// 資材要求を保存する（明細の納入数量の更新を含む）
    async fn save_material_request(
        &mut self,
        request: &MaterialRequest,
    ) -> Result<(), RepositoryError>;
}

/// ピッキングオーダーリポジトリトレイト
#[async_trait]
pub trait PickingOrderRepository: Send {
    async fn find_picking_order(
        &mut self,
        order_id: PickingOrderId,
    ) -> Result<Option<PickingOrder>, RepositoryError>;

    /// すべてのピッキングオーダーを取得する
    /// 作成日時の降順で並べて返す
    async fn list_picking_orders(&mut self) -> Result<Vec<PickingOrder>, RepositoryError>;

    async fn list_picking_orders_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Vec<PickingOrder>, RepositoryError>;

    /// 期限切れで終端ステータスでないピッキングオーダーを取得する
    async fn list_expirable_picking_orders(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PickingOrder>, RepositoryError>;

    /// ピッキングオーダーを保存する（明細を含めて置き換え）
    async fn save_picking_order(&mut self, order: &PickingOrder) -> Result<(), RepositoryError>;

    async fn delete_picking_order(&mut self, order_id: PickingOrderId)
        -> Result<(), RepositoryError>;

    async fn count_picking_orders_by_maintenance_request(
        &mut self,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError>;
}

/// 制限オーダーリポジトリトレイト
#[async_trait]
pub trait RestrictionOrderRepository: Send {
    async fn find_restriction_order(
        &mut self,
        order_id: RestrictionOrderId,
    ) -> Result<Option<RestrictionOrder>, RepositoryError>;

    /// 資材要求に対する制限オーダーを検索する（高々1件）
    async fn find_restriction_order_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Option<RestrictionOrder>, RepositoryError>;

    /// すべての制限オーダーを取得する
    /// 作成日時の降順で並べて返す
    async fn list_restriction_orders(&mut self) -> Result<Vec<RestrictionOrder>, RepositoryError>;

    /// 制限オーダーを保存する
    /// 同じ資材要求に別の制限オーダーがある場合は `ConstraintViolation`
    async fn save_restriction_order(
        &mut self,
        order: &RestrictionOrder,
    ) -> Result<(), RepositoryError>;

    async fn delete_restriction_order(
        &mut self,
        order_id: RestrictionOrderId,
    ) -> Result<(), RepositoryError>;
}

/// 出庫リポジトリトレイト
#[async_trait]
pub trait WithdrawalRepository: Send {
    async fn find_withdrawal(
        &mut self,
        withdrawal_id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, RepositoryError>;

    /// すべての出庫を取得する
    /// 作成日時の降順で並べて返す
    async fn list_withdrawals(&mut self) -> Result<Vec<Withdrawal>, RepositoryError>;

    async fn list_withdrawals_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Vec<Withdrawal>, RepositoryError>;

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), RepositoryError>;

    async fn count_withdrawals_by_maintenance_request(
        &mut self,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError>;
}

/// 入庫リポジトリトレイト
#[async_trait]
pub trait ReceiptRepository: Send {
    async fn find_receipt(&mut self, receipt_id: ReceiptId)
        -> Result<Option<Receipt>, RepositoryError>;

    /// すべての入庫を取得する
    /// 作成日時の降順で並べて返す
    async fn list_receipts(&mut self) -> Result<Vec<Receipt>, RepositoryError>;

    /// 資材要求・倉庫の組に対する入庫を取得する
    async fn list_receipts_by_material_request_and_warehouse(
        &mut self,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<Receipt>, RepositoryError>;

    async fn save_receipt(&mut self, receipt: &Receipt) -> Result<(), RepositoryError>;

    async fn delete_receipt(&mut self, receipt_id: ReceiptId) -> Result<(), RepositoryError>;
}

/// セッション（作業単位）
/// 1つのトランザクションを表し、すべてのリポジトリ操作はこれを通して行う
/// 入れ子の呼び出しは同じセッションを共有する
#[async_trait]
pub trait Session:
    StockRecordRepository
    + StockMovementRepository
    + SequenceGenerator
    + MaterialRequestRepository
    + PickingOrderRepository
    + RestrictionOrderRepository
    + WithdrawalRepository
    + ReceiptRepository
    + Send
{
    /// 変更を確定する
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    /// 変更を破棄する
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// セッションファクトリトレイト
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// 新しいセッションを開始する
    async fn begin(&self) -> Result<Box<dyn Session>, RepositoryError>;
}
