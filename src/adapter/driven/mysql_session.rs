use crate::adapter::database_error::DatabaseError;
use crate::domain::error::DomainError;
use crate::domain::model::{
    InitialStockChange, MaintenanceRequestId, MaterialId, MaterialRequest, MaterialRequestId,
    MaterialRequestItem, MaterialRequestItemId, MovementOrigin, MovementSubType, OperatorId,
    PickingOrder, PickingOrderId, PickingOrderItem, PickingOrderItemId, PickingOrderStatus,
    Receipt, ReceiptId, ReceiptItem, ReceiptItemId, RestrictionOrder, RestrictionOrderId,
    RestrictionOrderItem, RestrictionOrderItemId, RestrictionStatus, StockEffect, StockMovement,
    StockMovementId, StockRecord, StockRecordId, WarehouseId, Withdrawal, WithdrawalId,
    WithdrawalItem, WithdrawalItemId,
};
use crate::domain::port::{
    MaterialRequestRepository, PickingOrderRepository, ReceiptRepository, RepositoryError,
    RestrictionOrderRepository, SequenceGenerator, Session, SessionFactory,
    StockMovementRepository, StockRecordRepository, WithdrawalRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

// MySQL関連のインポート
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, Pool, QueryBuilder, Row, Transaction};

const STOCK_RECORD_COLUMNS: &str = "id, warehouse_id, material_id, balance_in_minus_out, \
     reserved_quantity, restricted_quantity, initial_stock_quantity, updated_cost, \
     last_stock_count_date";

const MOVEMENT_COLUMNS: &str = "id, warehouse_id, material_id, quantity, sub_type, \
     picking_order_item_id, restriction_order_item_id, withdrawal_item_id, receipt_item_id, \
     order_linked, material_request_id, maintenance_request_id, unit_price, operator_id, \
     created_at";

const PICKING_ORDER_COLUMNS: &str = "id, protocol, warehouse_id, material_request_id, \
     maintenance_request_id, status, value_picking_order, notes, operator_id, expires_at, \
     created_at, updated_at";

const RESTRICTION_ORDER_COLUMNS: &str = "id, protocol, warehouse_id, material_request_id, \
     status, notes, operator_id, created_at, updated_at";

const WITHDRAWAL_COLUMNS: &str = "id, protocol, warehouse_id, sub_type, material_request_id, \
     maintenance_request_id, picking_order_id, value_withdrawal, notes, operator_id, created_at";

const RECEIPT_COLUMNS: &str = "id, protocol, warehouse_id, sub_type, material_request_id, \
     notes, operator_id, created_at, updated_at";

/// MySQLセッションファクトリ
/// セッションごとにコネクションプールからトランザクションを開始する
#[derive(Clone)]
pub struct MySqlSessionFactory {
    pool: Pool<MySql>,
}

impl MySqlSessionFactory {
    /// 新しいMySQLセッションファクトリを作成
    ///
    /// # Arguments
    /// * `pool` - MySQLコネクションプール
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for MySqlSessionFactory {
    async fn begin(&self) -> Result<Box<dyn Session>, RepositoryError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("トランザクションの開始に失敗しました", e))?;
        Ok(Box::new(MySqlSession { tx }))
    }
}

/// MySQLセッション
/// 1つのトランザクションの中ですべてのリポジトリ操作を行う
pub struct MySqlSession {
    tx: Transaction<'static, MySql>,
}

fn db_error(context: &str, err: sqlx::Error) -> RepositoryError {
    DatabaseError::from_sqlx(context, err).into()
}

fn column<'r, T>(row: &'r MySqlRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    row.try_get(name)
        .map_err(|e| db_error(&format!("列 {} の読み取りに失敗しました", name), e))
}

fn id_column<T>(
    row: &MySqlRow,
    name: &str,
    parse: fn(&str) -> Result<T, uuid::Error>,
) -> Result<T, RepositoryError> {
    let raw: String = column(row, name)?;
    parse(&raw).map_err(|e| {
        RepositoryError::FetchFailed(format!("列 {} のIDの解析に失敗しました: {}", name, e))
    })
}

fn optional_id_column<T>(
    row: &MySqlRow,
    name: &str,
    parse: fn(&str) -> Result<T, uuid::Error>,
) -> Result<Option<T>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.map(|raw| {
        parse(&raw).map_err(|e| {
            RepositoryError::FetchFailed(format!("列 {} のIDの解析に失敗しました: {}", name, e))
        })
    })
    .transpose()
}

/// 保存値からドメインの列挙値への変換失敗を取得失敗として扱う
fn decoded<T>(result: Result<T, DomainError>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::FetchFailed(e.to_string()))
}

fn line_no(index: usize) -> i32 {
    i32::try_from(index + 1).unwrap_or(i32::MAX)
}

fn origin_column(origin: &MovementOrigin) -> Option<(&'static str, String)> {
    match origin {
        MovementOrigin::None => None,
        MovementOrigin::PickingOrderItem(id) => Some(("picking_order_item_id", id.to_string())),
        MovementOrigin::RestrictionOrderItem(id) => {
            Some(("restriction_order_item_id", id.to_string()))
        }
        MovementOrigin::WithdrawalItem(id) => Some(("withdrawal_item_id", id.to_string())),
        MovementOrigin::ReceiptItem(id) => Some(("receipt_item_id", id.to_string())),
    }
}

fn origin_from_row(row: &MySqlRow) -> Result<MovementOrigin, RepositoryError> {
    if let Some(id) = optional_id_column(row, "picking_order_item_id", PickingOrderItemId::from_string)? {
        return Ok(MovementOrigin::PickingOrderItem(id));
    }
    if let Some(id) =
        optional_id_column(row, "restriction_order_item_id", RestrictionOrderItemId::from_string)?
    {
        return Ok(MovementOrigin::RestrictionOrderItem(id));
    }
    if let Some(id) = optional_id_column(row, "withdrawal_item_id", WithdrawalItemId::from_string)? {
        return Ok(MovementOrigin::WithdrawalItem(id));
    }
    if let Some(id) = optional_id_column(row, "receipt_item_id", ReceiptItemId::from_string)? {
        return Ok(MovementOrigin::ReceiptItem(id));
    }
    Ok(MovementOrigin::None)
}

fn stock_record_from_row(row: &MySqlRow) -> Result<StockRecord, RepositoryError> {
    Ok(StockRecord::reconstruct(
        id_column(row, "id", StockRecordId::from_string)?,
        id_column(row, "warehouse_id", WarehouseId::from_string)?,
        id_column(row, "material_id", MaterialId::from_string)?,
        column(row, "balance_in_minus_out")?,
        column(row, "reserved_quantity")?,
        column(row, "restricted_quantity")?,
        column(row, "initial_stock_quantity")?,
        column(row, "updated_cost")?,
        column(row, "last_stock_count_date")?,
    ))
}

fn movement_from_row(row: &MySqlRow) -> Result<StockMovement, RepositoryError> {
    let sub_type: String = column(row, "sub_type")?;
    Ok(StockMovement {
        id: id_column(row, "id", StockMovementId::from_string)?,
        warehouse_id: id_column(row, "warehouse_id", WarehouseId::from_string)?,
        material_id: id_column(row, "material_id", MaterialId::from_string)?,
        quantity: column(row, "quantity")?,
        sub_type: decoded(MovementSubType::from_string(&sub_type))?,
        origin: origin_from_row(row)?,
        order_linked: column(row, "order_linked")?,
        material_request_id: optional_id_column(
            row,
            "material_request_id",
            MaterialRequestId::from_string,
        )?,
        maintenance_request_id: optional_id_column(
            row,
            "maintenance_request_id",
            MaintenanceRequestId::from_string,
        )?,
        unit_price: column(row, "unit_price")?,
        operator_id: optional_id_column(row, "operator_id", OperatorId::from_string)?,
        created_at: column(row, "created_at")?,
    })
}

fn material_request_item_from_row(row: &MySqlRow) -> Result<MaterialRequestItem, RepositoryError> {
    Ok(MaterialRequestItem {
        id: id_column(row, "id", MaterialRequestItemId::from_string)?,
        material_id: id_column(row, "material_id", MaterialId::from_string)?,
        quantity_requested: column(row, "quantity_requested")?,
        quantity_approved: column(row, "quantity_approved")?,
        quantity_delivered: column(row, "quantity_delivered")?,
        quantity_returned: column(row, "quantity_returned")?,
        unit_price: column(row, "unit_price")?,
    })
}

fn picking_order_item_from_row(row: &MySqlRow) -> Result<PickingOrderItem, RepositoryError> {
    Ok(PickingOrderItem {
        id: id_column(row, "id", PickingOrderItemId::from_string)?,
        material_id: id_column(row, "material_id", MaterialId::from_string)?,
        material_request_item_id: optional_id_column(
            row,
            "material_request_item_id",
            MaterialRequestItemId::from_string,
        )?,
        quantity_to_pick: column(row, "quantity_to_pick")?,
        quantity_picked: column(row, "quantity_picked")?,
        quantity_withdrawn: column(row, "quantity_withdrawn")?,
        unit_price: column(row, "unit_price")?,
    })
}

fn restriction_order_item_from_row(
    row: &MySqlRow,
) -> Result<RestrictionOrderItem, RepositoryError> {
    Ok(RestrictionOrderItem {
        id: id_column(row, "id", RestrictionOrderItemId::from_string)?,
        material_id: id_column(row, "material_id", MaterialId::from_string)?,
        material_request_item_id: id_column(
            row,
            "material_request_item_id",
            MaterialRequestItemId::from_string,
        )?,
        quantity_restricted: column(row, "quantity_restricted")?,
    })
}

fn withdrawal_item_from_row(row: &MySqlRow) -> Result<WithdrawalItem, RepositoryError> {
    Ok(WithdrawalItem {
        id: id_column(row, "id", WithdrawalItemId::from_string)?,
        material_id: id_column(row, "material_id", MaterialId::from_string)?,
        material_request_item_id: optional_id_column(
            row,
            "material_request_item_id",
            MaterialRequestItemId::from_string,
        )?,
        picking_order_item_id: optional_id_column(
            row,
            "picking_order_item_id",
            PickingOrderItemId::from_string,
        )?,
        quantity_withdrawn: column(row, "quantity_withdrawn")?,
        unit_price: column(row, "unit_price")?,
    })
}

fn receipt_item_from_row(row: &MySqlRow) -> Result<ReceiptItem, RepositoryError> {
    Ok(ReceiptItem {
        id: id_column(row, "id", ReceiptItemId::from_string)?,
        material_id: id_column(row, "material_id", MaterialId::from_string)?,
        material_request_item_id: optional_id_column(
            row,
            "material_request_item_id",
            MaterialRequestItemId::from_string,
        )?,
        quantity_expected: column(row, "quantity_expected")?,
        quantity_received: column(row, "quantity_received")?,
        quantity_rejected: column(row, "quantity_rejected")?,
        unit_price: column(row, "unit_price")?,
    })
}

impl MySqlSession {
    async fn fetch_items(
        &mut self,
        table: &str,
        parent_column: &str,
        parent_id: String,
    ) -> Result<Vec<MySqlRow>, RepositoryError> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY line_no ASC",
            table, parent_column
        );
        sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error(&format!("{} の取得に失敗しました", table), e))
    }

    async fn exists(&mut self, table: &str, id: String) -> Result<bool, RepositoryError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", table);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error(&format!("{} の存在確認に失敗しました", table), e))?;
        Ok(count > 0)
    }

    /// 保存対象に含まれない明細を削除する
    /// 残る明細は行ごと更新されるため、在庫移動からの参照は保たれる
    async fn delete_missing_items(
        &mut self,
        table: &str,
        parent_column: &str,
        parent_id: String,
        keep: Vec<String>,
    ) -> Result<(), RepositoryError> {
        let mut builder: QueryBuilder<MySql> =
            QueryBuilder::new(format!("DELETE FROM {} WHERE {} = ", table, parent_column));
        builder.push_bind(parent_id);
        if !keep.is_empty() {
            builder.push(" AND id NOT IN (");
            let mut separated = builder.separated(", ");
            for id in keep {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
        }
        builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error(&format!("{} の削除に失敗しました", table), e))?;
        Ok(())
    }

    async fn count_by_maintenance_request(
        &mut self,
        table: &str,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE maintenance_request_id = ?",
            table
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(maintenance_request_id.to_string())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error(&format!("{} の件数取得に失敗しました", table), e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn picking_order_from_row(
        &mut self,
        row: &MySqlRow,
    ) -> Result<PickingOrder, RepositoryError> {
        let id = id_column(row, "id", PickingOrderId::from_string)?;
        let status: String = column(row, "status")?;
        let items = self
            .fetch_items("picking_order_items", "picking_order_id", id.to_string())
            .await?
            .iter()
            .map(picking_order_item_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PickingOrder::reconstruct(
            id,
            column(row, "protocol")?,
            id_column(row, "warehouse_id", WarehouseId::from_string)?,
            optional_id_column(row, "material_request_id", MaterialRequestId::from_string)?,
            optional_id_column(
                row,
                "maintenance_request_id",
                MaintenanceRequestId::from_string,
            )?,
            decoded(PickingOrderStatus::from_string(&status))?,
            items,
            column(row, "value_picking_order")?,
            column(row, "notes")?,
            optional_id_column(row, "operator_id", OperatorId::from_string)?,
            column(row, "expires_at")?,
            column(row, "created_at")?,
            column(row, "updated_at")?,
        ))
    }

    async fn picking_orders_from_rows(
        &mut self,
        rows: Vec<MySqlRow>,
    ) -> Result<Vec<PickingOrder>, RepositoryError> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.picking_order_from_row(row).await?);
        }
        Ok(orders)
    }

    async fn restriction_order_from_row(
        &mut self,
        row: &MySqlRow,
    ) -> Result<RestrictionOrder, RepositoryError> {
        let id = id_column(row, "id", RestrictionOrderId::from_string)?;
        let status: String = column(row, "status")?;
        let items = self
            .fetch_items(
                "restriction_order_items",
                "restriction_order_id",
                id.to_string(),
            )
            .await?
            .iter()
            .map(restriction_order_item_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RestrictionOrder::reconstruct(
            id,
            column(row, "protocol")?,
            id_column(row, "warehouse_id", WarehouseId::from_string)?,
            id_column(row, "material_request_id", MaterialRequestId::from_string)?,
            decoded(RestrictionStatus::from_string(&status))?,
            items,
            column(row, "notes")?,
            optional_id_column(row, "operator_id", OperatorId::from_string)?,
            column(row, "created_at")?,
            column(row, "updated_at")?,
        ))
    }

    async fn withdrawal_from_row(&mut self, row: &MySqlRow) -> Result<Withdrawal, RepositoryError> {
        let id = id_column(row, "id", WithdrawalId::from_string)?;
        let sub_type: String = column(row, "sub_type")?;
        let items = self
            .fetch_items("withdrawal_items", "withdrawal_id", id.to_string())
            .await?
            .iter()
            .map(withdrawal_item_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Withdrawal::reconstruct(
            id,
            column(row, "protocol")?,
            id_column(row, "warehouse_id", WarehouseId::from_string)?,
            decoded(MovementSubType::from_string(&sub_type))?,
            optional_id_column(row, "material_request_id", MaterialRequestId::from_string)?,
            optional_id_column(
                row,
                "maintenance_request_id",
                MaintenanceRequestId::from_string,
            )?,
            optional_id_column(row, "picking_order_id", PickingOrderId::from_string)?,
            items,
            column(row, "value_withdrawal")?,
            column(row, "notes")?,
            optional_id_column(row, "operator_id", OperatorId::from_string)?,
            column(row, "created_at")?,
        ))
    }

    async fn withdrawals_from_rows(
        &mut self,
        rows: Vec<MySqlRow>,
    ) -> Result<Vec<Withdrawal>, RepositoryError> {
        let mut withdrawals = Vec::with_capacity(rows.len());
        for row in &rows {
            withdrawals.push(self.withdrawal_from_row(row).await?);
        }
        Ok(withdrawals)
    }

    async fn receipt_from_row(&mut self, row: &MySqlRow) -> Result<Receipt, RepositoryError> {
        let id = id_column(row, "id", ReceiptId::from_string)?;
        let sub_type: String = column(row, "sub_type")?;
        let items = self
            .fetch_items("receipt_items", "receipt_id", id.to_string())
            .await?
            .iter()
            .map(receipt_item_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Receipt::reconstruct(
            id,
            column(row, "protocol")?,
            id_column(row, "warehouse_id", WarehouseId::from_string)?,
            decoded(MovementSubType::from_string(&sub_type))?,
            optional_id_column(row, "material_request_id", MaterialRequestId::from_string)?,
            items,
            column(row, "notes")?,
            optional_id_column(row, "operator_id", OperatorId::from_string)?,
            column(row, "created_at")?,
            column(row, "updated_at")?,
        ))
    }

    async fn receipts_from_rows(
        &mut self,
        rows: Vec<MySqlRow>,
    ) -> Result<Vec<Receipt>, RepositoryError> {
        let mut receipts = Vec::with_capacity(rows.len());
        for row in &rows {
            receipts.push(self.receipt_from_row(row).await?);
        }
        Ok(receipts)
    }

    async fn movements_from_query(
        &mut self,
        sql: &str,
        binds: Vec<String>,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫移動の取得に失敗しました", e))?;
        rows.iter().map(movement_from_row).collect()
    }
}

#[async_trait]
impl StockRecordRepository for MySqlSession {
    async fn lock_stock_record(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<StockRecord, RepositoryError> {
        // 初回の移動で空のレコードを作成する
        sqlx::query("INSERT IGNORE INTO stock_records (id, warehouse_id, material_id) VALUES (?, ?, ?)")
            .bind(StockRecordId::new().to_string())
            .bind(warehouse_id.to_string())
            .bind(material_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫レコードの作成に失敗しました", e))?;

        let sql = format!(
            "SELECT {} FROM stock_records WHERE warehouse_id = ? AND material_id = ? FOR UPDATE",
            STOCK_RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(warehouse_id.to_string())
            .bind(material_id.to_string())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫レコードのロックに失敗しました", e))?;
        stock_record_from_row(&row)
    }

    async fn find_stock_record(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Option<StockRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM stock_records WHERE warehouse_id = ? AND material_id = ?",
            STOCK_RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(warehouse_id.to_string())
            .bind(material_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫レコードの取得に失敗しました", e))?;
        row.as_ref().map(stock_record_from_row).transpose()
    }

    async fn list_stock_records_by_warehouse(
        &mut self,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM stock_records WHERE warehouse_id = ? ORDER BY material_id ASC",
            STOCK_RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(warehouse_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫レコード一覧の取得に失敗しました", e))?;
        rows.iter().map(stock_record_from_row).collect()
    }

    async fn apply_stock_effect(
        &mut self,
        record_id: StockRecordId,
        effect: &StockEffect,
        at: DateTime<Utc>,
    ) -> Result<StockRecord, RepositoryError> {
        let (initial_action, initial_value) = match effect.initial {
            InitialStockChange::Unchanged => ("UNCHANGED", None),
            InitialStockChange::Load(q) => ("LOAD", Some(q)),
            InitialStockChange::Unload(_) => ("UNLOAD", None),
        };
        let counted_at = effect.stamps_count_date.then_some(at);

        // 読み直した値の上書きではなく、行単位の増減として適用する
        let result = sqlx::query(
            r#"
            UPDATE stock_records SET
                balance_in_minus_out = balance_in_minus_out + ?,
                reserved_quantity = reserved_quantity + ?,
                restricted_quantity = restricted_quantity + ?,
                initial_stock_quantity = CASE ?
                    WHEN 'LOAD' THEN ?
                    WHEN 'UNLOAD' THEN NULL
                    ELSE initial_stock_quantity
                END,
                updated_cost = COALESCE(?, updated_cost),
                last_stock_count_date = COALESCE(?, last_stock_count_date)
            WHERE id = ?
            "#,
        )
        .bind(effect.balance_delta)
        .bind(effect.reserved_delta)
        .bind(effect.restricted_delta)
        .bind(initial_action)
        .bind(initial_value)
        .bind(effect.updated_cost)
        .bind(counted_at)
        .bind(record_id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("在庫レコードの更新に失敗しました", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::OperationFailed(format!(
                "在庫レコード {} が見つかりません",
                record_id
            )));
        }

        let sql = format!("SELECT {} FROM stock_records WHERE id = ?", STOCK_RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(record_id.to_string())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫レコードの再取得に失敗しました", e))?;
        stock_record_from_row(&row)
    }
}

#[async_trait]
impl StockMovementRepository for MySqlSession {
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), RepositoryError> {
        let origin = origin_column(&movement.origin);
        let origin_id = |name: &str| {
            origin
                .as_ref()
                .filter(|(column, _)| *column == name)
                .map(|(_, id)| id.clone())
        };

        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, warehouse_id, material_id, quantity, operation, sub_type,
                picking_order_item_id, restriction_order_item_id, withdrawal_item_id,
                receipt_item_id, order_linked, material_request_id, maintenance_request_id,
                unit_price, operator_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(movement.id.to_string())
        .bind(movement.warehouse_id.to_string())
        .bind(movement.material_id.to_string())
        .bind(movement.quantity)
        .bind(movement.sub_type.operation().as_str())
        .bind(movement.sub_type.as_str())
        .bind(origin_id("picking_order_item_id"))
        .bind(origin_id("restriction_order_item_id"))
        .bind(origin_id("withdrawal_item_id"))
        .bind(origin_id("receipt_item_id"))
        .bind(movement.order_linked)
        .bind(movement.material_request_id.map(|id| id.to_string()))
        .bind(movement.maintenance_request_id.map(|id| id.to_string()))
        .bind(movement.unit_price)
        .bind(movement.operator_id.map(|id| id.to_string()))
        .bind(movement.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("在庫移動の保存に失敗しました", e))?;
        Ok(())
    }

    async fn find_movement(
        &mut self,
        movement_id: StockMovementId,
    ) -> Result<Option<StockMovement>, RepositoryError> {
        let sql = format!("SELECT {} FROM stock_movements WHERE id = ?", MOVEMENT_COLUMNS);
        Ok(self
            .movements_from_query(&sql, vec![movement_id.to_string()])
            .await?
            .into_iter()
            .next())
    }

    async fn delete_movement(
        &mut self,
        movement_id: StockMovementId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM stock_movements WHERE id = ?")
            .bind(movement_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("在庫移動の削除に失敗しました", e))?;
        Ok(())
    }

    async fn list_movements(
        &mut self,
        warehouse_id: WarehouseId,
        material_id: MaterialId,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE warehouse_id = ? AND material_id = ? ORDER BY seq ASC",
            MOVEMENT_COLUMNS
        );
        self.movements_from_query(&sql, vec![warehouse_id.to_string(), material_id.to_string()])
            .await
    }

    async fn list_movements_by_origin(
        &mut self,
        origin: MovementOrigin,
    ) -> Result<Vec<StockMovement>, RepositoryError> {
        let Some((name, id)) = origin_column(&origin) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE {} = ? ORDER BY seq ASC",
            MOVEMENT_COLUMNS, name
        );
        self.movements_from_query(&sql, vec![id]).await
    }
}

#[async_trait]
impl SequenceGenerator for MySqlSession {
    async fn next_sequence(&mut self, name: &str) -> Result<i64, RepositoryError> {
        // 行ロックはトランザクション終了まで保持される
        sqlx::query(
            "INSERT INTO protocol_sequences (name, value) VALUES (?, 1) \
             ON DUPLICATE KEY UPDATE value = value + 1",
        )
        .bind(name)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("採番に失敗しました", e))?;

        sqlx::query_scalar("SELECT value FROM protocol_sequences WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("採番値の取得に失敗しました", e))
    }
}

#[async_trait]
impl MaterialRequestRepository for MySqlSession {
    async fn find_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Option<MaterialRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, protocol, warehouse_id, maintenance_request_id \
             FROM material_requests WHERE id = ?",
        )
        .bind(request_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("資材要求の取得に失敗しました", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let items = self
            .fetch_items(
                "material_request_items",
                "material_request_id",
                request_id.to_string(),
            )
            .await?
            .iter()
            .map(material_request_item_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(MaterialRequest {
            id: id_column(&row, "id", MaterialRequestId::from_string)?,
            protocol: column(&row, "protocol")?,
            warehouse_id: id_column(&row, "warehouse_id", WarehouseId::from_string)?,
            maintenance_request_id: optional_id_column(
                &row,
                "maintenance_request_id",
                MaintenanceRequestId::from_string,
            )?,
            items,
        }))
    }

    async fn save_material_request(
        &mut self,
        request: &MaterialRequest,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO material_requests (id, protocol, warehouse_id, maintenance_request_id)
            VALUES (?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                protocol = VALUES(protocol),
                warehouse_id = VALUES(warehouse_id),
                maintenance_request_id = VALUES(maintenance_request_id)
            "#,
        )
        .bind(request.id.to_string())
        .bind(&request.protocol)
        .bind(request.warehouse_id.to_string())
        .bind(request.maintenance_request_id.map(|id| id.to_string()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("資材要求の保存に失敗しました", e))?;

        for (index, item) in request.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO material_request_items (
                    id, material_request_id, line_no, material_id, quantity_requested,
                    quantity_approved, quantity_delivered, quantity_returned, unit_price
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    line_no = VALUES(line_no),
                    quantity_requested = VALUES(quantity_requested),
                    quantity_approved = VALUES(quantity_approved),
                    quantity_delivered = VALUES(quantity_delivered),
                    quantity_returned = VALUES(quantity_returned),
                    unit_price = VALUES(unit_price)
                "#,
            )
            .bind(item.id.to_string())
            .bind(request.id.to_string())
            .bind(line_no(index))
            .bind(item.material_id.to_string())
            .bind(item.quantity_requested)
            .bind(item.quantity_approved)
            .bind(item.quantity_delivered)
            .bind(item.quantity_returned)
            .bind(item.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("資材要求明細の保存に失敗しました", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PickingOrderRepository for MySqlSession {
    async fn find_picking_order(
        &mut self,
        order_id: PickingOrderId,
    ) -> Result<Option<PickingOrder>, RepositoryError> {
        let sql = format!("SELECT {} FROM picking_orders WHERE id = ?", PICKING_ORDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(order_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダーの取得に失敗しました", e))?;
        match row {
            Some(row) => Ok(Some(self.picking_order_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_picking_orders(&mut self) -> Result<Vec<PickingOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM picking_orders ORDER BY created_at DESC",
            PICKING_ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダー一覧の取得に失敗しました", e))?;
        self.picking_orders_from_rows(rows).await
    }

    async fn list_picking_orders_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Vec<PickingOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM picking_orders WHERE material_request_id = ? ORDER BY created_at DESC",
            PICKING_ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(request_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダー一覧の取得に失敗しました", e))?;
        self.picking_orders_from_rows(rows).await
    }

    async fn list_expirable_picking_orders(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PickingOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM picking_orders \
             WHERE status NOT IN (?, ?, ?) AND expires_at IS NOT NULL AND expires_at <= ? \
             ORDER BY created_at DESC",
            PICKING_ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(PickingOrderStatus::FullyWithdrawn.as_str())
            .bind(PickingOrderStatus::Cancelled.as_str())
            .bind(PickingOrderStatus::Expired.as_str())
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("期限切れピッキングオーダーの取得に失敗しました", e))?;
        self.picking_orders_from_rows(rows).await
    }

    async fn save_picking_order(&mut self, order: &PickingOrder) -> Result<(), RepositoryError> {
        if self.exists("picking_orders", order.id().to_string()).await? {
            sqlx::query(
                r#"
                UPDATE picking_orders SET
                    status = ?, value_picking_order = ?, notes = ?, operator_id = ?,
                    expires_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(order.status().as_str())
            .bind(order.value_picking_order())
            .bind(order.notes())
            .bind(order.operator_id().map(|id| id.to_string()))
            .bind(order.expires_at())
            .bind(order.updated_at())
            .bind(order.id().to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダーの更新に失敗しました", e))?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO picking_orders (
                    id, protocol, warehouse_id, material_request_id, maintenance_request_id,
                    status, value_picking_order, notes, operator_id, expires_at,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(order.id().to_string())
            .bind(order.protocol())
            .bind(order.warehouse_id().to_string())
            .bind(order.material_request_id().map(|id| id.to_string()))
            .bind(order.maintenance_request_id().map(|id| id.to_string()))
            .bind(order.status().as_str())
            .bind(order.value_picking_order())
            .bind(order.notes())
            .bind(order.operator_id().map(|id| id.to_string()))
            .bind(order.expires_at())
            .bind(order.created_at())
            .bind(order.updated_at())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダーの保存に失敗しました", e))?;
        }

        for (index, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO picking_order_items (
                    id, picking_order_id, line_no, material_id, material_request_item_id,
                    quantity_to_pick, quantity_picked, quantity_withdrawn, unit_price
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    line_no = VALUES(line_no),
                    quantity_to_pick = VALUES(quantity_to_pick),
                    quantity_picked = VALUES(quantity_picked),
                    quantity_withdrawn = VALUES(quantity_withdrawn),
                    unit_price = VALUES(unit_price)
                "#,
            )
            .bind(item.id.to_string())
            .bind(order.id().to_string())
            .bind(line_no(index))
            .bind(item.material_id.to_string())
            .bind(item.material_request_item_id.map(|id| id.to_string()))
            .bind(item.quantity_to_pick)
            .bind(item.quantity_picked)
            .bind(item.quantity_withdrawn)
            .bind(item.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダー明細の保存に失敗しました", e))?;
        }

        let keep = order.items().iter().map(|item| item.id.to_string()).collect();
        self.delete_missing_items(
            "picking_order_items",
            "picking_order_id",
            order.id().to_string(),
            keep,
        )
        .await
    }

    async fn delete_picking_order(
        &mut self,
        order_id: PickingOrderId,
    ) -> Result<(), RepositoryError> {
        // 明細は連鎖削除され、在庫移動からの参照は NULL になる
        sqlx::query("DELETE FROM picking_orders WHERE id = ?")
            .bind(order_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("ピッキングオーダーの削除に失敗しました", e))?;
        Ok(())
    }

    async fn count_picking_orders_by_maintenance_request(
        &mut self,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError> {
        self.count_by_maintenance_request("picking_orders", maintenance_request_id)
            .await
    }
}

#[async_trait]
impl RestrictionOrderRepository for MySqlSession {
    async fn find_restriction_order(
        &mut self,
        order_id: RestrictionOrderId,
    ) -> Result<Option<RestrictionOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM restriction_orders WHERE id = ?",
            RESTRICTION_ORDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(order_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダーの取得に失敗しました", e))?;
        match row {
            Some(row) => Ok(Some(self.restriction_order_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_restriction_order_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Option<RestrictionOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM restriction_orders WHERE material_request_id = ? FOR UPDATE",
            RESTRICTION_ORDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(request_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダーの取得に失敗しました", e))?;
        match row {
            Some(row) => Ok(Some(self.restriction_order_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_restriction_orders(&mut self) -> Result<Vec<RestrictionOrder>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM restriction_orders ORDER BY created_at DESC",
            RESTRICTION_ORDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダー一覧の取得に失敗しました", e))?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(self.restriction_order_from_row(row).await?);
        }
        Ok(orders)
    }

    async fn save_restriction_order(
        &mut self,
        order: &RestrictionOrder,
    ) -> Result<(), RepositoryError> {
        if self
            .exists("restriction_orders", order.id().to_string())
            .await?
        {
            sqlx::query(
                r#"
                UPDATE restriction_orders SET
                    status = ?, notes = ?, operator_id = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(order.status().as_str())
            .bind(order.notes())
            .bind(order.operator_id().map(|id| id.to_string()))
            .bind(order.updated_at())
            .bind(order.id().to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダーの更新に失敗しました", e))?;
        } else {
            // 資材要求の一意制約違反は ConstraintViolation になる
            sqlx::query(
                r#"
                INSERT INTO restriction_orders (
                    id, protocol, warehouse_id, material_request_id, status, notes,
                    operator_id, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(order.id().to_string())
            .bind(order.protocol())
            .bind(order.warehouse_id().to_string())
            .bind(order.material_request_id().to_string())
            .bind(order.status().as_str())
            .bind(order.notes())
            .bind(order.operator_id().map(|id| id.to_string()))
            .bind(order.created_at())
            .bind(order.updated_at())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダーの保存に失敗しました", e))?;
        }

        for (index, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO restriction_order_items (
                    id, restriction_order_id, line_no, material_id, material_request_item_id,
                    quantity_restricted
                )
                VALUES (?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    line_no = VALUES(line_no),
                    quantity_restricted = VALUES(quantity_restricted)
                "#,
            )
            .bind(item.id.to_string())
            .bind(order.id().to_string())
            .bind(line_no(index))
            .bind(item.material_id.to_string())
            .bind(item.material_request_item_id.to_string())
            .bind(item.quantity_restricted)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダー明細の保存に失敗しました", e))?;
        }

        let keep = order.items().iter().map(|item| item.id.to_string()).collect();
        self.delete_missing_items(
            "restriction_order_items",
            "restriction_order_id",
            order.id().to_string(),
            keep,
        )
        .await
    }

    async fn delete_restriction_order(
        &mut self,
        order_id: RestrictionOrderId,
    ) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM restriction_orders WHERE id = ?")
            .bind(order_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("制限オーダーの削除に失敗しました", e))?;
        Ok(())
    }
}

#[async_trait]
impl WithdrawalRepository for MySqlSession {
    async fn find_withdrawal(
        &mut self,
        withdrawal_id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, RepositoryError> {
        let sql = format!("SELECT {} FROM withdrawals WHERE id = ?", WITHDRAWAL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(withdrawal_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("出庫の取得に失敗しました", e))?;
        match row {
            Some(row) => Ok(Some(self.withdrawal_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_withdrawals(&mut self) -> Result<Vec<Withdrawal>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM withdrawals ORDER BY created_at DESC",
            WITHDRAWAL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("出庫一覧の取得に失敗しました", e))?;
        self.withdrawals_from_rows(rows).await
    }

    async fn list_withdrawals_by_material_request(
        &mut self,
        request_id: MaterialRequestId,
    ) -> Result<Vec<Withdrawal>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM withdrawals WHERE material_request_id = ? ORDER BY created_at DESC",
            WITHDRAWAL_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(request_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("出庫一覧の取得に失敗しました", e))?;
        self.withdrawals_from_rows(rows).await
    }

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), RepositoryError> {
        // 出庫は作成後に備考以外を変更しない
        if self.exists("withdrawals", withdrawal.id().to_string()).await? {
            sqlx::query("UPDATE withdrawals SET notes = ? WHERE id = ?")
                .bind(withdrawal.notes())
                .bind(withdrawal.id().to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("出庫の更新に失敗しました", e))?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO withdrawals (
                id, protocol, warehouse_id, sub_type, material_request_id,
                maintenance_request_id, picking_order_id, value_withdrawal, notes,
                operator_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(withdrawal.id().to_string())
        .bind(withdrawal.protocol())
        .bind(withdrawal.warehouse_id().to_string())
        .bind(withdrawal.sub_type().as_str())
        .bind(withdrawal.material_request_id().map(|id| id.to_string()))
        .bind(withdrawal.maintenance_request_id().map(|id| id.to_string()))
        .bind(withdrawal.picking_order_id().map(|id| id.to_string()))
        .bind(withdrawal.value_withdrawal())
        .bind(withdrawal.notes())
        .bind(withdrawal.operator_id().map(|id| id.to_string()))
        .bind(withdrawal.created_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("出庫の保存に失敗しました", e))?;

        for (index, item) in withdrawal.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO withdrawal_items (
                    id, withdrawal_id, line_no, material_id, material_request_item_id,
                    picking_order_item_id, quantity_withdrawn, unit_price
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(item.id.to_string())
            .bind(withdrawal.id().to_string())
            .bind(line_no(index))
            .bind(item.material_id.to_string())
            .bind(item.material_request_item_id.map(|id| id.to_string()))
            .bind(item.picking_order_item_id.map(|id| id.to_string()))
            .bind(item.quantity_withdrawn)
            .bind(item.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("出庫明細の保存に失敗しました", e))?;
        }
        Ok(())
    }

    async fn count_withdrawals_by_maintenance_request(
        &mut self,
        maintenance_request_id: MaintenanceRequestId,
    ) -> Result<u64, RepositoryError> {
        self.count_by_maintenance_request("withdrawals", maintenance_request_id)
            .await
    }
}

#[async_trait]
impl ReceiptRepository for MySqlSession {
    async fn find_receipt(
        &mut self,
        receipt_id: ReceiptId,
    ) -> Result<Option<Receipt>, RepositoryError> {
        let sql = format!("SELECT {} FROM receipts WHERE id = ?", RECEIPT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(receipt_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("入庫の取得に失敗しました", e))?;
        match row {
            Some(row) => Ok(Some(self.receipt_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn list_receipts(&mut self) -> Result<Vec<Receipt>, RepositoryError> {
        let sql = format!("SELECT {} FROM receipts ORDER BY created_at DESC", RECEIPT_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("入庫一覧の取得に失敗しました", e))?;
        self.receipts_from_rows(rows).await
    }

    async fn list_receipts_by_material_request_and_warehouse(
        &mut self,
        request_id: MaterialRequestId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<Receipt>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM receipts WHERE material_request_id = ? AND warehouse_id = ? \
             ORDER BY created_at DESC",
            RECEIPT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(request_id.to_string())
            .bind(warehouse_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("入庫一覧の取得に失敗しました", e))?;
        self.receipts_from_rows(rows).await
    }

    async fn save_receipt(&mut self, receipt: &Receipt) -> Result<(), RepositoryError> {
        if self.exists("receipts", receipt.id().to_string()).await? {
            sqlx::query("UPDATE receipts SET notes = ?, updated_at = ? WHERE id = ?")
                .bind(receipt.notes())
                .bind(receipt.updated_at())
                .bind(receipt.id().to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("入庫の更新に失敗しました", e))?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO receipts (
                    id, protocol, warehouse_id, sub_type, material_request_id, notes,
                    operator_id, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(receipt.id().to_string())
            .bind(receipt.protocol())
            .bind(receipt.warehouse_id().to_string())
            .bind(receipt.sub_type().as_str())
            .bind(receipt.material_request_id().map(|id| id.to_string()))
            .bind(receipt.notes())
            .bind(receipt.operator_id().map(|id| id.to_string()))
            .bind(receipt.created_at())
            .bind(receipt.updated_at())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("入庫の保存に失敗しました", e))?;
        }

        for (index, item) in receipt.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO receipt_items (
                    id, receipt_id, line_no, material_id, material_request_item_id,
                    quantity_expected, quantity_received, quantity_rejected, unit_price
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    quantity_expected = VALUES(quantity_expected),
                    quantity_received = VALUES(quantity_received),
                    quantity_rejected = VALUES(quantity_rejected)
                "#,
            )
            .bind(item.id.to_string())
            .bind(receipt.id().to_string())
            .bind(line_no(index))
            .bind(item.material_id.to_string())
            .bind(item.material_request_item_id.map(|id| id.to_string()))
            .bind(item.quantity_expected)
            .bind(item.quantity_received)
            .bind(item.quantity_rejected)
            .bind(item.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("入庫明細の保存に失敗しました", e))?;
        }
        Ok(())
    }

    async fn delete_receipt(&mut self, receipt_id: ReceiptId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM receipts WHERE id = ?")
            .bind(receipt_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("入庫の削除に失敗しました", e))?;
        Ok(())
    }
}

#[async_trait]
impl Session for MySqlSession {
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("トランザクションの確定に失敗しました", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("トランザクションの破棄に失敗しました", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_column_names() {
        let item_id = PickingOrderItemId::new();
        assert_eq!(
            origin_column(&MovementOrigin::PickingOrderItem(item_id)),
            Some(("picking_order_item_id", item_id.to_string()))
        );
        assert_eq!(origin_column(&MovementOrigin::None), None);

        let receipt_item = ReceiptItemId::new();
        assert_eq!(
            origin_column(&MovementOrigin::ReceiptItem(receipt_item)).map(|(name, _)| name),
            Some("receipt_item_id")
        );
    }

    #[test]
    fn test_line_numbers_start_at_one() {
        assert_eq!(line_no(0), 1);
        assert_eq!(line_no(4), 5);
    }

    #[test]
    fn test_decode_failure_is_fetch_failed() {
        let err = decoded(MovementSubType::from_string("UNKNOWN")).unwrap_err();
        assert!(matches!(err, RepositoryError::FetchFailed(_)));
    }
}
