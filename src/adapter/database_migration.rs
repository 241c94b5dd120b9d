use sqlx::{MySql, Pool};
use tracing::info;

use crate::adapter::database_error::DatabaseError;

/// マイグレーションファイルのリスト（実行順）
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_stock_records_table",
        include_str!("../../migrations/001_create_stock_records_table.sql"),
    ),
    (
        "002_create_protocol_sequences_table",
        include_str!("../../migrations/002_create_protocol_sequences_table.sql"),
    ),
    (
        "003_create_material_requests_table",
        include_str!("../../migrations/003_create_material_requests_table.sql"),
    ),
    (
        "004_create_material_request_items_table",
        include_str!("../../migrations/004_create_material_request_items_table.sql"),
    ),
    (
        "005_create_picking_orders_table",
        include_str!("../../migrations/005_create_picking_orders_table.sql"),
    ),
    (
        "006_create_picking_order_items_table",
        include_str!("../../migrations/006_create_picking_order_items_table.sql"),
    ),
    (
        "007_create_restriction_orders_table",
        include_str!("../../migrations/007_create_restriction_orders_table.sql"),
    ),
    (
        "008_create_restriction_order_items_table",
        include_str!("../../migrations/008_create_restriction_order_items_table.sql"),
    ),
    (
        "009_create_withdrawals_table",
        include_str!("../../migrations/009_create_withdrawals_table.sql"),
    ),
    (
        "010_create_withdrawal_items_table",
        include_str!("../../migrations/010_create_withdrawal_items_table.sql"),
    ),
    (
        "011_create_receipts_table",
        include_str!("../../migrations/011_create_receipts_table.sql"),
    ),
    (
        "012_create_receipt_items_table",
        include_str!("../../migrations/012_create_receipt_items_table.sql"),
    ),
    (
        "013_create_stock_movements_table",
        include_str!("../../migrations/013_create_stock_movements_table.sql"),
    ),
];

/// データベースマイグレーションを管理する構造体
pub struct DatabaseMigration {
    pool: Pool<MySql>,
}

impl DatabaseMigration {
    /// 新しいDatabaseMigrationインスタンスを作成
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    /// マイグレーションを実行
    /// べき等性を保証（CREATE TABLE IF NOT EXISTS）
    pub async fn run(&self) -> Result<(), DatabaseError> {
        for (name, migration_sql) in MIGRATIONS {
            sqlx::query(migration_sql)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    DatabaseError::MigrationError(format!("Migration {} failed: {}", name, e))
                })?;
            info!(migration = %name, "Migration completed");
        }

        info!(count = MIGRATIONS.len(), "All migrations completed");
        Ok(())
    }
}
