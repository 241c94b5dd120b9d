use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warehouse_stock_ledger::adapter::driven::{MySqlSessionFactory, TracingLogger};
use warehouse_stock_ledger::adapter::driver::ExpirySweeper;
use warehouse_stock_ledger::adapter::{DatabaseConfig, DatabaseMigration, LedgerConfig, LogFormat};
use warehouse_stock_ledger::application::service::LedgerServices;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .envファイルから環境変数を読み込む
    dotenvy::dotenv().ok();

    let ledger_config = LedgerConfig::from_env()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warehouse_stock_ledger=info,sqlx=warn"));
    match ledger_config.log_format {
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    // データベース設定を読み込む
    let config = DatabaseConfig::from_env()?;
    info!(host = %config.host, port = config.port, "Database configuration loaded");

    // 接続プールを作成
    let pool = MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;

    DatabaseMigration::new(pool.clone()).run().await?;

    let logger = Arc::new(TracingLogger::new());
    let services = LedgerServices::new(
        Arc::new(MySqlSessionFactory::new(pool.clone())),
        logger.clone(),
        ledger_config.picking_order_ttl(),
    );

    // 期限切れ処理はバックグラウンドで定期実行する
    let sweeper = ExpirySweeper::new(
        Arc::new(services.picking_orders),
        ledger_config.expiry_sweep_interval(),
        logger,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    info!(
        picking_order_ttl_days = ledger_config.picking_order_ttl_days,
        "Warehouse stock ledger started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown_tx.send(true)?;
    sweeper_handle.await?;
    pool.close().await;

    info!("Warehouse stock ledger stopped");
    Ok(())
}
