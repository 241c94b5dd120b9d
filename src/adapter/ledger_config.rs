use chrono::Duration;
use std::env;

use crate::adapter::database_config::ConfigError;

/// ログの出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

/// 在庫台帳の動作設定
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// ピッキングオーダーの有効日数（0 なら期限なし）
    pub picking_order_ttl_days: i64,
    /// 期限切れ処理の実行間隔（秒）
    pub expiry_sweep_interval_secs: u64,
    pub log_format: LogFormat,
}

impl LedgerConfig {
    /// 環境変数から設定を読み取る
    pub fn from_env() -> Result<Self, ConfigError> {
        let picking_order_ttl_days = env::var("PICKING_ORDER_TTL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<i64>()
            .map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid PICKING_ORDER_TTL_DAYS: {}", e))
            })?;
        if picking_order_ttl_days < 0 {
            return Err(ConfigError::InvalidValue(format!(
                "Invalid PICKING_ORDER_TTL_DAYS: {} is negative",
                picking_order_ttl_days
            )));
        }

        let expiry_sweep_interval_secs = env::var("EXPIRY_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid EXPIRY_SWEEP_INTERVAL_SECS: {}", e))
            })?;
        if expiry_sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "Invalid EXPIRY_SWEEP_INTERVAL_SECS: must be positive".to_string(),
            ));
        }

        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "plain".to_string())
            .to_lowercase()
            .as_str()
        {
            "plain" => LogFormat::Plain,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid LOG_FORMAT: {}",
                    other
                )))
            }
        };

        Ok(Self {
            picking_order_ttl_days,
            expiry_sweep_interval_secs,
            log_format,
        })
    }

    /// ピッキングオーダーの有効期間
    pub fn picking_order_ttl(&self) -> Option<Duration> {
        (self.picking_order_ttl_days > 0).then(|| Duration::days(self.picking_order_ttl_days))
    }

    pub fn expiry_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}
