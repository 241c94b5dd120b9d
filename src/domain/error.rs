use rust_decimal::Decimal;

use crate::domain::port::RepositoryError;

/// ドメイン層のエラー型
/// ビジネスルール違反を表現する
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// 入力の不備（例: 必須の対象IDが無い、明細が空）
    #[error("Validation failed: {0}")]
    Validation(String),
    /// 数量の整合性違反（例: 引当可能数の超過）
    /// `ceiling` は許容される上限値（分かる場合）
    #[error("Consistency violation: {message}")]
    ConsistencyViolation {
        message: String,
        ceiling: Option<Decimal>,
    },
    /// 状態の競合（例: 終端状態のオーダーの編集、1:1制約の重複）
    #[error("Conflict: {0}")]
    Conflict(String),
    /// 対象が見つからない
    #[error("Not found: {0}")]
    NotFound(String),
    /// 永続化の失敗
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// 上限値付きの整合性違反
    pub fn exceeded(msg: impl Into<String>, ceiling: Decimal) -> Self {
        Self::ConsistencyViolation {
            message: msg.into(),
            ceiling: Some(ceiling),
        }
    }

    /// 上限値なしの整合性違反
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            message: msg.into(),
            ceiling: None,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
