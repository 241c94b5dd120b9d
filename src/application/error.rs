use rust_decimal::Decimal;

use crate::domain::error::DomainError;
use crate::domain::port::RepositoryError;

/// アプリケーション層のエラー型
/// 呼び出し側に公開するエラー分類で、永続化層の生のエラーは含まない
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplicationError {
    /// 入力の不備（クライアント側で修正可能）
    #[error("Validation failed: {0}")]
    Validation(String),
    /// 数量の整合性違反
    /// `ceiling` を使ってクライアントが数量を修正できる
    #[error("Consistency violation: {message}")]
    ConsistencyViolation {
        message: String,
        ceiling: Option<Decimal>,
    },
    /// 状態の競合（意図を変えない限り再試行しても失敗する）
    #[error("Conflict: {0}")]
    Conflict(String),
    /// エンティティが見つからない
    #[error("Not found: {0}")]
    NotFound(String),
    /// 永続化の失敗
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

impl ApplicationError {
    /// 整合性違反の上限値を取得
    pub fn ceiling(&self) -> Option<Decimal> {
        match self {
            ApplicationError::ConsistencyViolation { ceiling, .. } => *ceiling,
            _ => None,
        }
    }
}

// From実装でエラー変換を簡潔に
impl From<DomainError> for ApplicationError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => ApplicationError::Validation(msg),
            DomainError::ConsistencyViolation { message, ceiling } => {
                ApplicationError::ConsistencyViolation { message, ceiling }
            }
            DomainError::Conflict(msg) => ApplicationError::Conflict(msg),
            DomainError::NotFound(msg) => ApplicationError::NotFound(msg),
            DomainError::Repository(err) => ApplicationError::from(err),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ConstraintViolation(msg) => ApplicationError::Conflict(msg),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_consistency_violation_keeps_ceiling() {
        let err = ApplicationError::from(DomainError::exceeded("超過", dec!(4)));
        assert_eq!(err.ceiling(), Some(dec!(4)));
    }

    #[test]
    fn test_constraint_violation_is_conflict() {
        let err = ApplicationError::from(DomainError::Repository(
            RepositoryError::ConstraintViolation("duplicate".to_string()),
        ));
        assert_eq!(err, ApplicationError::Conflict("duplicate".to_string()));
    }

    #[test]
    fn test_repository_failure_is_persistence() {
        let err = ApplicationError::from(RepositoryError::ConnectionFailed("down".to_string()));
        assert!(matches!(err, ApplicationError::Persistence(_)));
        assert_eq!(err.ceiling(), None);
    }
}
