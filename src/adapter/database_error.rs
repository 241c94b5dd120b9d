use crate::domain::port::RepositoryError;

/// データベースエラー型
/// データベース操作で発生するエラーを表現する
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatabaseError {
    /// データベース接続エラー
    #[error("Database connection error: {0}")]
    ConnectionError(String),
    /// SQLクエリエラー
    #[error("Database query error: {0}")]
    QueryError(String),
    /// 一意制約・外部キー制約の違反
    #[error("Database constraint violation: {0}")]
    ConstraintError(String),
    /// 保存されている値を解釈できない
    #[error("Database decode error: {0}")]
    DecodeError(String),
    /// マイグレーションエラー
    #[error("Migration error: {0}")]
    MigrationError(String),
}

impl DatabaseError {
    /// sqlx のエラーを文脈付きで分類する
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() =>
            {
                DatabaseError::ConstraintError(format!("{}: {}", context, err))
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => {
                DatabaseError::ConnectionError(format!("{}: {}", context, err))
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DatabaseError::DecodeError(format!("{}: {}", context, err))
            }
            _ => DatabaseError::QueryError(format!("{}: {}", context, err)),
        }
    }
}

/// DatabaseErrorからRepositoryErrorへの変換
impl From<DatabaseError> for RepositoryError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConnectionError(msg) => RepositoryError::ConnectionFailed(msg),
            DatabaseError::QueryError(msg) => RepositoryError::OperationFailed(msg),
            DatabaseError::ConstraintError(msg) => RepositoryError::ConstraintViolation(msg),
            DatabaseError::DecodeError(msg) => RepositoryError::FetchFailed(msg),
            DatabaseError::MigrationError(msg) => RepositoryError::OperationFailed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let err = DatabaseError::from_sqlx("在庫レコードの取得", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DatabaseError::ConnectionError(_)));
        assert!(matches!(
            RepositoryError::from(err),
            RepositoryError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn test_row_not_found_is_query_error() {
        let err = DatabaseError::from_sqlx("入庫の取得", sqlx::Error::RowNotFound);
        assert!(matches!(err, DatabaseError::QueryError(ref msg) if msg.starts_with("入庫の取得")));
    }

    #[test]
    fn test_constraint_error_maps_to_constraint_violation() {
        let err = DatabaseError::ConstraintError("duplicate".to_string());
        assert_eq!(
            RepositoryError::from(err),
            RepositoryError::ConstraintViolation("duplicate".to_string())
        );
    }
}
