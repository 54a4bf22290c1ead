use sqlx::error::ErrorKind;

use crate::application::repos::RepoError;

/// SQLSTATE raised when `statement_timeout` cancels a query.
const QUERY_CANCELED: &str = "57014";
/// Malformed literals such as an out-of-range date.
const INVALID_TEXT: [&str; 3] = ["22P02", "22007", "22008"];

/// Translate a sqlx failure into the repository error surface.
///
/// A foreign-key violation on `habit_logs` means the habit was deleted
/// between the ownership check and the insert, so it surfaces as `NotFound`.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.into_owned()).unwrap_or_default();
            match db.kind() {
                ErrorKind::UniqueViolation => RepoError::Duplicate {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                },
                ErrorKind::ForeignKeyViolation => RepoError::NotFound,
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    RepoError::Integrity {
                        message: db.message().to_string(),
                    }
                }
                _ if code == QUERY_CANCELED => RepoError::Timeout,
                _ if INVALID_TEXT.contains(&code.as_str()) => RepoError::InvalidInput {
                    message: db.message().to_string(),
                },
                _ => RepoError::from_persistence(db.message()),
            }
        }
        other => RepoError::from_persistence(other),
    }
}
