use serde_json::json;

/// Outcome of a rejected ledger operation. Each variant maps to one wire
/// error code; nothing in the ledgers escapes as a panic.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    BadParams(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{0}")]
    Forbidden(String),

    #[error("{message}")]
    Conflict {
        message: String,
        existing_id: Option<String>,
    },

    #[error("{message}")]
    Integrity { message: String, dependents: i64 },

    /// A stored row that cannot be read back; the workspace is at fault,
    /// not the request.
    #[error("{0}")]
    Corrupt(String),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            existing_id: None,
        }
    }

    /// Conflict that points the caller at the row already holding the key.
    pub fn conflict_with(message: impl Into<String>, existing_id: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            existing_id: Some(existing_id.into()),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadParams(_) => "bad_params",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict { .. } => "conflict",
            Self::Integrity { .. } => "integrity",
            Self::Corrupt(_) | Self::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { entity } => Some(json!({ "entity": entity })),
            Self::Conflict {
                existing_id: Some(id),
                ..
            } => Some(json!({ "existingId": id })),
            Self::Integrity { dependents, .. } => Some(json!({ "dependents": dependents })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_carries_dependent_count() {
        let e = LedgerError::Integrity {
            message: "cannot delete department: it has 3 students".into(),
            dependents: 3,
        };
        assert_eq!(e.code(), "integrity");
        assert_eq!(e.details(), Some(json!({ "dependents": 3 })));
        assert!(e.to_string().contains("3 students"));
    }

    #[test]
    fn conflict_without_existing_id_has_no_details() {
        let e = LedgerError::conflict("isbn already exists");
        assert_eq!(e.code(), "conflict");
        assert!(e.details().is_none());
    }

    #[test]
    fn corrupt_row_is_a_storage_error() {
        let e = LedgerError::Corrupt("loan x has an unreadable due date".into());
        assert_eq!(e.code(), "db_query_failed");
        assert!(e.details().is_none());
    }
}
