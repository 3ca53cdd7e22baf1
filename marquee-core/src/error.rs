use uuid::Uuid;

/// Error taxonomy shared by every component. Handlers map these onto HTTP
/// status codes; repositories map storage failures into `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Conflict {
        message: String,
        /// Seats the caller lost the race for, so the seat map can be
        /// refreshed and the request retried.
        seat_ids: Vec<Uuid>,
    },

    #[error("storage failure: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
            seat_ids: Vec::new(),
        }
    }

    pub fn seat_conflict(msg: impl Into<String>, seat_ids: Vec<Uuid>) -> Self {
        Self::Conflict {
            message: msg.into(),
            seat_ids,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
