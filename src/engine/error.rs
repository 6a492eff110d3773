use ulid::Ulid;

use crate::model::Slot;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    /// An active booking already covers part of the requested interval.
    /// Carries the existing booking so callers can say which one.
    Conflict { booking: Ulid, existing: Slot },
    /// Requester is neither the booking owner nor an administrator.
    Forbidden,
    /// A uniqueness rule was violated; the field is named (e.g. "email").
    Duplicate(&'static str),
    Validation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict { booking, existing } => {
                write!(
                    f,
                    "conflict with booking {booking} ({}–{})",
                    existing.start, existing.end
                )
            }
            EngineError::Forbidden => write!(f, "forbidden"),
            EngineError::Duplicate(field) => write!(f, "duplicate {field}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
