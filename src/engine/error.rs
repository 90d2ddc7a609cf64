use ulid::Ulid;

use crate::model::{PartyRole, ReservationStatus};

/// Coarse error categories exposed to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Role,
    State,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested range overlaps this accepted reservation.
    DatesConflict(Ulid),
    InvalidRange,
    SelfBooking,
    InvalidRating(i64),
    /// `None` means either side of the reservation is allowed.
    RoleMismatch {
        required: Option<PartyRole>,
    },
    InvalidState {
        required: ReservationStatus,
        actual: ReservationStatus,
    },
    InvalidTarget(ReservationStatus),
    ToolBusy(Ulid),
    Contention(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidRange
            | EngineError::SelfBooking
            | EngineError::InvalidRating(_)
            | EngineError::LimitExceeded(_)
            | EngineError::AlreadyExists(_) => ErrorKind::Validation,
            EngineError::DatesConflict(_) | EngineError::Contention(_) | EngineError::ToolBusy(_) => {
                ErrorKind::Conflict
            }
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::RoleMismatch { .. } => ErrorKind::Role,
            EngineError::InvalidState { .. } | EngineError::InvalidTarget(_) => ErrorKind::State,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DatesConflict(id) => {
                write!(f, "booking dates conflict with existing booking {id}")
            }
            EngineError::InvalidRange => write!(f, "start date must be before end date"),
            EngineError::SelfBooking => write!(f, "cannot book your own tool"),
            EngineError::InvalidRating(r) => write!(f, "rating {r} out of range 1..=5"),
            EngineError::RoleMismatch { required: Some(role) } => {
                write!(f, "only the {role} can perform this action")
            }
            EngineError::RoleMismatch { required: None } => {
                write!(f, "only the requester or owner can perform this action")
            }
            EngineError::InvalidState { required, actual } => {
                write!(f, "reservation is {actual}; only {required} reservations allow this")
            }
            EngineError::InvalidTarget(status) => {
                write!(f, "cannot transition a reservation to {status}")
            }
            EngineError::ToolBusy(id) => {
                write!(f, "tool {id} has pending or accepted reservations")
            }
            EngineError::Contention(id) => {
                write!(f, "concurrent updates on reservation {id}, retry later")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
