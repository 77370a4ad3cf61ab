use murmur_storage::{MessageId, StorageError};
use snafu::Snafu;

use crate::state::{MutationTicket, TransitionRejection};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("message text must not be empty on `{stage}`"))]
    EmptyText { stage: &'static str },
    #[snafu(display("mutation {active:?} is still in flight on `{stage}`"))]
    OperationInFlight {
        stage: &'static str,
        active: MutationTicket,
    },
    #[snafu(display("transition rejected on `{stage}`: {rejection:?}"))]
    InvalidTransition {
        stage: &'static str,
        rejection: TransitionRejection,
    },
    #[snafu(display("message '{message_id}' is not in the replica"))]
    UnknownMessage {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display("gateway call failed on `{stage}`: {source}"))]
    Gateway {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("gateway call timed out after {timeout_ms}ms on `{stage}`"))]
    GatewayTimeout { stage: &'static str, timeout_ms: u64 },
    #[snafu(display("failed to subscribe to collection '{collection}': {source}"))]
    Subscribe {
        stage: &'static str,
        collection: String,
        source: StorageError,
    },
    #[snafu(display("change feed disconnected: {reason}"))]
    FeedDisconnected { stage: &'static str, reason: String },
    #[snafu(display("session has ended"))]
    SessionEnded { stage: &'static str },
}

/// Coarse classification used by presentation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionErrorKind {
    /// Rejected before any gateway call because the text was empty.
    Validation,
    /// Rejected locally by the state machine; no gateway call was made.
    Rejected,
    /// The gateway call failed or timed out.
    Gateway,
    FeedDisconnected,
    Ended,
}

impl SessionError {
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            Self::EmptyText { .. } => SessionErrorKind::Validation,
            Self::OperationInFlight { .. }
            | Self::InvalidTransition { .. }
            | Self::UnknownMessage { .. } => SessionErrorKind::Rejected,
            Self::Gateway { .. } | Self::GatewayTimeout { .. } => SessionErrorKind::Gateway,
            Self::Subscribe { .. } | Self::FeedDisconnected { .. } => {
                SessionErrorKind::FeedDisconnected
            }
            Self::SessionEnded { .. } => SessionErrorKind::Ended,
        }
    }

    pub(crate) fn from_rejection(stage: &'static str, rejection: TransitionRejection) -> Self {
        match rejection {
            TransitionRejection::OperationInFlight { active } => {
                Self::OperationInFlight { stage, active }
            }
            rejection => Self::InvalidTransition { stage, rejection },
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
