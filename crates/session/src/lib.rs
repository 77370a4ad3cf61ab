pub mod controller;
pub mod error;
pub mod prompt;
pub mod replica;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod testing;

pub use controller::{
    FeedStatus, MutationKind, MutationRequest, PendingMutation, SessionController,
    SettledMutation,
};
pub use error::{SessionError, SessionErrorKind, SessionResult};
pub use prompt::{DELETE_PROMPT_BODY, DELETE_PROMPT_TITLE, DeleteChoice, DeletePrompt};
pub use replica::{Applied, Replica};
pub use runtime::{
    DEFAULT_MUTATION_TIMEOUT, Session, SessionHandle, SessionOptions, SessionSnapshot,
    unix_timestamp_millis,
};
pub use state::{
    EditSession, MutationTicket, SessionState, SessionTransition, TransitionRejection,
};
