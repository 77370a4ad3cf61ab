//! Send/edit/delete orchestration for one session.
//!
//! The controller never writes to the replica on behalf of a mutation: it only
//! hands out [`PendingMutation`]s for the runtime to execute, and the replica
//! changes once the corresponding delta arrives on the change feed.

use std::collections::HashMap;

use murmur_storage::{
    DeltaBatch, MessageId, MessagePatch, MessageRecord, MutationGateway, NewMessage,
    StorageResult,
};
use snafu::{OptionExt, ensure};

use crate::error::{
    EmptyTextSnafu, FeedDisconnectedSnafu, SessionError, SessionResult, UnknownMessageSnafu,
};
use crate::replica::Replica;
use crate::state::{
    EditSession, MutationTicket, SessionState, SessionTransition, TransitionRejection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One write to issue against the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRequest {
    Create(NewMessage),
    Update {
        message_id: MessageId,
        patch: MessagePatch,
    },
    Delete(MessageId),
}

impl MutationRequest {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete(_) => MutationKind::Delete,
        }
    }

    pub async fn execute(
        self,
        gateway: &dyn MutationGateway,
        collection: &str,
    ) -> StorageResult<()> {
        match self {
            Self::Create(input) => gateway.create(collection, input).await,
            Self::Update { message_id, patch } => {
                gateway.update(collection, &message_id, patch).await
            }
            Self::Delete(message_id) => gateway.delete(collection, &message_id).await,
        }
    }
}

/// A mutation the controller accepted and is now waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMutation {
    pub ticket: MutationTicket,
    pub request: MutationRequest,
}

/// Result of matching a gateway completion to its pending mutation.
#[derive(Debug)]
pub struct SettledMutation {
    pub ticket: MutationTicket,
    pub kind: MutationKind,
    pub outcome: SessionResult<()>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeedStatus {
    #[default]
    Live,
    Disconnected {
        reason: String,
    },
}

impl FeedStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

#[derive(Debug)]
pub struct SessionController {
    collection: String,
    replica: Replica,
    state: SessionState,
    composer: String,
    feed: FeedStatus,
    next_ticket: u64,
    pending: HashMap<MutationTicket, MutationKind>,
    last_error: Option<String>,
}

impl SessionController {
    /// Creates an idle controller with an empty replica.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            replica: Replica::new(),
            state: SessionState::Idle,
            composer: String::new(),
            feed: FeedStatus::Live,
            next_ticket: 1,
            pending: HashMap::new(),
            last_error: None,
        }
    }

    /// Collection this session mirrors.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Read-only access to the mirrored records.
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Records newest first.
    pub fn view(&self) -> Vec<MessageRecord> {
        self.replica.view()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// True while a create or an edit save awaits the gateway.
    pub fn in_flight(&self) -> bool {
        self.state.is_in_flight()
    }

    /// Current compose-box text.
    pub fn composer(&self) -> &str {
        &self.composer
    }

    /// Open edit affordance, if any.
    pub fn edit(&self) -> Option<&EditSession> {
        self.state.edit()
    }

    pub fn feed_status(&self) -> &FeedStatus {
        &self.feed
    }

    /// Message of the most recent failure, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Gateway calls issued but not yet settled.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Applies a whole batch. Batches arriving after a disconnect are dropped
    /// so the replica stays frozen at its last consistent state.
    pub fn apply_batch(&mut self, batch: DeltaBatch) -> usize {
        if !self.feed.is_live() {
            tracing::warn!(
                collection = %self.collection,
                batch_len = batch.len(),
                "dropping change feed batch after disconnect"
            );
            return 0;
        }

        let batch_len = batch.len();
        let changed = self.replica.apply_batch(batch);
        tracing::debug!(
            collection = %self.collection,
            batch_len,
            changed,
            size = self.replica.len(),
            "applied change feed batch"
        );
        changed
    }

    pub fn feed_disconnected(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(collection = %self.collection, reason = %reason, "change feed disconnected");
        self.last_error = Some(format!("change feed disconnected: {reason}"));
        self.feed = FeedStatus::Disconnected { reason };
    }

    /// Replaces the compose-box text without sending it.
    pub fn update_composer(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    pub fn submit_new(
        &mut self,
        text: impl Into<String>,
        created_at_unix_millis: i64,
    ) -> SessionResult<PendingMutation> {
        let text = text.into();
        ensure!(
            !text.trim().is_empty(),
            EmptyTextSnafu {
                stage: "session-submit-validate",
            }
        );
        self.ensure_feed_live("session-submit-feed")?;

        let ticket = self.peek_ticket();
        self.transition("session-submit", SessionTransition::Submit(ticket))?;
        self.composer = text.clone();

        Ok(self.issue(
            ticket,
            MutationRequest::Create(NewMessage::new(text, created_at_unix_millis)),
        ))
    }

    pub fn open_edit(&mut self, message_id: &MessageId) -> SessionResult<()> {
        let record = self
            .replica
            .get(message_id)
            .context(UnknownMessageSnafu {
                stage: "session-open-edit-lookup",
                message_id: message_id.clone(),
            })?;
        let edit = EditSession::new(record.id.clone(), record.text.clone());
        self.transition("session-open-edit", SessionTransition::OpenEdit(edit))
    }

    pub fn update_draft(&mut self, text: impl Into<String>) -> SessionResult<()> {
        self.transition(
            "session-update-draft",
            SessionTransition::UpdateDraft(text.into()),
        )
    }

    pub fn save_edit(&mut self) -> SessionResult<PendingMutation> {
        self.ensure_feed_live("session-save-feed")?;

        // Validate only once the state machine agrees a save may start, so an
        // empty draft never masks an in-flight or not-editing rejection.
        let ticket = self.peek_ticket();
        let next_state = self
            .state
            .apply(SessionTransition::Save(ticket))
            .map_err(|rejection| SessionError::from_rejection("session-save", rejection))?;
        let Some(edit) = next_state.edit().cloned() else {
            return Err(SessionError::from_rejection(
                "session-save",
                TransitionRejection::NotEditing,
            ));
        };
        ensure!(
            !edit.draft_text.trim().is_empty(),
            EmptyTextSnafu {
                stage: "session-save-validate",
            }
        );

        self.log_transition(&next_state);
        self.state = next_state;
        Ok(self.issue(
            ticket,
            MutationRequest::Update {
                message_id: edit.target_id,
                patch: MessagePatch::text(edit.draft_text),
            },
        ))
    }

    pub fn cancel_edit(&mut self) -> SessionResult<()> {
        self.transition("session-cancel-edit", SessionTransition::CancelEdit)
    }

    /// Issues a delete without touching the send/edit state.
    ///
    /// The id need not be in the replica: deletes are idempotent downstream.
    pub fn confirm_delete(&mut self, message_id: &MessageId) -> SessionResult<PendingMutation> {
        self.ensure_feed_live("session-delete-feed")?;
        let ticket = self.peek_ticket();
        Ok(self.issue(ticket, MutationRequest::Delete(message_id.clone())))
    }

    /// Matches a gateway completion to its pending mutation.
    ///
    /// Returns `None` for tickets this controller does not know about.
    pub fn settle(
        &mut self,
        ticket: MutationTicket,
        outcome: SessionResult<()>,
    ) -> Option<SettledMutation> {
        let Some(kind) = self.pending.remove(&ticket) else {
            tracing::warn!(
                collection = %self.collection,
                ticket = ticket.0,
                "ignoring completion for unknown mutation"
            );
            return None;
        };

        let succeeded = outcome.is_ok();
        let transition = match kind {
            MutationKind::Create => Some(SessionTransition::SendSettled { ticket, succeeded }),
            MutationKind::Update => Some(SessionTransition::SaveSettled { ticket, succeeded }),
            MutationKind::Delete => None,
        };

        if let Some(transition) = transition {
            match self.state.apply(transition) {
                Ok(next_state) => {
                    self.log_transition(&next_state);
                    self.state = next_state;
                }
                Err(rejection) => {
                    tracing::warn!(
                        collection = %self.collection,
                        ticket = ticket.0,
                        ?rejection,
                        "completion did not match session state"
                    );
                }
            }
        }

        match &outcome {
            Ok(()) => {
                if kind == MutationKind::Create {
                    self.composer.clear();
                }
                self.last_error = None;
                tracing::info!(
                    collection = %self.collection,
                    ticket = ticket.0,
                    kind = kind.as_str(),
                    "mutation acknowledged"
                );
            }
            Err(error) => {
                self.last_error = Some(error.to_string());
                tracing::warn!(
                    collection = %self.collection,
                    ticket = ticket.0,
                    kind = kind.as_str(),
                    error = %error,
                    "mutation failed"
                );
            }
        }

        Some(SettledMutation {
            ticket,
            kind,
            outcome,
        })
    }

    fn ensure_feed_live(&self, stage: &'static str) -> SessionResult<()> {
        match &self.feed {
            FeedStatus::Live => Ok(()),
            FeedStatus::Disconnected { reason } => FeedDisconnectedSnafu {
                stage,
                reason: reason.clone(),
            }
            .fail(),
        }
    }

    fn peek_ticket(&self) -> MutationTicket {
        MutationTicket::new(self.next_ticket)
    }

    fn issue(&mut self, ticket: MutationTicket, request: MutationRequest) -> PendingMutation {
        self.next_ticket = self.next_ticket.saturating_add(1);
        self.pending.insert(ticket, request.kind());
        tracing::debug!(
            collection = %self.collection,
            ticket = ticket.0,
            kind = request.kind().as_str(),
            "issuing mutation"
        );
        PendingMutation { ticket, request }
    }

    fn transition(
        &mut self,
        stage: &'static str,
        transition: SessionTransition,
    ) -> SessionResult<()> {
        let next_state = self
            .state
            .apply(transition)
            .map_err(|rejection| SessionError::from_rejection(stage, rejection))?;
        self.log_transition(&next_state);
        self.state = next_state;
        Ok(())
    }

    fn log_transition(&self, next_state: &SessionState) {
        if self.state.name() != next_state.name() {
            tracing::debug!(
                collection = %self.collection,
                from = self.state.name(),
                to = next_state.name(),
                "session state transition"
            );
        }
    }
}
