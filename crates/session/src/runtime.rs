//! Single-task session runtime.
//!
//! One actor owns the [`SessionController`] and is the only place where
//! feed batches, user commands and gateway completions are applied, one at a
//! time. Gateway calls run on their own tasks and report back with their
//! ticket, so a slow store never blocks feed processing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use murmur_storage::{
    ChangeFeed, FeedEvent, FeedSubscription, MessageId, MessageRecord, MutationGateway,
};
use snafu::{OptionExt, ResultExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::controller::{FeedStatus, PendingMutation, SessionController};
use crate::error::{
    GatewaySnafu, GatewayTimeoutSnafu, SessionEndedSnafu, SessionResult, SubscribeSnafu,
};
use crate::prompt::{DeleteChoice, DeletePrompt};
use crate::state::{EditSession, MutationTicket, SessionState};

pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound for one gateway call before it is reported as failed.
    pub mutation_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
        }
    }
}

impl SessionOptions {
    pub fn with_mutation_timeout(mut self, mutation_timeout: Duration) -> Self {
        self.mutation_timeout = mutation_timeout;
        self
    }
}

/// Everything presentation code needs to render one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Newest first.
    pub messages: Arc<[MessageRecord]>,
    pub state: SessionState,
    pub composer: String,
    pub feed: FeedStatus,
    pub last_error: Option<String>,
    pub ended: bool,
}

impl SessionSnapshot {
    fn empty() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
            state: SessionState::Idle,
            composer: String::new(),
            feed: FeedStatus::Live,
            last_error: None,
            ended: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.state.is_in_flight()
    }

    pub fn edit(&self) -> Option<&EditSession> {
        self.state.edit()
    }

    pub fn draft(&self) -> Option<&str> {
        self.edit().map(|edit| edit.draft_text.as_str())
    }
}

type Reply = oneshot::Sender<SessionResult<()>>;

enum SessionCommand {
    SubmitNew {
        text: String,
        created_at_unix_millis: i64,
        reply: Reply,
    },
    UpdateComposer {
        text: String,
        reply: Reply,
    },
    OpenEdit {
        message_id: MessageId,
        reply: Reply,
    },
    UpdateDraft {
        text: String,
        reply: Reply,
    },
    SaveEdit {
        reply: Reply,
    },
    CancelEdit {
        reply: Reply,
    },
    ConfirmDelete {
        message_id: MessageId,
        reply: Reply,
    },
    Shutdown {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

struct MutationSettled {
    ticket: MutationTicket,
    outcome: SessionResult<()>,
}

pub struct Session;

impl Session {
    /// Subscribes to `collection` exactly once and starts the session actor.
    pub async fn start(
        collection: impl Into<String>,
        feed: &dyn ChangeFeed,
        gateway: Arc<dyn MutationGateway>,
        options: SessionOptions,
    ) -> SessionResult<SessionHandle> {
        let collection = collection.into();
        let subscription = feed
            .subscribe(&collection)
            .await
            .context(SubscribeSnafu {
                stage: "session-start-subscribe",
                collection: collection.clone(),
            })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::empty());

        tracing::info!(
            collection = %collection,
            mutation_timeout_ms = duration_millis(options.mutation_timeout),
            "session started"
        );

        let actor = SessionActor {
            controller: SessionController::new(collection),
            subscription: Some(subscription),
            gateway,
            options,
            commands: command_rx,
            completion_tx,
            completions: completion_rx,
            waiters: HashMap::new(),
            outbox: Vec::new(),
            snapshots: snapshot_tx,
            published_revision: 0,
            published_messages: Arc::from(Vec::new()),
            ended: false,
        };
        let task = tokio::spawn(actor.run());

        Ok(SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            task,
        })
    }
}

struct SessionActor {
    controller: SessionController,
    subscription: Option<FeedSubscription>,
    gateway: Arc<dyn MutationGateway>,
    options: SessionOptions,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    completion_tx: mpsc::UnboundedSender<MutationSettled>,
    completions: mpsc::UnboundedReceiver<MutationSettled>,
    waiters: HashMap<MutationTicket, Reply>,
    // Replies wait here until the snapshot reflecting them is published.
    outbox: Vec<(Reply, SessionResult<()>)>,
    snapshots: watch::Sender<SessionSnapshot>,
    published_revision: u64,
    published_messages: Arc<[MessageRecord]>,
    ended: bool,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown { reply }) => {
                        let snapshot = self.teardown("shutdown requested");
                        let _ = reply.send(snapshot);
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown("session handle dropped");
                        return;
                    }
                },
                Some(settled) = self.completions.recv() => self.handle_settled(settled),
                event = next_feed_event(&mut self.subscription) => self.handle_feed_event(event),
            }
            self.publish();
            self.flush_replies();
        }
    }

    fn respond(&mut self, reply: Reply, outcome: SessionResult<()>) {
        self.outbox.push((reply, outcome));
    }

    fn flush_replies(&mut self) {
        for (reply, outcome) in self.outbox.drain(..) {
            let _ = reply.send(outcome);
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SubmitNew {
                text,
                created_at_unix_millis,
                reply,
            } => match self.controller.submit_new(text, created_at_unix_millis) {
                Ok(pending) => self.dispatch(pending, Some(reply)),
                Err(error) => self.respond(reply, Err(error)),
            },
            SessionCommand::UpdateComposer { text, reply } => {
                self.controller.update_composer(text);
                self.respond(reply, Ok(()));
            }
            SessionCommand::OpenEdit { message_id, reply } => {
                let outcome = self.controller.open_edit(&message_id);
                self.respond(reply, outcome);
            }
            SessionCommand::UpdateDraft { text, reply } => {
                let outcome = self.controller.update_draft(text);
                self.respond(reply, outcome);
            }
            SessionCommand::SaveEdit { reply } => match self.controller.save_edit() {
                Ok(pending) => self.dispatch(pending, Some(reply)),
                Err(error) => self.respond(reply, Err(error)),
            },
            SessionCommand::CancelEdit { reply } => {
                let outcome = self.controller.cancel_edit();
                self.respond(reply, outcome);
            }
            SessionCommand::ConfirmDelete { message_id, reply } => {
                match self.controller.confirm_delete(&message_id) {
                    Ok(pending) => self.dispatch(pending, Some(reply)),
                    Err(error) => self.respond(reply, Err(error)),
                }
            }
            SessionCommand::Shutdown { .. } => {}
        }
    }

    fn dispatch(&mut self, pending: PendingMutation, reply: Option<Reply>) {
        let PendingMutation { ticket, request } = pending;
        if let Some(reply) = reply {
            self.waiters.insert(ticket, reply);
        }

        let gateway = Arc::clone(&self.gateway);
        let collection = self.controller.collection().to_string();
        let completions = self.completion_tx.clone();
        let timeout = self.options.mutation_timeout;

        tokio::spawn(async move {
            let kind = request.kind();
            let outcome =
                match tokio::time::timeout(timeout, request.execute(gateway.as_ref(), &collection))
                    .await
                {
                    Ok(result) => result.context(GatewaySnafu {
                        stage: "session-mutation-execute",
                    }),
                    Err(_) => GatewayTimeoutSnafu {
                        stage: "session-mutation-timeout",
                        timeout_ms: duration_millis(timeout),
                    }
                    .fail(),
                };
            tracing::debug!(
                collection = %collection,
                ticket = ticket.0,
                kind = kind.as_str(),
                succeeded = outcome.is_ok(),
                "mutation task finished"
            );
            // The session may have ended; late completions are dropped.
            let _ = completions.send(MutationSettled { ticket, outcome });
        });
    }

    fn handle_settled(&mut self, settled: MutationSettled) {
        let MutationSettled { ticket, outcome } = settled;
        let waiter = self.waiters.remove(&ticket);
        match self.controller.settle(ticket, outcome) {
            Some(settled) => {
                if let Some(waiter) = waiter {
                    self.respond(waiter, settled.outcome);
                }
            }
            None => drop(waiter),
        }
    }

    fn handle_feed_event(&mut self, event: Option<FeedEvent>) {
        match event {
            Some(FeedEvent::Batch(batch)) => {
                self.controller.apply_batch(batch);
            }
            Some(FeedEvent::Error(reason)) => {
                self.close_subscription();
                self.controller.feed_disconnected(reason);
            }
            None => {
                self.close_subscription();
                self.controller.feed_disconnected("change feed closed");
            }
        }
    }

    fn close_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn teardown(&mut self, reason: &'static str) -> SessionSnapshot {
        self.close_subscription();
        // Dropping the waiters resolves their callers with `SessionEnded`.
        let abandoned = self.waiters.len();
        self.waiters.clear();
        self.ended = true;
        self.publish();

        tracing::info!(
            collection = %self.controller.collection(),
            reason,
            abandoned,
            "session ended"
        );
        self.snapshots.borrow().clone()
    }

    fn publish(&mut self) {
        let revision = self.controller.replica().revision();
        if revision != self.published_revision {
            self.published_messages = Arc::from(self.controller.view());
            self.published_revision = revision;
        }

        let next = SessionSnapshot {
            messages: Arc::clone(&self.published_messages),
            state: self.controller.state().clone(),
            composer: self.controller.composer().to_string(),
            feed: self.controller.feed_status().clone(),
            last_error: self.controller.last_error().map(str::to_string),
            ended: self.ended,
        };
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn next_feed_event(subscription: &mut Option<FeedSubscription>) -> Option<FeedEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Caller side of a running session.
///
/// Dropping the handle ends the session just like [`SessionHandle::end`].
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Resolves once the store acknowledged the create; the message itself
    /// only shows up when its delta arrives.
    pub async fn submit_new(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        let created_at_unix_millis = unix_timestamp_millis();
        self.request(|reply| SessionCommand::SubmitNew {
            text,
            created_at_unix_millis,
            reply,
        })
        .await
    }

    pub async fn update_composer(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.request(|reply| SessionCommand::UpdateComposer { text, reply })
            .await
    }

    pub async fn open_edit(&self, message_id: MessageId) -> SessionResult<()> {
        self.request(|reply| SessionCommand::OpenEdit { message_id, reply })
            .await
    }

    pub async fn update_draft(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.request(|reply| SessionCommand::UpdateDraft { text, reply })
            .await
    }

    pub async fn save_edit(&self) -> SessionResult<()> {
        self.request(|reply| SessionCommand::SaveEdit { reply }).await
    }

    pub async fn cancel_edit(&self) -> SessionResult<()> {
        self.request(|reply| SessionCommand::CancelEdit { reply })
            .await
    }

    /// Builds the confirmation prompt. Nothing is sent to the store yet.
    pub fn request_delete(&self, message_id: MessageId) -> DeletePrompt {
        DeletePrompt::new(message_id)
    }

    pub async fn confirm_delete(&self, message_id: MessageId) -> SessionResult<()> {
        self.request(|reply| SessionCommand::ConfirmDelete { message_id, reply })
            .await
    }

    /// Applies the user's answer to a delete prompt.
    pub async fn resolve_delete(
        &self,
        prompt: DeletePrompt,
        choice: DeleteChoice,
    ) -> SessionResult<()> {
        match choice {
            DeleteChoice::Cancel => Ok(()),
            DeleteChoice::Confirm => self.confirm_delete(prompt.message_id).await,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn view(&self) -> Arc<[MessageRecord]> {
        Arc::clone(&self.snapshots.borrow().messages)
    }

    pub fn in_flight(&self) -> bool {
        self.snapshots.borrow().in_flight()
    }

    /// A fresh receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits for the next snapshot published after this call.
    pub async fn changed(&self) -> SessionResult<SessionSnapshot> {
        let mut snapshots = self.snapshots.clone();
        snapshots.borrow_and_update();
        snapshots.changed().await.ok().context(SessionEndedSnafu {
            stage: "session-changed",
        })?;
        let snapshot = snapshots.borrow().clone();
        Ok(snapshot)
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> SessionResult<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .context(SessionEndedSnafu {
                stage: "session-wait-for",
            })?;
        Ok(snapshot.clone())
    }

    /// Stops the feed, abandons pending completions and returns the final snapshot.
    pub async fn end(self) -> SessionSnapshot {
        let Self {
            commands,
            snapshots,
            task,
        } = self;

        let (reply_tx, reply_rx) = oneshot::channel();
        let final_snapshot = match commands.send(SessionCommand::Shutdown { reply: reply_tx }) {
            Ok(()) => reply_rx.await.ok(),
            Err(_) => None,
        };
        drop(commands);
        if let Err(error) = task.await {
            tracing::warn!(error = %error, "session task did not finish cleanly");
        }

        final_snapshot.unwrap_or_else(|| {
            let mut snapshot = snapshots.borrow().clone();
            snapshot.ended = true;
            snapshot
        })
    }

    async fn request<F>(&self, build: F) -> SessionResult<()>
    where
        F: FnOnce(Reply) -> SessionCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .ok()
            .context(SessionEndedSnafu {
                stage: "session-command-send",
            })?;
        reply_rx.await.ok().context(SessionEndedSnafu {
            stage: "session-command-reply",
        })?
    }
}

pub fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
