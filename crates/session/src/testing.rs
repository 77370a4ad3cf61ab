//! Scripted feed and hand-driven gateway for session tests.

use std::sync::Arc;

use murmur_storage::{
    BoxFuture, ChangeFeed, FeedSender, FeedSubscription, MessageId, MessagePatch,
    MutationGateway, NewMessage, StorageError, StorageResult,
};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::controller::MutationRequest;

/// Hands out one prepared subscription; the test pushes events through the sender.
pub(crate) struct ScriptedFeed {
    subscription: Mutex<Option<FeedSubscription>>,
}

impl ScriptedFeed {
    pub(crate) fn new(collection: &str) -> (FeedSender, Self) {
        let (sender, subscription) = FeedSubscription::channel(collection);
        (
            sender,
            Self {
                subscription: Mutex::new(Some(subscription)),
            },
        )
    }
}

impl ChangeFeed for ScriptedFeed {
    fn subscribe<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, StorageResult<FeedSubscription>> {
        Box::pin(async move {
            self.subscription
                .lock()
                .await
                .take()
                .ok_or_else(|| StorageError::InvariantViolation {
                    stage: "scripted-feed-subscribe",
                    details: format!("collection '{collection}' was already subscribed"),
                })
        })
    }
}

/// One gateway call waiting for the test to answer it.
pub(crate) struct GatewayCall {
    pub(crate) request: MutationRequest,
    reply: oneshot::Sender<StorageResult<()>>,
}

impl GatewayCall {
    pub(crate) fn succeed(self) {
        let _ = self.reply.send(Ok(()));
    }

    pub(crate) fn fail(self, error: StorageError) {
        let _ = self.reply.send(Err(error));
    }
}

pub(crate) struct GatewayCalls {
    calls: mpsc::UnboundedReceiver<GatewayCall>,
}

impl GatewayCalls {
    pub(crate) async fn next_call(&mut self) -> GatewayCall {
        self.calls.recv().await.expect("gateway is alive")
    }

    pub(crate) fn try_next_call(&mut self) -> Option<GatewayCall> {
        self.calls.try_recv().ok()
    }
}

/// Gateway whose calls stay pending until the test answers them.
pub(crate) struct GatedGateway {
    calls: mpsc::UnboundedSender<GatewayCall>,
}

impl GatedGateway {
    pub(crate) fn new() -> (Arc<Self>, GatewayCalls) {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self { calls: call_tx }),
            GatewayCalls { calls: call_rx },
        )
    }

    fn call(&self, request: MutationRequest) -> BoxFuture<'static, StorageResult<()>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .calls
            .send(GatewayCall {
                request,
                reply: reply_tx,
            })
            .is_ok();

        Box::pin(async move {
            let unanswered = || StorageError::InvariantViolation {
                stage: "gated-gateway-reply",
                details: "call was dropped without an answer".to_string(),
            };
            if !sent {
                return Err(unanswered());
            }
            reply_rx.await.unwrap_or_else(|_| Err(unanswered()))
        })
    }
}

impl MutationGateway for GatedGateway {
    fn create<'a>(
        &'a self,
        _collection: &'a str,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.call(MutationRequest::Create(input))
    }

    fn update<'a>(
        &'a self,
        _collection: &'a str,
        message_id: &'a MessageId,
        patch: MessagePatch,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.call(MutationRequest::Update {
            message_id: message_id.clone(),
            patch,
        })
    }

    fn delete<'a>(
        &'a self,
        _collection: &'a str,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, StorageResult<()>> {
        self.call(MutationRequest::Delete(message_id.clone()))
    }
}
