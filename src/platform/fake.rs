//! In-process [`Transport`] for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::{Update, UserId};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Reply;
use crate::platform::{BotIdentity, ReplyTarget, Transport, TransportError};

pub(crate) const BOT_ID: UserId = UserId(7);
pub(crate) const BOT_USERNAME: &str = "memebot";

#[derive(Default)]
pub(crate) struct FakeTransport {
    batches: Mutex<VecDeque<Result<Vec<Update>, TransportError>>>,
    sent: Mutex<Vec<(ReplyTarget, Reply)>>,
    offsets: Mutex<Vec<Option<i32>>>,
    fail_sends: bool,
}

impl FakeTransport {
    pub(crate) fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub(crate) fn identity() -> BotIdentity {
        BotIdentity {
            id: BOT_ID,
            username: Some(BOT_USERNAME.to_string()),
        }
    }

    pub(crate) fn push_batch(&self, batch: Vec<Update>) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub(crate) fn push_error(&self, err: TransportError) {
        self.batches.lock().unwrap().push_back(Err(err));
    }

    /// Replies in delivery order (including ones whose delivery failed).
    pub(crate) fn replies(&self) -> Vec<Reply> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reply)| reply.clone())
            .collect()
    }

    pub(crate) fn offsets(&self) -> Vec<Option<i32>> {
        self.offsets.lock().unwrap().clone()
    }

    /// Wait until at least `count` replies were attempted.
    pub(crate) async fn wait_for_replies(&self, count: usize) -> Vec<Reply> {
        for _ in 0..200 {
            let replies = self.replies();
            if replies.len() >= count {
                return replies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} replies, got {:?}", self.replies());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_self(&self) -> Result<BotIdentity, TransportError> {
        Ok(Self::identity())
    }

    async fn send_reply(&self, target: ReplyTarget, reply: &Reply) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((target, reply.clone()));
        if self.fail_sends {
            return Err(TransportError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    async fn poll(
        &self,
        offset: Option<i32>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Update>, TransportError> {
        self.offsets.lock().unwrap().push(offset);

        let next = self.batches.lock().unwrap().pop_front();
        if let Some(next) = next {
            return next;
        }

        // Nothing queued: behave like a long poll that honours cancellation.
        tokio::select! {
            _ = cancel.cancelled() => Ok(Vec::new()),
            _ = tokio::time::sleep(timeout) => Ok(Vec::new()),
        }
    }
}
